use crate::core::error::Result;
use crate::core::types::IndexRecord;
use crate::cursor::{cursor_closed, cursor_exhausted, Cursor};

/// Cursor over a materialized index scan. The snapshot is taken when the
/// records are collected, so concurrent writes never affect an open cursor.
pub struct IndexCursor {
    records: Vec<IndexRecord>,
    pos: usize,
    closed: bool,
}

impl IndexCursor {
    pub fn new(records: Vec<IndexRecord>) -> Self {
        IndexCursor {
            records,
            pos: 0,
            closed: false,
        }
    }

    pub fn single(record: IndexRecord) -> Self {
        IndexCursor::new(vec![record])
    }

    pub fn empty() -> Self {
        IndexCursor::new(Vec::new())
    }
}

impl Cursor for IndexCursor {
    fn has_more(&self) -> Result<bool> {
        if self.closed {
            return Err(cursor_closed("IndexCursor"));
        }
        Ok(self.pos < self.records.len())
    }

    fn next(&mut self) -> Result<IndexRecord> {
        if self.closed {
            return Err(cursor_closed("IndexCursor"));
        }
        let record = self
            .records
            .get(self.pos)
            .cloned()
            .ok_or_else(|| cursor_exhausted("IndexCursor"))?;
        self.pos += 1;
        Ok(record)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.records.clear();
        Ok(())
    }
}
