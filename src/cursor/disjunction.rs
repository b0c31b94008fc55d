use std::collections::HashSet;
use crate::core::error::Result;
use crate::core::types::{EntryId, IndexRecord};
use crate::cursor::{cursor_closed, cursor_exhausted, Cursor};

/// Union of N child cursors with id-based duplicate elimination.
///
/// Construction primes the first unseen record. Children are advanced
/// strictly left-to-right and never revisited once exhausted; no ordering
/// relationship among the children's streams is assumed, so the output
/// order is first-seen order, not sorted order.
pub struct DisjunctionCursor {
    children: Vec<Box<dyn Cursor>>,
    current: usize,
    seen: HashSet<EntryId>,
    staged: Option<IndexRecord>,
    closed: bool,
}

impl DisjunctionCursor {
    pub fn new(children: Vec<Box<dyn Cursor>>) -> Result<Self> {
        let mut cursor = DisjunctionCursor {
            children,
            current: 0,
            seen: HashSet::new(),
            staged: None,
            closed: false,
        };
        cursor.stage()?;
        Ok(cursor)
    }

    /// Advance from the current child until an unseen id turns up; leaves
    /// staged empty when every child is exhausted.
    fn stage(&mut self) -> Result<()> {
        while self.current < self.children.len() {
            let child = &mut self.children[self.current];
            while child.has_more()? {
                let record = child.next()?;
                if self.seen.insert(record.id) {
                    self.staged = Some(record);
                    return Ok(());
                }
            }
            self.current += 1;
        }
        self.staged = None;
        Ok(())
    }
}

impl Cursor for DisjunctionCursor {
    fn has_more(&self) -> Result<bool> {
        if self.closed {
            return Err(cursor_closed("DisjunctionCursor"));
        }
        Ok(self.staged.is_some())
    }

    fn next(&mut self) -> Result<IndexRecord> {
        if self.closed {
            return Err(cursor_closed("DisjunctionCursor"));
        }
        let record = self
            .staged
            .take()
            .ok_or_else(|| cursor_exhausted("DisjunctionCursor"))?;
        self.stage()?;
        Ok(record)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for child in &mut self.children {
            child.close()?;
        }
        self.staged = None;
        self.seen.clear();
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::cursor::IndexCursor;

    fn child(ids: &[u64]) -> Box<dyn Cursor> {
        let records = ids
            .iter()
            .map(|&n| IndexRecord::new(EntryId(n), EntryId(n)))
            .collect();
        Box::new(IndexCursor::new(records))
    }

    fn drain(cursor: &mut dyn Cursor) -> Vec<u64> {
        let mut out = Vec::new();
        while cursor.has_more().unwrap() {
            out.push(cursor.next().unwrap().id.value());
        }
        out
    }

    #[test]
    fn overlapping_children_emit_each_id_once() {
        // [1,3,5] union [3,5,7] must come out as [1,3,5,7] in first-seen
        // order.
        let mut cursor = DisjunctionCursor::new(vec![child(&[1, 3, 5]), child(&[3, 5, 7])]).unwrap();
        assert_eq!(drain(&mut cursor), vec![1, 3, 5, 7]);
    }

    #[test]
    fn output_equals_set_union_of_children() {
        let mut cursor = DisjunctionCursor::new(vec![
            child(&[4, 2]),
            child(&[2, 9, 4]),
            child(&[]),
            child(&[9, 1]),
        ])
        .unwrap();
        let out = drain(&mut cursor);
        let distinct: HashSet<u64> = out.iter().copied().collect();
        assert_eq!(distinct.len(), out.len());
        assert_eq!(distinct, HashSet::from([1, 2, 4, 9]));
    }

    #[test]
    fn empty_child_list_is_immediately_exhausted() {
        let cursor = DisjunctionCursor::new(Vec::new()).unwrap();
        assert!(!cursor.has_more().unwrap());
    }

    #[test]
    fn has_more_does_not_consume() {
        let mut cursor = DisjunctionCursor::new(vec![child(&[1, 2])]).unwrap();
        for _ in 0..10 {
            assert!(cursor.has_more().unwrap());
        }
        assert_eq!(cursor.next().unwrap().id, EntryId(1));
        assert_eq!(cursor.next().unwrap().id, EntryId(2));
        for _ in 0..10 {
            assert!(!cursor.has_more().unwrap());
        }
    }

    #[test]
    fn last_staged_record_survives_child_exhaustion() {
        // Both children run dry while staging the final record; it must
        // still be returned exactly once.
        let mut cursor = DisjunctionCursor::new(vec![child(&[1]), child(&[1, 2])]).unwrap();
        assert_eq!(drain(&mut cursor), vec![1, 2]);
    }

    #[test]
    fn close_twice_is_safe_then_methods_fail() {
        let mut cursor = DisjunctionCursor::new(vec![child(&[1, 2]), child(&[3])]).unwrap();
        assert_eq!(cursor.next().unwrap().id, EntryId(1));
        cursor.close().unwrap();
        cursor.close().unwrap();
        assert_eq!(cursor.has_more().unwrap_err().kind, ErrorKind::CursorClosed);
        assert_eq!(cursor.next().unwrap_err().kind, ErrorKind::CursorClosed);
    }
}
