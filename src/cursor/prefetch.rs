use std::collections::HashSet;
use crate::core::error::Result;
use crate::core::types::{EntryId, IndexRecord};
use crate::cursor::{cursor_closed, cursor_exhausted, Assertion, Cursor};

/// Conjunction cursor: drives one underlying cursor (typically the cheapest
/// operand of an AND, chosen by the optimizer) and filters it through an
/// assertion covering the remaining operands.
///
/// With dedupe enabled, ids already emitted are skipped; range and substring
/// scans need this because one id may appear under several keys.
pub struct PrefetchCursor {
    underlying: Box<dyn Cursor>,
    assertion: Box<dyn Assertion>,
    dedupe: bool,
    seen: HashSet<EntryId>,
    staged: Option<IndexRecord>,
    closed: bool,
}

impl PrefetchCursor {
    pub fn new(
        underlying: Box<dyn Cursor>,
        assertion: Box<dyn Assertion>,
        dedupe: bool,
    ) -> Result<Self> {
        let mut cursor = PrefetchCursor {
            underlying,
            assertion,
            dedupe,
            seen: HashSet::new(),
            staged: None,
            closed: false,
        };
        cursor.stage()?;
        Ok(cursor)
    }

    /// Pull from the underlying cursor until a candidate passes the
    /// assertion; exhaustion of the underlying cursor leaves staged empty.
    fn stage(&mut self) -> Result<()> {
        while self.underlying.has_more()? {
            let record = self.underlying.next()?;
            if self.dedupe && self.seen.contains(&record.id) {
                continue;
            }
            if self.assertion.test(&record)? {
                if self.dedupe {
                    self.seen.insert(record.id);
                }
                self.staged = Some(record);
                return Ok(());
            }
        }
        self.staged = None;
        Ok(())
    }
}

impl Cursor for PrefetchCursor {
    fn has_more(&self) -> Result<bool> {
        if self.closed {
            return Err(cursor_closed("PrefetchCursor"));
        }
        Ok(self.staged.is_some())
    }

    fn next(&mut self) -> Result<IndexRecord> {
        if self.closed {
            return Err(cursor_closed("PrefetchCursor"));
        }
        let record = self
            .staged
            .take()
            .ok_or_else(|| cursor_exhausted("PrefetchCursor"))?;
        self.stage()?;
        Ok(record)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.underlying.close()?;
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
    use crate::core::types::IndexKey;
    use crate::cursor::{AcceptAll, IndexCursor};

    fn source(ids: &[u64]) -> Box<dyn Cursor> {
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

    fn even_only() -> Box<dyn Assertion> {
        Box::new(|record: &IndexRecord| Ok(record.id.value() % 2 == 0))
    }

    #[test]
    fn output_is_the_asserted_subsequence_in_order() {
        let mut cursor =
            PrefetchCursor::new(source(&[1, 2, 3, 4, 5, 6]), even_only(), false).unwrap();
        assert_eq!(drain(&mut cursor), vec![2, 4, 6]);
    }

    #[test]
    fn rejecting_assertion_yields_exhausted_cursor() {
        let reject: Box<dyn Assertion> = Box::new(|_: &IndexRecord| Ok(false));
        let cursor = PrefetchCursor::new(source(&[1, 2, 3]), reject, false).unwrap();
        assert!(!cursor.has_more().unwrap());
    }

    #[test]
    fn dedupe_skips_repeated_ids() {
        // A range scan can surface the same id under several keys.
        let records = vec![
            IndexRecord::new("a".to_string(), EntryId(1)),
            IndexRecord::new("b".to_string(), EntryId(1)),
            IndexRecord::new("b".to_string(), EntryId(2)),
            IndexRecord::new("c".to_string(), EntryId(2)),
        ];
        let underlying = Box::new(IndexCursor::new(records));
        let mut cursor = PrefetchCursor::new(underlying, Box::new(AcceptAll), true).unwrap();
        assert_eq!(drain(&mut cursor), vec![1, 2]);
    }

    #[test]
    fn without_dedupe_repeats_pass_through() {
        let records = vec![
            IndexRecord::new("a".to_string(), EntryId(1)),
            IndexRecord::new("b".to_string(), EntryId(1)),
        ];
        let underlying = Box::new(IndexCursor::new(records));
        let mut cursor = PrefetchCursor::new(underlying, Box::new(AcceptAll), false).unwrap();
        assert_eq!(drain(&mut cursor), vec![1, 1]);
    }

    #[test]
    fn records_keep_their_keys() {
        let records = vec![IndexRecord::new("alice".to_string(), EntryId(4))];
        let underlying = Box::new(IndexCursor::new(records));
        let mut cursor = PrefetchCursor::new(underlying, Box::new(AcceptAll), false).unwrap();
        let record = cursor.next().unwrap();
        assert_eq!(record.key, IndexKey::Text("alice".to_string()));
    }

    #[test]
    fn has_more_is_pure() {
        let mut cursor = PrefetchCursor::new(source(&[2, 4]), even_only(), false).unwrap();
        for _ in 0..10 {
            assert!(cursor.has_more().unwrap());
        }
        assert_eq!(drain(&mut cursor), vec![2, 4]);
    }

    #[test]
    fn close_twice_is_safe_then_methods_fail() {
        let mut cursor = PrefetchCursor::new(source(&[2, 4]), even_only(), false).unwrap();
        cursor.close().unwrap();
        cursor.close().unwrap();
        assert_eq!(cursor.has_more().unwrap_err().kind, ErrorKind::CursorClosed);
        assert_eq!(cursor.next().unwrap_err().kind, ErrorKind::CursorClosed);
    }
}
