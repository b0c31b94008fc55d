pub mod disjunction;
pub mod index_cursor;
pub mod prefetch;

pub use disjunction::DisjunctionCursor;
pub use index_cursor::IndexCursor;
pub use prefetch::PrefetchCursor;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::IndexRecord;

/// An ordered, duplicate-free candidate stream. Implementations stage the
/// next record before it is requested (one-ahead prefetch), so has_more()
/// never advances the underlying source and close() mid-iteration is safe.
///
/// Exhaustion is not an error: has_more() returns false and next() then
/// fails with InvalidState. After close(), has_more() and next() fail with
/// CursorClosed; close() itself is idempotent.
pub trait Cursor: Send {
    fn has_more(&self) -> Result<bool>;
    fn next(&mut self) -> Result<IndexRecord>;
    fn close(&mut self) -> Result<()>;
}

/// A predicate over a candidate record, used where an index scan cannot
/// fully resolve a filter (substring verification, conjunction residues,
/// negation).
pub trait Assertion: Send {
    fn test(&self, record: &IndexRecord) -> Result<bool>;
}

impl<F> Assertion for F
where
    F: Fn(&IndexRecord) -> Result<bool> + Send,
{
    fn test(&self, record: &IndexRecord) -> Result<bool> {
        self(record)
    }
}

/// Assertion accepting every candidate; used when a range scan only needs
/// the prefetch wrapper for id dedupe.
pub struct AcceptAll;

impl Assertion for AcceptAll {
    fn test(&self, _record: &IndexRecord) -> Result<bool> {
        Ok(true)
    }
}

pub(crate) fn cursor_closed(cursor: &str) -> Error {
    Error::new(
        ErrorKind::CursorClosed,
        format!("{} has been closed", cursor),
    )
}

pub(crate) fn cursor_exhausted(cursor: &str) -> Error {
    Error::new(
        ErrorKind::InvalidState,
        format!("{} is exhausted, check has_more() before next()", cursor),
    )
}
