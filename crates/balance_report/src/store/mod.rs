//! Persistence for block records between runs.
//!
//! Records never change once sealed, so anything the locator fetched can be
//! replayed into the next run's cache. The file backend appends one JSON
//! object per line: `{ "number": u64, "timestamp": i64 }`. When a number
//! appears more than once the last line wins.
use std::io;

use block_locator::Record;

pub trait RecordStore {
    fn put_many(&self, records: &[Record]) -> io::Result<()>;
    fn tip(&self) -> io::Result<Option<u64>>;
    fn all(&self) -> io::Result<Vec<Record>>;
}

pub mod file;
