use std::error::Error;
use std::future::Future;

/// An immutable numbered entry together with the unix timestamp it was sealed at.
///
/// Numbers are contiguous starting at 1. Timestamps are non-decreasing in the
/// number but may repeat and are not evenly spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Record {
    pub number: u64,
    pub timestamp: i64,
}

impl Record {
    pub fn new(number: u64, timestamp: i64) -> Self {
        Record { number, timestamp }
    }
}

/// Capability to fetch records from wherever the timeline lives.
///
/// Implementations are expected to be expensive (one network round trip per
/// call). Retries and timeouts belong here, not in the locator.
pub trait RecordSource {
    type Error: Error + Send + Sync + 'static;

    /// Fetches the record with the given number.
    fn fetch_by_number(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Record, Self::Error>> + Send;

    /// Fetches the most recent record.
    fn fetch_head(&self) -> impl Future<Output = Result<Record, Self::Error>> + Send;
}

impl<T> RecordSource for &T
where
    T: RecordSource + Sync,
{
    type Error = T::Error;

    fn fetch_by_number(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Record, Self::Error>> + Send {
        (**self).fetch_by_number(number)
    }

    fn fetch_head(&self) -> impl Future<Output = Result<Record, Self::Error>> + Send {
        (**self).fetch_head()
    }
}
