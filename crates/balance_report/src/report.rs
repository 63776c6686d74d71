use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;

use alloy_primitives::{Address, U256};
use block_locator::{BlockLocator, LocatorError, Record, RecordSource, SourceError, TieBreak};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use thiserror::Error;
use tracing::{debug, info};

/// One calendar day in seconds.
pub const DAY_SECS: i64 = 86_400;

/// Capability to look up an account balance as of a given block.
pub trait BalanceSource {
    type Error: StdError + Send + Sync + 'static;

    fn balance_at(
        &self,
        address: Address,
        block: u64,
    ) -> impl Future<Output = Result<U256, Self::Error>> + Send;
}

impl<T> BalanceSource for &T
where
    T: BalanceSource + Sync,
{
    type Error = T::Error;

    fn balance_at(
        &self,
        address: Address,
        block: u64,
    ) -> impl Future<Output = Result<U256, Self::Error>> + Send {
        (**self).balance_at(address, block)
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("schedule start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },
    #[error("schedule step must be positive, got {0}")]
    InvalidStep(i64),
    #[error("date {0} cannot be turned into a timestamp")]
    DateOutOfRange(NaiveDate),
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error("failed to fetch balance of {address} at block {block}: {source}")]
    FetchFailed {
        address: Address,
        block: u64,
        #[source]
        source: SourceError,
    },
    #[error("block {block} has unrepresentable timestamp {timestamp}")]
    InvalidTimestamp { block: u64, timestamp: i64 },
}

/// Signed difference between two balances, kept at full width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceDelta {
    negative: bool,
    magnitude: U256,
}

impl BalanceDelta {
    pub fn between(previous: U256, current: U256) -> Self {
        if current >= previous {
            BalanceDelta {
                negative: false,
                magnitude: current - previous,
            }
        } else {
            BalanceDelta {
                negative: true,
                magnitude: previous - current,
            }
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> U256 {
        self.magnitude
    }
}

impl fmt::Display for BalanceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

/// One line of the report: an address's balance at a resolved block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    /// Calendar date of the block's own timestamp.
    pub date: NaiveDate,
    pub timestamp: i64,
    pub block: u64,
    pub address: Address,
    pub change: BalanceDelta,
    pub balance: U256,
}

#[derive(Debug, Clone, Copy)]
pub struct ReportConfig {
    /// Spacing between schedule entries.
    pub step_secs: i64,
    pub tie_break: TieBreak,
    /// Offset used to turn block timestamps into calendar dates.
    pub utc_offset: FixedOffset,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            step_secs: DAY_SECS,
            tie_break: TieBreak::After,
            utc_offset: Utc.fix(),
        }
    }
}

/// `start, start + step, ...` up to and including `end`.
pub fn build_schedule(start: i64, end: i64, step: i64) -> Result<Vec<i64>, ReportError> {
    if start > end {
        return Err(ReportError::InvalidRange { start, end });
    }
    if step <= 0 {
        return Err(ReportError::InvalidStep(step));
    }

    let mut schedule = Vec::new();
    let mut t = start;
    while t <= end {
        schedule.push(t);
        t = match t.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(schedule)
}

/// Unix timestamp of local midnight at the start of `date`.
pub fn day_start(date: NaiveDate, offset: FixedOffset) -> Option<i64> {
    date.and_hms_opt(0, 0, 0)?
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.timestamp())
}

/// Timestamps bounding a report of the days `first..=last`.
///
/// The window opens at midnight of the day before `first`, whose entry seeds
/// the opening balances, and closes at midnight of `last`.
pub fn report_window(
    first: NaiveDate,
    last: NaiveDate,
    offset: FixedOffset,
) -> Result<(i64, i64), ReportError> {
    let midnight =
        |date: NaiveDate| day_start(date, offset).ok_or(ReportError::DateOutOfRange(date));
    let start = midnight(first)?;
    let end = midnight(last)?;
    if start > end {
        return Err(ReportError::InvalidRange { start, end });
    }
    let opening = first.pred_opt().ok_or(ReportError::DateOutOfRange(first))?;
    Ok((midnight(opening)?, end))
}

fn calendar_date(record: Record, offset: FixedOffset) -> Result<NaiveDate, ReportError> {
    DateTime::from_timestamp(record.timestamp, 0)
        .map(|dt| dt.with_timezone(&offset).date_naive())
        .ok_or(ReportError::InvalidTimestamp {
            block: record.number,
            timestamp: record.timestamp,
        })
}

/// Walks a schedule of timestamps, resolves each to a block and reports how
/// every address's balance moved between consecutive entries.
///
/// Balances are memoized per `(address, block)` for the reporter's lifetime.
pub struct TimelineReporter<R, B> {
    locator: BlockLocator<R>,
    balances: B,
    config: ReportConfig,
    balance_cache: HashMap<(Address, u64), U256>,
}

impl<R: RecordSource, B: BalanceSource> TimelineReporter<R, B> {
    pub fn new(locator: BlockLocator<R>, balances: B) -> Self {
        Self::with_config(locator, balances, ReportConfig::default())
    }

    pub fn with_config(locator: BlockLocator<R>, balances: B, config: ReportConfig) -> Self {
        TimelineReporter {
            locator,
            balances,
            config,
            balance_cache: HashMap::new(),
        }
    }

    pub fn locator(&self) -> &BlockLocator<R> {
        &self.locator
    }

    /// One resolution per schedule entry, in schedule order.
    pub async fn resolve_blocks(&mut self, schedule: &[i64]) -> Result<Vec<u64>, ReportError> {
        Ok(self
            .locator
            .resolve_all(schedule, self.config.tie_break)
            .await?)
    }

    async fn balance(&mut self, address: Address, block: u64) -> Result<U256, ReportError> {
        if let Some(balance) = self.balance_cache.get(&(address, block)) {
            return Ok(*balance);
        }
        let balance = self
            .balances
            .balance_at(address, block)
            .await
            .map_err(|e| ReportError::FetchFailed {
                address,
                block,
                source: Box::new(e),
            })?;
        self.balance_cache.insert((address, block), balance);
        Ok(balance)
    }

    /// Builds the report for `[start, end]`.
    ///
    /// The first schedule entry only seeds each address's opening balance; rows
    /// start at the second entry and are ordered by entry, then by `addresses`.
    /// Any failure aborts the whole report.
    pub async fn generate_report(
        &mut self,
        start: i64,
        end: i64,
        addresses: &[Address],
    ) -> Result<Vec<ReportRow>, ReportError> {
        let schedule = build_schedule(start, end, self.config.step_secs)?;
        info!(
            entries = schedule.len(),
            addresses = addresses.len(),
            "Schedule built"
        );

        let blocks = self.resolve_blocks(&schedule).await?;
        debug!(?blocks, "Schedule resolved");
        let Some((&opening, rest)) = blocks.split_first() else {
            return Ok(Vec::new());
        };
        if rest.is_empty() {
            info!("Single-entry schedule, nothing to report");
            return Ok(Vec::new());
        }

        let mut previous = Vec::with_capacity(addresses.len());
        for &address in addresses {
            previous.push(self.balance(address, opening).await?);
        }

        let mut rows = Vec::with_capacity(rest.len() * addresses.len());
        for &block in rest {
            let record = self.locator.record(block).await?;
            let date = calendar_date(record, self.config.utc_offset)?;
            for (&address, prev) in addresses.iter().zip(previous.iter_mut()) {
                let balance = self.balance(address, block).await?;
                rows.push(ReportRow {
                    date,
                    timestamp: record.timestamp,
                    block,
                    address,
                    change: BalanceDelta::between(*prev, balance),
                    balance,
                });
                *prev = balance;
            }
            debug!(block, %date, "Entry reported");
        }

        info!(rows = rows.len(), "Report generated");
        Ok(rows)
    }
}
