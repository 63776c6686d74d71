use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use alloy_primitives::{Address, U256};
use balance_report::report::{
    BalanceSource, DAY_SECS, ReportConfig, ReportError, TimelineReporter,
};
use block_locator::{BlockLocator, Record, RecordSource};
use chrono::{FixedOffset, NaiveDate};

/// 2022-11-01T00:00:00Z
const BASE: i64 = 1_667_260_800;

#[derive(Debug)]
struct Missing(String);

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not available", self.0)
    }
}

impl std::error::Error for Missing {}

/// Evenly spaced blocks starting at `BASE`.
struct EvenChain {
    len: u64,
    spacing: i64,
    fetched: Mutex<Vec<u64>>,
}

impl EvenChain {
    fn new(len: u64, spacing: i64) -> Self {
        EvenChain {
            len,
            spacing,
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, number: u64) -> Record {
        Record::new(number, BASE + self.spacing * (number as i64 - 1))
    }

    fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

impl RecordSource for EvenChain {
    type Error = Missing;

    async fn fetch_by_number(&self, number: u64) -> Result<Record, Missing> {
        if number == 0 || number > self.len {
            return Err(Missing(format!("block {number}")));
        }
        self.fetched.lock().unwrap().push(number);
        Ok(self.record(number))
    }

    async fn fetch_head(&self) -> Result<Record, Missing> {
        Ok(self.record(self.len))
    }
}

/// Fixed balance table; unknown pairs fail.
#[derive(Default)]
struct Ledger {
    balances: HashMap<(Address, u64), U256>,
    fetched: Mutex<Vec<(Address, u64)>>,
}

impl Ledger {
    fn set(&mut self, address: Address, block: u64, wei: u64) {
        self.balances.insert((address, block), U256::from(wei));
    }

    fn fetched(&self) -> Vec<(Address, u64)> {
        self.fetched.lock().unwrap().clone()
    }
}

impl BalanceSource for Ledger {
    type Error = Missing;

    async fn balance_at(&self, address: Address, block: u64) -> Result<U256, Missing> {
        self.fetched.lock().unwrap().push((address, block));
        self.balances
            .get(&(address, block))
            .copied()
            .ok_or_else(|| Missing(format!("balance of {address} at {block}")))
    }
}

fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn reports_daily_changes_after_opening_entry() {
    // Hourly blocks: day k starts at block 24k + 1.
    let chain = EvenChain::new(200, 3600);
    let mut ledger = Ledger::default();
    for (block, a, b) in [(25, 100, 0), (49, 100, 0), (73, 150, 0)] {
        ledger.set(alice(), block, a);
        ledger.set(bob(), block, b);
    }

    let mut reporter = TimelineReporter::new(BlockLocator::new(&chain), &ledger);
    let rows = reporter
        .generate_report(BASE + DAY_SECS, BASE + 3 * DAY_SECS, &[alice(), bob()])
        .await
        .unwrap();

    let summary: Vec<(u64, Address, String, String)> = rows
        .iter()
        .map(|r| (r.block, r.address, r.change.to_string(), r.balance.to_string()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (49, alice(), "0".into(), "100".into()),
            (49, bob(), "0".into(), "0".into()),
            (73, alice(), "50".into(), "150".into()),
            (73, bob(), "0".into(), "0".into()),
        ]
    );
    assert_eq!(rows[0].date, date(2022, 11, 3));
    assert_eq!(rows[0].timestamp, BASE + 2 * DAY_SECS);
    assert_eq!(rows[2].date, date(2022, 11, 4));
}

#[tokio::test]
async fn negative_changes_are_signed() {
    let chain = EvenChain::new(200, 3600);
    let mut ledger = Ledger::default();
    ledger.set(alice(), 1, 1_000);
    ledger.set(alice(), 25, 400);

    let mut reporter = TimelineReporter::new(BlockLocator::new(&chain), &ledger);
    let rows = reporter
        .generate_report(BASE, BASE + DAY_SECS, &[alice()])
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert!(rows[0].change.is_negative());
    assert_eq!(rows[0].change.to_string(), "-600");
    assert_eq!(rows[0].balance, U256::from(400u64));
}

#[tokio::test]
async fn reversed_range_fails_before_any_fetch() {
    let chain = EvenChain::new(200, 3600);
    let ledger = Ledger::default();

    let mut reporter = TimelineReporter::new(BlockLocator::new(&chain), &ledger);
    let err = reporter
        .generate_report(BASE + DAY_SECS, BASE, &[alice()])
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::InvalidRange { .. }));
    assert_eq!(chain.fetch_count(), 0);
    assert!(ledger.fetched().is_empty());
    assert!(reporter.locator().boundaries().is_none());
}

#[tokio::test]
async fn repeated_blocks_get_one_row_per_entry_and_one_fetch() {
    // One block every two days, so consecutive days can share a block.
    let chain = EvenChain::new(20, 2 * DAY_SECS);
    let mut ledger = Ledger::default();
    ledger.set(alice(), 2, 5);
    ledger.set(alice(), 3, 9);

    let mut reporter = TimelineReporter::new(BlockLocator::new(&chain), &ledger);
    let rows = reporter
        .generate_report(BASE + DAY_SECS, BASE + 4 * DAY_SECS, &[alice()])
        .await
        .unwrap();

    // Days 1..=4 resolve to blocks 2, 2, 3, 3.
    let blocks: Vec<u64> = rows.iter().map(|r| r.block).collect();
    assert_eq!(blocks, vec![2, 3, 3]);
    let changes: Vec<String> = rows.iter().map(|r| r.change.to_string()).collect();
    assert_eq!(changes, vec!["0", "4", "0"]);

    let fetched = ledger.fetched();
    let unique: HashSet<(Address, u64)> = fetched.iter().copied().collect();
    assert_eq!(fetched.len(), unique.len());
    assert_eq!(fetched.len(), 2);
}

#[tokio::test]
async fn balance_failure_aborts_report() {
    let chain = EvenChain::new(200, 3600);
    let mut ledger = Ledger::default();
    ledger.set(alice(), 25, 1);
    ledger.set(alice(), 49, 2);
    // Nothing recorded for block 73.

    let mut reporter = TimelineReporter::new(BlockLocator::new(&chain), &ledger);
    let err = reporter
        .generate_report(BASE + DAY_SECS, BASE + 3 * DAY_SECS, &[alice()])
        .await
        .unwrap_err();

    match err {
        ReportError::FetchFailed { address, block, .. } => {
            assert_eq!(address, alice());
            assert_eq!(block, 73);
        }
        other => panic!("expected FetchFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn resolve_blocks_follows_schedule_order() {
    let chain = EvenChain::new(200, 3600);
    let ledger = Ledger::default();

    let mut reporter = TimelineReporter::new(BlockLocator::new(&chain), &ledger);
    let blocks = reporter
        .resolve_blocks(&[BASE + 7_200, BASE + 1, BASE + 7_200, BASE - 10])
        .await
        .unwrap();
    assert_eq!(blocks, vec![3, 2, 3, 1]);
}

#[tokio::test]
async fn row_dates_follow_configured_offset() {
    // Blocks every 4 hours.
    let chain = EvenChain::new(100, 4 * 3600);
    let mut ledger = Ledger::default();
    ledger.set(alice(), 4, 1);
    ledger.set(alice(), 10, 1);

    let config = ReportConfig {
        utc_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
        ..ReportConfig::default()
    };
    let mut reporter = TimelineReporter::with_config(BlockLocator::new(&chain), &ledger, config);
    // Targets 12:00Z on Nov 1 and Nov 2: blocks 4 and 10.
    let rows = reporter
        .generate_report(BASE + 12 * 3600, BASE + DAY_SECS + 12 * 3600, &[alice()])
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].block, 10);
    // 2022-11-02T12:00Z is 19:00 in UTC+7, still Nov 2.
    assert_eq!(rows[0].date, date(2022, 11, 2));
}

#[tokio::test]
async fn single_entry_schedule_fetches_no_balances() {
    let chain = EvenChain::new(200, 3600);
    let ledger = Ledger::default();

    let mut reporter = TimelineReporter::new(BlockLocator::new(&chain), &ledger);
    let rows = reporter
        .generate_report(BASE + DAY_SECS, BASE + DAY_SECS, &[alice(), bob()])
        .await
        .unwrap();

    assert!(rows.is_empty());
    assert!(ledger.fetched().is_empty());
}
