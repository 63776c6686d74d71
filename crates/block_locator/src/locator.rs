use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::LocatorError;
use crate::record::{Record, RecordSource};

/// Default ceiling on candidate probes in a single resolution.
pub const DEFAULT_MAX_PROBES: usize = 64;

/// Which record to pick relative to the target timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// First record with `timestamp >= target` whose predecessor is strictly before it.
    #[default]
    After,
    /// Last record with `timestamp < target`.
    Before,
    /// Whichever of the two above is closer in time; ties go to [`TieBreak::After`].
    Nearest,
}

impl TieBreak {
    fn select(self, target: i64, floor: Record, ceiling: Record) -> u64 {
        match self {
            TieBreak::After => ceiling.number,
            TieBreak::Before => floor.number,
            TieBreak::Nearest => {
                if target - floor.timestamp < ceiling.timestamp - target {
                    floor.number
                } else {
                    ceiling.number
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocatorConfig {
    /// Resolutions probing more candidates than this fail with
    /// [`LocatorError::Exhausted`].
    pub max_probes: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        LocatorConfig {
            max_probes: DEFAULT_MAX_PROBES,
        }
    }
}

/// The known valid range plus the mean spacing across it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundaries {
    pub first: Record,
    pub last: Record,
    /// Mean seconds per number between `first` and `last`. Only a seed for the
    /// first estimate.
    pub average_interval: f64,
}

impl Boundaries {
    fn new(first: Record, last: Record) -> Self {
        let average_interval = if last.number > first.number {
            (last.timestamp - first.timestamp) as f64 / (last.number - first.number) as f64
        } else {
            0.0
        };
        Boundaries {
            first,
            last,
            average_interval,
        }
    }

    /// Linear extrapolation from the first record, clamped to the known range.
    fn seed(&self, target: i64) -> u64 {
        let interval = usable_interval(self.average_interval);
        let estimate = ((target - self.first.timestamp) as f64 / interval).round();
        estimate.clamp(1.0, self.last.number as f64) as u64
    }
}

/// Outcome of a single resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub number: u64,
    /// Number of candidates evaluated. Neighbor lookups are not counted.
    pub probes: usize,
}

/// Resolves timestamps to record numbers with as few fetches as possible.
///
/// Owns the boundary state and a record cache that lives as long as the
/// locator, so a given number is fetched at most once. A locator is meant to
/// be driven from one task; give each concurrent caller its own instance.
pub struct BlockLocator<S> {
    source: S,
    config: LocatorConfig,
    boundaries: Option<Boundaries>,
    cache: HashMap<u64, Record>,
}

impl<S: RecordSource> BlockLocator<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, LocatorConfig::default())
    }

    pub fn with_config(source: S, config: LocatorConfig) -> Self {
        BlockLocator {
            source,
            config,
            boundaries: None,
            cache: HashMap::new(),
        }
    }

    /// Boundaries as of the last call to [`Self::ensure_boundaries`], if any.
    pub fn boundaries(&self) -> Option<Boundaries> {
        self.boundaries
    }

    /// Seeds the cache with records known from elsewhere (e.g. a previous run).
    ///
    /// Entries already cached are left untouched.
    pub fn preload<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        for record in records {
            self.cache.entry(record.number).or_insert(record);
        }
    }

    /// Every record seen so far, in number order.
    pub fn cached_records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.cache.values().copied().collect();
        records.sort_by_key(|r| r.number);
        records
    }

    /// Fetches the head and the first record unless they are already known.
    ///
    /// `refresh` forces the head to be fetched again, since it may have advanced.
    pub async fn ensure_boundaries(&mut self, refresh: bool) -> Result<Boundaries, LocatorError> {
        if let Some(boundaries) = self.boundaries
            && !refresh
        {
            return Ok(boundaries);
        }

        let last = self
            .source
            .fetch_head()
            .await
            .map_err(|e| LocatorError::BoundaryUnavailable(Box::new(e)))?;
        self.cache.insert(last.number, last);

        let first = match self.cache.get(&1) {
            Some(record) => *record,
            None => {
                let record = self
                    .source
                    .fetch_by_number(1)
                    .await
                    .map_err(|e| LocatorError::BoundaryUnavailable(Box::new(e)))?;
                self.cache.insert(1, record);
                record
            }
        };

        let boundaries = Boundaries::new(first, last);
        info!(
            head = last.number,
            head_timestamp = last.timestamp,
            average_interval = boundaries.average_interval,
            "Boundaries established"
        );
        self.boundaries = Some(boundaries);
        Ok(boundaries)
    }

    /// Returns record `number`, fetching it only if it has not been seen before.
    pub async fn record(&mut self, number: u64) -> Result<Record, LocatorError> {
        if let Some(record) = self.cache.get(&number) {
            return Ok(*record);
        }
        let record = self
            .source
            .fetch_by_number(number)
            .await
            .map_err(|e| LocatorError::FetchFailed {
                number,
                source: Box::new(e),
            })?;
        self.cache.insert(number, record);
        Ok(record)
    }

    /// Resolves `target` to a record number according to `tie_break`.
    pub async fn resolve(&mut self, target: i64, tie_break: TieBreak) -> Result<u64, LocatorError> {
        self.locate(target, tie_break).await.map(|r| r.number)
    }

    /// Like [`Self::resolve`], also reporting how many candidates were probed.
    pub async fn locate(
        &mut self,
        target: i64,
        tie_break: TieBreak,
    ) -> Result<Resolution, LocatorError> {
        let bounds = self.ensure_boundaries(false).await?;
        let Boundaries { first, last, .. } = bounds;

        if target <= first.timestamp {
            return Ok(Resolution {
                number: first.number,
                probes: 0,
            });
        }
        if target >= last.timestamp {
            return Ok(Resolution {
                number: last.number,
                probes: 0,
            });
        }

        let mut bracket = Bracket::new(target, first, last);
        let mut visited: HashSet<u64> = HashSet::new();
        // Both boundaries are already known; start strictly between them.
        let mut candidate = bounds
            .seed(target)
            .clamp(first.number + 1, last.number.saturating_sub(1).max(first.number + 1));
        let mut previous: Option<Record> = None;
        let mut local_interval = bounds.average_interval;
        let mut run = SideRun::default();

        loop {
            if let Some((floor, ceiling)) = bracket.settled() {
                let number = tie_break.select(target, floor, ceiling);
                debug!(target_ts = target, number, probes = visited.len(), "Resolved");
                return Ok(Resolution {
                    number,
                    probes: visited.len(),
                });
            }

            if visited.len() >= self.config.max_probes {
                warn!(target_ts = target, probes = visited.len(), "Probe budget exhausted");
                return Err(LocatorError::Exhausted {
                    target,
                    probes: visited.len(),
                });
            }

            visited.insert(candidate);
            let probe = self.record(candidate).await?;
            let at_or_after = probe.timestamp >= target;
            debug!(
                target_ts = target,
                number = probe.number,
                timestamp = probe.timestamp,
                "Probe"
            );
            bracket.observe(probe);

            // The neighbor on the far side of the target decides the predicate.
            let neighbor = if at_or_after {
                probe.number.checked_sub(1)
            } else {
                probe.number.checked_add(1)
            };
            if let Some(number) = neighbor
                && bracket.contains(number)
            {
                let neighbor = self.record(number).await?;
                bracket.observe(neighbor);
            }
            if bracket.settled().is_some() {
                continue;
            }

            if let Some(prev) = previous
                && prev.number != probe.number
            {
                let dt = (probe.timestamp - prev.timestamp) as f64;
                let dn = probe.number as f64 - prev.number as f64;
                local_interval = (dt / dn).abs();
            }
            let interval = usable_interval(local_interval);

            let delta = target - probe.timestamp;
            let mut step = (delta as f64 / interval).ceil() as i64;
            if step == 0 {
                step = if delta < 0 { -1 } else { 1 };
            }
            if run.push(at_or_after) {
                // Creeping up on one side; overshoot to get a tight bracket.
                step = step.saturating_mul(2);
                run = SideRun::default();
            }

            let proposed = probe
                .number
                .saturating_add_signed(step)
                .clamp(1, last.number);
            let unvisited = next_unvisited(proposed, step.signum(), &visited, last.number)
                .ok_or(LocatorError::Exhausted {
                    target,
                    probes: visited.len(),
                })?;

            previous = Some(probe);
            candidate = bracket.confine(unvisited);
        }
    }

    /// Resolves each target in order.
    pub async fn resolve_all(
        &mut self,
        targets: &[i64],
        tie_break: TieBreak,
    ) -> Result<Vec<u64>, LocatorError> {
        self.ensure_boundaries(false).await?;
        let mut numbers = Vec::with_capacity(targets.len());
        for &target in targets {
            numbers.push(self.resolve(target, tie_break).await?);
        }
        Ok(numbers)
    }

    /// Resolves an RFC 3339 date (e.g. `2022-11-01T00:00:00+07:00`) to the first
    /// record at or after it.
    pub async fn resolve_date(&mut self, date: &str) -> Result<u64, LocatorError> {
        let parsed =
            DateTime::parse_from_rfc3339(date).map_err(|source| LocatorError::InvalidDate {
                input: date.to_string(),
                source,
            })?;
        self.resolve(parsed.timestamp(), TieBreak::After).await
    }

    /// Returns the time record `number` was sealed at.
    pub async fn block_date(&mut self, number: u64) -> Result<DateTime<Utc>, LocatorError> {
        let record = self.record(number).await?;
        DateTime::from_timestamp(record.timestamp, 0).ok_or(LocatorError::TimestampOutOfRange {
            number,
            timestamp: record.timestamp,
        })
    }
}

fn usable_interval(interval: f64) -> f64 {
    if interval.is_finite() && interval > 0.0 {
        interval
    } else {
        1.0
    }
}

/// Walks from `start` in `direction` (then the other way) to the nearest
/// number in `[1, max]` that has not been probed yet.
fn next_unvisited(start: u64, direction: i64, visited: &HashSet<u64>, max: u64) -> Option<u64> {
    let direction = if direction < 0 { -1 } else { 1 };
    for dir in [direction, -direction] {
        let mut n = start;
        loop {
            if !visited.contains(&n) {
                return Some(n);
            }
            match n.checked_add_signed(dir) {
                Some(next) if (1..=max).contains(&next) => n = next,
                _ => break,
            }
        }
    }
    None
}

/// Tracks the tightest known pair `low < high` with `low.timestamp < target`
/// and `high.timestamp >= target`. At least one crossing always lies in
/// `(low, high]`, even for non-monotonic timestamps.
#[derive(Debug, Clone, Copy)]
struct Bracket {
    target: i64,
    low: Record,
    high: Record,
}

impl Bracket {
    fn new(target: i64, low: Record, high: Record) -> Self {
        debug_assert!(low.timestamp < target && high.timestamp >= target);
        Bracket { target, low, high }
    }

    fn contains(&self, number: u64) -> bool {
        number > self.low.number && number < self.high.number
    }

    fn observe(&mut self, record: Record) {
        if !self.contains(record.number) {
            return;
        }
        if record.timestamp < self.target {
            self.low = record;
        } else {
            self.high = record;
        }
    }

    fn settled(&self) -> Option<(Record, Record)> {
        (self.high.number == self.low.number + 1).then_some((self.low, self.high))
    }

    /// Keeps `proposed` if it lies strictly inside the bracket, otherwise bisects.
    fn confine(&self, proposed: u64) -> u64 {
        if self.contains(proposed) {
            proposed
        } else {
            self.low.number + (self.high.number - self.low.number) / 2
        }
    }
}

/// Counts consecutive probes landing on the same side of the target.
#[derive(Debug, Default)]
struct SideRun {
    side: Option<bool>,
    len: u32,
}

impl SideRun {
    /// Records a probe; returns true once two in a row fell on the same side.
    fn push(&mut self, at_or_after: bool) -> bool {
        if self.side == Some(at_or_after) {
            self.len += 1;
        } else {
            self.side = Some(at_or_after);
            self.len = 1;
        }
        self.len >= 2
    }
}
