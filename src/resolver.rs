use crate::error;
use crate::gateway;
use crate::time_index;

use chrono::Datelike;

/// Where a probed round falls relative to the target month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOrdering {
    Before,
    Within,
    After,
    /// The round has no resolvable effective time.
    Unknown,
}

/// How a probe with no resolvable time moves the search.
///
/// Both choices are heuristics for sparse data: an unresolved probe can hide a
/// genuine first (or last) round of the month on the side the search abandons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownProbePolicy {
    /// Treat the probe as earlier than the target: search the right half.
    #[default]
    AdvanceRight,
    /// Treat the probe as later than the target: search the left half.
    AdvanceLeft,
}

impl std::str::FromStr for UnknownProbePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advance-right" => Ok(Self::AdvanceRight),
            "advance-left" => Ok(Self::AdvanceLeft),
            other => Err(format!("Unknown probe policy '{}'", other)),
        }
    }
}

/// A validated (year, month) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetMonth {
    year: i32,
    month: u32,
}

impl TargetMonth {
    pub fn new(year: i32, month: u32) -> error::Result<Self> {
        if chrono::NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(error::ScanError::InvalidMonth { year, month });
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Orders an effective time against this month.
    pub fn compare(&self, time: Option<chrono::DateTime<chrono::Utc>>) -> PeriodOrdering {
        match time {
            None => PeriodOrdering::Unknown,
            Some(t) => match (t.year(), t.month()).cmp(&(self.year, self.month)) {
                std::cmp::Ordering::Less => PeriodOrdering::Before,
                std::cmp::Ordering::Equal => PeriodOrdering::Within,
                std::cmp::Ordering::Greater => PeriodOrdering::After,
            },
        }
    }

    /// Number of days in the month.
    pub fn days(&self) -> u32 {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        chrono::NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|next| next.pred_opt())
            .map(|last| last.day())
            .unwrap_or(28)
    }

    /// `YYYY-MM-01T00:00:00.000000Z`
    pub fn start_text(&self) -> String {
        format!("{:04}-{:02}-01T00:00:00.000000Z", self.year, self.month)
    }

    /// Last second of the month, `YYYY-MM-DDT23:59:59.000000Z`.
    pub fn last_second_text(&self) -> String {
        format!("{:04}-{:02}-{:02}T23:59:59.000000Z", self.year, self.month, self.days())
    }
}

impl std::fmt::Display for TargetMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// First and last round whose effective time falls in a target month.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MonthBoundary {
    pub start_round: u64,
    pub start_time: Option<String>,
    pub end_round: u64,
    pub end_time: Option<String>,
}

/// Smallest round in `[lo, hi]` probing as `Within`, or `None` if no probe did.
pub fn search_first<F>(lo: u64, hi: u64, policy: UnknownProbePolicy, mut probe: F) -> error::Result<Option<u64>>
where
    F: FnMut(u64) -> error::Result<PeriodOrdering>,
{
    let (mut left, mut right) = (lo, hi);
    let mut found = None;
    while left <= right {
        let mid = left + (right - left) / 2;
        let go_left = match probe(mid)? {
            PeriodOrdering::Before => false,
            PeriodOrdering::After => true,
            PeriodOrdering::Within => {
                found = Some(mid);
                true
            }
            PeriodOrdering::Unknown => policy == UnknownProbePolicy::AdvanceLeft,
        };
        if go_left {
            match mid.checked_sub(1) {
                Some(r) => right = r,
                None => break,
            }
        } else {
            match mid.checked_add(1) {
                Some(l) => left = l,
                None => break,
            }
        }
    }
    Ok(found)
}

/// Largest round in `[lo, hi]` probing as `Within`; `seed` if none probes later.
pub fn search_last<F>(
    seed: u64,
    hi: u64,
    policy: UnknownProbePolicy,
    mut probe: F,
) -> error::Result<u64>
where
    F: FnMut(u64) -> error::Result<PeriodOrdering>,
{
    let (mut left, mut right) = (seed, hi);
    let mut found = seed;
    while left <= right {
        let mid = left + (right - left) / 2;
        let go_left = match probe(mid)? {
            PeriodOrdering::Before => false,
            PeriodOrdering::After => true,
            PeriodOrdering::Within => {
                found = mid;
                false
            }
            PeriodOrdering::Unknown => policy == UnknownProbePolicy::AdvanceLeft,
        };
        if go_left {
            match mid.checked_sub(1) {
                Some(r) => right = r,
                None => break,
            }
        } else {
            match mid.checked_add(1) {
                Some(l) => left = l,
                None => break,
            }
        }
    }
    Ok(found)
}

/// Resolves calendar months to round ranges by binary search over the time index.
///
/// Every call to [`resolve`](Self::resolve) owns a fresh time index; nothing is
/// cached between calls.
pub struct MonthRoundResolver<'g, G: gateway::Gateway> {
    gateway: &'g G,
    policy: UnknownProbePolicy,
    window: u64,
    fields: time_index::EffectiveTimeFields,
}

impl<'g, G: gateway::Gateway> MonthRoundResolver<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self {
            gateway,
            policy: UnknownProbePolicy::default(),
            window: time_index::DEFAULT_WINDOW,
            fields: time_index::EffectiveTimeFields::default(),
        }
    }

    pub fn with_policy(mut self, policy: UnknownProbePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    pub fn with_fields(mut self, fields: time_index::EffectiveTimeFields) -> Self {
        self.fields = fields;
        self
    }

    /// A batcher bounded by the latest closed round.
    pub fn batcher(&self) -> error::Result<time_index::TimeIndexBatcher<'g, G>> {
        let latest = self
            .gateway
            .latest_round()?
            .round
            .ok_or(error::ScanError::LatestRoundUnavailable)?;
        Ok(time_index::TimeIndexBatcher::new(self.gateway, latest)
            .with_window(self.window)
            .with_fields(self.fields.clone()))
    }

    /// Finds the first and last round of `month`.
    ///
    /// # Returns
    /// * `Ok(Some(MonthBoundary))` - At least one probe landed in the month.
    /// * `Ok(None)` - No round in the month was found (future month, before genesis, or hidden by gaps).
    /// * `Err(ScanError::LatestRoundUnavailable)` - The Gateway reported no latest round.
    pub fn resolve(&self, month: TargetMonth) -> error::Result<Option<MonthBoundary>> {
        let mut batcher = self.batcher()?;
        self.resolve_with(&mut batcher, month)
    }

    /// Same as [`resolve`](Self::resolve), reusing a caller-owned batcher.
    pub fn resolve_with(
        &self,
        batcher: &mut time_index::TimeIndexBatcher<'g, G>,
        month: TargetMonth,
    ) -> error::Result<Option<MonthBoundary>> {
        log::info!("Finding rounds for {}...", month);
        let latest = batcher.ceiling();

        let first = search_first(0, latest, self.policy, |round| {
            Ok(month.compare(batcher.lookup_time(round)?))
        })?;
        let Some(first) = first else {
            log::warn!("No rounds found for {}", month);
            return Ok(None);
        };
        let last = search_last(first, latest, self.policy, |round| {
            Ok(month.compare(batcher.lookup_time(round)?))
        })?;
        log::debug!("{}: start_round={}, end_round={}", month, first, last);

        Ok(Some(MonthBoundary {
            start_round: first,
            start_time: batcher.lookup(first)?,
            end_round: last,
            end_time: batcher.lookup(last)?,
        }))
    }
}
