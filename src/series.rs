use crate::csv_output;
use crate::error;
use crate::gateway;
use crate::progress;
use crate::resolver;
use crate::time_index;

/// Scalar observed for a party at a closed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMetric {
    /// `wallet_balance` from the wallet-balance endpoint.
    WalletBalance,
    /// `total_coin_holdings` from the holdings summary, computed as of the round.
    HoldingsTotal { migration_id: u64 },
}

impl SeriesMetric {
    /// Column header used for the value in CSV output.
    pub fn column(&self) -> &'static str {
        match self {
            SeriesMetric::WalletBalance => "wallet_balance",
            SeriesMetric::HoldingsTotal { .. } => "total_coin_holdings",
        }
    }

    fn sample<G: gateway::Gateway>(
        &self,
        gateway: &G,
        party_id: &str,
        round: u64,
    ) -> error::Result<Option<String>> {
        match self {
            SeriesMetric::WalletBalance => Ok(gateway.wallet_balance(party_id, round)?.wallet_balance),
            SeriesMetric::HoldingsTotal { migration_id } => {
                let request = gateway::HoldingsSummaryRequest {
                    migration_id: *migration_id,
                    record_time: None,
                    owner_party_ids: Some(vec![party_id.to_string()]),
                    as_of_round: Some(round),
                };
                Ok(gateway.holdings_summary(&request)?.total_for(party_id))
            }
        }
    }
}

/// A single observation for one party at one round.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BalanceSample {
    pub round: u64,
    pub effective_time: Option<String>,
    pub value: Option<String>,
}

/// Balances of one party at the first and last round of a month.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MonthEndpoints {
    pub party_id: String,
    pub beginning_of_month_round: u64,
    pub beginning_of_month_time: Option<String>,
    pub beginning_of_month_balance: Option<String>,
    pub end_of_month_round: u64,
    pub end_of_month_time: Option<String>,
    pub end_of_month_balance: Option<String>,
}

pub const MONTH_ENDPOINT_COLUMNS: [&str; 7] = [
    "party_id",
    "beginning_of_month_round",
    "beginning_of_month_time",
    "beginning_of_month_balance",
    "end_of_month_round",
    "end_of_month_time",
    "end_of_month_balance",
];

/// Wallet balance of a party at the latest closed round.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LatestBalance {
    pub party_id: String,
    pub round: u64,
    pub effective_at: Option<String>,
    pub wallet_balance: Option<String>,
}

/// Prefix of a party id before the `::` namespace separator, used in file names.
pub fn party_short(party_id: &str) -> &str {
    party_id.split("::").next().unwrap_or(party_id)
}

/// Number of rounds `first, first + step, ...` up to `last`, saturating at `u64::MAX`.
fn sample_count(first: u64, last: u64, step: u64) -> u64 {
    (last.saturating_sub(first) / step.max(1)).saturating_add(1)
}

/// Builds per-round series of a [`SeriesMetric`].
///
/// Balance queries are issued one at a time, in round order; only effective
/// times are fetched in windows.
pub struct RangeSeriesBuilder<'g, G: gateway::Gateway> {
    gateway: &'g G,
    metric: SeriesMetric,
    window: u64,
    fields: time_index::EffectiveTimeFields,
}

impl<'g, G: gateway::Gateway> RangeSeriesBuilder<'g, G> {
    pub fn new(gateway: &'g G, metric: SeriesMetric) -> Self {
        Self {
            gateway,
            metric,
            window: time_index::DEFAULT_WINDOW,
            fields: time_index::EffectiveTimeFields::default(),
        }
    }

    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    pub fn with_fields(mut self, fields: time_index::EffectiveTimeFields) -> Self {
        self.fields = fields;
        self
    }

    /// Samples `party_id` at `first, first + step, ...` up to and including `last`
    /// when the stride lands on it.
    ///
    /// # Arguments
    /// * `party_id` - Party to query.
    /// * `first` - First round (inclusive).
    /// * `last` - Last round (inclusive).
    /// * `step` - Stride between sampled rounds, at least 1.
    ///
    /// # Returns
    /// * `error::Result<Vec<BalanceSample>>` - One sample per visited round.
    ///
    /// # Errors
    /// * `InvalidStep` / `InvalidRange` for bad arguments.
    /// * Any Gateway failure, unchanged.
    pub fn build(&self, party_id: &str, first: u64, last: u64, step: u64) -> error::Result<Vec<BalanceSample>> {
        if step == 0 {
            return Err(error::ScanError::InvalidStep(step));
        }
        if first > last {
            return Err(error::ScanError::InvalidRange { first, last });
        }
        log::info!(
            "Fetching {} for party_id={} from round {} to {} every {} rounds",
            self.metric.column(),
            party_id,
            first,
            last,
            step
        );

        let mut batcher = time_index::TimeIndexBatcher::new(self.gateway, last)
            .with_window(self.window)
            .with_fields(self.fields.clone());
        batcher.prefetch_range(first, last)?;
        let index = batcher.into_index();

        let bar = progress::counter(sample_count(first, last, step), "Sampling rounds");
        let mut samples = Vec::new();
        let mut round = first;
        loop {
            let effective_time = index.get(round).map(str::to_string);
            let value = self.metric.sample(self.gateway, party_id, round)?;
            log::debug!(
                "round={}, effective_time={:?}, {}={:?}",
                round,
                effective_time,
                self.metric.column(),
                value
            );
            samples.push(BalanceSample {
                round,
                effective_time,
                value,
            });
            bar.inc(1);
            match round.checked_add(step) {
                Some(next) if next <= last => round = next,
                _ => break,
            }
        }
        bar.finish_and_clear();
        Ok(samples)
    }

    /// Full series across the rounds of `month`. Empty when the month has no rounds.
    pub fn build_for_month(
        &self,
        resolver: &resolver::MonthRoundResolver<'g, G>,
        party_id: &str,
        month: resolver::TargetMonth,
        step: u64,
    ) -> error::Result<Vec<BalanceSample>> {
        if step == 0 {
            return Err(error::ScanError::InvalidStep(step));
        }
        match resolver.resolve(month)? {
            Some(boundary) => self.build(party_id, boundary.start_round, boundary.end_round, step),
            None => Ok(Vec::new()),
        }
    }

    /// Samples every party at the first and last round of `month` only.
    pub fn month_endpoints(
        &self,
        resolver: &resolver::MonthRoundResolver<'g, G>,
        party_ids: &[String],
        month: resolver::TargetMonth,
    ) -> error::Result<Vec<MonthEndpoints>> {
        let Some(boundary) = resolver.resolve(month)? else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::with_capacity(party_ids.len());
        for party_id in party_ids {
            let begin = self.metric.sample(self.gateway, party_id, boundary.start_round)?;
            let end = self.metric.sample(self.gateway, party_id, boundary.end_round)?;
            rows.push(MonthEndpoints {
                party_id: party_id.clone(),
                beginning_of_month_round: boundary.start_round,
                beginning_of_month_time: boundary.start_time.clone(),
                beginning_of_month_balance: begin,
                end_of_month_round: boundary.end_round,
                end_of_month_time: boundary.end_time.clone(),
                end_of_month_balance: end,
            });
        }
        Ok(rows)
    }

    /// Series over the last `count` rounds ending at the latest closed round.
    pub fn recent(&self, party_id: &str, count: u64) -> error::Result<Vec<BalanceSample>> {
        let latest = self
            .gateway
            .latest_round()?
            .round
            .ok_or(error::ScanError::LatestRoundUnavailable)?;
        let first = latest.saturating_sub(count.max(1) - 1);
        self.build(party_id, first, latest, 1)
    }

    /// Writes samples with the fixed columns `round, effective_time, <metric>`.
    pub fn write_csv<P: AsRef<std::path::Path>>(&self, path: P, samples: &[BalanceSample]) -> error::Result<()> {
        log::info!("Writing {} samples to {}", samples.len(), path.as_ref().display());
        csv_output::write_rows(path, &["round", "effective_time", self.metric.column()], samples)
    }
}

/// Wallet balance of `party_id` at the latest closed round.
pub fn latest_balance<G: gateway::Gateway>(gateway: &G, party_id: &str) -> error::Result<LatestBalance> {
    let latest = gateway.latest_round()?;
    let round = latest.round.ok_or(error::ScanError::LatestRoundUnavailable)?;
    let balance = gateway.wallet_balance(party_id, round)?;
    Ok(LatestBalance {
        party_id: party_id.to_string(),
        round,
        effective_at: latest.effective_at,
        wallet_balance: balance.wallet_balance,
    })
}
