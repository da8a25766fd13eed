use crate::error;

/// A single entry of `round_totals` or `round_party_totals`.
///
/// Entries are kept as raw JSON objects: the name of the effective-time field
/// differs between Gateway versions, and is resolved by `time_index::EffectiveTimeFields`.
pub type RoundEntry = serde_json::Map<String, serde_json::Value>;

/// Current highest closed round and its effective time.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LatestRound {
    pub round: Option<u64>,
    #[serde(rename = "effectiveAt", alias = "effective_at", default)]
    pub effective_at: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct WalletBalance {
    #[serde(default)]
    pub wallet_balance: Option<String>,
}

/// Request body for the holdings summary endpoint.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct HoldingsSummaryRequest {
    pub migration_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_party_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_round: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HoldingsSummaryEntry {
    pub party_id: String,
    #[serde(default)]
    pub total_coin_holdings: Option<String>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HoldingsSummary {
    #[serde(default)]
    pub record_time: Option<String>,
    #[serde(default)]
    pub migration_id: Option<u64>,
    #[serde(default)]
    pub computed_as_of_round: Option<u64>,
    #[serde(default)]
    pub summaries: Vec<HoldingsSummaryEntry>,
}

impl HoldingsSummary {
    /// Returns `total_coin_holdings` reported for `party_id`, if any.
    pub fn total_for(&self, party_id: &str) -> Option<String> {
        self.summaries
            .iter()
            .find(|s| s.party_id == party_id)
            .and_then(|s| s.total_coin_holdings.clone())
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AcsSnapshotTimestamp {
    #[serde(default)]
    pub record_time: Option<String>,
}

/// One page of the activity feed. Records are arbitrarily shaped JSON objects.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ActivityPage {
    #[serde(default)]
    pub activities: Vec<serde_json::Value>,
}

/// Blocking access to the Scan service.
///
/// The derived-data layer only talks to this trait. `http_gateway::HttpGateway`
/// is the REST adapter; tests use the recording fake in [`fake`].
///
/// Every call blocks until its response is available. Implementations do not
/// retry: failures propagate unchanged to the caller.
pub trait Gateway {
    fn latest_round(&self) -> error::Result<LatestRound>;

    /// Per-round metadata for `[start, end]` inclusive. Absent rounds are simply missing.
    fn round_totals(&self, start: u64, end: u64) -> error::Result<Vec<RoundEntry>>;

    fn round_party_totals(&self, start: u64, end: u64) -> error::Result<Vec<RoundEntry>>;

    fn wallet_balance(&self, party_id: &str, round: u64) -> error::Result<WalletBalance>;

    fn holdings_summary(&self, request: &HoldingsSummaryRequest) -> error::Result<HoldingsSummary>;

    /// Latest ACS snapshot time strictly before `before`.
    fn acs_snapshot_timestamp(&self, before: &str, migration_id: u64)
    -> error::Result<AcsSnapshotTimestamp>;

    /// Cursor-paginated activity feed, newest first.
    fn activities(&self, page_size: usize, begin_after_id: &str) -> error::Result<ActivityPage>;
}

#[cfg(test)]
pub mod fake {
    use super::*;

    use std::cell::RefCell;
    use std::collections::{BTreeMap, HashMap};

    /// Every Gateway call the fake has served, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        LatestRound,
        RoundTotals(u64, u64),
        RoundPartyTotals(u64, u64),
        WalletBalance(String, u64),
        HoldingsSummary(HoldingsSummaryRequest),
        AcsSnapshot(String),
        Activities(usize, String),
    }

    /// In-memory Gateway recording its calls.
    #[derive(Default)]
    pub struct FakeGateway {
        pub latest: LatestRound,
        pub rounds: BTreeMap<u64, RoundEntry>,
        pub party_totals: BTreeMap<u64, Vec<RoundEntry>>,
        pub balances: HashMap<(String, u64), String>,
        /// `(party, as_of_round or record_time)` -> total_coin_holdings
        pub holdings: HashMap<(String, String), String>,
        /// Sorted snapshot record times.
        pub snapshots: Vec<String>,
        pub activities: Vec<serde_json::Value>,
        pub fail_round_totals: bool,
        pub calls: RefCell<Vec<Call>>,
    }

    impl FakeGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_latest(mut self, round: u64, effective_at: &str) -> Self {
            self.latest = LatestRound {
                round: Some(round),
                effective_at: Some(effective_at.to_string()),
            };
            self
        }

        /// Adds a round reporting its time under `field`.
        pub fn with_round_field(mut self, round: u64, field: &str, effective_at: &str) -> Self {
            let mut entry = RoundEntry::new();
            entry.insert("closed_round".into(), round.into());
            entry.insert(field.into(), effective_at.into());
            self.rounds.insert(round, entry);
            self
        }

        pub fn with_round(self, round: u64, effective_at: &str) -> Self {
            self.with_round_field(round, "closed_round_effective_at", effective_at)
        }

        pub fn with_balance(mut self, party: &str, round: u64, value: &str) -> Self {
            self.balances.insert((party.to_string(), round), value.to_string());
            self
        }

        pub fn with_holdings(mut self, party: &str, key: &str, value: &str) -> Self {
            self.holdings.insert((party.to_string(), key.to_string()), value.to_string());
            self
        }

        pub fn with_snapshot(mut self, record_time: &str) -> Self {
            self.snapshots.push(record_time.to_string());
            self.snapshots.sort();
            self
        }

        pub fn with_activities(mut self, activities: Vec<serde_json::Value>) -> Self {
            self.activities = activities;
            self
        }

        pub fn with_party_totals(mut self, round: u64, entries: Vec<serde_json::Value>) -> Self {
            let entries = entries
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect();
            self.party_totals.insert(round, entries);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.borrow().iter().filter(|c| pred(c)).count()
        }

        fn record(&self, call: Call) {
            self.calls.borrow_mut().push(call);
        }
    }

    fn malformed() -> error::ScanError {
        match serde_json::from_str::<serde_json::Value>("{") {
            Err(e) => error::ScanError::Decode(e),
            Ok(_) => error::ScanError::LatestRoundUnavailable,
        }
    }

    impl Gateway for FakeGateway {
        fn latest_round(&self) -> error::Result<LatestRound> {
            self.record(Call::LatestRound);
            Ok(self.latest.clone())
        }

        fn round_totals(&self, start: u64, end: u64) -> error::Result<Vec<RoundEntry>> {
            self.record(Call::RoundTotals(start, end));
            if self.fail_round_totals {
                return Err(malformed());
            }
            Ok(self.rounds.range(start..=end).map(|(_, e)| e.clone()).collect())
        }

        fn round_party_totals(&self, start: u64, end: u64) -> error::Result<Vec<RoundEntry>> {
            self.record(Call::RoundPartyTotals(start, end));
            Ok(self
                .party_totals
                .range(start..=end)
                .flat_map(|(_, e)| e.clone())
                .collect())
        }

        fn wallet_balance(&self, party_id: &str, round: u64) -> error::Result<WalletBalance> {
            self.record(Call::WalletBalance(party_id.to_string(), round));
            Ok(WalletBalance {
                wallet_balance: self.balances.get(&(party_id.to_string(), round)).cloned(),
            })
        }

        fn holdings_summary(&self, request: &HoldingsSummaryRequest) -> error::Result<HoldingsSummary> {
            self.record(Call::HoldingsSummary(request.clone()));
            let key = match (&request.as_of_round, &request.record_time) {
                (Some(round), _) => round.to_string(),
                (None, Some(time)) => time.clone(),
                (None, None) => String::new(),
            };
            let parties = request.owner_party_ids.clone().unwrap_or_default();
            let summaries = parties
                .into_iter()
                .filter_map(|party| {
                    let total = self.holdings.get(&(party.clone(), key.clone()))?.clone();
                    Some(HoldingsSummaryEntry {
                        party_id: party,
                        total_coin_holdings: Some(total),
                        other: serde_json::Map::new(),
                    })
                })
                .collect();
            Ok(HoldingsSummary {
                record_time: request.record_time.clone(),
                migration_id: Some(request.migration_id),
                computed_as_of_round: request.as_of_round,
                summaries,
            })
        }

        fn acs_snapshot_timestamp(
            &self,
            before: &str,
            _migration_id: u64,
        ) -> error::Result<AcsSnapshotTimestamp> {
            self.record(Call::AcsSnapshot(before.to_string()));
            Ok(AcsSnapshotTimestamp {
                record_time: self
                    .snapshots
                    .iter()
                    .filter(|t| t.as_str() < before)
                    .next_back()
                    .cloned(),
            })
        }

        fn activities(&self, page_size: usize, begin_after_id: &str) -> error::Result<ActivityPage> {
            self.record(Call::Activities(page_size, begin_after_id.to_string()));
            let start = if begin_after_id.is_empty() {
                0
            } else {
                self.activities
                    .iter()
                    .position(|a| a.get("event_id").and_then(|v| v.as_str()) == Some(begin_after_id))
                    .map(|i| i + 1)
                    .unwrap_or(self.activities.len())
            };
            Ok(ActivityPage {
                activities: self.activities.iter().skip(start).take(page_size).cloned().collect(),
            })
        }
    }
}
