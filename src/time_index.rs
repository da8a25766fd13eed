use crate::error;
use crate::gateway;

/// Number of rounds requested per `round_totals` call.
pub const DEFAULT_WINDOW: u64 = 200;

/// Field names under which a round entry may report its effective time,
/// in priority order. The first present, non-empty one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveTimeFields {
    names: Vec<String>,
}

impl Default for EffectiveTimeFields {
    fn default() -> Self {
        Self::new(["closed_round_effective_at", "effectiveAt", "effective_at"])
    }
}

impl EffectiveTimeFields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    #[cfg(test)]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the effective time of `entry` under the highest-priority field present.
    pub fn pick<'a>(&self, entry: &'a gateway::RoundEntry) -> Option<&'a str> {
        self.names
            .iter()
            .filter_map(|name| entry.get(name).and_then(|v| v.as_str()))
            .find(|value| !value.is_empty())
    }
}

/// Parses an ISO-8601 / RFC 3339 timestamp into UTC. Unparseable input is "unknown".
pub fn parse_effective_time(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Partial mapping from round number to its reported effective time.
///
/// Rounds missing from a fetched window stay absent; they are not errors.
#[derive(Debug, Clone, Default)]
pub struct RoundTimeIndex {
    times: std::collections::BTreeMap<u64, String>,
    fetched_windows: std::collections::BTreeSet<u64>,
}

impl RoundTimeIndex {
    pub fn get(&self, round: u64) -> Option<&str> {
        self.times.get(&round).map(String::as_str)
    }

    #[cfg(test)]
    /// Number of windows fetched so far.
    pub fn windows_fetched(&self) -> usize {
        self.fetched_windows.len()
    }

    fn absorb(&mut self, entries: &[gateway::RoundEntry], fields: &EffectiveTimeFields) {
        for entry in entries {
            let round = entry.get("closed_round").and_then(|v| v.as_u64());
            if let (Some(round), Some(time)) = (round, fields.pick(entry)) {
                self.times.insert(round, time.to_string());
            }
        }
    }
}

/// Fetches effective times in fixed, aligned windows and keeps them for the
/// lifetime of one logical scan.
///
/// The window containing round `r` spans `[floor(r / window) * window, min(that + window - 1, ceiling)]`,
/// where `ceiling` is the highest round the scan may ask about (usually the latest closed round).
/// Each window is requested from the Gateway at most once.
pub struct TimeIndexBatcher<'g, G: gateway::Gateway> {
    gateway: &'g G,
    fields: EffectiveTimeFields,
    window: u64,
    ceiling: u64,
    index: RoundTimeIndex,
}

impl<'g, G: gateway::Gateway> TimeIndexBatcher<'g, G> {
    pub fn new(gateway: &'g G, ceiling: u64) -> Self {
        Self {
            gateway,
            fields: EffectiveTimeFields::default(),
            window: DEFAULT_WINDOW,
            ceiling,
            index: RoundTimeIndex::default(),
        }
    }

    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_fields(mut self, fields: EffectiveTimeFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Bounds of the window holding `round`, or `None` past the ceiling.
    pub fn window_bounds(&self, round: u64) -> Option<(u64, u64)> {
        if round > self.ceiling {
            return None;
        }
        let start = (round / self.window) * self.window;
        let end = start.saturating_add(self.window - 1).min(self.ceiling);
        Some((start, end))
    }

    fn ensure_window(&mut self, round: u64) -> error::Result<()> {
        let Some((start, end)) = self.window_bounds(round) else {
            return Ok(());
        };
        if self.index.fetched_windows.contains(&start) {
            return Ok(());
        }
        log::debug!("Fetching round totals for rounds {} to {}", start, end);
        let entries = self.gateway.round_totals(start, end)?;
        self.index.absorb(&entries, &self.fields);
        self.index.fetched_windows.insert(start);
        Ok(())
    }

    /// Effective time of `round` as reported by the Gateway, fetching its window on demand.
    ///
    /// # Returns
    /// * `Ok(None)` - The round is past the ceiling or absent from its window.
    /// * `Err(_)` - The Gateway call failed; nothing is retried.
    pub fn lookup(&mut self, round: u64) -> error::Result<Option<String>> {
        self.ensure_window(round)?;
        Ok(self.index.get(round).map(str::to_string))
    }

    /// Parsed form of [`lookup`](Self::lookup). Unparseable timestamps are unknown.
    pub fn lookup_time(&mut self, round: u64) -> error::Result<Option<chrono::DateTime<chrono::Utc>>> {
        Ok(self.lookup(round)?.as_deref().and_then(parse_effective_time))
    }

    /// Fetches every window intersecting `[first, last]` that is not loaded yet.
    pub fn prefetch_range(&mut self, first: u64, last: u64) -> error::Result<()> {
        let last = last.min(self.ceiling);
        if first > last {
            return Ok(());
        }
        let mut start = (first / self.window) * self.window;
        while start <= last {
            self.ensure_window(start)?;
            start = match start.checked_add(self.window) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn index(&self) -> &RoundTimeIndex {
        &self.index
    }

    pub fn into_index(self) -> RoundTimeIndex {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{Call, FakeGateway};

    #[test]
    fn synonyms_follow_priority_order() {
        let fields = EffectiveTimeFields::default();
        let entry: gateway::RoundEntry = serde_json::from_value(serde_json::json!({
            "closed_round": 1,
            "effective_at": "2024-01-01T00:00:02Z",
            "effectiveAt": "2024-01-01T00:00:01Z",
        }))
        .unwrap();
        assert_eq!(fields.pick(&entry), Some("2024-01-01T00:00:01Z"));

        let reversed = EffectiveTimeFields::new(["effective_at", "effectiveAt"]);
        assert_eq!(reversed.pick(&entry), Some("2024-01-01T00:00:02Z"));
    }

    #[test]
    fn empty_synonym_falls_through() {
        let entry: gateway::RoundEntry = serde_json::from_value(serde_json::json!({
            "closed_round": 1,
            "closed_round_effective_at": "",
            "effective_at": "2024-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(EffectiveTimeFields::default().pick(&entry), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn parses_zulu_and_offsets() {
        let a = parse_effective_time("2024-04-01T00:00:00Z").unwrap();
        let b = parse_effective_time("2024-04-01T02:00:00.123456+02:00").unwrap();
        assert_eq!(a.timestamp(), b.timestamp());
        assert!(parse_effective_time("yesterday").is_none());
    }

    #[test]
    fn windows_are_aligned_and_clamped() {
        let gw = FakeGateway::new();
        let batcher = TimeIndexBatcher::new(&gw, 450);
        assert_eq!(batcher.window_bounds(0), Some((0, 199)));
        assert_eq!(batcher.window_bounds(399), Some((200, 399)));
        assert_eq!(batcher.window_bounds(420), Some((400, 450)));
        assert_eq!(batcher.window_bounds(451), None);
    }

    #[test]
    fn each_window_is_fetched_once() {
        let gw = FakeGateway::new()
            .with_round(5, "2024-01-01T00:00:00Z")
            .with_round(6, "2024-01-01T00:10:00Z")
            .with_round(205, "2024-01-02T00:00:00Z");
        let mut batcher = TimeIndexBatcher::new(&gw, 300);

        assert_eq!(batcher.lookup(5).unwrap().as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(batcher.lookup(6).unwrap().as_deref(), Some("2024-01-01T00:10:00Z"));
        assert_eq!(batcher.lookup(7).unwrap(), None);
        assert_eq!(batcher.lookup(205).unwrap().as_deref(), Some("2024-01-02T00:00:00Z"));

        assert_eq!(gw.calls(), vec![Call::RoundTotals(0, 199), Call::RoundTotals(200, 300)]);
    }

    #[test]
    fn rounds_outside_ledger_are_unknown() {
        let gw = FakeGateway::new().with_round(10, "2024-01-01T00:00:00Z");
        let mut batcher = TimeIndexBatcher::new(&gw, 10);
        assert_eq!(batcher.lookup(3).unwrap(), None);
        assert_eq!(batcher.lookup(11).unwrap(), None);
        assert_eq!(batcher.lookup(u64::MAX).unwrap(), None);
        assert_eq!(gw.count(|c| matches!(c, Call::RoundTotals(..))), 1);
    }

    #[test]
    fn prefetch_covers_every_window_in_range() {
        let gw = FakeGateway::new();
        let mut batcher = TimeIndexBatcher::new(&gw, 1_000).with_window(100);
        batcher.prefetch_range(150, 420).unwrap();
        assert_eq!(
            gw.calls(),
            vec![
                Call::RoundTotals(100, 199),
                Call::RoundTotals(200, 299),
                Call::RoundTotals(300, 399),
                Call::RoundTotals(400, 499),
            ]
        );
        batcher.prefetch_range(150, 420).unwrap();
        assert_eq!(batcher.index().windows_fetched(), 4);
        assert_eq!(gw.calls().len(), 4);
    }

    #[test]
    fn gateway_failure_propagates() {
        let mut gw = FakeGateway::new();
        gw.fail_round_totals = true;
        let mut batcher = TimeIndexBatcher::new(&gw, 10);
        assert!(matches!(batcher.lookup(1), Err(error::ScanError::Decode(_))));
    }
}
