use crate::error;
use crate::gateway;
use crate::resolver;

/// Holdings of one party at the start and end snapshot of a month.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HoldingsForMonth {
    pub party_id: String,
    pub year: i32,
    pub month: u32,
    pub beginning_of_month_time: String,
    pub beginning_of_month_snapshot_time: Option<String>,
    pub beginning_of_month_balance: Option<String>,
    pub end_of_month_time: String,
    pub end_of_month_snapshot_time: Option<String>,
    pub end_of_month_balance: Option<String>,
}

pub const HOLDINGS_MONTH_COLUMNS: [&str; 9] = [
    "party_id",
    "year",
    "month",
    "beginning_of_month_time",
    "beginning_of_month_snapshot_time",
    "beginning_of_month_balance",
    "end_of_month_time",
    "end_of_month_snapshot_time",
    "end_of_month_balance",
];

fn summary_at<G: gateway::Gateway>(
    gateway: &G,
    migration_id: u64,
    record_time: &str,
    party_ids: &[String],
) -> error::Result<gateway::HoldingsSummary> {
    gateway.holdings_summary(&gateway::HoldingsSummaryRequest {
        migration_id,
        record_time: Some(record_time.to_string()),
        owner_party_ids: Some(party_ids.to_vec()),
        as_of_round: None,
    })
}

/// Reports `total_coin_holdings` per party at the start and end of each month.
///
/// The start is the latest snapshot before the first instant of the month (or the
/// first instant itself when there is none); the end is the latest snapshot before
/// the month's last second. Months without an end snapshot are skipped.
///
/// # Arguments
/// * `gateway` - Scan Gateway.
/// * `migration_id` - Migration epoch passed through to the Gateway.
/// * `party_ids` - Parties to report, in output order.
/// * `months` - Months to report, in output order.
///
/// # Returns
/// * `error::Result<Vec<HoldingsForMonth>>` - One row per (month, party).
pub fn holdings_for_months<G: gateway::Gateway>(
    gateway: &G,
    migration_id: u64,
    party_ids: &[String],
    months: &[resolver::TargetMonth],
) -> error::Result<Vec<HoldingsForMonth>> {
    let mut rows = Vec::new();
    for month in months {
        log::info!("Processing holdings summary for {}...", month);
        let begin_time = month.start_text();
        let end_time = month.last_second_text();

        let begin_snapshot = gateway.acs_snapshot_timestamp(&begin_time, migration_id)?.record_time;
        log::debug!("begin snapshot for {} is {:?}", month, begin_snapshot);
        let Some(end_snapshot) = gateway.acs_snapshot_timestamp(&end_time, migration_id)?.record_time else {
            log::warn!("No end snapshot found for {}", month);
            continue;
        };
        log::debug!("end snapshot for {} is {}", month, end_snapshot);

        let begin_at = begin_snapshot.as_deref().unwrap_or(&begin_time);
        let begin = summary_at(gateway, migration_id, begin_at, party_ids)?;
        let end = summary_at(gateway, migration_id, &end_snapshot, party_ids)?;

        for party_id in party_ids {
            rows.push(HoldingsForMonth {
                party_id: party_id.clone(),
                year: month.year(),
                month: month.month(),
                beginning_of_month_time: begin_time.clone(),
                beginning_of_month_snapshot_time: begin_snapshot.clone(),
                beginning_of_month_balance: begin.total_for(party_id),
                end_of_month_time: end_time.clone(),
                end_of_month_snapshot_time: Some(end_snapshot.clone()),
                end_of_month_balance: end.total_for(party_id),
            });
        }
    }
    Ok(rows)
}

/// Holdings summary at the most recent snapshot, computed as of the latest round.
///
/// Falls back to `now` as the record time when no snapshot precedes it.
///
/// # Errors
/// * `ScanError::LatestRoundUnavailable` - The Gateway reported no latest round.
pub fn holdings_now<G: gateway::Gateway>(
    gateway: &G,
    migration_id: u64,
    party_ids: Option<Vec<String>>,
    now: chrono::DateTime<chrono::Utc>,
) -> error::Result<gateway::HoldingsSummary> {
    let current = now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string();
    let record_time = match gateway.acs_snapshot_timestamp(&current, migration_id)?.record_time {
        Some(time) => time,
        None => {
            log::warn!("No ACS snapshot found before {}, using it directly", current);
            current
        }
    };
    let latest = gateway
        .latest_round()?
        .round
        .ok_or(error::ScanError::LatestRoundUnavailable)?;
    gateway.holdings_summary(&gateway::HoldingsSummaryRequest {
        migration_id,
        record_time: Some(record_time),
        owner_party_ids: party_ids,
        as_of_round: Some(latest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{Call, FakeGateway};
    use chrono::TimeZone;

    #[test]
    fn month_rows_use_snapshot_times() {
        let gw = FakeGateway::new()
            .with_snapshot("2024-03-31T23:50:00.000000Z")
            .with_snapshot("2024-04-30T23:55:00.000000Z")
            .with_holdings("alice", "2024-03-31T23:50:00.000000Z", "10.0")
            .with_holdings("alice", "2024-04-30T23:55:00.000000Z", "12.5");
        let parties = vec!["alice".to_string(), "bob".to_string()];
        let rows = holdings_for_months(&gw, 7, &parties, &[resolver::TargetMonth::new(2024, 4).unwrap()]).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].beginning_of_month_time, "2024-04-01T00:00:00.000000Z");
        assert_eq!(rows[0].end_of_month_time, "2024-04-30T23:59:59.000000Z");
        assert_eq!(rows[0].beginning_of_month_balance.as_deref(), Some("10.0"));
        assert_eq!(rows[0].end_of_month_balance.as_deref(), Some("12.5"));
        assert_eq!(rows[1].party_id, "bob");
        assert_eq!(rows[1].end_of_month_balance, None);
    }

    #[test]
    fn months_without_end_snapshot_are_skipped() {
        let gw = FakeGateway::new().with_snapshot("2024-05-10T00:00:00.000000Z");
        let rows = holdings_for_months(
            &gw,
            7,
            &["alice".to_string()],
            &[resolver::TargetMonth::new(2024, 4).unwrap()],
        )
        .unwrap();
        assert!(rows.is_empty());
        assert_eq!(gw.count(|c| matches!(c, Call::HoldingsSummary(_))), 0);
    }

    #[test]
    fn now_falls_back_to_current_time() {
        let gw = FakeGateway::new().with_latest(88, "2024-06-01T00:00:00Z");
        let now = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        holdings_now(&gw, 2, None, now).unwrap();
        assert!(gw.calls().contains(&Call::HoldingsSummary(gateway::HoldingsSummaryRequest {
            migration_id: 2,
            record_time: Some("2024-06-01T12:00:00.000000Z".into()),
            owner_party_ids: None,
            as_of_round: Some(88),
        })));
    }

    #[test]
    fn now_requires_latest_round() {
        let gw = FakeGateway::new().with_snapshot("2024-06-01T00:00:00.000000Z");
        let now = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert!(matches!(
            holdings_now(&gw, 2, None, now),
            Err(error::ScanError::LatestRoundUnavailable)
        ));
        assert_eq!(gw.count(|c| matches!(c, Call::HoldingsSummary(_))), 0);
    }
}
