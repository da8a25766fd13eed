use crate::csv_output;
use crate::error;
use crate::gateway;
use crate::progress;
use crate::time_index;

/// Rounds requested per `round_party_totals` call.
pub const DEFAULT_BATCH: u64 = 50;

const EFFECTIVE_TIME: &str = "effective_time";

/// Streams `round_party_totals` from `start_round` up to the latest round into a CSV file,
/// adding an `effective_time` column resolved from the time index.
///
/// The header is taken from the keys of the first entry of the first non-empty batch,
/// plus `effective_time`; later entries are projected onto it.
///
/// # Arguments
/// * `gateway` - Scan Gateway.
/// * `path` - Output CSV path, written atomically.
/// * `start_round` - First round to export.
/// * `batch` - Rounds per `round_party_totals` request.
/// * `window` - Rounds per `round_totals` request of the time index.
/// * `fields` - Effective-time field names, highest priority first.
///
/// # Returns
/// * `error::Result<usize>` - Number of entries written.
pub fn export_round_party_totals<G, P>(
    gateway: &G,
    path: P,
    start_round: u64,
    batch: u64,
    window: u64,
    fields: time_index::EffectiveTimeFields,
) -> error::Result<usize>
where
    G: gateway::Gateway,
    P: AsRef<std::path::Path>,
{
    let batch = batch.max(1);
    let latest = gateway
        .latest_round()?
        .round
        .ok_or(error::ScanError::LatestRoundUnavailable)?;
    log::info!(
        "Exporting round party totals from round {} to {} in batches of {}...",
        start_round,
        latest,
        batch
    );

    let mut batcher = time_index::TimeIndexBatcher::new(gateway, latest)
        .with_window(window)
        .with_fields(fields);
    let mut total = 0;
    csv_output::write_csv_atomic(path, |writer| {
        let mut header: Option<Vec<String>> = None;
        let batches = if start_round > latest { 0 } else { (latest - start_round) / batch + 1 };
        let bar = progress::counter(batches, "Exporting round party totals");

        let mut batch_start = start_round;
        while batch_start <= latest {
            let batch_end = batch_start.saturating_add(batch - 1).min(latest);
            let entries = gateway.round_party_totals(batch_start, batch_end)?;
            bar.inc(1);
            if entries.is_empty() {
                log::debug!("No entries for rounds {} to {}", batch_start, batch_end);
            } else {
                // map keys iterate in sorted order
                let columns = header.get_or_insert_with(|| {
                    let mut names: Vec<String> = entries[0].keys().cloned().collect();
                    if !names.iter().any(|n| n == EFFECTIVE_TIME) {
                        names.push(EFFECTIVE_TIME.to_string());
                    }
                    names
                });
                if total == 0 {
                    writer.write_record(columns.iter())?;
                }
                for entry in &entries {
                    let effective_time = match entry.get("closed_round").and_then(|v| v.as_u64()) {
                        Some(round) => batcher.lookup(round)?,
                        None => None,
                    };
                    let mut cells = Vec::with_capacity(columns.len());
                    for name in columns.iter() {
                        if name == EFFECTIVE_TIME {
                            cells.push(effective_time.clone().unwrap_or_default());
                        } else {
                            cells.push(entry.get(name).map(csv_output::cell).unwrap_or_default());
                        }
                    }
                    writer.write_record(&cells)?;
                }
                total += entries.len();
                log::debug!(
                    "Wrote {} entries for rounds {} to {} (total so far: {})",
                    entries.len(),
                    batch_start,
                    batch_end,
                    total
                );
            }
            batch_start = match batch_end.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
        bar.finish_and_clear();
        Ok(())
    })?;
    log::info!("Done writing round party totals. Total entries: {}", total);
    Ok(total)
}
