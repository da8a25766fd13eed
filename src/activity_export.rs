use crate::csv_output;
use crate::error;
use crate::gateway;
use crate::progress;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Sub-fields padded with nulls when a record has fewer receivers than the widest one.
pub const RECEIVER_FIELDS: [&str; 3] = ["party", "amount", "receiver_fee"];

/// Sub-fields padded with nulls when a record has fewer balance changes than the widest one.
pub const BALANCE_CHANGE_FIELDS: [&str; 3] = [
    "party",
    "change_to_initial_amount_as_of_round_zero",
    "change_to_holding_fees_rate",
];

/// Parses an RFC 3339 timestamp, or an ISO-8601 date-time without offset read as UTC.
fn parse_instant(value: &str) -> Result<chrono::DateTime<chrono::Utc>, chrono::ParseError> {
    match chrono::DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Ok(dt.with_timezone(&chrono::Utc)),
        Err(e) => chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| e),
    }
}

/// Oldest `date` kept by an export. Records dated strictly before it stop the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cutoff {
    raw: String,
    at: chrono::DateTime<chrono::Utc>,
}

impl Cutoff {
    pub fn parse(value: &str) -> error::Result<Self> {
        let at = parse_instant(value).map_err(|source| error::ScanError::InvalidTimestamp {
            value: value.to_string(),
            source,
        })?;
        Ok(Self {
            raw: value.to_string(),
            at,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when `record` is dated before the cutoff.
    ///
    /// Records without a `date` are kept. Dates that do not parse are compared as text.
    pub fn excludes(&self, record: &serde_json::Value) -> bool {
        let Some(date) = record.get("date").and_then(|d| d.as_str()) else {
            return false;
        };
        if date.is_empty() {
            return false;
        }
        match parse_instant(date) {
            Ok(at) => at < self.at,
            Err(_) => date < self.raw.as_str(),
        }
    }
}

/// Widths and padding fields of the two variable-length transfer lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub max_receivers: usize,
    pub max_balance_changes: usize,
    pub receiver_fields: std::collections::BTreeSet<String>,
    pub balance_change_fields: std::collections::BTreeSet<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            max_receivers: 0,
            max_balance_changes: 0,
            receiver_fields: RECEIVER_FIELDS.iter().map(|f| f.to_string()).collect(),
            balance_change_fields: BALANCE_CHANGE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

fn list_keys<'a>(list: &'a [serde_json::Value]) -> impl Iterator<Item = &'a String> {
    list.iter()
        .filter_map(|item| item.as_object())
        .flat_map(|obj| obj.keys())
}

impl Schema {
    /// Widens the schema to fit `record`.
    pub fn observe(&mut self, record: &serde_json::Value) {
        let Some(transfer) = record.get("transfer").and_then(|t| t.as_object()) else {
            return;
        };
        if let Some(receivers) = transfer.get("receivers").and_then(|r| r.as_array()) {
            self.max_receivers = self.max_receivers.max(receivers.len());
            self.receiver_fields.extend(list_keys(receivers).cloned());
        }
        if let Some(changes) = transfer.get("balance_changes").and_then(|b| b.as_array()) {
            self.max_balance_changes = self.max_balance_changes.max(changes.len());
            self.balance_change_fields.extend(list_keys(changes).cloned());
        }
    }
}

/// Output of the discovery stage: the schema plus every record newer than the cutoff.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    pub schema: Schema,
    pub records: Vec<serde_json::Value>,
    pub pages: usize,
}

/// Counters reported after an export.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExportSummary {
    pub records_scanned: usize,
    pub rows_written: usize,
    pub columns: usize,
    pub max_receivers: usize,
    pub max_balance_changes: usize,
}

type FlatRow = std::collections::BTreeMap<String, serde_json::Value>;

fn expand_list(
    row: &mut FlatRow,
    prefix: &str,
    list: &[serde_json::Value],
    width: usize,
    pad_fields: &std::collections::BTreeSet<String>,
) {
    for i in 0..width {
        match list.get(i).and_then(|item| item.as_object()) {
            Some(item) => {
                for (key, value) in item {
                    row.insert(format!("{}_{}_{}", prefix, i, key), value.clone());
                }
            }
            None => {
                for key in pad_fields {
                    row.insert(format!("{}_{}_{}", prefix, i, key), serde_json::Value::Null);
                }
            }
        }
    }
    row.insert(prefix.to_string(), serde_json::Value::String(serde_json::Value::from(list).to_string()));
}

/// Flattens one activity record against `schema`.
///
/// * scalars pass through under their own key
/// * `transfer` scalars become `transfer_{field}`, its objects `transfer_{field}_{sub}`
/// * `transfer.receivers` / `transfer.balance_changes` expand to
///   `transfer_{list}_{i}_{field}` up to the schema width, plus the whole list as JSON
/// * other objects flatten one level to `{field}_{sub}`
/// * other lists are kept whole as JSON text
pub fn flatten(record: &serde_json::Value, schema: &Schema) -> FlatRow {
    let mut row = FlatRow::new();
    let Some(object) = record.as_object() else {
        return row;
    };
    for (key, value) in object {
        match value {
            serde_json::Value::Object(transfer) if key == "transfer" => {
                for (tk, tv) in transfer {
                    match tv {
                        serde_json::Value::Array(list) if tk == "receivers" => expand_list(
                            &mut row,
                            "transfer_receivers",
                            list,
                            schema.max_receivers,
                            &schema.receiver_fields,
                        ),
                        serde_json::Value::Array(list) if tk == "balance_changes" => expand_list(
                            &mut row,
                            "transfer_balance_changes",
                            list,
                            schema.max_balance_changes,
                            &schema.balance_change_fields,
                        ),
                        serde_json::Value::Object(sub) => {
                            for (sk, sv) in sub {
                                row.insert(format!("transfer_{}_{}", tk, sk), sv.clone());
                            }
                        }
                        other => {
                            row.insert(format!("transfer_{}", tk), other.clone());
                        }
                    }
                }
            }
            serde_json::Value::Object(sub) => {
                for (sk, sv) in sub {
                    row.insert(format!("{}_{}", key, sk), sv.clone());
                }
            }
            serde_json::Value::Array(_) => {
                row.insert(key.clone(), serde_json::Value::String(value.to_string()));
            }
            other => {
                row.insert(key.clone(), other.clone());
            }
        }
    }
    row
}

/// Sorted union of the flattened keys of every record.
pub fn columns(schema: &Schema, records: &[serde_json::Value]) -> Vec<String> {
    let mut names = std::collections::BTreeSet::new();
    for record in records {
        names.extend(flatten(record, schema).into_keys());
    }
    names.into_iter().collect()
}

/// Render stage: writes the header and one row per record, stopping at the
/// first record dated before `cutoff`.
///
/// With no records nothing is written, leaving an empty file.
///
/// # Returns
/// * `error::Result<(usize, usize)>` - Rows written and number of columns.
pub fn render<W: std::io::Write>(
    schema: &Schema,
    records: &[serde_json::Value],
    cutoff: &Cutoff,
    writer: &mut csv::Writer<W>,
) -> error::Result<(usize, usize)> {
    let columns = columns(schema, records);
    if columns.is_empty() {
        return Ok((0, 0));
    }
    log::info!("Writing CSV with {} columns...", columns.len());
    writer.write_record(&columns)?;

    let mut written = 0;
    for record in records {
        if cutoff.excludes(record) {
            log::info!(
                "Stopping CSV write at activity_date={:?} (before {})",
                record.get("date"),
                cutoff.as_str()
            );
            break;
        }
        let flat = flatten(record, schema);
        let cells = columns
            .iter()
            .map(|name| flat.get(name).map(csv_output::cell).unwrap_or_default());
        writer.write_record(cells)?;
        written += 1;
    }
    Ok((written, columns.len()))
}

/// Activity feed to flat CSV export, run as two stages.
///
/// [`discover`](Self::discover) pages through the feed until the cutoff, buffering
/// records and measuring the widest `receivers` and `balance_changes` lists into a
/// [`Schema`]. [`render`] then flattens every buffered record against that schema and
/// writes one CSV with a sorted, fixed column set. The buffer grows with the number
/// of records newer than the cutoff.
pub struct ActivityExporter<'g, G: gateway::Gateway> {
    gateway: &'g G,
    page_size: usize,
}

impl<'g, G: gateway::Gateway> ActivityExporter<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self {
            gateway,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Discovery stage.
    ///
    /// Requests pages with `begin_after_id` set to the `event_id` of the previous
    /// page's last record. Stops on an empty page, on a page whose last record has no
    /// `event_id`, or at the first record dated before `cutoff` (which is discarded
    /// along with everything after it).
    pub fn discover(&self, cutoff: &Cutoff) -> error::Result<Discovered> {
        log::info!("Scanning activities newer than {}...", cutoff.as_str());
        let bar = progress::spinner("Scanning activities");
        let mut found = Discovered::default();
        let mut cursor = String::new();

        loop {
            let page = self.gateway.activities(self.page_size, &cursor)?;
            if page.activities.is_empty() {
                log::info!("No more activities after page {}", found.pages);
                break;
            }
            log::debug!(
                "Processing page {}, activities in page: {}, total scanned so far: {}",
                found.pages,
                page.activities.len(),
                found.records.len()
            );
            found.pages += 1;
            let next_cursor = page
                .activities
                .last()
                .and_then(|a| a.get("event_id"))
                .and_then(|id| id.as_str())
                .map(str::to_string);

            let mut stopped = false;
            for activity in page.activities {
                if cutoff.excludes(&activity) {
                    log::info!(
                        "Stopping scan at activity_date={:?} (before {}), total scanned: {}",
                        activity.get("date"),
                        cutoff.as_str(),
                        found.records.len()
                    );
                    stopped = true;
                    break;
                }
                found.schema.observe(&activity);
                found.records.push(activity);
                bar.inc(1);
            }
            if stopped {
                break;
            }
            match next_cursor {
                Some(id) => cursor = id,
                None => {
                    log::warn!("Last activity of page {} has no event_id, stopping", found.pages);
                    break;
                }
            }
        }
        bar.finish_and_clear();
        log::info!(
            "Max receivers: {}, Max balance_changes: {}, Total activities: {}",
            found.schema.max_receivers,
            found.schema.max_balance_changes,
            found.records.len()
        );
        Ok(found)
    }

    /// Runs both stages and writes the result to `path` atomically.
    pub fn export<P: AsRef<std::path::Path>>(&self, cutoff: &Cutoff, path: P) -> error::Result<ExportSummary> {
        let discovered = self.discover(cutoff)?;
        let mut outcome = (0, 0);
        csv_output::write_csv_atomic(path.as_ref(), |writer| {
            outcome = render(&discovered.schema, &discovered.records, cutoff, writer)?;
            Ok(())
        })?;
        log::info!("Done. Total activities written: {}", outcome.0);
        Ok(ExportSummary {
            records_scanned: discovered.records.len(),
            rows_written: outcome.0,
            columns: outcome.1,
            max_receivers: discovered.schema.max_receivers,
            max_balance_changes: discovered.schema.max_balance_changes,
        })
    }
}
