use crate::resolver;
use crate::series;

/// Which subcommand to run, with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    MonthRounds {
        month: (i32, u32),
    },
    BalanceSeries {
        party: String,
        first: u64,
        last: u64,
        step: u64,
        metric: series::SeriesMetric,
        csv: Option<String>,
    },
    MonthSeries {
        party: String,
        month: (i32, u32),
        step: u64,
        metric: series::SeriesMetric,
        csv: Option<String>,
    },
    MonthBalances {
        parties: Vec<String>,
        month: (i32, u32),
        metric: series::SeriesMetric,
        csv: Option<std::path::PathBuf>,
    },
    LatestBalance {
        party: String,
    },
    RecentBalances {
        party: String,
        count: u64,
        csv: Option<String>,
    },
    HoldingsMonth {
        migration_id: u64,
        parties: Vec<String>,
        months: Vec<(i32, u32)>,
        csv: Option<std::path::PathBuf>,
    },
    HoldingsNow {
        migration_id: u64,
        parties: Option<Vec<String>>,
    },
    ExportActivities {
        after: String,
        output: std::path::PathBuf,
        page_size: usize,
    },
    ExportRoundPartyTotals {
        output: std::path::PathBuf,
        start_round: u64,
        batch: u64,
    },
}

/// Structure representing command-line arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub window: u64,
    pub time_fields: Vec<String>,
    pub unknown_probe: resolver::UnknownProbePolicy,
    pub command: Command,
}

fn party_arg(multiple: bool) -> clap::Arg {
    let arg = clap::Arg::new("party")
        .short('p')
        .long("party")
        .help("Party id")
        .required(true);
    if multiple {
        arg.action(clap::ArgAction::Append)
    } else {
        arg.num_args(1)
    }
}

fn month_args() -> [clap::Arg; 2] {
    [
        clap::Arg::new("year")
            .long("year")
            .help("Calendar year")
            .required(true)
            .value_parser(clap::value_parser!(i32)),
        clap::Arg::new("month")
            .long("month")
            .help("Calendar month (1-12)")
            .required(true)
            .value_parser(clap::value_parser!(u32).range(1..=12)),
    ]
}

fn step_arg() -> clap::Arg {
    clap::Arg::new("step")
        .long("step")
        .help("Sample every N rounds")
        .default_value("1")
        .value_parser(clap::builder::ValueParser::new(parse_u64_positive))
}

fn csv_flag() -> clap::Arg {
    clap::Arg::new("csv")
        .long("csv")
        .help("Write the series to a CSV file (default name when no path is given)")
        .num_args(0..=1)
        .default_missing_value("")
}

fn csv_path() -> clap::Arg {
    clap::Arg::new("csv")
        .long("csv")
        .help("Write the rows to this CSV file")
        .num_args(1)
        .value_parser(clap::value_parser!(std::path::PathBuf))
}

fn metric_args() -> [clap::Arg; 2] {
    [
        clap::Arg::new("metric")
            .long("metric")
            .help("Scalar to sample")
            .value_parser(["wallet", "holdings"])
            .default_value("wallet"),
        clap::Arg::new("migration-id")
            .long("migration-id")
            .help("Migration id for the holdings metric")
            .value_parser(clap::value_parser!(u64))
            .required_if_eq("metric", "holdings"),
    ]
}

fn migration_arg() -> clap::Arg {
    clap::Arg::new("migration-id")
        .long("migration-id")
        .help("Migration id passed through to the Gateway")
        .required(true)
        .value_parser(clap::value_parser!(u64))
}

fn output_arg() -> clap::Arg {
    clap::Arg::new("output")
        .short('o')
        .long("output")
        .help("Path of the CSV file to write")
        .required(true)
        .value_parser(clap::value_parser!(std::path::PathBuf))
}

/// Builds the `clap` command tree.
pub fn command() -> clap::Command {
    clap::Command::new("scan-ledger-export")
        .version("0.1.0")
        .about("Derive month boundaries, balance series and flat activity exports from a Scan service")
        .subcommand_required(true)
        .arg(
            clap::Arg::new("url")
                .long("url")
                .help("Scan base URL")
                .env("SCAN_URL")
                .global(true),
        )
        .arg(
            clap::Arg::new("token")
                .long("token")
                .help("Bearer token")
                .env("SCAN_TOKEN")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            clap::Arg::new("timeout")
                .long("timeout")
                .help("HTTP timeout in seconds")
                .default_value("30")
                .value_parser(clap::builder::ValueParser::new(parse_u64_positive))
                .global(true),
        )
        .arg(
            clap::Arg::new("window")
                .long("window")
                .help("Rounds per round-totals request")
                .default_value("200")
                .value_parser(clap::builder::ValueParser::new(parse_u64_positive))
                .global(true),
        )
        .arg(
            clap::Arg::new("time-fields")
                .long("time-fields")
                .help("Effective-time field names, highest priority first")
                .value_delimiter(',')
                .action(clap::ArgAction::Append)
                .default_values(["closed_round_effective_at", "effectiveAt", "effective_at"])
                .global(true),
        )
        .arg(
            clap::Arg::new("unknown-probe")
                .long("unknown-probe")
                .help("How the month search treats rounds without a time")
                .value_parser(["advance-right", "advance-left"])
                .default_value("advance-right")
                .global(true),
        )
        .subcommand(
            clap::Command::new("month-rounds")
                .about("First and last round of a calendar month")
                .args(month_args()),
        )
        .subcommand(
            clap::Command::new("balance-series")
                .about("Per-round series for a party over a round range")
                .arg(party_arg(false))
                .arg(
                    clap::Arg::new("first")
                        .long("first")
                        .required(true)
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    clap::Arg::new("last")
                        .long("last")
                        .required(true)
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(step_arg())
                .args(metric_args())
                .arg(csv_flag()),
        )
        .subcommand(
            clap::Command::new("month-series")
                .about("Per-round series for a party across a calendar month")
                .arg(party_arg(false))
                .args(month_args())
                .arg(step_arg())
                .args(metric_args())
                .arg(csv_flag()),
        )
        .subcommand(
            clap::Command::new("month-balances")
                .about("Balances at the first and last round of a month")
                .arg(party_arg(true))
                .args(month_args())
                .args(metric_args())
                .arg(csv_path()),
        )
        .subcommand(
            clap::Command::new("latest-balance")
                .about("Wallet balance at the latest closed round")
                .arg(party_arg(false)),
        )
        .subcommand(
            clap::Command::new("recent-balances")
                .about("Wallet balances over the last N rounds")
                .arg(party_arg(false))
                .arg(
                    clap::Arg::new("count")
                        .long("count")
                        .default_value("10")
                        .value_parser(clap::builder::ValueParser::new(parse_u64_positive)),
                )
                .arg(csv_flag()),
        )
        .subcommand(
            clap::Command::new("holdings-month")
                .about("Holdings at the start and end snapshot of each month")
                .arg(migration_arg())
                .arg(party_arg(true))
                .arg(
                    clap::Arg::new("for")
                        .long("for")
                        .help("Month as YYYY-MM; repeatable")
                        .required(true)
                        .action(clap::ArgAction::Append)
                        .value_parser(clap::builder::ValueParser::new(parse_year_month)),
                )
                .arg(csv_path()),
        )
        .subcommand(
            clap::Command::new("holdings-now")
                .about("Holdings at the latest snapshot and round")
                .arg(migration_arg())
                .arg(party_arg(true).required(false)),
        )
        .subcommand(
            clap::Command::new("export-activities")
                .about("Flatten the activity feed newer than a cutoff into a CSV file")
                .arg(
                    clap::Arg::new("after")
                        .long("after")
                        .help("Cutoff timestamp (RFC 3339; no offset means UTC)")
                        .required(true),
                )
                .arg(output_arg())
                .arg(
                    clap::Arg::new("page-size")
                        .long("page-size")
                        .default_value("1000")
                        .value_parser(clap::builder::ValueParser::new(parse_usize_positive)),
                ),
        )
        .subcommand(
            clap::Command::new("export-round-party-totals")
                .about("Stream round party totals up to the latest round into a CSV file")
                .arg(output_arg())
                .arg(
                    clap::Arg::new("start-round")
                        .long("start-round")
                        .default_value("0")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    clap::Arg::new("batch")
                        .long("batch")
                        .default_value("50")
                        .value_parser(clap::builder::ValueParser::new(parse_u64_positive)),
                ),
        )
}

fn one<T: Clone + Send + Sync + 'static>(m: &clap::ArgMatches, id: &str) -> anyhow::Result<T> {
    m.get_one::<T>(id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing argument --{}", id))
}

fn many(m: &clap::ArgMatches, id: &str) -> Vec<String> {
    m.get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn month_of(m: &clap::ArgMatches) -> anyhow::Result<(i32, u32)> {
    Ok((one::<i32>(m, "year")?, one::<u32>(m, "month")?))
}

fn metric_of(m: &clap::ArgMatches) -> anyhow::Result<series::SeriesMetric> {
    match one::<String>(m, "metric")?.as_str() {
        "holdings" => Ok(series::SeriesMetric::HoldingsTotal {
            migration_id: one::<u64>(m, "migration-id")?,
        }),
        _ => Ok(series::SeriesMetric::WalletBalance),
    }
}

impl Args {
    /// Parses command-line arguments using `clap`.
    ///
    /// # Returns
    /// * `Args` - Struct containing parsed arguments.
    ///
    /// # Errors
    /// * Exits with a usage message if required arguments are missing or invalid.
    pub fn parse() -> anyhow::Result<Self> {
        Self::from_matches(&command().get_matches())
    }

    /// Converts already-parsed matches into [`Args`].
    pub fn from_matches(matches: &clap::ArgMatches) -> anyhow::Result<Self> {
        let (name, m) = matches
            .subcommand()
            .ok_or_else(|| anyhow::anyhow!("No subcommand given"))?;

        let command = match name {
            "month-rounds" => Command::MonthRounds { month: month_of(m)? },
            "balance-series" => Command::BalanceSeries {
                party: one(m, "party")?,
                first: one(m, "first")?,
                last: one(m, "last")?,
                step: one(m, "step")?,
                metric: metric_of(m)?,
                csv: m.get_one::<String>("csv").cloned(),
            },
            "month-series" => Command::MonthSeries {
                party: one(m, "party")?,
                month: month_of(m)?,
                step: one(m, "step")?,
                metric: metric_of(m)?,
                csv: m.get_one::<String>("csv").cloned(),
            },
            "month-balances" => Command::MonthBalances {
                parties: many(m, "party"),
                month: month_of(m)?,
                metric: metric_of(m)?,
                csv: m.get_one::<std::path::PathBuf>("csv").cloned(),
            },
            "latest-balance" => Command::LatestBalance {
                party: one(m, "party")?,
            },
            "recent-balances" => Command::RecentBalances {
                party: one(m, "party")?,
                count: one(m, "count")?,
                csv: m.get_one::<String>("csv").cloned(),
            },
            "holdings-month" => Command::HoldingsMonth {
                migration_id: one(m, "migration-id")?,
                parties: many(m, "party"),
                months: m
                    .get_many::<(i32, u32)>("for")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
                csv: m.get_one::<std::path::PathBuf>("csv").cloned(),
            },
            "holdings-now" => {
                let parties = many(m, "party");
                Command::HoldingsNow {
                    migration_id: one(m, "migration-id")?,
                    parties: if parties.is_empty() { None } else { Some(parties) },
                }
            }
            "export-activities" => Command::ExportActivities {
                after: one(m, "after")?,
                output: one(m, "output")?,
                page_size: one(m, "page-size")?,
            },
            "export-round-party-totals" => Command::ExportRoundPartyTotals {
                output: one(m, "output")?,
                start_round: one(m, "start-round")?,
                batch: one(m, "batch")?,
            },
            other => return Err(anyhow::anyhow!("Unknown subcommand {}", other)),
        };

        let unknown_probe = one::<String>(matches, "unknown-probe")?
            .parse::<resolver::UnknownProbePolicy>()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(Args {
            url: matches.get_one::<String>("url").cloned(),
            token: matches.get_one::<String>("token").cloned(),
            timeout_secs: one(matches, "timeout")?,
            window: one(matches, "window")?,
            time_fields: many(matches, "time-fields"),
            unknown_probe,
            command,
        })
    }
}

/// Validates that the value is a positive integer.
fn parse_u64_positive(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(0) => Err("Must be a positive integer".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("Not a valid number: {}", e)),
    }
}

fn parse_usize_positive(s: &str) -> Result<usize, String> {
    parse_u64_positive(s).map(|n| n as usize)
}

/// Parses `YYYY-MM` into a (year, month) pair.
fn parse_year_month(s: &str) -> Result<(i32, u32), String> {
    let (year, month) = s
        .split_once('-')
        .ok_or_else(|| format!("Expected YYYY-MM, got '{}'", s))?;
    let year = year.parse::<i32>().map_err(|e| format!("Bad year in '{}': {}", s, e))?;
    let month = month.parse::<u32>().map_err(|e| format!("Bad month in '{}': {}", s, e))?;
    if !(1..=12).contains(&month) {
        return Err(format!("Month out of range in '{}'", s));
    }
    Ok((year, month))
}
