mod activity_export;
mod cli;
mod config;
mod csv_output;
mod error;
mod gateway;
mod holdings;
mod http_gateway;
mod progress;
mod resolver;
mod round_party_export;
mod series;
mod time_index;

use anyhow::Context;

/// Prints a result as pretty JSON on stdout.
fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    anyhow::Ok(())
}

/// Resolves the `--csv` value of a series command: an empty value means the default name.
fn series_path(csv: &Option<String>, default_name: String) -> Option<std::path::PathBuf> {
    csv.as_ref().map(|p| {
        if p.is_empty() {
            std::path::PathBuf::from(default_name)
        } else {
            std::path::PathBuf::from(p)
        }
    })
}

fn target_month((year, month): (i32, u32)) -> anyhow::Result<resolver::TargetMonth> {
    Ok(resolver::TargetMonth::new(year, month)?)
}

/// Runs one subcommand against `gateway`.
///
/// # Arguments
/// * `gateway` - Scan Gateway to query.
/// * `config` - Shared settings (window size, time fields, probe policy).
/// * `command` - Parsed subcommand.
///
/// # Returns
/// * `anyhow::Result<()>` - Success or the first failing step with context.
fn run<G: gateway::Gateway>(gateway: &G, config: &config::Config, command: cli::Command) -> anyhow::Result<()> {
    let resolver = resolver::MonthRoundResolver::new(gateway)
        .with_policy(config.unknown_probe)
        .with_window(config.window)
        .with_fields(config.time_fields.clone());
    let series_for = |metric| {
        series::RangeSeriesBuilder::new(gateway, metric)
            .with_window(config.window)
            .with_fields(config.time_fields.clone())
    };

    match command {
        cli::Command::MonthRounds { month } => {
            let month = target_month(month)?;
            let boundary = resolver
                .resolve(month)
                .with_context(|| format!("Failed to resolve rounds for {}", month))?;
            if boundary.is_none() {
                log::warn!("⚠️ No rounds found for {}", month);
            }
            print_json(&boundary)?;
        }
        cli::Command::BalanceSeries { party, first, last, step, metric, csv } => {
            let builder = series_for(metric);
            let samples = builder.build(&party, first, last, step)?;
            let default_name = format!("wallet_balances_{}_{}_{}.csv", series::party_short(&party), first, last);
            match series_path(&csv, default_name) {
                Some(path) => builder.write_csv(&path, &samples)?,
                None => print_json(&samples)?,
            }
        }
        cli::Command::MonthSeries { party, month, step, metric, csv } => {
            let month = target_month(month)?;
            let builder = series_for(metric);
            let samples = builder.build_for_month(&resolver, &party, month, step)?;
            if samples.is_empty() {
                log::warn!("⚠️ No rounds found for {}", month);
            }
            let default_name = format!(
                "wallet_balances_{}_{}_{:02}.csv",
                series::party_short(&party),
                month.year(),
                month.month()
            );
            match series_path(&csv, default_name) {
                Some(path) => builder.write_csv(&path, &samples)?,
                None => print_json(&samples)?,
            }
        }
        cli::Command::MonthBalances { parties, month, metric, csv } => {
            let month = target_month(month)?;
            let rows = series_for(metric).month_endpoints(&resolver, &parties, month)?;
            match csv {
                Some(path) => csv_output::write_rows(&path, &series::MONTH_ENDPOINT_COLUMNS, &rows)?,
                None => print_json(&rows)?,
            }
        }
        cli::Command::LatestBalance { party } => {
            print_json(&series::latest_balance(gateway, &party)?)?;
        }
        cli::Command::RecentBalances { party, count, csv } => {
            let builder = series_for(series::SeriesMetric::WalletBalance);
            let samples = builder.recent(&party, count)?;
            let default_name = format!("wallet_balance_last_{}_rounds_{}.csv", count, series::party_short(&party));
            match series_path(&csv, default_name) {
                Some(path) => builder.write_csv(&path, &samples)?,
                None => print_json(&samples)?,
            }
        }
        cli::Command::HoldingsMonth { migration_id, parties, months, csv } => {
            let months = months
                .into_iter()
                .map(target_month)
                .collect::<anyhow::Result<Vec<_>>>()?;
            let rows = holdings::holdings_for_months(gateway, migration_id, &parties, &months)?;
            match csv {
                Some(path) => {
                    csv_output::write_rows(&path, &holdings::HOLDINGS_MONTH_COLUMNS, &rows)?;
                    log::info!("Wrote holdings summary for {} month(s) to {}", months.len(), path.display());
                }
                None => print_json(&rows)?,
            }
        }
        cli::Command::HoldingsNow { migration_id, parties } => {
            let summary = holdings::holdings_now(gateway, migration_id, parties, chrono::Utc::now())?;
            print_json(&summary)?;
        }
        cli::Command::ExportActivities { after, output, page_size } => {
            let cutoff = activity_export::Cutoff::parse(&after)?;
            let summary = activity_export::ActivityExporter::new(gateway)
                .with_page_size(page_size)
                .export(&cutoff, &output)
                .with_context(|| format!("Failed to export activities to {}", output.display()))?;
            print_json(&summary)?;
        }
        cli::Command::ExportRoundPartyTotals { output, start_round, batch } => {
            let written = round_party_export::export_round_party_totals(
                gateway,
                &output,
                start_round,
                batch,
                config.window,
                config.time_fields.clone(),
            )
            .with_context(|| format!("Failed to export round party totals to {}", output.display()))?;
            log::info!("Wrote {} entries to {}", written, output.display());
        }
    }
    anyhow::Ok(())
}

/// Main entry point of the application.
///
/// This function orchestrates the entire workflow:
/// 1. Loads `.env` and initialises logging.
/// 2. Parses command-line arguments and builds the configuration.
/// 3. Connects the HTTP Gateway.
/// 4. Runs the selected subcommand.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Success or an error if any step fails.
fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let total_start = std::time::Instant::now();
    let args = cli::Args::parse()?;
    let config = config::Config::from_args(&args)?;
    log::info!("🚀 Using Scan at {}", config.url);

    let gateway = http_gateway::HttpGateway::new(&config.url, config.token.as_deref(), config.timeout)
        .context("Failed to build HTTP client")?;
    run(&gateway, &config, args.command)?;

    log::info!("✅ Completed in {:?} seconds", total_start.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeGateway;

    fn config() -> config::Config {
        config::Config {
            url: "http://unused".into(),
            token: None,
            timeout: std::time::Duration::from_secs(1),
            window: 200,
            time_fields: time_index::EffectiveTimeFields::default(),
            unknown_probe: resolver::UnknownProbePolicy::AdvanceRight,
        }
    }

    #[test]
    fn series_command_writes_named_file() {
        let gw = FakeGateway::new()
            .with_round(50, "2024-04-30T19:00:00Z")
            .with_balance("alice::1", 50, "100.0");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.csv");
        run(
            &gw,
            &config(),
            cli::Command::BalanceSeries {
                party: "alice::1".into(),
                first: 50,
                last: 50,
                step: 1,
                metric: series::SeriesMetric::WalletBalance,
                csv: Some(path.to_string_lossy().into_owned()),
            },
        )
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "round,effective_time,wallet_balance\n50,2024-04-30T19:00:00Z,100.0\n"
        );
    }

    #[test]
    fn default_series_name_is_used_for_bare_flag() {
        assert_eq!(
            series_path(&Some(String::new()), "x.csv".into()),
            Some(std::path::PathBuf::from("x.csv"))
        );
        assert_eq!(series_path(&None, "x.csv".into()), None);
    }

    #[test]
    fn month_rounds_without_latest_round_fails() {
        let gw = FakeGateway::new();
        let err = run(&gw, &config(), cli::Command::MonthRounds { month: (2024, 4) }).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<error::ScanError>(),
            Some(error::ScanError::LatestRoundUnavailable)
        ));
    }
}
