use crate::cli;
use crate::resolver;
use crate::time_index;

/// Runtime settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub token: Option<String>,
    pub timeout: std::time::Duration,
    pub window: u64,
    pub time_fields: time_index::EffectiveTimeFields,
    pub unknown_probe: resolver::UnknownProbePolicy,
}

impl Config {
    /// Builds the configuration from parsed arguments.
    ///
    /// `--url` / `--token` fall back to `SCAN_URL` / `SCAN_TOKEN`, which may come
    /// from a `.env` file loaded before parsing.
    ///
    /// # Errors
    /// * If no Scan URL was given.
    pub fn from_args(args: &cli::Args) -> anyhow::Result<Self> {
        let url = args
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Scan URL must be set with --url or SCAN_URL"))?;
        let time_fields = if args.time_fields.is_empty() {
            time_index::EffectiveTimeFields::default()
        } else {
            time_index::EffectiveTimeFields::new(args.time_fields.iter().map(|f| f.trim().to_string()))
        };
        Ok(Self {
            url,
            token: args.token.clone().filter(|t| !t.is_empty()),
            timeout: std::time::Duration::from_secs(args.timeout_secs),
            window: args.window,
            time_fields,
            unknown_probe: args.unknown_probe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: Option<&str>) -> cli::Args {
        cli::Args {
            url: url.map(str::to_string),
            token: Some(String::new()),
            timeout_secs: 5,
            window: 100,
            time_fields: vec!["effective_at".into(), " effectiveAt".into()],
            unknown_probe: resolver::UnknownProbePolicy::AdvanceLeft,
            command: cli::Command::LatestBalance { party: "a".into() },
        }
    }

    #[test]
    fn url_is_required() {
        assert!(Config::from_args(&args(None)).is_err());
        assert!(Config::from_args(&args(Some("  "))).is_err());
    }

    #[test]
    fn settings_carry_over() {
        let config = Config::from_args(&args(Some("http://scan"))).unwrap();
        assert_eq!(config.token, None);
        assert_eq!(config.timeout, std::time::Duration::from_secs(5));
        assert_eq!(config.time_fields.names(), ["effective_at", "effectiveAt"]);
        assert_eq!(config.unknown_probe, resolver::UnknownProbePolicy::AdvanceLeft);
    }
}
