use crate::error;
use crate::gateway;

/// Thin blocking HTTP adapter over the Scan REST API.
///
/// Responses are decoded with serde; non-success statuses surface as
/// `ScanError::Upstream`. There is no retry or backoff at this layer.
pub struct HttpGateway {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(serde::Deserialize)]
struct EntriesResponse {
    #[serde(default)]
    entries: Vec<gateway::RoundEntry>,
}

impl HttpGateway {
    /// Builds a client for `base_url`, attaching `token` as a bearer token when present.
    ///
    /// # Arguments
    /// * `base_url` - Scan base URL, with or without a trailing slash.
    /// * `token` - Optional bearer token.
    /// * `timeout` - Per-request timeout.
    ///
    /// # Returns
    /// * `error::Result<HttpGateway>` - Ready client or a builder error.
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: std::time::Duration,
    ) -> error::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token {
            let value = format!("Bearer {}", token);
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&value) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            } else {
                log::warn!("Ignoring token that is not a valid header value");
            }
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> error::Result<T> {
        log::debug!("GET {} {:?}", path, query);
        let body = self
            .client
            .get(self.url(path))
            .query(query)
            .send()?
            .error_for_status()?
            .text()?;
        Ok(serde_json::from_str(&body)?)
    }

    fn post<B: serde::Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> error::Result<T> {
        log::debug!("POST {}", path);
        let body = self
            .client
            .post(self.url(path))
            .json(body)
            .send()?
            .error_for_status()?
            .text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl gateway::Gateway for HttpGateway {
    fn latest_round(&self) -> error::Result<gateway::LatestRound> {
        self.get("/v0/round-of-latest-data", &[])
    }

    fn round_totals(&self, start: u64, end: u64) -> error::Result<Vec<gateway::RoundEntry>> {
        let body = serde_json::json!({ "start_round": start, "end_round": end });
        let response: EntriesResponse = self.post("/v0/round-totals", &body)?;
        Ok(response.entries)
    }

    fn round_party_totals(&self, start: u64, end: u64) -> error::Result<Vec<gateway::RoundEntry>> {
        let body = serde_json::json!({ "start_round": start, "end_round": end });
        let response: EntriesResponse = self.post("/v0/round-party-totals", &body)?;
        Ok(response.entries)
    }

    fn wallet_balance(&self, party_id: &str, round: u64) -> error::Result<gateway::WalletBalance> {
        self.get(
            "/v0/wallet-balance",
            &[
                ("party_id", party_id.to_string()),
                ("asOfEndOfRound", round.to_string()),
            ],
        )
    }

    fn holdings_summary(
        &self,
        request: &gateway::HoldingsSummaryRequest,
    ) -> error::Result<gateway::HoldingsSummary> {
        self.post("/v0/holdings/summary", request)
    }

    fn acs_snapshot_timestamp(
        &self,
        before: &str,
        migration_id: u64,
    ) -> error::Result<gateway::AcsSnapshotTimestamp> {
        self.get(
            "/v0/state/acs/snapshot-timestamp",
            &[
                ("before", before.to_string()),
                ("migration_id", migration_id.to_string()),
            ],
        )
    }

    fn activities(
        &self,
        page_size: usize,
        begin_after_id: &str,
    ) -> error::Result<gateway::ActivityPage> {
        let body = serde_json::json!({ "page_size": page_size, "begin_after_id": begin_after_id });
        self.post("/v0/activities", &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let gw = HttpGateway::new("https://scan.example/api/scan/", None, std::time::Duration::from_secs(1))
            .unwrap();
        assert_eq!(gw.url("/v0/round-totals"), "https://scan.example/api/scan/v0/round-totals");
    }

    #[test]
    fn holdings_request_omits_absent_fields() {
        let request = gateway::HoldingsSummaryRequest {
            migration_id: 4,
            as_of_round: Some(12),
            ..Default::default()
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, serde_json::json!({ "migration_id": 4, "as_of_round": 12 }));
    }

    #[test]
    fn latest_round_accepts_both_spellings() {
        let a: gateway::LatestRound =
            serde_json::from_str(r#"{"round": 7, "effectiveAt": "2024-01-01T00:00:00Z"}"#).unwrap();
        let b: gateway::LatestRound =
            serde_json::from_str(r#"{"round": 7, "effective_at": "2024-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(a, b);
        let missing: gateway::LatestRound = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.round, None);
    }
}
