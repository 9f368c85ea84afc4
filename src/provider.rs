//! HTTP client for an external rate provider.
//!
//! The provider receives `POST {endpoint}` with a JSON body
//! `{ "from": Address, "to": Address, "packages": [Package] }` and answers with
//! `{ "rates": [ProviderQuote] }`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Address;
use crate::rates::{Package, ProviderQuote, RateProvider, RateProviderError};

fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    format!("ship-it-now/{version} ({os}; {arch})")
}

#[derive(Serialize)]
struct EstimateRequest<'a> {
    from: &'a Address,
    to: &'a Address,
    packages: &'a [Package],
}

#[derive(Deserialize)]
struct EstimateResponse {
    #[serde(default)]
    rates: Vec<ProviderQuote>,
}

/// Rate provider reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRateProvider {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRateProvider {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RateProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|err| RateProviderError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_transport_error(&self, err: reqwest::Error) -> RateProviderError {
        if err.is_timeout() {
            RateProviderError::Timeout(self.timeout)
        } else {
            RateProviderError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn get_estimate(
        &self,
        from: &Address,
        to: &Address,
        packages: &[Package],
    ) -> Result<Vec<ProviderQuote>, RateProviderError> {
        let mut request = self.client.post(&self.endpoint).json(&EstimateRequest {
            from,
            to,
            packages,
        });
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.map_transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(_) => String::from("unreadable response"),
            };
            return Err(RateProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| self.map_transport_error(err))?;
        let parsed: EstimateResponse = serde_json::from_str(&body)
            .map_err(|err| RateProviderError::Decode(err.to_string()))?;

        tracing::debug!(endpoint = %self.endpoint, quotes = parsed.rates.len(), "rate provider answered");
        Ok(parsed.rates)
    }
}
