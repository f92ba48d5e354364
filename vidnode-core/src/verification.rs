use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::TurnstileConfig;
use crate::{Error, Result};

/// Checks a human-verification token submitted with a chat message.
#[async_trait]
pub trait HumanVerifier: Send + Sync {
    /// Whether clients must attach a token at all.
    fn is_enabled(&self) -> bool;

    fn site_key(&self) -> &str;

    /// `Ok(false)` is a well-formed rejection, `Err` a failure to ask.
    async fn verify(&self, token: &str) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Cloudflare Turnstile `siteverify` client
#[derive(Clone)]
pub struct TurnstileVerifier {
    client: reqwest::Client,
    config: TurnstileConfig,
}

impl TurnstileVerifier {
    pub fn new(config: TurnstileConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl HumanVerifier for TurnstileVerifier {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn site_key(&self) -> &str {
        &self.config.site_key
    }

    async fn verify(&self, token: &str) -> Result<bool> {
        if !self.config.enabled {
            return Ok(true);
        }
        if token.is_empty() {
            return Ok(false);
        }

        let response = self
            .client
            .post(&self.config.verify_url)
            .form(&[
                ("secret", self.config.secret_key.as_str()),
                ("response", token),
            ])
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("turnstile request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "turnstile returned HTTP {}",
                response.status()
            )));
        }

        let body: SiteVerifyResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("turnstile response malformed: {e}")))?;

        if !body.success {
            tracing::debug!(error_codes = ?body.error_codes, "Turnstile rejected token");
        }
        Ok(body.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> TurnstileConfig {
        TurnstileConfig {
            enabled: true,
            site_key: "site".to_string(),
            secret_key: "shh".to_string(),
            verify_url: format!("{}/siteverify", server.uri()),
        }
    }

    #[tokio::test]
    async fn test_accepts_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .and(body_string_contains("response=good-token"))
            .and(body_string_contains("secret=shh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = TurnstileVerifier::new(config_for(&server)).unwrap();
        assert!(verifier.verify("good-token").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error-codes": ["invalid-input-response"]
            })))
            .mount(&server)
            .await;

        let verifier = TurnstileVerifier::new(config_for(&server)).unwrap();
        assert!(!verifier.verify("bad-token").await.unwrap());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let verifier = TurnstileVerifier::new(config_for(&server)).unwrap();
        assert!(matches!(
            verifier.verify("token").await,
            Err(Error::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_skips_network() {
        let verifier = TurnstileVerifier::new(TurnstileConfig::default()).unwrap();
        assert!(!verifier.is_enabled());
        assert!(verifier.verify("").await.unwrap());
    }
}
