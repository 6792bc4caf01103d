//! Access token renewal.
//!
//! Exchanges the refresh token for a new access/refresh pair:
//! `GET <host>/user/refresh?refreshToken=<token>` authorized with the current
//! (expired) access token. Every failure mode, timeout included, is reported
//! as [`LinkError::RenewalFailed`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use super::request::PendingRequest;
use super::transport::HttpTransport;
use crate::credentials::{Credential, RenewalResult};
use crate::error::{LinkError, Result};

pub const RENEWAL_PATH: &str = "/user/refresh";

/// Performs the renewal round-trip.
pub struct TokenRenewer {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    timeout: Duration,
}

impl TokenRenewer {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request a new pair for `current`.
    #[instrument(skip_all, fields(timeout_ms = self.timeout.as_millis() as u64))]
    pub async fn renew(&self, current: &Credential) -> Result<Credential> {
        let request = PendingRequest::get(RENEWAL_PATH)
            .query("refreshToken", current.refresh_token())
            .authorize(&self.base_url, current.access_token())?;

        let response = match tokio::time::timeout(self.timeout, self.transport.send(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(LinkError::renewal(format!("request failed: {e}"))),
            Err(_) => {
                return Err(LinkError::renewal(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        if !response.is_success() {
            return Err(LinkError::renewal(format!(
                "server answered {}",
                response.status
            )));
        }
        if let Some(code) = response.error_code() {
            return Err(LinkError::renewal(format!("server reported {code}")));
        }

        let result: RenewalResult = response
            .json()
            .map_err(|e| LinkError::renewal(format!("unreadable renewal body: {e}")))?;
        let renewed = Credential::try_from(result)
            .map_err(|e| LinkError::renewal(format!("renewal returned {e}")))?;

        debug!("Renewal round-trip completed");
        Ok(renewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::request::{HttpRequest, HttpResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use serde_json::json;

    struct Canned {
        response: HttpResponse,
        delay: Duration,
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().push(request);
            tokio::time::sleep(self.delay).await;
            Ok(self.response.clone())
        }
    }

    fn renewer(response: HttpResponse, delay: Duration) -> (TokenRenewer, Arc<Canned>) {
        let transport = Arc::new(Canned {
            response,
            delay,
            seen: Mutex::new(Vec::new()),
        });
        (
            TokenRenewer::new(transport.clone(), "http://host", Duration::from_secs(5)),
            transport,
        )
    }

    #[tokio::test]
    async fn test_renewal_request_shape() {
        let body = json!({"accessToken": "A2", "refreshToken": "R2"});
        let (renewer, transport) =
            renewer(HttpResponse::json_body(StatusCode::OK, &body), Duration::ZERO);

        let renewed = renewer
            .renew(&Credential::new("A1", "R1").unwrap())
            .await
            .unwrap();
        assert_eq!(renewed, Credential::new("A2", "R2").unwrap());

        let seen = transport.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url.as_str(), "http://host/user/refresh?refreshToken=R1");
        assert_eq!(seen[0].bearer_token(), Some("A1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_timeout_is_failure() {
        let body = json!({"accessToken": "A2", "refreshToken": "R2"});
        let (renewer, _) =
            renewer(HttpResponse::json_body(StatusCode::OK, &body), Duration::from_secs(60));

        let err = renewer
            .renew(&Credential::new("A1", "R1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::RenewalFailed(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_renewal_error_body_is_failure() {
        let body = json!({"error": "ERROR_ACCESS_TOKEN"});
        let (renewer, _) = renewer(HttpResponse::json_body(StatusCode::OK, &body), Duration::ZERO);
        let err = renewer
            .renew(&Credential::new("A1", "R1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::RenewalFailed(_)));
    }

    #[tokio::test]
    async fn test_renewal_rejects_empty_tokens() {
        let body = json!({"accessToken": "", "refreshToken": "R2"});
        let (renewer, _) = renewer(HttpResponse::json_body(StatusCode::OK, &body), Duration::ZERO);
        let err = renewer
            .renew(&Credential::new("A1", "R1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::RenewalFailed(_)));
    }

    #[tokio::test]
    async fn test_renewal_bad_status_is_failure() {
        let (renewer, _) = renewer(
            HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            Duration::ZERO,
        );
        let err = renewer
            .renew(&Credential::new("A1", "R1").unwrap())
            .await
            .unwrap_err();
        assert!(err.requires_relogin());
    }
}
