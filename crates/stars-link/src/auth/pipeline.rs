//! Authenticated request pipeline.
//!
//! Every authorized call goes through [`AuthPipeline::execute`]:
//! 1. **Attach** the stored access token as bearer (fail fast when there is none)
//! 2. **Detect** the expired-token sentinel in the response body
//! 3. **Renew** through a single-flight renewal shared by all concurrent detectors
//! 4. **Replay** the original request once with the renewed token

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use super::renewal::TokenRenewer;
use super::request::{HttpResponse, PendingRequest};
use super::transport::HttpTransport;
use crate::credentials::{Credential, CredentialStore};
use crate::error::{LinkError, Result};

type RenewalOutcome = std::result::Result<Credential, String>;

/// A renewal that concurrent detectors can join.
#[derive(Clone)]
struct RenewalFlight {
    id: u64,
    /// Access token that was reported expired.
    stale_access: String,
    future: Shared<BoxFuture<'static, RenewalOutcome>>,
}

/// Attaches credentials to requests and renews them transparently.
pub struct AuthPipeline {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    renewer: Arc<TokenRenewer>,
    store: Arc<CredentialStore>,
    /// At most one renewal in flight.
    inflight: Mutex<Option<RenewalFlight>>,
    next_flight: AtomicU64,
    renewals_started: Arc<AtomicU64>,
}

impl AuthPipeline {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        renewer: Arc<TokenRenewer>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            renewer,
            store,
            inflight: Mutex::new(None),
            next_flight: AtomicU64::new(0),
            renewals_started: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Number of renewal round-trips started since construction.
    pub fn renewals_started(&self) -> u64 {
        self.renewals_started.load(Ordering::SeqCst)
    }

    /// Send `request` with the stored credential, renewing it once if the server
    /// reports it expired.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.path()))]
    pub async fn execute(&self, request: &PendingRequest) -> Result<HttpResponse> {
        let Some(credential) = self.store.current() else {
            warn!("No credential stored, login required");
            return Err(LinkError::Unauthenticated);
        };

        let response = self.send(request, &credential).await?;
        if !response.is_token_expired() {
            return Ok(response);
        }

        debug!("Access token reported expired");
        let renewed = self.renew_after_expiry(&credential).await?;

        let replay = self.send(request, &renewed).await?;
        if replay.is_token_expired() {
            error!("Replayed request rejected the renewed access token");
            return Err(LinkError::renewal(
                "replayed request still reports an expired access token",
            ));
        }
        Ok(replay)
    }

    /// Execute and decode a successful JSON body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: &PendingRequest) -> Result<T> {
        let response = self.execute(request).await?;
        if !response.is_success() {
            return Err(LinkError::Status {
                status: response.status,
                body: response.text(),
            });
        }
        response.json()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute_json(&PendingRequest::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute_json(&PendingRequest::post(path).json(body)?)
            .await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute_json(&PendingRequest::put(path).json(body)?)
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.execute(&PendingRequest::delete(path)).await
    }

    async fn send(&self, request: &PendingRequest, credential: &Credential) -> Result<HttpResponse> {
        let http_request = request.authorize(&self.base_url, credential.access_token())?;
        self.transport.send(http_request).await
    }

    /// Obtain a credential newer than `stale`, joining an in-flight renewal
    /// when there is one.
    async fn renew_after_expiry(&self, stale: &Credential) -> Result<Credential> {
        let flight = {
            let mut slot = self.inflight.lock();

            let current = self.store.current().ok_or(LinkError::Unauthenticated)?;
            if current.access_token() != stale.access_token() {
                debug!("Credential already renewed by a concurrent request");
                return Ok(current);
            }

            match slot.as_ref() {
                Some(flight) if flight.stale_access == stale.access_token() => {
                    debug!(flight = flight.id, "Joining in-flight renewal");
                    flight.clone()
                }
                _ => {
                    let flight = self.start_flight(current);
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let outcome = flight.future.clone().await;

        {
            let mut slot = self.inflight.lock();
            if slot.as_ref().is_some_and(|f| f.id == flight.id) {
                *slot = None;
            }
        }

        outcome.map_err(LinkError::RenewalFailed)
    }

    fn start_flight(&self, current: Credential) -> RenewalFlight {
        let id = self.next_flight.fetch_add(1, Ordering::SeqCst);
        let stale_access = current.access_token().to_string();
        let renewer = Arc::clone(&self.renewer);
        let store = Arc::clone(&self.store);
        let started = Arc::clone(&self.renewals_started);

        let future = async move {
            started.fetch_add(1, Ordering::SeqCst);
            info!(flight = id, "Renewing access token");

            let renewed = match renewer.renew(&current).await {
                Ok(renewed) => renewed,
                Err(e) => {
                    error!(flight = id, error = %e, "Access token renewal failed");
                    return Err(match e {
                        LinkError::RenewalFailed(reason) => reason,
                        other => other.to_string(),
                    });
                }
            };

            match store
                .replace_if_current(current.access_token(), renewed.clone())
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(flight = id, "Session changed while renewing; discarding result");
                    return Err("session changed during renewal".to_string());
                }
                Err(e) => {
                    warn!(flight = id, error = %e, "Renewed credential could not be persisted");
                }
            }

            info!(flight = id, "Access token renewed");
            Ok(renewed)
        }
        .boxed()
        .shared();

        RenewalFlight {
            id,
            stale_access,
            future,
        }
    }
}

impl std::fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("base_url", &self.base_url)
            .field("store", &self.store)
            .field("renewals_started", &self.renewals_started())
            .finish()
    }
}
