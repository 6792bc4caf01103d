use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{Value, json};
use stars_link::auth::{
    AuthPipeline, HttpRequest, HttpResponse, HttpTransport, PendingRequest, RENEWAL_PATH,
    TokenRenewer,
};
use stars_link::credentials::{Credential, CredentialStore, FileCredentialPersistence};
use stars_link::error::{LinkError, REQUIRE_LOGIN, Result};

const BASE: &str = "http://stars.test";

#[derive(Debug, Clone)]
struct Seen {
    path: String,
    bearer: Option<String>,
}

struct ServerState {
    valid_access: Option<String>,
    refresh: String,
    generation: u32,
}

/// In-process stand-in for the API server.
///
/// Accepts only the access token it issued last and rotates the pair on every
/// renewal: the n-th renewal issues `A{n+1}`/`R{n+1}`.
struct FakeServer {
    state: Mutex<ServerState>,
    seen: Mutex<Vec<Seen>>,
    renewals: AtomicUsize,
    renew_delay: Duration,
    reject_all: bool,
    unreachable: bool,
}

impl FakeServer {
    /// Server whose current access token is `valid`, expecting refresh token `R1`.
    fn new(valid: Option<&str>) -> Self {
        Self {
            state: Mutex::new(ServerState {
                valid_access: valid.map(str::to_string),
                refresh: "R1".to_string(),
                generation: 1,
            }),
            seen: Mutex::new(Vec::new()),
            renewals: AtomicUsize::new(0),
            renew_delay: Duration::ZERO,
            reject_all: false,
            unreachable: false,
        }
    }

    fn with_renew_delay(mut self, delay: Duration) -> Self {
        self.renew_delay = delay;
        self
    }

    fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    fn data_calls_with(&self, bearer: &str) -> usize {
        self.seen()
            .iter()
            .filter(|s| s.path != RENEWAL_PATH && s.bearer.as_deref() == Some(bearer))
            .count()
    }

    async fn renew(&self, request: &HttpRequest) -> HttpResponse {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.renew_delay).await;

        let offered = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "refreshToken")
            .map(|(_, v)| v.into_owned());

        let mut state = self.state.lock();
        if offered.as_deref() != Some(state.refresh.as_str()) {
            return HttpResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"error": "ERROR_REFRESH_TOKEN"}),
            );
        }
        state.generation += 1;
        let access = format!("A{}", state.generation);
        let refresh = format!("R{}", state.generation);
        state.valid_access = Some(access.clone());
        state.refresh = refresh.clone();

        HttpResponse::json_body(
            StatusCode::OK,
            &json!({"accessToken": access, "refreshToken": refresh}),
        )
    }
}

#[async_trait]
impl HttpTransport for FakeServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let path = request.url.path().to_string();
        let bearer = request.bearer_token().map(str::to_string);
        self.seen.lock().push(Seen {
            path: path.clone(),
            bearer: bearer.clone(),
        });

        if self.unreachable {
            return Err(LinkError::transport("connection refused"));
        }
        if path == RENEWAL_PATH {
            return Ok(self.renew(&request).await);
        }

        let valid = self.state.lock().valid_access.clone();
        if self.reject_all || bearer.is_none() || bearer != valid {
            return Ok(HttpResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"error": "ERROR_ACCESS_TOKEN"}),
            ));
        }
        if path == "/missing" {
            return Ok(HttpResponse::json_body(
                StatusCode::NOT_FOUND,
                &json!({"error": "NOT_FOUND"}),
            ));
        }
        Ok(HttpResponse::json_body(
            StatusCode::OK,
            &json!({"path": path, "token": bearer}),
        ))
    }
}

fn credential(access: &str, refresh: &str) -> Credential {
    Credential::new(access, refresh).unwrap()
}

fn pipeline(server: &Arc<FakeServer>, store: CredentialStore) -> AuthPipeline {
    let transport: Arc<dyn HttpTransport> = server.clone();
    let renewer = Arc::new(TokenRenewer::new(
        Arc::clone(&transport),
        BASE,
        Duration::from_secs(10),
    ));
    AuthPipeline::new(BASE, transport, renewer, Arc::new(store))
}

#[tokio::test]
async fn valid_token_never_renews() {
    let server = Arc::new(FakeServer::new(Some("A1")));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let body: Value = pipeline.get_json("/user/info").await.unwrap();
    assert_eq!(body["token"], "A1");
    assert_eq!(server.renewals(), 0);
    assert_eq!(pipeline.renewals_started(), 0);
}

#[tokio::test]
async fn expired_token_is_renewed_and_replayed_once() {
    let server = Arc::new(FakeServer::new(None));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let body: Value = pipeline.get_json("/user/info").await.unwrap();
    assert_eq!(body["token"], "A2");

    assert_eq!(server.renewals(), 1);
    assert_eq!(pipeline.store().current(), Some(credential("A2", "R2")));
    assert_eq!(server.data_calls_with("A1"), 1);
    assert_eq!(server.data_calls_with("A2"), 1);

    let renewal = server
        .seen()
        .into_iter()
        .find(|s| s.path == RENEWAL_PATH)
        .unwrap();
    assert_eq!(renewal.bearer.as_deref(), Some("A1"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_expiries_share_one_renewal() {
    let server = Arc::new(FakeServer::new(None).with_renew_delay(Duration::from_millis(200)));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let requests: Vec<PendingRequest> = (0..8)
        .map(|i| PendingRequest::get(format!("/stars/{i}")))
        .collect();
    let results = join_all(requests.iter().map(|r| pipeline.execute(r))).await;

    for result in results {
        let response = result.unwrap();
        assert!(response.is_success());
        let body: Value = response.json().unwrap();
        assert_eq!(body["token"], "A2");
    }
    assert_eq!(server.renewals(), 1);
    assert_eq!(pipeline.renewals_started(), 1);
    assert_eq!(server.data_calls_with("A2"), 8);
    assert_eq!(pipeline.store().current(), Some(credential("A2", "R2")));
}

#[tokio::test]
async fn later_expiry_renews_again() {
    let server = Arc::new(FakeServer::new(None));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    pipeline.execute(&PendingRequest::get("/a")).await.unwrap();
    server.state.lock().valid_access = None;
    let body: Value = pipeline.get_json("/b").await.unwrap();

    assert_eq!(body["token"], "A3");
    assert_eq!(server.renewals(), 2);
}

#[tokio::test]
async fn replay_expiring_again_fails_without_looping() {
    let mut server = FakeServer::new(None);
    server.reject_all = true;
    let server = Arc::new(server);
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let err = pipeline
        .execute(&PendingRequest::get("/user/info"))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::RenewalFailed(_)), "{err:?}");
    assert!(err.requires_relogin());
    assert_eq!(server.renewals(), 1);
    assert_eq!(server.data_calls_with("A2"), 1);
}

#[tokio::test]
async fn missing_credential_fails_before_network() {
    let server = Arc::new(FakeServer::new(Some("A1")));
    let pipeline = pipeline(&server, CredentialStore::in_memory(None));

    let err = pipeline
        .execute(&PendingRequest::get("/user/info"))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Unauthenticated));
    assert!(server.seen().is_empty());

    let signal = err.signal_body().unwrap();
    assert_eq!(signal["response"]["data"]["error"], REQUIRE_LOGIN);
}

#[tokio::test]
async fn rejected_refresh_token_is_renewal_failure() {
    let server = Arc::new(FakeServer::new(None));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "stale"))),
    );

    let err = pipeline
        .execute(&PendingRequest::get("/user/info"))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::RenewalFailed(_)), "{err:?}");
    assert_eq!(pipeline.store().current(), Some(credential("A1", "stale")));
    assert_eq!(server.data_calls_with("A1"), 1);
}

#[tokio::test(start_paused = true)]
async fn renewal_timeout_is_renewal_failure() {
    let server = Arc::new(FakeServer::new(None).with_renew_delay(Duration::from_secs(60)));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let err = pipeline
        .execute(&PendingRequest::get("/user/info"))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::RenewalFailed(_)), "{err:?}");
    assert_eq!(pipeline.store().current(), Some(credential("A1", "R1")));

    // The failed flight is not reused by the next expiry.
    let _ = pipeline.execute(&PendingRequest::get("/user/info")).await;
    assert_eq!(server.renewals(), 2);
}

#[tokio::test(start_paused = true)]
async fn logout_during_renewal_is_not_undone() {
    let server = Arc::new(FakeServer::new(None).with_renew_delay(Duration::from_secs(1)));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let request = PendingRequest::get("/user/info");
    let (result, cleared) = tokio::join!(pipeline.execute(&request), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        pipeline.store().clear().await
    });

    cleared.unwrap();
    assert!(matches!(result, Err(LinkError::RenewalFailed(_))));
    assert_eq!(pipeline.store().current(), None);
    assert_eq!(server.data_calls_with("A2"), 0);
}

#[tokio::test]
async fn transport_errors_propagate_without_renewal() {
    let mut server = FakeServer::new(Some("A1"));
    server.unreachable = true;
    let server = Arc::new(server);
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let err = pipeline
        .execute(&PendingRequest::get("/user/info"))
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(server.renewals(), 0);
}

#[tokio::test]
async fn non_success_status_passes_through() {
    let server = Arc::new(FakeServer::new(Some("A1")));
    let pipeline = pipeline(
        &server,
        CredentialStore::in_memory(Some(credential("A1", "R1"))),
    );

    let response = pipeline
        .execute(&PendingRequest::get("/missing"))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let err = pipeline.get_json::<Value>("/missing").await.unwrap_err();
    assert!(
        matches!(err, LinkError::Status { status, .. } if status == StatusCode::NOT_FOUND),
        "{err:?}"
    );
}

#[tokio::test]
async fn renewed_credential_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    let persistence = Arc::new(FileCredentialPersistence::new(&path));
    let store = CredentialStore::open(persistence).await.unwrap();
    store.replace(credential("A1", "R1")).await.unwrap();

    let server = Arc::new(FakeServer::new(None));
    let pipeline = pipeline(&server, store);
    pipeline.execute(&PendingRequest::get("/user/info")).await.unwrap();

    let saved: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(saved["user"]["accessToken"], "A2");
    assert_eq!(saved["user"]["refreshToken"], "R2");
}
