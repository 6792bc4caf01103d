use std::sync::Arc;

use reqwest::Client;
use rustls::ClientConfig;
use rustls::crypto::aws_lc_rs;
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::info;

use crate::api::PlacesApi;
use crate::auth::{AuthPipeline, HttpTransport, ReqwestTransport, TokenRenewer};
use crate::config::LinkConfig;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::push::{PushConnector, SseConnector, SubscriptionManager};

/// Build the shared HTTP client.
///
/// No overall timeout is set on the client; push streams stay open
/// indefinitely and request timeouts are applied per call instead.
pub fn build_http_client(config: &LinkConfig) -> Result<Client> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_platform_verifier()?
        .with_no_client_auth();

    let client = Client::builder()
        .use_preconfigured_tls(tls_config)
        .connect_timeout(config.connect_timeout())
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}

/// Entry point wiring the credential store, request pipeline, push
/// subscriptions and place endpoints onto one HTTP client.
#[derive(Clone)]
pub struct StarsClient {
    config: LinkConfig,
    store: Arc<CredentialStore>,
    pipeline: Arc<AuthPipeline>,
    subscriptions: SubscriptionManager,
    places: PlacesApi,
}

impl StarsClient {
    pub fn new(config: LinkConfig, store: CredentialStore) -> Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self::with_client(config, store, client))
    }

    /// Use an existing `reqwest` client. It must not have an overall timeout.
    pub fn with_client(config: LinkConfig, store: CredentialStore, client: Client) -> Self {
        let base_url = config.base_url().to_string();
        let transport: Arc<dyn HttpTransport> = Arc::new(
            ReqwestTransport::new(client.clone()).with_timeout(config.request_timeout()),
        );
        let connector: Arc<dyn PushConnector> =
            Arc::new(SseConnector::new(client.clone(), base_url.clone()));
        let places = PlacesApi::new(client, base_url.clone()).with_timeout(config.request_timeout());

        Self::from_parts(config, store, transport, connector, places)
    }

    /// Assemble a client from custom transport and connector implementations.
    pub fn from_parts(
        config: LinkConfig,
        store: CredentialStore,
        transport: Arc<dyn HttpTransport>,
        connector: Arc<dyn PushConnector>,
        places: PlacesApi,
    ) -> Self {
        let base_url = config.base_url().to_string();
        let store = Arc::new(store);
        let renewer = Arc::new(TokenRenewer::new(
            Arc::clone(&transport),
            base_url.clone(),
            config.renewal_timeout(),
        ));
        let pipeline = Arc::new(AuthPipeline::new(
            base_url,
            transport,
            renewer,
            Arc::clone(&store),
        ));
        let subscriptions = SubscriptionManager::new(connector, config.reconnect);

        info!(host = %config.base_url(), "Client ready");
        Self {
            config,
            store,
            pipeline,
            subscriptions,
            places,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &AuthPipeline {
        &self.pipeline
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn places(&self) -> &PlacesApi {
        &self.places
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.store
    }

    /// Forget the stored credential.
    pub async fn logout(&self) -> Result<()> {
        info!("Logging out");
        self.store.clear().await
    }
}

impl std::fmt::Debug for StarsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarsClient")
            .field("host", &self.config.base_url())
            .field("authenticated", &self.store.is_authenticated())
            .finish()
    }
}
