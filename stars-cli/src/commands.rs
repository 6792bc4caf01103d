use crate::cli::PlaceListing;
use crate::error::{AppError, Result};
use crate::output::{OutputManager, emit};
use reqwest::Method;
use serde_json::Value;
use stars_link::api::PlaceKind;
use stars_link::auth::PendingRequest;
use stars_link::credentials::mask;
use stars_link::push::{
    DEFAULT_EVENT_KIND, PushEvent, PushHandler, SubscriptionEvent, SubscriptionFailure, Topic,
};
use stars_link::{Credential, LinkError, StarsClient};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct CommandExecutor {
    client: StarsClient,
    output: OutputManager,
}

/// Forwards subscription callbacks into the command's event loop.
struct Forwarder {
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl PushHandler for Forwarder {
    fn on_event(&mut self, event: PushEvent) {
        let _ = self.tx.send(SubscriptionEvent::Event(event));
    }

    fn on_failure(&mut self, failure: &SubscriptionFailure) {
        let _ = self.tx.send(SubscriptionEvent::Failed(failure.clone()));
    }
}

impl CommandExecutor {
    pub fn new(client: StarsClient, output: OutputManager) -> Self {
        Self { client, output }
    }

    /// Follow `topic` until Ctrl-C or until its connection gives up.
    pub async fn watch(&self, topic: &str, events: &[String]) -> Result<()> {
        let topic = resolve_topic(topic)?;
        let kinds: Vec<String> = if events.is_empty() {
            let known = topic.known_kinds();
            if known.is_empty() {
                vec![DEFAULT_EVENT_KIND.to_string()]
            } else {
                known.iter().map(|k| k.to_string()).collect()
            }
        } else {
            events.to_vec()
        };

        let subscriptions = self.client.subscriptions();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handles: Vec<_> = kinds
            .iter()
            .map(|kind| {
                subscriptions.subscribe_with(&topic, kind.as_str(), Forwarder { tx: tx.clone() })
            })
            .collect();
        drop(tx);
        info!(topic = %topic, kinds = ?kinds, "Watching");

        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break Ok(());
                }
                event = rx.recv() => match event {
                    Some(SubscriptionEvent::Event(event)) => {
                        emit(&self.output.format_event(&event)?)?;
                    }
                    Some(SubscriptionEvent::Failed(failure)) => {
                        break Err(AppError::Link(LinkError::from(&failure)));
                    }
                    None => break Ok(()),
                }
            }
        };

        for handle in &handles {
            subscriptions.unsubscribe(handle);
        }
        result
    }

    /// Authorized pass-through request.
    pub async fn request(&self, method: &str, path: &str, body: Option<&str>) -> Result<()> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AppError::InvalidInput(format!("invalid HTTP method '{method}'")))?;

        let mut request = PendingRequest::new(method, path);
        if let Some(body) = body {
            let json: Value = serde_json::from_str(body)
                .map_err(|e| AppError::InvalidInput(format!("request body is not JSON: {e}")))?;
            request = request.json(&json)?;
        }

        let response = self.client.pipeline().execute(&request).await?;
        let rendered = match response.json::<Value>() {
            Ok(value) => self.output.format_value(&value)?,
            Err(_) => response.text(),
        };
        emit(&rendered)?;

        if !response.is_success() {
            return Err(LinkError::Status {
                status: response.status,
                body: response.text(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn places(&self, target: PlaceListing) -> Result<()> {
        let api = self.client.places();
        let value = match target {
            PlaceListing::Area => api.area_list().await?,
            PlaceListing::Events => api.event_list().await?,
            PlaceListing::Attraction => api.place_list(PlaceKind::Attraction).await?,
            PlaceListing::Restaurant => api.place_list(PlaceKind::Restaurant).await?,
            PlaceListing::Cafe => api.place_list(PlaceKind::Cafe).await?,
            PlaceListing::Accommodation => api.place_list(PlaceKind::Accommodation).await?,
        };
        emit(&self.output.format_value(&value)?)
    }

    pub async fn place(&self, kind: PlaceKind, id: &str) -> Result<()> {
        let value = self.client.places().place_detail(kind, id).await?;
        emit(&self.output.format_value(&value)?)
    }

    pub async fn area_places(&self, area_id: &str) -> Result<()> {
        let value = self.client.places().places_by_area(area_id).await?;
        emit(&self.output.format_value(&value)?)
    }

    pub async fn search(&self, query: &str, by_address: bool) -> Result<()> {
        let api = self.client.places();
        let results = if by_address {
            api.search_by_address(query).await?
        } else {
            api.search_by_keyword(query).await?
        };
        emit(&self.output.format_search_results(&results)?)
    }

    pub async fn login(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        let credential = Credential::new(access_token, refresh_token)?;
        self.client.credentials().replace(credential).await?;
        emit(&self.output.status("Credential stored"))
    }

    pub async fn logout(&self) -> Result<()> {
        if !self.client.credentials().is_authenticated() {
            warn!("No credential stored");
        }
        self.client.logout().await?;
        emit(&self.output.status("Logged out"))
    }

    pub fn whoami(&self) -> Result<()> {
        let line = match self.client.credentials().current() {
            Some(credential) => {
                let value = serde_json::json!({
                    "authenticated": true,
                    "accessToken": mask(credential.access_token()),
                    "refreshToken": mask(credential.refresh_token()),
                });
                self.output.format_value(&value)?
            }
            None => self.output.format_value(&serde_json::json!({"authenticated": false}))?,
        };
        emit(&line)
    }
}

/// Built-in topic by name, or a custom topic for a path starting with `/`.
pub fn resolve_topic(name: &str) -> Result<Topic> {
    if let Some(topic) = Topic::builtin(name) {
        return Ok(topic);
    }
    if name.starts_with('/') {
        let label = name.trim_matches('/').replace('/', "-");
        return Ok(Topic::new(label, name));
    }
    Err(AppError::InvalidInput(format!(
        "unknown topic '{name}', expected congestion, external or a path starting with '/'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_topic() {
        assert_eq!(resolve_topic("external").unwrap(), Topic::external());

        let custom = resolve_topic("/control/notice/stream").unwrap();
        assert_eq!(custom.name(), "control-notice-stream");
        assert_eq!(custom.path(), "/control/notice/stream");

        assert!(resolve_topic("weather").is_err());
    }
}
