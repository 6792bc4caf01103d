use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::debug;

use super::event::Topic;
use super::sse::{SseDecoder, SseFrame};
use crate::error::{LinkError, Result};

/// Frames of one open push connection. The stream ending, or yielding an
/// error, means the connection was lost.
pub type PushStream = BoxStream<'static, Result<SseFrame>>;

/// Opens push connections for topics.
#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    async fn connect(&self, topic: &Topic) -> Result<PushStream>;
}

/// [`PushConnector`] reading server-sent events over HTTP.
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: Client,
    base_url: String,
}

impl SseConnector {
    /// `client` must not carry an overall request timeout, or streams get cut
    /// off when it elapses.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, topic: &Topic) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), topic.path())
    }
}

#[async_trait]
impl PushConnector for SseConnector {
    async fn connect(&self, topic: &Topic) -> Result<PushStream> {
        let url = self.url_for(topic);
        debug!(topic = %topic, %url, "Opening event stream");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LinkError::Status { status, body });
        }

        Ok(decode_frames(response.bytes_stream()))
    }
}

/// Run a body chunk stream through an [`SseDecoder`].
fn decode_frames<S, E>(chunks: S) -> PushStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<LinkError>,
{
    let mut decoder = SseDecoder::new();
    chunks
        .flat_map(move |chunk| {
            let items: Vec<Result<SseFrame>> = match chunk {
                Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e.into())],
            };
            stream::iter(items)
        })
        .boxed()
}
