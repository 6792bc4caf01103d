//! Server-push subscriptions over `text/event-stream`.

mod connector;
mod event;
mod manager;
mod sse;

pub use connector::{PushConnector, PushStream, SseConnector};
pub use event::{
    ConnectionState, DEFAULT_EVENT_KIND, EventKind, PushEvent, SubscriptionEvent,
    SubscriptionFailure, Topic, kinds,
};
pub use manager::{PushHandler, Subscription, SubscriptionHandle, SubscriptionManager};
pub use sse::{SseDecoder, SseFrame};
