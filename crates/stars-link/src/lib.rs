//! # stars-link
//!
//! Client library for the stars tourism service.
//!
//! - [`auth::AuthPipeline`]: attaches the stored bearer token to every
//!   authorized request; when the server reports the access token expired it
//!   renews the pair once, however many requests noticed, and replays each
//!   affected request with the new token.
//! - [`push::SubscriptionManager`]: one server-sent-events connection per
//!   topic, shared by every subscription on it, with exponential-backoff
//!   reconnects.
//! - [`api::PlacesApi`]: public place listing and search endpoints.
//! - [`StarsClient`]: wires all of the above onto one HTTP client.
//!
//! ```no_run
//! use stars_link::{CredentialStore, LinkConfig, StarsClient};
//! use stars_link::push::{Topic, kinds};
//!
//! # async fn run() -> stars_link::Result<()> {
//! let client = StarsClient::new(LinkConfig::default(), CredentialStore::in_memory(None))?;
//! let mut updates = client
//!     .subscriptions()
//!     .subscribe(&Topic::congestion(), kinds::CONGESTION_UPDATE);
//! while let Some(event) = updates.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod push;

pub use client::StarsClient;
pub use config::{LinkConfig, ReconnectConfig};
pub use credentials::{Credential, CredentialStore, FileCredentialPersistence};
pub use error::{LinkError, Result};
