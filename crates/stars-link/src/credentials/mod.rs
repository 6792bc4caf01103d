//! Session credential management.
//!
//! - [`Credential`]: the access/refresh token pair
//! - [`CredentialStore`]: injected, thread-safe holder with change notifications
//! - [`CredentialPersistence`]: durable backend, [`FileCredentialPersistence`] by default

mod store;
mod types;

pub use store::{CredentialPersistence, CredentialStore, DEFAULT_ENTRY, FileCredentialPersistence};
pub use types::{Credential, RenewalResult, mask};
