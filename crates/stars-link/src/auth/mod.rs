//! Bearer-authenticated requests with transparent token renewal.

mod pipeline;
mod renewal;
mod request;
mod transport;

pub use pipeline::AuthPipeline;
pub use renewal::{RENEWAL_PATH, TokenRenewer};
pub use request::{ERROR_ACCESS_TOKEN, HttpRequest, HttpResponse, PendingRequest};
pub use transport::{HttpTransport, ReqwestTransport};
