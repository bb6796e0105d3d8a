//! Secret handling utilities.
//!
//! Re-exports secrecy types and renders the bearer header value without
//! ever putting the token into a `Debug` or log line.

pub use secrecy::{ExposeSecret, SecretString};

/// Build the `Authorization` header value for a bearer token.
pub fn bearer_header(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}
