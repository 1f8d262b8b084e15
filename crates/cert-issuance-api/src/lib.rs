#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! HTTP surface for certificate issuance.
//!
//! Thin axum handlers over [`cert_issuance::Issuer`]: every route decodes
//! its request, calls one core operation and maps the result or error to
//! JSON.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
