// API crate clippy configuration
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! tenlic API Library
//!
//! HTTP surface for the licensing service: the Stripe webhook endpoint,
//! the synchronous billing API, and the student verification workflow.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
