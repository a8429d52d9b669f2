//! HTTP transport for the API host
//!
//! [`HttpClient`] wraps `reqwest` and drives the session's request and
//! response stages for every call.

pub mod client;

pub use client::{ApiClientConfig, HttpClient, HttpClientBuilder, DEFAULT_REQUEST_TIMEOUT};
