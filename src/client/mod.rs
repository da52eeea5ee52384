//! Datadog API client.
//!
//! This module provides:
//! - The [`Transport`] seam between the client and the network
//! - [`HttpTransport`], the `reqwest` implementation
//! - [`DatadogClient`], which authenticates, maps errors and retries

mod api;
mod transport;

pub use api::{check_status, error_messages, DatadogClient, RetryPolicy, DEFAULT_API_URL};
pub use transport::{ApiRequest, ApiResponse, HttpMethod, HttpTransport, Transport};

#[cfg(test)]
pub use transport::MockTransport;
