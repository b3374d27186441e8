//! HTTP transport module for the ticketing service.
//!
//! This module provides the `ApiClient` used by the session, ticket and
//! checkout components, and the `ApiError` taxonomy every one of them
//! reports failures through.

pub mod client;
pub mod error;

pub use client::{
    ApiClient, ApiResponse, RequestBody, RequestOptions, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS,
};
pub use error::ApiError;
