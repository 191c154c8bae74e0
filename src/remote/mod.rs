//! Remote query service boundary.
//!
//! - [`RemoteService`]: submit / poll / probe contract
//! - [`RemoteQueryClient`]: drives one query to completion with throttling-aware retries
//! - [`HttpRemoteService`]: reqwest implementation of the JSON protocol
//! - [`MockQueryServer`]: axum implementation of the same protocol for local runs

pub mod client;
pub mod http;
pub mod mock_server;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;

use crate::error::RemoteError;
use crate::models::{PollStatus, QueryHandle, RemoteReply};

pub use client::RemoteQueryClient;
pub use http::{HttpRemoteService, RemoteConfig};
pub use mock_server::{MockQueryServer, MockServerConfig};

/// A conversational query service: submit a query, then poll its handle.
pub trait RemoteService: Send + Sync + 'static {
    /// Start a query and obtain its handle
    fn submit(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<RemoteReply<QueryHandle>, RemoteError>> + Send;

    /// Check on a previously submitted query
    fn poll(
        &self,
        handle: &QueryHandle,
    ) -> impl Future<Output = Result<RemoteReply<PollStatus>, RemoteError>> + Send;

    /// Reachability check made once before any work is dispatched
    fn probe(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
