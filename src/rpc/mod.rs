//! Minimal request/response RPC over any [`Transport`](crate::transport::Transport).
//!
//! Calls are addressed as `"Service.Method"` and correlated by a sequence
//! number, so a client may keep several calls in flight on one stream.
//!
//! | Frame      | Direction        | Fields                              |
//! |------------|------------------|-------------------------------------|
//! | [`Request`]  | client → server | `seq`, `method`, `params`          |
//! | [`Response`] | server → client | `seq`, `method`, `result`/`error`  |
//!
//! The wire encoding is pluggable: any `tokio_util` codec satisfying
//! [`ServerCodec`] or [`ClientCodec`] can replace the default
//! [`JsonLinesCodec`].

pub mod client;
pub mod codec;
pub mod server;
pub mod service;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::RpcClient;
pub use codec::{ClientCodec, JsonLinesCodec, ServerCodec, MAX_LINE_BYTES};
pub use server::RpcServer;
pub use service::{MethodTable, Service};

/// A call from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation number, unique per client connection.
    pub seq: u64,
    /// Target in `Service.Method` form.
    pub method: String,
    /// Call argument.
    #[serde(default)]
    pub params: Value,
}

/// The server's answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number of the request being answered.
    pub seq: u64,
    /// Echo of the request's `Service.Method`.
    pub method: String,
    /// Method result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Build a response from a method outcome.
    #[must_use]
    pub fn from_outcome(seq: u64, method: String, outcome: Result<Value, String>) -> Self {
        match outcome {
            Ok(result) => Self {
                seq,
                method,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                seq,
                method,
                result: None,
                error: Some(error),
            },
        }
    }
}
