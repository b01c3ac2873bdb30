//! Contract-Netutils
//!
//! This crate provides the `JsonRpcConnector` struct,
//! used to communicate with the block store and chain services of a node.

#![warn(missing_docs)]
use std::sync::atomic::{AtomicU64, Ordering};

use http::Uri;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Errors raised while talking to a JSON-RPC endpoint
#[derive(Debug, thiserror::Error)]
pub enum JsonRpcError {
    /// The request could not be delivered or the response body could not be read
    #[error("Transport error. {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with a JSON-RPC error object
    #[error("Remote error calling '{method}'. {error}")]
    Remote {
        /// Method that was called
        method: String,
        /// The error object returned by the server
        error: Value,
    },
    /// The response carried neither a result nor an error
    #[error("Response to '{0}' has no result")]
    MissingResult(String),
    /// The result did not match the expected shape
    #[error("Could not decode result of '{method}'. {source}")]
    Decode {
        /// Method that was called
        method: String,
        /// Underlying decoding error
        source: serde_json::Error,
    },
}

/// The connector, containing the URI to connect to.
/// Every call is a single HTTP POST carrying one JSON-RPC 2.0 request.
#[derive(Debug)]
pub struct JsonRpcConnector {
    uri: Uri,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcConnector {
    /// Takes a URI, and wraps in a JsonRpcConnector
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The URI to connect to
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Calls `method` with `params` and decodes the `result` member of the response.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, JsonRpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("JSON-RPC request {id}: {method}");

        let response: Value = self
            .client
            .post(self.uri.to_string())
            .json(&request_body(id, method, params))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(method, response)
    }
}

#[derive(Serialize)]
struct Request<'a, P> {
    id: u64,
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
}

fn request_body<P: Serialize>(id: u64, method: &str, params: P) -> Request<'_, P> {
    Request {
        id,
        jsonrpc: "2.0",
        method,
        params,
    }
}

/// Extracts the result of a JSON-RPC response, surfacing remote errors.
pub fn parse_response<R: DeserializeOwned>(
    method: &str,
    mut response: Value,
) -> Result<R, JsonRpcError> {
    if let Some(error) = response.get_mut("error").map(Value::take) {
        if !error.is_null() {
            return Err(JsonRpcError::Remote {
                method: method.to_string(),
                error,
            });
        }
    }

    match response.get_mut("result").map(Value::take) {
        Some(result) if !result.is_null() => {
            serde_json::from_value(result).map_err(|source| JsonRpcError::Decode {
                method: method.to_string(),
                source,
            })
        }
        _ => Err(JsonRpcError::MissingResult(method.to_string())),
    }
}
