//! The remote music-service capability.
//!
//! The engine never talks to the network itself; it goes through
//! [`ServiceClient`], a thin `fetch(operation, params)` capability. Any
//! retries or timeouts live behind that boundary, not in the engine.

use crate::errors::{ServiceError, SyncError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Capability presented by the remote music-service client.
#[async_trait]
pub trait ServiceClient: Send + Sync + Debug {
    /// Performs one logical operation (e.g. `playlist.detail`) with
    /// JSON parameters and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the call cannot be made at all.
    async fn fetch(&self, operation: &str, params: Value) -> Result<ServiceResponse, SyncError>;
}

/// A raw response: transport status plus JSON body.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    /// Transport-level status code.
    pub status: u16,
    /// Response body; carries a body-level `code` field.
    pub body: Value,
}

impl ServiceResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Validates the response and extracts the body.
    ///
    /// Success means a 2xx transport status AND a 2xx body-level
    /// `code`; the `code` field is stripped from the returned body.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] naming `operation` when either gate
    /// fails or the `code` field is absent.
    pub fn into_body(self, operation: &str) -> Result<Value, SyncError> {
        if !(200..300).contains(&self.status) {
            return Err(ServiceError::transport(operation, self.status).into());
        }
        let mut body = self.body;
        let code = body
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| ServiceError::malformed(operation, "code"))?;
        if !(200..300).contains(&code) {
            return Err(ServiceError::rejected(operation, code).into());
        }
        if let Some(obj) = body.as_object_mut() {
            obj.remove("code");
        }
        Ok(body)
    }
}

/// Fetches a paginated collection, accumulating items across pages.
///
/// Follows the service's `offset`/has-more convention: each page is
/// requested with `offset` set to the number of items accumulated so
/// far, and fetching continues while the body's `more_field` is true.
///
/// # Errors
///
/// Returns [`ServiceError`] if any page fails its gates or lacks
/// `items_field`.
pub async fn fetch_paged(
    client: &dyn ServiceClient,
    operation: &str,
    params: Map<String, Value>,
    items_field: &str,
    more_field: &str,
) -> Result<Vec<Value>, SyncError> {
    let mut items: Vec<Value> = Vec::new();
    loop {
        let mut page_params = params.clone();
        page_params.insert("offset".to_string(), Value::from(items.len()));
        let body = client
            .fetch(operation, Value::Object(page_params))
            .await?
            .into_body(operation)?;
        let page = body
            .get(items_field)
            .and_then(Value::as_array)
            .ok_or_else(|| ServiceError::malformed(operation, items_field))?;
        // An empty page cannot advance the offset; stop rather than
        // re-request it forever.
        if page.is_empty() {
            break;
        }
        items.extend(page.iter().cloned());
        let more = body.get(more_field).and_then(Value::as_bool).unwrap_or(false);
        if !more {
            break;
        }
    }
    Ok(items)
}
