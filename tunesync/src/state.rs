//! The versioned JSON document threaded through every task.

use crate::errors::{StateShapeError, SyncError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// The schema version written by this build of the engine.
pub const SCHEMA_VERSION: u64 = 1;

/// Reserved key carrying the document's schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// The mutable document handed from one task to the next.
///
/// Conceptually a mapping from string keys to JSON values (`session`,
/// `playlists`, `cloud_list`, ...). Once a task writes a key, every
/// downstream task may rely on the shape documented by that task's
/// contract; no key is required before its producer has run, and the
/// pipeline enforces this at assembly time via
/// [`Pipeline::validate`](crate::pipeline::Pipeline::validate).
///
/// The document is owned by exactly one task at a time and handed off
/// by value, so there is no aliasing between tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    fields: Map<String, Value>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    /// Creates a fresh document at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert(SCHEMA_VERSION_KEY.to_string(), Value::from(SCHEMA_VERSION));
        Self { fields }
    }

    /// Builds a document from a parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`StateShapeError`] if the value is not an object, if the
    /// version key is absent, or if the document was written by a newer
    /// engine than this one.
    pub fn from_json(doc: Value) -> Result<Self, SyncError> {
        let Value::Object(fields) = doc else {
            return Err(StateShapeError::malformed("$", "expected a JSON object").into());
        };
        let version = fields
            .get(SCHEMA_VERSION_KEY)
            .and_then(Value::as_u64)
            .ok_or_else(|| StateShapeError::missing(SCHEMA_VERSION_KEY))?;
        if version > SCHEMA_VERSION {
            return Err(StateShapeError::malformed(
                SCHEMA_VERSION_KEY,
                format!("version {version} is newer than supported {SCHEMA_VERSION}"),
            )
            .into());
        }
        Ok(Self { fields })
    }

    /// Parses a document from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for invalid JSON, or the same
    /// shape errors as [`Self::from_json`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SyncError> {
        let doc: Value = serde_json::from_slice(bytes)?;
        Self::from_json(doc)
    }

    /// Returns the document as a JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Serializes the document to pretty-printed JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_vec_pretty(&self) -> Result<Vec<u8>, SyncError> {
        Ok(serde_json::to_vec_pretty(&self.to_json())?)
    }

    /// Reads a required key as a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`StateShapeError`] when the key is absent or does not
    /// deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, SyncError> {
        let value = self
            .fields
            .get(key)
            .ok_or_else(|| StateShapeError::missing(key))?;
        serde_json::from_value(value.clone())
            .map_err(|err| StateShapeError::malformed(key, err.to_string()).into())
    }

    /// Reads an optional key as a typed value.
    ///
    /// Absence is `Ok(None)`; a present-but-malformed value is still an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`StateShapeError`] when the key is present but does not
    /// deserialize into `T`.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SyncError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| StateShapeError::malformed(key, err.to_string()).into()),
        }
    }

    /// Writes a key, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` cannot be encoded.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), SyncError> {
        self.fields.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Checks whether a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Returns all keys in the document.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

/// Well-known state keys shared by the stock tasks.
pub mod keys {
    /// Authenticated session: cookie, account id, display name.
    pub const SESSION: &str = "session";
    /// Detailed playlist snapshot pulled from the service.
    pub const PLAYLISTS: &str = "playlists";
    /// Cloud-storage track snapshot pulled from the service.
    pub const CLOUD_LIST: &str = "cloud_list";
    /// RFC 3339 timestamp written when the document is persisted.
    pub const SAVED_AT: &str = "saved_at";
}
