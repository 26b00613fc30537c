//! Scripted capability doubles for tests.
//!
//! These live in the library (not behind `cfg(test)`) so downstream
//! crates can drive pipelines against scripted services and prompts.

use crate::errors::{ServiceError, SyncError};
use crate::library::FileStore;
use crate::prompt::Prompter;
use crate::service::{ServiceClient, ServiceResponse};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// A service client that replays scripted responses and records calls.
#[derive(Debug, Default)]
pub struct MockService {
    responses: Mutex<HashMap<String, VecDeque<ServiceResponse>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockService {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw response for an operation.
    pub fn enqueue(&self, operation: &str, response: ServiceResponse) {
        self.responses
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queues a 200 response, adding a body-level `code: 200` when the
    /// script did not set one.
    pub fn enqueue_ok(&self, operation: &str, mut body: Value) {
        if let Some(obj) = body.as_object_mut() {
            obj.entry("code").or_insert(Value::from(200));
        }
        self.enqueue(operation, ServiceResponse::new(200, body));
    }

    /// All recorded calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Number of calls recorded for one operation.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(op, _)| op == operation)
            .count()
    }
}

#[async_trait]
impl ServiceClient for MockService {
    async fn fetch(&self, operation: &str, params: Value) -> Result<ServiceResponse, SyncError> {
        self.calls.lock().push((operation.to_string(), params));
        self.responses
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| ServiceError::new(operation, "no scripted response").into())
    }
}

/// A prompter that replays scripted answers.
///
/// An unscripted question is an internal error, so a test fails loudly
/// when a task prompts where it should not.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    yes_no: Mutex<VecDeque<bool>>,
    phrases: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a yes/no answer.
    pub fn answer_yes_no(&self, answer: bool) {
        self.yes_no.lock().push_back(answer);
    }

    /// Queues the text the operator "types" at a phrase prompt.
    pub fn type_phrase(&self, text: &str) {
        self.phrases.lock().push_back(text.to_string());
    }

    /// Every question asked, in order.
    #[must_use]
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm_yes_no(&self, message: &str) -> Result<bool, SyncError> {
        self.asked.lock().push(message.to_string());
        self.yes_no
            .lock()
            .pop_front()
            .ok_or_else(|| SyncError::Internal(format!("unscripted yes/no prompt: {message}")))
    }

    async fn confirm_phrase(&self, message: &str, expected: &str) -> Result<bool, SyncError> {
        self.asked.lock().push(message.to_string());
        let typed = self
            .phrases
            .lock()
            .pop_front()
            .ok_or_else(|| SyncError::Internal(format!("unscripted phrase prompt: {message}")))?;
        Ok(typed == expected)
    }
}

/// A prompter that approves every gate, including the typed phrase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

#[async_trait]
impl Prompter for ApproveAll {
    async fn confirm_yes_no(&self, _message: &str) -> Result<bool, SyncError> {
        Ok(true)
    }

    async fn confirm_phrase(&self, _message: &str, _expected: &str) -> Result<bool, SyncError> {
        Ok(true)
    }
}

/// An in-memory file store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file.
    pub fn seed(&self, name: &str, data: &[u8]) {
        self.files.write().insert(name.to_string(), data.to_vec());
    }

    /// Returns a file's current contents, if present.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).cloned()
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn read(&self, name: &str) -> Result<Vec<u8>, SyncError> {
        self.files.read().get(name).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, name.to_string()).into()
        })
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), SyncError> {
        self.files.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, SyncError> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
