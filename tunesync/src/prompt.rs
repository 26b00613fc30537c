//! The interactive confirmation capability.
//!
//! Two prompt shapes exist: a yes/no question and a typed-phrase
//! check. The strict gate composes both and is the default for any
//! task that does not override `confirm`; an unoverridden check
//! failure is assumed destructive until proven otherwise.

use crate::errors::SyncError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io::Write;

/// The literal the operator must retype to pass the strict gate.
pub const STRICT_CONFIRM_PHRASE: &str = "confirm";

/// Capability for asking the operator questions.
#[async_trait]
pub trait Prompter: Send + Sync + Debug {
    /// Asks a yes/no question.
    ///
    /// # Errors
    ///
    /// Returns an error when the prompt channel itself fails.
    async fn confirm_yes_no(&self, message: &str) -> Result<bool, SyncError>;

    /// Asks the operator to retype `expected` exactly.
    ///
    /// # Errors
    ///
    /// Returns an error when the prompt channel itself fails.
    async fn confirm_phrase(&self, message: &str, expected: &str) -> Result<bool, SyncError>;
}

/// The strict two-step gate: yes/no, then retyping
/// [`STRICT_CONFIRM_PHRASE`] exactly. A mistyped phrase fails the gate
/// with no retry.
///
/// # Errors
///
/// Propagates prompt-channel errors.
pub async fn confirm_strict(prompter: &dyn Prompter) -> Result<bool, SyncError> {
    if !prompter.confirm_yes_no("Is this intended?").await? {
        return Ok(false);
    }
    prompter
        .confirm_phrase(
            &format!("Confirm again by typing \"{STRICT_CONFIRM_PHRASE}\""),
            STRICT_CONFIRM_PHRASE,
        )
        .await
}

/// The relaxed single-step gate used by non-destructive tasks.
///
/// # Errors
///
/// Propagates prompt-channel errors.
pub async fn confirm_once(prompter: &dyn Prompter) -> Result<bool, SyncError> {
    prompter.confirm_yes_no("Is this ok?").await
}

/// Prompter that reads answers from the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    /// Creates a terminal prompter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn read_answer(prompt: String) -> Result<String, SyncError> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{prompt} ")?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn blocking_answer(prompt: String) -> Result<String, SyncError> {
    tokio::task::spawn_blocking(move || read_answer(prompt))
        .await
        .map_err(|err| SyncError::Internal(err.to_string()))?
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm_yes_no(&self, message: &str) -> Result<bool, SyncError> {
        let answer = blocking_answer(format!("{message} [y/N]")).await?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }

    async fn confirm_phrase(&self, message: &str, expected: &str) -> Result<bool, SyncError> {
        let answer = blocking_answer(message.to_string()).await?;
        Ok(answer == expected)
    }
}
