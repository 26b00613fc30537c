//! Session validation and re-authentication.

use crate::errors::{ServiceError, SyncError};
use crate::model::Session;
use crate::service::ServiceClient;
use crate::state::{keys, PipelineState};
use crate::task::{CheckReport, Divergence, Findings, RunContext, Task};
use crate::prompt::confirm_once;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Login credentials handed to the service's `login` operation.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

// Keep the password out of Debug output and logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Verifies the stored session still resolves to an account, and
/// re-authenticates when it does not.
///
/// Non-destructive, so the gate is a single yes/no.
#[derive(Debug)]
pub struct RefreshSession {
    client: Arc<dyn ServiceClient>,
    credentials: Credentials,
}

impl RefreshSession {
    /// Creates the task.
    #[must_use]
    pub fn new(client: Arc<dyn ServiceClient>, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    async fn session_is_live(&self, session: &Session) -> Result<bool, SyncError> {
        let result = self
            .client
            .fetch("account.info", json!({ "cookie": session.cookie }))
            .await
            .and_then(|response| response.into_body("account.info"));
        match result {
            Ok(body) => Ok(!body
                .get("account")
                .map_or(true, serde_json::Value::is_null)),
            // A rejected cookie is a divergence, not a fatal error.
            Err(SyncError::Service(err)) => {
                warn!(detail = %err, "stored session rejected");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Task for RefreshSession {
    fn name(&self) -> &str {
        "refresh-session"
    }

    fn writes(&self) -> Vec<String> {
        vec![keys::SESSION.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        if let Some(session) = state.get_opt::<Session>(keys::SESSION)? {
            if self.session_is_live(&session).await? {
                return Ok(CheckReport::Converged);
            }
        }
        Ok(CheckReport::Diverged(Divergence::new(
            "no live session; re-authentication needed",
        )))
    }

    async fn confirm(&self, ctx: &RunContext, _divergence: &Divergence) -> Result<bool, SyncError> {
        confirm_once(ctx.prompter()).await
    }

    async fn action(
        &self,
        mut state: PipelineState,
        _findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        let body = self
            .client
            .fetch("login", serde_json::to_value(&self.credentials)?)
            .await?
            .into_body("login")?;
        let cookie = body
            .get("cookie")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ServiceError::malformed("login", "cookie"))?
            .to_string();
        let account = body
            .get("account")
            .cloned()
            .ok_or_else(|| ServiceError::malformed("login", "account"))?;
        let account_id = account
            .get("id")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ServiceError::malformed("login", "account.id"))?;
        let display_name = account
            .get("nickname")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        info!(account_id, "authenticated");
        state.insert(
            keys::SESSION,
            &Session {
                cookie,
                account_id,
                display_name,
            },
        )?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOutcome;
    use crate::testing::{MockService, ScriptedPrompter};
    use pretty_assertions::assert_eq;

    fn credentials() -> Credentials {
        Credentials {
            username: "me@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn stored_session() -> Session {
        Session {
            cookie: "old-cookie".to_string(),
            account_id: 77,
            display_name: "me".to_string(),
        }
    }

    #[tokio::test]
    async fn live_session_converges_without_logging_in() {
        let service = Arc::new(MockService::new());
        service.enqueue_ok("account.info", json!({ "account": { "id": 77 } }));

        let task = RefreshSession::new(Arc::clone(&service) as Arc<dyn ServiceClient>, credentials());
        let mut state = PipelineState::new();
        state.insert(keys::SESSION, &stored_session()).unwrap();

        let ctx = RunContext::new(Arc::new(ScriptedPrompter::new()));
        let outcome = task.start(&ctx, state.clone()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Advanced(state));
        assert_eq!(service.call_count("login"), 0);
    }

    #[tokio::test]
    async fn dead_session_relogs_in_once() {
        let service = Arc::new(MockService::new());
        // Body-level rejection of the stale cookie.
        service.enqueue_ok("account.info", json!({ "account": null }));
        service.enqueue_ok(
            "login",
            json!({ "cookie": "fresh", "account": { "id": 77, "nickname": "me" } }),
        );

        let task = RefreshSession::new(Arc::clone(&service) as Arc<dyn ServiceClient>, credentials());
        let mut state = PipelineState::new();
        state.insert(keys::SESSION, &stored_session()).unwrap();

        let prompter = ScriptedPrompter::new();
        prompter.answer_yes_no(true);
        let ctx = RunContext::new(Arc::new(prompter));

        let outcome = task.start(&ctx, state).await.unwrap();
        let TaskOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };
        assert_eq!(service.call_count("login"), 1);
        let session: Session = state.get(keys::SESSION).unwrap();
        assert_eq!(session.cookie, "fresh");
        assert_eq!(session.account_id, 77);
    }

    #[tokio::test]
    async fn missing_session_diverges() {
        let service = Arc::new(MockService::new());
        let task = RefreshSession::new(service, credentials());
        let report = task.check(&PipelineState::new()).await.unwrap();
        assert!(matches!(report, CheckReport::Diverged(_)));
    }

    #[test]
    fn credentials_debug_redacts_the_password() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("hunter2"));
    }
}
