//! Playlist reconciliation: convergent pull, favorites dedup, and the
//! structural invariant checks.

use crate::diff::{difference, index_by, index_by_nested, intersection};
use crate::errors::{ServiceError, StateShapeError, SyncError};
use crate::model::{Playlist, Session, Track};
use crate::prompt::{confirm_once, confirm_strict};
use crate::service::{fetch_paged, ServiceClient};
use crate::state::{keys, PipelineState};
use crate::task::{CheckReport, Divergence, Findings, RunContext, Task};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

fn vanished(findings: &Findings) -> bool {
    findings
        .get("missing")
        .and_then(Value::as_array)
        .is_some_and(|missing| !missing.is_empty())
}

/// Pulls every playlist (with full track detail) from the service.
///
/// Converged when the recorded snapshot already matches the remote
/// exactly. A benign divergence (stale or absent snapshot, nothing
/// vanished remotely) refreshes without prompting; tracks that
/// vanished remotely since the last run demand the strict gate,
/// because accepting the refresh forgets them.
#[derive(Debug)]
pub struct PullPlaylists {
    client: Arc<dyn ServiceClient>,
}

impl PullPlaylists {
    /// Creates the task.
    #[must_use]
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }

    async fn fetch_detailed(&self, session: &Session) -> Result<Vec<Playlist>, SyncError> {
        let mut params = Map::new();
        params.insert("uid".to_string(), Value::from(session.account_id));
        params.insert("cookie".to_string(), Value::from(session.cookie.clone()));
        let summaries = fetch_paged(
            self.client.as_ref(),
            "playlist.list",
            params,
            "playlists",
            "more",
        )
        .await?;

        let mut playlists = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let id = summary
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| ServiceError::malformed("playlist.list", "playlists[].id"))?;
            let body = self
                .client
                .fetch(
                    "playlist.detail",
                    json!({ "id": id, "cookie": session.cookie }),
                )
                .await?
                .into_body("playlist.detail")?;
            let detail = body
                .get("playlist")
                .cloned()
                .ok_or_else(|| ServiceError::malformed("playlist.detail", "playlist"))?;
            playlists.push(serde_json::from_value(detail)?);
        }
        Ok(playlists)
    }
}

#[async_trait]
impl Task for PullPlaylists {
    fn name(&self) -> &str {
        "pull-playlists"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::SESSION.to_string()]
    }

    fn writes(&self) -> Vec<String> {
        vec![keys::PLAYLISTS.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let session: Session = state.get(keys::SESSION)?;
        let fresh = self.fetch_detailed(&session).await?;
        let recorded = state.get_opt::<Vec<Playlist>>(keys::PLAYLISTS)?;

        if recorded.as_ref() == Some(&fresh) {
            return Ok(CheckReport::Converged);
        }

        let mut missing: Vec<Track> = Vec::new();
        if let Some(recorded) = &recorded {
            let old = index_by_nested(recorded.iter(), |p| p.tracks.iter(), |t| t.id);
            let new = index_by_nested(fresh.iter(), |p| p.tracks.iter(), |t| t.id);
            missing = difference(&old, &new).into_values().cloned().collect();
            for track in &missing {
                warn!(track = %track.describe(), "track vanished from the remote playlists");
            }
        }

        let summary = if missing.is_empty() {
            "playlist snapshot is stale".to_string()
        } else {
            format!("{} tracks vanished from the remote playlists", missing.len())
        };
        Ok(CheckReport::Diverged(
            Divergence::new(summary)
                .with_finding("playlists", &fresh)?
                .with_finding("missing", &missing)?,
        ))
    }

    async fn confirm(&self, ctx: &RunContext, divergence: &Divergence) -> Result<bool, SyncError> {
        if vanished(&divergence.findings) {
            confirm_strict(ctx.prompter()).await
        } else {
            // Benign refresh; nothing is lost by recording it.
            Ok(true)
        }
    }

    async fn action(
        &self,
        mut state: PipelineState,
        findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        let fresh: Vec<Playlist> = crate::task::read_finding(findings, "playlists")?;
        info!(count = fresh.len(), "recorded playlist snapshot");
        state.insert(keys::PLAYLISTS, &fresh)?;
        Ok(state)
    }
}

/// Removes favorites entries that also live in another owned playlist.
///
/// The favorites list is an inbox: once a track has been filed into a
/// real playlist, its favorites entry is a duplicate. Deleting from
/// favorites is cheap to undo, so a single yes/no gates it.
#[derive(Debug)]
pub struct InboxDedup {
    client: Arc<dyn ServiceClient>,
}

impl InboxDedup {
    /// Creates the task.
    #[must_use]
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Task for InboxDedup {
    fn name(&self) -> &str {
        "inbox-dedup"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::SESSION.to_string(), keys::PLAYLISTS.to_string()]
    }

    fn writes(&self) -> Vec<String> {
        vec![keys::PLAYLISTS.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let session: Session = state.get(keys::SESSION)?;
        let playlists: Vec<Playlist> = state.get(keys::PLAYLISTS)?;

        let owned: Vec<&Playlist> = playlists
            .iter()
            .filter(|p| p.owned_by(session.account_id))
            .collect();
        let favorites = owned
            .iter()
            .find(|p| p.is_favorites())
            .ok_or_else(|| StateShapeError::malformed(keys::PLAYLISTS, "no favorites playlist"))?;
        let rest = owned.iter().filter(|p| !p.is_favorites());

        let fav_index = index_by(favorites.tracks.iter(), |t| t.id);
        let rest_index = index_by_nested(rest, |p| p.tracks.iter(), |t| t.id);
        let duplicates: Vec<Track> = intersection(&fav_index, &rest_index)
            .into_values()
            .cloned()
            .collect();

        if duplicates.is_empty() {
            return Ok(CheckReport::Converged);
        }
        for track in &duplicates {
            info!(track = %track.describe(), "favorites entry already filed elsewhere");
        }
        Ok(CheckReport::Diverged(
            Divergence::new(format!(
                "{} favorites entries are filed in other playlists",
                duplicates.len()
            ))
            .with_finding("favorites_id", &favorites.id)?
            .with_finding("duplicates", &duplicates)?,
        ))
    }

    async fn confirm(&self, ctx: &RunContext, _divergence: &Divergence) -> Result<bool, SyncError> {
        confirm_once(ctx.prompter()).await
    }

    async fn action(
        &self,
        mut state: PipelineState,
        findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        let session: Session = state.get(keys::SESSION)?;
        let favorites_id: u64 = crate::task::read_finding(findings, "favorites_id")?;
        let duplicates: Vec<Track> = crate::task::read_finding(findings, "duplicates")?;

        let ids = duplicates
            .iter()
            .map(|t| t.id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.client
            .fetch(
                "playlist.tracks",
                json!({
                    "op": "del",
                    "pid": favorites_id,
                    "tracks": ids,
                    "cookie": session.cookie,
                }),
            )
            .await?
            .into_body("playlist.tracks")?;

        // Re-pull the favorites detail so the snapshot reflects the
        // deletion without a full playlist pull.
        let body = self
            .client
            .fetch(
                "playlist.detail",
                json!({ "id": favorites_id, "cookie": session.cookie }),
            )
            .await?
            .into_body("playlist.detail")?;
        let refreshed: Playlist = serde_json::from_value(
            body.get("playlist")
                .cloned()
                .ok_or_else(|| ServiceError::malformed("playlist.detail", "playlist"))?,
        )?;

        let mut playlists: Vec<Playlist> = state.get(keys::PLAYLISTS)?;
        for playlist in &mut playlists {
            if playlist.id == favorites_id {
                *playlist = refreshed.clone();
            }
        }
        state.insert(keys::PLAYLISTS, &playlists)?;
        Ok(state)
    }
}

/// Structural invariant: across the owned playlists whose name matches
/// a group pattern, no track may appear more than once.
///
/// Pure check: there is no corrective action, only a yes/no waiver
/// that lets the operator proceed past a known violation.
#[derive(Debug)]
pub struct ExclusiveGroupCheck {
    group_pattern: Regex,
}

impl ExclusiveGroupCheck {
    /// Creates the check for playlists whose name matches `pattern`.
    #[must_use]
    pub fn new(group_pattern: Regex) -> Self {
        Self { group_pattern }
    }

    /// The stock grouping: playlists named after a four-digit year.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn years() -> Self {
        Self::new(Regex::new(r"\b\d{4}\b").expect("literal pattern is valid"))
    }
}

#[async_trait]
impl Task for ExclusiveGroupCheck {
    fn name(&self) -> &str {
        "exclusive-group-check"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::SESSION.to_string(), keys::PLAYLISTS.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let session: Session = state.get(keys::SESSION)?;
        let playlists: Vec<Playlist> = state.get(keys::PLAYLISTS)?;

        let mut seen: std::collections::BTreeMap<u64, (Track, Vec<String>)> =
            std::collections::BTreeMap::new();
        for playlist in playlists
            .iter()
            .filter(|p| p.owned_by(session.account_id) && self.group_pattern.is_match(&p.name))
        {
            for track in &playlist.tracks {
                seen.entry(track.id)
                    .or_insert_with(|| (track.clone(), Vec::new()))
                    .1
                    .push(playlist.name.clone());
            }
        }

        let offenders: Vec<Value> = seen
            .values()
            .filter(|(_, names)| names.len() > 1)
            .map(|(track, names)| {
                warn!(track = %track.describe(), playlists = ?names, "track appears in more than one group playlist");
                json!({ "track": track, "playlists": names })
            })
            .collect();

        if offenders.is_empty() {
            Ok(CheckReport::Converged)
        } else {
            Ok(CheckReport::Diverged(
                Divergence::new(format!(
                    "{} tracks appear in more than one group playlist",
                    offenders.len()
                ))
                .with_finding("offenders", &offenders)?,
            ))
        }
    }

    async fn confirm(&self, ctx: &RunContext, _divergence: &Divergence) -> Result<bool, SyncError> {
        confirm_once(ctx.prompter()).await
    }
}

/// Structural invariant: the designated playlist's tracks must be a
/// subset of the union of all other owned playlists.
#[derive(Debug)]
pub struct CoverageCheck {
    playlist_name: String,
}

impl CoverageCheck {
    /// Creates the check for the playlist with the given name.
    #[must_use]
    pub fn new(playlist_name: impl Into<String>) -> Self {
        Self {
            playlist_name: playlist_name.into(),
        }
    }
}

#[async_trait]
impl Task for CoverageCheck {
    fn name(&self) -> &str {
        "coverage-check"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::SESSION.to_string(), keys::PLAYLISTS.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let session: Session = state.get(keys::SESSION)?;
        let playlists: Vec<Playlist> = state.get(keys::PLAYLISTS)?;

        let owned: Vec<&Playlist> = playlists
            .iter()
            .filter(|p| p.owned_by(session.account_id))
            .collect();
        let target = owned
            .iter()
            .find(|p| p.name == self.playlist_name)
            .ok_or_else(|| {
                StateShapeError::malformed(
                    keys::PLAYLISTS,
                    format!("no playlist named `{}`", self.playlist_name),
                )
            })?;
        let others = owned.iter().filter(|p| p.name != self.playlist_name);

        let target_index = index_by(target.tracks.iter(), |t| t.id);
        let union_index = index_by_nested(others, |p| p.tracks.iter(), |t| t.id);
        let uncovered: Vec<Track> = difference(&target_index, &union_index)
            .into_values()
            .cloned()
            .collect();

        if uncovered.is_empty() {
            return Ok(CheckReport::Converged);
        }
        for track in &uncovered {
            warn!(
                track = %track.describe(),
                playlist = %self.playlist_name,
                "track is in no other playlist"
            );
        }
        Ok(CheckReport::Diverged(
            Divergence::new(format!(
                "{} tracks in `{}` are covered by no other playlist",
                uncovered.len(),
                self.playlist_name
            ))
            .with_finding("uncovered", &uncovered)?,
        ))
    }

    async fn confirm(&self, ctx: &RunContext, _divergence: &Divergence) -> Result<bool, SyncError> {
        confirm_once(ctx.prompter()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOutcome;
    use crate::testing::{MockService, ScriptedPrompter};
    use pretty_assertions::assert_eq;

    fn session_state() -> PipelineState {
        let mut state = PipelineState::new();
        state
            .insert(
                keys::SESSION,
                &Session {
                    cookie: "c".to_string(),
                    account_id: 77,
                    display_name: "me".to_string(),
                },
            )
            .unwrap();
        state
    }

    fn playlist_json(id: u64, name: &str, special_type: u32, track_ids: &[u64]) -> Value {
        json!({
            "id": id,
            "name": name,
            "creator": { "userId": 77, "nickname": "me" },
            "specialType": special_type,
            "tracks": track_ids
                .iter()
                .map(|track_id| json!({ "id": track_id, "name": format!("track-{track_id}") }))
                .collect::<Vec<_>>(),
        })
    }

    fn playlist(id: u64, name: &str, special_type: u32, track_ids: &[u64]) -> Playlist {
        serde_json::from_value(playlist_json(id, name, special_type, track_ids)).unwrap()
    }

    fn script_pull(service: &MockService, playlists: &[Value]) {
        service.enqueue_ok(
            "playlist.list",
            json!({
                "playlists": playlists
                    .iter()
                    .map(|p| json!({ "id": p["id"] }))
                    .collect::<Vec<_>>(),
                "more": false,
            }),
        );
        for p in playlists {
            service.enqueue_ok("playlist.detail", json!({ "playlist": p }));
        }
    }

    #[tokio::test]
    async fn pull_records_a_first_snapshot_without_prompting() {
        let service = Arc::new(MockService::new());
        script_pull(&service, &[playlist_json(10, "2024", 0, &[1, 2])]);

        let task = PullPlaylists::new(Arc::clone(&service) as Arc<dyn ServiceClient>);
        // Nothing scripted: any prompt would fail the test.
        let ctx = RunContext::new(Arc::new(ScriptedPrompter::new()));

        let outcome = task.start(&ctx, session_state()).await.unwrap();
        let TaskOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };
        let recorded: Vec<Playlist> = state.get(keys::PLAYLISTS).unwrap();
        assert_eq!(recorded, vec![playlist(10, "2024", 0, &[1, 2])]);
    }

    #[tokio::test]
    async fn pull_converges_when_the_snapshot_matches() {
        let service = Arc::new(MockService::new());
        script_pull(&service, &[playlist_json(10, "2024", 0, &[1, 2])]);

        let task = PullPlaylists::new(Arc::clone(&service) as Arc<dyn ServiceClient>);
        let mut state = session_state();
        state
            .insert(keys::PLAYLISTS, &vec![playlist(10, "2024", 0, &[1, 2])])
            .unwrap();

        let report = task.check(&state).await.unwrap();
        assert_eq!(report, CheckReport::Converged);
    }

    #[tokio::test]
    async fn pull_demands_the_strict_gate_when_tracks_vanished() {
        let service = Arc::new(MockService::new());
        script_pull(&service, &[playlist_json(10, "2024", 0, &[1])]);

        let task = PullPlaylists::new(Arc::clone(&service) as Arc<dyn ServiceClient>);
        let mut state = session_state();
        state
            .insert(keys::PLAYLISTS, &vec![playlist(10, "2024", 0, &[1, 9])])
            .unwrap();

        let prompter = ScriptedPrompter::new();
        prompter.answer_yes_no(false);
        let ctx = RunContext::new(Arc::new(prompter));

        let outcome = task.start(&ctx, state).await.unwrap();
        let TaskOutcome::Canceled(cancellation) = outcome else {
            panic!("expected cancellation");
        };
        assert!(cancellation.reason.contains("vanished"));
    }

    #[tokio::test]
    async fn dedup_removes_filed_favorites_and_refreshes_the_snapshot() {
        let service = Arc::new(MockService::new());
        service.enqueue_ok("playlist.tracks", json!({}));
        service.enqueue_ok(
            "playlist.detail",
            json!({ "playlist": playlist_json(1, "Favorites", 5, &[1]) }),
        );

        let task = InboxDedup::new(Arc::clone(&service) as Arc<dyn ServiceClient>);
        let mut state = session_state();
        state
            .insert(
                keys::PLAYLISTS,
                &vec![
                    playlist(1, "Favorites", 5, &[1, 2]),
                    playlist(2, "2024", 0, &[2, 3]),
                ],
            )
            .unwrap();

        let prompter = ScriptedPrompter::new();
        prompter.answer_yes_no(true);
        let ctx = RunContext::new(Arc::new(prompter));

        let outcome = task.start(&ctx, state).await.unwrap();
        let TaskOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };

        let delete_call = &service.calls()[0];
        assert_eq!(delete_call.0, "playlist.tracks");
        assert_eq!(delete_call.1["tracks"], json!("2"));

        // Post-action convergence: favorites no longer overlaps.
        assert_eq!(task.check(&state).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn dedup_converges_when_favorites_is_clean() {
        let service = Arc::new(MockService::new());
        let task = InboxDedup::new(service);
        let mut state = session_state();
        state
            .insert(
                keys::PLAYLISTS,
                &vec![
                    playlist(1, "Favorites", 5, &[1]),
                    playlist(2, "2024", 0, &[2]),
                ],
            )
            .unwrap();
        assert_eq!(task.check(&state).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn exclusive_group_check_flags_tracks_in_two_year_lists() {
        let task = ExclusiveGroupCheck::years();
        let mut state = session_state();
        state
            .insert(
                keys::PLAYLISTS,
                &vec![
                    playlist(1, "2023", 0, &[5, 6]),
                    playlist(2, "2024", 0, &[6]),
                    // Not a group playlist; overlap here is fine.
                    playlist(3, "Workout", 0, &[5]),
                ],
            )
            .unwrap();

        let report = task.check(&state).await.unwrap();
        let CheckReport::Diverged(divergence) = report else {
            panic!("expected divergence");
        };
        let offenders = divergence.findings["offenders"].as_array().unwrap();
        assert_eq!(offenders.len(), 1);
        assert_eq!(offenders[0]["track"]["id"], json!(6));
    }

    #[tokio::test]
    async fn coverage_check_passes_when_the_target_is_covered() {
        let task = CoverageCheck::new("Level 5");
        let mut state = session_state();
        state
            .insert(
                keys::PLAYLISTS,
                &vec![
                    playlist(1, "Level 5", 0, &[1, 2]),
                    playlist(2, "2024", 0, &[1]),
                    playlist(3, "2023", 0, &[2]),
                ],
            )
            .unwrap();
        assert_eq!(task.check(&state).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn coverage_check_reports_uncovered_tracks_and_waives_on_yes() {
        let task = CoverageCheck::new("Level 5");
        let mut state = session_state();
        state
            .insert(
                keys::PLAYLISTS,
                &vec![
                    playlist(1, "Level 5", 0, &[1, 2]),
                    playlist(2, "2024", 0, &[1]),
                ],
            )
            .unwrap();

        let prompter = ScriptedPrompter::new();
        prompter.answer_yes_no(true);
        let ctx = RunContext::new(Arc::new(prompter));

        let outcome = task.start(&ctx, state.clone()).await.unwrap();
        // Waived: the pipeline continues with the state untouched.
        assert_eq!(outcome, TaskOutcome::Advanced(state));
    }
}
