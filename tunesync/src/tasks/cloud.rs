//! Cloud-storage reconciliation: convergent pull, additive upload,
//! subtractive prune, and the unused-track invariant.

use crate::diff::{difference, index_by, index_by_nested};
use crate::errors::{ServiceError, SyncError};
use crate::library::{parse_id_tag, scan_tagged_tracks, FileStore, LocalTrack};
use crate::model::{CloudTrack, Playlist, Session};
use crate::prompt::confirm_once;
use crate::service::{fetch_paged, ServiceClient};
use crate::state::{keys, PipelineState};
use crate::task::{read_finding, CheckReport, Divergence, Findings, RunContext, Task};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

fn cloud_index(tracks: &[CloudTrack]) -> BTreeMap<u64, &CloudTrack> {
    index_by(tracks.iter(), |t| t.song_id)
}

/// Pulls the full cloud-storage track list, page by page.
///
/// Same convergence shape as the playlist pull: an exact match with
/// the recorded snapshot converges, a benign refresh auto-confirms,
/// and tracks that vanished remotely demand the strict gate.
#[derive(Debug)]
pub struct PullCloudList {
    client: Arc<dyn ServiceClient>,
}

impl PullCloudList {
    /// Creates the task.
    #[must_use]
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Task for PullCloudList {
    fn name(&self) -> &str {
        "pull-cloud-list"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::SESSION.to_string()]
    }

    fn writes(&self) -> Vec<String> {
        vec![keys::CLOUD_LIST.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let session: Session = state.get(keys::SESSION)?;
        let mut params = Map::new();
        params.insert("cookie".to_string(), Value::from(session.cookie));
        let items = fetch_paged(self.client.as_ref(), "cloud.list", params, "data", "hasMore")
            .await?;
        let fresh: Vec<CloudTrack> = serde_json::from_value(Value::Array(items))?;
        let recorded = state.get_opt::<Vec<CloudTrack>>(keys::CLOUD_LIST)?;

        if recorded.as_ref() == Some(&fresh) {
            return Ok(CheckReport::Converged);
        }

        let mut missing: Vec<CloudTrack> = Vec::new();
        if let Some(recorded) = &recorded {
            missing = difference(&cloud_index(recorded), &cloud_index(&fresh))
                .into_values()
                .cloned()
                .collect();
            for track in &missing {
                warn!(
                    song = %track.song_name,
                    file = %track.file_name,
                    id = track.song_id,
                    "track missing from the remote cloud list"
                );
            }
        }

        let summary = if missing.is_empty() {
            "cloud snapshot is stale".to_string()
        } else {
            format!("{} tracks vanished from the remote cloud list", missing.len())
        };
        Ok(CheckReport::Diverged(
            Divergence::new(summary)
                .with_finding("cloud_list", &fresh)?
                .with_finding("missing", &missing)?,
        ))
    }

    async fn confirm(&self, ctx: &RunContext, divergence: &Divergence) -> Result<bool, SyncError> {
        let vanished = divergence
            .findings
            .get("missing")
            .and_then(Value::as_array)
            .is_some_and(|missing| !missing.is_empty());
        if vanished {
            crate::prompt::confirm_strict(ctx.prompter()).await
        } else {
            Ok(true)
        }
    }

    async fn action(
        &self,
        mut state: PipelineState,
        findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        let fresh: Vec<CloudTrack> = read_finding(findings, "cloud_list")?;
        info!(count = fresh.len(), "recorded cloud snapshot");
        state.insert(keys::CLOUD_LIST, &fresh)?;
        Ok(state)
    }
}

/// Uploads tagged local files that are missing from the cloud list.
///
/// Additive and reversible, so a single yes/no gates it. When the
/// service assigns a different id than the filename tag, one follow-up
/// re-identify call maps the assigned id back to the tagged one.
#[derive(Debug)]
pub struct CloudUpload {
    client: Arc<dyn ServiceClient>,
    store: Arc<dyn FileStore>,
}

impl CloudUpload {
    /// Creates the task.
    #[must_use]
    pub fn new(client: Arc<dyn ServiceClient>, store: Arc<dyn FileStore>) -> Self {
        Self { client, store }
    }
}

#[async_trait]
impl Task for CloudUpload {
    fn name(&self) -> &str {
        "cloud-upload"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::SESSION.to_string(), keys::CLOUD_LIST.to_string()]
    }

    fn writes(&self) -> Vec<String> {
        vec![keys::CLOUD_LIST.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let cloud_list: Vec<CloudTrack> = state.get(keys::CLOUD_LIST)?;
        let local = scan_tagged_tracks(self.store.as_ref()).await?;

        let local_index = index_by(local.iter(), |t| t.id);
        let pending: Vec<LocalTrack> = difference(&local_index, &cloud_index(&cloud_list))
            .into_values()
            .cloned()
            .collect();

        if pending.is_empty() {
            return Ok(CheckReport::Converged);
        }
        for track in &pending {
            info!(file = %track.file_name, id = track.id, "local track missing from the cloud");
        }
        Ok(CheckReport::Diverged(
            Divergence::new(format!("{} local tracks are not in the cloud", pending.len()))
                .with_finding(
                    "pending",
                    &pending
                        .iter()
                        .map(|t| json!({ "id": t.id, "fileName": t.file_name }))
                        .collect::<Vec<_>>(),
                )?,
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
        let pending: Vec<Value> = read_finding(findings, "pending")?;
        let mut cloud_list: Vec<CloudTrack> = state.get(keys::CLOUD_LIST)?;

        for entry in pending {
            let tagged_id = entry
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| SyncError::Internal("pending entry without id".to_string()))?;
            let file_name = entry
                .get("fileName")
                .and_then(Value::as_str)
                .ok_or_else(|| SyncError::Internal("pending entry without fileName".to_string()))?
                .to_string();

            info!(file = %file_name, "uploading");
            let data = self.store.read(&file_name).await?;
            let body = self
                .client
                .fetch(
                    "cloud.upload",
                    json!({
                        "fileName": file_name,
                        "data": BASE64.encode(&data),
                        "cookie": session.cookie,
                    }),
                )
                .await?
                .into_body("cloud.upload")?;
            let assigned_id = body
                .get("track")
                .and_then(|t| t.get("songId"))
                .and_then(Value::as_u64)
                .ok_or_else(|| ServiceError::malformed("cloud.upload", "track.songId"))?;

            if assigned_id != tagged_id {
                info!(assigned_id, tagged_id, "re-identifying uploaded track");
                self.client
                    .fetch(
                        "cloud.match",
                        json!({
                            "uid": session.account_id,
                            "sid": assigned_id,
                            "asid": tagged_id,
                            "cookie": session.cookie,
                        }),
                    )
                    .await?
                    .into_body("cloud.match")?;
            }

            cloud_list.push(CloudTrack {
                song_id: tagged_id,
                song_name: file_name.clone(),
                file_name,
                file_size: data.len() as u64,
            });
        }

        state.insert(keys::CLOUD_LIST, &cloud_list)?;
        Ok(state)
    }
}

/// Deletes cloud tracks whose tagged local file no longer exists.
///
/// Deletion is irreversible, so this task keeps the default strict
/// two-step gate. Cloud entries without a `[id<n>]` tag in their file
/// name are reported but never deleted; they did not come from this
/// tool, so it refuses to manage them.
#[derive(Debug)]
pub struct CloudPrune {
    client: Arc<dyn ServiceClient>,
    store: Arc<dyn FileStore>,
}

impl CloudPrune {
    /// Creates the task.
    #[must_use]
    pub fn new(client: Arc<dyn ServiceClient>, store: Arc<dyn FileStore>) -> Self {
        Self { client, store }
    }
}

#[async_trait]
impl Task for CloudPrune {
    fn name(&self) -> &str {
        "cloud-prune"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::SESSION.to_string(), keys::CLOUD_LIST.to_string()]
    }

    fn writes(&self) -> Vec<String> {
        vec![keys::CLOUD_LIST.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let cloud_list: Vec<CloudTrack> = state.get(keys::CLOUD_LIST)?;
        let local = scan_tagged_tracks(self.store.as_ref()).await?;
        let local_index = index_by(local.iter(), |t| t.id);

        let mut stale: Vec<CloudTrack> = Vec::new();
        for track in difference(&cloud_index(&cloud_list), &local_index).into_values() {
            if parse_id_tag(&track.file_name).is_some() {
                warn!(
                    id = track.song_id,
                    file = %track.file_name,
                    "cloud track deleted from local library"
                );
                stale.push(track.clone());
            } else {
                info!(
                    song = %track.song_name,
                    file = %track.file_name,
                    "cloud track has no local tag, leaving it alone"
                );
            }
        }

        if stale.is_empty() {
            return Ok(CheckReport::Converged);
        }
        Ok(CheckReport::Diverged(
            Divergence::new(format!("{} cloud tracks have no local file", stale.len()))
                .with_finding("stale", &stale)?,
        ))
    }

    // No confirm override: deletion keeps the strict two-step gate.

    async fn action(
        &self,
        mut state: PipelineState,
        findings: &Findings,
    ) -> Result<PipelineState, SyncError> {
        let session: Session = state.get(keys::SESSION)?;
        let stale: Vec<CloudTrack> = read_finding(findings, "stale")?;

        let ids = stale
            .iter()
            .map(|t| t.song_id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let body = self
            .client
            .fetch(
                "cloud.delete",
                json!({ "id": ids, "cookie": session.cookie }),
            )
            .await?
            .into_body("cloud.delete")?;

        let succeeded: Vec<u64> = body
            .get("succIds")
            .map(|ids| serde_json::from_value(ids.clone()))
            .transpose()?
            .unwrap_or_default();
        let failed: Vec<u64> = body
            .get("failIds")
            .map(|ids| serde_json::from_value(ids.clone()))
            .transpose()?
            .unwrap_or_default();
        info!(?succeeded, "delete succeeded");
        if !failed.is_empty() {
            warn!(?failed, "delete failed");
        }

        let mut cloud_list: Vec<CloudTrack> = state.get(keys::CLOUD_LIST)?;
        cloud_list.retain(|t| !succeeded.contains(&t.song_id));
        state.insert(keys::CLOUD_LIST, &cloud_list)?;
        Ok(state)
    }
}

/// Structural invariant: every cloud track should be referenced by at
/// least one playlist. Pure check with a yes/no waiver.
#[derive(Debug)]
pub struct UnusedCloudCheck;

impl UnusedCloudCheck {
    /// Creates the check.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for UnusedCloudCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for UnusedCloudCheck {
    fn name(&self) -> &str {
        "unused-cloud-check"
    }

    fn reads(&self) -> Vec<String> {
        vec![keys::PLAYLISTS.to_string(), keys::CLOUD_LIST.to_string()]
    }

    async fn check(&self, state: &PipelineState) -> Result<CheckReport, SyncError> {
        let playlists: Vec<Playlist> = state.get(keys::PLAYLISTS)?;
        let cloud_list: Vec<CloudTrack> = state.get(keys::CLOUD_LIST)?;

        let playlist_tracks = index_by_nested(playlists.iter(), |p| p.tracks.iter(), |t| t.id);
        let unused: Vec<CloudTrack> = cloud_index(&cloud_list)
            .into_iter()
            .filter(|(id, _)| !playlist_tracks.contains_key(id))
            .map(|(_, track)| track.clone())
            .collect();

        if unused.is_empty() {
            return Ok(CheckReport::Converged);
        }
        for track in &unused {
            warn!(
                song = %track.song_name,
                file = %track.file_name,
                id = track.song_id,
                "cloud track is used by no playlist"
            );
        }
        Ok(CheckReport::Diverged(
            Divergence::new(format!("{} cloud tracks are used by no playlist", unused.len()))
                .with_finding("unused", &unused)?,
        ))
    }

    async fn confirm(&self, ctx: &RunContext, _divergence: &Divergence) -> Result<bool, SyncError> {
        confirm_once(ctx.prompter()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::STRICT_CONFIRM_PHRASE;
    use crate::task::TaskOutcome;
    use crate::testing::{MemoryStore, MockService, ScriptedPrompter};
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

    fn cloud_track(id: u64) -> CloudTrack {
        CloudTrack {
            song_id: id,
            song_name: format!("track-{id}"),
            file_name: format!("track-{id} [id{id}].flac"),
            file_size: 1,
        }
    }

    fn with_cloud_list(mut state: PipelineState, tracks: &[CloudTrack]) -> PipelineState {
        state.insert(keys::CLOUD_LIST, &tracks.to_vec()).unwrap();
        state
    }

    #[tokio::test]
    async fn pull_accumulates_pages_and_records_without_prompting() {
        let service = Arc::new(MockService::new());
        service.enqueue_ok(
            "cloud.list",
            json!({ "data": [cloud_track(1)], "hasMore": true }),
        );
        service.enqueue_ok(
            "cloud.list",
            json!({ "data": [cloud_track(2)], "hasMore": false }),
        );

        let task = PullCloudList::new(Arc::clone(&service) as Arc<dyn ServiceClient>);
        let ctx = RunContext::new(Arc::new(ScriptedPrompter::new()));

        let outcome = task.start(&ctx, session_state()).await.unwrap();
        let TaskOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };
        let recorded: Vec<CloudTrack> = state.get(keys::CLOUD_LIST).unwrap();
        assert_eq!(recorded, vec![cloud_track(1), cloud_track(2)]);
    }

    #[tokio::test]
    async fn pull_strict_gates_a_remotely_vanished_track() {
        let service = Arc::new(MockService::new());
        service.enqueue_ok(
            "cloud.list",
            json!({ "data": [cloud_track(1)], "hasMore": false }),
        );

        let task = PullCloudList::new(Arc::clone(&service) as Arc<dyn ServiceClient>);
        let state = with_cloud_list(session_state(), &[cloud_track(1), cloud_track(2)]);

        let prompter = ScriptedPrompter::new();
        prompter.answer_yes_no(true);
        prompter.type_phrase("not the phrase");
        let ctx = RunContext::new(Arc::new(prompter));

        let outcome = task.start(&ctx, state).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Canceled(_)));
    }

    #[tokio::test]
    async fn upload_sends_each_new_track_once_and_reidentifies() {
        let service = Arc::new(MockService::new());
        // The service assigns 99 instead of the tagged 7.
        service.enqueue_ok(
            "cloud.upload",
            json!({ "track": { "songId": 99 } }),
        );
        service.enqueue_ok("cloud.match", json!({}));

        let store = Arc::new(MemoryStore::new());
        store.seed("track [id7].mp3", b"audio");

        let task = CloudUpload::new(
            Arc::clone(&service) as Arc<dyn ServiceClient>,
            Arc::clone(&store) as Arc<dyn FileStore>,
        );
        let state = with_cloud_list(session_state(), &[]);

        let prompter = ScriptedPrompter::new();
        prompter.answer_yes_no(true);
        let ctx = RunContext::new(Arc::new(prompter));

        let outcome = task.start(&ctx, state).await.unwrap();
        let TaskOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };

        assert_eq!(service.call_count("cloud.upload"), 1);
        assert_eq!(service.call_count("cloud.match"), 1);
        let match_call = &service.calls()[1];
        assert_eq!(match_call.1["sid"], json!(99));
        assert_eq!(match_call.1["asid"], json!(7));

        // Post-action convergence: the tagged id is now recorded.
        assert_eq!(task.check(&state).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn upload_converges_when_everything_is_already_remote() {
        let service = Arc::new(MockService::new());
        let store = Arc::new(MemoryStore::new());
        store.seed("track-1 [id1].flac", b"x");

        let task = CloudUpload::new(service, store);
        let state = with_cloud_list(session_state(), &[cloud_track(1)]);
        assert_eq!(task.check(&state).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn prune_deletes_exactly_the_stale_track_after_the_strict_gate() {
        let service = Arc::new(MockService::new());
        service.enqueue_ok(
            "cloud.delete",
            json!({ "succIds": [3], "failIds": [] }),
        );

        let store = Arc::new(MemoryStore::new());
        store.seed("track-1 [id1].flac", b"x");
        store.seed("track-2 [id2].flac", b"y");

        let task = CloudPrune::new(
            Arc::clone(&service) as Arc<dyn ServiceClient>,
            Arc::clone(&store) as Arc<dyn FileStore>,
        );
        let state = with_cloud_list(
            session_state(),
            &[cloud_track(1), cloud_track(2), cloud_track(3)],
        );

        let prompter = ScriptedPrompter::new();
        prompter.answer_yes_no(true);
        prompter.type_phrase(STRICT_CONFIRM_PHRASE);
        let ctx = RunContext::new(Arc::new(prompter));

        let outcome = task.start(&ctx, state).await.unwrap();
        let TaskOutcome::Advanced(state) = outcome else {
            panic!("expected advance");
        };

        assert_eq!(service.call_count("cloud.delete"), 1);
        assert_eq!(service.calls()[0].1["id"], json!("3"));
        let recorded: Vec<CloudTrack> = state.get(keys::CLOUD_LIST).unwrap();
        assert!(recorded.iter().all(|t| t.song_id != 3));

        assert_eq!(task.check(&state).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn prune_never_touches_untagged_cloud_files() {
        let service = Arc::new(MockService::new());
        let store = Arc::new(MemoryStore::new());

        let task = CloudPrune::new(service, store);
        let foreign = CloudTrack {
            song_id: 50,
            song_name: "someone else's".to_string(),
            file_name: "upload.flac".to_string(),
            file_size: 9,
        };
        let state = with_cloud_list(session_state(), &[foreign]);

        // Untagged remote files are reported, not deleted.
        assert_eq!(task.check(&state).await.unwrap(), CheckReport::Converged);
    }

    #[tokio::test]
    async fn unused_check_flags_cloud_tracks_outside_every_playlist() {
        let task = UnusedCloudCheck::new();
        let mut state = with_cloud_list(session_state(), &[cloud_track(1), cloud_track(2)]);
        let playlist: Playlist = serde_json::from_value(json!({
            "id": 1,
            "name": "2024",
            "creator": { "userId": 77, "nickname": "me" },
            "tracks": [{ "id": 1, "name": "track-1" }],
        }))
        .unwrap();
        state.insert(keys::PLAYLISTS, &vec![playlist]).unwrap();

        let report = task.check(&state).await.unwrap();
        let CheckReport::Diverged(divergence) = report else {
            panic!("expected divergence");
        };
        let unused: Vec<CloudTrack> =
            serde_json::from_value(divergence.findings["unused"].clone()).unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].song_id, 2);
    }
}
