//! The stock reconciliation tasks and the standard pipeline assembly.

mod cloud;
mod persist;
mod playlists;
mod session;


pub use cloud::{CloudPrune, CloudUpload, PullCloudList, UnusedCloudCheck};
pub use persist::{LoadState, SaveState};
pub use playlists::{CoverageCheck, ExclusiveGroupCheck, InboxDedup, PullPlaylists};
pub use session::{Credentials, RefreshSession};

use crate::library::FileStore;
use crate::pipeline::Pipeline;
use crate::service::ServiceClient;
use std::sync::Arc;

/// Assembles the full reconciliation pipeline.
///
/// Load snapshot → refresh session → pull playlists → exclusivity →
/// inbox dedup → coverage → pull cloud → prune → upload → pull cloud
/// again → unused check → save snapshot.
#[must_use]
pub fn standard_pipeline(
    client: Arc<dyn ServiceClient>,
    store: Arc<dyn FileStore>,
    state_file: &str,
    credentials: Credentials,
    coverage_playlist: &str,
) -> Pipeline {
    Pipeline::new("library-reconcile")
        .pipe(LoadState::new(Arc::clone(&store), state_file))
        .pipe(RefreshSession::new(Arc::clone(&client), credentials))
        .pipe(PullPlaylists::new(Arc::clone(&client)))
        .pipe(ExclusiveGroupCheck::years())
        .pipe(InboxDedup::new(Arc::clone(&client)))
        .pipe(CoverageCheck::new(coverage_playlist))
        .pipe(PullCloudList::new(Arc::clone(&client)))
        .pipe(CloudPrune::new(Arc::clone(&client), Arc::clone(&store)))
        .pipe(CloudUpload::new(Arc::clone(&client), Arc::clone(&store)))
        .pipe(PullCloudList::new(client))
        .pipe(UnusedCloudCheck::new())
        .pipe(SaveState::new(store, state_file))
}
