//! # Tunesync
//!
//! Convergent task pipelines for reconciling a personal music library
//! against a remote music service.
//!
//! Every operation (pulling remote snapshots, deduplicating playlists,
//! uploading or pruning cloud storage) is a [`Task`](task::Task) with a
//! uniform two-phase contract:
//!
//! - **check**: decide whether the world already satisfies the task's
//!   postcondition, reporting the divergence (and the data needed to fix
//!   it) when it does not
//! - **confirm**: an interactive gate, strict by default, consulted only
//!   when the check diverged
//! - **action**: the corrective effect, which must converge; re-running
//!   the check immediately afterwards passes
//!
//! Tasks compose into a [`Pipeline`](pipeline::Pipeline) that threads one
//! JSON state document through the chain and short-circuits on the first
//! declined gate. No destructive action ever runs without either a passing
//! check or an explicit human confirmation.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tunesync::prelude::*;
//!
//! let pipeline = standard_pipeline(client, store, "state.json", credentials, "Level 5");
//! pipeline.validate(&[])?;
//!
//! let ctx = RunContext::new(Arc::new(TerminalPrompter::new()));
//! match pipeline.start(&ctx, PipelineState::new()).await? {
//!     TaskOutcome::Advanced(_) => println!("library reconciled"),
//!     TaskOutcome::Canceled(c) => println!("stopped at {}: {}", c.task, c.reason),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod diff;
pub mod errors;
pub mod library;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod prompt;
pub mod service;
pub mod state;
pub mod task;
pub mod tasks;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::{
        AssemblyError, DuplicateKeyError, ServiceError, StateShapeError, SyncError,
    };
    pub use crate::library::{DiskStore, FileStore, LocalTrack};
    pub use crate::model::{CloudTrack, Playlist, PlaylistOwner, Session, Track};
    pub use crate::pipeline::Pipeline;
    pub use crate::prompt::{Prompter, TerminalPrompter, STRICT_CONFIRM_PHRASE};
    pub use crate::service::{ServiceClient, ServiceResponse};
    pub use crate::state::{keys, PipelineState};
    pub use crate::task::{
        Cancellation, CheckReport, Divergence, Findings, FnTask, RunContext, Task, TaskOutcome,
    };
    pub use crate::tasks::{
        standard_pipeline, CloudPrune, CloudUpload, CoverageCheck, Credentials,
        ExclusiveGroupCheck, InboxDedup, LoadState, PullCloudList, PullPlaylists, RefreshSession,
        SaveState, UnusedCloudCheck,
    };
}
