//! Wire models for the music service.
//!
//! Field names follow the service's camelCase JSON convention.

use serde::{Deserialize, Serialize};

/// The `specialType` value the service assigns to the favorites list.
pub const FAVORITES_SPECIAL_TYPE: u32 = 5;

/// An authenticated session recorded under the `session` state key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque session cookie forwarded with every call.
    pub cookie: String,
    /// The account the cookie resolves to.
    pub account_id: u64,
    /// Display name, for logs only.
    pub display_name: String,
}

/// The owner of a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistOwner {
    /// Owning account id.
    pub user_id: u64,
    /// Display name.
    pub nickname: String,
}

/// A track as it appears inside a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Service-assigned track id.
    pub id: u64,
    /// Track title.
    pub name: String,
    /// Album title, when the service includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
}

impl Track {
    /// One-line rendering used by divergence logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.album {
            Some(album) => format!("\"{}\"({}; from {album})", self.name, self.id),
            None => format!("\"{}\"({})", self.name, self.id),
        }
    }
}

/// A playlist with its full track listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    /// Service-assigned playlist id.
    pub id: u64,
    /// Playlist name.
    pub name: String,
    /// Who owns the playlist.
    pub creator: PlaylistOwner,
    /// Service-specific type marker; see [`FAVORITES_SPECIAL_TYPE`].
    #[serde(default)]
    pub special_type: u32,
    /// Complete track listing.
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// Whether this is the account's favorites list.
    #[must_use]
    pub fn is_favorites(&self) -> bool {
        self.special_type == FAVORITES_SPECIAL_TYPE
    }

    /// Whether the playlist belongs to the given account.
    #[must_use]
    pub fn owned_by(&self, account_id: u64) -> bool {
        self.creator.user_id == account_id
    }
}

/// A track stored in the account's cloud storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudTrack {
    /// Service-assigned track id.
    pub song_id: u64,
    /// Track title as recorded by the service.
    pub song_name: String,
    /// The uploaded file's name, carrying the local `[id<n>]` tag when
    /// the upload originated from this tool.
    pub file_name: String,
    /// File size in bytes.
    #[serde(default)]
    pub file_size: u64,
}
