//! Conflict detection and resolution.

use crate::envelope::Persisted;
use crate::error::ProtocolError;
use crate::operation::unix_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A divergence between the local and the server version of a record.
///
/// Both versions are kept until a decision is made. A conflict transitions
/// from unresolved to resolved exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Unique conflict ID.
    pub id: String,
    /// Collection of the diverging record.
    pub collection: String,
    /// Diverging record ID.
    pub document_id: String,
    /// Local snapshot.
    pub local_data: Option<Vec<u8>>,
    /// Server snapshot.
    pub server_data: Option<Vec<u8>>,
    /// Local modification time (unix millis).
    pub local_timestamp: u64,
    /// Server modification time (unix millis).
    pub server_timestamp: u64,
    /// Detection time (unix millis).
    pub detected_at: u64,
    /// Whether a resolution was recorded.
    pub resolved: bool,
    /// Recorded resolution.
    pub resolution: Option<ConflictResolution>,
    /// Payload supplied with a merged resolution.
    #[serde(default)]
    pub merged_data: Option<Vec<u8>>,
}

impl SyncConflict {
    /// Creates a new unresolved conflict.
    pub fn new(
        collection: impl Into<String>,
        document_id: impl Into<String>,
        local_data: Option<Vec<u8>>,
        server_data: Option<Vec<u8>>,
        local_timestamp: u64,
        server_timestamp: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: collection.into(),
            document_id: document_id.into(),
            local_data,
            server_data,
            local_timestamp,
            server_timestamp,
            detected_at: unix_millis(),
            resolved: false,
            resolution: None,
            merged_data: None,
        }
    }

    /// Returns true if this conflict targets the given record.
    pub fn is_for(&self, collection: &str, document_id: &str) -> bool {
        self.collection == collection && self.document_id == document_id
    }

    /// Replaces both snapshots of an unresolved conflict.
    ///
    /// Keeps the id and detection time. Returns false if already resolved.
    pub fn refresh(
        &mut self,
        local_data: Option<Vec<u8>>,
        server_data: Option<Vec<u8>>,
        local_timestamp: u64,
        server_timestamp: u64,
    ) -> bool {
        if self.resolved {
            return false;
        }
        self.local_data = local_data;
        self.server_data = server_data;
        self.local_timestamp = local_timestamp;
        self.server_timestamp = server_timestamp;
        true
    }

    /// Records a resolution.
    ///
    /// Returns false, leaving the conflict untouched, if it was already
    /// resolved.
    pub fn resolve(&mut self, resolution: ConflictResolution) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolution = Some(resolution);
        true
    }

    /// Records a merged resolution along with the merged payload.
    pub fn resolve_merged(&mut self, merged: Option<Vec<u8>>) -> bool {
        if !self.resolve(ConflictResolution::Merged) {
            return false;
        }
        self.merged_data = merged;
        true
    }

    /// Returns the payload selected by the recorded resolution.
    pub fn winning_data(&self) -> Option<&[u8]> {
        match self.resolution? {
            ConflictResolution::Server => self.server_data.as_deref(),
            ConflictResolution::Client => self.local_data.as_deref(),
            ConflictResolution::Merged => self.merged_data.as_deref(),
        }
    }
}

impl Persisted for SyncConflict {
    const KIND: &'static str = "sync_conflict";

    fn key(&self) -> &str {
        &self.id
    }
}

/// Recorded outcome of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Server version was kept.
    Server,
    /// Local version was kept.
    Client,
    /// A merged version was supplied by the caller.
    Merged,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictResolution::Server => "server",
            ConflictResolution::Client => "client",
            ConflictResolution::Merged => "merged",
        })
    }
}

/// Strategy for resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Server always wins.
    ServerWins,
    /// Client always wins.
    ClientWins,
    /// Later timestamp wins; ties go to the server.
    NewestWins,
    /// Requires a merged payload; never resolves on its own.
    Manual,
}

impl ConflictStrategy {
    /// Returns the resolution this strategy picks, or `None` for manual.
    pub fn pick(&self, local_timestamp: u64, server_timestamp: u64) -> Option<ConflictResolution> {
        match self {
            ConflictStrategy::ServerWins => Some(ConflictResolution::Server),
            ConflictStrategy::ClientWins => Some(ConflictResolution::Client),
            ConflictStrategy::NewestWins => {
                if local_timestamp > server_timestamp {
                    Some(ConflictResolution::Client)
                } else {
                    Some(ConflictResolution::Server)
                }
            }
            ConflictStrategy::Manual => None,
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-wins" => Ok(ConflictStrategy::ServerWins),
            "client-wins" => Ok(ConflictStrategy::ClientWins),
            "newest-wins" => Ok(ConflictStrategy::NewestWins),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(ProtocolError::invalid("conflict strategy", other)),
        }
    }
}
