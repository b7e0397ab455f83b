//! Time-boxed undo for completed rename operations.
//!
//! Each completed operation that renamed anything leaves behind an undo
//! session: the list of (original, renamed) path pairs plus an expiry.
//! Undoing reverts the pairs in reverse order. A session is single-use;
//! consuming it or letting it expire makes the operation permanent.
//!
//! Sessions live only in memory. When the process exits the window is
//! gone, which is the time-box working as intended.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

/// Undo failures the caller must distinguish.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UndoError {
    #[error("No undo session {0}")]
    NotFound(Uuid),

    #[error("Undo session {0} has expired")]
    Expired(Uuid),

    #[error("Undo session {0} was already used")]
    AlreadyConsumed(Uuid),
}

struct UndoSession {
    /// (original path, renamed path) in the order the renames happened
    pairs: Vec<(PathBuf, PathBuf)>,
    expires_at: Instant,
    consumed: bool,
}

/// Read-only view of a session's state.
#[derive(Debug, Clone)]
pub struct UndoSessionInfo {
    pub id: Uuid,
    pub pair_count: usize,
    pub remaining: Duration,
    pub consumed: bool,
}

/// Result of reverting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoOutcome {
    pub reverted: usize,
    /// Per-pair failures; a file moved or deleted since the rename does
    /// not stop the rest from reverting
    pub errors: Vec<String>,
}

/// In-memory store of undo sessions, injected alongside the operation
/// registry.
#[derive(Default)]
pub struct UndoStore {
    sessions: Mutex<HashMap<Uuid, UndoSession>>,
}

impl UndoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session for a completed operation's renames.
    pub fn create(&self, pairs: Vec<(PathBuf, PathBuf)>, ttl: Duration) -> Uuid {
        self.prune_expired();
        let id = Uuid::new_v4();
        self.sessions.lock().insert(
            id,
            UndoSession {
                pairs,
                expires_at: Instant::now() + ttl,
                consumed: false,
            },
        );
        tracing::debug!("Created undo session {} ({}s window)", id, ttl.as_secs());
        id
    }

    pub fn info(&self, id: Uuid) -> Option<UndoSessionInfo> {
        let sessions = self.sessions.lock();
        let session = sessions.get(&id)?;
        Some(UndoSessionInfo {
            id,
            pair_count: session.pairs.len(),
            remaining: session.expires_at.saturating_duration_since(Instant::now()),
            consumed: session.consumed,
        })
    }

    /// Revert a session's renames, most recent first.
    ///
    /// The session is consumed even when some pairs fail to revert;
    /// retrying against a half-reverted state would be worse.
    pub fn undo(&self, id: Uuid) -> Result<UndoOutcome, UndoError> {
        let pairs = {
            let mut sessions = self.sessions.lock();
            let session = sessions.get_mut(&id).ok_or(UndoError::NotFound(id))?;
            if session.consumed {
                return Err(UndoError::AlreadyConsumed(id));
            }
            if Instant::now() >= session.expires_at {
                return Err(UndoError::Expired(id));
            }
            session.consumed = true;
            std::mem::take(&mut session.pairs)
        };

        let mut reverted = 0;
        let mut errors = Vec::new();
        for (original, renamed) in pairs.iter().rev() {
            // A file created at the original path since the rename must not
            // be overwritten. Case-only pairs are exempt: on case-insensitive
            // filesystems the "occupant" is the renamed file itself.
            if !crate::ops::case_only_siblings(original, renamed) && original.exists() {
                errors.push(format!(
                    "original path {:?} is now occupied; keeping {:?}",
                    original, renamed
                ));
                continue;
            }
            match crate::ops::move_file(renamed, original) {
                Ok(()) => reverted += 1,
                Err(e) => errors.push(format!(
                    "could not restore {:?} to {:?}: {}",
                    renamed, original, e
                )),
            }
        }

        tracing::info!(
            "Undo session {}: {} restored, {} failed",
            id,
            reverted,
            errors.len()
        );
        Ok(UndoOutcome { reverted, errors })
    }

    /// Drop sessions past their expiry.
    ///
    /// Consumed sessions are kept until they expire so a repeat undo keeps
    /// failing with `AlreadyConsumed` rather than `NotFound`.
    pub fn prune_expired(&self) {
        let now = Instant::now();
        self.sessions
            .lock()
            .retain(|_, session| session.expires_at > now);
    }
}
