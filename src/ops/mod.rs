//! Asynchronous rename operations: lifecycle, progress, cancellation.
//!
//! Starting a rename returns immediately with an operation id; the work
//! runs on a spawned task and publishes progress into a shared record.
//! Status flows Pending -> Running -> Completed | Cancelled | Failed.
//!
//! Cancellation is cooperative. The token is checked at defined
//! checkpoints (before each file, before network and analysis calls,
//! before each filesystem write), so an in-flight rename always finishes
//! and already-renamed files keep their new names.
//!
//! Per-item failures are recorded and never abort the batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::OperationsConfig;
use crate::error::Error;
use crate::planner::{plan_item, ClaimedNames, PlanStatus};
use crate::resolver::MetadataResolver;
use crate::template::TemplateEngine;
use crate::undo::UndoStore;

/// Shared cancellation flag, cloned into workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl OperationStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Cancelled | OperationStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one file within an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Renamed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub status: ItemStatus,
    pub message: Option<String>,
}

/// Mutable progress record for one operation. Snapshot via clone.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub id: Uuid,
    pub status: OperationStatus,
    pub total: usize,
    pub processed: usize,
    pub renamed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// File currently being processed, for progress displays
    pub current_file: Option<PathBuf>,
    pub items: Vec<ItemOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Undo session created on completion, when anything was renamed
    pub undo_id: Option<Uuid>,
}

impl OperationRecord {
    fn new(id: Uuid, total: usize) -> Self {
        Self {
            id,
            status: OperationStatus::Pending,
            total,
            processed: 0,
            renamed: 0,
            skipped: 0,
            failed: 0,
            current_file: None,
            items: Vec::with_capacity(total),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            undo_id: None,
        }
    }
}

/// One live operation: its record plus its cancellation token.
pub struct OperationHandle {
    record: Mutex<OperationRecord>,
    cancel: CancelToken,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.record.lock().id
    }

    pub fn snapshot(&self) -> OperationRecord {
        self.record.lock().clone()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn update(&self, f: impl FnOnce(&mut OperationRecord)) {
        f(&mut self.record.lock());
    }
}

/// In-memory registry of operations, injected wherever operations are
/// started or queried. No global state.
pub struct OperationRegistry {
    ops: Mutex<HashMap<Uuid, Arc<OperationHandle>>>,
    retention: Duration,
}

impl OperationRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            ops: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Register a new pending operation over `total` files.
    pub fn create(&self, total: usize) -> Arc<OperationHandle> {
        self.prune_finished();
        let id = Uuid::new_v4();
        let handle = Arc::new(OperationHandle {
            record: Mutex::new(OperationRecord::new(id, total)),
            cancel: CancelToken::new(),
        });
        self.ops.lock().insert(id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<OperationHandle>> {
        self.ops.lock().get(&id).cloned()
    }

    pub fn snapshot(&self, id: Uuid) -> Option<OperationRecord> {
        self.get(id).map(|h| h.snapshot())
    }

    /// Request cancellation. Returns false for unknown or finished ops.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.get(id) {
            Some(handle) if !handle.snapshot().status.is_finished() => {
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Remove a finished operation's record. Running operations stay.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut ops = self.ops.lock();
        match ops.get(&id) {
            Some(handle) if handle.snapshot().status.is_finished() => {
                ops.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.ops.lock().keys().copied().collect()
    }

    /// Drop finished records older than the retention window.
    pub fn prune_finished(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        self.ops.lock().retain(|_, handle| {
            let record = handle.snapshot();
            match record.finished_at {
                Some(finished) => finished > cutoff,
                None => true,
            }
        });
    }
}

/// Everything an execution run needs to know about the batch.
#[derive(Debug, Clone)]
pub struct RenameJob {
    pub files: Vec<PathBuf>,
    pub template: String,
    /// Persist resolved metadata into the files' tags after renaming
    pub write_tags: bool,
    /// When writing tags, only fill fields that are currently empty
    pub fill_only: bool,
}

/// Run a rename operation to completion, publishing progress into the
/// handle. Spawned by the service layer; never called concurrently for
/// the same handle.
pub async fn execute(
    handle: Arc<OperationHandle>,
    job: RenameJob,
    resolver: Arc<MetadataResolver>,
    engine: TemplateEngine,
    undo: Arc<UndoStore>,
    ops_cfg: OperationsConfig,
) {
    let id = handle.id();
    let cancel = handle.cancel_token();
    handle.update(|r| {
        r.status = OperationStatus::Running;
        r.started_at = Utc::now();
    });
    tracing::info!("Operation {} started: {} files", id, job.files.len());

    let mut claimed = ClaimedNames::new();
    let mut performed: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut cancelled = false;

    for file in &job.files {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        handle.update(|r| r.current_file = Some(file.clone()));

        let outcome = match resolver.resolve(file, &cancel).await {
            Err(Error::Cancelled) => {
                cancelled = true;
                break;
            }
            Err(e) => ItemOutcome {
                source: file.clone(),
                destination: None,
                status: ItemStatus::Failed,
                message: Some(e.to_string()),
            },
            Ok(metadata) => {
                let planned = plan_item(file, metadata, &engine, &job.template, &mut claimed);
                match planned.status {
                    PlanStatus::WillSkip => ItemOutcome {
                        source: file.clone(),
                        destination: planned.destination_path,
                        status: ItemStatus::Skipped,
                        message: planned.reason,
                    },
                    PlanStatus::Error => ItemOutcome {
                        source: file.clone(),
                        destination: planned.destination_path,
                        status: ItemStatus::Failed,
                        message: planned.reason,
                    },
                    PlanStatus::WillRename => {
                        // checkpoint: no new filesystem writes once cancelled
                        if cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }
                        perform_rename(
                            file,
                            &planned,
                            job.write_tags,
                            job.fill_only,
                            &mut performed,
                        )
                    }
                }
            }
        };

        handle.update(|r| {
            match outcome.status {
                ItemStatus::Renamed => r.renamed += 1,
                ItemStatus::Skipped => r.skipped += 1,
                ItemStatus::Failed => r.failed += 1,
            }
            r.processed += 1;
            r.items.push(outcome);
        });

        let snapshot = handle.snapshot();
        if ops_cfg.progress_log_every > 0 && snapshot.processed % ops_cfg.progress_log_every == 0 {
            tracing::info!(
                "Operation {}: {}/{} processed ({} renamed, {} skipped, {} failed)",
                id,
                snapshot.processed,
                snapshot.total,
                snapshot.renamed,
                snapshot.skipped,
                snapshot.failed
            );
        }
    }

    // Per-item failures never fail the run; a batch where every file
    // failed still ends Completed with failed == total. Failed is reserved
    // for faults that stop the run itself.
    let snapshot = handle.snapshot();
    let status = if cancelled {
        OperationStatus::Cancelled
    } else {
        OperationStatus::Completed
    };

    // Undo sessions exist only for runs that completed; a cancelled run's
    // partial renames are deliberately left in place.
    let undo_id = if status == OperationStatus::Completed && !performed.is_empty() {
        Some(undo.create(performed, Duration::from_secs(ops_cfg.undo_ttl_secs)))
    } else {
        None
    };

    handle.update(|r| {
        r.status = status;
        r.finished_at = Some(Utc::now());
        r.current_file = None;
        r.undo_id = undo_id;
    });

    tracing::info!(
        "Operation {} {}: {} renamed, {} skipped, {} failed",
        id,
        status,
        snapshot.renamed,
        snapshot.skipped,
        snapshot.failed
    );
}

fn perform_rename(
    source: &Path,
    planned: &crate::planner::RenamePreviewItem,
    write_tags: bool,
    fill_only: bool,
    performed: &mut Vec<(PathBuf, PathBuf)>,
) -> ItemOutcome {
    let Some(destination) = planned.destination_path.clone() else {
        return ItemOutcome {
            source: source.to_path_buf(),
            destination: None,
            status: ItemStatus::Failed,
            message: Some("no destination planned".to_string()),
        };
    };

    if let Err(e) = move_file(source, &destination) {
        return ItemOutcome {
            source: source.to_path_buf(),
            destination: Some(destination),
            status: ItemStatus::Failed,
            message: Some(format!("rename failed: {}", e)),
        };
    }
    performed.push((source.to_path_buf(), destination.clone()));

    let mut message = None;
    if write_tags {
        match crate::metadata::write_resolved(&destination, &planned.metadata, fill_only) {
            Ok(report) => {
                tracing::debug!(
                    "Wrote {} tag fields to {:?}",
                    report.fields_updated,
                    destination
                );
            }
            Err(e) => {
                // The rename itself succeeded; record the tag problem
                tracing::warn!("Tag write failed for {:?}: {}", destination, e);
                message = Some(format!("renamed, but tag write failed: {}", e));
            }
        }
    }

    ItemOutcome {
        source: source.to_path_buf(),
        destination: Some(destination),
        status: ItemStatus::Renamed,
        message,
    }
}

/// Move a file, handling case-only renames and cross-device moves.
///
/// Case-insensitive filesystems treat a case-only rename as a no-op, so
/// those go through a temporary sibling name in two steps.
pub(crate) fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if from == to {
        return Ok(());
    }

    if case_only_siblings(from, to) {
        let parent = to.parent().unwrap_or_else(|| Path::new(""));
        let name = to.file_name().and_then(|n| n.to_str()).unwrap_or("file");
        let tag = Uuid::new_v4().simple().to_string();
        let temp = parent.join(format!(".{}.{}~", name, &tag[..8]));
        std::fs::rename(from, &temp)?;
        if let Err(e) = std::fs::rename(&temp, to) {
            // Roll back so the file never lands on the temp name
            let _ = std::fs::rename(&temp, from);
            return Err(e);
        }
        return Ok(());
    }

    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            // rename cannot cross filesystems; fall back to copy + delete
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// True when the two paths differ only in filename case.
pub(crate) fn case_only_siblings(a: &Path, b: &Path) -> bool {
    a != b
        && a.parent() == b.parent()
        && match (
            a.file_name().and_then(|n| n.to_str()),
            b.file_name().and_then(|n| n.to_str()),
        ) {
            (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
            _ => false,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::mocks::StubAnalyzer;
    use crate::config::{ResolverConfig, TemplateConfig};
    use crate::fingerprint::RateLimiter;
    use crate::metadata::TagData;
    use crate::test_utils::StaticTagSource;
    use tempfile::tempdir;

    fn resolver_for(tags: StaticTagSource) -> Arc<MetadataResolver> {
        let cfg = ResolverConfig {
            fingerprint_enabled: false,
            ..Default::default()
        };
        Arc::new(MetadataResolver::new(
            cfg,
            Arc::new(tags),
            None,
            Arc::new(StubAnalyzer::empty()),
            Arc::new(RateLimiter::new(Duration::from_millis(0))),
        ))
    }

    fn tagged(artist: &str, title: &str) -> TagData {
        TagData {
            artist: Some(artist.to_string()),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_execute_renames_files_and_creates_undo() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        std::fs::write(&a, b"audio").unwrap();
        std::fs::write(&b, b"audio").unwrap();

        let tags = StaticTagSource::empty()
            .with(&a, tagged("Alpha", "First"))
            .with(&b, tagged("Beta", "Second"));
        let registry = OperationRegistry::new(Duration::from_secs(3600));
        let handle = registry.create(2);
        let undo = Arc::new(UndoStore::new());

        execute(
            Arc::clone(&handle),
            RenameJob {
                files: vec![a.clone(), b.clone()],
                template: "{artist} - {title}".to_string(),
                write_tags: false,
                fill_only: false,
            },
            resolver_for(tags),
            TemplateEngine::new(TemplateConfig::default()),
            Arc::clone(&undo),
            OperationsConfig::default(),
        )
        .await;

        let record = handle.snapshot();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.renamed, 2);
        assert_eq!(record.failed, 0);
        assert!(record.undo_id.is_some());
        assert!(!a.exists());
        assert!(dir.path().join("Alpha - First.mp3").exists());
        assert!(dir.path().join("Beta - Second.mp3").exists());
    }

    #[tokio::test]
    async fn test_execute_cancelled_before_start_renames_nothing() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        std::fs::write(&a, b"audio").unwrap();

        let tags = StaticTagSource::empty().with(&a, tagged("Alpha", "First"));
        let registry = OperationRegistry::new(Duration::from_secs(3600));
        let handle = registry.create(1);
        handle.cancel_token().cancel();

        execute(
            Arc::clone(&handle),
            RenameJob {
                files: vec![a.clone()],
                template: "{artist} - {title}".to_string(),
                write_tags: false,
                fill_only: false,
            },
            resolver_for(tags),
            TemplateEngine::new(TemplateConfig::default()),
            Arc::new(UndoStore::new()),
            OperationsConfig::default(),
        )
        .await;

        let record = handle.snapshot();
        assert_eq!(record.status, OperationStatus::Cancelled);
        assert_eq!(record.renamed, 0);
        assert!(record.undo_id.is_none());
        assert!(a.exists());
    }

    #[tokio::test]
    async fn test_execute_missing_file_is_item_failure() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.mp3");
        std::fs::write(&good, b"audio").unwrap();
        let missing = dir.path().join("missing.mp3");

        let tags = StaticTagSource::empty()
            .failing_unknown()
            .with(&good, tagged("Alpha", "First"));
        let registry = OperationRegistry::new(Duration::from_secs(3600));
        let handle = registry.create(2);

        execute(
            Arc::clone(&handle),
            RenameJob {
                files: vec![missing, good],
                template: "{artist} - {title}".to_string(),
                write_tags: false,
                fill_only: false,
            },
            resolver_for(tags),
            TemplateEngine::new(TemplateConfig::default()),
            Arc::new(UndoStore::new()),
            OperationsConfig::default(),
        )
        .await;

        let record = handle.snapshot();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.failed, 1);
        assert_eq!(record.renamed, 1);
    }

    #[tokio::test]
    async fn test_execute_all_failures_still_completes() {
        let tags = StaticTagSource::empty().failing_unknown();
        let registry = OperationRegistry::new(Duration::from_secs(3600));
        let handle = registry.create(1);

        execute(
            Arc::clone(&handle),
            RenameJob {
                files: vec![PathBuf::from("/nope/missing.mp3")],
                template: "{artist}".to_string(),
                write_tags: false,
                fill_only: false,
            },
            resolver_for(tags),
            TemplateEngine::new(TemplateConfig::default()),
            Arc::new(UndoStore::new()),
            OperationsConfig::default(),
        )
        .await;

        let record = handle.snapshot();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.failed, record.total);
        assert!(record.error.is_none());
        assert!(record.undo_id.is_none());
    }

    #[test]
    fn test_case_only_siblings() {
        let a = Path::new("/music/track.mp3");
        assert!(case_only_siblings(a, Path::new("/music/Track.mp3")));
        assert!(!case_only_siblings(a, a));
        assert!(!case_only_siblings(a, Path::new("/music/other.mp3")));
        assert!(!case_only_siblings(a, Path::new("/other/Track.mp3")));
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = OperationRegistry::new(Duration::from_secs(3600));
        let handle = registry.create(5);
        let id = handle.id();

        assert!(registry.get(id).is_some());
        assert_eq!(registry.snapshot(id).unwrap().status, OperationStatus::Pending);

        // Running operations cannot be removed
        handle.update(|r| r.status = OperationStatus::Running);
        assert!(!registry.remove(id));

        handle.update(|r| {
            r.status = OperationStatus::Completed;
            r.finished_at = Some(Utc::now());
        });
        assert!(registry.remove(id));
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_registry_cancel_only_live_operations() {
        let registry = OperationRegistry::new(Duration::from_secs(3600));
        let handle = registry.create(1);
        let id = handle.id();

        assert!(registry.cancel(id));
        assert!(handle.cancel_token().is_cancelled());

        handle.update(|r| r.status = OperationStatus::Completed);
        assert!(!registry.cancel(id));
        assert!(!registry.cancel(Uuid::new_v4()));
    }

    #[test]
    fn test_registry_prunes_old_finished_records() {
        let registry = OperationRegistry::new(Duration::from_secs(0));
        let handle = registry.create(1);
        let id = handle.id();
        handle.update(|r| {
            r.status = OperationStatus::Completed;
            r.finished_at = Some(Utc::now() - chrono::Duration::seconds(10));
        });

        registry.prune_finished();
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_move_file_case_only_two_step() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("track.mp3");
        let to = dir.path().join("Track.mp3");
        std::fs::write(&from, b"x").unwrap();

        move_file(&from, &to).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Track.mp3".to_string()]);
    }

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
