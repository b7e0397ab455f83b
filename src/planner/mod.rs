//! Rename planning: compute what a batch rename would do without doing it.
//!
//! A plan pairs each source file with its destination name and a status.
//! Planning is a pure dry run over resolved metadata - no renames, no tag
//! writes. The same per-item logic drives actual execution so a preview
//! and the operation that follows it can never disagree.
//!
//! Collisions resolve first-wins in input order: the first file to claim a
//! destination name keeps it, later claimants become per-item errors.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::ops::CancelToken;
use crate::resolver::{MetadataResolver, ResolvedMetadata};
use crate::template::{TemplateEngine, TemplateError};

/// What would happen to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// File gets a new name
    WillRename,
    /// File is already correctly named
    WillSkip,
    /// This file cannot be renamed; the rest of the batch is unaffected
    Error,
}

/// One row of a rename plan.
#[derive(Debug, Clone)]
pub struct RenamePreviewItem {
    pub source_path: PathBuf,
    pub destination_path: Option<PathBuf>,
    pub status: PlanStatus,
    /// Why the file is skipped or in error
    pub reason: Option<String>,
    /// The rename only changes letter case
    pub case_only: bool,
    pub metadata: ResolvedMetadata,
}

/// Names already claimed within the batch, keyed by parent directory and
/// case-folded file name.
pub(crate) type ClaimedNames = HashSet<(PathBuf, String)>;

/// Computes rename plans.
pub struct RenamePlanner {
    resolver: Arc<MetadataResolver>,
    engine: TemplateEngine,
}

impl RenamePlanner {
    pub fn new(resolver: Arc<MetadataResolver>, engine: TemplateEngine) -> Self {
        Self { resolver, engine }
    }

    /// Plan a batch rename. Read-only; resolves metadata for every file.
    ///
    /// Fails up front on an invalid template; per-file problems become
    /// [`PlanStatus::Error`] rows instead of failing the batch.
    pub async fn plan(
        &self,
        files: &[PathBuf],
        template: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<RenamePreviewItem>> {
        let report = self.engine.validate(template);
        if !report.valid {
            return Err(Error::Template(TemplateError::Invalid(
                report.errors.join("; "),
            )));
        }

        let mut items = Vec::with_capacity(files.len());
        let mut claimed = ClaimedNames::new();

        for file in files {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let metadata = match self.resolver.resolve(file, cancel).await {
                Ok(metadata) => metadata,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    items.push(RenamePreviewItem {
                        source_path: file.clone(),
                        destination_path: None,
                        status: PlanStatus::Error,
                        reason: Some(e.to_string()),
                        case_only: false,
                        metadata: ResolvedMetadata::new(file.as_path()),
                    });
                    continue;
                }
            };
            items.push(plan_item(file, metadata, &self.engine, template, &mut claimed));
        }

        Ok(items)
    }

    /// Rough wall-clock estimate for resolving and renaming `file_count`
    /// files, dominated by the lookup rate limit.
    pub fn estimate_duration(cfg: &ResolverConfig, file_count: usize) -> Duration {
        let lookup_ms = if cfg.fingerprint_enabled {
            cfg.rate_limit_ms
        } else {
            0
        };
        // 100ms of tag IO plus a typical analysis run per file
        let per_file_ms = 100 + lookup_ms + 2_000;
        Duration::from_millis(per_file_ms * file_count as u64)
    }
}

/// Plan one file against already-claimed destination names.
///
/// Shared between [`RenamePlanner::plan`] and operation execution, so
/// previews and real runs apply identical collision and skip rules.
pub(crate) fn plan_item(
    source: &Path,
    metadata: ResolvedMetadata,
    engine: &TemplateEngine,
    template: &str,
    claimed: &mut ClaimedNames,
) -> RenamePreviewItem {
    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let new_name = match engine.build_file_name(template, &metadata, extension) {
        Ok(name) => name,
        Err(e) => {
            return RenamePreviewItem {
                source_path: source.to_path_buf(),
                destination_path: None,
                status: PlanStatus::Error,
                reason: Some(e.to_string()),
                case_only: false,
                metadata,
            };
        }
    };

    let current_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();
    let parent = source.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let destination = parent.join(&new_name);
    let claim_key = (parent, new_name.to_lowercase());

    if new_name == current_name {
        claimed.insert(claim_key);
        return RenamePreviewItem {
            source_path: source.to_path_buf(),
            destination_path: Some(destination),
            status: PlanStatus::WillSkip,
            reason: Some("already correctly named".to_string()),
            case_only: false,
            metadata,
        };
    }

    let case_only = new_name.eq_ignore_ascii_case(&current_name);

    if claimed.contains(&claim_key) {
        return RenamePreviewItem {
            source_path: source.to_path_buf(),
            destination_path: Some(destination),
            status: PlanStatus::Error,
            reason: Some("destination collision".to_string()),
            case_only,
            metadata,
        };
    }

    // A file already on disk at the destination (outside this batch) also
    // blocks the rename. A case-only rename trips over its own source on
    // case-insensitive filesystems, so it is exempt.
    if !case_only && destination.exists() {
        return RenamePreviewItem {
            source_path: source.to_path_buf(),
            destination_path: Some(destination),
            status: PlanStatus::Error,
            reason: Some("destination already exists".to_string()),
            case_only,
            metadata,
        };
    }

    claimed.insert(claim_key);
    RenamePreviewItem {
        source_path: source.to_path_buf(),
        destination_path: Some(destination),
        status: PlanStatus::WillRename,
        reason: None,
        case_only,
        metadata,
    }
}
