//! Service layer tying resolution, planning, operations, and undo together.
//!
//! [`RenameService`] owns the shared state (config, operation registry,
//! undo store, lookup rate limiter) and is the only API the CLI talks to.
//! Metadata sources are injected as trait objects, so tests run the full
//! pipeline against fakes with no network, no extractor binaries, and no
//! real tag parsing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::analysis::{ExternalAnalyzer, FeatureAnalyzer};
use crate::config::{self, Config, ConfigError};
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintApi, FingerprintResolver, RateLimiter};
use crate::metadata::{LoftyTagSource, TagSource};
use crate::ops::{self, OperationRecord, OperationRegistry, RenameJob};
use crate::planner::{RenamePlanner, RenamePreviewItem};
use crate::resolver::{MetadataResolver, ResolvedMetadata};
use crate::template::{TemplateEngine, TemplateError, ValidationReport};
use crate::undo::{UndoOutcome, UndoSessionInfo, UndoStore};

/// Options for starting a rename operation.
#[derive(Debug, Clone, Default)]
pub struct RenameOptions {
    /// Template override; the configured default applies when absent
    pub template: Option<String>,
    /// Persist resolved metadata into the files' tags after renaming
    pub write_tags: bool,
    /// When writing tags, only fill fields that are currently empty
    pub fill_only: bool,
}

/// Application facade. One instance per process, shared behind `Arc`.
pub struct RenameService {
    config: RwLock<Config>,
    registry: Arc<OperationRegistry>,
    undo: Arc<UndoStore>,
    tags: Arc<dyn TagSource>,
    fingerprint: Option<Arc<dyn FingerprintApi>>,
    analyzer: Arc<dyn FeatureAnalyzer>,
    limiter: Arc<RateLimiter>,
}

impl RenameService {
    /// Build a service with production sources.
    ///
    /// Fingerprint lookups are available only when an AcoustID API key is
    /// configured; without one the resolver degrades to tags and analysis.
    pub fn new(config: Config) -> Self {
        let fingerprint: Option<Arc<dyn FingerprintApi>> = config
            .credentials
            .acoustid_api_key
            .as_deref()
            .map(|key| Arc::new(FingerprintResolver::new(key)) as Arc<dyn FingerprintApi>);
        let analyzer = Arc::new(ExternalAnalyzer::new(Duration::from_secs(
            config.resolver.analysis_timeout_secs,
        )));
        Self::with_sources(config, Arc::new(LoftyTagSource), fingerprint, analyzer)
    }

    /// Build a service with injected metadata sources.
    pub fn with_sources(
        config: Config,
        tags: Arc<dyn TagSource>,
        fingerprint: Option<Arc<dyn FingerprintApi>>,
        analyzer: Arc<dyn FeatureAnalyzer>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.resolver.rate_limit_ms,
        )));
        let registry = Arc::new(OperationRegistry::new(Duration::from_secs(
            config.operations.operation_ttl_secs,
        )));
        Self {
            config: RwLock::new(config),
            registry,
            undo: Arc::new(UndoStore::new()),
            tags,
            fingerprint,
            analyzer,
            limiter,
        }
    }

    fn resolver(&self) -> Arc<MetadataResolver> {
        Arc::new(MetadataResolver::new(
            self.config.read().resolver.clone(),
            Arc::clone(&self.tags),
            self.fingerprint.clone(),
            Arc::clone(&self.analyzer),
            Arc::clone(&self.limiter),
        ))
    }

    fn engine(&self) -> TemplateEngine {
        TemplateEngine::new(self.config.read().template.clone())
    }

    fn effective_template(&self, requested: Option<&str>) -> String {
        requested
            .map(|t| t.to_string())
            .unwrap_or_else(|| self.config.read().template.default_template.clone())
    }

    /// Dry-run a batch rename. Resolves metadata but touches nothing.
    pub async fn plan_rename(
        &self,
        files: &[PathBuf],
        template: Option<&str>,
    ) -> Result<Vec<RenamePreviewItem>> {
        let template = self.effective_template(template);
        let planner = RenamePlanner::new(self.resolver(), self.engine());
        planner.plan(files, &template, &ops::CancelToken::new()).await
    }

    /// Rough wall-clock estimate for processing `file_count` files.
    pub fn estimate(&self, file_count: usize) -> Duration {
        RenamePlanner::estimate_duration(&self.config.read().resolver, file_count)
    }

    /// Start an asynchronous rename operation and return its id.
    ///
    /// Fails fast on an invalid template; everything after that is
    /// reported through the operation record.
    pub fn start_rename(&self, files: Vec<PathBuf>, options: RenameOptions) -> Result<Uuid> {
        let template = self.effective_template(options.template.as_deref());
        let engine = self.engine();
        let report = engine.validate(&template);
        if !report.valid {
            return Err(Error::Template(TemplateError::Invalid(
                report.errors.join("; "),
            )));
        }
        if files.is_empty() {
            return Err(Error::operation("no files to rename"));
        }

        let handle = self.registry.create(files.len());
        let id = handle.id();
        let job = RenameJob {
            files,
            template,
            write_tags: options.write_tags,
            fill_only: options.fill_only,
        };
        let resolver = self.resolver();
        let undo = Arc::clone(&self.undo);
        let ops_cfg = self.config.read().operations.clone();

        tokio::spawn(ops::execute(handle, job, resolver, engine, undo, ops_cfg));
        Ok(id)
    }

    pub fn operation_status(&self, id: Uuid) -> Option<OperationRecord> {
        self.registry.snapshot(id)
    }

    /// Request cooperative cancellation of a running operation.
    pub fn cancel_operation(&self, id: Uuid) -> bool {
        self.registry.cancel(id)
    }

    /// Drop a finished operation's record.
    pub fn clear_operation(&self, id: Uuid) -> bool {
        self.registry.remove(id)
    }

    /// Revert a completed operation within its undo window.
    pub fn undo(&self, session: Uuid) -> Result<UndoOutcome> {
        Ok(self.undo.undo(session)?)
    }

    pub fn undo_info(&self, session: Uuid) -> Option<UndoSessionInfo> {
        self.undo.info(session)
    }

    pub fn validate_template(&self, template: &str) -> ValidationReport {
        self.engine().validate(template)
    }

    /// Resolve one file's metadata without renaming anything.
    pub async fn analyze_file(&self, path: &Path) -> Result<ResolvedMetadata> {
        self.resolver().resolve(path, &ops::CancelToken::new()).await
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Apply a config change and persist it.
    pub fn update_config(
        &self,
        apply: impl FnOnce(&mut Config),
    ) -> std::result::Result<Config, ConfigError> {
        let mut config = self.config.write();
        apply(&mut config);
        config::save(&config)?;
        Ok(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::mocks::StubAnalyzer;
    use crate::metadata::TagData;
    use crate::ops::OperationStatus;
    use crate::planner::PlanStatus;
    use crate::test_utils::StaticTagSource;
    use tempfile::tempdir;

    fn service(tags: StaticTagSource) -> RenameService {
        let mut config = Config::default();
        config.resolver.fingerprint_enabled = false;
        config.resolver.rate_limit_ms = 0;
        RenameService::with_sources(
            config,
            Arc::new(tags),
            None,
            Arc::new(StubAnalyzer::empty()),
        )
    }

    fn tagged(artist: &str, title: &str) -> TagData {
        TagData {
            artist: Some(artist.to_string()),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    async fn wait_finished(service: &RenameService, id: Uuid) -> OperationRecord {
        for _ in 0..200 {
            let record = service.operation_status(id).expect("operation vanished");
            if record.status.is_finished() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("operation {} never finished", id);
    }

    #[tokio::test]
    async fn test_plan_then_rename_then_undo_round_trip() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("track01.mp3");
        std::fs::write(&file, b"audio").unwrap();
        let service = service(
            StaticTagSource::empty().with(&file, tagged("Daft Punk", "One More Time")),
        );
        let files = vec![file.clone()];

        let plan = service.plan_rename(&files, None).await.unwrap();
        assert_eq!(plan[0].status, PlanStatus::WillRename);
        // Planning touched nothing
        assert!(file.exists());

        let id = service
            .start_rename(files, RenameOptions::default())
            .unwrap();
        let record = wait_finished(&service, id).await;
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.renamed, 1);

        let renamed = dir.path().join("Daft Punk - One More Time.mp3");
        assert!(renamed.exists());
        assert!(!file.exists());

        let session = record.undo_id.expect("completed run should be undoable");
        let outcome = service.undo(session).unwrap();
        assert_eq!(outcome.reverted, 1);
        assert!(file.exists());
        assert!(!renamed.exists());
    }

    #[tokio::test]
    async fn test_start_rename_rejects_bad_template() {
        let service = service(StaticTagSource::empty());
        let result = service.start_rename(
            vec![PathBuf::from("/music/a.mp3")],
            RenameOptions {
                template: Some("{bogus}".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::Template(_))));
        // Nothing was registered
        let result = service.start_rename(vec![], RenameOptions::default());
        assert!(matches!(result, Err(Error::Operation(_))));
    }

    #[tokio::test]
    async fn test_cancel_running_operation() {
        let dir = tempdir().unwrap();
        let mut files = Vec::new();
        let mut tags = StaticTagSource::empty();
        for i in 0..20 {
            let f = dir.path().join(format!("t{}.mp3", i));
            std::fs::write(&f, b"x").unwrap();
            tags = tags.with(&f, tagged("Artist", &format!("Track {}", i)));
            files.push(f);
        }
        let service = service(tags);

        let id = service
            .start_rename(files, RenameOptions::default())
            .unwrap();
        assert!(service.cancel_operation(id));

        let record = wait_finished(&service, id).await;
        assert!(matches!(
            record.status,
            OperationStatus::Cancelled | OperationStatus::Completed
        ));
        // Cancelling a finished operation is a no-op
        assert!(!service.cancel_operation(id));
    }

    #[tokio::test]
    async fn test_analyze_file_resolves_without_touching_disk() {
        let service = service(
            StaticTagSource::empty().with("/music/x.mp3", tagged("Solo", "Alone")),
        );
        let resolved = service.analyze_file(Path::new("/music/x.mp3")).await.unwrap();
        assert_eq!(resolved.value(crate::resolver::FieldName::Artist), "Solo");
    }

    #[tokio::test]
    async fn test_clear_operation_only_when_finished() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"x").unwrap();
        let service = service(StaticTagSource::empty().with(&file, tagged("A", "B")));

        let id = service
            .start_rename(vec![file], RenameOptions::default())
            .unwrap();
        let _ = wait_finished(&service, id).await;
        assert!(service.clear_operation(id));
        assert!(service.operation_status(id).is_none());
    }

    #[test]
    fn test_validate_template_passthrough() {
        let service = service(StaticTagSource::empty());
        assert!(service.validate_template("{artist} - {title}").valid);
        assert!(!service.validate_template("{artist").valid);
    }
}
