//! Metadata resolution: reconciling tag data, fingerprint lookups, and
//! local feature analysis into one trusted value per field.
//!
//! Per-field precedence:
//! 1. When fingerprint lookup is disabled or unavailable, a present tag
//!    value wins outright (confidence 1.0) unless verification is forced.
//! 2. A fingerprint value at or above the confidence threshold is preferred
//!    when the tag is empty or verification is forced.
//! 3. Tempo values that disagree by more than the tolerance are tested for
//!    simple multiples (see [`tempo`]) before being treated as conflicts.
//! 4. Feature analysis is the fallback tier when the other sources are
//!    exhausted or disabled.
//! 5. A field no source can produce is Unavailable and renders as an empty
//!    string downstream; resolution itself never fails over a missing value.
//!
//! Resolution is read-only. Persisting resolved values back into tags only
//! happens in a rename operation's explicit write mode.

pub mod key;
pub mod tempo;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::{AudioFeatures, FeatureAnalyzer};
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintApi, LookupError, RateLimiter, TrackCandidate};
use crate::metadata::TagSource;
use crate::ops::CancelToken;

/// Confidence assigned to values that came from local feature analysis.
const FEATURE_CONFIDENCE: f32 = 0.7;

/// The closed set of metadata fields this engine resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldName {
    Artist,
    Title,
    Album,
    Year,
    Genre,
    Label,
    Track,
    Bpm,
    Key,
    Mix,
}

impl FieldName {
    pub fn all() -> [FieldName; 10] {
        [
            FieldName::Artist,
            FieldName::Title,
            FieldName::Album,
            FieldName::Year,
            FieldName::Genre,
            FieldName::Label,
            FieldName::Track,
            FieldName::Bpm,
            FieldName::Key,
            FieldName::Mix,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::Artist => "artist",
            FieldName::Title => "title",
            FieldName::Album => "album",
            FieldName::Year => "year",
            FieldName::Genre => "genre",
            FieldName::Label => "label",
            FieldName::Track => "track",
            FieldName::Bpm => "bpm",
            FieldName::Key => "key",
            FieldName::Mix => "mix",
        }
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which source a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Tag,
    Fingerprint,
    FeatureAnalysis,
    Unavailable,
}

/// One resolved field. Immutable per resolution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub name: FieldName,
    pub value: String,
    pub source: FieldSource,
    /// 0.0 to 1.0
    pub confidence: f32,
    pub valid: bool,
    /// Annotation from conflict handling, e.g. "possible 2x tempo"
    pub note: Option<String>,
}

impl ResolvedField {
    pub fn unavailable(name: FieldName) -> Self {
        Self {
            name,
            value: String::new(),
            source: FieldSource::Unavailable,
            confidence: 0.0,
            valid: false,
            note: None,
        }
    }

    fn from_source(name: FieldName, value: &str, source: FieldSource, confidence: f32) -> Self {
        Self {
            name,
            value: value.to_string(),
            source,
            confidence,
            valid: true,
            note: None,
        }
    }
}

/// Resolved metadata for one file. Replaced wholesale on re-resolution,
/// never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub path: PathBuf,
    fields: BTreeMap<FieldName, ResolvedField>,
}

impl ResolvedMetadata {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, field: ResolvedField) {
        self.fields.insert(field.name, field);
    }

    pub fn get(&self, name: FieldName) -> Option<&ResolvedField> {
        self.fields.get(&name)
    }

    /// The resolved value for a field; empty string when unavailable.
    pub fn value(&self, name: FieldName) -> &str {
        self.fields
            .get(&name)
            .filter(|f| f.valid)
            .map(|f| f.value.as_str())
            .unwrap_or("")
    }

    pub fn fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.values()
    }
}

/// Orchestrates the three metadata sources per field.
pub struct MetadataResolver {
    cfg: ResolverConfig,
    tags: Arc<dyn TagSource>,
    fingerprint: Option<Arc<dyn FingerprintApi>>,
    analyzer: Arc<dyn FeatureAnalyzer>,
    limiter: Arc<RateLimiter>,
}

/// Fields the fingerprint lookup can supply.
const LOOKUP_FIELDS: [FieldName; 6] = [
    FieldName::Artist,
    FieldName::Title,
    FieldName::Album,
    FieldName::Year,
    FieldName::Genre,
    FieldName::Label,
];

impl MetadataResolver {
    pub fn new(
        cfg: ResolverConfig,
        tags: Arc<dyn TagSource>,
        fingerprint: Option<Arc<dyn FingerprintApi>>,
        analyzer: Arc<dyn FeatureAnalyzer>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            cfg,
            tags,
            fingerprint,
            analyzer,
            limiter,
        }
    }

    /// Resolve all fields for one file.
    ///
    /// Network and analysis sub-steps are cancellation checkpoints: a
    /// cancelled token makes this return [`Error::Cancelled`] before the
    /// next expensive call, never mid-call.
    pub async fn resolve(&self, path: &Path, cancel: &CancelToken) -> Result<ResolvedMetadata> {
        let tags = self
            .tags
            .read_tags(path)
            .map_err(|e| Error::metadata(path, e.to_string()))?;

        // Fingerprint lookup: only when it could change the outcome.
        let mut candidate: Option<TrackCandidate> = None;
        let lookup_useful = self.cfg.force_verification
            || LOOKUP_FIELDS.iter().any(|f| tags.get(*f).is_none());
        if self.cfg.fingerprint_enabled && lookup_useful {
            if let Some(api) = &self.fingerprint {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                self.limiter.acquire().await;
                let mut attempt = api.identify(path).await;
                if matches!(
                    attempt,
                    Err(LookupError::Network(_)) | Err(LookupError::RateLimited)
                ) {
                    // One bounded retry for transient failures, behind the
                    // rate limiter again, then degrade to the next tier
                    tracing::debug!("Retrying fingerprint lookup for {:?}", path);
                    self.limiter.acquire().await;
                    attempt = api.identify(path).await;
                }
                match attempt {
                    Ok(candidates) => {
                        candidate = candidates.into_iter().max_by(|a, b| {
                            a.score
                                .partial_cmp(&b.score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                    }
                    Err(e) => {
                        // Degrade silently to the next tier; never raised
                        tracing::warn!("Fingerprint lookup failed for {:?}: {}", path, e);
                    }
                }
            }
        }

        // Feature analysis: fallback tier for tempo and key.
        let mut features = AudioFeatures::default();
        let analysis_useful = self.cfg.force_verification
            || tags.get(FieldName::Bpm).is_none()
            || tags.get(FieldName::Key).is_none();
        if analysis_useful {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.analyzer.analyze(path).await {
                Ok(f) => features = f,
                Err(e) => {
                    tracing::warn!("Feature analysis failed for {:?}: {}", path, e);
                }
            }
        }

        let feature_bpm = features.bpm.map(tempo::format_bpm);

        let mut resolved = ResolvedMetadata::new(path);
        for field in FieldName::all() {
            let fp_value = candidate.as_ref().and_then(|c| candidate_value(c, field));
            let fp_conf = candidate.as_ref().map(|c| c.score).unwrap_or(0.0);
            let feature_value = match field {
                FieldName::Bpm => feature_bpm.as_deref(),
                FieldName::Key => features.key.as_deref(),
                _ => None,
            };
            resolved.insert(self.resolve_field(
                field,
                tags.get(field),
                fp_value,
                fp_conf,
                feature_value,
            ));
        }

        // Normalize key spelling for display ("F# minor" -> "F#m", or the
        // flat equivalent when configured). Pitch class is unchanged.
        if let Some(field) = resolved.get(FieldName::Key) {
            if field.valid {
                if let Some(display) = key::respell(&field.value, self.cfg.prefer_flats) {
                    let mut field = field.clone();
                    field.value = display;
                    resolved.insert(field);
                }
            }
        }

        Ok(resolved)
    }

    /// Reconcile one field's candidate values into a single trusted value.
    pub fn resolve_field(
        &self,
        field: FieldName,
        tag_value: Option<&str>,
        fingerprint_value: Option<&str>,
        fingerprint_confidence: f32,
        feature_value: Option<&str>,
    ) -> ResolvedField {
        if field == FieldName::Bpm {
            return self.resolve_tempo(
                tag_value,
                fingerprint_value,
                fingerprint_confidence,
                feature_value,
            );
        }

        let fp_accepted = fingerprint_value.is_some()
            && fingerprint_confidence >= self.cfg.confidence_threshold;

        if fp_accepted && (tag_value.is_none() || self.cfg.force_verification) {
            if let Some(value) = fingerprint_value {
                return ResolvedField::from_source(
                    field,
                    value,
                    FieldSource::Fingerprint,
                    fingerprint_confidence,
                );
            }
        }

        if let Some(value) = tag_value {
            return ResolvedField::from_source(field, value, FieldSource::Tag, 1.0);
        }

        if let Some(value) = feature_value {
            return ResolvedField::from_source(
                field,
                value,
                FieldSource::FeatureAnalysis,
                FEATURE_CONFIDENCE,
            );
        }

        ResolvedField::unavailable(field)
    }

    /// Tempo gets its own path: numeric candidates that disagree may be
    /// simple multiples of one another.
    fn resolve_tempo(
        &self,
        tag_value: Option<&str>,
        fingerprint_value: Option<&str>,
        fingerprint_confidence: f32,
        feature_value: Option<&str>,
    ) -> ResolvedField {
        let field = FieldName::Bpm;

        // Numeric candidates in precedence order.
        let mut candidates: Vec<(f64, FieldSource, f32)> = Vec::new();
        let fp_accepted = fingerprint_confidence >= self.cfg.confidence_threshold;
        if fp_accepted
            && (tag_value.is_none() || self.cfg.force_verification)
        {
            if let Some(bpm) = fingerprint_value.and_then(parse_bpm) {
                candidates.push((bpm, FieldSource::Fingerprint, fingerprint_confidence));
            }
        }
        if let Some(bpm) = tag_value.and_then(parse_bpm) {
            candidates.push((bpm, FieldSource::Tag, 1.0));
        }
        if let Some(bpm) = feature_value.and_then(parse_bpm) {
            candidates.push((bpm, FieldSource::FeatureAnalysis, FEATURE_CONFIDENCE));
        }

        let Some(&(primary, primary_source, primary_conf)) = candidates.first() else {
            return ResolvedField::unavailable(field);
        };

        let secondary = candidates
            .iter()
            .find(|(_, source, _)| *source != primary_source)
            .copied();

        let Some((other, other_source, other_conf)) = secondary else {
            return ResolvedField::from_source(
                field,
                &tempo::format_bpm(primary),
                primary_source,
                primary_conf,
            );
        };

        if tempo::within_tolerance(primary, other, self.cfg.tempo_tolerance) {
            return ResolvedField::from_source(
                field,
                &tempo::format_bpm(primary),
                primary_source,
                primary_conf,
            );
        }

        match tempo::reconcile(
            primary,
            other,
            self.cfg.tempo_tolerance,
            self.cfg.tempo_band_min,
            self.cfg.tempo_band_max,
        ) {
            Some(resolution) => {
                let (source, confidence) = if resolution.chosen == 0 {
                    (primary_source, primary_conf)
                } else {
                    (other_source, other_conf)
                };
                let mut resolved = ResolvedField::from_source(
                    field,
                    &tempo::format_bpm(resolution.bpm),
                    source,
                    confidence,
                );
                resolved.note = Some(resolution.note);
                resolved
            }
            None => {
                // Unrelated disagreement: keep the preferred source, but
                // record what the other one said.
                let mut resolved = ResolvedField::from_source(
                    field,
                    &tempo::format_bpm(primary),
                    primary_source,
                    primary_conf,
                );
                resolved.note = Some(format!(
                    "conflicting tempo {} from {}",
                    tempo::format_bpm(other),
                    source_name(other_source)
                ));
                resolved
            }
        }
    }
}

fn source_name(source: FieldSource) -> &'static str {
    match source {
        FieldSource::Tag => "tags",
        FieldSource::Fingerprint => "fingerprint lookup",
        FieldSource::FeatureAnalysis => "feature analysis",
        FieldSource::Unavailable => "none",
    }
}

fn candidate_value(candidate: &TrackCandidate, field: FieldName) -> Option<&str> {
    let value = match field {
        FieldName::Artist => &candidate.artist,
        FieldName::Title => &candidate.title,
        FieldName::Album => &candidate.album,
        FieldName::Year => &candidate.year,
        FieldName::Genre => &candidate.genre,
        FieldName::Label => &candidate.label,
        _ => return None,
    };
    value.as_deref().filter(|s| !s.is_empty())
}

fn parse_bpm(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|bpm| *bpm > 0.0)
}
