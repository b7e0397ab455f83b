//! Shared helpers for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::metadata::{TagData, TagSource};
use crate::resolver::{FieldName, FieldSource, ResolvedField, ResolvedMetadata};

/// Tag source backed by a fixed path-to-tags map.
///
/// By default unknown paths read as empty tags; `failing_unknown` makes
/// them errors instead, for exercising unreadable-file paths.
pub struct StaticTagSource {
    tags: HashMap<PathBuf, TagData>,
    fail_unknown: bool,
}

impl StaticTagSource {
    /// Every path reads as empty tags.
    pub fn empty() -> Self {
        Self {
            tags: HashMap::new(),
            fail_unknown: false,
        }
    }

    /// One known path; everything else reads as empty tags.
    pub fn single(path: impl Into<PathBuf>, tags: TagData) -> Self {
        Self::empty().with(path, tags)
    }

    pub fn with(mut self, path: impl Into<PathBuf>, tags: TagData) -> Self {
        self.tags.insert(path.into(), tags);
        self
    }

    /// Make reads of unknown paths fail, like unreadable files would.
    pub fn failing_unknown(mut self) -> Self {
        self.fail_unknown = true;
        self
    }
}

impl TagSource for StaticTagSource {
    fn read_tags(&self, path: &Path) -> anyhow::Result<TagData> {
        match self.tags.get(path) {
            Some(tags) => Ok(tags.clone()),
            None if self.fail_unknown => {
                Err(anyhow::anyhow!("cannot read tags from {:?}", path))
            }
            None => Ok(TagData::default()),
        }
    }
}

/// Build resolved metadata from plain field values, as if every field had
/// come straight from tags.
pub fn resolved_with(fields: &[(FieldName, &str)]) -> ResolvedMetadata {
    let mut metadata = ResolvedMetadata::new("/test.mp3");
    for (name, value) in fields {
        metadata.insert(ResolvedField {
            name: *name,
            value: value.to_string(),
            source: FieldSource::Tag,
            confidence: 1.0,
            valid: true,
            note: None,
        });
    }
    metadata
}
