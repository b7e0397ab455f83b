//! Audio file tag reading and writing.
//!
//! Uses the lofty crate for format-independent metadata access (MP3, FLAC,
//! OGG, M4A, WAV). Reading is pure and cheap. Writing only ever happens
//! under the explicit write mode of a rename operation - plan and preview
//! paths never touch this module's write half.

use anyhow::{Context, Result};
use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt};
use std::path::Path;

use crate::resolver::{FieldName, FieldSource, ResolvedMetadata};

/// Raw embedded tag values, one optional string per field.
///
/// Values are kept as strings: track numbers may arrive as "3/12" and BPM
/// tags as free text; normalization is the resolver's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagData {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub track: Option<String>,
    pub bpm: Option<String>,
    pub key: Option<String>,
    pub mix: Option<String>,
}

impl TagData {
    /// Get the raw tag value for a field, if present and non-empty.
    pub fn get(&self, field: FieldName) -> Option<&str> {
        let value = match field {
            FieldName::Artist => &self.artist,
            FieldName::Title => &self.title,
            FieldName::Album => &self.album,
            FieldName::Year => &self.year,
            FieldName::Genre => &self.genre,
            FieldName::Label => &self.label,
            FieldName::Track => &self.track,
            FieldName::Bpm => &self.bpm,
            FieldName::Key => &self.key,
            FieldName::Mix => &self.mix,
        };
        value.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Trait for reading embedded tags.
///
/// Implement this trait to create fake tag sources for testing.
pub trait TagSource: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TagData>;
}

/// Production tag source backed by lofty.
#[derive(Debug, Default)]
pub struct LoftyTagSource;

impl TagSource for LoftyTagSource {
    fn read_tags(&self, path: &Path) -> Result<TagData> {
        read(path)
    }
}

pub fn read(path: &Path) -> Result<TagData> {
    // Probe the file to determine format and read tags
    let tagged_file = Probe::open(path)
        .context("Failed to open file for probing")?
        .read()
        .context("Failed to read file metadata")?;

    // Get the primary tag, or fall back to the first available tag
    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return Ok(TagData::default());
    };

    let title = tag.title().map(|s| s.to_string());
    let mix = tag
        .get_string(&ItemKey::TrackSubtitle)
        .map(|s| s.to_string())
        .or_else(|| title.as_deref().and_then(mix_from_title));

    let track = tag.track().map(|n| match tag.track_total() {
        Some(total) => format!("{}/{}", n, total),
        None => n.to_string(),
    });

    Ok(TagData {
        artist: tag.artist().map(|s| s.to_string()),
        title,
        album: tag.album().map(|s| s.to_string()),
        year: tag.year().map(|y| y.to_string()),
        genre: tag.genre().map(|s| s.to_string()),
        label: tag.get_string(&ItemKey::Label).map(|s| s.to_string()),
        track,
        bpm: tag.get_string(&ItemKey::IntegerBpm).map(|s| s.to_string()),
        key: tag.get_string(&ItemKey::InitialKey).map(|s| s.to_string()),
        mix,
    })
}

/// Extract a mix name from a title parenthetical, e.g.
/// `"Sandstorm (Radio Edit)"` -> `"Radio Edit"`.
fn mix_from_title(title: &str) -> Option<String> {
    let open = title.rfind('(')?;
    let close = title[open..].find(')')? + open;
    let inner = title[open + 1..close].trim();

    let lower = inner.to_lowercase();
    const MIX_WORDS: [&str; 6] = ["mix", "remix", "edit", "dub", "version", "bootleg"];
    if MIX_WORDS.iter().any(|w| lower.contains(w)) {
        Some(inner.to_string())
    } else {
        None
    }
}

/// Result of a tag write operation
#[derive(Debug, Clone)]
pub struct WriteReport {
    /// Number of fields that were updated
    pub fields_updated: usize,
    /// Fields that were skipped (already had values)
    pub fields_skipped: Vec<String>,
}

/// Persist resolved metadata into a file's embedded tags.
///
/// Only fields the resolver actually resolved (source != Unavailable) are
/// written. With `fill_only`, fields that already have a tag value are left
/// untouched.
pub fn write_resolved(
    path: &Path,
    metadata: &ResolvedMetadata,
    fill_only: bool,
) -> Result<WriteReport> {
    let mut tagged_file = Probe::open(path)
        .context("Failed to open file for writing")?
        .read()
        .context("Failed to read file for tag writing")?;

    let tag_type = tagged_file.primary_tag_type();

    let tag = if let Some(tag) = tagged_file.tag_mut(tag_type) {
        tag
    } else {
        tagged_file.insert_tag(Tag::new(tag_type));
        tagged_file
            .tag_mut(tag_type)
            .context("Failed to access inserted tag")?
    };

    let mut fields_updated = 0;
    let mut fields_skipped = Vec::new();

    for field in FieldName::all() {
        let Some(resolved) = metadata.get(field) else {
            continue;
        };
        if resolved.source == FieldSource::Unavailable || resolved.value.is_empty() {
            continue;
        }

        let existing = has_existing(tag, field);
        if fill_only && existing {
            fields_skipped.push(field.as_str().to_string());
            continue;
        }

        let value = resolved.value.clone();
        match field {
            FieldName::Artist => tag.set_artist(value),
            FieldName::Title => tag.set_title(value),
            FieldName::Album => tag.set_album(value),
            FieldName::Genre => tag.set_genre(value),
            FieldName::Year => {
                let Some(year) = leading_u32(&value) else {
                    continue;
                };
                tag.set_year(year);
            }
            FieldName::Track => {
                let Some(track) = leading_u32(&value) else {
                    continue;
                };
                tag.set_track(track);
            }
            FieldName::Bpm => {
                tag.insert_text(ItemKey::IntegerBpm, value);
            }
            FieldName::Key => {
                tag.insert_text(ItemKey::InitialKey, value);
            }
            FieldName::Label => {
                tag.insert_text(ItemKey::Label, value);
            }
            FieldName::Mix => {
                tag.insert_text(ItemKey::TrackSubtitle, value);
            }
        }
        fields_updated += 1;
    }

    tag.save_to_path(path, WriteOptions::default())
        .context("Failed to write tags to file")?;

    Ok(WriteReport {
        fields_updated,
        fields_skipped,
    })
}

fn has_existing(tag: &Tag, field: FieldName) -> bool {
    match field {
        FieldName::Artist => tag.artist().is_some_and(|s| !s.is_empty()),
        FieldName::Title => tag.title().is_some_and(|s| !s.is_empty()),
        FieldName::Album => tag.album().is_some_and(|s| !s.is_empty()),
        FieldName::Genre => tag.genre().is_some_and(|s| !s.is_empty()),
        FieldName::Year => tag.year().is_some(),
        FieldName::Track => tag.track().is_some(),
        FieldName::Bpm => tag.get_string(&ItemKey::IntegerBpm).is_some(),
        FieldName::Key => tag.get_string(&ItemKey::InitialKey).is_some(),
        FieldName::Label => tag.get_string(&ItemKey::Label).is_some(),
        FieldName::Mix => tag.get_string(&ItemKey::TrackSubtitle).is_some(),
    }
}

/// Parse the leading integer out of values like "3", "3/12", "03".
pub fn leading_u32(value: &str) -> Option<u32> {
    let digits: String = value.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_non_audio_file_returns_error() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "This is just some text, not music.").expect("Failed to write");

        let result = read(file.path());

        assert!(result.is_err());
    }

    #[test]
    fn test_read_non_existent_file_returns_error() {
        let path = Path::new("non_existent_file.mp3");
        let result = read(path);
        assert!(result.is_err());
    }

    #[test]
    fn test_mix_from_title() {
        assert_eq!(
            mix_from_title("Sandstorm (Radio Edit)").as_deref(),
            Some("Radio Edit")
        );
        assert_eq!(
            mix_from_title("One More Time (Club Mix)").as_deref(),
            Some("Club Mix")
        );
        // Ordinary parentheticals are not mix names
        assert_eq!(mix_from_title("Intro (Part 1)"), None);
        assert_eq!(mix_from_title("Plain Title"), None);
    }

    #[test]
    fn test_mix_from_title_uses_last_parenthetical() {
        assert_eq!(
            mix_from_title("Song (feat. Someone) (Extended Mix)").as_deref(),
            Some("Extended Mix")
        );
    }

    #[test]
    fn test_leading_u32() {
        assert_eq!(leading_u32("3"), Some(3));
        assert_eq!(leading_u32("3/12"), Some(3));
        assert_eq!(leading_u32("03"), Some(3));
        assert_eq!(leading_u32(" 7 "), Some(7));
        assert_eq!(leading_u32("A1"), None);
        assert_eq!(leading_u32(""), None);
    }

    #[test]
    fn test_tag_data_get_filters_blank() {
        let tags = TagData {
            artist: Some("Daft Punk".to_string()),
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(tags.get(FieldName::Artist), Some("Daft Punk"));
        assert_eq!(tags.get(FieldName::Title), None);
        assert_eq!(tags.get(FieldName::Album), None);
    }
}
