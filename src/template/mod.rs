//! Filename template validation and rendering.
//!
//! Templates are literal text plus `{token}` placeholders from a fixed,
//! closed token set. `validate` catches unknown tokens, unbalanced braces,
//! and illegal literal characters up front; rendering a template that passed
//! validation never fails. Unavailable fields render as empty strings.
//!
//! Rendering produces a raw name and then sanitizes it for filesystem
//! safety - a pure function, independent of how the metadata was resolved.
//! The engine alone does not guarantee batch-wide uniqueness; that is the
//! planner's job.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::metadata::leading_u32;
use crate::resolver::{key, FieldName, ResolvedField, ResolvedMetadata};

/// Characters that may not appear in a filename component.
pub const ILLEGAL_CHARS: [char; 10] =
    ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// How illegal filesystem characters are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeStrategy {
    /// Replace with an underscore
    #[default]
    Underscore,
    /// Replace with a visually similar Unicode character
    Lookalike,
}

/// Template validation or rendering error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid template: {0}")]
    Invalid(String),
}

/// Outcome of validating a template.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Rendering of the template with sample values, when valid
    pub example: Option<String>,
}

/// The closed token set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Artist,
    Title,
    Album,
    Year,
    Genre,
    Label,
    Track,
    Bpm,
    Key,
    Camelot,
    Mix,
    ArtistTitle,
}

impl Token {
    fn from_name(name: &str) -> Option<Token> {
        match name {
            "artist" => Some(Token::Artist),
            "title" => Some(Token::Title),
            "album" => Some(Token::Album),
            "year" => Some(Token::Year),
            "genre" => Some(Token::Genre),
            "label" => Some(Token::Label),
            "track" => Some(Token::Track),
            "bpm" => Some(Token::Bpm),
            "key" => Some(Token::Key),
            "camelot" => Some(Token::Camelot),
            "mix" => Some(Token::Mix),
            "artist_title" => Some(Token::ArtistTitle),
            _ => None,
        }
    }
}

/// Recognized token names, for error messages and docs.
pub const TOKEN_NAMES: [&str; 12] = [
    "artist",
    "title",
    "album",
    "year",
    "genre",
    "label",
    "track",
    "bpm",
    "key",
    "camelot",
    "mix",
    "artist_title",
];

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// Template substitution and sanitization engine.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    cfg: crate::config::TemplateConfig,
}

impl TemplateEngine {
    pub fn new(cfg: crate::config::TemplateConfig) -> Self {
        Self { cfg }
    }

    /// Validate a template, reporting all problems at once.
    pub fn validate(&self, template: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let segments = match parse(template) {
            Ok(segments) => Some(segments),
            Err(parse_errors) => {
                errors.extend(parse_errors);
                None
            }
        };

        if let Some(ref segments) = segments {
            let mut has_token = false;
            for segment in segments {
                match segment {
                    Segment::Token(_) => has_token = true,
                    Segment::Literal(text) => {
                        for c in text.chars() {
                            if ILLEGAL_CHARS.contains(&c) {
                                errors.push(format!(
                                    "illegal character {:?} in template literal",
                                    c
                                ));
                            }
                        }
                    }
                }
            }
            if !has_token {
                warnings.push("template contains no tokens; every file would get the same name".to_string());
            }
        }

        if template.trim().is_empty() {
            errors.push("template is empty".to_string());
        }

        let valid = errors.is_empty();
        let example = if valid {
            self.render(template, &sample_metadata()).ok()
        } else {
            None
        };

        ValidationReport {
            valid,
            errors,
            warnings,
            example,
        }
    }

    /// Render a template into a sanitized filename stem (no extension).
    ///
    /// Fails only on templates that would not pass [`validate`].
    pub fn render(
        &self,
        template: &str,
        metadata: &ResolvedMetadata,
    ) -> Result<String, TemplateError> {
        let segments =
            parse(template).map_err(|errors| TemplateError::Invalid(errors.join("; ")))?;

        let mut raw = String::new();
        for segment in &segments {
            match segment {
                Segment::Literal(text) => raw.push_str(text),
                Segment::Token(token) => raw.push_str(&self.token_value(*token, metadata)),
            }
        }

        Ok(sanitize(raw.trim(), self.cfg.sanitize))
    }

    /// Render a complete filename: stem, extension, and length cap.
    ///
    /// Names exceeding the configured component length are truncated from
    /// the middle, with a short hash of the untruncated name appended so
    /// distinct long names stay distinct.
    pub fn build_file_name(
        &self,
        template: &str,
        metadata: &ResolvedMetadata,
        extension: &str,
    ) -> Result<String, TemplateError> {
        let mut stem = self.render(template, metadata)?;
        if stem.is_empty() {
            // All tokens unavailable; a file needs some name
            stem = "untitled".to_string();
        }

        let full = if extension.is_empty() {
            stem.clone()
        } else {
            format!("{}.{}", stem, extension)
        };
        if full.len() <= self.cfg.max_name_bytes {
            return Ok(full);
        }

        let hash = short_hash(&stem);
        let dot_ext = if extension.is_empty() {
            0
        } else {
            extension.len() + 1
        };
        // stem budget: name cap minus extension, '~' separators, and hash
        let budget = self
            .cfg
            .max_name_bytes
            .saturating_sub(dot_ext + hash.len() + 2);
        let front_budget = budget * 2 / 3;
        let back_budget = budget - front_budget;
        let front = take_bytes_front(&stem, front_budget);
        let back = take_bytes_back(&stem, back_budget);

        let truncated = if extension.is_empty() {
            format!("{}~{}~{}", front, back, hash)
        } else {
            format!("{}~{}~{}.{}", front, back, hash, extension)
        };
        Ok(truncated)
    }

    fn token_value(&self, token: Token, metadata: &ResolvedMetadata) -> String {
        match token {
            Token::Artist => metadata.value(FieldName::Artist).to_string(),
            Token::Title => metadata.value(FieldName::Title).to_string(),
            Token::Album => metadata.value(FieldName::Album).to_string(),
            Token::Year => metadata.value(FieldName::Year).to_string(),
            Token::Genre => metadata.value(FieldName::Genre).to_string(),
            Token::Label => metadata.value(FieldName::Label).to_string(),
            Token::Mix => metadata.value(FieldName::Mix).to_string(),
            Token::Bpm => metadata.value(FieldName::Bpm).to_string(),
            Token::Key => metadata.value(FieldName::Key).to_string(),
            Token::Camelot => key::to_camelot(metadata.value(FieldName::Key))
                .unwrap_or_default(),
            Token::Track => {
                let raw = metadata.value(FieldName::Track);
                match leading_u32(raw) {
                    Some(n) if self.cfg.track_pad_width > 0 => {
                        format!("{:0width$}", n, width = self.cfg.track_pad_width)
                    }
                    Some(n) => n.to_string(),
                    None => raw.to_string(),
                }
            }
            Token::ArtistTitle => {
                let artist = metadata.value(FieldName::Artist);
                let title = metadata.value(FieldName::Title);
                match (artist.is_empty(), title.is_empty()) {
                    (false, false) => format!("{} - {}", artist, title),
                    (false, true) => artist.to_string(),
                    (true, _) => title.to_string(),
                }
            }
        }
    }
}

fn parse(template: &str) -> Result<Vec<Segment>, Vec<String>> {
    let mut segments = Vec::new();
    let mut errors = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => {
                            errors.push("unbalanced braces: '{' inside a token".to_string());
                            closed = true;
                            break;
                        }
                        other => name.push(other),
                    }
                }
                if !closed {
                    errors.push(format!("unbalanced braces: '{{{}' never closed", name));
                } else {
                    match Token::from_name(&name) {
                        Some(token) => segments.push(Segment::Token(token)),
                        None => errors.push(format!(
                            "unknown token '{{{}}}' (expected one of: {})",
                            name,
                            TOKEN_NAMES.join(", ")
                        )),
                    }
                }
            }
            '}' => errors.push("unbalanced braces: '}' without matching '{'".to_string()),
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    if errors.is_empty() {
        Ok(segments)
    } else {
        Err(errors)
    }
}

/// Replace illegal filesystem characters - a pure function.
pub fn sanitize(name: &str, strategy: SanitizeStrategy) -> String {
    name.chars()
        .filter_map(|c| match c {
            '\0' => None,
            c if ILLEGAL_CHARS.contains(&c) => Some(match strategy {
                SanitizeStrategy::Underscore => '_',
                SanitizeStrategy::Lookalike => lookalike(c),
            }),
            c => Some(c),
        })
        .collect()
}

/// Visually similar Unicode substitutes for illegal characters.
fn lookalike(c: char) -> char {
    match c {
        '/' => '⁄',
        '\\' => '⧵',
        ':' => '∶',
        '*' => '∗',
        '?' => '？',
        '"' => '”',
        '<' => '‹',
        '>' => '›',
        '|' => '¦',
        other => other,
    }
}

/// First 8 hex chars of the name's SHA-256.
fn short_hash(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..8].to_string()
}

/// Longest prefix of `s` that fits in `max_bytes`, on a char boundary.
fn take_bytes_front(s: &str, max_bytes: usize) -> &str {
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        if idx + c.len_utf8() > max_bytes {
            break;
        }
        end = idx + c.len_utf8();
    }
    &s[..end]
}

/// Longest suffix of `s` that fits in `max_bytes`, on a char boundary.
fn take_bytes_back(s: &str, max_bytes: usize) -> &str {
    let total = s.len();
    let mut start = total;
    for (idx, _) in s.char_indices().rev() {
        if total - idx > max_bytes {
            break;
        }
        start = idx;
    }
    &s[start..]
}

/// Sample values used for validation examples.
fn sample_metadata() -> ResolvedMetadata {
    use crate::resolver::FieldSource;

    let samples = [
        (FieldName::Artist, "Daft Punk"),
        (FieldName::Title, "One More Time"),
        (FieldName::Album, "Discovery"),
        (FieldName::Year, "2001"),
        (FieldName::Genre, "House"),
        (FieldName::Label, "Virgin"),
        (FieldName::Track, "1"),
        (FieldName::Bpm, "123"),
        (FieldName::Key, "F#m"),
        (FieldName::Mix, "Radio Edit"),
    ];

    let mut metadata = ResolvedMetadata::new("/sample.mp3");
    for (name, value) in samples {
        metadata.insert(ResolvedField {
            name,
            value: value.to_string(),
            source: FieldSource::Tag,
            confidence: 1.0,
            valid: true,
            note: None,
        });
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateConfig;
    use crate::test_utils::resolved_with;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(TemplateConfig::default())
    }

    #[test]
    fn test_render_concrete_scenario() {
        let metadata = resolved_with(&[
            (FieldName::Artist, "Daft Punk"),
            (FieldName::Title, "One More Time"),
            (FieldName::Bpm, "123"),
            (FieldName::Key, "Bm"), // 10A on the Camelot wheel
        ]);

        let name = engine()
            .build_file_name("{artist} - {title} [{camelot} {bpm}]", &metadata, "mp3")
            .unwrap();

        assert_eq!(name, "Daft Punk - One More Time [10A 123].mp3");
    }

    #[test]
    fn test_validate_accepts_known_tokens() {
        let report = engine().validate("{artist} - {title} ({mix})");
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(
            report.example.as_deref(),
            Some("Daft Punk - One More Time (Radio Edit)")
        );
    }

    #[test]
    fn test_validate_unknown_token() {
        let report = engine().validate("{artist} - {composer}");
        assert!(!report.valid);
        assert!(report.errors[0].contains("composer"));
        assert!(report.example.is_none());
    }

    #[test]
    fn test_validate_unbalanced_braces() {
        assert!(!engine().validate("{artist - {title}").valid);
        assert!(!engine().validate("{artist}}").valid);
        assert!(!engine().validate("{artist").valid);
    }

    #[test]
    fn test_validate_illegal_literal() {
        let report = engine().validate("{artist}/{title}");
        assert!(!report.valid);
        assert!(report.errors[0].contains("illegal character"));
    }

    #[test]
    fn test_validate_warns_on_no_tokens() {
        let report = engine().validate("all my files");
        assert!(report.valid);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn test_render_unavailable_field_is_empty() {
        let metadata = resolved_with(&[(FieldName::Artist, "Solo")]);
        let name = engine().render("{artist} - {title}", &metadata).unwrap();
        // Trailing separator stays; trimming whole-name whitespace only
        assert_eq!(name, "Solo -");
    }

    #[test]
    fn test_render_sanitizes_metadata_values() {
        let metadata = resolved_with(&[
            (FieldName::Artist, "AC/DC"),
            (FieldName::Title, "What?"),
        ]);
        let name = engine().render("{artist} - {title}", &metadata).unwrap();
        assert_eq!(name, "AC_DC - What_");
    }

    #[test]
    fn test_lookalike_strategy() {
        let cfg = TemplateConfig {
            sanitize: SanitizeStrategy::Lookalike,
            ..Default::default()
        };
        let engine = TemplateEngine::new(cfg);
        let metadata = resolved_with(&[(FieldName::Artist, "AC/DC")]);
        let name = engine.render("{artist}", &metadata).unwrap();
        assert_eq!(name, "AC⁄DC");
        for c in ILLEGAL_CHARS {
            assert!(!name.contains(c));
        }
    }

    #[test]
    fn test_track_padding() {
        let metadata = resolved_with(&[(FieldName::Track, "3/12")]);
        assert_eq!(engine().render("{track}", &metadata).unwrap(), "03");

        let no_pad = TemplateEngine::new(TemplateConfig {
            track_pad_width: 0,
            ..Default::default()
        });
        assert_eq!(no_pad.render("{track}", &metadata).unwrap(), "3");

        let wide = TemplateEngine::new(TemplateConfig {
            track_pad_width: 4,
            ..Default::default()
        });
        assert_eq!(wide.render("{track}", &metadata).unwrap(), "0003");
    }

    #[test]
    fn test_artist_title_composite() {
        let both = resolved_with(&[
            (FieldName::Artist, "Daft Punk"),
            (FieldName::Title, "Around the World"),
        ]);
        assert_eq!(
            engine().render("{artist_title}", &both).unwrap(),
            "Daft Punk - Around the World"
        );

        let title_only = resolved_with(&[(FieldName::Title, "Around the World")]);
        assert_eq!(
            engine().render("{artist_title}", &title_only).unwrap(),
            "Around the World"
        );
    }

    #[test]
    fn test_long_name_truncated_with_hash() {
        let long_title = "x".repeat(400);
        let metadata = resolved_with(&[(FieldName::Title, &long_title)]);
        let name = engine().build_file_name("{title}", &metadata, "mp3").unwrap();

        assert!(name.len() <= 255, "length was {}", name.len());
        assert!(name.ends_with(".mp3"));
        // Distinct long names must not collapse to the same truncation
        let other_title = format!("{}y", "x".repeat(399));
        let other_meta = resolved_with(&[(FieldName::Title, &other_title)]);
        let other = engine().build_file_name("{title}", &other_meta, "mp3").unwrap();
        assert_ne!(name, other);
    }

    #[test]
    fn test_empty_metadata_gets_fallback_name() {
        let metadata = ResolvedMetadata::new("/x.mp3");
        let name = engine().build_file_name("{artist}", &metadata, "mp3").unwrap();
        assert_eq!(name, "untitled.mp3");
    }
}
