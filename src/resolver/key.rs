//! Musical key parsing and display transforms.
//!
//! Enharmonic respelling (sharps vs flats) and Camelot wheel conversion are
//! pure display transforms. They never participate in conflict resolution,
//! since respelling does not change the underlying pitch class.

/// A parsed musical key: pitch class (0 = C .. 11 = B) plus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey {
    pub pitch_class: u8,
    pub minor: bool,
}

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const FLAT_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

// Camelot wheel positions indexed by pitch class.
const MINOR_CAMELOT: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];
const MAJOR_CAMELOT: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];

/// Parse a key string like `"Am"`, `"F# min"`, `"Bb major"`, `"C"`.
///
/// Returns `None` for anything that doesn't look like a key.
pub fn parse(key: &str) -> Option<ParsedKey> {
    let trimmed = key.trim();
    let mut chars = trimmed.chars();

    let letter = chars.next()?.to_ascii_uppercase();
    let base: i8 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest: String = chars.collect();
    let rest = rest.trim();

    let after_first = rest
        .char_indices()
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let (accidental, mode_part) = match rest.chars().next() {
        Some('#') | Some('♯') => (1i8, &rest[after_first..]),
        Some('b') | Some('♭') => (-1i8, &rest[after_first..]),
        _ => (0i8, rest),
    };

    let mode = mode_part.trim().to_ascii_lowercase();
    let minor = match mode.as_str() {
        "" | "maj" | "major" => false,
        "m" | "min" | "minor" => true,
        _ => return None,
    };

    let pitch_class = ((base + accidental).rem_euclid(12)) as u8;
    Some(ParsedKey { pitch_class, minor })
}

/// Respell a key for display, choosing sharps or flats.
///
/// `"A#m"` with `prefer_flats` becomes `"Bbm"`. Unparseable input returns
/// `None`; callers should fall back to the original string.
pub fn respell(key: &str, prefer_flats: bool) -> Option<String> {
    let parsed = parse(key)?;
    let names = if prefer_flats { &FLAT_NAMES } else { &SHARP_NAMES };
    let name = names[parsed.pitch_class as usize];
    Some(if parsed.minor {
        format!("{}m", name)
    } else {
        name.to_string()
    })
}

/// Convert a key to Camelot notation (`"Am"` -> `"8A"`, `"C"` -> `"8B"`).
pub fn to_camelot(key: &str) -> Option<String> {
    let parsed = parse(key)?;
    let (number, letter) = if parsed.minor {
        (MINOR_CAMELOT[parsed.pitch_class as usize], 'A')
    } else {
        (MAJOR_CAMELOT[parsed.pitch_class as usize], 'B')
    };
    Some(format!("{}{}", number, letter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_major() {
        assert_eq!(
            parse("C"),
            Some(ParsedKey {
                pitch_class: 0,
                minor: false
            })
        );
        assert_eq!(
            parse("F# major"),
            Some(ParsedKey {
                pitch_class: 6,
                minor: false
            })
        );
    }

    #[test]
    fn test_parse_minor_spellings() {
        for spelling in ["Am", "A min", "A minor", "a m"] {
            let parsed = parse(spelling).unwrap_or_else(|| panic!("failed on {spelling}"));
            assert_eq!(parsed.pitch_class, 9);
            assert!(parsed.minor);
        }
    }

    #[test]
    fn test_parse_flats_and_sharps_share_pitch_class() {
        assert_eq!(parse("C#").unwrap().pitch_class, parse("Db").unwrap().pitch_class);
        assert_eq!(parse("G#m").unwrap().pitch_class, parse("Abm").unwrap().pitch_class);
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("H"), None);
        assert_eq!(parse("10A"), None);
        assert_eq!(parse("Cmix"), None);
    }

    #[test]
    fn test_camelot_wheel() {
        assert_eq!(to_camelot("Am").as_deref(), Some("8A"));
        assert_eq!(to_camelot("C").as_deref(), Some("8B"));
        assert_eq!(to_camelot("Bm").as_deref(), Some("10A"));
        assert_eq!(to_camelot("F#m").as_deref(), Some("11A"));
        assert_eq!(to_camelot("Ebm").as_deref(), Some("2A"));
        assert_eq!(to_camelot("B").as_deref(), Some("1B"));
        assert_eq!(to_camelot("Ab").as_deref(), Some("4B"));
    }

    #[test]
    fn test_camelot_enharmonic_equivalence() {
        // Respelling must not change the Camelot position
        assert_eq!(to_camelot("C#m"), to_camelot("Dbm"));
        assert_eq!(to_camelot("F#"), to_camelot("Gb"));
    }

    #[test]
    fn test_respell() {
        assert_eq!(respell("A#m", true).as_deref(), Some("Bbm"));
        assert_eq!(respell("Bbm", false).as_deref(), Some("A#m"));
        assert_eq!(respell("C", true).as_deref(), Some("C"));
        assert_eq!(respell("nonsense", true), None);
    }
}
