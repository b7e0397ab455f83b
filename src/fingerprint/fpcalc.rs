//! Chromaprint fingerprint generation.
//!
//! Shells out to `fpcalc`, the same way feature analysis shells out to its
//! extractors. The fingerprint algorithm is opaque to this crate; all we
//! need back is the compressed fingerprint string and the track duration
//! the lookup service wants alongside it.
//!
//! `fpcalc` ships with Chromaprint (`libchromaprint-tools` on Debian,
//! `chromaprint` in Homebrew, bundled with MusicBrainz Picard on Windows).

use std::path::Path;
use std::process::Command;

use super::{AudioFingerprint, LookupError};

/// Candidate fpcalc invocations, tried in order.
#[cfg(not(windows))]
const FPCALC_TOOLS: &[&str] = &[
    "fpcalc",
    "/usr/bin/fpcalc",
    "/usr/local/bin/fpcalc",
    "/opt/homebrew/bin/fpcalc",
];

#[cfg(windows)]
const FPCALC_TOOLS: &[&str] = &[
    "fpcalc",
    r"C:\Program Files\Chromaprint\fpcalc.exe",
    r"C:\Program Files\MusicBrainz Picard\fpcalc.exe",
    r"C:\Program Files (x86)\Chromaprint\fpcalc.exe",
    r"C:\Program Files (x86)\MusicBrainz Picard\fpcalc.exe",
];

// fpcalc takes single-dash long options; -version exits 0.
fn locate() -> Option<&'static str> {
    FPCALC_TOOLS
        .iter()
        .find(|&tool| {
            Command::new(tool)
                .arg("-version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
        .copied()
}

/// Fingerprint one file with fpcalc.
pub fn generate_fingerprint(path: &Path) -> Result<AudioFingerprint, LookupError> {
    let tool = locate().ok_or_else(|| {
        LookupError::Fingerprint("fpcalc not installed (part of Chromaprint)".to_string())
    })?;

    let output = Command::new(tool)
        .arg(path)
        .output()
        .map_err(|e| LookupError::Fingerprint(format!("could not run fpcalc: {}", e)))?;
    if !output.status.success() {
        return Err(LookupError::Fingerprint(format!(
            "fpcalc exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse fpcalc's default key=value output.
///
/// Expected lines are `DURATION=<seconds>` and `FINGERPRINT=<base64>`;
/// anything else (fpcalc prints decode warnings to stdout on some inputs)
/// is ignored.
fn parse_output(out: &str) -> Result<AudioFingerprint, LookupError> {
    let mut duration: Option<f64> = None;
    let mut fingerprint: Option<&str> = None;
    for line in out.lines() {
        match line.split_once('=') {
            Some(("DURATION", v)) => duration = v.trim().parse().ok(),
            Some(("FINGERPRINT", v)) => fingerprint = Some(v.trim()),
            _ => {}
        }
    }

    match (fingerprint, duration) {
        (Some(fp), Some(secs)) if !fp.is_empty() => Ok(AudioFingerprint {
            fingerprint: fp.to_string(),
            duration_secs: secs.round() as u32,
        }),
        _ => Err(LookupError::Fingerprint(
            "unexpected fpcalc output (no fingerprint)".to_string(),
        )),
    }
}

/// Check whether fpcalc is installed.
pub fn is_fpcalc_available() -> bool {
    locate().is_some()
}

/// Version string of the installed fpcalc (for diagnostics)
pub fn get_fpcalc_version() -> Option<String> {
    let tool = locate()?;
    let output = Command::new(tool)
        .arg("-version")
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output() {
        let out = "DURATION=180.6\nFINGERPRINT=AQADtNIyRUkkZUqS\n";
        let fp = parse_output(out).unwrap();
        assert_eq!(fp.fingerprint, "AQADtNIyRUkkZUqS");
        assert_eq!(fp.duration_secs, 181);
    }

    #[test]
    fn test_parse_output_skips_noise_lines() {
        let out = "WARNING: couldn't decode last frame\nDURATION=200\nFINGERPRINT=AQAD\n";
        let fp = parse_output(out).unwrap();
        assert_eq!(fp.fingerprint, "AQAD");
        assert_eq!(fp.duration_secs, 200);
    }

    #[test]
    fn test_parse_output_missing_fingerprint() {
        assert!(parse_output("DURATION=120\n").is_err());
        assert!(parse_output("").is_err());
        assert!(parse_output("FINGERPRINT=\nDURATION=120\n").is_err());
    }

    #[test]
    fn test_generate_fingerprint_nonexistent_file() {
        // Fails whether or not fpcalc is installed
        assert!(generate_fingerprint(Path::new("/nonexistent/file.mp3")).is_err());
    }
}
