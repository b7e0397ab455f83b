//! Local audio feature analysis (tempo and key).
//!
//! Shells out to the aubio and keyfinder command-line tools, the same way
//! fingerprinting shells out to fpcalc. The extraction algorithms themselves
//! are opaque to this crate.
//!
//! Malformed files can make the extractors hang, so every call runs under a
//! wall-clock timeout. On expiry the child process is killed and the result
//! discarded; a stuck decode costs one abandoned child, never a stalled
//! batch.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Locally computed audio properties.
#[derive(Debug, Clone, Default)]
pub struct AudioFeatures {
    /// Estimated tempo in BPM
    pub bpm: Option<f64>,
    /// Estimated musical key, e.g. "Am"
    pub key: Option<String>,
}

/// Errors from feature analysis
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analyzer tool not found: {0}")]
    ToolMissing(String),

    #[error("Analysis failed: {0}")]
    Failed(String),

    #[error("Analysis timed out after {0}s")]
    Timeout(u64),

    #[error("IO error running analyzer: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for local feature extraction.
///
/// Implement this trait to create mock implementations for testing.
#[async_trait]
pub trait FeatureAnalyzer: Send + Sync {
    /// Analyze a file. Must return within the analyzer's configured timeout.
    async fn analyze(&self, path: &Path) -> Result<AudioFeatures, AnalysisError>;
}

/// Candidate tempo extractor invocations, tried in order.
const TEMPO_TOOLS: &[&str] = &["aubio", "/usr/bin/aubio", "/usr/local/bin/aubio"];

/// Candidate key extractor invocations, tried in order.
const KEY_TOOLS: &[&str] = &[
    "keyfinder-cli",
    "/usr/bin/keyfinder-cli",
    "/usr/local/bin/keyfinder-cli",
];

/// Production analyzer using external extractor binaries.
pub struct ExternalAnalyzer {
    timeout: Duration,
}

impl ExternalAnalyzer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Check whether at least one extractor is installed.
    pub fn is_available() -> bool {
        find_tool(TEMPO_TOOLS).is_some() || find_tool(KEY_TOOLS).is_some()
    }

    /// Version string of the tempo extractor (for diagnostics)
    pub fn tempo_tool_version() -> Option<String> {
        let tool = find_tool(TEMPO_TOOLS)?;
        let output = std::process::Command::new(tool)
            .arg("--version")
            .output()
            .ok()
            .filter(|o| o.status.success())?;
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_tempo(&self, path: &Path) -> Result<Option<f64>, AnalysisError> {
        let Some(tool) = find_tool(TEMPO_TOOLS) else {
            return Ok(None);
        };
        let out = self
            .run_with_timeout(Command::new(tool).arg("tempo").arg(path))
            .await?;
        Ok(parse_tempo_output(&out))
    }

    async fn run_key(&self, path: &Path) -> Result<Option<String>, AnalysisError> {
        let Some(tool) = find_tool(KEY_TOOLS) else {
            return Ok(None);
        };
        let out = self
            .run_with_timeout(Command::new(tool).arg("-n").arg("standard").arg(path))
            .await?;
        Ok(parse_key_output(&out))
    }

    /// Run a child process under the configured wall-clock timeout.
    ///
    /// On timeout the child is killed and abandoned; the kernel reaps it.
    async fn run_with_timeout(&self, cmd: &mut Command) -> Result<String, AnalysisError> {
        let mut child = cmd
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let waited = tokio::time::timeout(self.timeout, async {
            let mut buf = String::new();
            if let Some(mut out) = stdout {
                use tokio::io::AsyncReadExt;
                let _ = out.read_to_string(&mut buf).await;
            }
            let status = child.wait().await;
            (buf, status)
        })
        .await;

        match waited {
            Ok((buf, Ok(status))) if status.success() => Ok(buf),
            Ok((_, Ok(status))) => Err(AnalysisError::Failed(format!(
                "extractor exited with {}",
                status
            ))),
            Ok((_, Err(e))) => Err(AnalysisError::Io(e)),
            Err(_) => {
                // kill_on_drop handles the child; we deliberately do not wait
                Err(AnalysisError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[async_trait]
impl FeatureAnalyzer for ExternalAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<AudioFeatures, AnalysisError> {
        let bpm = self.run_tempo(path).await?;
        let key = self.run_key(path).await?;

        if bpm.is_none() && key.is_none() && find_tool(TEMPO_TOOLS).is_none()
            && find_tool(KEY_TOOLS).is_none()
        {
            return Err(AnalysisError::ToolMissing(
                "no feature extractor installed (aubio, keyfinder-cli)".to_string(),
            ));
        }

        Ok(AudioFeatures { bpm, key })
    }
}

fn find_tool(candidates: &[&'static str]) -> Option<&'static str> {
    candidates
        .iter()
        .find(|&tool| {
            std::process::Command::new(tool)
                .arg("--help")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
        .copied()
}

/// Parse `aubio tempo` output: lines like `126.048 bpm`.
fn parse_tempo_output(out: &str) -> Option<f64> {
    out.lines().find_map(|line| {
        line.split_whitespace()
            .next()
            .and_then(|tok| tok.parse::<f64>().ok())
            .filter(|bpm| *bpm > 0.0)
    })
}

/// Parse keyfinder output: a bare key name like `Am` on the first line.
fn parse_key_output(out: &str) -> Option<String> {
    let line = out.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }
    crate::resolver::key::parse(line).map(|_| line.to_string())
}
