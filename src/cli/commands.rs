//! CLI command definitions and handlers.
//!
//! Each subcommand is implemented as a function that takes the parsed
//! arguments and returns an `anyhow::Result<()>`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::analysis::ExternalAnalyzer;
use crate::config;
use crate::fingerprint::{fpcalc, FingerprintResolver};
use crate::planner::{PlanStatus, RenamePreviewItem};
use crate::resolver::{key, FieldName, FieldSource};
use crate::service::{RenameOptions, RenameService};

/// File extensions treated as audio files when scanning directories.
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "wav", "aif", "aiff", "wma",
];

/// Track Renamer CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Preview what a batch rename would do, without touching anything
    Plan {
        /// Files or directories to plan over
        paths: Vec<PathBuf>,
        /// Filename template (default comes from config)
        #[arg(short, long)]
        template: Option<String>,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// AcoustID API key (or set ACOUSTID_API_KEY env var)
        #[arg(long, env = "ACOUSTID_API_KEY")]
        api_key: Option<String>,
    },
    /// Rename files from their resolved metadata
    Rename {
        /// Files or directories to rename
        paths: Vec<PathBuf>,
        /// Filename template (default comes from config)
        #[arg(short, long)]
        template: Option<String>,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Write resolved metadata back into the files' tags
        #[arg(long)]
        write_tags: bool,
        /// Only fill tag fields that are currently empty
        #[arg(long)]
        fill_only: bool,
        /// AcoustID API key (or set ACOUSTID_API_KEY env var)
        #[arg(long, env = "ACOUSTID_API_KEY")]
        api_key: Option<String>,
    },
    /// Validate a filename template and show a sample rendering
    Template {
        /// The template to validate, e.g. "{artist} - {title} [{camelot}]"
        template: String,
    },
    /// Resolve and display one file's metadata without renaming it
    Analyze {
        /// Path to the audio file
        path: PathBuf,
        /// AcoustID API key (or set ACOUSTID_API_KEY env var)
        #[arg(long, env = "ACOUSTID_API_KEY")]
        api_key: Option<String>,
    },
    /// Check which external tools are installed
    Tools,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the active configuration
    Show,
    /// Store the AcoustID API key
    SetKey {
        /// The API key
        key: String,
    },
    /// Set the default filename template
    SetTemplate {
        /// The template
        template: String,
    },
}

/// Run the specified CLI command.
///
/// Returns `Ok(true)` if a command was run, `Ok(false)` if no command was
/// specified (meaning help should be shown).
pub fn run_command(cli: &Cli) -> anyhow::Result<bool> {
    let rt = Runtime::new()?;

    match &cli.command {
        Some(Commands::Plan {
            paths,
            template,
            recursive,
            api_key,
        }) => {
            cmd_plan(&rt, paths, template.as_deref(), *recursive, api_key.as_deref())?;
            Ok(true)
        }
        Some(Commands::Rename {
            paths,
            template,
            recursive,
            yes,
            write_tags,
            fill_only,
            api_key,
        }) => {
            cmd_rename(
                &rt,
                paths,
                template.as_deref(),
                *recursive,
                *yes,
                *write_tags,
                *fill_only,
                api_key.as_deref(),
            )?;
            Ok(true)
        }
        Some(Commands::Template { template }) => {
            cmd_template(template)?;
            Ok(true)
        }
        Some(Commands::Analyze { path, api_key }) => {
            cmd_analyze(&rt, path, api_key.as_deref())?;
            Ok(true)
        }
        Some(Commands::Tools) => {
            cmd_tools()?;
            Ok(true)
        }
        Some(Commands::Config { action }) => {
            cmd_config(action)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn build_service(api_key: Option<&str>) -> RenameService {
    let mut config = config::load();
    if let Some(key) = api_key {
        config.credentials.acoustid_api_key = Some(key.to_string());
    }
    RenameService::new(config)
}

// ============================================================================
// Individual command implementations
// ============================================================================

fn cmd_plan(
    rt: &Runtime,
    paths: &[PathBuf],
    template: Option<&str>,
    recursive: bool,
    api_key: Option<&str>,
) -> anyhow::Result<()> {
    let files = collect_audio_files(paths, recursive)?;
    if files.is_empty() {
        anyhow::bail!("No audio files found");
    }

    let service = build_service(api_key);
    println!(
        "Planning {} files (estimated {})...",
        files.len(),
        format_duration(service.estimate(files.len()))
    );

    let plan = rt.block_on(service.plan_rename(&files, template))?;
    print_plan(&plan);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_rename(
    rt: &Runtime,
    paths: &[PathBuf],
    template: Option<&str>,
    recursive: bool,
    yes: bool,
    write_tags: bool,
    fill_only: bool,
    api_key: Option<&str>,
) -> anyhow::Result<()> {
    let files = collect_audio_files(paths, recursive)?;
    if files.is_empty() {
        anyhow::bail!("No audio files found");
    }

    let service = Arc::new(build_service(api_key));
    println!(
        "Planning {} files (estimated {})...",
        files.len(),
        format_duration(service.estimate(files.len()))
    );
    let plan = rt.block_on(service.plan_rename(&files, template))?;
    print_plan(&plan);

    let rename_count = plan
        .iter()
        .filter(|i| i.status == PlanStatus::WillRename)
        .count();
    if rename_count == 0 {
        println!("Nothing to rename.");
        return Ok(());
    }

    if !yes && !confirm(&format!("Rename {} files?", rename_count))? {
        println!("Aborted.");
        return Ok(());
    }

    let options = RenameOptions {
        template: template.map(|t| t.to_string()),
        write_tags,
        fill_only,
    };
    let record = rt.block_on(async {
        let id = service.start_rename(files, options)?;
        watch_operation(&service, id).await
    })?;

    println!(
        "\n{}: {} renamed, {} skipped, {} failed",
        record.status, record.renamed, record.skipped, record.failed
    );
    for item in record.items.iter().filter(|i| i.message.is_some()) {
        if let Some(ref message) = item.message {
            println!("  {:?}: {}", item.source, message);
        }
    }

    // Renames are revertible until the process exits or the window closes
    if let Some(session) = record.undo_id {
        offer_undo(&service, session)?;
    }
    Ok(())
}

async fn watch_operation(
    service: &RenameService,
    id: Uuid,
) -> anyhow::Result<crate::ops::OperationRecord> {
    loop {
        let Some(record) = service.operation_status(id) else {
            anyhow::bail!("Operation {} disappeared", id);
        };
        if record.status.is_finished() {
            return Ok(record);
        }
        print!("\rProcessed {}/{}...", record.processed, record.total);
        std::io::stdout().flush().ok();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn offer_undo(service: &RenameService, session: Uuid) -> anyhow::Result<()> {
    let Some(info) = service.undo_info(session) else {
        return Ok(());
    };
    println!(
        "These renames can be undone for the next {}.",
        format_duration(info.remaining)
    );
    if confirm("Undo them now?")? {
        let outcome = service.undo(session)?;
        println!("Restored {} files.", outcome.reverted);
        for error in &outcome.errors {
            eprintln!("  {}", error);
        }
    }
    Ok(())
}

fn cmd_template(template: &str) -> anyhow::Result<()> {
    let service = RenameService::new(config::load());
    let report = service.validate_template(template);

    if report.valid {
        println!("Template is valid.");
    } else {
        println!("Template is INVALID:");
        for error in &report.errors {
            println!("  error: {}", error);
        }
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    if let Some(example) = &report.example {
        println!("Example: {}", example);
    }

    if report.valid {
        Ok(())
    } else {
        anyhow::bail!("Invalid template")
    }
}

fn cmd_analyze(rt: &Runtime, path: &Path, api_key: Option<&str>) -> anyhow::Result<()> {
    let service = build_service(api_key);
    let resolved = rt.block_on(service.analyze_file(path))?;

    println!("Resolved metadata for {:?}:", path);
    for field in resolved.fields() {
        if field.source == FieldSource::Unavailable {
            println!("  {:<8} (unavailable)", field.name);
            continue;
        }
        print!(
            "  {:<8} {}  [{} {:.2}]",
            field.name,
            field.value,
            source_label(field.source),
            field.confidence
        );
        if let Some(ref note) = field.note {
            print!("  note: {}", note);
        }
        println!();
    }

    let key_value = resolved.value(FieldName::Key);
    if let Some(camelot) = key::to_camelot(key_value) {
        println!("  camelot  {}", camelot);
    }
    Ok(())
}

fn cmd_tools() -> anyhow::Result<()> {
    println!("External tool status:");

    if FingerprintResolver::is_available() {
        let version = fpcalc::get_fpcalc_version().unwrap_or_else(|| "unknown".to_string());
        println!("  fpcalc:       installed ({})", version);
    } else {
        println!("  fpcalc:       NOT FOUND - fingerprint lookups disabled");
        println!("                install chromaprint to enable identification");
    }

    if ExternalAnalyzer::is_available() {
        let version =
            ExternalAnalyzer::tempo_tool_version().unwrap_or_else(|| "unknown".to_string());
        println!("  analyzers:    installed ({})", version);
    } else {
        println!("  analyzers:    NOT FOUND - tempo/key analysis disabled");
        println!("                install aubio and keyfinder-cli to enable");
    }

    let has_key = config::load().credentials.acoustid_api_key.is_some();
    if has_key {
        println!("  acoustid key: configured");
    } else {
        println!("  acoustid key: not set (use `config set-key` or ACOUSTID_API_KEY)");
    }
    Ok(())
}

fn cmd_config(action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = config::load();
            println!("{}", toml::to_string_pretty(&config)?);
            if let Some(path) = config::config_path() {
                println!("# config file: {:?}", path);
            }
        }
        ConfigAction::SetKey { key } => {
            let mut config = config::load();
            config.credentials.acoustid_api_key = Some(key.clone());
            config::save(&config)?;
            println!("API key saved.");
        }
        ConfigAction::SetTemplate { template } => {
            let service = RenameService::new(config::load());
            let report = service.validate_template(template);
            if !report.valid {
                for error in &report.errors {
                    eprintln!("error: {}", error);
                }
                anyhow::bail!("Invalid template");
            }
            let mut config = config::load();
            config.template.default_template = template.clone();
            config::save(&config)?;
            println!("Default template saved.");
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn print_plan(plan: &[RenamePreviewItem]) {
    let mut renames = 0;
    let mut skips = 0;
    let mut errors = 0;

    for item in plan {
        match item.status {
            PlanStatus::WillRename => {
                renames += 1;
                let dest = item
                    .destination_path
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let marker = if item.case_only { "RENAME (case)" } else { "RENAME" };
                println!("  {:<14} {:?} -> {}", marker, item.source_path, dest);
            }
            PlanStatus::WillSkip => {
                skips += 1;
                println!(
                    "  {:<14} {:?} ({})",
                    "SKIP",
                    item.source_path,
                    item.reason.as_deref().unwrap_or("")
                );
            }
            PlanStatus::Error => {
                errors += 1;
                println!(
                    "  {:<14} {:?} ({})",
                    "ERROR",
                    item.source_path,
                    item.reason.as_deref().unwrap_or("")
                );
            }
        }
        for field in item.metadata.fields() {
            if let Some(ref note) = field.note {
                println!("  {:<14} {}: {}", "", field.name, note);
            }
        }
    }

    println!(
        "\n{} to rename, {} already correct, {} errors",
        renames, skips, errors
    );
}

fn source_label(source: FieldSource) -> &'static str {
    match source {
        FieldSource::Tag => "tag",
        FieldSource::Fingerprint => "lookup",
        FieldSource::FeatureAnalysis => "analysis",
        FieldSource::Unavailable => "none",
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Expand the given paths into a sorted list of audio files.
///
/// Directories are scanned one level deep unless `recursive` is set.
pub fn collect_audio_files(paths: &[PathBuf], recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            anyhow::bail!("No such file or directory: {:?}", path);
        }
        let max_depth = if recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(path)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && is_audio_file(entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("/music/track.mp3")));
        assert!(is_audio_file(Path::new("/music/track.FLAC")));
        assert!(!is_audio_file(Path::new("/music/cover.jpg")));
        assert!(!is_audio_file(Path::new("/music/noext")));
    }

    #[test]
    fn test_collect_audio_files_flat_and_recursive() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b.flac"), b"x").unwrap();

        let flat = collect_audio_files(&[dir.path().to_path_buf()], false).unwrap();
        assert_eq!(flat.len(), 1);
        assert!(flat[0].ends_with("a.mp3"));

        let deep = collect_audio_files(&[dir.path().to_path_buf()], true).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn test_collect_audio_files_dedupes_explicit_paths() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"x").unwrap();

        let files =
            collect_audio_files(&[file.clone(), dir.path().to_path_buf()], false).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_collect_audio_files_missing_path_fails() {
        let result = collect_audio_files(&[PathBuf::from("/no/such/dir")], false);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["track-renamer", "plan", "/music", "-r"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Plan { recursive: true, .. })
        ));

        let cli = Cli::try_parse_from([
            "track-renamer",
            "rename",
            "/music",
            "--template",
            "{artist} - {title}",
            "--yes",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Rename { template, yes, .. }) => {
                assert_eq!(template.as_deref(), Some("{artist} - {title}"));
                assert!(yes);
            }
            _ => panic!("expected rename command"),
        }
    }
}
