use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use psgnorm::io::SafetensorsDecoder;
use psgnorm::{
    ensure_distinct_dirs, run_batch, select_recordings, AliasTable, Annotations, BatchOptions,
    PipelineConfig, SubjectInput, SubjectStatus,
};

#[derive(Parser)]
#[command(name = "psgnorm", about = "Normalize PSG recordings into per-subject artifacts")]
struct Args {
    /// Directory of raw recordings (`*.safetensors`, optional
    /// `<subject>.annotations.json` sidecars)
    #[arg(long, env = "PSGNORM_INPUT")]
    input: PathBuf,

    /// Output directory, one `<subject>.safetensors` per subject
    #[arg(long, env = "PSGNORM_OUTPUT")]
    output: PathBuf,

    /// Pipeline configuration (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Alias table (TOML); the built-in table is used when omitted
    #[arg(long)]
    alias_table: Option<PathBuf>,

    /// Worker threads (default: one per core)
    #[arg(long)]
    jobs: Option<usize>,

    /// Skip subjects whose artifact already exists
    #[arg(long)]
    skip_existing: bool,

    /// Write per-subject outcomes as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "psgnorm=info".into()),
        )
        .init();

    let args = Args::parse();

    let cfg = match &args.config {
        Some(p) => PipelineConfig::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => PipelineConfig::default(),
    };
    let table = match &args.alias_table {
        Some(p) => AliasTable::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => AliasTable::builtin()?,
    };
    info!(version = table.version(), channels = table.channels().len(), "alias table loaded");

    ensure_distinct_dirs(&args.input, &args.output)?;
    let inputs = discover(&args.input)?;
    info!(subjects = inputs.len(), dir = %args.input.display(), "recordings discovered");

    let opts = BatchOptions { skip_existing: args.skip_existing, jobs: args.jobs };
    let outcomes = run_batch(&inputs, &SafetensorsDecoder, &table, &cfg, &args.output, &opts)?;

    let (mut done, mut skipped, mut failed) = (0, 0, 0);
    for o in &outcomes {
        match &o.status {
            SubjectStatus::Completed { .. } => done += 1,
            SubjectStatus::Skipped { .. } => skipped += 1,
            SubjectStatus::Failed { reason } => {
                failed += 1;
                println!("FAILED  {:<24} {reason}", o.subject_id);
            }
        }
    }
    println!("{done} completed, {skipped} skipped, {failed} failed → {}", args.output.display());

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_vec_pretty(&outcomes)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// One work item per base identifier found in `dir`.
fn discover(dir: &Path) -> Result<Vec<SubjectInput>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "safetensors") {
            files.push(path);
        }
    }
    files.sort();

    let mut inputs = Vec::new();
    for sel in select_recordings(&files) {
        let annotations = load_sidecar(dir, &sel.base_id, &sel.selected);
        let mut candidates = vec![sel.selected];
        candidates.extend(sel.discarded);
        inputs.push(SubjectInput { subject_id: sel.base_id, candidates, annotations });
    }
    Ok(inputs)
}

/// `<base>.annotations.json`, else `<selected stem>.annotations.json`.
fn load_sidecar(dir: &Path, base_id: &str, selected: &Path) -> Option<Annotations> {
    let stem = selected.file_stem()?.to_string_lossy().into_owned();
    [base_id.to_string(), stem]
        .iter()
        .map(|s| dir.join(format!("{s}.annotations.json")))
        .find(|p| p.is_file())
        .and_then(|p| match Annotations::load(&p) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(file = %p.display(), error = %e, "unreadable annotation sidecar ignored");
                None
            }
        })
}
