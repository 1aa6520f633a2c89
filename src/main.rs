//! OUG Merge command line
//!
//! Runs the merges and toolbox utilities against a JSON workspace file. The
//! workspace is only rewritten when the command succeeds.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use oug_merge::config::MergeConfig;
use oug_merge::toolbox;
use oug_merge::utils::init_logging;
use oug_merge::{GeoEngine, MemoryEngine, MergeOrchestrator, MergeRequest, UserRules};

#[derive(Parser)]
#[command(
    name = "oug-merge",
    version,
    about = "Merge the parcels of an Owned Unit Grouping into one parcel"
)]
struct Cli {
    /// YAML configuration file (defaults to $OUG_MERGE_CONFIG).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge the units lying within a selected common parcel.
    Common(CommonArgs),
    /// Merge the selected parcels of a layer in place.
    Selection(SelectionArgs),
    /// Make TARGET's attribute table match TEMPLATE's.
    Conform(ConformArgs),
    /// Stamp the selected rows of LAYER as complete.
    Complete(CompleteArgs),
    /// Select rows of LAYER by object id.
    Select(SelectArgs),
    /// Clear the selection on LAYER.
    Clear(LayerArgs),
}

#[derive(Args, Clone)]
struct WorkspaceArg {
    /// JSON workspace holding the layers.
    #[arg(long, short = 'w', value_name = "PATH")]
    workspace: PathBuf,
}

#[derive(Args, Clone)]
struct CommonArgs {
    #[command(flatten)]
    workspace: WorkspaceArg,
    /// Layer whose selection is the common parcel.
    common_layer: String,
    /// Review layer holding the units; the merged parcel is appended here.
    review_layer: String,
    /// Rules file (JSON/YAML map or `FIELD OPERATOR` lines) or an inline `FIELD OP;FIELD OP` table.
    rules: String,
    /// The common selection must hold fewer rows than this.
    #[arg(long)]
    max: Option<usize>,
}

#[derive(Args, Clone)]
struct SelectionArgs {
    #[command(flatten)]
    workspace: WorkspaceArg,
    parcel_layer: String,
    /// Rules file (JSON/YAML map or `FIELD OPERATOR` lines) or an inline `FIELD OP;FIELD OP` table.
    rules: String,
    /// Written into SUBTYPE on the merged parcel.
    #[arg(long)]
    subtype: Option<String>,
    /// The selection must hold fewer rows than this.
    #[arg(long)]
    max: Option<usize>,
}

#[derive(Args, Clone)]
struct ConformArgs {
    #[command(flatten)]
    workspace: WorkspaceArg,
    template: String,
    target: String,
}

#[derive(Args, Clone)]
struct CompleteArgs {
    #[command(flatten)]
    workspace: WorkspaceArg,
    layer: String,
    /// Who processed the rows (at most 255 characters).
    processor: String,
}

#[derive(Args, Clone)]
struct SelectArgs {
    #[command(flatten)]
    workspace: WorkspaceArg,
    layer: String,
    #[arg(required = true, value_name = "OBJECTID")]
    oids: Vec<i64>,
}

#[derive(Args, Clone)]
struct LayerArgs {
    #[command(flatten)]
    workspace: WorkspaceArg,
    layer: String,
}

// ──────────────────────────────────────────────────────────────────────────────
// HELPERS
// ──────────────────────────────────────────────────────────────────────────────

/// Read rules from a file when `source` names one, otherwise parse it inline.
fn load_rules(source: &str) -> Result<UserRules> {
    let path = Path::new(source);
    if !path.is_file() {
        return Ok(UserRules::from_value_table(source)?);
    }

    let text = fs::read_to_string(path).with_context(|| format!("Failed to read rules file {}", path.display()))?;
    let rules = match path.extension().and_then(|e| e.to_str()) {
        Some("json" | "yaml" | "yml") => UserRules::from_yaml(&text)?,
        _ => UserRules::from_value_table(&text)?,
    };
    info!("Loaded {} rules from {}", rules.len(), path.display());
    Ok(rules)
}

/// Load the workspace, run `command` against it and save it on success.
fn with_workspace<T: Serialize>(
    workspace: &WorkspaceArg,
    command: impl FnOnce(&mut MemoryEngine) -> Result<T>,
) -> Result<()> {
    let mut engine = MemoryEngine::load(&workspace.workspace)?;
    let output = command(&mut engine)?;
    engine.save(&workspace.workspace)?;
    println!("{}", serde_json::to_string_pretty(&output).context("Failed to serialize result")?);
    Ok(())
}

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = MergeConfig::load(cli.config.as_deref())?;
    let _guard = init_logging(&config)?;
    let orchestrator = MergeOrchestrator::from_config(&config);

    match cli.command {
        Command::Common(args) => {
            let rules = load_rules(&args.rules)?;
            let request = MergeRequest::common_parcel(args.common_layer, args.review_layer, rules)
                .with_max_selection(args.max.unwrap_or(config.common_parcel_max));
            with_workspace(&args.workspace, |engine| Ok(orchestrator.run(engine, &request)?))
        }
        Command::Selection(args) => {
            let rules = load_rules(&args.rules)?;
            let mut request = MergeRequest::selection(args.parcel_layer, rules)
                .with_max_selection(args.max.unwrap_or(config.selection_max));
            if let Some(subtype) = args.subtype {
                request = request.with_subtype(subtype);
            }
            with_workspace(&args.workspace, |engine| Ok(orchestrator.run(engine, &request)?))
        }
        Command::Conform(args) => with_workspace(&args.workspace, |engine| {
            Ok(toolbox::conform(engine, &args.template, &args.target)?)
        }),
        Command::Complete(args) => with_workspace(&args.workspace, |engine| {
            Ok(toolbox::mark_complete(engine, &args.layer, &args.processor)?)
        }),
        Command::Select(args) => with_workspace(&args.workspace, |engine| {
            let Some(dataset) = engine.dataset_mut(&args.layer) else {
                bail!("layer '{}' does not exist in the workspace", args.layer);
            };
            dataset.select(args.oids.iter().copied());
            Ok(engine.count(&args.layer)?)
        }),
        Command::Clear(args) => with_workspace(&args.workspace, |engine| {
            toolbox::clear_selection(engine, &args.layer)?;
            Ok(engine.count(&args.layer)?)
        }),
    }
}
