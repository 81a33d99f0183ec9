//! Papersort CLI - organize a folder of academic PDFs by research subject
//!
//! Usage: papersort-cli [OPTIONS] <COMMAND>
//!
//! Every pipeline stage is its own subcommand; `run` chains them. Supports
//! JSON output for scripting.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use papersort_lib::ai_client::OpenAiClient;
use papersort_lib::error::{PaperError, Result};
use papersort_lib::settings::{self, ElbowRule, Settings, TransferMode};
use papersort_lib::{elog, log, logging, mover, normalizer, pipeline, sequencer, utils};
use serde::Serialize;
use std::path::{Path, PathBuf};

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "papersort-cli")]
#[command(version, about = "Sort academic PDFs into subject folders", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (default: <data_dir>/papersort/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Raw PDF folder (overrides source_dir)
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Normalized, numbered folder (overrides formatted_dir)
    #[arg(long, global = true)]
    formatted: Option<PathBuf>,

    /// Category tree root (overrides classified_dir)
    #[arg(long, global = true)]
    classified: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw filenames into the formatted folder
    Normalize,
    /// Add NN_ prefixes to the formatted folder
    Sequence,
    /// List titles in the formatted folder and refresh the titles cache
    Titles,
    /// Extract the opening text of every formatted PDF
    Snapshot {
        /// Ignore the snapshot cache
        #[arg(long)]
        fresh: bool,
    },
    /// Cluster titles by character n-gram similarity
    Cluster {
        /// Largest k to try
        #[arg(long)]
        max_clusters: Option<usize>,
        /// Elbow rule: knee | global-minimum
        #[arg(long)]
        elbow: Option<String>,
        /// Ignore the cluster cache
        #[arg(long)]
        fresh: bool,
    },
    /// Run the classification conversation over the clusters
    Classify {
        /// Include each paper's opening text in the first round
        #[arg(long)]
        with_content: bool,
        /// Ignore cached titles, clusters and snapshot
        #[arg(long)]
        fresh: bool,
    },
    /// Place files into category folders using the saved classification
    Organize {
        /// Copy instead of move
        #[arg(long)]
        copy: bool,
    },
    /// Full pipeline: normalize, sequence, cluster, classify, organize
    Run {
        #[arg(long)]
        with_content: bool,
        #[arg(long)]
        fresh: bool,
        /// Copy instead of move
        #[arg(long)]
        copy: bool,
    },
    /// Move classified files back into the flat folder and remove empty folders
    Restore,
    /// Settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current settings (API key masked)
    Show,
    /// Set one setting, e.g. `config set max_clusters 8`
    Set { key: String, value: String },
    /// Print the settings file path
    Path,
}

#[tokio::main]
async fn main() {
    // Ignore SIGPIPE so piping through head doesn't kill the process
    #[cfg(unix)]
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN); }

    // println! panics on a closed pipe even with SIGPIPE ignored; exit quietly instead
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe") {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    logging::set_quiet(cli.quiet || cli.json);
    if let Some(log_path) = logging::init_logging(&logging::default_log_dir()) {
        if cli.verbose {
            eprintln!("Logging to: {}", log_path.display());
        }
    }

    if let Err(e) = run_cli(cli).await {
        elog!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    // Handle completions first (no settings needed)
    if let Commands::Completions { shell } = &cli.command {
        generate(*shell, &mut Cli::command(), "papersort-cli", &mut std::io::stdout());
        return Ok(());
    }

    let settings_path = cli.config.clone().unwrap_or_else(settings::default_settings_path);
    let mut settings = Settings::load(&settings_path);
    // Path flags apply to this invocation only; `config set` persists
    if !matches!(cli.command, Commands::Config { .. }) {
        if let Some(dir) = cli.source.clone() {
            settings.source_dir = dir;
        }
        if let Some(dir) = cli.formatted.clone() {
            settings.formatted_dir = dir;
        }
        if let Some(dir) = cli.classified.clone() {
            settings.classified_dir = dir;
        }
    }
    if cli.verbose {
        eprintln!("[verbose] Using settings: {}", settings_path.display());
    }

    match cli.command {
        Commands::Normalize => {
            let client = OpenAiClient::from_settings(&settings);
            let stats =
                normalizer::normalize_folder(&settings.source_dir, &settings.formatted_dir, &client, &settings).await?;
            print_result(cli.json, &stats, || {
                println!(
                    "Normalized {}: {} copied, {} moved, {} skipped, {} unprocessed, {} conflicts",
                    settings.source_dir.display(), stats.copied, stats.moved, stats.skipped, stats.unprocessed, stats.conflicts
                );
            })
        }
        Commands::Sequence => {
            let dir = &settings.formatted_dir;
            let stats = sequencer::add_prefix_to_pdfs(dir)?;
            print_result(cli.json, &stats, || {
                println!("Sequenced {}: {} renamed, {} skipped, {} failed", dir.display(), stats.renamed, stats.skipped, stats.failed);
            })
        }
        Commands::Titles => {
            let titles = pipeline::refresh_titles(&settings)?;
            print_result(cli.json, &titles, || {
                for title in &titles {
                    println!("{}", title);
                }
            })
        }
        Commands::Snapshot { fresh } => {
            let records = pipeline::snapshot(&settings, fresh)?;
            print_result(cli.json, &records, || {
                for record in &records {
                    let preview = utils::take_chars(&record.content, 60).replace('\n', " ");
                    println!("{}  |  {}", record.filename, preview);
                }
            })
        }
        Commands::Cluster { max_clusters, elbow, fresh } => {
            let elbow_override = elbow.is_some();
            if let Some(n) = max_clusters {
                settings.max_clusters = n.max(1);
            }
            if let Some(rule) = elbow {
                settings.elbow_rule = ElbowRule::from_str(&rule).ok_or_else(|| {
                    PaperError::config(format!("Unknown elbow rule '{}'. Valid: knee, global-minimum", rule))
                })?;
            }
            // Overrides change the result, so they bypass the cache
            let fresh = fresh || max_clusters.is_some() || elbow_override;
            let titles = pipeline::cached_titles(&settings, fresh)?;
            let clusters = pipeline::cluster(&settings, &titles, fresh)?;
            print_result(cli.json, &clusters, || {
                for (label, members) in &clusters {
                    println!("Cluster {} ({}):", label, members.len());
                    for title in members {
                        println!("  {}", title);
                    }
                }
            })
        }
        Commands::Classify { with_content, fresh } => {
            let client = OpenAiClient::from_settings(&settings);
            let titles = pipeline::cached_titles(&settings, fresh)?;
            let clusters = pipeline::cluster(&settings, &titles, fresh)?;
            let excerpts = if with_content { Some(pipeline::snapshot(&settings, fresh)?) } else { None };
            let run = pipeline::classify(&settings, &client, &clusters, excerpts.as_deref()).await?;
            print_result(cli.json, &run.mapping, || print_mapping(&run.mapping))
        }
        Commands::Organize { copy } => {
            let mapping = pipeline::saved_mapping(&settings).ok_or_else(|| PaperError::FileNotFound {
                path: settings.cache_paths.classification.clone(),
            })?;
            let mode = if copy { TransferMode::Copy } else { settings.transfer_mode };
            let stats = mover::organize(&mapping, &settings.formatted_dir, &settings.classified_dir, mode)?;
            print_result(cli.json, &stats, || print_move_stats(&stats))
        }
        Commands::Run { with_content, fresh, copy } => {
            let client = OpenAiClient::from_settings(&settings);
            let options = pipeline::PipelineOptions {
                fresh,
                with_content,
                transfer_mode: copy.then_some(TransferMode::Copy),
            };
            let report = pipeline::run(&settings, &client, &options).await?;
            print_result(cli.json, &report, || {
                print_mapping(&report.mapping);
                print_move_stats(&report.organize);
                println!("Finished in {:.1}s", report.elapsed_secs);
            })
        }
        Commands::Restore => {
            let to = &settings.formatted_dir;
            let stats = mover::restore(&settings.classified_dir, to)?;
            print_result(cli.json, &stats, || {
                println!(
                    "Restored {} file(s) into {} ({} conflicts, {} failed, {} folders removed)",
                    stats.restored, to.display(), stats.conflicts, stats.failed, stats.removed_dirs
                );
            })
        }
        Commands::Config { cmd } => handle_config(cmd, settings, &settings_path, cli.json),
        Commands::Completions { .. } => unreachable!(),
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_result<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce()) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

fn print_mapping(mapping: &papersort_lib::classification::CategoryMapping) {
    for (category, titles) in &mapping.categories {
        println!("{} ({})", category, titles.len());
        for title in titles {
            println!("  {}", title);
        }
    }
    if !mapping.unclassified.is_empty() {
        println!("{} ({})", settings::UNCLASSIFIED_DIR, mapping.unclassified.len());
        for title in &mapping.unclassified {
            println!("  {}", title);
        }
    }
}

fn print_move_stats(stats: &mover::MoveStats) {
    println!(
        "Placed {} file(s): {} missing, {} conflicts, {} failed",
        stats.moved, stats.missing.len(), stats.conflicts, stats.failed
    );
    for title in &stats.missing {
        println!("  missing: {}.pdf", title);
    }
}

// ============================================================================
// Config
// ============================================================================

fn handle_config(cmd: ConfigCommands, mut settings: Settings, path: &Path, json: bool) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let key_source = if std::env::var(settings::API_KEY_ENV).map(|k| !k.is_empty()).unwrap_or(false) {
                "env"
            } else if settings.api_key.is_some() {
                "settings"
            } else {
                "not set"
            };
            let masked = settings.api_key().map(|k| utils::mask_secret(&k));

            let mut value = serde_json::to_value(&settings)?;
            value["api_key"] = serde_json::json!(masked);
            if json {
                value["api_key_source"] = serde_json::json!(key_source);
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("api_key:          {} ({})", masked.as_deref().unwrap_or("not set"), key_source);
                println!("base_url:         {}", settings.base_url);
                println!("model_name:       {}", settings.model_name);
                println!("enrichment_model: {}", settings.enrichment_model);
                println!("source_dir:       {}", settings.source_dir.display());
                println!("formatted_dir:    {}", settings.formatted_dir.display());
                println!("classified_dir:   {}", settings.classified_dir.display());
                println!("max_clusters:     {}", settings.max_clusters);
                println!("pdf_text_limit:   {}", settings.pdf_text_limit);
                println!("elbow_rule:       {}", settings.elbow_rule.as_str());
                println!("random_seed:      {}", settings.random_seed);
                println!("transfer_mode:    {}", settings.transfer_mode.as_str());
                println!("cache_paths:");
                println!("  titles:         {}", settings.cache_paths.titles.display());
                println!("  clusters:       {}", settings.cache_paths.clusters.display());
                println!("  snapshot:       {}", settings.cache_paths.snapshot.display());
                println!("  classification: {}", settings.cache_paths.classification.display());
            }
        }
        ConfigCommands::Set { key, value } => {
            settings.set(&key, &value)?;
            settings.save(path)?;
            let shown = if key == "api_key" { utils::mask_secret(&value) } else { value };
            if json {
                println!(r#"{{"key":{},"value":{}}}"#, serde_json::json!(key), serde_json::json!(shown));
            } else {
                log!("Set {} = {}", key, shown);
            }
        }
        ConfigCommands::Path => {
            if json {
                println!(r#"{{"path":{}}}"#, serde_json::json!(path.display().to_string()));
            } else {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}
