//! Stage orchestration shared by the individual CLI commands and `run`.
//!
//! Each stage reads its folders and cache files from `Settings`; `run` chains
//! them in order and stops at the first stage-level error.

use crate::ai_client::ChatBackend;
use crate::cache::{self, PdfRecord};
use crate::classification::{self, CategoryMapping, ClassificationRun};
use crate::clustering::{self, ClusterAssignment};
use crate::error::Result;
use crate::mover::{self, MoveStats};
use crate::normalizer::{self, NormalizeStats, TextExtractor};
use crate::pdf_text;
use crate::sequencer::{self, SequenceStats};
use crate::settings::{Settings, TransferMode};
use serde::Serialize;
use std::time::Instant;

// ============================================================================
// Public types
// ============================================================================

/// Knobs for a full run
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Ignore cluster and snapshot caches
    pub fresh: bool,
    /// Send each paper's opening text along with the clusters
    pub with_content: bool,
    /// Overrides `settings.transfer_mode`
    pub transfer_mode: Option<TransferMode>,
}

/// Summary of a full run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub normalize: NormalizeStats,
    pub sequence: SequenceStats,
    pub titles: usize,
    pub clusters: usize,
    pub rounds: usize,
    pub mapping: CategoryMapping,
    pub organize: MoveStats,
    pub elapsed_secs: f64,
}

// ============================================================================
// Stages
// ============================================================================

/// Re-read titles from the formatted folder and rewrite the titles cache
pub fn refresh_titles(settings: &Settings) -> Result<Vec<String>> {
    let titles = pdf_text::load_pdf_names(&settings.formatted_dir)?;
    cache::save_cache(&titles, &settings.cache_paths.titles)?;
    crate::log!("[Titles] {} titles from {}", titles.len(), settings.formatted_dir.display());
    Ok(titles)
}

/// Cached titles while they still match the formatted folder; the cache is
/// only trusted on its own when the folder cannot be read
pub fn cached_titles(settings: &Settings, fresh: bool) -> Result<Vec<String>> {
    if fresh {
        return refresh_titles(settings);
    }
    let cached = cache::load_cache::<Vec<String>>(&settings.cache_paths.titles);
    match (cached, pdf_text::load_pdf_names(&settings.formatted_dir)) {
        (Some(cached), Ok(current)) if cached == current => {
            crate::log!("[Titles] Using cached titles ({})", cached.len());
            Ok(cached)
        }
        (Some(cached), Err(e)) => {
            crate::elog!("[Titles] Cannot read {} ({}), using cached titles", settings.formatted_dir.display(), e);
            Ok(cached)
        }
        (Some(_), Ok(_)) => {
            crate::log!("[Titles] Cache is stale (folder changed), refreshing");
            refresh_titles(settings)
        }
        (None, _) => refresh_titles(settings),
    }
}

/// Opening text of every formatted PDF, cached
pub fn snapshot(settings: &Settings, fresh: bool) -> Result<Vec<PdfRecord>> {
    if !fresh {
        if let Some(records) = cache::load_cache::<Vec<PdfRecord>>(&settings.cache_paths.snapshot) {
            crate::log!("[Snapshot] Using cached snapshot ({} records)", records.len());
            return Ok(records);
        }
    }
    let records = pdf_text::load_pdf_snapshot(&settings.formatted_dir, settings.pdf_text_limit)?;
    cache::save_cache(&records, &settings.cache_paths.snapshot)?;
    crate::log!("[Snapshot] Extracted {} records", records.len());
    Ok(records)
}

/// Cluster assignment for `titles`, reusing the cache when it matches them
pub fn cluster(settings: &Settings, titles: &[String], fresh: bool) -> Result<ClusterAssignment> {
    if !fresh {
        if let Some(clusters) = cache::load_clusters(&settings.cache_paths.clusters, titles) {
            crate::log!("[Cluster] Using cached clusters ({})", clusters.len());
            return Ok(clusters);
        }
    }
    let report = clustering::cluster_titles(titles, settings.max_clusters, settings.elbow_rule, settings.random_seed);
    cache::save_clusters(&settings.cache_paths.clusters, titles, &report.clusters)?;
    Ok(report.clusters)
}

/// Run the classification conversation and store the final mapping
pub async fn classify<B: ChatBackend>(
    settings: &Settings,
    backend: &B,
    clusters: &ClusterAssignment,
    excerpts: Option<&[PdfRecord]>,
) -> Result<ClassificationRun> {
    let run = classification::classify_clusters(backend, &settings.model_name, clusters, excerpts).await?;
    cache::save_cache(&run.mapping, &settings.cache_paths.classification)?;
    crate::log!(
        "[Classify] Saved {} categories to {}",
        run.mapping.categories.len(), settings.cache_paths.classification.display()
    );
    Ok(run)
}

/// Mapping stored by the last `classify`
pub fn saved_mapping(settings: &Settings) -> Option<CategoryMapping> {
    cache::load_cache(&settings.cache_paths.classification)
}

// ============================================================================
// Full run
// ============================================================================

/// normalize -> sequence -> titles -> cluster -> classify -> organize
pub async fn run<B: ChatBackend>(settings: &Settings, backend: &B, options: &PipelineOptions) -> Result<PipelineReport> {
    run_with_extractor(settings, backend, options, pdf_text::extract_leading_text).await
}

/// `run` with an explicit leading-text reader for title enrichment
pub async fn run_with_extractor<B: ChatBackend>(
    settings: &Settings,
    backend: &B,
    options: &PipelineOptions,
    extract: TextExtractor,
) -> Result<PipelineReport> {
    let start = Instant::now();

    crate::log!("[Pipeline] Step 1/6: normalize {}", settings.source_dir.display());
    let normalize =
        normalizer::normalize_folder_with(&settings.source_dir, &settings.formatted_dir, backend, settings, extract).await?;

    crate::log!("[Pipeline] Step 2/6: sequence {}", settings.formatted_dir.display());
    let sequence = sequencer::add_prefix_to_pdfs(&settings.formatted_dir)?;

    // The folder just changed, so the titles cache is always rebuilt
    crate::log!("[Pipeline] Step 3/6: titles");
    let titles = refresh_titles(settings)?;

    crate::log!("[Pipeline] Step 4/6: cluster");
    let clusters = cluster(settings, &titles, options.fresh)?;

    crate::log!("[Pipeline] Step 5/6: classify");
    let excerpts = if options.with_content {
        Some(snapshot(settings, options.fresh)?)
    } else {
        None
    };
    let run = classify(settings, backend, &clusters, excerpts.as_deref()).await?;

    crate::log!("[Pipeline] Step 6/6: organize into {}", settings.classified_dir.display());
    let mode = options.transfer_mode.unwrap_or(settings.transfer_mode);
    let organize = mover::organize(&run.mapping, &settings.formatted_dir, &settings.classified_dir, mode)?;

    let elapsed_secs = start.elapsed().as_secs_f64();
    crate::log!(
        "[Pipeline] Done in {:.1}s: {} titles, {} clusters, {} categories, {} placed",
        elapsed_secs, titles.len(), clusters.len(), run.mapping.categories.len(), organize.moved
    );

    Ok(PipelineReport {
        normalize,
        sequence,
        titles: titles.len(),
        clusters: clusters.len(),
        rounds: run.rounds,
        mapping: run.mapping,
        organize,
        elapsed_secs,
    })
}
