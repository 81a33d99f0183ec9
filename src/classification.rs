// =============================================================================
// Subject Classification Conversation
// =============================================================================
//
// Turns a cluster assignment into human-readable subject categories with a
// fixed sequence of chat rounds over one growing conversation:
//
//   seed -> reflect -> finalize                      (main bucket)
//   place -> consolidate -> confirm                  (only if Unclassified is non-empty)
//   merge                                            (local, no model call)
//
// Every round must come back as JSON; a reply that does not parse ends the run.
// The 5-10 categories / >=3 titles rules live in the prompts only.

use crate::ai_client::{ChatBackend, ChatMessage, Conversation};
use crate::cache::PdfRecord;
use crate::clustering::ClusterAssignment;
use crate::error::{PaperError, Result};
use crate::utils::strip_code_fence;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Category name -> titles, plus the reserved "Unclassified" bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryMapping {
    #[serde(default, alias = "主题分类")]
    pub categories: BTreeMap<String, Vec<String>>,
    #[serde(rename = "Unclassified", alias = "未分类", default, deserialize_with = "null_as_empty")]
    pub unclassified: Vec<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CategoryMapping {
    /// Every title, categories first, then unclassified (duplicates kept)
    pub fn all_titles(&self) -> Vec<&str> {
        self.categories
            .values()
            .flatten()
            .chain(self.unclassified.iter())
            .map(|s| s.as_str())
            .collect()
    }

    /// Input titles that no longer appear anywhere
    pub fn missing_from(&self, input: &[String]) -> Vec<String> {
        let present: HashSet<&str> = self.all_titles().into_iter().collect();
        input
            .iter()
            .filter(|t| !present.contains(t.as_str()))
            .cloned()
            .collect()
    }

    /// Titles listed more than once across all buckets
    pub fn duplicates(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for title in self.all_titles() {
            *counts.entry(title).or_insert(0) += 1;
        }
        let mut dups: Vec<String> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(t, _)| t.to_string())
            .collect();
        dups.sort();
        dups
    }
}

/// One step of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Seed,
    Reflect,
    Finalize,
    PlaceUnclassified,
    Consolidate,
    Confirm,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Seed => "seed",
            Stage::Reflect => "reflect",
            Stage::Finalize => "finalize",
            Stage::PlaceUnclassified => "place-unclassified",
            Stage::Consolidate => "consolidate",
            Stage::Confirm => "confirm",
        }
    }
}

const SYSTEM_PROMPT: &str = r#"Task:
- You receive the titles of academic papers on one broad theme, pre-grouped by a text-similarity clustering step (JSON, cluster id -> titles).
- The clusters are only a hint. Discover the concrete research subjects behind the titles and group the papers by subject.
- Subjects must be specific enough that a reader understands what each group studies; avoid vague buckets.

Requirements:
- Aim for 5 to 10 categories, each with at least 3 titles.
- Every title must end up in exactly one category, or in "Unclassified" if it fits nowhere.
- Copy titles exactly as given, including any numeric prefix. Never shorten, translate or invent titles.
- Name categories in the language of the titles.

Output JSON only, always with both keys:
{"categories": {"<category name>": ["<title>", ...]}, "Unclassified": ["<title>", ...]}"#;

fn seed_prompt(clusters: &ClusterAssignment, excerpts: Option<&[PdfRecord]>) -> Result<String> {
    let clusters_json = serde_json::to_string_pretty(clusters)?;
    let mut prompt = format!("Clustered paper titles:\n{}\n", clusters_json);
    if let Some(records) = excerpts.filter(|r| !r.is_empty()) {
        prompt.push_str("\nOpening text of each paper (filename -> content):\n");
        prompt.push_str(&serde_json::to_string_pretty(records)?);
        prompt.push('\n');
    }
    prompt.push_str("\nClassify these papers by research subject.");
    Ok(prompt)
}

const REFLECT_PROMPT: &str = r#"Review your classification:
- Are there between 5 and 10 categories? Merge or split categories if not.
- Does every category hold at least 3 titles? Move titles from undersized categories into a better category, or into "Unclassified".
- Move titles that do not really fit their category into "Unclassified".
- Check that no title was dropped or duplicated.
Return the full corrected result in the same JSON format."#;

const FINALIZE_PROMPT: &str = r#"Check the result once more against the same rules (5-10 categories, at least 3 titles each, every title exactly once).
The output MUST contain both top-level keys "categories" and "Unclassified", even if "Unclassified" is an empty list.
Return the final result in the same JSON format."#;

fn place_prompt(unclassified: &[String]) -> Result<String> {
    Ok(format!(
        r#"These titles are still unclassified:
{}
Place each of them into one of the existing categories, or into a new category if several of them share a subject.
Only return these titles: {{"categories": {{"<category name>": [...]}}, "Unclassified": [...]}}. Titles that still fit nowhere stay in "Unclassified"."#,
        serde_json::to_string_pretty(unclassified)?
    ))
}

const CONSOLIDATE_PROMPT: &str = r#"Optimize that placement: reuse existing category names exactly where a title fits, merge new categories that overlap, and make sure no title from the unclassified list was dropped.
Return only the previously unclassified titles in the same JSON format."#;

const CONFIRM_PROMPT: &str = r#"Confirm the placement of the previously unclassified titles. Every one of them must appear exactly once, either in a category or in "Unclassified".
Return the confirmed result in the same JSON format, with both keys present."#;

/// Parse one round's reply
pub fn parse_mapping(stage: Stage, text: &str) -> Result<CategoryMapping> {
    serde_json::from_str(&strip_code_fence(text))
        .map_err(|e| PaperError::parse(stage.as_str(), format!("{} (reply: {})", e, crate::utils::safe_truncate(text, 200))))
}

/// Append re-absorbed titles onto the finalized mapping.
///
/// Returns a new mapping; lists are concatenated without de-duplication, and
/// the unclassified bucket becomes whatever re-absorption left over.
pub fn merge_reabsorbed(finalized: &CategoryMapping, reabsorbed: &CategoryMapping) -> CategoryMapping {
    let mut merged = finalized.clone();
    for (category, titles) in &reabsorbed.categories {
        merged
            .categories
            .entry(category.clone())
            .or_default()
            .extend(titles.iter().cloned());
    }
    merged.unclassified = reabsorbed.unclassified.clone();
    merged
}

/// Result of a full classification run
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRun {
    pub mapping: CategoryMapping,
    pub history: Conversation,
    pub rounds: usize,
}

/// One model round trip: append the prompt, call, append the reply, parse it
async fn round<B: ChatBackend>(
    backend: &B,
    model: &str,
    history: Conversation,
    stage: Stage,
    prompt: String,
) -> Result<(Conversation, CategoryMapping)> {
    crate::log!("[Classify] Round: {}", stage.as_str());
    let history = history.push(ChatMessage::user(prompt));
    let reply = backend.complete(model, history.messages()).await?;
    let mapping = parse_mapping(stage, &reply)?;
    Ok((history.push(ChatMessage::assistant(reply)), mapping))
}

/// Log (never fail on) dropped or repeated titles
fn audit(stage: Stage, expected: &[String], mapping: &CategoryMapping) {
    let missing = mapping.missing_from(expected);
    if !missing.is_empty() {
        crate::elog!("[Classify] {} dropped {} title(s): {:?}", stage.as_str(), missing.len(), missing);
    }
    let dups = mapping.duplicates();
    if !dups.is_empty() {
        crate::elog!("[Classify] {} lists {} title(s) more than once: {:?}", stage.as_str(), dups.len(), dups);
    }
    crate::log!(
        "[Classify] {}: {} categories, {} unclassified",
        stage.as_str(), mapping.categories.len(), mapping.unclassified.len()
    );
}

/// Run the full conversation for one folder's clusters
pub async fn classify_clusters<B: ChatBackend>(
    backend: &B,
    model: &str,
    clusters: &ClusterAssignment,
    excerpts: Option<&[PdfRecord]>,
) -> Result<ClassificationRun> {
    let titles: Vec<String> = clusters.values().flatten().cloned().collect();
    let history = Conversation::with_system(SYSTEM_PROMPT);
    if titles.is_empty() {
        return Ok(ClassificationRun { mapping: CategoryMapping::default(), history, rounds: 0 });
    }

    crate::log!("[Classify] Classifying {} titles from {} clusters", titles.len(), clusters.len());

    let (history, seeded) = round(backend, model, history, Stage::Seed, seed_prompt(clusters, excerpts)?).await?;
    audit(Stage::Seed, &titles, &seeded);

    let (history, reflected) = round(backend, model, history, Stage::Reflect, REFLECT_PROMPT.to_string()).await?;
    audit(Stage::Reflect, &titles, &reflected);

    let (history, finalized) = round(backend, model, history, Stage::Finalize, FINALIZE_PROMPT.to_string()).await?;
    audit(Stage::Finalize, &titles, &finalized);

    if finalized.unclassified.is_empty() {
        return Ok(ClassificationRun { mapping: finalized, history, rounds: 3 });
    }

    let leftover = finalized.unclassified.clone();
    crate::log!("[Classify] Re-absorbing {} unclassified title(s)", leftover.len());

    let (history, _placed) =
        round(backend, model, history, Stage::PlaceUnclassified, place_prompt(&leftover)?).await?;
    let (history, _consolidated) =
        round(backend, model, history, Stage::Consolidate, CONSOLIDATE_PROMPT.to_string()).await?;
    let (history, confirmed) = round(backend, model, history, Stage::Confirm, CONFIRM_PROMPT.to_string()).await?;
    audit(Stage::Confirm, &leftover, &confirmed);

    let mapping = merge_reabsorbed(&finalized, &confirmed);
    crate::log!(
        "[Classify] Merged: {} categories, {} still unclassified",
        mapping.categories.len(), mapping.unclassified.len()
    );

    Ok(ClassificationRun { mapping, history, rounds: 6 })
}
