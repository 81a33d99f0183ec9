//! Filename normalization
//!
//! Decides per file whether a name is already a clean title, only needs its
//! author suffix removed, or must be rebuilt by the model from the PDF text.
//! The folder workflow copies normalized files into the formatted directory
//! and never touches the originals (already-numbered files are moved).

use crate::ai_client::ChatBackend;
use crate::enrichment::TitleEnricher;
use crate::error::{PaperError, Result};
use crate::pdf_text::{self, is_pdf};
use crate::settings::Settings;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// CJK ideographs, Latin letters, digits and whitespace only
static ORDINARY_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x{4e00}-\x{9fa5}A-Za-z0-9\s]+$").unwrap());

static AUTHOR_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_[^_]+$").unwrap());

/// Same extension rule as `pdf_text::is_pdf`, so listing and numbering agree
static SEQUENCED_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\d+_.*\.pdf$").unwrap());

static ILLEGAL_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());

const ELLIPSIS: &str = "...";

/// What to do with one filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOutcome {
    /// Name is acceptable as-is; the file is skipped
    Keep(String),
    /// Name was truncated; the title has to be rebuilt from the PDF text
    NeedsEnrichment,
    /// Trailing `_author` segment removed
    Stripped(String),
}

/// Extension-stripped name
pub fn stem(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    }
}

/// `NN_<title>.pdf`
pub fn is_sequenced_name(filename: &str) -> bool {
    SEQUENCED_NAME.is_match(filename)
}

/// Pure function over the name; no filesystem access
pub fn classify_name(filename: &str) -> NameOutcome {
    let stem = stem(filename);

    if ORDINARY_TITLE.is_match(stem) {
        return NameOutcome::Keep(stem.to_string());
    }

    if stem.contains(ELLIPSIS) {
        return NameOutcome::NeedsEnrichment;
    }

    let stripped = AUTHOR_SUFFIX.replace(stem, "");
    if stripped.is_empty() || stripped == stem {
        // Nothing to strip (or nothing would be left): leave the file alone
        NameOutcome::Keep(stem.to_string())
    } else {
        NameOutcome::Stripped(stripped.into_owned())
    }
}

/// Remove `<>:"/\|?*`. Titles differing only in those characters collide.
pub fn sanitize_filename(name: &str) -> String {
    ILLEGAL_CHARS.replace_all(name, "").into_owned()
}

/// Sanitized, trimmed title usable as a file stem; `None` if nothing valid is left
/// or the title is still truncated
pub fn clean_title(title: &str) -> Option<String> {
    let cleaned = sanitize_filename(title.trim()).trim().to_string();
    if cleaned.is_empty() || cleaned.contains(ELLIPSIS) {
        None
    } else {
        Some(cleaned)
    }
}

/// Leading-text reader used for enrichment: `(path, char limit) -> text`
pub type TextExtractor = fn(&Path, usize) -> Result<String>;

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeStats {
    pub copied: usize,
    pub moved: usize,
    pub skipped: usize,
    pub unprocessed: usize,
    pub conflicts: usize,
}

/// Copy `src` to `dst` unless `dst` exists
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        return Err(PaperError::FileConflict { path: dst.to_path_buf() });
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}

/// Move `src` to `dst` unless `dst` exists (falls back to copy + remove across devices)
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        return Err(PaperError::FileConflict { path: dst.to_path_buf() });
    }
    if !src.exists() {
        return Err(PaperError::FileNotFound { path: src.to_path_buf() });
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_err() {
        fs::copy(src, dst)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

/// New filename for one raw file, or `None` when it is skipped / left unprocessed
async fn normalized_name<B: ChatBackend>(
    filename: &str,
    path: &Path,
    enricher: &mut TitleEnricher<'_, B>,
    extract: TextExtractor,
    text_limit: usize,
    stats: &mut NormalizeStats,
) -> Option<String> {
    match classify_name(filename) {
        NameOutcome::Keep(_) => {
            crate::log!("[Normalize] Skipping: {} (already a valid title)", filename);
            stats.skipped += 1;
            None
        }
        NameOutcome::Stripped(title) => match clean_title(&title) {
            Some(title) => Some(format!("{}.pdf", title)),
            None => {
                crate::elog!("[Normalize] Nothing usable left after stripping {}", filename);
                stats.unprocessed += 1;
                None
            }
        },
        NameOutcome::NeedsEnrichment => {
            let rebuilt = match extract(path, text_limit) {
                Ok(text) => enricher.reconstruct(&text, stem(filename)).await,
                Err(e) => Err(e),
            };
            match rebuilt {
                Ok(Some(title)) => match clean_title(&title) {
                    Some(title) => Some(format!("{}.pdf", title)),
                    None => {
                        crate::elog!("[Normalize] Unusable title {:?} for {}", title, filename);
                        stats.unprocessed += 1;
                        None
                    }
                },
                Ok(None) => {
                    crate::elog!("[Normalize] Could not extract title for {}", filename);
                    stats.unprocessed += 1;
                    None
                }
                Err(e) => {
                    crate::elog!("[Normalize] Error processing {}: {}", filename, e);
                    stats.unprocessed += 1;
                    None
                }
            }
        }
    }
}

/// Normalize every PDF in `source_dir` into `formatted_dir`
pub async fn normalize_folder<B: ChatBackend>(
    source_dir: &Path,
    formatted_dir: &Path,
    backend: &B,
    settings: &Settings,
) -> Result<NormalizeStats> {
    normalize_folder_with(source_dir, formatted_dir, backend, settings, pdf_text::extract_leading_text).await
}

/// `normalize_folder` with an explicit leading-text reader
pub async fn normalize_folder_with<B: ChatBackend>(
    source_dir: &Path,
    formatted_dir: &Path,
    backend: &B,
    settings: &Settings,
    extract: TextExtractor,
) -> Result<NormalizeStats> {
    fs::create_dir_all(formatted_dir)?;

    let mut entries: Vec<_> = fs::read_dir(source_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut enricher = TitleEnricher::new(backend, &settings.enrichment_model);
    let mut stats = NormalizeStats::default();

    for path in entries {
        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };

        if !is_pdf(&path) {
            crate::log!("[Normalize] Unsupported document type, skipping: {}", filename);
            stats.skipped += 1;
            continue;
        }

        if is_sequenced_name(&filename) {
            let target = formatted_dir.join(&filename);
            match move_file(&path, &target) {
                Ok(()) => {
                    crate::log!("[Normalize] Already numbered, moved: {}", filename);
                    stats.moved += 1;
                }
                Err(PaperError::FileConflict { path }) => {
                    crate::elog!("[Normalize] Target exists, not moving: {}", path.display());
                    stats.conflicts += 1;
                }
                Err(e) => {
                    crate::elog!("[Normalize] Error moving {}: {}", filename, e);
                    stats.unprocessed += 1;
                }
            }
            continue;
        }

        let Some(new_filename) =
            normalized_name(&filename, &path, &mut enricher, extract, settings.pdf_text_limit, &mut stats).await
        else {
            continue;
        };

        let target = formatted_dir.join(&new_filename);
        match copy_file(&path, &target) {
            Ok(()) => {
                crate::log!("[Normalize] Copied: {} -> {}", filename, new_filename);
                stats.copied += 1;
            }
            Err(PaperError::FileConflict { path }) => {
                crate::log!("[Normalize] Already exists and correctly named: {}", path.display());
                stats.conflicts += 1;
            }
            Err(e) => {
                crate::elog!("[Normalize] Error copying {}: {}", filename, e);
                stats.unprocessed += 1;
            }
        }
    }

    crate::log!(
        "[Normalize] Done. copied={} moved={} skipped={} unprocessed={} conflicts={}",
        stats.copied, stats.moved, stats.skipped, stats.unprocessed, stats.conflicts
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::testing::ScriptedBackend;

    #[test]
    fn test_ordinary_title_kept() {
        assert_eq!(classify_name("本体构建方法研究.pdf"), NameOutcome::Keep("本体构建方法研究".into()));
        assert_eq!(classify_name("Ontology Design 2020.pdf"), NameOutcome::Keep("Ontology Design 2020".into()));
    }

    #[test]
    fn test_ellipsis_needs_enrichment() {
        assert_eq!(
            classify_name("人物传记资料本体构建与可视...为例_司莉.pdf"),
            NameOutcome::NeedsEnrichment
        );
    }

    #[test]
    fn test_author_suffix_stripped() {
        assert_eq!(
            classify_name("知识图谱——以古籍为例_程结晶.pdf"),
            NameOutcome::Stripped("知识图谱——以古籍为例".into())
        );
        // Only the last underscore segment goes
        assert_eq!(classify_name("a_b-c_d.pdf"), NameOutcome::Stripped("a_b-c".into()));
    }

    #[test]
    fn test_nothing_to_strip_is_kept() {
        assert_eq!(classify_name("标题——副标题.pdf"), NameOutcome::Keep("标题——副标题".into()));
        assert_eq!(classify_name("_作者.pdf"), NameOutcome::Keep("_作者".into()));
    }

    #[test]
    fn test_sequenced_names() {
        assert!(is_sequenced_name("01_本体构建.pdf"));
        assert!(is_sequenced_name("123_a b.pdf"));
        assert!(!is_sequenced_name("01本体.pdf"));
        assert!(is_sequenced_name("01_a.PDF"));
        assert!(!is_sequenced_name("01_a.pdfx"));
        assert!(!is_sequenced_name("x01_a.pdf"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(r#"a<b>c:d"e/f\g|h?i*j"#), "abcdefghij");
        assert_eq!(sanitize_filename("本体：构建"), "本体：构建");
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("a.b.pdf"), "a.b");
        assert_eq!(stem("noext"), "noext");
        assert_eq!(stem(".hidden"), ".hidden");
    }

    #[tokio::test]
    async fn test_normalize_folder_mixed() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let out_dir = out.path().join("formatted");

        fs::write(src.path().join("本体构建方法.pdf"), b"x").unwrap();
        fs::write(src.path().join("知识组织研究_王五.pdf"), b"x").unwrap();
        fs::write(src.path().join("03_已编号.pdf"), b"x").unwrap();
        fs::write(src.path().join("readme.txt"), b"x").unwrap();
        // Truncated name whose PDF cannot be read: left unprocessed, no model call
        fs::write(src.path().join("截断...标题_作者.pdf"), b"not a pdf").unwrap();

        let backend = ScriptedBackend::ok(&[]);
        let stats = normalize_folder(src.path(), &out_dir, &backend, &Settings::default()).await.unwrap();

        assert_eq!(stats.copied, 1);
        assert_eq!(stats.moved, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.unprocessed, 1);
        assert_eq!(backend.call_count(), 0);

        assert!(out_dir.join("知识组织研究.pdf").exists());
        assert!(out_dir.join("03_已编号.pdf").exists());
        assert!(!src.path().join("03_已编号.pdf").exists());
        // Copies leave the original in place
        assert!(src.path().join("知识组织研究_王五.pdf").exists());
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  完整标题 "), Some("完整标题".to_string()));
        assert_eq!(clean_title("标题：副标题?"), Some("标题：副标题".to_string()));
        assert_eq!(clean_title("???"), None);
        assert_eq!(clean_title("   "), None);
        assert_eq!(clean_title("完整...标题"), None);
    }

    fn first_page(_path: &Path, _limit: usize) -> Result<String> {
        Ok("完整标题\n作者 单位\n摘要".to_string())
    }

    #[tokio::test]
    async fn test_enriched_title_is_copied() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(src.path().join("完整...标题_作者.pdf"), b"x").unwrap();

        let backend = ScriptedBackend::ok(&[r#"{"title": "完整标题"}"#]);
        let stats = normalize_folder_with(src.path(), out.path(), &backend, &Settings::default(), first_page)
            .await
            .unwrap();

        assert_eq!(stats.copied, 1);
        assert_eq!(backend.call_count(), 1);
        assert!(out.path().join("完整标题.pdf").exists());
        let requests = backend.requests.lock().unwrap();
        assert!(requests[0][1].content.contains("作者 单位"));
    }

    #[tokio::test]
    async fn test_unusable_enriched_titles_are_unprocessed() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(src.path().join("甲...乙_作者.pdf"), b"x").unwrap();
        fs::write(src.path().join("丙...丁_作者.pdf"), b"x").unwrap();

        // Sorted order: 丙 before 甲
        let backend = ScriptedBackend::ok(&[r#"{"title": "???"}"#, r#"{"title": "甲...乙"}"#]);
        let stats = normalize_folder_with(src.path(), out.path(), &backend, &Settings::default(), first_page)
            .await
            .unwrap();

        assert_eq!(stats.unprocessed, 2);
        assert_eq!(stats.copied, 0);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_stripped_title_is_sanitized() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a:b-c_作者.pdf"), b"x").unwrap();

        let backend = ScriptedBackend::ok(&[]);
        let stats = normalize_folder(src.path(), out.path(), &backend, &Settings::default()).await.unwrap();

        assert_eq!(stats.copied, 1);
        assert!(out.path().join("ab-c.pdf").exists());
    }

    #[tokio::test]
    async fn test_normalize_never_overwrites() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(src.path().join("标题-A_作者.pdf"), b"new").unwrap();
        fs::write(out.path().join("标题-A.pdf"), b"old").unwrap();

        let backend = ScriptedBackend::ok(&[]);
        let stats = normalize_folder(src.path(), out.path(), &backend, &Settings::default()).await.unwrap();

        assert_eq!(stats.conflicts, 1);
        assert_eq!(fs::read(out.path().join("标题-A.pdf")).unwrap(), b"old");
    }
}
