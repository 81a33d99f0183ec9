//! Filesystem side of classification: place PDFs into category folders, and
//! undo it.
//!
//! Nothing is ever overwritten. Missing sources and occupied targets are
//! reported in the stats and the run continues.

use crate::classification::CategoryMapping;
use crate::error::{PaperError, Result};
use crate::normalizer::{copy_file, move_file, sanitize_filename};
use crate::pdf_text::is_pdf;
use crate::settings::{TransferMode, UNCLASSIFIED_DIR};
use ignore::WalkBuilder;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveStats {
    pub moved: usize,
    /// Titles whose `<title>.pdf` was not in the source folder
    pub missing: Vec<String>,
    pub conflicts: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStats {
    pub restored: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub removed_dirs: usize,
}

/// Directory name for a category; names that sanitize to nothing go to Unclassified
pub fn category_dir_name(category: &str) -> String {
    let name = sanitize_filename(category).trim().to_string();
    if name.is_empty() {
        UNCLASSIFIED_DIR.to_string()
    } else {
        name
    }
}

/// A title must name a file directly inside the source folder: one plain
/// path segment, no separators, no `.`/`..`, not absolute
pub fn is_plain_title(title: &str) -> bool {
    if title.contains('/') || title.contains('\\') {
        return false;
    }
    let mut components = Path::new(title).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// `<title>.pdf`, or `<title>.PDF` as left by the sequencer
fn find_source(source_dir: &Path, title: &str) -> Option<(PathBuf, String)> {
    ["pdf", "PDF"].iter().find_map(|ext| {
        let filename = format!("{}.{}", title, ext);
        let path = source_dir.join(&filename);
        path.is_file().then_some((path, filename))
    })
}

fn place_title(title: &str, source_dir: &Path, category_dir: &Path, mode: TransferMode, stats: &mut MoveStats) {
    if !is_plain_title(title) {
        crate::elog!("[Move] Rejecting title that is not a plain file name: {:?}", title);
        stats.failed += 1;
        return;
    }

    let Some((src, filename)) = find_source(source_dir, title) else {
        crate::elog!("[Move] File not found: {}", source_dir.join(format!("{}.pdf", title)).display());
        stats.missing.push(title.to_string());
        return;
    };

    let dst = category_dir.join(&filename);
    let result = match mode {
        TransferMode::Move => move_file(&src, &dst),
        TransferMode::Copy => copy_file(&src, &dst),
    };
    match result {
        Ok(()) => {
            crate::log!("[Move] {} -> {}", filename, dst.display());
            stats.moved += 1;
        }
        Err(PaperError::FileConflict { path }) => {
            crate::elog!("[Move] Target exists, skipping: {}", path.display());
            stats.conflicts += 1;
        }
        Err(e) => {
            crate::elog!("[Move] Error placing {}: {}", filename, e);
            stats.failed += 1;
        }
    }
}

/// Move (or copy) each mapped title from `source_dir` into `<destination>/<category>/`
pub fn organize(
    mapping: &CategoryMapping,
    source_dir: &Path,
    destination: &Path,
    mode: TransferMode,
) -> Result<MoveStats> {
    crate::log!(
        "[Move] {} {} -> {}",
        mode.as_str(), source_dir.display(), destination.display()
    );

    let mut stats = MoveStats::default();
    let buckets = mapping
        .categories
        .iter()
        .map(|(name, titles)| (category_dir_name(name), titles))
        .chain(std::iter::once((UNCLASSIFIED_DIR.to_string(), &mapping.unclassified)));

    for (dir_name, titles) in buckets {
        let category_dir = destination.join(&dir_name);
        fs::create_dir_all(&category_dir)?;
        for title in titles {
            place_title(title, source_dir, &category_dir, mode, &mut stats);
        }
    }

    crate::log!(
        "[Move] Done. moved={} missing={} conflicts={} failed={}",
        stats.moved, stats.missing.len(), stats.conflicts, stats.failed
    );
    Ok(stats)
}

/// Walk the classified tree: PDF files and directories (deepest first)
fn walk_tree(root: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false) // Every file counts, hidden or ignored
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                crate::elog!("[Restore] Skipping entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            dirs.push((entry.depth(), path.to_path_buf()));
        } else if is_pdf(path) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    dirs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    (files, dirs.into_iter().map(|(_, p)| p).collect())
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut it| it.next().is_none()).unwrap_or(false)
}

/// Move every PDF under `destination_root` back into `flat_source`, then
/// delete the directories left empty (the root included)
pub fn restore(destination_root: &Path, flat_source: &Path) -> Result<RestoreStats> {
    if !destination_root.is_dir() {
        return Err(PaperError::FileNotFound { path: destination_root.to_path_buf() });
    }
    fs::create_dir_all(flat_source)?;
    crate::log!("[Restore] {} -> {}", destination_root.display(), flat_source.display());

    let mut stats = RestoreStats::default();
    let (files, dirs) = walk_tree(destination_root);

    for path in files {
        let Some(filename) = path.file_name() else {
            continue;
        };
        let target = flat_source.join(filename);
        match move_file(&path, &target) {
            Ok(()) => stats.restored += 1,
            Err(PaperError::FileConflict { path: existing }) => {
                crate::elog!("[Restore] Target exists, leaving in place: {}", existing.display());
                stats.conflicts += 1;
            }
            Err(e) => {
                crate::elog!("[Restore] Error moving {}: {}", path.display(), e);
                stats.failed += 1;
            }
        }
    }

    for dir in dirs {
        if is_empty_dir(&dir) {
            match fs::remove_dir(&dir) {
                Ok(()) => {
                    crate::log!("[Restore] Removed empty directory: {}", dir.display());
                    stats.removed_dirs += 1;
                }
                Err(e) => crate::elog!("[Restore] Could not remove {}: {}", dir.display(), e),
            }
        }
    }

    crate::log!(
        "[Restore] Done. restored={} conflicts={} failed={} removed_dirs={}",
        stats.restored, stats.conflicts, stats.failed, stats.removed_dirs
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mapping(categories: &[(&str, &[&str])], unclassified: &[&str]) -> CategoryMapping {
        CategoryMapping {
            categories: categories
                .iter()
                .map(|(name, titles)| (name.to_string(), titles.iter().map(|t| t.to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
            unclassified: unclassified.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_missing_file_is_reported_not_fatal() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("A.pdf"), b"a").unwrap();

        let m = mapping(&[("拓扑学", &["A", "B"])], &[]);
        let stats = organize(&m, src.path(), dst.path(), TransferMode::Move).unwrap();

        assert_eq!(stats.moved, 1);
        assert_eq!(stats.missing, vec!["B"]);
        assert!(dst.path().join("拓扑学").join("A.pdf").exists());
        assert!(!src.path().join("A.pdf").exists());
    }

    #[test]
    fn test_titles_escaping_the_source_folder_are_rejected() {
        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("formatted");
        let dst = work.path().join("classified");
        fs::create_dir_all(&src).unwrap();
        fs::write(work.path().join("outside.pdf"), b"x").unwrap();
        let absolute = work.path().join("outside").display().to_string();

        let m = mapping(&[("拓扑学", &["../outside", "sub/inner", ".."])], &[absolute.as_str()]);
        let stats = organize(&m, &src, &dst, TransferMode::Move).unwrap();

        assert_eq!(stats.moved, 0);
        assert_eq!(stats.failed, 4);
        assert!(work.path().join("outside.pdf").exists());
        assert!(!dst.join("outside.pdf").exists());
    }

    #[test]
    fn test_plain_title_check() {
        assert!(is_plain_title("01_完整标题"));
        assert!(is_plain_title("a.b c"));
        assert!(!is_plain_title("../x"));
        assert!(!is_plain_title("/tmp/x"));
        assert!(!is_plain_title("a\\b"));
        assert!(!is_plain_title("."));
        assert!(!is_plain_title(""));
    }

    #[test]
    fn test_uppercase_extension_found() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("01_a.PDF"), b"a").unwrap();

        let m = mapping(&[("甲", &["01_a"])], &[]);
        let stats = organize(&m, src.path(), dst.path(), TransferMode::Move).unwrap();

        assert_eq!(stats.moved, 1);
        assert!(dst.path().join("甲/01_a.PDF").exists());
    }

    #[test]
    fn test_unclassified_and_copy_mode() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("01_甲.pdf"), b"a").unwrap();
        fs::write(src.path().join("02_乙.pdf"), b"b").unwrap();

        let m = mapping(&[("古籍", &["01_甲"])], &["02_乙"]);
        let stats = organize(&m, src.path(), dst.path(), TransferMode::Copy).unwrap();

        assert_eq!(stats.moved, 2);
        assert!(dst.path().join("古籍/01_甲.pdf").exists());
        assert!(dst.path().join(UNCLASSIFIED_DIR).join("02_乙.pdf").exists());
        assert!(src.path().join("01_甲.pdf").exists());
    }

    #[test]
    fn test_category_names_are_sanitized() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("x.pdf"), b"x").unwrap();

        let m = mapping(&[("数据/知识: 图谱", &["x"])], &[]);
        organize(&m, src.path(), dst.path(), TransferMode::Move).unwrap();
        assert!(dst.path().join("数据知识 图谱").join("x.pdf").exists());

        assert_eq!(category_dir_name("???"), UNCLASSIFIED_DIR);
    }

    #[test]
    fn test_existing_target_not_overwritten() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("x.pdf"), b"new").unwrap();
        fs::create_dir_all(dst.path().join("A")).unwrap();
        fs::write(dst.path().join("A/x.pdf"), b"old").unwrap();

        let m = mapping(&[("A", &["x"])], &[]);
        let stats = organize(&m, src.path(), dst.path(), TransferMode::Move).unwrap();

        assert_eq!(stats.conflicts, 1);
        assert_eq!(fs::read(dst.path().join("A/x.pdf")).unwrap(), b"old");
        assert!(src.path().join("x.pdf").exists());
    }

    #[test]
    fn test_restore_round_trip_removes_tree() {
        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("formatted");
        let dst = work.path().join("classified");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.pdf"), b"a").unwrap();
        fs::write(src.join("b.pdf"), b"b").unwrap();

        let m = mapping(&[("甲", &["a"]), ("乙", &["b"])], &[]);
        organize(&m, &src, &dst, TransferMode::Move).unwrap();
        fs::create_dir_all(dst.join("甲/nested")).unwrap();

        let stats = restore(&dst, &src).unwrap();
        assert_eq!(stats.restored, 2);
        assert!(src.join("a.pdf").exists());
        assert!(src.join("b.pdf").exists());
        assert!(!dst.exists());
    }

    #[test]
    fn test_restore_keeps_non_empty_dirs() {
        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("flat");
        let dst = work.path().join("classified");
        fs::create_dir_all(dst.join("甲")).unwrap();
        fs::write(dst.join("甲/a.pdf"), b"a").unwrap();
        fs::write(dst.join("甲/notes.txt"), b"keep").unwrap();

        let stats = restore(&dst, &src).unwrap();
        assert_eq!(stats.restored, 1);
        assert!(src.join("a.pdf").exists());
        assert!(dst.join("甲/notes.txt").exists());
    }

    #[test]
    fn test_restore_collision_leaves_file() {
        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("flat");
        let dst = work.path().join("classified");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(dst.join("甲")).unwrap();
        fs::write(src.join("a.pdf"), b"old").unwrap();
        fs::write(dst.join("甲/a.pdf"), b"new").unwrap();

        let stats = restore(&dst, &src).unwrap();
        assert_eq!(stats.conflicts, 1);
        assert_eq!(fs::read(src.join("a.pdf")).unwrap(), b"old");
        assert!(dst.join("甲/a.pdf").exists());
    }

    #[test]
    fn test_restore_missing_root() {
        let work = tempfile::tempdir().unwrap();
        let err = restore(&work.path().join("nope"), work.path()).unwrap_err();
        assert!(matches!(err, PaperError::FileNotFound { .. }));
    }
}
