//! Zero-padded numeric prefixes for the formatted folder
//!
//! Files are numbered by their 1-based position in the sorted listing.
//! Already-numbered files keep their name, so a fully numbered folder is a
//! fixed point. Adding a file and re-running numbers by the new positions.

use crate::error::Result;
use crate::normalizer::is_sequenced_name;
use crate::pdf_text::list_pdfs;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStats {
    pub renamed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// `"<index padded to 2>_<filename>"`
pub fn sequenced_name(index: usize, filename: &str) -> String {
    format!("{:02}_{}", index, filename)
}

/// Prefix every unnumbered PDF in `dir`
pub fn add_prefix_to_pdfs(dir: &Path) -> Result<SequenceStats> {
    crate::log!("[Sequence] Processing folder: {}", dir.display());

    let mut stats = SequenceStats::default();
    let pdf_files = list_pdfs(dir)?;
    if pdf_files.is_empty() {
        crate::log!("[Sequence] No PDF files found in {}", dir.display());
        return Ok(stats);
    }

    for (index, path) in pdf_files.iter().enumerate() {
        let Some(base_name) = path.file_name().and_then(|n| n.to_str()) else {
            stats.failed += 1;
            continue;
        };

        if is_sequenced_name(base_name) {
            crate::log!("[Sequence] Already numbered, skipping: {}", base_name);
            stats.skipped += 1;
            continue;
        }

        let new_path = dir.join(sequenced_name(index + 1, base_name));
        if new_path.exists() {
            crate::elog!("[Sequence] Target exists, skipping: {}", new_path.display());
            stats.skipped += 1;
            continue;
        }

        match fs::rename(path, &new_path) {
            Ok(()) => {
                crate::log!("[Sequence] Renamed: {} -> {}", base_name, new_path.display());
                stats.renamed += 1;
            }
            Err(e) => {
                crate::elog!("[Sequence] Error renaming {}: {}", path.display(), e);
                stats.failed += 1;
            }
        }
    }

    crate::log!(
        "[Sequence] Done. renamed={} skipped={} failed={}",
        stats.renamed, stats.skipped, stats.failed
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn names(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_sorted_before_numbering() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.pdf"), b"").unwrap();
        fs::write(dir.path().join("a.pdf"), b"").unwrap();

        let stats = add_prefix_to_pdfs(dir.path()).unwrap();
        assert_eq!(stats.renamed, 2);

        let expected: BTreeSet<String> = ["01_a.pdf", "02_b.pdf"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names(dir.path()), expected);
    }

    #[test]
    fn test_rerun_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.pdf"), b"").unwrap();
        fs::write(dir.path().join("a.pdf"), b"").unwrap();
        add_prefix_to_pdfs(dir.path()).unwrap();
        let before = names(dir.path());

        let stats = add_prefix_to_pdfs(dir.path()).unwrap();
        assert_eq!(stats.renamed, 0);
        assert_eq!(stats.skipped, 2);
        assert_eq!(names(dir.path()), before);
    }

    #[test]
    fn test_collision_is_skipped_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        // sorted: 02_b.pdf (valid), b.pdf -> index 2 -> 02_b.pdf already taken
        fs::write(dir.path().join("02_b.pdf"), b"old").unwrap();
        fs::write(dir.path().join("b.pdf"), b"new").unwrap();

        let stats = add_prefix_to_pdfs(dir.path()).unwrap();
        assert_eq!(stats.renamed, 0);
        assert_eq!(stats.skipped, 2);
        assert!(dir.path().join("b.pdf").exists());
        assert_eq!(fs::read(dir.path().join("02_b.pdf")).unwrap(), b"old");
    }

    #[test]
    fn test_growing_folder_renumbers_by_position() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("01_a.pdf"), b"").unwrap();
        fs::write(dir.path().join("02_b.pdf"), b"").unwrap();
        fs::write(dir.path().join("c.pdf"), b"").unwrap();

        let stats = add_prefix_to_pdfs(dir.path()).unwrap();
        assert_eq!(stats.renamed, 1);
        assert!(dir.path().join("03_c.pdf").exists());
    }

    #[test]
    fn test_uppercase_extension_numbered_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.PDF"), b"").unwrap();

        let first = add_prefix_to_pdfs(dir.path()).unwrap();
        assert_eq!(first.renamed, 1);

        let second = add_prefix_to_pdfs(dir.path()).unwrap();
        assert_eq!(second.renamed, 0);
        assert_eq!(second.skipped, 1);

        let expected: BTreeSet<String> = ["01_a.PDF"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names(dir.path()), expected);
    }

    #[test]
    fn test_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        let stats = add_prefix_to_pdfs(dir.path()).unwrap();
        assert_eq!(stats.renamed + stats.skipped, 0);
    }

    #[test]
    fn test_padding_grows_past_two_digits() {
        assert_eq!(sequenced_name(7, "x.pdf"), "07_x.pdf");
        assert_eq!(sequenced_name(123, "x.pdf"), "123_x.pdf");
    }
}
