//! On-disk JSON caches for intermediate results
//!
//! Loaded opportunistically: a missing or unreadable cache counts as absent.

use crate::clustering::ClusterAssignment;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// One PDF's name and leading text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfRecord {
    pub filename: String,
    pub content: String,
}

/// Cluster cache, tied to the exact title list it was computed from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCache {
    pub fingerprint: String,
    pub clusters: ClusterAssignment,
}

/// Pretty-printed UTF-8 JSON (non-ASCII kept as-is)
pub fn save_cache<T: Serialize + ?Sized>(data: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(data)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_cache<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(data) => Some(data),
        Err(e) => {
            crate::elog!("[Cache] Ignoring unreadable cache {}: {}", path.display(), e);
            None
        }
    }
}

/// SHA-256 over the ordered title list
pub fn fingerprint(titles: &[String]) -> String {
    let mut hasher = Sha256::new();
    for title in titles {
        hasher.update(title.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Cached clusters, only if they were computed from exactly these titles
pub fn load_clusters(path: &Path, titles: &[String]) -> Option<ClusterAssignment> {
    let cache: ClusterCache = load_cache(path)?;
    if cache.fingerprint == fingerprint(titles) {
        Some(cache.clusters)
    } else {
        crate::log!("[Cache] {} is stale (title list changed), recomputing", path.display());
        None
    }
}

pub fn save_clusters(path: &Path, titles: &[String], clusters: &ClusterAssignment) -> Result<()> {
    let cache = ClusterCache {
        fingerprint: fingerprint(titles),
        clusters: clusters.clone(),
    };
    save_cache(&cache, path)
}
