//! Clustering module - TF-IDF character n-grams + k-means
//!
//! Titles are short and mostly CJK, so words are useless as features; 2- and
//! 3-character n-grams weighted by smoothed IDF work far better.
//! k is picked from the inertia curve over 1..=max_clusters.
//! The resulting groups only seed the classification conversation; they carry
//! no meaning of their own.

use crate::settings::ElbowRule;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Cluster label -> titles. Every input title appears in exactly one list.
pub type ClusterAssignment = BTreeMap<usize, Vec<String>>;

const NGRAM_RANGE: (usize, usize) = (2, 3);
const MAX_ITER: usize = 300;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s\s+").unwrap());

/// Sparse row vector, indices ascending
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseVector {
    pub fn norm_sq(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum()
    }

    pub fn dot_dense(&self, dense: &[f64]) -> f64 {
        self.indices
            .iter()
            .zip(&self.values)
            .map(|(&i, v)| v * dense[i])
            .sum()
    }

    pub fn to_dense(&self, dim: usize) -> Vec<f64> {
        let mut dense = vec![0.0; dim];
        for (&i, &v) in self.indices.iter().zip(&self.values) {
            dense[i] = v;
        }
        dense
    }
}

/// Fitted TF-IDF matrix
#[derive(Debug, Clone)]
pub struct TfidfMatrix {
    pub vocabulary: BTreeMap<String, usize>,
    pub rows: Vec<SparseVector>,
}

impl TfidfMatrix {
    pub fn dim(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Lowercased character n-grams of a title (whitespace runs collapsed first)
pub fn char_ngrams(text: &str) -> Vec<String> {
    let normalized = WHITESPACE.replace_all(&text.to_lowercase(), " ").into_owned();
    let chars: Vec<char> = normalized.chars().collect();
    let mut grams = Vec::new();
    for n in NGRAM_RANGE.0..=NGRAM_RANGE.1 {
        if chars.len() < n {
            continue;
        }
        for window in chars.windows(n) {
            grams.push(window.iter().collect());
        }
    }
    grams
}

/// Fit a TF-IDF matrix: counts × smoothed idf `ln((1+n)/(1+df)) + 1`, rows L2-normalized
pub fn tfidf_vectorize(titles: &[String]) -> TfidfMatrix {
    let doc_grams: Vec<Vec<String>> = titles.iter().map(|t| char_ngrams(t)).collect();

    let mut vocabulary: BTreeMap<String, usize> = BTreeMap::new();
    for grams in &doc_grams {
        for g in grams {
            vocabulary.entry(g.clone()).or_insert(0);
        }
    }
    // Sorted vocabulary order gives stable feature indices
    for (idx, slot) in vocabulary.values_mut().enumerate() {
        *slot = idx;
    }

    let mut doc_freq = vec![0usize; vocabulary.len()];
    let mut counts: Vec<BTreeMap<usize, f64>> = Vec::with_capacity(titles.len());
    for grams in &doc_grams {
        let mut row: BTreeMap<usize, f64> = BTreeMap::new();
        for g in grams {
            *row.entry(vocabulary[g]).or_insert(0.0) += 1.0;
        }
        for &i in row.keys() {
            doc_freq[i] += 1;
        }
        counts.push(row);
    }

    let n_docs = titles.len() as f64;
    let idf: Vec<f64> = doc_freq
        .iter()
        .map(|&df| ((1.0 + n_docs) / (1.0 + df as f64)).ln() + 1.0)
        .collect();

    let rows = counts
        .into_iter()
        .map(|row| {
            let mut vector = SparseVector::default();
            for (i, tf) in row {
                vector.indices.push(i);
                vector.values.push(tf * idf[i]);
            }
            let norm = vector.norm_sq().sqrt();
            if norm > 0.0 {
                for v in &mut vector.values {
                    *v /= norm;
                }
            }
            vector
        })
        .collect();

    TfidfMatrix { vocabulary, rows }
}

/// One k-means fit
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub k: usize,
    pub labels: Vec<usize>,
    pub inertia: f64,
}

fn squared_distance(point: &SparseVector, point_norm_sq: f64, centroid: &[f64], centroid_norm_sq: f64) -> f64 {
    (point_norm_sq - 2.0 * point.dot_dense(centroid) + centroid_norm_sq).max(0.0)
}

fn norm_sq(dense: &[f64]) -> f64 {
    dense.iter().map(|v| v * v).sum()
}

/// k-means++ seeding: first center uniform, then D² sampling
fn init_centroids(data: &[SparseVector], norms: &[f64], dim: usize, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = data.len();
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..n)].to_dense(dim));

    let mut closest: Vec<f64> = (0..n)
        .map(|i| squared_distance(&data[i], norms[i], &centroids[0], norm_sq(&centroids[0])))
        .collect();

    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let chosen = if total <= f64::EPSILON {
            // Every point already sits on a center (duplicate titles)
            rng.gen_range(0..n)
        } else {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut pick = n - 1;
            for (i, d) in closest.iter().enumerate() {
                acc += d;
                if acc >= target {
                    pick = i;
                    break;
                }
            }
            pick
        };

        let centroid = data[chosen].to_dense(dim);
        let c_norm = norm_sq(&centroid);
        for i in 0..n {
            let d = squared_distance(&data[i], norms[i], &centroid, c_norm);
            if d < closest[i] {
                closest[i] = d;
            }
        }
        centroids.push(centroid);
    }

    centroids
}

/// Assign each point to its nearest centroid; returns (labels, per-point distance)
fn assign(data: &[SparseVector], norms: &[f64], centroids: &[Vec<f64>]) -> (Vec<usize>, Vec<f64>) {
    let centroid_norms: Vec<f64> = centroids.iter().map(|c| norm_sq(c)).collect();
    let mut labels = Vec::with_capacity(data.len());
    let mut distances = Vec::with_capacity(data.len());

    for (i, point) in data.iter().enumerate() {
        let mut best = (0usize, f64::INFINITY);
        for (c, centroid) in centroids.iter().enumerate() {
            let d = squared_distance(point, norms[i], centroid, centroid_norms[c]);
            if d < best.1 {
                best = (c, d);
            }
        }
        labels.push(best.0);
        distances.push(best.1);
    }

    (labels, distances)
}

/// Lloyd's algorithm with k-means++ seeding. `k` is clamped to the number of points.
pub fn kmeans(data: &[SparseVector], dim: usize, k: usize, seed: u64) -> KMeansFit {
    let n = data.len();
    let k = k.min(n);
    if k == 0 {
        return KMeansFit { k: 0, labels: vec![], inertia: 0.0 };
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let norms: Vec<f64> = data.iter().map(|p| p.norm_sq()).collect();
    let mut centroids = init_centroids(data, &norms, dim, k, &mut rng);
    let (mut labels, mut distances) = assign(data, &norms, &centroids);

    for _ in 0..MAX_ITER {
        // Recompute centroids as member means
        let mut sums = vec![vec![0.0; dim]; k];
        let mut sizes = vec![0usize; k];
        for (point, &label) in data.iter().zip(&labels) {
            sizes[label] += 1;
            for (&i, &v) in point.indices.iter().zip(&point.values) {
                sums[label][i] += v;
            }
        }

        for c in 0..k {
            if sizes[c] == 0 {
                // Re-seed an empty cluster with the worst-fitting point
                let far = distances
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                sums[c] = data[far].to_dense(dim);
                distances[far] = 0.0;
            } else {
                let size = sizes[c] as f64;
                for v in &mut sums[c] {
                    *v /= size;
                }
            }
        }
        centroids = sums;

        let (new_labels, new_distances) = assign(data, &norms, &centroids);
        let converged = new_labels == labels;
        labels = new_labels;
        distances = new_distances;
        if converged {
            break;
        }
    }

    let inertia = distances.iter().sum();
    KMeansFit { k, labels, inertia }
}

/// Pick k from an inertia curve whose first entry is k = 1
pub fn select_k(curve: &[f64], rule: ElbowRule) -> usize {
    if curve.is_empty() {
        return 0;
    }
    match rule {
        ElbowRule::GlobalMinimum => {
            let mut best = 0;
            for (i, &v) in curve.iter().enumerate() {
                if v < curve[best] {
                    best = i;
                }
            }
            best + 1
        }
        ElbowRule::Knee => {
            if curve.len() < 3 {
                return curve.len();
            }
            let mut best = (1usize, f64::NEG_INFINITY);
            for i in 1..curve.len() - 1 {
                let bend = curve[i - 1] - 2.0 * curve[i] + curve[i + 1];
                if bend > best.1 {
                    best = (i, bend);
                }
            }
            best.0 + 1
        }
    }
}

/// Outcome of clustering one folder
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub k: usize,
    /// Inertia for k = 1, 2, ...
    pub curve: Vec<f64>,
    pub clusters: ClusterAssignment,
}

/// Vectorize, scan k over 1..=max_clusters, keep the fit at the chosen elbow
pub fn cluster_titles(titles: &[String], max_clusters: usize, rule: ElbowRule, seed: u64) -> ClusterReport {
    if titles.is_empty() {
        return ClusterReport { k: 0, curve: vec![], clusters: ClusterAssignment::new() };
    }

    let matrix = tfidf_vectorize(titles);
    let max_k = max_clusters.max(1).min(titles.len());
    crate::log!(
        "[Cluster] {} titles, {} n-gram features, testing k = 1..={}",
        titles.len(), matrix.dim(), max_k
    );

    // Same seed per k, so the fit recorded here is the fit a refit would give
    let mut fits: HashMap<usize, KMeansFit> = HashMap::new();
    let mut curve = Vec::with_capacity(max_k);
    for k in 1..=max_k {
        let fit = kmeans(&matrix.rows, matrix.dim(), k, seed);
        crate::log!("[Cluster]   k={:2}  inertia={:.4}", k, fit.inertia);
        curve.push(fit.inertia);
        fits.insert(k, fit);
    }

    let k = select_k(&curve, rule);
    crate::log!("[Cluster] Selected k={} ({})", k, rule.as_str());

    let mut clusters: ClusterAssignment = (0..k).map(|label| (label, Vec::new())).collect();
    if let Some(fit) = fits.remove(&k) {
        for (title, label) in titles.iter().zip(fit.labels) {
            clusters.entry(label).or_default().push(title.clone());
        }
    }

    ClusterReport { k, curve, clusters }
}
