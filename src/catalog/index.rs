//! HNSW cosine index over printing embeddings.
//!
//! A Hierarchical Navigable Small World graph: every vector lands on a random
//! geometric level, upper layers route a greedy descent, and layer 0 holds the
//! densely connected neighborhood searched with an `ef`-bounded frontier.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BinaryHeap, HashMap, HashSet};
use uuid::Uuid;

/// Tuning parameters for the HNSW graph.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Number of neighbors per node on upper layers (M). Layer 0 keeps 2·M.
    pub m: usize,

    /// Frontier width while building the graph.
    pub ef_construction: usize,

    /// Frontier width while searching. Raised to `k` when `k` is larger.
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
        }
    }
}

/// A candidate ordered by distance. `BinaryHeap` is a max-heap, so the
/// natural ordering yields farthest-first and `Reverse` yields nearest-first.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    node: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct Node {
    key: Uuid,
    vector: Vec<f32>,
    /// Neighbor lists, one per level this node participates in.
    neighbors: Vec<Vec<usize>>,
    /// Soft-deleted nodes keep routing but never appear in results.
    deleted: bool,
}

/// An in-memory HNSW index under cosine distance, keyed by printing id.
pub struct HnswIndex {
    config: HnswConfig,
    nodes: Vec<Node>,
    by_key: HashMap<Uuid, usize>,
    entry_point: Option<usize>,
    max_level: usize,
    level_mult: f64,
    live_count: usize,
    rng: StdRng,
}

impl HnswIndex {
    /// Create an empty index.
    pub fn new(config: HnswConfig) -> Self {
        let level_mult = 1.0 / (config.m.max(2) as f64).ln();
        Self {
            config,
            nodes: Vec::new(),
            by_key: HashMap::new(),
            entry_point: None,
            max_level: 0,
            level_mult,
            live_count: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create an empty index with a fixed RNG seed, for reproducible graphs.
    pub fn with_seed(config: HnswConfig, seed: u64) -> Self {
        let mut index = Self::new(config);
        index.rng = StdRng::seed_from_u64(seed);
        index
    }

    /// Number of live vectors in the index.
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Whether the index holds no live vectors.
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Insert a vector, replacing any previous vector stored under `key`.
    pub fn insert(&mut self, key: Uuid, vector: Vec<f32>) {
        if let Some(&slot) = self.by_key.get(&key) {
            self.nodes[slot].deleted = true;
            self.live_count -= 1;
        }

        let level = self.random_level();
        let slot = self.nodes.len();
        self.nodes.push(Node {
            key,
            vector,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.by_key.insert(key, slot);
        self.live_count += 1;

        let Some(mut current) = self.entry_point else {
            self.entry_point = Some(slot);
            self.max_level = level;
            return;
        };

        let query = self.nodes[slot].vector.clone();

        // Greedy descent through layers above the new node's level.
        for l in ((level + 1)..=self.max_level).rev() {
            current = self.greedy_closest(&query, current, l);
        }

        // Connect on every shared layer, nearest first.
        for l in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&query, current, self.config.ef_construction, l);
            let cap = self.max_neighbors(l);
            let chosen: Vec<usize> = found.iter().take(cap).map(|c| c.node).collect();

            for &neighbor in &chosen {
                self.nodes[slot].neighbors[l].push(neighbor);
                self.nodes[neighbor].neighbors[l].push(slot);
                self.shrink_neighbors(neighbor, l);
            }

            if let Some(best) = found.first() {
                current = best.node;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(slot);
        }
    }

    /// Remove the vector stored under `key`, if present.
    pub fn remove(&mut self, key: Uuid) -> bool {
        match self.by_key.remove(&key) {
            Some(slot) => {
                if !self.nodes[slot].deleted {
                    self.nodes[slot].deleted = true;
                    self.live_count -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// Whether a live vector is stored under `key`.
    pub fn contains(&self, key: Uuid) -> bool {
        self.by_key
            .get(&key)
            .is_some_and(|&slot| !self.nodes[slot].deleted)
    }

    /// Return up to `k` live keys ordered by ascending cosine distance.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let Some(mut current) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        for l in (1..=self.max_level).rev() {
            current = self.greedy_closest(query, current, l);
        }

        let ef = self.config.ef_search.max(k);
        let found = self.search_layer(query, current, ef, 0);

        found
            .into_iter()
            .filter(|c| !self.nodes[c.node].deleted)
            .take(k)
            .map(|c| (self.nodes[c.node].key, c.distance))
            .collect()
    }

    /// Iterate over live `(key, vector)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Uuid, &[f32])> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| (n.key, n.vector.as_slice()))
    }

    fn random_level(&mut self) -> usize {
        let sample: f64 = self.rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
        (-sample.ln() * self.level_mult).floor() as usize
    }

    fn max_neighbors(&self, level: usize) -> usize {
        if level == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    /// Follow strictly improving edges on one layer until a local minimum.
    fn greedy_closest(&self, query: &[f32], start: usize, level: usize) -> usize {
        let mut current = start;
        let mut current_dist = cosine_distance(query, &self.nodes[current].vector);

        loop {
            let mut improved = false;
            for &neighbor in &self.nodes[current].neighbors[level] {
                let dist = cosine_distance(query, &self.nodes[neighbor].vector);
                if dist < current_dist {
                    current = neighbor;
                    current_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first search on one layer with a frontier of width `ef`.
    /// Returns candidates sorted by ascending distance.
    fn search_layer(&self, query: &[f32], entry: usize, ef: usize, level: usize) -> Vec<Candidate> {
        let entry_dist = cosine_distance(query, &self.nodes[entry].vector);

        let mut visited: HashSet<usize> = HashSet::from([entry]);
        let mut frontier: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        frontier.push(std::cmp::Reverse(Candidate {
            distance: entry_dist,
            node: entry,
        }));
        results.push(Candidate {
            distance: entry_dist,
            node: entry,
        });

        while let Some(std::cmp::Reverse(closest)) = frontier.pop() {
            let worst = results.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
            if closest.distance > worst && results.len() >= ef {
                break;
            }

            for &neighbor in &self.nodes[closest.node].neighbors[level] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = cosine_distance(query, &self.nodes[neighbor].vector);
                let worst = results.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
                if results.len() < ef || dist < worst {
                    let candidate = Candidate {
                        distance: dist,
                        node: neighbor,
                    };
                    frontier.push(std::cmp::Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut sorted = results.into_vec();
        sorted.sort();
        sorted
    }

    /// Keep only the closest edges when a neighbor list grows past its cap.
    fn shrink_neighbors(&mut self, node: usize, level: usize) {
        let cap = self.max_neighbors(level);
        if self.nodes[node].neighbors[level].len() <= cap {
            return;
        }

        let base = self.nodes[node].vector.clone();
        let mut scored: Vec<Candidate> = self.nodes[node].neighbors[level]
            .iter()
            .map(|&n| Candidate {
                distance: cosine_distance(&base, &self.nodes[n].vector),
                node: n,
            })
            .collect();
        scored.sort();
        scored.dedup_by_key(|c| c.node);

        self.nodes[node].neighbors[level] = scored.into_iter().take(cap).map(|c| c.node).collect();
    }
}

/// Calculate cosine distance between two vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        1.0 - (dot / (norm_a * norm_b))
    }
}
