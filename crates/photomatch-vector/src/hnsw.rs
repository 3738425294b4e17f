//! HNSW graph index.
//!
//! Parameters tuned for quality over speed:
//! - M = 16 (connections per layer, 2*M on layer 0)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 64 (search-time quality, raised to k per query)
//!
//! Nodes live in an arena keyed by a stable `u32` slot. Slots are handed out
//! in insertion order and break ties between equidistant results. Each node
//! keeps one neighbor list per layer behind its own lock, and writers always
//! swap in a whole new list, so a reader holding a snapshot never sees a
//! half-written one.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use photomatch_embeddings::{dot, Embedding};
use photomatch_types::{FaceId, IndexSettings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::VectorError;
use crate::index::{IndexStats, SearchHits, SearchOptions, SearchResult, VectorIndex};

/// Hard cap on assigned levels.
const MAX_LEVEL: usize = 16;

/// Attempts to pick up a live entry point while a delete is promoting a new one.
const ENTRY_POINT_ATTEMPTS: usize = 3;

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Embedding dimension (must match the face model)
    pub dimension: usize,
    /// Number of connections per layer (M parameter)
    pub m: usize,
    /// Build-time search depth
    pub ef_construction: usize,
    /// Default query-time search depth
    pub ef_search: usize,
    /// Seed for level assignment; OS entropy when unset
    pub seed: Option<u64>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 512,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            seed: None,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn from_settings(dimension: usize, settings: &IndexSettings) -> Self {
        Self {
            dimension,
            m: settings.m,
            ef_construction: settings.ef_construction,
            ef_search: settings.ef_search,
            seed: settings.seed,
        }
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef(mut self, ef_construction: usize, ef_search: usize) -> Self {
        self.ef_construction = ef_construction;
        self.ef_search = ef_search;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), VectorError> {
        if self.dimension == 0 {
            return Err(VectorError::InvalidConfig("dimension must be > 0".into()));
        }
        if self.m < 2 {
            return Err(VectorError::InvalidConfig(format!(
                "m must be >= 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(VectorError::InvalidConfig("ef values must be > 0".into()));
        }
        Ok(())
    }

    /// Neighbor list capacity on `layer`.
    fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }
}

type Slot = u32;

/// Cosine distance between unit vectors.
#[inline]
fn distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot(a, b)
}

/// Heap entry ordered by distance, then slot (earlier insertions first).
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    slot: Slot,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.slot.cmp(&other.slot))
    }
}

struct Node {
    face_id: FaceId,
    vector: Vec<f32>,
    level: usize,
    /// One list per layer `0..=level`
    layers: Vec<RwLock<Arc<Vec<Slot>>>>,
    deleted: AtomicBool,
}

impl Node {
    fn new(face_id: FaceId, vector: Vec<f32>, level: usize) -> Self {
        Self {
            face_id,
            vector,
            level,
            layers: (0..=level)
                .map(|_| RwLock::new(Arc::new(Vec::new())))
                .collect(),
            deleted: AtomicBool::new(false),
        }
    }

    /// Snapshot of the neighbor list on `layer`.
    fn neighbors(&self, layer: usize) -> Arc<Vec<Slot>> {
        self.layers
            .get(layer)
            .map(|list| Arc::clone(&list.read()))
            .unwrap_or_default()
    }

    fn set_neighbors(&self, layer: usize, list: Vec<Slot>) {
        if let Some(lock) = self.layers.get(layer) {
            *lock.write() = Arc::new(list);
        }
    }

    fn is_live(&self) -> bool {
        !self.deleted.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
struct EntryPoint {
    slot: Slot,
    level: usize,
}

/// In-memory HNSW index safe for concurrent inserts, deletes and searches.
pub struct HnswIndex {
    config: HnswConfig,
    level_mult: f64,
    nodes: DashMap<Slot, Arc<Node>>,
    ids: DashMap<FaceId, Slot>,
    entry_point: RwLock<Option<EntryPoint>>,
    /// Inserts hold this shared, deletes and validation exclusive. Searches never take it.
    writers: RwLock<()>,
    next_slot: AtomicU32,
    live: AtomicUsize,
    removed: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Result<Self, VectorError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        info!(
            dim = config.dimension,
            m = config.m,
            ef_construction = config.ef_construction,
            ef_search = config.ef_search,
            "Creating vector index"
        );
        Ok(Self {
            level_mult: 1.0 / (config.m as f64).ln(),
            config,
            nodes: DashMap::new(),
            ids: DashMap::new(),
            entry_point: RwLock::new(None),
            writers: RwLock::new(()),
            next_slot: AtomicU32::new(0),
            live: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            rng: Mutex::new(rng),
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Check the structural invariants of the graph.
    ///
    /// Fails with [`VectorError::BrokenInvariant`] if any neighbor list
    /// references a removed or missing entry, a list exceeds its capacity,
    /// the id map disagrees with the arena, or the entry point is not on
    /// the top layer.
    pub fn validate(&self) -> Result<(), VectorError> {
        let _quiesce = self.writers.write();
        let snapshot = self.snapshot();

        let mut top_level = None;
        for (slot, node) in &snapshot {
            if !node.is_live() {
                return Err(broken(format!("removed slot {slot} is still in the arena")));
            }
            if self.ids.get(&node.face_id).map(|s| *s) != Some(*slot) {
                return Err(broken(format!(
                    "face {} is not mapped to slot {slot}",
                    node.face_id
                )));
            }
            top_level = top_level.max(Some(node.level));

            for layer in 0..node.layers.len() {
                let list = node.neighbors(layer);
                if list.len() > self.config.max_degree(layer) {
                    return Err(broken(format!(
                        "slot {slot} has {} neighbors on layer {layer}",
                        list.len()
                    )));
                }
                for &other in list.iter() {
                    if other == *slot {
                        return Err(broken(format!("slot {slot} links to itself")));
                    }
                    match self.node(other) {
                        None => {
                            return Err(broken(format!(
                                "slot {slot} references missing slot {other} on layer {layer}"
                            )))
                        }
                        Some(n) if !n.is_live() => {
                            return Err(broken(format!(
                                "slot {slot} references removed slot {other} on layer {layer}"
                            )))
                        }
                        Some(n) if n.level < layer => {
                            return Err(broken(format!(
                                "slot {slot} references slot {other} above its level on layer {layer}"
                            )))
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        if self.ids.len() != snapshot.len() {
            return Err(broken(format!(
                "{} ids mapped but {} nodes stored",
                self.ids.len(),
                snapshot.len()
            )));
        }

        match (*self.entry_point.read(), top_level) {
            (None, None) => Ok(()),
            (Some(entry), Some(level)) => match self.node(entry.slot) {
                Some(node) if node.level == level && entry.level == level => Ok(()),
                Some(_) => Err(broken(format!(
                    "entry point slot {} is not on the top layer {level}",
                    entry.slot
                ))),
                None => Err(broken(format!("entry point slot {} is missing", entry.slot))),
            },
            (None, Some(_)) => Err(broken("non-empty index has no entry point".into())),
            (Some(entry), None) => Err(broken(format!(
                "empty index still has entry point slot {}",
                entry.slot
            ))),
        }
    }

    fn node(&self, slot: Slot) -> Option<Arc<Node>> {
        self.nodes.get(&slot).map(|n| Arc::clone(n.value()))
    }

    fn snapshot(&self) -> Vec<(Slot, Arc<Node>)> {
        self.nodes
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    /// Geometric level draw: `floor(-ln(u) * 1/ln(M))`.
    fn random_level(&self) -> usize {
        let u: f64 = self.rng.lock().random();
        let level = (-(1.0 - u).ln() * self.level_mult).floor() as usize;
        level.min(MAX_LEVEL)
    }

    fn check_dimension(&self, actual: usize) -> Result<(), VectorError> {
        if actual != self.config.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.config.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Make a node reachable by slot and id. Its own lists must already be set.
    fn publish(&self, id: FaceId, slot: Slot, node: &Arc<Node>) -> Result<(), VectorError> {
        match self.ids.entry(id) {
            Entry::Occupied(_) => Err(VectorError::DuplicateId(id)),
            Entry::Vacant(vacant) => {
                self.nodes.insert(slot, Arc::clone(node));
                vacant.insert(slot);
                self.live.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Rank `slots` by distance to `base`, keeping the `cap` closest live ones.
    fn closest(&self, base: &[f32], slots: Vec<Slot>, cap: usize) -> Vec<Slot> {
        let mut ranked: Vec<Candidate> = slots
            .into_iter()
            .filter_map(|slot| {
                self.node(slot)
                    .filter(|n| n.is_live())
                    .map(|n| Candidate {
                        distance: distance(base, &n.vector),
                        slot,
                    })
            })
            .collect();
        ranked.sort();
        ranked.dedup_by_key(|c| c.slot);
        ranked.truncate(cap);
        ranked.into_iter().map(|c| c.slot).collect()
    }

    /// Add `new_slot` to `target`'s list on `layer`, pruning the furthest
    /// connection when the list overflows.
    fn link(&self, target: Slot, new_slot: Slot, layer: usize) -> Result<(), VectorError> {
        let node = self
            .node(target)
            .ok_or_else(|| broken(format!("neighbor slot {target} vanished during insert")))?;
        let lock = node
            .layers
            .get(layer)
            .ok_or_else(|| broken(format!("slot {target} has no layer {layer}")))?;

        let mut guard = lock.write();
        if guard.contains(&new_slot) {
            return Ok(());
        }
        let mut list = guard.as_ref().clone();
        list.push(new_slot);
        let cap = self.config.max_degree(layer);
        if list.len() > cap {
            list = self.closest(&node.vector, list, cap);
        }
        *guard = Arc::new(list);
        Ok(())
    }

    /// Move to strictly closer neighbors on `layer` until none is closer.
    fn greedy_closest(&self, query: &[f32], mut current: Candidate, layer: usize) -> Candidate {
        loop {
            let Some(node) = self.node(current.slot) else {
                return current;
            };
            let mut improved = false;
            for &next in node.neighbors(layer).iter() {
                let Some(neighbor) = self.node(next).filter(|n| n.is_live()) else {
                    continue;
                };
                let candidate = Candidate {
                    distance: distance(query, &neighbor.vector),
                    slot: next,
                };
                if candidate < current {
                    current = candidate;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on one layer. Returns up to `ef` live nodes sorted
    /// nearest first and whether the deadline stopped the search early.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[Candidate],
        ef: usize,
        layer: usize,
        deadline: Option<Instant>,
    ) -> (Vec<Candidate>, bool) {
        let mut visited: HashSet<Slot> = HashSet::with_capacity(ef * 4);
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entries {
            if !visited.insert(entry.slot) {
                continue;
            }
            frontier.push(Reverse(entry));
            if self.node(entry.slot).is_some_and(|n| n.is_live()) {
                best.push(entry);
            }
        }
        while best.len() > ef {
            best.pop();
        }

        let mut timed_out = false;
        while let Some(Reverse(current)) = frontier.pop() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                timed_out = true;
                break;
            }
            if best.len() >= ef && best.peek().is_some_and(|worst| current > *worst) {
                break;
            }
            let Some(node) = self.node(current.slot) else {
                continue;
            };
            for &next in node.neighbors(layer).iter() {
                if !visited.insert(next) {
                    continue;
                }
                let Some(neighbor) = self.node(next).filter(|n| n.is_live()) else {
                    continue;
                };
                let candidate = Candidate {
                    distance: distance(query, &neighbor.vector),
                    slot: next,
                };
                if best.len() < ef || best.peek().is_some_and(|worst| candidate < *worst) {
                    frontier.push(Reverse(candidate));
                    best.push(candidate);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        (best.into_sorted_vec(), timed_out)
    }

    fn insert_vector(&self, id: FaceId, values: &[f32]) -> Result<(), VectorError> {
        self.check_dimension(values.len())?;
        if self.ids.contains_key(&id) {
            return Err(VectorError::DuplicateId(id));
        }

        let _writer = self.writers.read();
        let level = self.random_level();
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(Node::new(id, values.to_vec(), level));

        let entry = {
            let mut entry_point = self.entry_point.write();
            match *entry_point {
                Some(entry) => entry,
                None => {
                    self.publish(id, slot, &node)?;
                    *entry_point = Some(EntryPoint { slot, level });
                    debug!(id, level, "Inserted first vector");
                    return Ok(());
                }
            }
        };

        let entry_node = self
            .node(entry.slot)
            .ok_or_else(|| broken(format!("entry point slot {} is missing", entry.slot)))?;
        let query = node.vector.as_slice();
        let mut current = Candidate {
            distance: distance(query, &entry_node.vector),
            slot: entry.slot,
        };
        for layer in (level + 1..=entry.level).rev() {
            current = self.greedy_closest(query, current, layer);
        }

        let top = level.min(entry.level);
        let mut chosen: Vec<Vec<Slot>> = vec![Vec::new(); top + 1];
        let mut entries = vec![current];
        for layer in (0..=top).rev() {
            let (found, _) =
                self.search_layer(query, &entries, self.config.ef_construction, layer, None);
            let neighbors: Vec<Slot> = found
                .iter()
                .take(self.config.m)
                .map(|c| c.slot)
                .collect();
            node.set_neighbors(layer, neighbors.clone());
            chosen[layer] = neighbors;
            if !found.is_empty() {
                entries = found;
            }
        }

        self.publish(id, slot, &node)?;
        for (layer, neighbors) in chosen.iter().enumerate() {
            for &neighbor in neighbors {
                self.link(neighbor, slot, layer)?;
            }
        }

        if level > entry.level {
            let mut entry_point = self.entry_point.write();
            if entry_point.map_or(true, |e| level > e.level) {
                *entry_point = Some(EntryPoint { slot, level });
                debug!(id, level, "Promoted new entry point");
            }
        }

        debug!(id, level, "Added vector");
        Ok(())
    }

    fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        options: SearchOptions,
    ) -> Result<SearchHits, VectorError> {
        self.check_dimension(query.len())?;
        if k == 0 {
            return Ok(SearchHits::empty());
        }

        let mut attempts = 0;
        let (entry, entry_node) = loop {
            let Some(entry) = *self.entry_point.read() else {
                return Ok(SearchHits::empty());
            };
            if let Some(node) = self.node(entry.slot) {
                break (entry, node);
            }
            attempts += 1;
            if attempts >= ENTRY_POINT_ATTEMPTS {
                return Err(broken(format!(
                    "entry point slot {} is missing",
                    entry.slot
                )));
            }
            std::thread::yield_now();
        };

        let mut current = Candidate {
            distance: distance(query, &entry_node.vector),
            slot: entry.slot,
        };
        for layer in (1..=entry.level).rev() {
            current = self.greedy_closest(query, current, layer);
        }

        let ef = options.ef.unwrap_or(self.config.ef_search).max(k);
        let (found, timed_out) = self.search_layer(query, &[current], ef, 0, options.deadline);

        let hits: Vec<SearchResult> = found
            .into_iter()
            .filter_map(|c| {
                self.node(c.slot)
                    .filter(|n| n.is_live())
                    .map(|n| SearchResult::new(n.face_id, c.distance))
            })
            .take(k)
            .collect();

        if timed_out {
            warn!(k, ef, found = hits.len(), "Vector search hit its deadline");
        } else {
            debug!(k, ef, found = hits.len(), "Search complete");
        }
        Ok(SearchHits { hits, timed_out })
    }

    fn remove_vector(&self, id: FaceId) -> Result<bool, VectorError> {
        let _writer = self.writers.write();
        self.remove_locked(id)
    }

    /// Caller holds `writers` exclusively.
    fn remove_locked(&self, id: FaceId) -> Result<bool, VectorError> {
        let Some(slot) = self.ids.get(&id).map(|s| *s) else {
            debug!(id, "Remove of unknown vector ignored");
            return Ok(false);
        };
        let node = self
            .node(slot)
            .ok_or_else(|| broken(format!("face {id} mapped to missing slot {slot}")))?;

        let others: Vec<(Slot, Arc<Node>)> = self
            .snapshot()
            .into_iter()
            .filter(|(s, _)| *s != slot)
            .collect();

        // Promote first so new searches start from a node that stays.
        {
            let mut entry_point = self.entry_point.write();
            if entry_point.is_some_and(|e| e.slot == slot) {
                *entry_point = others
                    .iter()
                    .map(|(s, n)| EntryPoint {
                        slot: *s,
                        level: n.level,
                    })
                    .max_by(|a, b| a.level.cmp(&b.level).then(b.slot.cmp(&a.slot)));
                debug!(id, new_entry = ?entry_point.map(|e| e.slot), "Replaced entry point");
            }
        }

        self.ids.remove(&id);
        self.nodes.remove(&slot);
        node.deleted.store(true, Ordering::Release);

        // Lists are not symmetric after pruning, so every node is checked.
        let mut repaired = 0usize;
        for (other_slot, other) in &others {
            for (layer, lock) in other.layers.iter().enumerate() {
                let mut guard = lock.write();
                if !guard.contains(&slot) {
                    continue;
                }
                let mut pool: Vec<Slot> = guard.iter().copied().filter(|&s| s != slot).collect();
                let kept = pool.len();
                for &s in node.neighbors(layer).iter() {
                    if s != *other_slot && !pool.contains(&s) {
                        pool.push(s);
                    }
                }
                let list = if pool.len() > kept {
                    self.closest(&other.vector, pool, self.config.max_degree(layer))
                } else {
                    pool
                };
                *guard = Arc::new(list);
                repaired += 1;
            }
        }

        for layer in 0..node.layers.len() {
            node.set_neighbors(layer, Vec::new());
        }
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.removed.fetch_add(1, Ordering::Relaxed);

        debug!(id, repaired, "Removed vector");
        Ok(true)
    }
}

fn broken(message: String) -> VectorError {
    VectorError::BrokenInvariant(message)
}

impl VectorIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn insert(&self, id: FaceId, embedding: &Embedding) -> Result<(), VectorError> {
        self.insert_vector(id, &embedding.values)
    }

    fn search(
        &self,
        query: &Embedding,
        k: usize,
        options: SearchOptions,
    ) -> Result<SearchHits, VectorError> {
        self.search_vector(&query.values, k, options)
    }

    fn remove(&self, id: FaceId) -> Result<bool, VectorError> {
        self.remove_vector(id)
    }

    fn try_remove(&self, id: FaceId) -> Result<Option<bool>, VectorError> {
        let Some(_writer) = self.writers.try_write() else {
            debug!(id, "Remove deferred, writers active");
            return Ok(None);
        };
        self.remove_locked(id).map(Some)
    }

    fn validate(&self) -> Result<(), VectorError> {
        HnswIndex::validate(self)
    }

    fn contains(&self, id: FaceId) -> bool {
        self.ids.contains_key(&id)
    }

    fn ids(&self) -> Vec<FaceId> {
        self.ids.iter().map(|e| *e.key()).collect()
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            vector_count: self.len(),
            dimension: self.config.dimension,
            max_level: self.entry_point.read().map(|e| e.level).unwrap_or(0),
            removed: self.removed.load(Ordering::Relaxed),
            available: true,
        }
    }

    fn clear(&self) {
        let _writer = self.writers.write();
        *self.entry_point.write() = None;
        self.ids.clear();
        self.nodes.clear();
        self.next_slot.store(0, Ordering::Relaxed);
        self.live.store(0, Ordering::Relaxed);
        self.removed.store(0, Ordering::Relaxed);
        info!("Cleared vector index");
    }
}
