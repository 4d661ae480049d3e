//! Lazy k-best extraction over the search hypergraph (Huang and Chiang 2005,
//! Algorithm 3).
//!
//! A vertex is a finalized beam entry together with the hypotheses that were
//! recombined into it; each of those hypotheses is one incoming hyperedge. A
//! derivation picks an edge and, for every tail vertex, a rank in that
//! vertex's own k-best list. Derivations are stored in a flat arena and refer
//! to each other by index.
//!
//! Goal vertices are joined under a synthetic root whose edges each have a
//! single tail, so several top-level vertices are enumerated the same way as
//! recombined alternatives.

use crate::hypothesis::{HypoId, HypothesisArena};
use crate::score::ScoreBreakdown;
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;

/// Index of a derivation in a [`KBestList`].
pub type DerivationId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Edge {
    Hypothesis(HypoId),
    /// Synthetic edge from the root to a goal vertex.
    Root(HypoId),
}

/// One fully resolved derivation.
#[derive(Clone, Debug)]
pub struct Derivation {
    edge: Edge,
    tails: Vec<usize>,
    back_pointers: Vec<usize>,
    subderivations: Vec<DerivationId>,
    score: f64,
    breakdown: ScoreBreakdown,
}

impl Derivation {
    /// The hypothesis whose rule application forms the top edge.
    pub fn hypothesis(&self) -> HypoId {
        match self.edge {
            Edge::Hypothesis(id) | Edge::Root(id) => id,
        }
    }

    /// Chosen derivation of each child, in slot order.
    pub fn subderivations(&self) -> &[DerivationId] {
        &self.subderivations
    }

    /// Rank of each chosen sub-derivation in its vertex's k-best list.
    pub fn back_pointers(&self) -> &[usize] {
        &self.back_pointers
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn breakdown(&self) -> &ScoreBreakdown {
        &self.breakdown
    }
}

/// Candidates ordered by score, earlier derivations first on ties.
type Candidates = PriorityQueue<DerivationId, (OrderedFloat<f64>, Reverse<DerivationId>)>;

struct KVertex {
    /// Edges other than the primary one.
    alternatives: Vec<Edge>,
    kbest: Vec<DerivationId>,
    candidates: Candidates,
    visited: bool,
}

impl KVertex {
    fn new(alternatives: Vec<Edge>, best: DerivationId) -> Self {
        KVertex {
            alternatives,
            kbest: vec![best],
            candidates: PriorityQueue::new(),
            visited: false,
        }
    }
}

/// The outcome of one extraction: the ranked derivations and every
/// sub-derivation they refer to.
#[derive(Clone, Debug, Default)]
pub struct KBestList {
    derivations: Vec<Derivation>,
    ranked: Vec<DerivationId>,
}

impl KBestList {
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// The `rank`-th best derivation.
    pub fn get(&self, rank: usize) -> Option<&Derivation> {
        self.ranked.get(rank).map(|&id| &self.derivations[id])
    }

    /// IDs of the ranked derivations, best first.
    pub fn ranked(&self) -> &[DerivationId] {
        &self.ranked
    }

    /// Any derivation in this list, including sub-derivations.
    pub fn derivation(&self, id: DerivationId) -> &Derivation {
        &self.derivations[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Derivation> {
        self.ranked.iter().map(move |&id| &self.derivations[id])
    }

    pub fn scores(&self) -> Vec<f64> {
        self.iter().map(Derivation::score).collect()
    }

    /// Keep only the best `n`.
    pub fn truncate(&mut self, n: usize) {
        self.ranked.truncate(n);
    }
}

/// Lazy k-best extractor over one sentence's hypotheses.
pub struct KBestExtractor<'a> {
    arena: &'a HypothesisArena,
    vertices: Vec<KVertex>,
    vertex_of: FxHashMap<HypoId, usize>,
    derivations: Vec<Derivation>,
    seen: FxHashSet<(Edge, Box<[usize]>)>,
}

impl<'a> KBestExtractor<'a> {
    pub fn new(arena: &'a HypothesisArena) -> Self {
        KBestExtractor {
            arena,
            vertices: Vec::new(),
            vertex_of: FxHashMap::default(),
            derivations: Vec::new(),
            seen: FxHashSet::default(),
        }
    }

    /// Extract up to `k` derivations from the goal vertices (finalized beam
    /// entries, best first), in non-increasing score order.
    pub fn extract(mut self, goal: &[HypoId], k: usize) -> KBestList {
        let Some((&first, rest)) = goal.split_first() else {
            return KBestList::default();
        };
        if k == 0 {
            return KBestList::default();
        }

        let best = self.best_derivation(Edge::Root(first));
        let root = self.vertices.len();
        self.vertices
            .push(KVertex::new(rest.iter().map(|&id| Edge::Root(id)).collect(), best));
        self.lazy_kth_best(root, k);

        // strip the synthetic top edge
        let ranked = self.vertices[root]
            .kbest
            .iter()
            .map(|&d| self.derivations[d].subderivations[0])
            .collect::<Vec<_>>();
        log::debug!(
            "k-best: {} of {} requested, {} derivations built over {} vertices",
            ranked.len(),
            k,
            self.derivations.len(),
            self.vertices.len()
        );

        KBestList {
            derivations: self.derivations,
            ranked,
        }
    }

    fn vertex(&mut self, hypo: HypoId) -> usize {
        if let Some(&v) = self.vertex_of.get(&hypo) {
            return v;
        }
        let best = self.best_derivation(Edge::Hypothesis(hypo));
        let alternatives = self.arena[hypo]
            .arcs()
            .iter()
            .map(|&id| Edge::Hypothesis(id))
            .collect();
        let v = self.vertices.len();
        self.vertices.push(KVertex::new(alternatives, best));
        self.vertex_of.insert(hypo, v);
        v
    }

    /// The derivation taking the best derivation of every tail.
    fn best_derivation(&mut self, edge: Edge) -> DerivationId {
        let arena = self.arena;
        let children: Vec<HypoId> = match edge {
            Edge::Hypothesis(id) => arena[id].children().to_vec(),
            Edge::Root(goal) => vec![goal],
        };
        let tails: Vec<usize> = children.iter().map(|&c| self.vertex(c)).collect();
        let subderivations: Vec<DerivationId> = tails.iter().map(|&v| self.vertices[v].kbest[0]).collect();

        let (mut score, mut breakdown) = match edge {
            Edge::Hypothesis(id) => (arena[id].local_score(), arena[id].local_breakdown().clone()),
            Edge::Root(goal) => (0.0, ScoreBreakdown::zeros(arena[goal].breakdown().len())),
        };
        for &sub in &subderivations {
            score += self.derivations[sub].score;
            breakdown.plus_equals(&self.derivations[sub].breakdown);
        }

        let back_pointers = vec![0; tails.len()];
        self.seen.insert((edge, back_pointers.clone().into_boxed_slice()));
        self.push_derivation(Derivation {
            edge,
            tails,
            back_pointers,
            subderivations,
            score,
            breakdown,
        })
    }

    fn push_derivation(&mut self, derivation: Derivation) -> DerivationId {
        let id = self.derivations.len();
        self.derivations.push(derivation);
        id
    }

    fn push_candidate(&mut self, v: usize, d: DerivationId) {
        let priority = (OrderedFloat(self.derivations[d].score), Reverse(d));
        self.vertices[v].candidates.push(d, priority);
    }

    /// Seed the candidates of `v` with the best derivation of every
    /// alternative edge.
    fn get_candidates(&mut self, v: usize) {
        let alternatives = std::mem::take(&mut self.vertices[v].alternatives);
        for &edge in &alternatives {
            let d = self.best_derivation(edge);
            self.push_candidate(v, d);
        }
        self.vertices[v].alternatives = alternatives;
    }

    /// Grow the k-best list of `v` to `k` entries, or as far as it goes.
    fn lazy_kth_best(&mut self, v: usize, k: usize) {
        if !self.vertices[v].visited {
            self.vertices[v].visited = true;
            self.get_candidates(v);
        }
        while self.vertices[v].kbest.len() < k {
            if let Some(&last) = self.vertices[v].kbest.last() {
                self.lazy_next(v, last);
            }
            match self.vertices[v].candidates.pop() {
                Some((d, _)) => self.vertices[v].kbest.push(d),
                None => break,
            }
        }
    }

    /// Push every neighbour of `d`: the same edge with exactly one tail
    /// advanced to its next-best derivation.
    fn lazy_next(&mut self, v: usize, d: DerivationId) {
        let edge = self.derivations[d].edge;
        let tails = self.derivations[d].tails.clone();
        let back_pointers = self.derivations[d].back_pointers.clone();

        for (i, &tail) in tails.iter().enumerate() {
            let rank = back_pointers[i] + 1;
            self.lazy_kth_best(tail, rank + 1);
            let Some(&next_sub) = self.vertices[tail].kbest.get(rank) else {
                continue;
            };

            let mut next_pointers = back_pointers.clone();
            next_pointers[i] = rank;
            if !self.seen.insert((edge, next_pointers.clone().into_boxed_slice())) {
                continue;
            }

            let old = &self.derivations[d];
            let old_sub = &self.derivations[old.subderivations[i]];
            let new_sub = &self.derivations[next_sub];
            let score = old.score - old_sub.score + new_sub.score;
            let mut breakdown = old.breakdown.clone();
            breakdown.minus_equals(&old_sub.breakdown);
            breakdown.plus_equals(&new_sub.breakdown);
            let mut subderivations = old.subderivations.clone();
            subderivations[i] = next_sub;

            let id = self.push_derivation(Derivation {
                edge,
                tails: tails.clone(),
                back_pointers: next_pointers,
                subderivations,
                score,
                breakdown,
            });
            self.push_candidate(v, id);
        }
    }
}
