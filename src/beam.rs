//! The per-span beam: admission, recombination and pruning.
//!
//! A beam holds one representative per recombination key. While its span is
//! being filled the beam only grows or shrinks through [`SpanBeam::admit`] and
//! histogram pruning; [`SpanBeam::sort_and_finalize`] then freezes a
//! score-descending snapshot that larger spans and the extractor read.

use crate::error::{DecodeError, Result};
use crate::hypothesis::{HypoId, HypothesisArena, HypothesisDraft, RecombinationKey};
use crate::span::Span;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Why a hypothesis was not admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    NonFinite,
    BelowBeam,
}

/// Result of offering a hypothesis to a beam.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A new vertex was created.
    Added(HypoId),
    /// The hypothesis was merged into an existing vertex, now represented by
    /// `winner`.
    Recombined { winner: HypoId },
    Discarded(DiscardReason),
}

impl Admission {
    /// True if the beam gained a vertex.
    pub fn is_added(&self) -> bool {
        matches!(self, Admission::Added(_))
    }
}

/// Counters kept by one beam.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeamStats {
    pub added: usize,
    pub recombined: usize,
    pub discarded_non_finite: usize,
    pub discarded_below_beam: usize,
    pub pruned: usize,
}

impl BeamStats {
    pub fn merge(&mut self, other: &BeamStats) {
        self.added += other.added;
        self.recombined += other.recombined;
        self.discarded_non_finite += other.discarded_non_finite;
        self.discarded_below_beam += other.discarded_below_beam;
        self.pruned += other.pruned;
    }
}

/// Score-descending order, earlier hypotheses first on ties.
fn by_score(arena: &HypothesisArena, a: HypoId, b: HypoId) -> Ordering {
    arena[b]
        .total_score()
        .total_cmp(&arena[a].total_score())
        .then(a.cmp(&b))
}

/// The set of live hypotheses for one span.
#[derive(Debug)]
pub struct SpanBeam {
    span: Span,
    beam_width: f64,
    /// 0 means unlimited.
    max_size: usize,
    keep_arcs: bool,
    best_score: f64,
    vertices: FxHashMap<RecombinationKey, HypoId>,
    sorted: Vec<HypoId>,
    finalized: bool,
    stats: BeamStats,
}

impl SpanBeam {
    pub fn new(span: Span, beam_width: f64, max_size: usize, keep_arcs: bool) -> Self {
        SpanBeam {
            span,
            beam_width,
            max_size,
            keep_arcs,
            best_score: f64::NEG_INFINITY,
            vertices: FxHashMap::default(),
            sorted: Vec::new(),
            finalized: false,
            stats: BeamStats::default(),
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// Number of vertices currently held.
    pub fn len(&self) -> usize {
        if self.finalized {
            self.sorted.len()
        } else {
            self.vertices.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Best score admitted so far.
    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn stats(&self) -> &BeamStats {
        &self.stats
    }

    /// Offer a hypothesis to the beam.
    ///
    /// Hypotheses that are not kept are never given an arena ID unless they
    /// are retained as recombination arcs.
    pub fn admit(&mut self, draft: HypothesisDraft, arena: &mut HypothesisArena) -> Result<Admission> {
        if self.finalized {
            return Err(DecodeError::BeamFinalized(self.span));
        }

        let score = draft.total_score();
        if !score.is_finite() {
            self.stats.discarded_non_finite += 1;
            log::trace!("{}: pruned: non-finite score", self.span);
            return Ok(Admission::Discarded(DiscardReason::NonFinite));
        }
        if score < self.best_score - self.beam_width {
            self.stats.discarded_below_beam += 1;
            log::trace!(
                "{}: pruned: below beam ({} < {} - {})",
                self.span,
                score,
                self.best_score,
                self.beam_width
            );
            return Ok(Admission::Discarded(DiscardReason::BelowBeam));
        }

        let key = draft.recombination_key();
        if let Some(&incumbent) = self.vertices.get(&key) {
            self.stats.recombined += 1;
            let incumbent_score = arena[incumbent].total_score();
            let winner = if score > incumbent_score {
                let id = arena.insert(draft);
                if self.keep_arcs {
                    arena.absorb(id, incumbent);
                } else {
                    arena.release(incumbent);
                }
                self.vertices.insert(key, id);
                self.best_score = self.best_score.max(score);
                log::trace!("{}: {} replaces {}", self.span, id, incumbent);
                id
            } else {
                if self.keep_arcs {
                    let id = arena.insert(draft);
                    arena.absorb(incumbent, id);
                    log::trace!("{}: {} recombined into {}", self.span, id, incumbent);
                }
                incumbent
            };
            return Ok(Admission::Recombined { winner });
        }

        let id = arena.insert(draft);
        self.vertices.insert(key, id);
        self.best_score = self.best_score.max(score);
        self.stats.added += 1;
        log::trace!("{}: added {} ({})", self.span, id, score);

        if self.max_size > 0 && self.vertices.len() > 2 * self.max_size - 1 {
            self.prune_to_size(arena);
        }
        Ok(Admission::Added(id))
    }

    /// Histogram pruning.
    ///
    /// Keeps everything scoring at least as well as the `max_size`-th best
    /// vertex, so ties at the cut survive. If that still leaves more than
    /// twice `max_size`, the beam is sorted and cut to exactly `max_size`.
    pub fn prune_to_size(&mut self, arena: &mut HypothesisArena) {
        if self.max_size == 0 || self.vertices.len() <= self.max_size {
            return;
        }

        let mut scores: Vec<f64> = self.vertices.values().map(|&id| arena[id].total_score()).collect();
        scores.sort_unstable_by(|a, b| b.total_cmp(a));
        let threshold = scores[self.max_size - 1];

        let before = self.vertices.len();
        self.vertices.retain(|_, id| {
            let keep = arena[*id].total_score() >= threshold;
            if !keep {
                arena.release(*id);
            }
            keep
        });

        if self.vertices.len() > 2 * self.max_size {
            log::debug!(
                "{}: desperation pruning {} tied hypotheses down to {}",
                self.span,
                self.vertices.len(),
                self.max_size
            );
            let mut ids: Vec<HypoId> = self.vertices.values().copied().collect();
            ids.sort_by(|&a, &b| by_score(arena, a, b));
            for &id in &ids[self.max_size..] {
                arena.release(id);
            }
            ids.truncate(self.max_size);
            self.vertices.retain(|_, id| ids.contains(id));
        }

        self.stats.pruned += before - self.vertices.len();
        log::trace!("{}: pruned {} hypotheses", self.span, before - self.vertices.len());
    }

    /// Prune, drop whatever fell out of the beam after the best score moved
    /// up, and freeze a score-descending snapshot.
    ///
    /// A second call does nothing.
    pub fn sort_and_finalize(&mut self, arena: &mut HypothesisArena) {
        if self.finalized {
            log::debug!("{}: already finalized", self.span);
            return;
        }
        self.prune_to_size(arena);

        let threshold = self.best_score - self.beam_width;
        let mut dropped = 0;
        self.vertices.retain(|_, id| {
            let keep = arena[*id].total_score() >= threshold;
            if !keep {
                arena.release(*id);
                dropped += 1;
            }
            keep
        });
        self.stats.discarded_below_beam += dropped;

        let mut sorted: Vec<HypoId> = self.vertices.drain().map(|(_, id)| id).collect();
        sorted.sort_by(|&a, &b| by_score(arena, a, b));
        for &id in &sorted {
            arena.mark_winner(id);
        }
        self.sorted = sorted;
        self.finalized = true;

        log::debug!(
            "{}: {} hypotheses, best {}, {} recombined, {} pruned, {} below beam",
            self.span,
            self.sorted.len(),
            self.best_score,
            self.stats.recombined,
            self.stats.pruned,
            self.stats.discarded_below_beam
        );
    }

    /// The finalized vertices, best first.
    pub fn sorted(&self) -> Result<&[HypoId]> {
        if !self.finalized {
            return Err(DecodeError::BeamNotFinalized(self.span));
        }
        Ok(&self.sorted)
    }

    /// The best finalized hypothesis, if any.
    pub fn best(&self) -> Result<Option<HypoId>> {
        Ok(self.sorted()?.first().copied())
    }
}
