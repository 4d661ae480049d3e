//! Derivation hypotheses and the per-sentence arena that owns them.
//!
//! Hypotheses are built in two phases. A [`HypothesisDraft`] is computed from
//! a rule application and its children: first the rule-local record (rule
//! scores and feature deltas), then the rolled-up record, folded once over the
//! children. The arena then assigns an ID and the hypothesis never changes
//! again, apart from the recombination bookkeeping done by its beam.
//!
//! Children and recombination arcs are arena IDs, never references, so
//! vertices can point at each other freely and everything is dropped together
//! with the arena.

use crate::feature::{FeatureSet, FeatureState};
use crate::grammar::Sentence;
use crate::rule::{Label, RuleApplication};
use crate::score::ScoreBreakdown;
use crate::span::Span;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

/// Arena index of a hypothesis. IDs increase in creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HypoId(u64);

impl HypoId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HypoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything that decides whether two hypotheses of one span can be merged:
/// their LHS label and the state of every stateful feature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecombinationKey {
    pub lhs: Label,
    pub states: Box<[FeatureState]>,
}

/// A fully scored hypothesis that has not been given an ID yet.
#[derive(Clone, Debug)]
pub struct HypothesisDraft {
    rule: Arc<RuleApplication>,
    children: Vec<HypoId>,
    local: ScoreBreakdown,
    local_score: f64,
    rolled_up: ScoreBreakdown,
    total_score: f64,
    states: Box<[FeatureState]>,
}

impl HypothesisDraft {
    /// Score `rule` on top of `children` (one vertex per slot).
    pub fn build(
        rule: Arc<RuleApplication>,
        children: Vec<HypoId>,
        arena: &HypothesisArena,
        features: &FeatureSet,
        sentence: &Sentence,
    ) -> Self {
        assert_eq!(
            children.len(),
            rule.arity(),
            "rule {} has {} slots but {} children were supplied",
            rule.rule_id,
            rule.arity(),
            children.len()
        );

        let child_refs: Vec<&Hypothesis> = children.iter().map(|&id| &arena[id]).collect();
        let (local, states) = features.evaluate(&rule, &child_refs, sentence);

        let mut rolled_up = local.clone();
        for child in &child_refs {
            rolled_up.plus_equals(&child.rolled_up);
        }

        let weights = features.weights();
        HypothesisDraft {
            local_score: local.weighted(weights),
            total_score: rolled_up.weighted(weights),
            rule,
            children,
            local,
            rolled_up,
            states,
        }
    }

    pub fn total_score(&self) -> f64 {
        self.total_score
    }

    pub fn children(&self) -> &[HypoId] {
        &self.children
    }

    pub fn rule(&self) -> &Arc<RuleApplication> {
        &self.rule
    }

    pub fn recombination_key(&self) -> RecombinationKey {
        RecombinationKey {
            lhs: self.rule.lhs,
            states: self.states.clone(),
        }
    }
}

/// A scored derivation candidate for one span.
#[derive(Clone, Debug)]
pub struct Hypothesis {
    id: HypoId,
    rule: Arc<RuleApplication>,
    children: Vec<HypoId>,
    local: ScoreBreakdown,
    local_score: f64,
    rolled_up: ScoreBreakdown,
    total_score: f64,
    states: Box<[FeatureState]>,
    /// Equivalent hypotheses that lost recombination against this one.
    arcs: Vec<HypoId>,
    /// Set when the beam is finalized: the vertex representative, which is
    /// this hypothesis itself for winners.
    winner: Option<HypoId>,
}

impl Hypothesis {
    pub fn id(&self) -> HypoId {
        self.id
    }

    pub fn rule(&self) -> &Arc<RuleApplication> {
        &self.rule
    }

    pub fn span(&self) -> Span {
        self.rule.span
    }

    pub fn lhs(&self) -> Label {
        self.rule.lhs
    }

    /// Child vertices, one per slot.
    pub fn children(&self) -> &[HypoId] {
        &self.children
    }

    pub fn states(&self) -> &[FeatureState] {
        &self.states
    }

    /// Scores contributed by this rule application alone.
    pub fn local_breakdown(&self) -> &ScoreBreakdown {
        &self.local
    }

    pub fn local_score(&self) -> f64 {
        self.local_score
    }

    /// Scores of the whole sub-derivation rooted here.
    pub fn breakdown(&self) -> &ScoreBreakdown {
        &self.rolled_up
    }

    pub fn total_score(&self) -> f64 {
        self.total_score
    }

    pub fn arcs(&self) -> &[HypoId] {
        &self.arcs
    }

    pub fn winner(&self) -> Option<HypoId> {
        self.winner
    }

    pub fn is_winner(&self) -> bool {
        self.winner == Some(self.id)
    }

    pub fn recombination_key(&self) -> RecombinationKey {
        RecombinationKey {
            lhs: self.rule.lhs,
            states: self.states.clone(),
        }
    }
}

/// Owner of every hypothesis created while decoding one sentence.
///
/// Slots of discarded hypotheses are emptied but never reused, so an ID stays
/// unambiguous for the lifetime of the arena.
#[derive(Debug, Default)]
pub struct HypothesisArena {
    slots: Vec<Option<Hypothesis>>,
    live: usize,
}

impl HypothesisArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next ID to a draft.
    pub fn insert(&mut self, draft: HypothesisDraft) -> HypoId {
        let id = HypoId(self.slots.len() as u64);
        self.slots.push(Some(Hypothesis {
            id,
            rule: draft.rule,
            children: draft.children,
            local: draft.local,
            local_score: draft.local_score,
            rolled_up: draft.rolled_up,
            total_score: draft.total_score,
            states: draft.states,
            arcs: Vec::new(),
            winner: None,
        }));
        self.live += 1;
        id
    }

    pub fn get(&self, id: HypoId) -> Option<&Hypothesis> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: HypoId) -> &mut Hypothesis {
        self.slots[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("hypothesis {} was released", id))
    }

    /// Drop a hypothesis together with its recombination arcs.
    pub fn release(&mut self, id: HypoId) {
        if let Some(hypo) = self.slots[id.index()].take() {
            self.live -= 1;
            for arc in hypo.arcs {
                self.release(arc);
            }
        }
    }

    /// Record `loser` as a recombined alternative of `winner`. The loser's own
    /// arcs move over to the winner, so arc lists stay one level deep.
    pub fn absorb(&mut self, winner: HypoId, loser: HypoId) {
        let inherited = std::mem::take(&mut self.get_mut(loser).arcs);
        let winner = self.get_mut(winner);
        winner.arcs.extend(inherited);
        winner.arcs.push(loser);
    }

    /// Point a vertex representative and all of its arcs at the representative.
    pub fn mark_winner(&mut self, winner: HypoId) {
        let arcs = self.get_mut(winner).arcs.clone();
        self.get_mut(winner).winner = Some(winner);
        for arc in arcs {
            self.get_mut(arc).winner = Some(winner);
        }
    }

    /// Number of hypotheses ever created.
    pub fn created(&self) -> usize {
        self.slots.len()
    }

    /// Number of hypotheses still held.
    pub fn live(&self) -> usize {
        self.live
    }
}

impl Index<HypoId> for HypothesisArena {
    type Output = Hypothesis;

    fn index(&self, id: HypoId) -> &Hypothesis {
        self.get(id)
            .unwrap_or_else(|| panic!("hypothesis {} was released", id))
    }
}
