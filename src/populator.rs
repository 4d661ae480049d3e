//! Cell population: turning the rule applications of a span into a stream of
//! scored candidate hypotheses.
//!
//! The controller pulls from a [`CandidateStream`] until it is exhausted or the
//! pop limit is reached; the beam never sees how candidates are ordered.

use crate::chart::Chart;
use crate::error::Result;
use crate::feature::FeatureSet;
use crate::grammar::Sentence;
use crate::hypothesis::{HypoId, HypothesisArena, HypothesisDraft};
use crate::rule::RuleApplication;
use crate::span::Span;
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::sync::Arc;

/// A finite, non-restartable, approximately best-first sequence of candidates.
pub trait CandidateStream {
    /// The next candidate, scored against the current arena.
    fn next_candidate(&mut self, arena: &HypothesisArena) -> Option<HypothesisDraft>;
}

/// Builds the candidate stream for one span.
pub trait CellPopulator: Sync {
    /// `chart` must hold finalized beams for every span smaller than `span`.
    fn expand<'a>(
        &self,
        span: Span,
        rules: &[Arc<RuleApplication>],
        chart: &Chart,
        arena: &HypothesisArena,
        features: &'a FeatureSet,
        sentence: &'a Sentence,
    ) -> Result<Box<dyn CandidateStream + 'a>>;
}

/// Cube pruning over the sorted child beams of each rule application.
#[derive(Debug, Clone, Copy, Default)]
pub struct CubePruning;

impl CellPopulator for CubePruning {
    fn expand<'a>(
        &self,
        span: Span,
        rules: &[Arc<RuleApplication>],
        chart: &Chart,
        arena: &HypothesisArena,
        features: &'a FeatureSet,
        sentence: &'a Sentence,
    ) -> Result<Box<dyn CandidateStream + 'a>> {
        let mut cubes = Vec::with_capacity(rules.len());
        'rules: for rule in rules {
            let mut lists = Vec::with_capacity(rule.arity());
            for slot in &rule.slots {
                let list: Vec<HypoId> = chart
                    .sorted(slot.span)?
                    .iter()
                    .copied()
                    .filter(|&id| arena[id].lhs() == slot.label)
                    .collect();
                if list.is_empty() {
                    continue 'rules;
                }
                lists.push(list);
            }
            cubes.push(Cube {
                rule: Arc::clone(rule),
                lists,
            });
        }
        log::trace!("{}: {} of {} rule applications are expandable", span, cubes.len(), rules.len());

        let mut stream = CubeStream {
            cubes,
            queue: PriorityQueue::new(),
            pending: FxHashMap::default(),
            seen: FxHashSet::default(),
            pushed: 0,
            features,
            sentence,
        };
        for cube in 0..stream.cubes.len() {
            let corner = vec![0; stream.cubes[cube].lists.len()].into_boxed_slice();
            stream.push(cube, corner, arena);
        }
        Ok(Box::new(stream))
    }
}

/// One rule application and, per slot, its sorted candidate children.
struct Cube {
    rule: Arc<RuleApplication>,
    lists: Vec<Vec<HypoId>>,
}

/// A position in one cube: the rule and a rank per slot.
type Coord = (usize, Box<[usize]>);

struct CubeStream<'a> {
    cubes: Vec<Cube>,
    /// Frontier ordered by score, then by push order.
    queue: PriorityQueue<Coord, (OrderedFloat<f64>, Reverse<u64>)>,
    pending: FxHashMap<Coord, HypothesisDraft>,
    seen: FxHashSet<Coord>,
    pushed: u64,
    features: &'a FeatureSet,
    sentence: &'a Sentence,
}

impl CubeStream<'_> {
    fn push(&mut self, cube: usize, ranks: Box<[usize]>, arena: &HypothesisArena) {
        let coord = (cube, ranks);
        if !self.seen.insert(coord.clone()) {
            return;
        }
        let c = &self.cubes[cube];
        let children = coord.1.iter().zip(&c.lists).map(|(&rank, list)| list[rank]).collect();
        let draft = HypothesisDraft::build(Arc::clone(&c.rule), children, arena, self.features, self.sentence);

        let priority = (OrderedFloat(draft.total_score()), Reverse(self.pushed));
        self.pushed += 1;
        self.queue.push(coord.clone(), priority);
        self.pending.insert(coord, draft);
    }
}

impl CandidateStream for CubeStream<'_> {
    fn next_candidate(&mut self, arena: &HypothesisArena) -> Option<HypothesisDraft> {
        let (coord, _) = self.queue.pop()?;
        let draft = self.pending.remove(&coord)?;

        let (cube, ranks) = coord;
        for slot in 0..ranks.len() {
            if ranks[slot] + 1 < self.cubes[cube].lists[slot].len() {
                let mut next = ranks.clone();
                next[slot] += 1;
                self.push(cube, next, arena);
            }
        }
        Some(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::BoundaryBigram;
    use crate::grammar::{GrammarMatcher, SynchronousGrammar};

    /// Fill the width-1 beams of "a b" with three translations per word.
    fn setup() -> (SynchronousGrammar, Chart, HypothesisArena, FeatureSet) {
        let mut g = SynchronousGrammar::new(1);
        let x = g.label("X");
        let s = g.label("S");
        for (word, scores) in [("a", [-1.0, -2.0, -4.0]), ("b", [-1.5, -3.0, -3.5])] {
            for (i, score) in scores.iter().enumerate() {
                let target = format!("{}{}", word, i);
                g.add_lexical(x, &[word], &[target.as_str()], vec![*score]).unwrap();
            }
        }
        g.add_glue_rules(s, x).unwrap();

        // a zero-cost bigram model keeps distinct translations apart
        let features = FeatureSet::builder(1).feature(BoundaryBigram::new(0.0)).build().unwrap();
        let sentence = g.tokenize("a b");
        let mut chart = Chart::new(2, 100.0, 10, false);
        let mut arena = HypothesisArena::new();
        for pos in 0..2 {
            let span = Span::word(pos);
            let rules = g.match_span(&sentence, span);
            let mut stream = CubePruning.expand(span, &rules, &chart, &arena, &features, &sentence).unwrap();
            while let Some(draft) = stream.next_candidate(&arena) {
                chart.beam_mut(span).unwrap().admit(draft, &mut arena).unwrap();
            }
            chart.beam_mut(span).unwrap().sort_and_finalize(&mut arena);
        }
        (g, chart, arena, features)
    }

    #[test]
    fn test_pops_in_score_order() {
        let (g, chart, arena, features) = setup();
        let sentence = g.tokenize("a b");
        let span = Span::new(0, 1);
        let rules = g.match_span(&sentence, span);
        let mut stream = CubePruning.expand(span, &rules, &chart, &arena, &features, &sentence).unwrap();

        let mut scores = Vec::new();
        while let Some(draft) = stream.next_candidate(&arena) {
            scores.push(draft.total_score());
        }
        // only S -> X X applies: its cube has 3 x 3 corners
        assert_eq!(scores.len(), 9);
        assert_eq!(scores[0], -2.5);
        // monotone combination: popping is exactly best-first
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_label_filter_skips_unfillable_rules() {
        let (g, chart, arena, features) = setup();
        let sentence = g.tokenize("a b");
        let span = Span::new(0, 1);
        // S -> S X needs an S over [0..0], which does not exist
        let rules: Vec<_> = g
            .match_span(&sentence, span)
            .into_iter()
            .filter(|r| r.rule_id == g.num_rules() - 1)
            .collect();
        assert_eq!(rules.len(), 1);

        let mut stream = CubePruning.expand(span, &rules, &chart, &arena, &features, &sentence).unwrap();
        assert!(stream.next_candidate(&arena).is_none());
    }

    #[test]
    fn test_unfinalized_children_rejected() {
        let (g, _, arena, features) = setup();
        let sentence = g.tokenize("a b");
        let chart = Chart::new(2, 100.0, 10, false);
        let span = Span::new(0, 1);
        let rules = g.match_span(&sentence, span);
        assert!(CubePruning.expand(span, &rules, &chart, &arena, &features, &sentence).is_err());
    }
}
