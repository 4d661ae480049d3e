//! Feature functions and the ordered feature set handed to the search.
//!
//! The core never looks inside a feature: it only sees the scores written into
//! the feature's range of the breakdown and the opaque [`FeatureState`] that
//! stateful features return for recombination.

use crate::error::{DecodeError, Result};
use crate::grammar::Sentence;
use crate::hypothesis::Hypothesis;
use crate::intern::SymbolId;
use crate::rule::{RuleApplication, TargetSymbol};
use crate::score::{ScoreBreakdown, Weights};
use rustc_hash::{FxHashMap, FxHashSet};

/// Opaque state of a stateful feature. Hypotheses whose states agree for every
/// stateful feature are indistinguishable to future scoring.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FeatureState(Box<[u32]>);

impl FeatureState {
    pub fn new(words: impl Into<Box<[u32]>>) -> Self {
        FeatureState(words.into())
    }

    pub fn empty() -> Self {
        FeatureState::default()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

/// What a feature may look at while scoring one rule application on top of
/// concrete children.
pub struct EvalContext<'a> {
    pub rule: &'a RuleApplication,
    /// One child per slot, in slot order.
    pub children: &'a [&'a Hypothesis],
    pub sentence: &'a Sentence,
    state_index: Option<usize>,
}

impl<'a> EvalContext<'a> {
    /// This feature's state in the child filling `slot`.
    ///
    /// Always `None` for stateless features.
    pub fn child_state(&self, slot: usize) -> Option<&'a FeatureState> {
        let index = self.state_index?;
        self.children.get(slot).map(|child| &child.states()[index])
    }

    /// Token used for a target symbol that is not a slot. Copied source words
    /// unknown to the grammar map to [`UNKNOWN_WORD`].
    pub fn word_token(&self, sym: &TargetSymbol) -> Option<u32> {
        match *sym {
            TargetSymbol::Word(w) => Some(w.as_u32()),
            TargetSymbol::Copy(pos) => Some(
                self.sentence
                    .id(pos)
                    .map(SymbolId::as_u32)
                    .unwrap_or(UNKNOWN_WORD),
            ),
            TargetSymbol::Slot(_) => None,
        }
    }
}

/// Token for target words that have no symbol ID.
pub const UNKNOWN_WORD: u32 = u32::MAX;

/// A scoring component.
pub trait FeatureFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Width of this feature's range in the breakdown.
    fn num_scores(&self) -> usize {
        1
    }

    /// Stateful features must return `Some` state from every evaluation.
    fn is_stateful(&self) -> bool {
        false
    }

    /// Score a rule application on top of its children. `scores` is this
    /// feature's range of the hypothesis-local breakdown, zeroed.
    fn evaluate(&self, ctx: &EvalContext<'_>, scores: &mut [f64]) -> Option<FeatureState>;
}

/// The ordered list of feature functions used for one search, together with
/// the weights that turn a breakdown into a total score.
///
/// Layout of a breakdown: `num_rule_scores` rule components, then each feature
/// in insertion order.
pub struct FeatureSet {
    num_rule_scores: usize,
    features: Vec<Box<dyn FeatureFunction>>,
    offsets: Vec<usize>,
    state_indices: Vec<Option<usize>>,
    num_stateful: usize,
    dims: usize,
    weights: Weights,
}

impl std::fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureSet")
            .field("num_rule_scores", &self.num_rule_scores)
            .field("features", &self.features.iter().map(|ff| ff.name()).collect::<Vec<_>>())
            .field("weights", &self.weights)
            .finish()
    }
}

impl FeatureSet {
    pub fn builder(num_rule_scores: usize) -> FeatureSetBuilder {
        FeatureSetBuilder {
            num_rule_scores,
            features: Vec::new(),
            weights: None,
        }
    }

    /// Only rule scores, uniformly weighted.
    pub fn rule_scores_only(num_rule_scores: usize) -> Self {
        FeatureSet {
            num_rule_scores,
            features: Vec::new(),
            offsets: Vec::new(),
            state_indices: Vec::new(),
            num_stateful: 0,
            dims: num_rule_scores,
            weights: Weights::uniform(num_rule_scores),
        }
    }

    pub fn num_rule_scores(&self) -> usize {
        self.num_rule_scores
    }

    /// Total breakdown width.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn num_stateful(&self) -> usize {
        self.num_stateful
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Label of every breakdown component, for diagnostics.
    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = (0..self.num_rule_scores).map(|i| format!("rule{}", i)).collect();
        for ff in &self.features {
            if ff.num_scores() == 1 {
                names.push(ff.name().to_string());
            } else {
                names.extend((0..ff.num_scores()).map(|i| format!("{}{}", ff.name(), i)));
            }
        }
        names
    }

    /// Compute the hypothesis-local breakdown (rule scores plus every feature's
    /// transition delta) and the stateful features' new states.
    pub fn evaluate(
        &self,
        rule: &RuleApplication,
        children: &[&Hypothesis],
        sentence: &Sentence,
    ) -> (ScoreBreakdown, Box<[FeatureState]>) {
        assert_eq!(
            rule.scores.len(),
            self.num_rule_scores,
            "rule {} carries {} scores, feature set expects {}",
            rule.rule_id,
            rule.scores.len(),
            self.num_rule_scores
        );

        let mut local = ScoreBreakdown::zeros(self.dims);
        local.as_mut_slice()[..self.num_rule_scores].copy_from_slice(&rule.scores);

        let mut states = vec![FeatureState::empty(); self.num_stateful];
        for (i, ff) in self.features.iter().enumerate() {
            let ctx = EvalContext {
                rule,
                children,
                sentence,
                state_index: self.state_indices[i],
            };
            let start = self.offsets[i];
            let range = &mut local.as_mut_slice()[start..start + ff.num_scores()];
            let state = ff.evaluate(&ctx, range);
            if let Some(index) = self.state_indices[i] {
                states[index] = state.unwrap_or_else(|| panic!("stateful feature {} returned no state", ff.name()));
            }
        }

        (local, states.into_boxed_slice())
    }
}

/// Builder for [`FeatureSet`].
pub struct FeatureSetBuilder {
    num_rule_scores: usize,
    features: Vec<Box<dyn FeatureFunction>>,
    weights: Option<Vec<f64>>,
}

impl FeatureSetBuilder {
    pub fn feature(mut self, ff: impl FeatureFunction + 'static) -> Self {
        self.features.push(Box::new(ff));
        self
    }

    /// Weights for the whole layout. Defaults to all ones.
    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn build(self) -> Result<FeatureSet> {
        let mut offsets = Vec::with_capacity(self.features.len());
        let mut state_indices = Vec::with_capacity(self.features.len());
        let mut dims = self.num_rule_scores;
        let mut num_stateful = 0;
        for ff in &self.features {
            offsets.push(dims);
            dims += ff.num_scores();
            if ff.is_stateful() {
                state_indices.push(Some(num_stateful));
                num_stateful += 1;
            } else {
                state_indices.push(None);
            }
        }

        let weights = match self.weights {
            Some(w) if w.len() != dims => {
                return Err(DecodeError::config(format!(
                    "{} weights given for {} score components",
                    w.len(),
                    dims
                )))
            }
            Some(w) => Weights::new(w),
            None => Weights::uniform(dims),
        };

        Ok(FeatureSet {
            num_rule_scores: self.num_rule_scores,
            features: self.features,
            offsets,
            state_indices,
            num_stateful,
            dims,
            weights,
        })
    }
}

/// Stateless penalty of -1 per target word a rule emits.
#[derive(Debug, Clone, Default)]
pub struct WordPenalty;

impl FeatureFunction for WordPenalty {
    fn name(&self) -> &str {
        "WordPenalty"
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, scores: &mut [f64]) -> Option<FeatureState> {
        scores[0] = -(ctx.rule.target_word_count() as f64);
        None
    }
}

/// A bigram model over target words.
///
/// Bigrams inside a child's yield were scored when the child was built; a
/// parent only scores the junctions its rule creates. The state is therefore
/// the leftmost and rightmost target word of the yield, which is what makes
/// two hypotheses interchangeable for every larger span.
#[derive(Debug, Clone)]
pub struct BoundaryBigram {
    bigrams: FxHashMap<(u32, u32), f64>,
    forbidden: FxHashSet<(u32, u32)>,
    backoff: f64,
}

impl BoundaryBigram {
    /// `backoff` scores every bigram not in the table.
    pub fn new(backoff: f64) -> Self {
        BoundaryBigram {
            bigrams: FxHashMap::default(),
            forbidden: FxHashSet::default(),
            backoff,
        }
    }

    pub fn with_bigram(mut self, left: SymbolId, right: SymbolId, score: f64) -> Self {
        self.bigrams.insert((left.as_u32(), right.as_u32()), score);
        self
    }

    /// Make a bigram impossible: any yield containing it scores -inf.
    pub fn forbid(mut self, left: SymbolId, right: SymbolId) -> Self {
        self.forbidden.insert((left.as_u32(), right.as_u32()));
        self
    }

    fn score(&self, left: u32, right: u32) -> f64 {
        if self.forbidden.contains(&(left, right)) {
            return f64::NEG_INFINITY;
        }
        self.bigrams.get(&(left, right)).copied().unwrap_or(self.backoff)
    }
}

impl FeatureFunction for BoundaryBigram {
    fn name(&self) -> &str {
        "BoundaryBigram"
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, scores: &mut [f64]) -> Option<FeatureState> {
        let mut first: Option<u32> = None;
        let mut last: Option<u32> = None;
        let mut total = 0.0;

        for sym in &ctx.rule.target {
            let (left, right) = match *sym {
                TargetSymbol::Slot(i) => match ctx.child_state(i).map(FeatureState::as_slice) {
                    Some([l, r]) => (*l, *r),
                    // empty yield
                    _ => continue,
                },
                _ => match ctx.word_token(sym) {
                    Some(w) => (w, w),
                    None => continue,
                },
            };
            if let Some(prev) = last {
                total += self.score(prev, left);
            }
            first.get_or_insert(left);
            last = Some(right);
        }

        scores[0] = total;
        Some(match (first, last) {
            (Some(l), Some(r)) => FeatureState::new(vec![l, r]),
            _ => FeatureState::empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::SynchronousGrammar;
    use crate::hypothesis::{HypothesisArena, HypothesisDraft};
    use crate::rule::{Label, Slot};
    use crate::span::Span;
    use std::sync::Arc;

    struct Fixture {
        grammar: SynchronousGrammar,
        x: Label,
        a: SymbolId,
        b: SymbolId,
        c: SymbolId,
    }

    fn fixture() -> Fixture {
        let mut grammar = SynchronousGrammar::new(1);
        let x = grammar.label("X");
        let a = grammar.word("a");
        let b = grammar.word("b");
        let c = grammar.word("c");
        Fixture { grammar, x, a, b, c }
    }

    fn leaf(f: &Fixture, pos: usize, word: SymbolId) -> Arc<RuleApplication> {
        Arc::new(
            RuleApplication::new(0, Span::word(pos), f.x, vec![], vec![TargetSymbol::Word(word)], vec![0.0]).unwrap(),
        )
    }

    #[test]
    fn test_layout_and_names() {
        let features = FeatureSet::builder(2)
            .feature(WordPenalty)
            .feature(BoundaryBigram::new(-1.0))
            .build()
            .unwrap();

        assert_eq!(features.dims(), 4);
        assert_eq!(features.num_stateful(), 1);
        assert_eq!(
            features.component_names(),
            vec!["rule0", "rule1", "WordPenalty", "BoundaryBigram"]
        );
    }

    #[test]
    fn test_weight_length_checked() {
        let err = FeatureSet::builder(1).feature(WordPenalty).weights(vec![1.0]).build();
        assert!(matches!(err, Err(DecodeError::Config(_))));
    }

    #[test]
    fn test_word_penalty() {
        let f = fixture();
        let features = FeatureSet::builder(1).feature(WordPenalty).build().unwrap();
        let sentence = f.grammar.sentence(&["a"]);
        let rule = leaf(&f, 0, f.a);

        let (local, states) = features.evaluate(&rule, &[], &sentence);
        assert_eq!(local.as_slice(), &[0.0, -1.0]);
        assert!(states.is_empty());
    }

    #[test]
    fn test_bigram_scores_junctions_only() {
        let f = fixture();
        let features = FeatureSet::builder(1)
            .feature(
                BoundaryBigram::new(-10.0)
                    .with_bigram(f.a, f.b, -1.0)
                    .with_bigram(f.b, f.c, -2.0),
            )
            .build()
            .unwrap();
        let sentence = f.grammar.sentence(&["a", "b", "c"]);
        let mut arena = HypothesisArena::new();

        let children: Vec<_> = [(0, f.a), (1, f.b)]
            .iter()
            .map(|&(pos, w)| {
                let draft = HypothesisDraft::build(leaf(&f, pos, w), vec![], &arena, &features, &sentence);
                arena.insert(draft)
            })
            .collect();

        // X -> [X,1] [X,2] c  over "a b c"
        let parent = Arc::new(
            RuleApplication::new(
                1,
                Span::new(0, 2),
                f.x,
                vec![
                    Slot { span: Span::word(0), label: f.x },
                    Slot { span: Span::word(1), label: f.x },
                ],
                vec![TargetSymbol::Slot(0), TargetSymbol::Slot(1), TargetSymbol::Word(f.c)],
                vec![0.0],
            )
            .unwrap(),
        );
        let draft = HypothesisDraft::build(parent, children, &arena, &features, &sentence);
        let id = arena.insert(draft);
        let hypo = &arena[id];

        assert!((hypo.local_breakdown()[1] - (-3.0)).abs() < 1e-12);
        assert!((hypo.total_score() - (-3.0)).abs() < 1e-12);
        assert_eq!(hypo.states()[0].as_slice(), &[f.a.as_u32(), f.c.as_u32()]);
    }

    #[test]
    fn test_forbidden_bigram_is_negative_infinity() {
        let f = fixture();
        let features = FeatureSet::builder(1)
            .feature(BoundaryBigram::new(0.0).forbid(f.a, f.b))
            .build()
            .unwrap();
        let sentence = f.grammar.sentence(&["a"]);
        let rule = Arc::new(
            RuleApplication::new(
                0,
                Span::word(0),
                f.x,
                vec![],
                vec![TargetSymbol::Word(f.a), TargetSymbol::Word(f.b)],
                vec![0.0],
            )
            .unwrap(),
        );

        let (local, _) = features.evaluate(&rule, &[], &sentence);
        assert_eq!(local[1], f64::NEG_INFINITY);
    }

    #[test]
    fn test_copy_of_unknown_word_uses_unknown_token() {
        let f = fixture();
        let features = FeatureSet::builder(1)
            .feature(BoundaryBigram::new(-1.0))
            .build()
            .unwrap();
        let sentence = f.grammar.sentence(&["zzz"]);
        let rule = Arc::new(
            RuleApplication::new(0, Span::word(0), f.x, vec![], vec![TargetSymbol::Copy(0)], vec![0.0]).unwrap(),
        );

        let (_, states) = features.evaluate(&rule, &[], &sentence);
        assert_eq!(states[0].as_slice(), &[UNKNOWN_WORD, UNKNOWN_WORD]);
    }
}
