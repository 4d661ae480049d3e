//! Turning hypotheses and derivations into target strings.
//!
//! The breakdown of a translation is accumulated from each node's local
//! breakdown while walking the tree, so every rule application is counted once.

use crate::grammar::Sentence;
use crate::hypothesis::{HypoId, HypothesisArena};
use crate::intern::SymbolTable;
use crate::kbest::{DerivationId, KBestList};
use crate::rule::TargetSymbol;
use crate::score::{ScoreBreakdown, Weights};
use std::fmt;

/// A materialized translation, independent of the search state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Translation {
    pub words: Vec<String>,
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_breakdown"))]
    pub breakdown: ScoreBreakdown,
    pub score: f64,
}

#[cfg(feature = "serde")]
fn serialize_breakdown<S: serde::Serializer>(b: &ScoreBreakdown, s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(b.as_slice())
}

impl Translation {
    /// The target words joined by spaces.
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ||| {} ||| {}", self.text(), self.breakdown, self.score)
    }
}

/// Everything needed to spell out target words.
pub struct Materializer<'a> {
    pub arena: &'a HypothesisArena,
    pub symbols: &'a SymbolTable,
    pub sentence: &'a Sentence,
    pub weights: &'a Weights,
}

impl<'a> Materializer<'a> {
    /// Follow a hypothesis and the children it was built from.
    pub fn hypothesis(&self, id: HypoId) -> Translation {
        let mut words = Vec::new();
        let mut breakdown = ScoreBreakdown::zeros(self.weights.len());
        self.walk_hypothesis(id, &mut words, &mut breakdown);
        self.finish(words, breakdown)
    }

    /// Follow a derivation and its chosen sub-derivations.
    pub fn derivation(&self, list: &KBestList, id: DerivationId) -> Translation {
        let mut words = Vec::new();
        let mut breakdown = ScoreBreakdown::zeros(self.weights.len());
        self.walk_derivation(list, id, &mut words, &mut breakdown);
        self.finish(words, breakdown)
    }

    fn finish(&self, words: Vec<String>, breakdown: ScoreBreakdown) -> Translation {
        Translation {
            score: breakdown.weighted(self.weights),
            words,
            breakdown,
        }
    }

    fn walk_hypothesis(&self, id: HypoId, words: &mut Vec<String>, breakdown: &mut ScoreBreakdown) {
        self.walk(id, words, breakdown, &mut |this, slot, words, breakdown| {
            let child = this.arena[id].children()[slot];
            this.walk_hypothesis(child, words, breakdown);
        });
    }

    fn walk_derivation(&self, list: &KBestList, id: DerivationId, words: &mut Vec<String>, breakdown: &mut ScoreBreakdown) {
        let derivation = list.derivation(id);
        self.walk(derivation.hypothesis(), words, breakdown, &mut |this, slot, words, breakdown| {
            this.walk_derivation(list, derivation.subderivations()[slot], words, breakdown);
        });
    }

    /// Emit the rule of `id`, delegating each slot to `slot_fn`.
    fn walk(
        &self,
        id: HypoId,
        words: &mut Vec<String>,
        breakdown: &mut ScoreBreakdown,
        slot_fn: &mut dyn FnMut(&Self, usize, &mut Vec<String>, &mut ScoreBreakdown),
    ) {
        let hypo = &self.arena[id];
        breakdown.plus_equals(hypo.local_breakdown());
        for sym in &hypo.rule().target {
            match *sym {
                TargetSymbol::Word(w) => words.push(self.symbols.resolve(w).to_string()),
                TargetSymbol::Copy(pos) => words.push(self.sentence.token(pos).to_string()),
                TargetSymbol::Slot(slot) => slot_fn(self, slot, words, breakdown),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beam::SpanBeam;
    use crate::feature::{FeatureSet, WordPenalty};
    use crate::grammar::{GrammarMatcher, SynchronousGrammar};
    use crate::hypothesis::HypothesisDraft;
    use crate::kbest::KBestExtractor;
    use crate::span::Span;
    use rustc_hash::FxHashMap;

    /// "das haus" -> "the house" with a monotone rule on top.
    fn decode_by_hand() -> (SynchronousGrammar, Sentence, FeatureSet, HypothesisArena, Vec<HypoId>) {
        let mut g = SynchronousGrammar::new(1);
        let x = g.label("X");
        g.add_lexical(x, &["das"], &["the"], vec![-1.0]).unwrap();
        g.add_lexical(x, &["haus"], &["house"], vec![-2.0]).unwrap();
        g.add_lexical(x, &["haus"], &["home"], vec![-2.5]).unwrap();
        let text = "[X] ||| [X,1] [X,2] ||| [X,1] [X,2] ||| -0.5";
        crate::parser::parse_rules_into(&mut g, text).unwrap();

        let features = FeatureSet::builder(1).feature(WordPenalty).build().unwrap();
        let sentence = g.tokenize("das haus");
        let mut arena = HypothesisArena::new();
        let mut best: FxHashMap<Span, Vec<HypoId>> = FxHashMap::default();
        for span in Span::all(2) {
            let mut beam = SpanBeam::new(span, 100.0, 0, true);
            for rule in g.match_span(&sentence, span) {
                let children = rule.slots.iter().map(|slot| best[&slot.span][0]).collect();
                let draft = HypothesisDraft::build(rule, children, &arena, &features, &sentence);
                beam.admit(draft, &mut arena).unwrap();
            }
            beam.sort_and_finalize(&mut arena);
            best.insert(span, beam.sorted().unwrap().to_vec());
        }
        let goal = best.remove(&Span::new(0, 1)).unwrap();
        (g, sentence, features, arena, goal)
    }

    #[test]
    fn test_hypothesis_translation() {
        let (g, sentence, features, arena, goal) = decode_by_hand();
        let m = Materializer {
            arena: &arena,
            symbols: g.symbols(),
            sentence: &sentence,
            weights: features.weights(),
        };
        let t = m.hypothesis(goal[0]);
        assert_eq!(t.text(), "the house");
        assert_eq!(t.breakdown.as_slice(), &[-3.5, -2.0]);
        assert!((t.score - arena[goal[0]].total_score()).abs() < 1e-9);
        assert_eq!(t.to_string(), "the house ||| -3.5 -2 ||| -5.5");
    }

    #[test]
    fn test_derivation_translation_counts_each_rule_once() {
        let (g, sentence, features, arena, goal) = decode_by_hand();
        let m = Materializer {
            arena: &arena,
            symbols: g.symbols(),
            sentence: &sentence,
            weights: features.weights(),
        };
        let list = KBestExtractor::new(&arena).extract(&goal, 5);
        assert_eq!(list.len(), 2);

        let second = m.derivation(&list, list.ranked()[1]);
        assert_eq!(second.words, vec!["the", "home"]);
        let derivation = list.get(1).unwrap();
        assert!(second.breakdown.approx_eq(derivation.breakdown()));
        assert!((second.score - derivation.score()).abs() < 1e-9);
    }

    #[test]
    fn test_copy_emits_source_token() {
        let mut g = SynchronousGrammar::new(1);
        let x = g.label("X");
        g.enable_passthrough(x, vec![-10.0]).unwrap();
        let features = FeatureSet::rule_scores_only(1);
        let sentence = g.tokenize("zzz");
        let mut arena = HypothesisArena::new();
        let rule = g.match_span(&sentence, Span::word(0)).remove(0);
        let draft = HypothesisDraft::build(rule, vec![], &arena, &features, &sentence);
        let id = arena.insert(draft);

        let m = Materializer {
            arena: &arena,
            symbols: g.symbols(),
            sentence: &sentence,
            weights: features.weights(),
        };
        let t = m.hypothesis(id);
        assert_eq!(t.words, vec!["zzz"]);
        assert_eq!(t.score, -10.0);
    }
}
