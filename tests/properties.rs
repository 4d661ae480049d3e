use chart_decoder::{
    parse_rules_into, ChartManager, CubePruning, FeatureSet, HypothesisArena, HypothesisDraft, RuleApplication,
    SearchConfig, SpanBeam, SynchronousGrammar, TargetSymbol,
};
use proptest::prelude::*;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Half-integer scores, so ties are common and sums are exact.
fn score() -> impl Strategy<Value = f64> {
    (-40i32..=10).prop_map(|x| x as f64 / 2.0)
}

proptest! {
    #[test]
    fn prop_finalized_beam_invariants(
        offers in prop::collection::vec((0usize..4, score()), 1..60),
        beam_width in (0u32..20).prop_map(|w| w as f64 / 2.0),
        max_size in 0usize..6,
    ) {
        let mut grammar = SynchronousGrammar::new(1);
        let labels: Vec<_> = ["A", "B", "C", "D"].iter().map(|l| grammar.label(l)).collect();
        let w = grammar.word("w");
        let sentence = grammar.sentence(&["x", "y"]);
        let features = FeatureSet::rule_scores_only(1);
        let span = sentence.full_span().unwrap();

        let mut arena = HypothesisArena::new();
        let mut beam = SpanBeam::new(span, beam_width, max_size, true);
        for (label, s) in &offers {
            let rule = RuleApplication::new(0, span, labels[*label], vec![], vec![TargetSymbol::Word(w)], vec![*s])
                .unwrap();
            let draft = HypothesisDraft::build(Arc::new(rule), vec![], &arena, &features, &sentence);
            beam.admit(draft, &mut arena).unwrap();
        }
        beam.sort_and_finalize(&mut arena);
        let sorted = beam.sorted().unwrap().to_vec();
        let scores: Vec<f64> = sorted.iter().map(|&id| arena[id].total_score()).collect();

        let best = offers.iter().map(|&(_, s)| s).fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(scores[0], best);
        prop_assert!(scores.windows(2).all(|p| p[0] >= p[1]));
        prop_assert!(scores.iter().all(|&s| s >= best - beam_width));
        if max_size > 0 && scores.len() > max_size {
            let cut = scores[max_size - 1];
            prop_assert!(scores[max_size..].iter().all(|&s| s == cut));
        }

        // one representative per key, every arc scoring no better than it
        let mut keys = FxHashSet::default();
        for &id in &sorted {
            let hypo = &arena[id];
            prop_assert!(keys.insert(hypo.recombination_key()));
            prop_assert!(hypo.is_winner());
            for &arc in hypo.arcs() {
                prop_assert!(arena[arc].total_score() <= hypo.total_score());
                prop_assert_eq!(arena[arc].winner(), Some(id));
            }
        }

        // finalizing again changes nothing
        beam.sort_and_finalize(&mut arena);
        prop_assert_eq!(beam.sorted().unwrap(), &sorted[..]);
    }

    #[test]
    fn prop_kbest_monotone_and_prefix_stable(
        lexical in prop::collection::vec(score(), 6),
        straight in score(),
        inverted in score(),
        k in 1usize..15,
    ) {
        let mut g = SynchronousGrammar::new(1);
        let x = g.label("X");
        for (i, s) in lexical.iter().enumerate() {
            let source = ["a", "b", "c"][i / 2];
            let target = format!("{}{}", source.to_uppercase(), i % 2);
            g.add_lexical(x, &[source], &[target.as_str()], vec![*s]).unwrap();
        }
        let binary = format!(
            "[X] ||| [X,1] [X,2] ||| [X,1] [X,2] ||| {}\n[X] ||| [X,1] [X,2] ||| [X,2] [X,1] ||| {}\n",
            straight, inverted
        );
        parse_rules_into(&mut g, &binary).unwrap();

        let features = FeatureSet::rule_scores_only(1);
        let config = SearchConfig::default().with_beam_width(1000.0).with_nbest(k + 1, false);
        let mut m = ChartManager::new(&g, &CubePruning, &features, config).unwrap();
        m.decode(g.tokenize("a b c")).unwrap();

        let best = m.best_hypothesis().unwrap().unwrap();
        let shorter_list = m.extract_kbest(k).unwrap();
        let longer_list = m.extract_kbest(k + 1).unwrap();
        let shorter = shorter_list.scores();
        let longer = longer_list.scores();

        prop_assert_eq!(shorter[0], m.arena()[best].total_score());
        prop_assert!(longer.windows(2).all(|p| p[0] >= p[1]));
        prop_assert!(shorter.len() <= k);
        prop_assert_eq!(&longer[..shorter.len()], &shorter[..]);
        for (a, b) in shorter_list.iter().zip(longer_list.iter()) {
            prop_assert_eq!(a.hypothesis(), b.hypothesis());
            prop_assert_eq!(a.back_pointers(), b.back_pointers());
        }
    }
}
