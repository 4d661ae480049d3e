//! The search controller: fills the span table bottom-up and hands out the
//! results.
//!
//! A [`ChartManager`] decodes exactly one sentence. It moves through
//! [`SearchState::Empty`], [`SearchState::Filling`] and
//! [`SearchState::Complete`]; result accessors fail with
//! [`DecodeError::InvalidState`] before the table is complete.

use crate::beam::BeamStats;
use crate::chart::Chart;
use crate::error::{DecodeError, Result};
use crate::feature::FeatureSet;
use crate::grammar::{GrammarMatcher, Sentence, PASSTHROUGH_RULE};
use crate::hypothesis::{HypoId, HypothesisArena};
use crate::kbest::{KBestExtractor, KBestList};
use crate::output::{Materializer, Translation};
use crate::populator::CellPopulator;
use crate::search_graph::SearchGraph;
use crate::span::Span;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::io::Write;
use std::time::{Duration, Instant};

/// N-best list settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NBestConfig {
    /// Number of translations wanted (0 or 1 = just the best).
    pub size: usize,
    /// Drop derivations whose target words repeat an earlier entry.
    pub only_distinct: bool,
    /// With `only_distinct`, how many derivations to extract per wanted
    /// translation (0 = 1000).
    pub factor: usize,
}

impl Default for NBestConfig {
    fn default() -> Self {
        NBestConfig {
            size: 0,
            only_distinct: false,
            factor: 20,
        }
    }
}

/// Search settings for one sentence.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SearchConfig {
    /// Hypotheses scoring more than this below the best of their span are
    /// discarded.
    pub beam_width: f64,
    /// Histogram limit per span (0 = unlimited).
    pub max_stack_size: usize,
    /// Maximum number of candidates pulled from the populator per span.
    pub pop_limit: usize,
    /// Wall-clock budget for one sentence.
    #[cfg_attr(feature = "serde", serde(with = "deadline_ms"))]
    pub deadline: Option<Duration>,
    pub nbest: NBestConfig,
    /// Keep recombination arcs for a search graph dump.
    pub search_graph: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            beam_width: -(1e-5f64).ln(),
            max_stack_size: 100,
            pop_limit: 1000,
            deadline: None,
            nbest: NBestConfig::default(),
            search_graph: false,
        }
    }
}

impl SearchConfig {
    pub fn with_beam_width(mut self, beam_width: f64) -> Self {
        self.beam_width = beam_width;
        self
    }

    pub fn with_max_stack_size(mut self, n: usize) -> Self {
        self.max_stack_size = n;
        self
    }

    pub fn with_pop_limit(mut self, n: usize) -> Self {
        self.pop_limit = n;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_nbest(mut self, size: usize, only_distinct: bool) -> Self {
        self.nbest.size = size;
        self.nbest.only_distinct = only_distinct;
        self
    }

    pub fn with_search_graph(mut self, enabled: bool) -> Self {
        self.search_graph = enabled;
        self
    }

    /// Whether beams must retain recombined hypotheses.
    pub fn keep_arcs(&self) -> bool {
        self.nbest.size > 1 || self.search_graph
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_width.is_nan() || self.beam_width < 0.0 {
            return Err(DecodeError::config(format!(
                "beam width must be a non-negative number, got {}",
                self.beam_width
            )));
        }
        if self.pop_limit == 0 {
            return Err(DecodeError::config("pop limit must be positive"));
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
mod deadline_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(deadline: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match deadline {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Empty,
    Filling,
    Complete,
}

/// Statistics about decoding one sentence.
#[derive(Debug, Clone, Default)]
pub struct SentenceStats {
    /// Hypotheses given an arena ID.
    pub created: usize,
    pub beams: BeamStats,
    pub spans_filled: usize,
    pub candidates_popped: usize,
    /// Source words no grammar rule covers on their own, in sentence order.
    /// They are translated only if pass-through is enabled.
    pub unknown_words: Vec<String>,
    pub decode_time: Duration,
}

/// How a decode ended. Neither field is an error: an empty goal beam means
/// no translation, and `partial` means the deadline cut the search short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOutcome {
    pub best: Option<HypoId>,
    pub partial: bool,
}

impl DecodeOutcome {
    pub fn is_translated(&self) -> bool {
        self.best.is_some()
    }
}

/// Decodes one sentence with injected grammar, populator and features.
pub struct ChartManager<'a> {
    grammar: &'a dyn GrammarMatcher,
    populator: &'a dyn CellPopulator,
    features: &'a FeatureSet,
    config: SearchConfig,
    state: SearchState,
    sentence: Sentence,
    chart: Chart,
    arena: HypothesisArena,
    stats: SentenceStats,
    outcome: DecodeOutcome,
}

impl<'a> ChartManager<'a> {
    pub fn new(
        grammar: &'a dyn GrammarMatcher,
        populator: &'a dyn CellPopulator,
        features: &'a FeatureSet,
        config: SearchConfig,
    ) -> Result<Self> {
        config.validate()?;
        if features.num_rule_scores() != grammar.num_rule_scores() {
            return Err(DecodeError::config(format!(
                "grammar produces {} rule scores but the feature set expects {}",
                grammar.num_rule_scores(),
                features.num_rule_scores()
            )));
        }
        Ok(ChartManager {
            grammar,
            populator,
            features,
            chart: Chart::new(0, config.beam_width, config.max_stack_size, config.keep_arcs()),
            config,
            state: SearchState::Empty,
            sentence: Sentence::new(Vec::new(), grammar.symbols()),
            arena: HypothesisArena::new(),
            stats: SentenceStats::default(),
            outcome: DecodeOutcome::default(),
        })
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn stats(&self) -> &SentenceStats {
        &self.stats
    }

    pub fn sentence(&self) -> &Sentence {
        &self.sentence
    }

    pub fn arena(&self) -> &HypothesisArena {
        &self.arena
    }

    /// Run the CYK+ search over every span, narrowest first.
    pub fn decode(&mut self, sentence: Sentence) -> Result<DecodeOutcome> {
        if self.state != SearchState::Empty {
            return Err(DecodeError::invalid_state(
                "a chart manager decodes a single sentence",
            ));
        }
        let started = Instant::now();
        let deadline = self.config.deadline.map(|d| started + d);
        log::info!("decoding {} words: {}", sentence.len(), sentence.tokens().join(" "));

        self.state = SearchState::Filling;
        self.sentence = sentence;
        self.chart = Chart::new(
            self.sentence.len(),
            self.config.beam_width,
            self.config.max_stack_size,
            self.config.keep_arcs(),
        );

        let sentence = &self.sentence;
        let chart = &mut self.chart;
        let arena = &mut self.arena;
        let spans: Vec<Span> = Span::all(sentence.len()).collect();
        let mut partial = false;

        for (i, &span) in spans.iter().enumerate() {
            let rules = self.grammar.match_span(sentence, span);
            if span.width() == 1 && rules.iter().all(|r| r.rule_id == PASSTHROUGH_RULE) {
                self.stats.unknown_words.push(sentence.token(span.start).to_string());
            }
            let mut stream = self
                .populator
                .expand(span, &rules, chart, arena, self.features, sentence)?;

            let mut pops = 0;
            while pops < self.config.pop_limit {
                let Some(draft) = stream.next_candidate(arena) else {
                    break;
                };
                pops += 1;
                chart.beam_mut(span)?.admit(draft, arena)?;
            }
            drop(stream);
            chart.beam_mut(span)?.sort_and_finalize(arena);
            self.stats.spans_filled += 1;
            self.stats.candidates_popped += pops;

            if let Some(deadline) = deadline {
                if i + 1 < spans.len() && Instant::now() >= deadline {
                    log::warn!(
                        "deadline reached after {} of {} spans, returning a partial result",
                        i + 1,
                        spans.len()
                    );
                    partial = true;
                    break;
                }
            }
        }

        let best = match chart.goal_span() {
            Some(goal) if chart.beam(goal)?.is_finalized() => chart.beam(goal)?.best()?,
            _ => None,
        };

        self.stats.created = arena.created();
        self.stats.beams = chart.stats();
        self.stats.decode_time = started.elapsed();
        if !self.stats.unknown_words.is_empty() {
            log::info!("unknown words: {}", self.stats.unknown_words.join(" "));
        }
        log::debug!("chart occupancy:\n{}", chart.occupancy());
        match best {
            Some(id) => log::info!(
                "best score {} in {:?}",
                arena[id].total_score(),
                self.stats.decode_time
            ),
            None => log::info!("no translation found in {:?}", self.stats.decode_time),
        }

        self.state = SearchState::Complete;
        self.outcome = DecodeOutcome { best, partial };
        Ok(self.outcome)
    }

    fn require_complete(&self) -> Result<()> {
        if self.state != SearchState::Complete {
            return Err(DecodeError::invalid_state(format!(
                "results requested while the search is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    pub fn outcome(&self) -> Result<DecodeOutcome> {
        self.require_complete()?;
        Ok(self.outcome)
    }

    pub fn chart(&self) -> Result<&Chart> {
        self.require_complete()?;
        Ok(&self.chart)
    }

    /// The finalized goal hypotheses, best first. Empty if there is no
    /// translation or the deadline stopped the search before the goal span.
    pub fn goal_hypotheses(&self) -> Result<&[HypoId]> {
        self.require_complete()?;
        match self.chart.goal_span() {
            Some(goal) if self.chart.beam(goal)?.is_finalized() => self.chart.goal(),
            _ => Ok(&[]),
        }
    }

    /// The top goal hypothesis, which together with its children is the best
    /// derivation.
    pub fn best_hypothesis(&self) -> Result<Option<HypoId>> {
        self.require_complete()?;
        Ok(self.outcome.best)
    }

    fn materializer(&self) -> Materializer<'_> {
        Materializer {
            arena: &self.arena,
            symbols: self.grammar.symbols(),
            sentence: &self.sentence,
            weights: self.features.weights(),
        }
    }

    pub fn best_translation(&self) -> Result<Option<Translation>> {
        Ok(self.best_hypothesis()?.map(|id| self.materializer().hypothesis(id)))
    }

    /// The `k` best derivations, best first.
    ///
    /// Without retained recombination arcs only the best derivation can be
    /// recovered, so at most one is returned.
    pub fn extract_kbest(&self, k: usize) -> Result<KBestList> {
        let goal = self.goal_hypotheses()?;
        let k = if k > 1 && !self.config.keep_arcs() {
            log::warn!("{}-best list requested but recombination arcs were not kept", k);
            1
        } else {
            k
        };
        Ok(KBestExtractor::new(&self.arena).extract(goal, k))
    }

    /// Materialize one entry of a k-best list.
    pub fn translation(&self, list: &KBestList, rank: usize) -> Option<Translation> {
        list.ranked()
            .get(rank)
            .map(|&id| self.materializer().derivation(list, id))
    }

    /// The configured n-best list of translations.
    pub fn nbest(&self) -> Result<Vec<Translation>> {
        let n = self.config.nbest.size.max(1);
        if !self.config.nbest.only_distinct {
            let list = self.extract_kbest(n)?;
            let m = self.materializer();
            return Ok(list.ranked().iter().map(|&id| m.derivation(&list, id)).collect());
        }
        self.extract_distinct(n)
    }

    /// The best `n` derivations with pairwise different target words.
    pub fn extract_distinct(&self, n: usize) -> Result<Vec<Translation>> {
        let factor = match self.config.nbest.factor {
            0 => 1000,
            f => f,
        };
        let list = self.extract_kbest(n.saturating_mul(factor))?;
        let m = self.materializer();
        let mut seen: FxHashSet<Vec<String>> = FxHashSet::default();
        let mut out = Vec::with_capacity(n);
        for &id in list.ranked() {
            let translation = m.derivation(&list, id);
            if seen.insert(translation.words.clone()) {
                out.push(translation);
                if out.len() == n {
                    break;
                }
            }
        }
        log::debug!("{} distinct translations from {} derivations", out.len(), list.len());
        Ok(out)
    }

    /// Everything reachable from the goal through children and arcs.
    pub fn search_graph(&self) -> Result<SearchGraph> {
        let goal = self.goal_hypotheses()?;
        if !self.config.keep_arcs() {
            log::warn!("search graph requested without retained arcs; only winners are reachable");
        }
        Ok(SearchGraph::reachable(&self.arena, goal))
    }

    pub fn write_search_graph<W: Write>(&self, out: &mut W) -> Result<()> {
        self.search_graph()?
            .write(out, &self.arena, self.grammar.symbols(), &self.sentence)
    }
}

/// Result of decoding one sentence of a batch.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// The n-best list; empty when there is no translation.
    pub translations: Vec<Translation>,
    pub stats: SentenceStats,
    pub partial: bool,
}

/// Decode independent sentences in parallel. Results are in input order.
pub fn decode_batch(
    sentences: &[Sentence],
    grammar: &dyn GrammarMatcher,
    populator: &dyn CellPopulator,
    features: &FeatureSet,
    config: &SearchConfig,
) -> Result<Vec<BatchOutput>> {
    config.validate()?;
    sentences
        .par_iter()
        .map(|sentence| {
            let mut manager = ChartManager::new(grammar, populator, features, config.clone())?;
            let outcome = manager.decode(sentence.clone())?;
            let translations = if outcome.is_translated() {
                manager.nbest()?
            } else {
                Vec::new()
            };
            Ok(BatchOutput {
                translations,
                stats: manager.stats.clone(),
                partial: outcome.partial,
            })
        })
        .collect()
}
