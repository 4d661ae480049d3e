//! Chart decoding for synchronous-grammar translation.
//!
//! This crate provides:
//! - Span beams that admit, recombine and prune derivation hypotheses
//! - A CYK+ controller that fills the span table narrowest span first
//! - Cube pruning as the default cell populator
//! - Lazy k-best extraction over the recombination hypergraph
//! - Materialization of derivations into target words and score breakdowns
//! - An in-memory synchronous grammar with a small text format
//!
//! # Example
//!
//! ```rust
//! use chart_decoder::{parse_grammar, ChartManager, CubePruning, FeatureSet, SearchConfig, WordPenalty};
//!
//! let grammar = parse_grammar(r#"
//!     [X] ||| das ||| the ||| -1
//!     [X] ||| haus ||| house ||| -1
//!     [X] ||| [X,1] [X,2] ||| [X,1] [X,2] ||| 0
//! "#).unwrap();
//! let features = FeatureSet::builder(1).feature(WordPenalty).build().unwrap();
//!
//! let mut manager = ChartManager::new(&grammar, &CubePruning, &features, SearchConfig::default()).unwrap();
//! manager.decode(grammar.tokenize("das haus")).unwrap();
//!
//! let best = manager.best_translation().unwrap().unwrap();
//! assert_eq!(best.text(), "the house");
//! ```

pub mod beam;
pub mod chart;
pub mod error;
pub mod feature;
pub mod grammar;
pub mod hypothesis;
pub mod intern;
pub mod kbest;
pub mod manager;
pub mod output;
pub mod parser;
pub mod populator;
pub mod rule;
pub mod score;
pub mod search_graph;
pub mod span;

// Re-exports for convenience
pub use beam::{Admission, BeamStats, DiscardReason, SpanBeam};
pub use chart::Chart;
pub use error::{DecodeError, Result};
pub use feature::{BoundaryBigram, EvalContext, FeatureFunction, FeatureSet, FeatureState, WordPenalty};
pub use grammar::{GrammarMatcher, GrammarRule, Sentence, SourceSymbol, SynchronousGrammar};
pub use hypothesis::{HypoId, Hypothesis, HypothesisArena, HypothesisDraft, RecombinationKey};
pub use intern::{SymbolId, SymbolTable};
pub use kbest::{Derivation, DerivationId, KBestExtractor, KBestList};
pub use manager::{
    decode_batch, BatchOutput, ChartManager, DecodeOutcome, NBestConfig, SearchConfig, SearchState, SentenceStats,
};
pub use output::{Materializer, Translation};
pub use parser::{parse_grammar, parse_rules_into, ParseError};
pub use populator::{CandidateStream, CellPopulator, CubePruning};
pub use rule::{Label, RuleApplication, Slot, TargetSymbol};
pub use score::{ScoreBreakdown, Weights};
pub use search_graph::SearchGraph;
pub use span::{Pos, Span};
