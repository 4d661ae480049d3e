//! Sentences and grammar matching.
//!
//! The search only needs [`GrammarMatcher::match_span`]. [`SynchronousGrammar`]
//! is a small in-memory synchronous CFG implementing it: enough for tests,
//! benchmarks and toy systems, not a phrase-table backend.

use crate::error::{DecodeError, Result};
use crate::intern::{SymbolId, SymbolTable};
use crate::rule::{Label, RuleApplication, Slot, TargetSymbol};
use crate::span::{Pos, Span};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Rule ID carried by synthesized pass-through applications.
pub const PASSTHROUGH_RULE: usize = usize::MAX;

/// A tokenized source sentence, resolved against a grammar's symbol table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sentence {
    tokens: Vec<String>,
    ids: Vec<Option<SymbolId>>,
}

impl Sentence {
    pub fn new(tokens: Vec<String>, symbols: &SymbolTable) -> Self {
        let ids = tokens.iter().map(|t| symbols.get(t)).collect();
        Sentence { tokens, ids }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn token(&self, pos: Pos) -> &str {
        &self.tokens[pos]
    }

    /// Symbol ID of the token at `pos`, if the grammar knows it.
    pub fn id(&self, pos: Pos) -> Option<SymbolId> {
        self.ids.get(pos).copied().flatten()
    }

    /// The span covering the whole sentence.
    pub fn full_span(&self) -> Option<Span> {
        (!self.is_empty()).then(|| Span::new(0, self.len() - 1))
    }
}

/// Source of rule applications for a span.
pub trait GrammarMatcher: Sync {
    /// Width of the rule score vectors this grammar produces.
    fn num_rule_scores(&self) -> usize;

    /// Symbols used by the target sides of the produced rules.
    fn symbols(&self) -> &SymbolTable;

    /// Every rule application for `span`. Slot spans must be strictly smaller
    /// than `span` and must not overlap.
    fn match_span(&self, sentence: &Sentence, span: Span) -> Vec<Arc<RuleApplication>>;
}

/// One symbol of a rule's source side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceSymbol {
    Word(SymbolId),
    NonTerminal(Label),
}

/// A synchronous rule. `TargetSymbol::Slot(i)` refers to the `i`-th
/// non-terminal of the source side.
#[derive(Clone, Debug, PartialEq)]
pub struct GrammarRule {
    pub lhs: Label,
    pub source: Vec<SourceSymbol>,
    pub target: Vec<TargetSymbol>,
    pub scores: Vec<f64>,
}

impl GrammarRule {
    fn num_nonterminals(&self) -> usize {
        self.source
            .iter()
            .filter(|s| matches!(s, SourceSymbol::NonTerminal(_)))
            .count()
    }
}

/// An in-memory synchronous context-free grammar.
#[derive(Clone, Debug)]
pub struct SynchronousGrammar {
    symbols: SymbolTable,
    num_scores: usize,
    rules: Vec<GrammarRule>,
    by_first_word: FxHashMap<SymbolId, Vec<usize>>,
    nonterminal_first: Vec<usize>,
    /// Rules added by `add_glue_rules`, exempt from `max_chart_span`.
    glue: FxHashSet<usize>,
    max_chart_span: Option<usize>,
    passthrough: Option<(Label, Vec<f64>)>,
}

impl SynchronousGrammar {
    /// An empty grammar whose rules carry `num_scores` scores each.
    pub fn new(num_scores: usize) -> Self {
        SynchronousGrammar {
            symbols: SymbolTable::new(),
            num_scores,
            rules: Vec::new(),
            by_first_word: FxHashMap::default(),
            nonterminal_first: Vec::new(),
            glue: FxHashSet::default(),
            max_chart_span: None,
            passthrough: None,
        }
    }

    /// Only glue rules may cover spans wider than `max` words.
    pub fn with_max_chart_span(mut self, max: usize) -> Self {
        self.max_chart_span = Some(max);
        self
    }

    pub fn max_chart_span(&self) -> Option<usize> {
        self.max_chart_span
    }

    /// Intern a non-terminal label.
    pub fn label(&mut self, name: &str) -> Label {
        Label(self.symbols.intern(name))
    }

    /// Intern a word.
    pub fn word(&mut self, word: &str) -> SymbolId {
        self.symbols.intern(word)
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Add a rule, returning its ID.
    pub fn add_rule(&mut self, rule: GrammarRule) -> Result<usize> {
        if rule.scores.len() != self.num_scores {
            return Err(DecodeError::invalid_rule(format!(
                "rule has {} scores, grammar expects {}",
                rule.scores.len(),
                self.num_scores
            )));
        }
        let first = match rule.source.first() {
            Some(first) => *first,
            None => return Err(DecodeError::invalid_rule("empty source side")),
        };
        if let [SourceSymbol::NonTerminal(_)] = rule.source.as_slice() {
            return Err(DecodeError::invalid_rule(
                "a lone non-terminal on the source side would cover its own span",
            ));
        }

        let arity = rule.num_nonterminals();
        let mut seen = vec![false; arity];
        for sym in &rule.target {
            match *sym {
                TargetSymbol::Slot(i) if i < arity && !seen[i] => seen[i] = true,
                TargetSymbol::Slot(i) => {
                    return Err(DecodeError::invalid_rule(format!(
                        "target slot {} is out of range or repeated",
                        i
                    )))
                }
                TargetSymbol::Copy(_) => {
                    return Err(DecodeError::invalid_rule(
                        "copy symbols are reserved for pass-through rules",
                    ))
                }
                TargetSymbol::Word(_) => {}
            }
        }
        if seen.iter().any(|s| !s) {
            return Err(DecodeError::invalid_rule("a source non-terminal is missing from the target"));
        }

        let id = self.rules.len();
        match first {
            SourceSymbol::Word(w) => self.by_first_word.entry(w).or_default().push(id),
            SourceSymbol::NonTerminal(_) => self.nonterminal_first.push(id),
        }
        self.rules.push(rule);
        Ok(id)
    }

    /// Add `lhs -> word` translating to `target` words, a convenience for
    /// lexical rules.
    pub fn add_lexical(&mut self, lhs: Label, source: &[&str], target: &[&str], scores: Vec<f64>) -> Result<usize> {
        let source = source.iter().map(|w| SourceSymbol::Word(self.word(w))).collect();
        let target = target.iter().map(|w| TargetSymbol::Word(self.word(w))).collect();
        self.add_rule(GrammarRule {
            lhs,
            source,
            target,
            scores,
        })
    }

    /// Add the glue rules `top -> [x,1] [x,2]` and `top -> [top,1] [x,2]`,
    /// which string together translations left to right. Glue scores are
    /// zero.
    pub fn add_glue_rules(&mut self, top: Label, x: Label) -> Result<()> {
        let monotone = vec![TargetSymbol::Slot(0), TargetSymbol::Slot(1)];
        let start = self.add_rule(GrammarRule {
            lhs: top,
            source: vec![SourceSymbol::NonTerminal(x), SourceSymbol::NonTerminal(x)],
            target: monotone.clone(),
            scores: vec![0.0; self.num_scores],
        })?;
        let extend = self.add_rule(GrammarRule {
            lhs: top,
            source: vec![SourceSymbol::NonTerminal(top), SourceSymbol::NonTerminal(x)],
            target: monotone,
            scores: vec![0.0; self.num_scores],
        })?;
        self.glue.extend([start, extend]);
        Ok(())
    }

    /// Let single words without any matching rule translate as themselves,
    /// labelled `lhs` and scored `scores`.
    pub fn enable_passthrough(&mut self, lhs: Label, scores: Vec<f64>) -> Result<()> {
        if scores.len() != self.num_scores {
            return Err(DecodeError::invalid_rule(format!(
                "pass-through has {} scores, grammar expects {}",
                scores.len(),
                self.num_scores
            )));
        }
        self.passthrough = Some((lhs, scores));
        Ok(())
    }

    /// Resolve tokens against this grammar.
    pub fn sentence(&self, tokens: &[&str]) -> Sentence {
        Sentence::new(tokens.iter().map(|t| t.to_string()).collect(), &self.symbols)
    }

    /// Whitespace-tokenize and resolve.
    pub fn tokenize(&self, text: &str) -> Sentence {
        Sentence::new(text.split_whitespace().map(str::to_string).collect(), &self.symbols)
    }

    fn match_rule(
        &self,
        rule: &GrammarRule,
        sentence: &Sentence,
        span: Span,
        idx: usize,
        pos: Pos,
        slots: &mut Vec<Slot>,
        out: &mut Vec<Vec<Slot>>,
    ) {
        if idx == rule.source.len() {
            if pos == span.end + 1 {
                out.push(slots.clone());
            }
            return;
        }
        // every remaining symbol covers at least one word
        let remaining = rule.source.len() - idx;
        if pos + remaining > span.end + 1 {
            return;
        }

        match rule.source[idx] {
            SourceSymbol::Word(w) => {
                if sentence.id(pos) == Some(w) {
                    self.match_rule(rule, sentence, span, idx + 1, pos + 1, slots, out);
                }
            }
            SourceSymbol::NonTerminal(label) => {
                let last_end = span.end + 1 - remaining;
                for end in pos..=last_end {
                    slots.push(Slot {
                        span: Span::new(pos, end),
                        label,
                    });
                    self.match_rule(rule, sentence, span, idx + 1, end + 1, slots, out);
                    slots.pop();
                }
            }
        }
    }
}

impl GrammarMatcher for SynchronousGrammar {
    fn num_rule_scores(&self) -> usize {
        self.num_scores
    }

    fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn match_span(&self, sentence: &Sentence, span: Span) -> Vec<Arc<RuleApplication>> {
        let by_word = sentence
            .id(span.start)
            .and_then(|w| self.by_first_word.get(&w))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let too_wide = self.max_chart_span.is_some_and(|max| span.width() > max);
        let mut applications = Vec::new();
        let mut matches = Vec::new();
        for &rule_id in by_word.iter().chain(&self.nonterminal_first) {
            if too_wide && !self.glue.contains(&rule_id) {
                continue;
            }
            let rule = &self.rules[rule_id];
            matches.clear();
            self.match_rule(rule, sentence, span, 0, span.start, &mut Vec::new(), &mut matches);
            for slots in matches.drain(..) {
                match RuleApplication::new(
                    rule_id,
                    span,
                    rule.lhs,
                    slots,
                    rule.target.clone(),
                    rule.scores.clone(),
                ) {
                    Ok(app) => applications.push(Arc::new(app)),
                    Err(e) => log::warn!("skipping rule {} on {}: {}", rule_id, span, e),
                }
            }
        }

        if applications.is_empty() && span.width() == 1 {
            if let Some((lhs, scores)) = &self.passthrough {
                log::debug!("passing through '{}' at {}", sentence.token(span.start), span.start);
                applications.push(Arc::new(RuleApplication {
                    rule_id: PASSTHROUGH_RULE,
                    span,
                    lhs: *lhs,
                    slots: Vec::new(),
                    target: vec![TargetSymbol::Copy(span.start)],
                    scores: scores.clone(),
                }));
            }
        }

        applications
    }
}
