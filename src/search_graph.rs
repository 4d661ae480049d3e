//! Search hypergraph diagnostics.
//!
//! Starting from the goal hypotheses, follow both children and recombination
//! arcs to collect everything a derivation could still use, then dump it one
//! hypothesis per line:
//!
//! ```text
//! 7 S => [X,1] [X,2] [0..1] children=2,5 total=-2.1 <-2 -0.1>
//! 9->7 S => [X,1] [X,2] [0..1] children=2,6 total=-2.6 <-2.5 -0.1>
//! ```
//!
//! `9->7` marks a hypothesis that was recombined into hypothesis 7.

use crate::error::Result;
use crate::grammar::Sentence;
use crate::hypothesis::{HypoId, HypothesisArena};
use crate::intern::SymbolTable;
use crate::rule::TargetSymbol;
use rustc_hash::FxHashSet;
use std::io::Write;

/// The hypotheses reachable from the goal.
#[derive(Debug, Clone, Default)]
pub struct SearchGraph {
    /// In span order, then creation order.
    nodes: Vec<HypoId>,
    winners: usize,
    losers: usize,
}

impl SearchGraph {
    pub fn reachable(arena: &HypothesisArena, goal: &[HypoId]) -> Self {
        let mut seen: FxHashSet<HypoId> = FxHashSet::default();
        let mut stack: Vec<HypoId> = goal.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let hypo = &arena[id];
            stack.extend(hypo.children().iter().copied());
            stack.extend(hypo.arcs().iter().copied());
        }

        let mut nodes: Vec<HypoId> = seen.into_iter().collect();
        nodes.sort_by_key(|&id| (arena[id].span(), id));
        let winners = nodes.iter().filter(|&&id| arena[id].is_winner()).count();
        let losers = nodes.len() - winners;
        log::debug!("search graph: {} winners, {} recombined", winners, losers);

        SearchGraph { nodes, winners, losers }
    }

    pub fn nodes(&self) -> &[HypoId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Vertex representatives.
    pub fn winners(&self) -> usize {
        self.winners
    }

    /// Hypotheses only reachable through recombination arcs.
    pub fn losers(&self) -> usize {
        self.losers
    }

    pub fn write<W: Write>(
        &self,
        out: &mut W,
        arena: &HypothesisArena,
        symbols: &SymbolTable,
        sentence: &Sentence,
    ) -> Result<()> {
        for &id in &self.nodes {
            let hypo = &arena[id];
            write!(out, "{}", id)?;
            match hypo.winner() {
                Some(winner) if winner != id => write!(out, "->{}", winner)?,
                _ => {}
            }
            write!(out, " {} =>", symbols.resolve(hypo.lhs().0))?;

            let rule = hypo.rule();
            for sym in &rule.target {
                match *sym {
                    TargetSymbol::Word(w) => write!(out, " {}", symbols.resolve(w))?,
                    TargetSymbol::Copy(pos) => write!(out, " {}", sentence.token(pos))?,
                    TargetSymbol::Slot(i) => {
                        write!(out, " [{},{}]", symbols.resolve(rule.slots[i].label.0), i + 1)?
                    }
                }
            }

            let children: Vec<String> = hypo.children().iter().map(HypoId::to_string).collect();
            write!(out, " {}", hypo.span())?;
            if !children.is_empty() {
                write!(out, " children={}", children.join(","))?;
            }
            writeln!(out, " total={} <{}>", hypo.total_score(), hypo.breakdown())?;
        }
        Ok(())
    }
}
