//! Rule applications: grammar rules bound to a source span.
//!
//! A rule application is produced by the grammar matcher for one span and is
//! shared read-only by every hypothesis built from it.

use crate::error::{DecodeError, Result};
use crate::intern::{SymbolId, SymbolTable};
use crate::span::{Pos, Span};
use std::fmt;

/// A non-terminal label (`X`, `S`, `NP`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub SymbolId);

/// One symbol of a rule's target side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetSymbol {
    /// A target word.
    Word(SymbolId),
    /// A copy of the source token at this position (unknown-word pass-through).
    Copy(Pos),
    /// The yield of the child filling this slot.
    Slot(usize),
}

/// A non-terminal slot bound to a sub-span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    pub span: Span,
    pub label: Label,
}

/// A grammar rule matched against a span.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleApplication {
    /// Index of the originating rule in its grammar (diagnostics only).
    pub rule_id: usize,
    pub span: Span,
    pub lhs: Label,
    /// Slots in source order.
    pub slots: Vec<Slot>,
    /// Target skeleton interleaving words and slots.
    pub target: Vec<TargetSymbol>,
    /// Rule-local scores, one per rule score component.
    pub scores: Vec<f64>,
}

impl RuleApplication {
    /// Create a rule application, checking that the target skeleton and slots
    /// line up.
    ///
    /// Every slot must appear exactly once in the target, and slot spans must
    /// be disjoint, ordered and strictly smaller than `span`.
    pub fn new(
        rule_id: usize,
        span: Span,
        lhs: Label,
        slots: Vec<Slot>,
        target: Vec<TargetSymbol>,
        scores: Vec<f64>,
    ) -> Result<Self> {
        let mut seen = vec![false; slots.len()];
        for sym in &target {
            match *sym {
                TargetSymbol::Slot(i) => {
                    if i >= slots.len() {
                        return Err(DecodeError::invalid_rule(format!(
                            "target refers to slot {} but the rule has {} slots",
                            i,
                            slots.len()
                        )));
                    }
                    if std::mem::replace(&mut seen[i], true) {
                        return Err(DecodeError::invalid_rule(format!(
                            "slot {} appears twice in the target",
                            i
                        )));
                    }
                }
                TargetSymbol::Copy(pos) if pos < span.start || pos > span.end => {
                    return Err(DecodeError::invalid_rule(format!(
                        "copied position {} lies outside {}",
                        pos, span
                    )));
                }
                _ => {}
            }
        }
        if let Some(i) = seen.iter().position(|s| !s) {
            return Err(DecodeError::invalid_rule(format!(
                "slot {} never appears in the target",
                i
            )));
        }

        let mut next_free = span.start;
        for slot in &slots {
            if !span.contains(&slot.span) || slot.span.width() >= span.width() {
                return Err(DecodeError::invalid_rule(format!(
                    "slot span {} is not strictly inside {}",
                    slot.span, span
                )));
            }
            if slot.span.start < next_free {
                return Err(DecodeError::invalid_rule(format!(
                    "slot span {} overlaps or precedes an earlier slot",
                    slot.span
                )));
            }
            next_free = slot.span.end + 1;
        }

        Ok(RuleApplication {
            rule_id,
            span,
            lhs,
            slots,
            target,
            scores,
        })
    }

    /// Number of non-terminal slots.
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// Number of target words the rule itself emits.
    pub fn target_word_count(&self) -> usize {
        self.target
            .iter()
            .filter(|s| !matches!(s, TargetSymbol::Slot(_)))
            .count()
    }

    /// Render with symbol names resolved.
    pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> RuleDisplay<'a> {
        RuleDisplay { rule: self, symbols }
    }
}

/// Helper returned by [`RuleApplication::display`].
pub struct RuleDisplay<'a> {
    rule: &'a RuleApplication,
    symbols: &'a SymbolTable,
}

impl fmt::Display for RuleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = self.rule;
        write!(f, "{} ->", self.symbols.resolve(rule.lhs.0))?;
        for sym in &rule.target {
            match *sym {
                TargetSymbol::Word(w) => write!(f, " {}", self.symbols.resolve(w))?,
                TargetSymbol::Copy(pos) => write!(f, " <copy:{}>", pos)?,
                TargetSymbol::Slot(i) => {
                    let slot = &rule.slots[i];
                    write!(f, " [{},{}]", self.symbols.resolve(slot.label.0), i + 1)?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> (SymbolTable, Label) {
        let mut symbols = SymbolTable::new();
        let x = Label(symbols.intern("X"));
        (symbols, x)
    }

    #[test]
    fn test_valid_binary_rule() {
        let (mut symbols, x) = labels();
        let de = symbols.intern("de");
        let rule = RuleApplication::new(
            0,
            Span::new(0, 2),
            x,
            vec![
                Slot { span: Span::word(0), label: x },
                Slot { span: Span::word(2), label: x },
            ],
            vec![TargetSymbol::Slot(1), TargetSymbol::Word(de), TargetSymbol::Slot(0)],
            vec![-1.0],
        )
        .unwrap();

        assert_eq!(rule.arity(), 2);
        assert_eq!(rule.target_word_count(), 1);
        assert_eq!(rule.display(&symbols).to_string(), "X -> [X,2] de [X,1]");
    }

    #[test]
    fn test_missing_slot_rejected() {
        let (_, x) = labels();
        let err = RuleApplication::new(
            0,
            Span::new(0, 1),
            x,
            vec![Slot { span: Span::word(0), label: x }],
            vec![],
            vec![],
        );
        assert!(matches!(err, Err(DecodeError::InvalidRule(_))));
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let (_, x) = labels();
        let err = RuleApplication::new(
            0,
            Span::new(0, 1),
            x,
            vec![Slot { span: Span::word(0), label: x }],
            vec![TargetSymbol::Slot(0), TargetSymbol::Slot(0)],
            vec![],
        );
        assert!(matches!(err, Err(DecodeError::InvalidRule(_))));
    }

    #[test]
    fn test_slot_must_be_strictly_smaller() {
        let (_, x) = labels();
        let err = RuleApplication::new(
            0,
            Span::new(0, 1),
            x,
            vec![Slot { span: Span::new(0, 1), label: x }],
            vec![TargetSymbol::Slot(0)],
            vec![],
        );
        assert!(matches!(err, Err(DecodeError::InvalidRule(_))));
    }

    #[test]
    fn test_overlapping_slots_rejected() {
        let (_, x) = labels();
        let err = RuleApplication::new(
            0,
            Span::new(0, 3),
            x,
            vec![
                Slot { span: Span::new(0, 1), label: x },
                Slot { span: Span::new(1, 2), label: x },
            ],
            vec![TargetSymbol::Slot(0), TargetSymbol::Slot(1)],
            vec![],
        );
        assert!(matches!(err, Err(DecodeError::InvalidRule(_))));
    }

    #[test]
    fn test_copy_outside_span_rejected() {
        let (_, x) = labels();
        let err = RuleApplication::new(0, Span::word(1), x, vec![], vec![TargetSymbol::Copy(0)], vec![]);
        assert!(matches!(err, Err(DecodeError::InvalidRule(_))));
    }
}
