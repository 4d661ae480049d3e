//! The span table: one beam per span of the sentence.
//!
//! Beams are stored triangularly, `by_span[start][width - 1]`, and every read
//! of a beam's contents goes through its finalized snapshot, so a span can
//! never observe a sub-span that is still being filled.

use crate::beam::{BeamStats, SpanBeam};
use crate::error::{DecodeError, Result};
use crate::hypothesis::HypoId;
use crate::span::Span;
use std::fmt::Write;

/// Triangular table of span beams for a sentence.
#[derive(Debug)]
pub struct Chart {
    len: usize,
    by_span: Vec<Vec<SpanBeam>>,
}

impl Chart {
    /// Create the table for a sentence of `len` words. Every beam shares the
    /// same pruning parameters.
    pub fn new(len: usize, beam_width: f64, max_size: usize, keep_arcs: bool) -> Self {
        let by_span = (0..len)
            .map(|start| {
                (1..=len - start)
                    .map(|width| SpanBeam::new(Span::new(start, start + width - 1), beam_width, max_size, keep_arcs))
                    .collect()
            })
            .collect();
        Chart { len, by_span }
    }

    /// The whole-sentence span, `None` for an empty sentence.
    pub fn goal_span(&self) -> Option<Span> {
        (self.len > 0).then(|| Span::new(0, self.len - 1))
    }

    fn check(&self, span: Span) -> Result<()> {
        if span.end >= self.len || span.start > span.end {
            return Err(DecodeError::SpanOutOfRange { span, len: self.len });
        }
        Ok(())
    }

    pub fn beam(&self, span: Span) -> Result<&SpanBeam> {
        self.check(span)?;
        Ok(&self.by_span[span.start][span.width() - 1])
    }

    pub fn beam_mut(&mut self, span: Span) -> Result<&mut SpanBeam> {
        self.check(span)?;
        Ok(&mut self.by_span[span.start][span.width() - 1])
    }

    /// The finalized hypotheses of `span`, best first.
    pub fn sorted(&self, span: Span) -> Result<&[HypoId]> {
        self.beam(span)?.sorted()
    }

    /// The finalized hypotheses of the whole-sentence span.
    pub fn goal(&self) -> Result<&[HypoId]> {
        match self.goal_span() {
            Some(span) => self.sorted(span),
            None => Ok(&[]),
        }
    }

    /// All beams in CYK+ order.
    pub fn beams(&self) -> impl Iterator<Item = &SpanBeam> {
        Span::all(self.len).map(move |span| &self.by_span[span.start][span.width() - 1])
    }

    /// Counters summed over every beam.
    pub fn stats(&self) -> BeamStats {
        let mut total = BeamStats::default();
        for beam in self.beams() {
            total.merge(beam.stats());
        }
        total
    }

    /// Number of finalized hypotheses per span, one row per start position and
    /// one column per width.
    pub fn occupancy(&self) -> String {
        let mut out = String::new();
        for (start, row) in self.by_span.iter().enumerate() {
            let _ = write!(out, "{:>4}:", start);
            for beam in row {
                let _ = write!(out, " {:>4}", beam.len());
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypothesis::HypothesisArena;

    #[test]
    fn test_triangular_layout() {
        let chart = Chart::new(3, 1.0, 10, false);
        assert_eq!(chart.beams().count(), 6);
        assert_eq!(chart.goal_span(), Some(Span::new(0, 2)));
        assert_eq!(chart.beam(Span::new(1, 2)).unwrap().span(), Span::new(1, 2));

        let order: Vec<Span> = chart.beams().map(SpanBeam::span).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_out_of_range() {
        let chart = Chart::new(2, 1.0, 10, false);
        assert!(matches!(
            chart.beam(Span::new(1, 2)),
            Err(DecodeError::SpanOutOfRange { len: 2, .. })
        ));
    }

    #[test]
    fn test_unfinalized_read_fails() {
        let mut chart = Chart::new(2, 1.0, 10, false);
        let mut arena = HypothesisArena::new();
        assert!(matches!(
            chart.sorted(Span::word(0)),
            Err(DecodeError::BeamNotFinalized(_))
        ));

        chart.beam_mut(Span::word(0)).unwrap().sort_and_finalize(&mut arena);
        assert!(chart.sorted(Span::word(0)).unwrap().is_empty());
    }

    #[test]
    fn test_empty_sentence() {
        let chart = Chart::new(0, 1.0, 10, false);
        assert_eq!(chart.goal_span(), None);
        assert!(chart.goal().unwrap().is_empty());
        assert_eq!(chart.occupancy(), "");
    }
}
