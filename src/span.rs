//! Source spans.

use std::cmp::Ordering;
use std::fmt;

/// Position of a source word.
pub type Pos = usize;

/// An inclusive range `[start..end]` of source word positions.
///
/// Spans order by width first and start second, which is exactly the order in
/// which the CYK+ loop visits them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    /// Create a span. `start` must not exceed `end`.
    #[inline]
    pub fn new(start: Pos, end: Pos) -> Self {
        debug_assert!(start <= end, "span start {} after end {}", start, end);
        Span { start, end }
    }

    /// A span covering a single word.
    #[inline]
    pub fn word(pos: Pos) -> Self {
        Span::new(pos, pos)
    }

    /// Number of words covered.
    #[inline]
    pub fn width(&self) -> usize {
        self.end - self.start + 1
    }

    /// Check whether `other` lies inside this span.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Iterate over every span of a sentence of length `n` in CYK+ order.
    pub fn all(n: usize) -> impl Iterator<Item = Span> {
        (1..=n).flat_map(move |width| (0..=n - width).map(move |start| Span::new(start, start + width - 1)))
    }
}

impl Ord for Span {
    fn cmp(&self, other: &Self) -> Ordering {
        self.width()
            .cmp(&other.width())
            .then(self.start.cmp(&other.start))
    }
}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}
