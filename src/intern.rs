//! String interning for target words and non-terminal labels.
//!
//! Target words and labels are compared and hashed constantly during search
//! (recombination keys, bigram lookups, slot label filtering), so they are
//! mapped to integer IDs once, when the grammar is built.

use rustc_hash::FxHashMap;

/// Interned symbol ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Symbol table owned by a grammar.
///
/// There is no global table: every grammar carries its own, and decoding only
/// reads it, so one table can be shared by sentences decoded in parallel.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    str_to_id: FxHashMap<Box<str>, SymbolId>,
    id_to_str: Vec<Box<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its unique ID
    pub fn intern(&mut self, s: &str) -> SymbolId {
        if let Some(&id) = self.str_to_id.get(s) {
            return id;
        }

        let id = SymbolId(self.id_to_str.len() as u32);
        let boxed: Box<str> = s.into();
        self.str_to_id.insert(boxed.clone(), id);
        self.id_to_str.push(boxed);
        id
    }

    /// Look up a string without interning it.
    pub fn get(&self, s: &str) -> Option<SymbolId> {
        self.str_to_id.get(s).copied()
    }

    /// Look up the string for an ID
    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.id_to_str[id.0 as usize]
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("haus");
        let b = table.intern("haus");
        let c = table.intern("house");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_resolve_roundtrip() {
        let mut table = SymbolTable::new();
        let id = table.intern("X");
        assert_eq!(table.resolve(id), "X");
    }

    #[test]
    fn test_get_does_not_intern() {
        let mut table = SymbolTable::new();
        table.intern("a");
        assert!(table.get("b").is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a").map(SymbolId::as_u32), Some(0));
    }
}
