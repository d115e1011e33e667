//! Symbol-table interface consumed by the compiler.
//!
//! Scope analysis runs upstream of this crate. The compiler only asks where
//! a resolved name lives, which fast slot it occupies, and how many fast
//! slots a scope needs; anything that can answer those questions plugs in
//! through [`SymbolTable`]. [`StaticSymbolTable`] is a ready-made
//! implementation for front ends (and tests) that precompute the answers.

use ahash::AHashMap;

/// Identifies one lexical scope.
///
/// `Module` and `FunctionDef` nodes carry the id of their scope; it indexes
/// the [`ScopeMap`] handed to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ScopeId(u32);

impl ScopeId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("scope id exceeds u32"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a resolved name lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VarScope {
    /// Looked up by name through the enclosing namespace chain.
    Name,
    /// Module-global, looked up by name.
    Global,
    /// Numbered local slot in the function frame.
    Fast,
    /// Closure cell captured from an enclosing function scope.
    Deref,
}

/// Per-scope name-resolution capability.
///
/// `Fast` and `Deref` names answer [`Self::get_fast_local`] with a slot
/// index; `Name` and `Global` names are emitted as pool atoms instead.
pub trait SymbolTable {
    /// Returns where `name` lives, or `None` if the table has no entry.
    fn get_scope(&self, name: &str) -> Option<VarScope>;

    /// Returns the fast slot index of a `Fast` or `Deref` name.
    fn get_fast_local(&self, name: &str) -> Option<u16>;

    /// Number of fast local slots this scope needs in its VM frame.
    fn num_locals(&self) -> u16;

    /// Completes slot assignment. The compiler calls this once per function
    /// scope, before emitting the function body.
    fn finalize(&mut self);
}

/// Symbol tables for every scope of a module, indexed by [`ScopeId`].
#[derive(Debug)]
pub struct ScopeMap<T> {
    tables: Vec<T>,
}

impl<T: SymbolTable> ScopeMap<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Adds a scope's table, returning the id the AST should carry.
    pub fn insert(&mut self, table: T) -> ScopeId {
        let id = ScopeId::new(self.tables.len());
        self.tables.push(table);
        id
    }

    /// Returns the table for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this map.
    #[must_use]
    pub fn get(&self, id: ScopeId) -> &T {
        &self.tables[id.index()]
    }

    /// Returns the table for `id` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this map.
    pub fn get_mut(&mut self, id: ScopeId) -> &mut T {
        &mut self.tables[id.index()]
    }
}

impl<T> Default for ScopeMap<T> {
    fn default() -> Self {
        Self { tables: Vec::new() }
    }
}

/// Hash-map backed symbol table with precomputed answers.
#[derive(Debug, Default)]
pub struct StaticSymbolTable {
    scopes: AHashMap<String, VarScope>,
    slots: AHashMap<String, u16>,
    num_locals: u16,
}

impl StaticSymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` as resolving to `scope` (`Name` or `Global`).
    pub fn define(&mut self, name: &str, scope: VarScope) {
        self.scopes.insert(name.to_owned(), scope);
    }

    /// Records a `Fast` or `Deref` name with its slot, growing the local
    /// count to cover the slot.
    pub fn define_local(&mut self, name: &str, scope: VarScope, slot: u16) {
        self.scopes.insert(name.to_owned(), scope);
        self.slots.insert(name.to_owned(), slot);
        self.num_locals = self.num_locals.max(slot + 1);
    }
}

impl SymbolTable for StaticSymbolTable {
    fn get_scope(&self, name: &str) -> Option<VarScope> {
        self.scopes.get(name).copied()
    }

    fn get_fast_local(&self, name: &str) -> Option<u16> {
        self.slots.get(name).copied()
    }

    fn num_locals(&self) -> u16 {
        self.num_locals
    }

    fn finalize(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_table_lookup() {
        let mut table = StaticSymbolTable::new();
        table.define("g", VarScope::Global);
        table.define_local("x", VarScope::Fast, 0);
        table.define_local("y", VarScope::Deref, 1);

        assert_eq!(table.get_scope("g"), Some(VarScope::Global));
        assert_eq!(table.get_scope("x"), Some(VarScope::Fast));
        assert_eq!(table.get_scope("missing"), None);
        assert_eq!(table.get_fast_local("y"), Some(1));
        assert_eq!(table.num_locals(), 2);
    }

    #[test]
    fn test_scope_map_ids_are_dense() {
        let mut scopes = ScopeMap::new();
        let a = scopes.insert(StaticSymbolTable::new());
        let b = scopes.insert(StaticSymbolTable::new());
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        scopes.get_mut(b).define("x", VarScope::Name);
        assert_eq!(scopes.get(b).get_scope("x"), Some(VarScope::Name));
    }
}
