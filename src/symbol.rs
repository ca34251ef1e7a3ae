//! Symbol references
//!
//! Class, method, signature, attribute and trace names never travel through
//! the engine as strings. Instrumentation interns them elsewhere and hands
//! the engine small integer ids; names are resolved again only when a
//! finished tree is rendered or serialized.

/// Small integer id standing in for an interned name.
pub type SymbolId = u32;

/// Resolves symbol ids back to names (output side only).
pub trait SymbolResolver {
    fn resolve(&self, id: SymbolId) -> Option<&str>;
}

impl SymbolResolver for std::collections::HashMap<SymbolId, String> {
    fn resolve(&self, id: SymbolId) -> Option<&str> {
        self.get(&id).map(String::as_str)
    }
}

/// Resolve a symbol or fall back to a `#<id>` placeholder.
pub fn symbol_name(resolver: &dyn SymbolResolver, id: SymbolId) -> String {
    match resolver.resolve(id) {
        Some(name) => name.to_string(),
        None => format!("#{}", id),
    }
}
