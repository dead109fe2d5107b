use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::grammars::{CompiledGrammar, RawGrammar};
use crate::scope::Scope;

/// A concurrent store of compiled grammars, keyed by scope name.
///
/// Backed by `papaya` rather than a mutex-guarded map: tokenization is
/// read-heavy and grammars, once loaded, are essentially immutable, so
/// lookups from many tokenizer instances running concurrently should never
/// block each other or see a torn intermediate state while another thread
/// registers a grammar.
#[derive(Default)]
pub struct Registry {
    grammars: papaya::HashMap<String, Arc<CompiledGrammar>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and compile a grammar from a JSON string, registering it under
    /// its own `scopeName`.
    pub fn add_grammar_from_str(&self, grammar: &str) -> Result<Scope> {
        let raw = RawGrammar::load_from_str(grammar)?;
        self.add_raw_grammar(raw)
    }

    /// Parse and compile a grammar from a JSON file, registering it under
    /// its own `scopeName`.
    pub fn add_grammar_from_path(&self, path: impl AsRef<Path>) -> Result<Scope> {
        let raw = RawGrammar::load_from_file(path)?;
        self.add_raw_grammar(raw)
    }

    fn add_raw_grammar(&self, raw: RawGrammar) -> Result<Scope> {
        let compiled = CompiledGrammar::from_raw_grammar(raw)?;
        let scope = compiled.scope;
        let scope_name = compiled.scope_name.clone();

        #[cfg(feature = "debug")]
        log::debug!("registered grammar {scope_name} ({} rules)", compiled.rules.len());

        self.grammars.pin().insert(scope_name, Arc::new(compiled));
        Ok(scope)
    }

    /// Look up a compiled grammar by its `scopeName` (e.g. `"source.rust"`).
    pub fn get(&self, scope_name: &str) -> Option<Arc<CompiledGrammar>> {
        self.grammars.pin().get(scope_name).cloned()
    }

    /// Look up a compiled grammar by its interned [`Scope`]. Grammars are
    /// always registered under the string form of their own scope name, so
    /// this is equivalent to (and implemented in terms of) [`Self::get`].
    pub fn get_by_scope(&self, scope: Scope) -> Option<Arc<CompiledGrammar>> {
        self.get(&scope.build_string())
    }

    /// Fetch a grammar by scope name, translating a miss into the crate's
    /// [`Error`] type. Used where a missing grammar is the caller's own
    /// mistake (e.g. the grammar the tokenizer was created for) rather than
    /// a tolerable gap in a cross-grammar `include`.
    pub fn require(&self, scope_name: &str) -> Result<Arc<CompiledGrammar>> {
        self.get(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.grammars.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "name": "Test",
        "scopeName": "source.test",
        "patterns": [{"match": "\\d+", "name": "constant.numeric.test"}]
    }"#;

    #[test]
    fn add_and_fetch_grammar() {
        let registry = Registry::new();
        registry.add_grammar_from_str(MINIMAL).unwrap();
        assert!(registry.get("source.test").is_some());
        assert!(registry.get("source.missing").is_none());
    }

    #[test]
    fn require_errors_on_miss() {
        let registry = Registry::new();
        assert!(matches!(
            registry.require("source.missing"),
            Err(Error::GrammarNotFound(_))
        ));
    }
}
