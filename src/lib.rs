//! A tokenization engine for TextMate grammars, producing the same scope
//! stacks vscode-textmate would for a line of source code.
//!
//! # Example
//!
//! ```ignore
//! use tmtoken::{Registry, Tokenizer};
//!
//! let registry = Registry::new();
//! let scope = registry.add_grammar_from_path("javascript.tmLanguage.json")?;
//!
//! let mut tokenizer = Tokenizer::new(scope);
//! for line in code.lines() {
//!     let tokens = tokenizer.tokenize_line(&registry, line)?;
//! }
//! ```

#![deny(missing_docs)]

mod error;
mod grammars;
mod registry;
mod scope;
mod tokenizer;

pub use error::Error;
pub use grammars::RawGrammar;
pub use registry::Registry;
pub use scope::Scope;
pub use tokenizer::{Token, Tokenizer};
