//! Loads the bundled JSON grammar and prints the scope stack for every
//! token on a short snippet, one line per token.
//!
//! Not wired up as a `cargo run --example`: kept here purely as a worked
//! usage reference, the way a README's code block would be.

use tmtoken::{Registry, Tokenizer};

const JSON_GRAMMAR: &str = include_str!("../benches/json.tmLanguage.json");

fn main() {
    let registry = Registry::new();
    let scope = registry
        .add_grammar_from_str(JSON_GRAMMAR)
        .expect("bundled grammar should parse");

    let mut tokenizer = Tokenizer::new(scope);

    let source = r#"{"name": "ferris", "legs": 4, "crab": true}"#;
    for line in source.lines() {
        let tokens = tokenizer
            .tokenize_line(&registry, line)
            .expect("tokenization should succeed");

        for token in tokens {
            let text = &line[token.start..token.end];
            let scopes: Vec<String> = token.scopes.iter().map(|s| s.to_string()).collect();
            println!("{text:>12}  {}", scopes.join(" "));
        }
    }
}
