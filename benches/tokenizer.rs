use criterion::{Criterion, criterion_group, criterion_main};
use tmtoken::{Registry, Tokenizer};

const JSON_GRAMMAR: &str = include_str!("json.tmLanguage.json");

const JSON_INPUT: &str = r#"{"name": "John", "age": 30, "active": true, "score": 95.5, "tags": ["developer", "rust"], "address": null}"#;

fn criterion_benchmark(c: &mut Criterion) {
    let registry = Registry::new();
    let scope = registry
        .add_grammar_from_str(JSON_GRAMMAR)
        .expect("bundled grammar should parse");

    c.bench_function("json tokenization", |b| {
        b.iter(|| {
            let mut tokenizer = Tokenizer::new(scope);
            let tokens = tokenizer
                .tokenize_line(&registry, JSON_INPUT)
                .expect("tokenization should succeed");
            std::hint::black_box(tokens);
        })
    });

    c.bench_function("json tokenizer construction", |b| {
        b.iter(|| std::hint::black_box(Tokenizer::new(scope)));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
