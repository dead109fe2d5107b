//! Deserialization of TextMate JSON grammar documents into the raw,
//! stringly-typed shape described by SPEC_FULL.md §6. Nothing here is
//! consumed by the tokenizer directly; [`crate::grammars::compiled::CompiledGrammar`]
//! is compiled from this.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One of the allowed forms an `include` value can take.
///
/// Per vscode-textmate:
///  * Scope Name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
///  * Relative scope reference, e.g. `#entity.name.class`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reference {
    /// `$self`.
    Self_,
    /// `$base`.
    Base,
    /// `#key`, resolved through the repository chain in scope.
    Local(String),
    /// A bare scope name, e.g. `source.js`.
    OtherComplete(String),
    /// `scope#key`.
    OtherSpecific(String, String),
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        match value {
            "$self" => Self::Self_,
            "$base" => Self::Base,
            s if s.starts_with('#') => Self::Local(s[1..].to_string()),
            s if s.contains('#') => {
                let (scope, rule) = s.split_once('#').unwrap();
                Self::OtherSpecific(scope.to_string(), rule.to_string())
            }
            _ => Self::OtherComplete(value.to_string()),
        }
    }
}

fn deserialize_reference<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Reference>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt_string = Option::<String>::deserialize(deserializer)?;
    Ok(opt_string.map(|s| Reference::from(s.as_str())))
}

/// `applyEndPatternLast` is sometimes an integer, sometimes a bool in the wild.
#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrNumber {
    Bool(bool),
    Number(u8),
}

fn bool_or_number<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match BoolOrNumber::deserialize(deserializer)? {
        BoolOrNumber::Bool(b) => Ok(b),
        BoolOrNumber::Number(0) => Ok(false),
        BoolOrNumber::Number(1) => Ok(true),
        BoolOrNumber::Number(x) => Err(serde::de::Error::custom(format!(
            "expected bool, 0, or 1, got {x}"
        ))),
    }
}

/// A capture table: group index -> rule describing the scope (and, possibly,
/// its own nested `patterns`) for that group.
///
/// Accepts both the standard JSON-object form (`{"1": {...}, "2": {...}}`)
/// and a positionally-indexed array form, which a handful of real-world
/// grammars use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Captures(pub(crate) BTreeMap<usize, RawRule>);

impl std::ops::Deref for Captures {
    type Target = BTreeMap<usize, RawRule>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CapturesFormat {
    Object(BTreeMap<String, RawRule>),
    Array(Vec<RawRule>),
}

impl<'de> Deserialize<'de> for Captures {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match CapturesFormat::deserialize(deserializer) {
            Ok(CapturesFormat::Object(string_map)) => {
                let mut usize_map = BTreeMap::new();
                for (key, value) in string_map {
                    // Non-numeric keys are a known authoring artifact in a
                    // handful of real grammars (e.g. some XML syntaxes);
                    // skip rather than reject the whole document.
                    if let Ok(idx) = key.parse::<usize>() {
                        usize_map.insert(idx, value);
                    }
                }
                Ok(Captures(usize_map))
            }
            Ok(CapturesFormat::Array(array)) => Ok(Captures(
                array.into_iter().enumerate().collect::<BTreeMap<_, _>>(),
            )),
            Err(_) => Ok(Captures(BTreeMap::new())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRuleValue {
    Vec(Vec<RawRule>),
    Single(RawRule),
}

fn deserialize_repository_map<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, RawRule>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw_map = BTreeMap::<String, RawRuleValue>::deserialize(deserializer)?;
    let mut result = BTreeMap::new();
    let default = RawRule::default();

    for (key, val) in raw_map {
        let mut rule = match val {
            RawRuleValue::Vec(rules) => RawRule {
                patterns: rules,
                ..Default::default()
            },
            RawRuleValue::Single(rule) => rule,
        };

        // A handful of grammars ship a literal `{}` inside `patterns` as an
        // authoring artifact (e.g. a trailing comma "fixed" by adding an
        // empty object instead of removing it). Drop it; left in, it would
        // compile to a rule that always matches zero-width.
        rule.patterns.retain(|p| p != &default);
        result.insert(key, rule);
    }

    Ok(result)
}

/// A single TextMate pattern entry. The pattern "kind" (match, begin/end,
/// begin/while, include, or a bare container of `patterns`/`repository`) is
/// determined by which fields are present, mirroring vscode-textmate's own
/// rule shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRule {
    #[serde(deserialize_with = "deserialize_reference")]
    pub include: Option<Reference>,

    pub name: Option<String>,
    pub content_name: Option<String>,

    #[serde(rename = "match")]
    pub match_: Option<String>,
    pub captures: Captures,

    pub begin: Option<String>,
    pub begin_captures: Captures,

    pub end: Option<String>,
    pub end_captures: Captures,

    #[serde(rename = "while")]
    pub while_: Option<String>,
    pub while_captures: Captures,

    pub patterns: Vec<RawRule>,
    #[serde(deserialize_with = "deserialize_repository_map")]
    pub repository: BTreeMap<String, RawRule>,

    #[serde(deserialize_with = "bool_or_number")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure representing a complete TextMate grammar document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Human-readable name of the language, e.g. `"JavaScript"`.
    pub name: String,
    /// Optional alternative display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// File extensions this grammar applies to. Retained, never consulted —
    /// file-type discovery is out of scope.
    #[serde(default)]
    pub file_types: Vec<String>,
    /// Root scope name, e.g. `"source.js"`.
    pub scope_name: String,
    /// Named pattern definitions referenced by `#key` includes.
    #[serde(default, deserialize_with = "deserialize_repository_map")]
    pub repository: BTreeMap<String, RawRule>,
    /// Root patterns applied at the top level of the grammar.
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    /// Injection patterns. Parsed so ingestion doesn't reject real-world
    /// documents that declare them, but never consulted by the tokenizer —
    /// injections are out of scope.
    #[serde(default, deserialize_with = "deserialize_repository_map")]
    pub injections: BTreeMap<String, RawRule>,
    /// CSS-like selector describing where injections should apply. Stored, unused.
    #[serde(default)]
    pub injection_selector: Option<String>,
}

impl RawGrammar {
    /// Parse a grammar document from an in-memory JSON string.
    pub fn load_from_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse a grammar document from a file path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        Ok(serde_json::from_reader(&file)?)
    }
}

impl RawRule {
    /// Basic structural sanity check used before compilation: a rule has to
    /// be recognizable as at least one of match / begin / include / a bare
    /// container / a plain named scope.
    pub(crate) fn validate_shape(&self) -> Result<()> {
        let has_match = self.match_.is_some();
        let has_begin = self.begin.is_some();
        let has_include = self.include.is_some();
        let has_container = !self.patterns.is_empty() || !self.repository.is_empty();
        let has_scope_only_name = self.name.is_some();

        if !(has_match || has_begin || has_include || has_container || has_scope_only_name) {
            return Err(Error::GrammarShape(
                "rule has none of match/begin/include/patterns/repository/name".into(),
            ));
        }
        if self.match_.is_some() && self.begin.is_some() {
            return Err(Error::GrammarShape(
                "rule has both `match` and `begin`".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_parsing() {
        assert_eq!(Reference::from("$self"), Reference::Self_);
        assert_eq!(Reference::from("$base"), Reference::Base);
        assert_eq!(
            Reference::from("#string-escape"),
            Reference::Local("string-escape".into())
        );
        assert_eq!(
            Reference::from("source.js"),
            Reference::OtherComplete("source.js".into())
        );
        assert_eq!(
            Reference::from("source.js#string-escape"),
            Reference::OtherSpecific("source.js".into(), "string-escape".into())
        );
    }

    #[test]
    fn captures_accepts_object_and_array_forms() {
        let object: Captures = serde_json::from_str(r#"{"1": {"name": "keyword"}}"#).unwrap();
        assert_eq!(object.len(), 1);

        let array: Captures = serde_json::from_str(r#"[{"name": "keyword"}]"#).unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array.get(&0).unwrap().name.as_deref(), Some("keyword"));
    }

    #[test]
    fn captures_skips_non_numeric_keys_rather_than_failing() {
        let captures: Captures =
            serde_json::from_str(r#"{"1": {"name": "a"}, "bogus": {"name": "b"}}"#).unwrap();
        assert_eq!(captures.len(), 1);
    }

    #[test]
    fn apply_end_pattern_last_accepts_bool_and_integer() {
        let by_bool: RawRule = serde_json::from_str(r#"{"match": "x", "applyEndPatternLast": true}"#).unwrap();
        assert!(by_bool.apply_end_pattern_last);

        let by_int: RawRule = serde_json::from_str(r#"{"match": "x", "applyEndPatternLast": 1}"#).unwrap();
        assert!(by_int.apply_end_pattern_last);

        let default_false: RawRule = serde_json::from_str(r#"{"match": "x"}"#).unwrap();
        assert!(!default_false.apply_end_pattern_last);
    }

    #[test]
    fn repository_filters_empty_object_pattern_artifacts() {
        let grammar: RawGrammar = serde_json::from_str(
            r#"{
                "name": "test",
                "scopeName": "source.test",
                "repository": {
                    "comment-block": {
                        "patterns": [{"match": "foo"}, {}]
                    }
                }
            }"#,
        )
        .unwrap();
        let rule = &grammar.repository["comment-block"];
        assert_eq!(rule.patterns.len(), 1);
    }

    #[test]
    fn minimal_grammar_parses() {
        let grammar = RawGrammar::load_from_str(
            r#"{
                "name": "Test",
                "scopeName": "source.test",
                "patterns": [{"match": "\\d+", "name": "constant.numeric.test"}]
            }"#,
        )
        .unwrap();
        assert_eq!(grammar.scope_name, "source.test");
        assert_eq!(grammar.patterns.len(), 1);
    }
}
