use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::grammars::pattern_set::PatternSet;
use crate::grammars::raw::{Captures, RawGrammar, RawRule, Reference};
use crate::grammars::regex::Regex;
use crate::grammars::{GlobalRuleRef, RepositoryId, RuleId, ROOT_RULE_ID};
use crate::scope::Scope;

/// Index into [`CompiledGrammar::regexes`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(u16);

/// A named table of rules reachable through `#key` includes. A grammar has
/// its own top-level repository plus one extra repository per nested
/// `repository` block any rule declares.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Repository(HashMap<String, RuleId>);

impl Repository {
    pub fn get(&self, name: &str) -> Option<RuleId> {
        self.0.get(name).copied()
    }
}

/// The chain of repositories in scope at a given point in the rule tree,
/// innermost (most recently entered) last. `#key` includes search this
/// chain from the end backwards, so a nested repository can shadow an
/// entry of the same name in an enclosing one.
///
/// Grown with a plain `Vec` rather than a fixed-size array: nothing in the
/// format caps how deeply `repository` blocks can nest, and a handful of
/// real grammars go deeper than a small constant would comfortably hold.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct RepositoryStack(Vec<RepositoryId>);

impl RepositoryStack {
    pub fn push(&self, id: RepositoryId) -> Self {
        let mut next = self.0.clone();
        next.push(id);
        RepositoryStack(next)
    }

    pub fn iter_innermost_first(&self) -> impl Iterator<Item = RepositoryId> + '_ {
        self.0.iter().rev().copied()
    }
}

/// Either a rule already resolved to a local id at compile time, or a
/// reference that still needs resolving (possibly against another grammar,
/// possibly against `$base`) at tokenization time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RuleIdOrReference {
    RuleId(RuleId),
    Reference(Reference),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Match {
    pub id: RuleId,
    pub name: Vec<Scope>,
    /// `None` for a scope-only rule: a capture entry that assigns a name but
    /// has nothing of its own to search for (its span comes from the parent
    /// match/begin/end's own capture group).
    pub regex_id: Option<RegexId>,
    pub captures: Vec<Option<RuleId>>,
    pub repository_stack: RepositoryStack,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IncludeOnly {
    pub id: RuleId,
    pub name: Vec<Scope>,
    pub content_name: Vec<Scope>,
    pub repository_stack: RepositoryStack,
    pub patterns: Vec<RuleIdOrReference>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BeginEnd {
    pub id: RuleId,
    pub name: Vec<Scope>,
    pub content_name: Vec<Scope>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleIdOrReference>,
    pub repository_stack: RepositoryStack,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BeginWhile {
    pub id: RuleId,
    pub name: Vec<Scope>,
    pub content_name: Vec<Scope>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegexId,
    pub while_has_backrefs: bool,
    pub while_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleIdOrReference>,
    pub repository_stack: RepositoryStack,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Rule {
    Match(Match),
    IncludeOnly(IncludeOnly),
    BeginEnd(BeginEnd),
    BeginWhile(BeginWhile),
    Noop,
}

/// A grammar reference that could not be resolved against this grammar's
/// own rule table and repository chain, because it names another grammar
/// (or `$base`, whose target grammar is only known at tokenization time).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ExternalRef {
    /// `$base`: the root of whichever grammar started the current
    /// tokenization call, not necessarily this one.
    Base,
    /// A bare scope name: include that grammar's entire root pattern list.
    WholeGrammar(String),
    /// `scope#key`: include one named rule from another grammar's repository.
    GrammarRule(String, String),
}

/// A grammar compiled from a [`RawGrammar`] document: a flat table of rules
/// and regexes plus the repository structure needed to resolve `#key`
/// includes. Ready to be registered and tokenized against.
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    pub name: String,
    pub display_name: Option<String>,
    pub scope_name: String,
    pub scope: Scope,
    pub file_types: Vec<String>,
    pub regexes: Vec<Regex>,
    pub rules: Vec<Rule>,
    pub repositories: Vec<Repository>,
}

impl CompiledGrammar {
    pub fn from_raw_grammar(raw: RawGrammar) -> Result<Self> {
        let scope = Scope::new(&raw.scope_name)
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut grammar = Self {
            name: raw.name,
            display_name: raw.display_name,
            scope_name: raw.scope_name,
            scope,
            file_types: raw.file_types,
            regexes: Vec::new(),
            rules: Vec::new(),
            repositories: Vec::new(),
        };

        let root_rule = RawRule {
            patterns: raw.patterns,
            repository: raw.repository,
            ..Default::default()
        };
        let root_rule_id = grammar.compile_rule(root_rule, RepositoryStack::default())?;
        assert_eq!(root_rule_id, ROOT_RULE_ID);

        Ok(grammar)
    }

    fn compile_rule(&mut self, raw_rule: RawRule, repository_stack: RepositoryStack) -> Result<RuleId> {
        raw_rule.validate_shape()?;

        let id = RuleId(self.rules.len() as u16);
        self.rules.push(Rule::Noop); // reserve the slot; patterns can be self-recursive via $self

        let name = raw_rule
            .name
            .as_deref()
            .map(Scope::new)
            .unwrap_or_default();
        let content_name = raw_rule
            .content_name
            .as_deref()
            .map(Scope::new)
            .unwrap_or_default();

        // Rules can carry their own nested `repository` block regardless of
        // which of match/begin/include they otherwise are.
        let repository_stack = if raw_rule.repository.is_empty() {
            repository_stack
        } else {
            let repo_id = self.compile_repository(raw_rule.repository, repository_stack)?;
            repository_stack.push(repo_id)
        };

        // https://github.com/microsoft/vscode-textmate/blob/main/src/rule.ts — match wins,
        // then begin+while, then begin+end; a bare begin degrades to match.
        let rule = if let Some(pat) = raw_rule.match_ {
            Rule::Match(Match {
                id,
                name,
                regex_id: Some(self.compile_regex(pat)?.0),
                captures: self.compile_captures(raw_rule.captures, repository_stack.clone())?,
                repository_stack,
            })
        } else if let Some(begin_pat) = raw_rule.begin {
            let apply_end_pattern_last = raw_rule.apply_end_pattern_last;
            let begin_captures =
                self.compile_captures(raw_rule.begin_captures, repository_stack.clone())?;

            if let Some(while_pat) = raw_rule.while_ {
                let (while_, while_has_backrefs) = self.compile_regex(while_pat)?;
                let while_captures =
                    self.compile_captures(raw_rule.while_captures, repository_stack.clone())?;
                let patterns = self.compile_patterns(raw_rule.patterns, repository_stack.clone())?;
                Rule::BeginWhile(BeginWhile {
                    id,
                    name,
                    content_name,
                    begin: self.compile_regex(begin_pat)?.0,
                    begin_captures,
                    while_,
                    while_has_backrefs,
                    while_captures,
                    patterns,
                    apply_end_pattern_last,
                    repository_stack,
                })
            } else if let Some(end_pat) = raw_rule.end {
                let (end, end_has_backrefs) = self.compile_regex(end_pat)?;
                let end_captures =
                    self.compile_captures(raw_rule.end_captures, repository_stack.clone())?;
                let patterns = self.compile_patterns(raw_rule.patterns, repository_stack.clone())?;
                Rule::BeginEnd(BeginEnd {
                    id,
                    name,
                    content_name,
                    begin: self.compile_regex(begin_pat)?.0,
                    begin_captures,
                    end,
                    end_has_backrefs,
                    end_captures,
                    patterns,
                    apply_end_pattern_last,
                    repository_stack,
                })
            } else {
                // `begin` without `while` or `end` is not valid, but
                // vscode-textmate treats it as an implicit `match` rather
                // than rejecting the grammar, so we do too.
                Rule::Match(Match {
                    id,
                    name,
                    regex_id: Some(self.compile_regex(begin_pat)?.0),
                    captures: begin_captures,
                    repository_stack,
                })
            }
        } else if !name.is_empty() && raw_rule.patterns.is_empty() && raw_rule.include.is_none() {
            // Scope-only rule: a capture entry whose span is the capture
            // group itself, with nothing further to match inside it.
            Rule::Match(Match {
                id,
                name,
                regex_id: None,
                captures: Vec::new(),
                repository_stack,
            })
        } else {
            // If `patterns` is empty but an `include` is present, the include
            // becomes the sole entry of `patterns`; if `patterns` is
            // non-empty, a sibling `include` is ignored outright.
            let patterns = if raw_rule.patterns.is_empty() {
                match raw_rule.include {
                    Some(include) => vec![RawRule {
                        include: Some(include),
                        ..Default::default()
                    }],
                    None => Vec::new(),
                }
            } else {
                raw_rule.patterns
            };

            if patterns.is_empty() {
                Rule::Noop
            } else {
                let compiled_patterns = self.compile_patterns(patterns, repository_stack.clone())?;
                Rule::IncludeOnly(IncludeOnly {
                    id,
                    name,
                    content_name,
                    repository_stack,
                    patterns: compiled_patterns,
                })
            }
        };

        self.rules[id.0 as usize] = rule;
        Ok(id)
    }

    fn compile_regex(&mut self, pattern: String) -> Result<(RegexId, bool)> {
        let regex_id = RegexId(self.regexes.len() as u16);
        let re = Regex::new(pattern);
        re.validate().map_err(Error::RegexCompile)?;
        let has_backrefs = re.has_backreferences();
        self.regexes.push(re);
        Ok((regex_id, has_backrefs))
    }

    fn compile_repository(
        &mut self,
        raw_repository: std::collections::BTreeMap<String, RawRule>,
        repository_stack: RepositoryStack,
    ) -> Result<RepositoryId> {
        let repo_id = RepositoryId(self.repositories.len() as u16);
        self.repositories.push(Repository::default());
        let stack = repository_stack.push(repo_id);

        let mut rules = HashMap::new();
        for (name, raw_rule) in raw_repository {
            rules.insert(name, self.compile_rule(raw_rule, stack.clone())?);
        }
        self.repositories[repo_id.0 as usize] = Repository(rules);

        Ok(repo_id)
    }

    fn compile_captures(
        &mut self,
        captures: Captures,
        repository_stack: RepositoryStack,
    ) -> Result<Vec<Option<RuleId>>> {
        if captures.is_empty() {
            return Ok(Vec::new());
        }

        // A handful of real grammars carry capture-group indices well into
        // the hundreds (conditional patterns with huge alternations), so the
        // table is sized to the largest index actually used rather than a
        // fixed small constant.
        let max_capture = captures.keys().max().copied().unwrap_or_default();
        let mut out: Vec<Option<RuleId>> = vec![None; max_capture + 1];

        for (key, rule) in captures.0 {
            out[key] = Some(self.compile_rule(rule, repository_stack.clone())?);
        }

        Ok(out)
    }

    fn compile_patterns(
        &mut self,
        rules: Vec<RawRule>,
        repository_stack: RepositoryStack,
    ) -> Result<Vec<RuleIdOrReference>> {
        let mut out = Vec::with_capacity(rules.len());
        for r in rules {
            if let Some(include) = r.include {
                out.push(RuleIdOrReference::Reference(include));
            } else {
                out.push(RuleIdOrReference::RuleId(
                    self.compile_rule(r, repository_stack.clone())?,
                ));
            }
        }
        Ok(out)
    }

    /// Build a combined searchable pattern set for a rule's children,
    /// resolving everything reachable within this grammar. References that
    /// name another grammar (or `$base`) are returned separately for the
    /// caller — the tokenizer, which has registry access — to expand.
    ///
    /// Uses an explicit work queue rather than recursion: `$self`-inclusion
    /// and repository cross-references mean the "include graph" is not a
    /// tree, and a handful of real grammars nest deeply enough that a
    /// recursive walk would be an awkward way to bound stack depth.
    pub fn flatten_patterns(
        &self,
        patterns: &[RuleIdOrReference],
        repos_chain: &RepositoryStack,
    ) -> (Vec<(RuleId, String)>, Vec<ExternalRef>) {
        let mut resolved = Vec::new();
        let mut external = Vec::new();
        let mut work: VecDeque<RuleIdOrReference> = patterns.iter().cloned().collect();
        // Guards against pathological grammars whose `IncludeOnly` containers
        // cycle back into themselves via `$self` or a self-referential
        // repository entry. Ordinary recursive grammars (e.g. nested
        // brackets) don't trip this: the recursive edge is always behind a
        // `Match`/`BeginEnd`/`BeginWhile` leaf, which isn't expanded here —
        // it's resolved lazily the next time that rule is entered.
        let mut expanded_containers = std::collections::HashSet::new();

        while let Some(item) = work.pop_front() {
            match item {
                RuleIdOrReference::RuleId(rule_id) => match self.rules.get(rule_id.0 as usize) {
                    Some(Rule::Match(m)) => {
                        if let Some(regex_id) = m.regex_id {
                            resolved.push((rule_id, self.regexes[regex_id.0 as usize].pattern().to_string()));
                        }
                    }
                    Some(Rule::BeginEnd(be)) => {
                        resolved.push((rule_id, self.regexes[be.begin.0 as usize].pattern().to_string()));
                    }
                    Some(Rule::BeginWhile(bw)) => {
                        resolved.push((rule_id, self.regexes[bw.begin.0 as usize].pattern().to_string()));
                    }
                    Some(Rule::IncludeOnly(io)) => {
                        if expanded_containers.insert(rule_id.0) {
                            work.extend(io.patterns.iter().cloned());
                        }
                    }
                    Some(Rule::Noop) | None => {}
                },
                RuleIdOrReference::Reference(reference) => match reference {
                    Reference::Self_ => {
                        if expanded_containers.insert(ROOT_RULE_ID.0) {
                            if let Some(Rule::IncludeOnly(root)) = self.rules.get(ROOT_RULE_ID.0 as usize) {
                                work.extend(root.patterns.iter().cloned());
                            }
                        }
                    }
                    Reference::Base => external.push(ExternalRef::Base),
                    Reference::Local(key) => {
                        if let Some(rule_id) = self.lookup_local(&key, repos_chain) {
                            work.push_back(RuleIdOrReference::RuleId(rule_id));
                        }
                        // Unknown local keys are silently dropped: the key
                        // may belong to a grammar-version skew we don't have
                        // visibility into; failing the whole tokenize call
                        // over one dangling include would be worse.
                    }
                    Reference::OtherComplete(scope) => external.push(ExternalRef::WholeGrammar(scope)),
                    Reference::OtherSpecific(scope, key) => {
                        external.push(ExternalRef::GrammarRule(scope, key))
                    }
                },
            }
        }

        (resolved, external)
    }

    /// Resolve a `#key` include against the repository chain in scope,
    /// innermost repository first.
    pub fn lookup_local(&self, key: &str, repos_chain: &RepositoryStack) -> Option<RuleId> {
        repos_chain
            .iter_innermost_first()
            .find_map(|repo_id| self.repositories[repo_id.0 as usize].get(key))
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0 as usize)
    }

    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id.0 as usize]
    }

    /// Build a [`PatternSet`] covering everything reachable purely within
    /// this grammar. Used for the common, no-cross-grammar-include case;
    /// the tokenizer falls back to the slower registry-aware path only when
    /// [`Self::flatten_patterns`] reports external references.
    pub fn pattern_set_for(
        &self,
        rule_id: RuleId,
        repos_chain: &RepositoryStack,
    ) -> (PatternSet, Vec<ExternalRef>) {
        let patterns: &[RuleIdOrReference] = match self.rules.get(rule_id.0 as usize) {
            Some(Rule::IncludeOnly(io)) => &io.patterns,
            Some(Rule::BeginEnd(be)) => &be.patterns,
            Some(Rule::BeginWhile(bw)) => &bw.patterns,
            _ => &[],
        };
        let (local, external) = self.flatten_patterns(patterns, repos_chain);
        let mut set = PatternSet::default();
        for (rule_id, pattern) in local {
            set.push_back(GlobalRuleRef::new(self.scope, rule_id), pattern);
        }
        (set, external)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> CompiledGrammar {
        let raw = RawGrammar::load_from_str(json).unwrap();
        CompiledGrammar::from_raw_grammar(raw).unwrap()
    }

    #[test]
    fn conflicting_match_and_begin_is_rejected() {
        let raw = RawGrammar::load_from_str(
            r#"{"name":"t","scopeName":"source.t","patterns":[{"match":"a","begin":"b","end":"c"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            CompiledGrammar::from_raw_grammar(raw),
            Err(Error::GrammarShape(_))
        ));
    }

    #[test]
    fn bare_begin_degrades_to_match() {
        let grammar = compile(
            r#"{"name":"t","scopeName":"source.t","patterns":[{"begin":"foo","name":"x"}]}"#,
        );
        match grammar.rule(RuleId(1)) {
            Some(Rule::Match(m)) => assert!(m.regex_id.is_some()),
            other => panic!("expected Match, got {other:?}"),
        }
    }

    #[test]
    fn include_with_sibling_patterns_is_ignored() {
        let grammar = compile(
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"patterns":[{"match":"a"}],"include":"#nope"}
            ]}"#,
        );
        match grammar.rule(RuleId(1)) {
            Some(Rule::IncludeOnly(io)) => assert_eq!(io.patterns.len(), 1),
            other => panic!("expected IncludeOnly with one pattern, got {other:?}"),
        }
    }

    #[test]
    fn local_repository_lookup_prefers_innermost() {
        let grammar = compile(
            r#"{"name":"t","scopeName":"source.t",
                "repository": {"x": {"match":"outer"}},
                "patterns":[{
                    "repository": {"x": {"match":"inner"}},
                    "patterns": [{"include":"#x"}]
                }]
            }"#,
        );
        let (resolved, external) = match grammar.rule(RuleId(1)) {
            Some(Rule::IncludeOnly(io)) => grammar.flatten_patterns(&io.patterns, &io.repository_stack),
            other => panic!("expected IncludeOnly, got {other:?}"),
        };
        assert!(external.is_empty());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1, "inner");
    }

    #[test]
    fn cross_grammar_reference_reported_as_external() {
        let grammar = compile(
            r#"{"name":"t","scopeName":"source.t","patterns":[{"include":"source.other#foo"}]}"#,
        );
        let (resolved, external) = match grammar.rule(ROOT_RULE_ID) {
            Some(Rule::IncludeOnly(io)) => {
                grammar.flatten_patterns(&io.patterns, &RepositoryStack::default())
            }
            _ => panic!("expected root IncludeOnly"),
        };
        assert!(resolved.is_empty());
        assert_eq!(
            external,
            vec![ExternalRef::GrammarRule("source.other".into(), "foo".into())]
        );
    }

    #[test]
    fn malformed_regex_is_rejected_at_compile_time() {
        let raw = RawGrammar::load_from_str(
            r#"{"name":"t","scopeName":"source.t","patterns":[{"match":"(unclosed","name":"x"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            CompiledGrammar::from_raw_grammar(raw),
            Err(Error::RegexCompile(_))
        ));
    }
}
