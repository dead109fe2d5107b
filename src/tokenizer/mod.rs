//! The tokenizer: walks a grammar's rule graph against a line of text,
//! maintaining the open `BeginEnd`/`BeginWhile` stack across lines. The
//! approach follows <https://github.com/microsoft/vscode-textmate>, with one
//! deliberate deviation: matching is defined as "does this pattern match
//! anchored exactly at the cursor," simulated efficiently (not literally
//! byte-by-byte — see [`crate::grammars::pattern_set::PatternSet::find_at`])
//! rather than vscode-textmate's "find the nearest match anywhere ahead."

pub mod anchors;
pub mod backref;
pub mod stack;

use std::collections::HashSet;

use crate::error::Result;
use crate::grammars::compiled::{BeginEnd, BeginWhile, ExternalRef, Match, RepositoryStack, RuleIdOrReference};
use crate::grammars::pattern_set::{PatternSet, PatternSetMatch};
use crate::grammars::{CompiledGrammar, GlobalRuleRef, Rule, RuleId, END_RULE_ID, ROOT_RULE_ID};
use crate::registry::Registry;
use crate::scope::Scope;
use anchors::AnchorActive;
use stack::{StackFrame, StateStack};

/// Caps how many grammar-to-grammar hops a `$base`/cross-grammar `include`
/// chain may take before we stop expanding it. Guards against two grammars
/// that include each other forming an unbounded expansion; real grammar
/// graphs are never more than a couple of hops deep.
const MAX_EXTERNAL_DEPTH: usize = 8;

/// A half-open byte range of a line and the full scope stack active across
/// it, outermost scope first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte offset of the token's first byte within the line.
    pub start: usize,
    /// Byte offset one past the token's last byte.
    pub end: usize,
    /// Scope stack active over this span, outermost first.
    pub scopes: Vec<Scope>,
}

/// Per-document tokenization state. Construct one per file (or other
/// independently-tokenized unit) and feed it lines in order; the open-rule
/// stack carries state across the [`Self::tokenize_line`] calls.
pub struct Tokenizer {
    stack: StateStack,
    root_scope: Scope,
    is_first_line: bool,
}

impl Tokenizer {
    /// Start tokenizing a new document against `grammar_scope`'s root rule.
    pub fn new(grammar_scope: Scope) -> Self {
        Self {
            stack: StateStack::new(grammar_scope),
            root_scope: grammar_scope,
            is_first_line: true,
        }
    }

    /// How many `BeginEnd`/`BeginWhile` rules are currently open, plus the
    /// root frame. Mostly useful for tests and diagnostics.
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Tokenize one line of input (no trailing `\n`). Mutates the internal
    /// rule stack in place, so lines must be fed in document order.
    pub fn tokenize_line(&mut self, registry: &Registry, line: &str) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        let pos = self.process_while_rules(registry, line, &mut tokens)?;
        self.process_line(registry, line, pos, &mut tokens)?;

        let captured_eol = self.stack.top().begin_rule_has_captured_eol;
        self.stack.reset_for_new_line();
        if captured_eol {
            self.stack.top_mut().anchor_position = Some(0);
        }
        self.is_first_line = false;

        Ok(tokens)
    }

    /// Tokenize a whole block of text at once, starting from a fresh stack
    /// and threading it line-by-line. A convenience over repeated
    /// [`Self::tokenize_line`] calls for callers that don't need to persist
    /// the stack across their own I/O boundaries.
    pub fn tokenize_block(registry: &Registry, grammar_scope: Scope, text: &str) -> Result<Vec<Vec<Token>>> {
        let mut tokenizer = Self::new(grammar_scope);
        text.split('\n').map(|line| tokenizer.tokenize_line(registry, line)).collect()
    }

    /// The line-prefix pass for `BeginWhile` rules (see module docs):
    /// before any ordinary matching happens, every open while-rule on the
    /// stack gets one chance to re-confirm its condition at the start of
    /// the new line. The first one that fails — and everything nested
    /// inside it — is popped. Returns the position the prefix pass advanced
    /// to, so the main loop picks up from there instead of re-covering the
    /// while markers it already emitted.
    fn process_while_rules(&mut self, registry: &Registry, line: &str, tokens: &mut Vec<Token>) -> Result<usize> {
        let mut pos = 0usize;
        let mut idx = 1usize; // frame 0 is the grammar root, never a while-rule

        while idx < self.stack.frames.len() {
            let frame = self.stack.frames[idx].clone();
            let grammar = registry.require(&frame.rule_ref.grammar.build_string())?;

            let Some(Rule::BeginWhile(bw)) = grammar.rule(frame.rule_ref.rule) else {
                idx += 1;
                continue;
            };

            let while_pattern = frame
                .end_pattern
                .clone()
                .unwrap_or_else(|| grammar.regex(bw.while_).pattern().to_string());
            let anchor = AnchorActive::new(self.is_first_line, frame.anchor_position, pos);
            let probe = crate::grammars::Regex::new(while_pattern);

            match probe.search(line, pos, anchor.to_search_options()) {
                Some(m) if m.start == pos => {
                    let mut base = frame.content_scopes.clone();
                    base.extend(bw.name.iter().copied());
                    self.resolve_captures(registry, &grammar, &bw.while_captures, &base, line, &m.groups, tokens)?;
                    pos = m.end;
                    idx += 1;
                }
                _ => {
                    self.stack.frames.truncate(idx);
                    break;
                }
            }
        }

        Ok(pos)
    }

    /// The main per-line matching loop, starting at `start_pos` (the
    /// position the while-prefix pass left off at).
    fn process_line(&mut self, registry: &Registry, line: &str, start_pos: usize, tokens: &mut Vec<Token>) -> Result<()> {
        let mut pos = start_pos;
        let mut stalled = false;

        loop {
            if pos > line.len() {
                break;
            }

            let frame = self.stack.top().clone();
            let grammar = registry.require(&frame.rule_ref.grammar.build_string())?;
            let pattern_set = self.build_pattern_set(registry, &grammar, &frame)?;

            if pattern_set.is_empty() {
                if pos < line.len() {
                    self.emit_plain(tokens, &frame, line, pos, line.len());
                }
                break;
            }

            let anchor = AnchorActive::new(self.is_first_line, frame.anchor_position, pos);
            let found = pattern_set.find_at(line, pos, anchor.to_search_options())?;

            let Some(m) = found else {
                if pos < line.len() {
                    self.emit_plain(tokens, &frame, line, pos, line.len());
                }
                break;
            };

            // `m.start` is the global-nearest match across the whole set,
            // so nothing between `pos` and `m.start` could have matched —
            // jump there directly instead of retrying one byte at a time.
            if m.start > pos {
                self.emit_plain(tokens, &frame, line, pos, m.start);
            }

            let pos_before = pos;

            if m.is_end_rule() {
                self.handle_end_match(registry, &frame, line, &m, tokens)?;
            } else {
                self.handle_child_match(registry, &frame, line, &m, tokens)?;
            }

            pos = m.end.max(m.start);

            if pos == pos_before {
                if stalled {
                    // Non-advancing-match guard (vscode-textmate issue #12):
                    // a zero-width match fired twice in a row at the same
                    // position without the cursor moving. Force one byte of
                    // progress under the current scope chain rather than
                    // spin forever.
                    if pos >= line.len() {
                        break;
                    }
                    let current = self.stack.top().clone();
                    self.emit_plain(tokens, &current, line, pos, pos + 1);
                    pos += 1;
                    stalled = false;
                } else {
                    stalled = true;
                }
            } else {
                stalled = false;
            }
        }

        Ok(())
    }

    fn emit_plain(&self, tokens: &mut Vec<Token>, frame: &StackFrame, _line: &str, start: usize, end: usize) {
        if end > start {
            tokens.push(Token {
                start,
                end,
                scopes: frame.content_scopes.clone(),
            });
        }
    }

    /// Build the combined pattern set to search against for the current
    /// frame: its children (recursively flattened within its own grammar,
    /// plus anything reachable through cross-grammar includes), with the
    /// frame's own end pattern spliced in as a sentinel when it's a
    /// `BeginEnd` rule (ordered first unless `applyEndPatternLast`, so ties
    /// resolve the way vscode-textmate's priority rules require).
    fn build_pattern_set(&self, registry: &Registry, grammar: &CompiledGrammar, frame: &StackFrame) -> Result<PatternSet> {
        let rule_id = frame.rule_ref.rule;

        if rule_id == ROOT_RULE_ID {
            let Some(Rule::IncludeOnly(root)) = grammar.rule(ROOT_RULE_ID) else {
                return Ok(PatternSet::default());
            };
            let (mut set, externals) = grammar.pattern_set_for(ROOT_RULE_ID, &root.repository_stack);
            self.expand_externals(registry, externals, 0, &mut set)?;
            return Ok(set);
        }

        match grammar.rule(rule_id) {
            Some(Rule::BeginEnd(be)) => {
                let (mut set, externals) = grammar.pattern_set_for(rule_id, &be.repository_stack);
                self.expand_externals(registry, externals, 0, &mut set)?;

                let end_pattern = frame
                    .end_pattern
                    .clone()
                    .unwrap_or_else(|| grammar.regex(be.end).pattern().to_string());
                let end_ref = GlobalRuleRef::new(frame.rule_ref.grammar, END_RULE_ID);
                if be.apply_end_pattern_last {
                    set.push_back(end_ref, end_pattern);
                } else {
                    set.push_front(end_ref, end_pattern);
                }
                Ok(set)
            }
            Some(Rule::BeginWhile(bw)) => {
                let (mut set, externals) = grammar.pattern_set_for(rule_id, &bw.repository_stack);
                self.expand_externals(registry, externals, 0, &mut set)?;
                Ok(set)
            }
            _ => Ok(PatternSet::default()),
        }
    }

    fn expand_externals(&self, registry: &Registry, externals: Vec<ExternalRef>, depth: usize, out: &mut PatternSet) -> Result<()> {
        if depth >= MAX_EXTERNAL_DEPTH {
            return Ok(());
        }

        for external in externals {
            match external {
                ExternalRef::Base => {
                    if let Some(grammar) = registry.get_by_scope(self.root_scope) {
                        self.expand_whole_grammar(registry, &grammar, depth, out)?;
                    }
                    // A missing base grammar is tolerated: the tokenizer
                    // may have been handed a stack whose root scope was
                    // never registered with this registry instance.
                }
                ExternalRef::WholeGrammar(scope_name) => {
                    if let Some(grammar) = registry.get(&scope_name) {
                        self.expand_whole_grammar(registry, &grammar, depth, out)?;
                    }
                    #[cfg(feature = "debug")]
                    if registry.get(&scope_name).is_none() {
                        log::debug!("include referenced unknown grammar '{scope_name}'");
                    }
                }
                ExternalRef::GrammarRule(scope_name, key) => {
                    if let Some(grammar) = registry.get(&scope_name) {
                        // Only the target grammar's top-level repository is
                        // consulted: a `scope#key` include has no way to
                        // express which nested repository it means, and
                        // real-world grammars keep reusable includes at the
                        // top level precisely so other grammars can reach
                        // them this way.
                        if let Some(Rule::IncludeOnly(root)) = grammar.rule(ROOT_RULE_ID) {
                            if let Some(rule_id) = grammar.lookup_local(&key, &root.repository_stack) {
                                let (local, nested_externals) = grammar.flatten_patterns(
                                    &[RuleIdOrReference::RuleId(rule_id)],
                                    &root.repository_stack,
                                );
                                for (rid, pattern) in local {
                                    out.push_back(GlobalRuleRef::new(grammar.scope, rid), pattern);
                                }
                                self.expand_externals(registry, nested_externals, depth + 1, out)?;
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn expand_whole_grammar(&self, registry: &Registry, grammar: &CompiledGrammar, depth: usize, out: &mut PatternSet) -> Result<()> {
        let Some(Rule::IncludeOnly(root)) = grammar.rule(ROOT_RULE_ID) else {
            return Ok(());
        };
        let (set, externals) = grammar.pattern_set_for(ROOT_RULE_ID, &root.repository_stack);
        out.extend_from(set);
        self.expand_externals(registry, externals, depth + 1, out)
    }

    fn handle_child_match(&mut self, registry: &Registry, frame: &StackFrame, line: &str, m: &PatternSetMatch, tokens: &mut Vec<Token>) -> Result<()> {
        let target_grammar = registry.require(&m.rule_ref.grammar.build_string())?;

        match target_grammar.rule(m.rule_ref.rule) {
            Some(Rule::Match(mr)) => {
                let mut base = frame.content_scopes.clone();
                base.extend(mr.name.iter().copied());
                self.resolve_captures(registry, &target_grammar, &mr.captures, &base, line, &m.capture_pos, tokens)?;
            }
            Some(Rule::BeginEnd(be)) => {
                self.push_begin_end(registry, &target_grammar, frame, m, be.clone(), line, tokens)?;
            }
            Some(Rule::BeginWhile(bw)) => {
                self.push_begin_while(registry, &target_grammar, frame, m, bw.clone(), line, tokens)?;
            }
            Some(Rule::IncludeOnly(_)) | Some(Rule::Noop) | None => {
                // flatten_patterns never surfaces these as matchable leaves
            }
        }

        Ok(())
    }

    fn push_begin_end(&mut self, registry: &Registry, grammar: &CompiledGrammar, frame: &StackFrame, m: &PatternSetMatch, be: BeginEnd, line: &str, tokens: &mut Vec<Token>) -> Result<()> {
        let mut name_scopes = frame.content_scopes.clone();
        name_scopes.extend(be.name.iter().copied());
        let mut content_scopes = name_scopes.clone();
        content_scopes.extend(be.content_name.iter().copied());

        self.resolve_captures(registry, grammar, &be.begin_captures, &name_scopes, line, &m.capture_pos, tokens)?;

        let end_pattern = if be.end_has_backrefs {
            backref::substitute_backreferences(grammar.regex(be.end).pattern(), line, &m.capture_pos)
        } else {
            grammar.regex(be.end).pattern().to_string()
        };

        let captured_eol = m.end == line.len();
        self.stack.push_frame(
            m.rule_ref,
            name_scopes,
            content_scopes,
            Some(m.end),
            captured_eol,
            Some(m.start),
            Some(line.to_string()),
            m.capture_pos.clone(),
        );
        self.stack.set_end_pattern(end_pattern);

        Ok(())
    }

    fn push_begin_while(&mut self, registry: &Registry, grammar: &CompiledGrammar, frame: &StackFrame, m: &PatternSetMatch, bw: BeginWhile, line: &str, tokens: &mut Vec<Token>) -> Result<()> {
        let mut name_scopes = frame.content_scopes.clone();
        name_scopes.extend(bw.name.iter().copied());
        let mut content_scopes = name_scopes.clone();
        content_scopes.extend(bw.content_name.iter().copied());

        self.resolve_captures(registry, grammar, &bw.begin_captures, &name_scopes, line, &m.capture_pos, tokens)?;

        let while_pattern = if bw.while_has_backrefs {
            backref::substitute_backreferences(grammar.regex(bw.while_).pattern(), line, &m.capture_pos)
        } else {
            grammar.regex(bw.while_).pattern().to_string()
        };

        let captured_eol = m.end == line.len();
        self.stack.push_frame(
            m.rule_ref,
            name_scopes,
            content_scopes,
            Some(m.end),
            captured_eol,
            Some(m.start),
            Some(line.to_string()),
            m.capture_pos.clone(),
        );
        self.stack.set_end_pattern(while_pattern);

        Ok(())
    }

    fn handle_end_match(&mut self, registry: &Registry, frame: &StackFrame, line: &str, m: &PatternSetMatch, tokens: &mut Vec<Token>) -> Result<()> {
        let grammar = registry.require(&frame.rule_ref.grammar.build_string())?;
        if let Some(Rule::BeginEnd(be)) = grammar.rule(frame.rule_ref.rule) {
            self.resolve_captures(registry, &grammar, &be.end_captures, &frame.name_scopes, line, &m.capture_pos, tokens)?;
        }
        self.stack.pop();
        Ok(())
    }

    /// Resolve a rule's capture table against one match, emitting tokens for
    /// every byte of `[mat_start, mat_end)` (the whole match span, taken
    /// from `groups[0]`).
    ///
    /// Capture groups are walked in ascending index order with an
    /// open-capture stack of `(end_offset, scopes)`: each group's start is
    /// clamped to the furthest point already emitted, closed groups are
    /// popped (emitting their span) before a new one is opened, and a
    /// group's end is clamped to its parent's end so a capture that
    /// overruns its enclosing group (possible with lookahead-heavy patterns)
    /// never produces overlapping tokens.
    #[allow(clippy::too_many_arguments)]
    fn resolve_captures(
        &self,
        registry: &Registry,
        grammar: &CompiledGrammar,
        captures: &[Option<RuleId>],
        base_scopes: &[Scope],
        line: &str,
        groups: &[Option<(usize, usize)>],
        tokens: &mut Vec<Token>,
    ) -> Result<()> {
        let Some((mat_start, mat_end)) = groups.first().copied().flatten() else {
            return Ok(());
        };

        if captures.is_empty() {
            if mat_end > mat_start {
                tokens.push(Token {
                    start: mat_start,
                    end: mat_end,
                    scopes: base_scopes.to_vec(),
                });
            }
            return Ok(());
        }

        let mut cursor = mat_start;
        let mut open: Vec<(usize, Vec<Scope>)> = Vec::new();

        let emit = |tokens: &mut Vec<Token>, cursor: &mut usize, open: &[(usize, Vec<Scope>)], upto: usize| {
            if upto > *cursor {
                let mut scopes = base_scopes.to_vec();
                for (_, s) in open {
                    scopes.extend(s.iter().copied());
                }
                tokens.push(Token { start: *cursor, end: upto, scopes });
                *cursor = upto;
            }
        };

        for (index, rule_id) in captures.iter().enumerate() {
            let Some(rule_id) = rule_id else { continue };
            let Some((raw_start, raw_end)) = groups.get(index).copied().flatten() else {
                continue; // group didn't participate in this match
            };

            let start = raw_start.max(cursor);

            while let Some(&(end, _)) = open.last() {
                if end <= start {
                    emit(tokens, &mut cursor, &open, end);
                    open.pop();
                } else {
                    break;
                }
            }
            emit(tokens, &mut cursor, &open, start);

            let parent_bound = open.last().map(|(end, _)| *end).unwrap_or(mat_end);
            let end = raw_end.min(parent_bound);
            if end < start {
                continue;
            }

            let scopes = match grammar.rule(*rule_id) {
                Some(Rule::Match(Match { name, .. })) => name.clone(),
                Some(Rule::IncludeOnly(io)) => io.name.clone(),
                Some(Rule::BeginEnd(be)) => be.name.clone(),
                Some(Rule::BeginWhile(bw)) => bw.name.clone(),
                _ => Vec::new(),
            };

            // A capture whose rule carries its own nested `patterns` gets
            // tokenized recursively within its span — this is how grammars
            // express "this capture group is itself source code," e.g. a
            // format-string placeholder. Cross-grammar includes inside a
            // capture are not followed; in practice nested capture patterns
            // only ever reference rules from the same grammar.
            if let Some(Rule::IncludeOnly(io)) = grammar.rule(*rule_id) {
                if !io.patterns.is_empty() && end > start {
                    let mut nested_base = base_scopes.to_vec();
                    for (_, s) in &open {
                        nested_base.extend(s.iter().copied());
                    }
                    nested_base.extend(scopes.iter().copied());
                    self.tokenize_nested(registry, grammar, &io.patterns, &io.repository_stack, line, start, end, &nested_base, tokens)?;
                    cursor = end;
                    continue;
                }
            }

            open.push((end, scopes));
        }

        while let Some(&(end, _)) = open.last() {
            emit(tokens, &mut cursor, &open, end);
            open.pop();
        }
        emit(tokens, &mut cursor, &open, mat_end);

        Ok(())
    }

    /// A bounded, stateless re-tokenization of `[start, end)` against a
    /// fixed pattern list — used for captures that carry their own nested
    /// `patterns`. Unlike the main loop, this never opens a `BeginEnd`
    /// stack frame: a `BeginEnd`/`BeginWhile` rule reached this way is
    /// matched once, on its `begin` pattern only, same as a `Match` rule.
    #[allow(clippy::too_many_arguments)]
    fn tokenize_nested(
        &self,
        registry: &Registry,
        grammar: &CompiledGrammar,
        patterns: &[RuleIdOrReference],
        repos_chain: &RepositoryStack,
        line: &str,
        start: usize,
        end: usize,
        base_scopes: &[Scope],
        tokens: &mut Vec<Token>,
    ) -> Result<()> {
        let (local, _external) = grammar.flatten_patterns(patterns, repos_chain);
        if local.is_empty() {
            if end > start {
                tokens.push(Token { start, end, scopes: base_scopes.to_vec() });
            }
            return Ok(());
        }

        let mut set = PatternSet::default();
        for (rule_id, pattern) in local {
            set.push_back(GlobalRuleRef::new(grammar.scope, rule_id), pattern);
        }

        let mut pos = start;
        let mut seen_positions = HashSet::new();
        while pos < end {
            if !seen_positions.insert(pos) {
                break; // guard against a degenerate zero-width loop
            }
            let Some(m) = set.find_at(line, pos, onig::SearchOptions::SEARCH_OPTION_NONE)? else {
                break;
            };
            if m.start >= end {
                break;
            }
            if m.start > pos {
                tokens.push(Token { start: pos, end: m.start, scopes: base_scopes.to_vec() });
            }
            let clamped_end = m.end.min(end);

            let captures = match grammar.rule(m.rule_ref.rule) {
                Some(Rule::Match(mr)) => Some((&mr.captures, mr.name.clone())),
                Some(Rule::BeginEnd(be)) => Some((&be.begin_captures, be.name.clone())),
                Some(Rule::BeginWhile(bw)) => Some((&bw.begin_captures, bw.name.clone())),
                _ => None,
            };
            if let Some((captures, name)) = captures {
                let mut nested_base = base_scopes.to_vec();
                nested_base.extend(name);
                let mut groups = m.capture_pos.clone();
                if let Some(slot) = groups.first_mut() {
                    *slot = Some((m.start, clamped_end));
                } else {
                    groups.push(Some((m.start, clamped_end)));
                }
                self.resolve_captures(registry, grammar, captures, &nested_base, line, &groups, tokens)?;
            }

            if clamped_end <= pos {
                pos += 1;
            } else {
                pos = clamped_end;
            }
        }

        if pos < end {
            tokens.push(Token { start: pos, end, scopes: base_scopes.to_vec() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn grammar_scope(registry: &Registry, json: &str) -> Scope {
        registry.add_grammar_from_str(json).unwrap()
    }

    #[test]
    fn tokenizes_simple_match() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"match":"\\d+","name":"constant.numeric.t"}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        let tokens = tok.tokenize_line(&registry, "abc 123 def").unwrap();
        let numeric = tokens.iter().find(|t| t.start == 4 && t.end == 7).unwrap();
        assert!(numeric.scopes.iter().any(|s| s.build_string() == "constant.numeric.t"));
    }

    #[test]
    fn begin_end_pushes_and_pops_across_lines() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"begin":"/\\*","end":"\\*/","name":"comment.block.t"}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        tok.tokenize_line(&registry, "/* start").unwrap();
        assert_eq!(tok.stack_depth(), 2);
        tok.tokenize_line(&registry, "still inside").unwrap();
        assert_eq!(tok.stack_depth(), 2);
        tok.tokenize_line(&registry, "end */ after").unwrap();
        assert_eq!(tok.stack_depth(), 1);
    }

    #[test]
    fn begin_end_interior_carries_the_region_name_scope() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"begin":"\"","end":"\"","name":"str","patterns":[]}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        let tokens = tok.tokenize_line(&registry, "x \"y\" z").unwrap();
        let interior = tokens.iter().find(|t| t.start == 3 && t.end == 4).unwrap();
        assert_eq!(interior.scopes.iter().map(|s| s.build_string()).collect::<Vec<_>>(), vec!["source.t", "str"]);
    }

    #[test]
    fn begin_end_interior_adds_content_name_on_top_of_region_name() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"begin":"\"","end":"\"","name":"str","contentName":"str.inside","patterns":[]}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        let tokens = tok.tokenize_line(&registry, "x \"y\" z").unwrap();
        let interior = tokens.iter().find(|t| t.start == 3 && t.end == 4).unwrap();
        assert_eq!(
            interior.scopes.iter().map(|s| s.build_string()).collect::<Vec<_>>(),
            vec!["source.t", "str", "str.inside"]
        );
    }

    #[test]
    fn backreference_end_pattern_uses_begin_capture() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"begin":"<(\\w+)>","end":"</\\1>","name":"meta.tag.t"}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        tok.tokenize_line(&registry, "<foo>body</foo>").unwrap();
        assert_eq!(tok.stack_depth(), 1);
    }

    #[test]
    fn non_advancing_match_does_not_hang() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"match":"","name":"meta.empty.t"}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        let tokens = tok.tokenize_line(&registry, "abc").unwrap();
        assert!(!tokens.is_empty());
    }

    #[test]
    fn while_rule_closes_when_condition_fails() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"begin":"^\\s*#","while":"^\\s*#","name":"meta.preproc.t"}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        tok.tokenize_line(&registry, "# line one").unwrap();
        assert_eq!(tok.stack_depth(), 2);
        tok.tokenize_line(&registry, "# line two").unwrap();
        assert_eq!(tok.stack_depth(), 2);
        tok.tokenize_line(&registry, "not a comment").unwrap();
        assert_eq!(tok.stack_depth(), 1);
    }

    #[test]
    fn tokenize_block_threads_stack_across_lines() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"begin":"/\\*","end":"\\*/","name":"comment.block.t"}
            ]}"#,
        );
        let lines = Tokenizer::tokenize_block(&registry, scope, "/* start\nstill inside\nend */ after").unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].iter().any(|t| t.scopes.iter().any(|s| s.build_string() == "comment.block.t")));
        assert!(lines[2].iter().any(|t| t.scopes.iter().all(|s| s.build_string() != "comment.block.t")));
    }

    #[test]
    fn captures_apply_nested_scopes_without_overlap() {
        let registry = Registry::new();
        let scope = grammar_scope(
            &registry,
            r#"{"name":"t","scopeName":"source.t","patterns":[
                {"match":"(foo)(bar)","captures":{
                    "1":{"name":"keyword.t"},
                    "2":{"name":"entity.t"}
                }}
            ]}"#,
        );
        let mut tok = Tokenizer::new(scope);
        let tokens = tok.tokenize_line(&registry, "foobar").unwrap();
        assert!(tokens.iter().any(|t| t.scopes.iter().any(|s| s.build_string() == "keyword.t")));
        assert!(tokens.iter().any(|t| t.scopes.iter().any(|s| s.build_string() == "entity.t")));
    }
}
