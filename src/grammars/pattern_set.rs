use std::cell::RefCell;
use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::error::{Error, Result};
use crate::grammars::{END_RULE_ID, GlobalRuleRef};

/// A single match produced by searching a [`PatternSet`]: which of the set's
/// patterns matched, where, and the offsets of every capture group it
/// carries.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub rule_ref: GlobalRuleRef,
    pub start: usize,
    pub end: usize,
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

impl PatternSetMatch {
    pub fn is_end_rule(&self) -> bool {
        self.rule_ref.rule == END_RULE_ID
    }

    pub fn has_advanced(&self) -> bool {
        self.end > self.start
    }
}

/// A batch of sibling patterns searched together through Oniguruma's
/// `RegSet`, which reports the single globally-nearest match across every
/// member pattern in one call.
///
/// That "nearest match" property is what lets the tokenizer implement
/// anchored-at-`pos` matching efficiently: if any pattern in the set matches
/// starting exactly at `pos`, that match is necessarily the set's nearest
/// match (nothing can start earlier than `pos` once the search begins
/// there), so checking `result.start == pos` after one [`PatternSet::find_at`]
/// call answers "does anything match anchored here" in one shot rather than
/// compiling and testing each pattern individually. And when
/// `result.start > pos`, no position between `pos` and `result.start` could
/// have produced a match (by the same earliest-match argument), so it is
/// safe to jump the tokenizer's cursor straight to `result.start` instead of
/// re-running the search one byte at a time.
pub struct PatternSet {
    rule_refs: Vec<GlobalRuleRef>,
    patterns: Vec<String>,
    regset: RefCell<Option<RegSet>>,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            rule_refs: Vec::new(),
            patterns: Vec::new(),
            regset: RefCell::new(None),
        }
    }
}

impl PartialEq for PatternSet {
    fn eq(&self, other: &Self) -> bool {
        self.patterns == other.patterns && self.rule_refs == other.rule_refs
    }
}

impl Eq for PatternSet {}

impl PatternSet {
    pub fn new(items: Vec<(GlobalRuleRef, String)>) -> Self {
        let (rule_refs, patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        Self {
            rule_refs,
            patterns,
            regset: RefCell::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn push_back(&mut self, rule_ref: GlobalRuleRef, pat: String) {
        self.rule_refs.push(rule_ref);
        self.patterns.push(pat);
        self.clear_regset();
    }

    pub fn push_front(&mut self, rule_ref: GlobalRuleRef, pat: String) {
        self.rule_refs.insert(0, rule_ref);
        self.patterns.insert(0, pat);
        self.clear_regset();
    }

    /// Replace the pattern at the front, returning whether it actually
    /// changed (and so invalidated the compiled `RegSet`).
    pub fn update_pat_front(&mut self, pat: &str) -> bool {
        debug_assert!(!self.patterns.is_empty());
        if self.patterns[0] == pat {
            false
        } else {
            self.patterns[0] = pat.to_string();
            self.clear_regset();
            true
        }
    }

    /// Replace the pattern at the back (used to install the `END_RULE_ID`
    /// sentinel once the end/while regex has had its backreferences
    /// substituted for the current begin match).
    pub fn update_pat_back(&mut self, pat: &str) -> bool {
        debug_assert!(!self.patterns.is_empty());
        let last = self.patterns.last_mut().expect("checked non-empty above");
        if last.as_str() == pat {
            return false;
        }
        *last = pat.to_string();
        self.clear_regset();
        true
    }

    pub fn clear_regset(&mut self) {
        self.regset.borrow_mut().take();
    }

    /// Append another pattern set's entries onto this one, e.g. to splice in
    /// the rules reachable through a cross-grammar `include`.
    pub fn extend_from(&mut self, other: PatternSet) {
        self.rule_refs.extend(other.rule_refs);
        self.patterns.extend(other.patterns);
        self.clear_regset();
    }

    /// Search for the nearest match across every pattern in the set,
    /// starting no earlier than `pos`. `options` carries the `\A`/`\G`
    /// anchor flags appropriate to the current position (see
    /// [`crate::tokenizer::anchors::AnchorActive`]).
    pub fn find_at(&self, text: &str, pos: usize, options: SearchOptions) -> Result<Option<PatternSetMatch>> {
        if self.patterns.is_empty() {
            return Ok(None);
        }

        if self.regset.borrow().is_none() {
            let pattern_strs: Vec<&str> = self.patterns.iter().map(|s| s.as_str()).collect();
            let regset = RegSet::with_options(&pattern_strs, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
                .map_err(|e| {
                    Error::RegexCompile(format!(
                        "failed to compile pattern set of {} patterns: {e:?}",
                        pattern_strs.len()
                    ))
                })?;
            *self.regset.borrow_mut() = Some(regset);
        }

        let regset_ref = self.regset.borrow();
        let regset = regset_ref.as_ref().expect("just compiled above");

        let found = regset.captures_with_encoding(text, pos, text.len(), onig::RegSetLead::Position, options);
        let Some((pattern_index, captures)) = found else {
            return Ok(None);
        };
        let Some((match_start, match_end)) = captures.pos(0) else {
            return Ok(None);
        };

        let capture_pos = (0..captures.len()).map(|i| captures.pos(i)).collect();
        Ok(Some(PatternSetMatch {
            rule_ref: self.rule_refs[pattern_index],
            start: match_start,
            end: match_end,
            capture_pos,
        }))
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let all: Vec<_> = self
            .patterns
            .iter()
            .zip(self.rule_refs.iter())
            .map(|(pat, rule_ref)| format!("  - {:?}: {pat}", rule_ref.rule))
            .collect();
        write!(f, "{}", all.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    fn rref(rule: u16) -> GlobalRuleRef {
        GlobalRuleRef::new(Scope::new("source.test")[0], crate::grammars::RuleId(rule))
    }

    #[test]
    fn find_at_returns_nearest_match_across_patterns() {
        let set = PatternSet::new(vec![
            (rref(1), "bar".to_string()),
            (rref(2), "foo".to_string()),
        ]);
        let result = set
            .find_at("xxfooyybar", 0, SearchOptions::SEARCH_OPTION_NONE)
            .unwrap()
            .unwrap();
        assert_eq!(result.rule_ref, rref(2));
        assert_eq!((result.start, result.end), (2, 5));
    }

    #[test]
    fn find_at_respects_start_position() {
        let set = PatternSet::new(vec![(rref(1), "foo".to_string())]);
        assert!(
            set.find_at("foofoo", 1, SearchOptions::SEARCH_OPTION_NONE)
                .unwrap()
                .is_some()
        );
        assert_eq!(
            set.find_at("foofoo", 1, SearchOptions::SEARCH_OPTION_NONE)
                .unwrap()
                .unwrap()
                .start,
            3
        );
    }

    #[test]
    fn empty_set_never_matches() {
        let set = PatternSet::default();
        assert!(set.find_at("anything", 0, SearchOptions::SEARCH_OPTION_NONE).unwrap().is_none());
    }
}
