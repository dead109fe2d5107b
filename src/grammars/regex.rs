use std::fmt;
use std::sync::{Arc, OnceLock};

use onig::{Region, SearchOptions};

/// One successful match against a [`Regex`], including the offsets of every
/// capture group that participated. A `None` entry means that group did not
/// participate in this particular match (e.g. the losing side of an
/// alternation), which the capture resolver must treat as "emit nothing for
/// this group," not as an empty-string match.
#[derive(Debug, Clone)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    /// Index 0 is the whole match; 1.. are the numbered groups.
    pub groups: Vec<Option<(usize, usize)>>,
}

impl Match {
    pub fn group(&self, index: usize) -> Option<(usize, usize)> {
        self.groups.get(index).copied().flatten()
    }
}

/// A lazily-compiled Oniguruma pattern. Patterns are stored as plain strings
/// until first use (most rules in a grammar are never exercised by a given
/// input), and compilation failures are cached rather than retried.
pub struct Regex {
    pattern: String,
    compiled: OnceLock<Option<Arc<onig::Regex>>>,
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        Regex::new(self.pattern.clone())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            pattern,
            compiled: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn compiled(&self) -> Option<&Arc<onig::Regex>> {
        self.compiled
            .get_or_init(|| onig::Regex::new(&self.pattern).ok().map(Arc::new))
            .as_ref()
    }

    /// Compile eagerly and report failure, used at grammar-load time so a
    /// malformed pattern is caught before it's ever searched.
    pub fn validate(&self) -> Result<(), String> {
        onig::Regex::new(&self.pattern)
            .map(|_| ())
            .map_err(|err| err.description().to_string())
    }

    pub fn has_backreferences(&self) -> bool {
        (1..=9).any(|i| self.pattern.contains(&format!("\\{i}")))
    }

    /// Search `text` for a match, with Oniguruma's `start`/`range` machinery
    /// rather than byte-slicing, so lookbehind assertions before `start` are
    /// still visible to the engine.
    pub fn search(&self, text: &str, start: usize, options: SearchOptions) -> Option<Match> {
        let regex = self.compiled()?;
        let mut region = Region::new();
        let pos = regex.search_with_options(text, start, text.len(), options, Some(&mut region))?;
        let groups = (0..region.len())
            .map(|i| region.pos(i))
            .collect::<Vec<_>>();
        let (_, end) = groups[0]?;
        Some(Match {
            start: pos,
            end,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_reports_group_offsets_and_absent_groups() {
        let regex = Regex::new(r"(foo)|(bar)".to_string());
        let m = regex.search("xxbar", 0, SearchOptions::SEARCH_OPTION_NONE).unwrap();
        assert_eq!(m.start, 2);
        assert_eq!(m.end, 5);
        assert_eq!(m.group(1), None);
        assert_eq!(m.group(2), Some((2, 5)));
    }

    #[test]
    fn has_backreferences_detects_digit_escapes() {
        assert!(Regex::new(r"(\w+)\s+\1".to_string()).has_backreferences());
        assert!(!Regex::new(r"\w+\s+\w+".to_string()).has_backreferences());
    }

    #[test]
    fn validate_surfaces_compile_errors() {
        assert!(Regex::new(r"(unclosed".to_string()).validate().is_err());
        assert!(Regex::new(r"closed".to_string()).validate().is_ok());
    }
}
