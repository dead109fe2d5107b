//! Backreference substitution for `end`/`while` patterns: `\1`..`\9` are
//! replaced with the literal text captured by the corresponding group in the
//! rule's `begin` match, each escaped so it can't be reinterpreted as regex
//! syntax once spliced into the new pattern.

/// Characters that need escaping once a captured literal is spliced into a
/// new pattern, so it is matched as literal text rather than parsed as regex
/// syntax.
const METACHARACTERS: &[char] = &[
    '\\', '|', '.', '*', '+', '?', '^', '$', '-', ':', '~', '#', '&', '(', ')', '[', ']', '{',
    '}', '<', '>', '\'',
];

fn escape_literal(text: &str, out: &mut String) {
    for ch in text.chars() {
        if METACHARACTERS.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Substitute `\1`..`\9` in `pattern` with the text the corresponding group
/// captured in `line[begin_match_start..]`, per `captures` (group 0 is the
/// whole match; absent groups substitute to an empty string, matching
/// vscode-textmate). Any other escape sequence in `pattern` is passed
/// through untouched.
pub fn substitute_backreferences(pattern: &str, line: &str, captures: &[Option<(usize, usize)>]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let bytes = pattern.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'\\' {
            // An escaped backslash is consumed as one unit so the character
            // after it is never mistaken for the start of a new escape —
            // `\\1` is a literal backslash followed by the digit `1`, not a
            // backreference.
            out.push_str("\\\\");
            i += 2;
        } else if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() && bytes[i + 1] != b'0' {
            let group = (bytes[i + 1] - b'0') as usize;
            let captured = captures.get(group).copied().flatten();
            if let Some((start, end)) = captured {
                escape_literal(&line[start..end], &mut out);
            }
            // Absent group: substitute the empty string.
            i += 2;
        } else {
            // Advance a full UTF-8 char at a time so multi-byte characters
            // in the pattern aren't split.
            let ch_len = utf8_char_len(bytes[i]);
            out.push_str(&pattern[i..i + ch_len]);
            i += ch_len;
        }
    }

    out
}

fn utf8_char_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Does this pattern need substitution at all? A cheap precomputed check so
/// the tokenizer can skip re-deriving the end/while pattern on every step
/// for the common case of a rule whose end pattern has no backreferences.
pub fn has_backreferences(pattern: &str) -> bool {
    (1..=9).any(|i| pattern.contains(&format!("\\{i}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_single_group() {
        let result = substitute_backreferences(r"\1", "  HEREDOC  ", &[Some((2, 9)), Some((2, 9))]);
        assert_eq!(result, "HEREDOC");
    }

    #[test]
    fn escapes_regex_metacharacters_in_captured_text() {
        let result = substitute_backreferences(r"\1", "a.b", &[Some((0, 3)), Some((0, 3))]);
        assert_eq!(result, r"a\.b");
    }

    #[test]
    fn absent_group_substitutes_empty_string() {
        let result = substitute_backreferences(r"x\1y", "whatever", &[Some((0, 8)), None]);
        assert_eq!(result, "xy");
    }

    #[test]
    fn escaped_backslash_is_preserved_and_does_not_start_a_new_escape() {
        let result = substitute_backreferences(r"\\1", "whatever", &[Some((0, 8)), Some((0, 8))]);
        assert_eq!(result, r"\\1");
    }

    #[test]
    fn leaves_other_escapes_untouched() {
        let result = substitute_backreferences(r"\d+\1", "5", &[Some((0, 1)), Some((0, 1))]);
        assert_eq!(result, r"\d+5");
    }

    #[test]
    fn detects_need_for_substitution() {
        assert!(has_backreferences(r"end\1"));
        assert!(!has_backreferences(r"end\d"));
    }
}
