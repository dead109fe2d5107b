use std::fmt;

use crate::grammars::{GlobalRuleRef, ROOT_RULE_ID};
use crate::scope::Scope;

#[derive(Clone, Debug)]
pub struct StackFrame {
    /// Rule that pushed this frame (a `BeginEnd` or `BeginWhile`, except for
    /// the root frame which always points at `ROOT_RULE_ID`).
    pub rule_ref: GlobalRuleRef,
    /// "name" scopes, active while matching the rule's own begin/end
    /// delimiters (and, for a `match` rule or the root frame, its whole span).
    pub name_scopes: Vec<Scope>,
    /// "contentName" scopes, active for everything between the delimiters.
    pub content_scopes: Vec<Scope>,
    /// The end (or while) pattern with `\1`..`\9` already substituted from
    /// the begin match, if this rule's end/while pattern has backreferences.
    /// `None` for rules whose end/while pattern needs no substitution.
    pub end_pattern: Option<String>,
    /// Full text of the line on which this rule's begin pattern matched.
    /// Kept only when the end/while pattern actually has backreferences —
    /// that's the only reason we'd ever need to re-derive `end_pattern`.
    pub begin_line_text: Option<String>,
    /// Capture offsets from the begin match, indexed the same way the begin
    /// pattern's own capture groups are, into `begin_line_text`.
    pub begin_captures: Vec<Option<(usize, usize)>>,
    /// Set once this frame's begin match consumed through to end-of-line;
    /// the next line then starts this frame with `anchor_position` of 0.
    pub begin_rule_has_captured_eol: bool,
    /// `\G` anchor position for this frame on the current line.
    pub anchor_position: Option<usize>,
    /// Position in the current line at which this frame's rule was last
    /// entered or re-entered, used to detect a rule firing again without the
    /// cursor having advanced (see the non-advancing-match guard in
    /// `tokenizer::mod`). `None` at the start of a line.
    pub enter_position: Option<usize>,
}

/// Keeps track of nested tokenization context: the chain of open
/// `BeginEnd`/`BeginWhile` rules, their scopes, and anything needed to
/// resolve their end/while patterns' backreferences.
#[derive(Clone)]
pub struct StateStack {
    /// Stack frames from root to current.
    pub frames: Vec<StackFrame>,
}

impl StateStack {
    pub fn new(grammar: Scope) -> Self {
        Self {
            frames: vec![StackFrame {
                rule_ref: GlobalRuleRef::new(grammar, ROOT_RULE_ID),
                name_scopes: vec![grammar],
                content_scopes: vec![grammar],
                end_pattern: None,
                begin_line_text: None,
                begin_captures: Vec::new(),
                begin_rule_has_captured_eol: false,
                anchor_position: None,
                enter_position: None,
            }],
        }
    }

    /// Called when a `BeginEnd`/`BeginWhile` begin pattern matches, with the
    /// name/content scopes already computed by the caller (parent's content
    /// scopes plus this rule's own `name`/`contentName`, per textmate's
    /// scope-accumulation rule).
    #[allow(clippy::too_many_arguments)]
    pub fn push_frame(
        &mut self,
        rule_ref: GlobalRuleRef,
        name_scopes: Vec<Scope>,
        content_scopes: Vec<Scope>,
        anchor_position: Option<usize>,
        begin_rule_has_captured_eol: bool,
        enter_position: Option<usize>,
        begin_line_text: Option<String>,
        begin_captures: Vec<Option<(usize, usize)>>,
    ) {
        self.frames.push(StackFrame {
            rule_ref,
            name_scopes,
            content_scopes,
            end_pattern: None,
            begin_line_text,
            begin_captures,
            begin_rule_has_captured_eol,
            anchor_position,
            enter_position,
        });
    }

    pub fn set_end_pattern(&mut self, end_pattern: String) {
        self.top_mut().end_pattern = Some(end_pattern);
    }

    /// Exit the current context, returning to the parent. Returns `None`
    /// (and does nothing) if already at the root frame.
    pub fn pop(&mut self) -> Option<StackFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Pop but never below the root frame — used by the non-advancing-match
    /// guard, which needs to unwind a stuck rule without ever leaving the
    /// stack empty.
    pub fn safe_pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Clear every frame's per-line position bookkeeping. Called once
    /// between lines: `\G` and the non-advancing-match guard are both
    /// relative to "this line," not the whole tokenization session.
    pub fn reset_for_new_line(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
            frame.anchor_position = None;
        }
    }

    pub fn top(&self) -> &StackFrame {
        self.frames.last().expect("stack never empty")
    }

    pub fn top_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("stack never empty")
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;
        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(
                f,
                "{indent}grammar={}, rule={}",
                frame.rule_ref.grammar, frame.rule_ref.rule.0
            )?;

            if !frame.name_scopes.is_empty() {
                write!(f, " name=[")?;
                for (i, scope) in frame.name_scopes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{scope}")?;
                }
                write!(f, "]")?;
            }

            if !frame.content_scopes.is_empty() {
                write!(f, ", content=[")?;
                for (i, scope) in frame.content_scopes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{scope}")?;
                }
                write!(f, "]")?;
            }

            if let Some(pattern) = &frame.end_pattern {
                write!(f, ", end_pattern={pattern:?}")?;
            }

            write!(f, ", anchor_pos={:?}", frame.anchor_position)?;

            if let Some(enter_pos) = frame.enter_position {
                if frame.anchor_position != Some(enter_pos) {
                    write!(f, ", enter_pos={enter_pos}")?;
                }
            }

            writeln!(
                f,
                ", begin_rule_has_captured_eol={}",
                frame.begin_rule_has_captured_eol
            )?;
        }
        Ok(())
    }
}
