//! Incremental separation of private reasoning from the visible answer.
//!
//! Personas ask the model to reason inside `<thinking>…</thinking>` and to
//! answer inside `<answer>…</answer>`. Text arrives in arbitrary fragments,
//! so a marker may be split across deltas; anything that could still become
//! a marker is held back until it either completes or cannot match.
//!
//! Text outside any marker is visible, so output without the convention
//! passes through untouched.

const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";
const ANSWER_OPEN: &str = "<answer>";
const ANSWER_CLOSE: &str = "</answer>";

const MARKERS: [&str; 4] = [THINKING_OPEN, THINKING_CLOSE, ANSWER_OPEN, ANSWER_CLOSE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    InAnswer,
    InThinking,
}

#[derive(Debug, Clone)]
pub struct AnswerFilter {
    state: LexState,
    /// A possible marker prefix, starting with `<`.
    pending: String,
    visible: String,
    thinking: String,
}

impl Default for AnswerFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerFilter {
    pub fn new() -> Self {
        Self {
            state: LexState::InAnswer,
            pending: String::new(),
            visible: String::new(),
            thinking: String::new(),
        }
    }

    /// Feed one delta; returns the newly visible text (possibly empty).
    pub fn push(&mut self, delta: &str) -> String {
        let mut out = String::new();

        for ch in delta.chars() {
            if self.pending.is_empty() {
                if ch == '<' {
                    self.pending.push(ch);
                } else {
                    self.emit_char(ch, &mut out);
                }
                continue;
            }

            self.pending.push(ch);
            if let Some(marker) = MARKERS.iter().find(|m| **m == self.pending) {
                self.apply_marker(marker);
                self.pending.clear();
            } else if !MARKERS.iter().any(|m| m.starts_with(self.pending.as_str())) {
                self.flush_pending(&mut out);
            }
        }

        out
    }

    /// End of stream: an unfinished marker is ordinary text.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        let pending = std::mem::take(&mut self.pending);
        self.emit_str(&pending, &mut out);
        out
    }

    /// Everything shown so far, trimmed.
    pub fn visible_text(&self) -> &str {
        self.visible.trim()
    }

    /// Private reasoning seen so far, trimmed.
    pub fn thinking_text(&self) -> &str {
        self.thinking.trim()
    }

    fn apply_marker(&mut self, marker: &str) {
        self.state = match marker {
            THINKING_OPEN => LexState::InThinking,
            _ => LexState::InAnswer,
        };
    }

    /// The held-back text is not a marker. Its first `<` is literal; the rest
    /// is rescanned because it may itself start a marker (`<<answer>`).
    fn flush_pending(&mut self, out: &mut String) {
        let pending = std::mem::take(&mut self.pending);
        let mut chars = pending.chars();
        if let Some(first) = chars.next() {
            self.emit_char(first, out);
        }
        let rest: String = chars.collect();
        let more = self.push(&rest);
        out.push_str(&more);
    }

    fn emit_str(&mut self, text: &str, out: &mut String) {
        for ch in text.chars() {
            self.emit_char(ch, out);
        }
    }

    fn emit_char(&mut self, ch: char, out: &mut String) {
        match self.state {
            LexState::InThinking => self.thinking.push(ch),
            LexState::InAnswer => {
                // Leading whitespace before the first visible character is dropped.
                if self.visible.is_empty() && ch.is_whitespace() {
                    return;
                }
                self.visible.push(ch);
                out.push(ch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(deltas: &[&str]) -> (String, AnswerFilter) {
        let mut filter = AnswerFilter::new();
        let mut shown = String::new();
        for d in deltas {
            shown.push_str(&filter.push(d));
        }
        shown.push_str(&filter.finish());
        (shown, filter)
    }

    #[test]
    fn plain_text_passes_through() {
        let (shown, filter) = run(&["The answer ", "is 4."]);
        assert_eq!(shown, "The answer is 4.");
        assert_eq!(filter.visible_text(), "The answer is 4.");
    }

    #[test]
    fn thinking_is_hidden_and_answer_shown() {
        let (shown, filter) = run(&["<thinking>User wants math.</thinking>\n<answer>4</answer>"]);
        assert_eq!(shown, "4");
        assert_eq!(filter.thinking_text(), "User wants math.");
        assert_eq!(filter.visible_text(), "4");
    }

    #[test]
    fn markers_split_across_deltas() {
        let (shown, filter) = run(&["<thin", "king>secret</th", "inking><ans", "wer>Hel", "lo</an", "swer>"]);
        assert_eq!(shown, "Hello");
        assert_eq!(filter.thinking_text(), "secret");
    }

    #[test]
    fn marker_split_one_char_at_a_time() {
        let text = "<thinking>x</thinking><answer>ok</answer>";
        let deltas: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = deltas.iter().map(String::as_str).collect();
        let (shown, _) = run(&refs);
        assert_eq!(shown, "ok");
    }

    #[test]
    fn literal_angle_brackets_survive() {
        let (shown, _) = run(&["if a <", " b and c <b>bold</b> <<answer>x"]);
        assert_eq!(shown, "if a < b and c <b>bold</b> <x");
    }

    #[test]
    fn unfinished_marker_is_flushed_at_end() {
        let (shown, _) = run(&["value <ans"]);
        assert_eq!(shown, "value <ans");
    }

    #[test]
    fn unclosed_thinking_hides_the_rest() {
        let (shown, filter) = run(&["<thinking>still going"]);
        assert_eq!(shown, "");
        assert_eq!(filter.visible_text(), "");
        assert_eq!(filter.thinking_text(), "still going");
    }

    #[test]
    fn text_between_blocks_is_visible() {
        let (shown, _) = run(&["<thinking>a</thinking>\n\nHere you go: <answer>b</answer>"]);
        assert_eq!(shown, "Here you go: b");
    }
}
