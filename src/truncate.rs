//! Context-window truncation.
//!
//! Keeps the leading system message unconditionally and then as much of the
//! most recent conversation as fits the token budget. Token counting is
//! injected through [`TokenCounter`].

use crate::error::ResearchError;
use crate::llm::{Message, Role};

/// Per-message framing overhead (role marker and separators).
const MESSAGE_OVERHEAD: usize = 4;
const TRUNCATION_MARKER: &str = "[truncated] ";

pub trait TokenCounter: Send + Sync {
    fn count_text(&self, text: &str) -> usize;

    fn count_message(&self, message: &Message) -> usize {
        let calls: usize = message
            .tool_calls
            .iter()
            .map(|c| self.count_text(&c.name) + self.count_text(&c.arguments.to_string()))
            .sum();
        MESSAGE_OVERHEAD + self.count_text(&message.content) + calls
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// BPE token counts using the `cl100k_base` encoding.
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    pub fn new() -> Result<Self, ResearchError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ResearchError::Config(format!("tokenizer unavailable: {e}")))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_text(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Rough estimate of four characters per token.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharEstimateCounter;

impl TokenCounter for CharEstimateCounter {
    fn count_text(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Selects the messages that fit into `budget` tokens.
///
/// The result is the leading system message (if any) followed by a
/// contiguous suffix of the remaining messages. When not even the newest
/// message fits whole, its content is cut from the front so that its most
/// recent text survives. Tool results whose originating call was cut off are
/// dropped from the start of the suffix.
pub fn truncate_messages(
    messages: &[Message],
    budget: usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<Message>, ResearchError> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    };

    let system_tokens = system.map_or(0, |m| counter.count_message(m));
    if system_tokens > budget {
        return Err(ResearchError::ContextBudgetExceeded {
            system_tokens,
            budget,
        });
    }
    let mut remaining = budget - system_tokens;

    let mut kept: Vec<Message> = Vec::new();
    for message in rest.iter().rev() {
        let tokens = counter.count_message(message);
        if tokens > remaining {
            break;
        }
        remaining -= tokens;
        kept.push(message.clone());
    }

    if kept.is_empty() {
        if let Some(newest) = rest.last() {
            if let Some(shrunk) = shrink_to_fit(newest, remaining, counter) {
                kept.push(shrunk);
            }
        }
    }

    kept.reverse();
    let orphaned = kept.iter().take_while(|m| m.role == Role::Tool).count();
    kept.drain(..orphaned);

    let mut selected = Vec::with_capacity(kept.len() + 1);
    selected.extend(system.cloned());
    selected.extend(kept);
    Ok(selected)
}

/// Keeps the longest tail of `message.content` that fits in `budget`.
fn shrink_to_fit(message: &Message, budget: usize, counter: &dyn TokenCounter) -> Option<Message> {
    let chars: Vec<char> = message.content.chars().collect();
    let with_tail = |keep: usize| {
        let tail: String = chars[chars.len() - keep..].iter().collect();
        Message {
            content: format!("{TRUNCATION_MARKER}{tail}"),
            ..message.clone()
        }
    };

    let (mut lo, mut hi) = (0usize, chars.len());
    let mut best = None;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let candidate = with_tail(mid);
        if counter.count_message(&candidate) <= budget {
            best = Some(candidate);
            lo = mid + 1;
        } else if mid == 0 {
            break;
        } else {
            hi = mid - 1;
        }
    }
    best.filter(|m| m.content.len() > TRUNCATION_MARKER.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per character, no framing overhead.
    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count_text(&self, text: &str) -> usize {
            text.chars().count()
        }

        fn count_message(&self, message: &Message) -> usize {
            self.count_text(&message.content)
        }
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_everything_fits() {
        let messages = vec![Message::system("sys"), Message::user("abc"), Message::assistant("de")];
        let out = truncate_messages(&messages, 100, &CharCounter).unwrap();
        assert_eq!(out, messages);
    }

    #[test]
    fn test_drops_oldest_first_and_keeps_system() {
        let messages = vec![
            Message::system("sys"),
            Message::user("aaaaa"),
            Message::assistant("bbbbb"),
            Message::user("ccccc"),
        ];
        let out = truncate_messages(&messages, 13, &CharCounter).unwrap();
        assert_eq!(contents(&out), vec!["sys", "bbbbb", "ccccc"]);
        assert!(CharCounter.count_messages(&out) <= 13);
    }

    #[test]
    fn test_system_over_budget_is_an_error() {
        let messages = vec![Message::system("a very long system prompt"), Message::user("x")];
        let err = truncate_messages(&messages, 5, &CharCounter).unwrap_err();
        assert!(matches!(
            err,
            ResearchError::ContextBudgetExceeded { system_tokens: 25, budget: 5 }
        ));
    }

    #[test]
    fn test_newest_message_is_cut_from_the_front() {
        let messages = vec![Message::system("s"), Message::user("0123456789abcdefghij")];
        let out = truncate_messages(&messages, 1 + TRUNCATION_MARKER.len() + 5, &CharCounter).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content, format!("{TRUNCATION_MARKER}fghij"));
    }

    #[test]
    fn test_orphaned_tool_results_are_dropped() {
        let messages = vec![
            Message::system("s"),
            Message::assistant_with_tools("cccccccccc", vec![]),
            Message::tool_result("c1", "rrrrr"),
            Message::user("summarize"),
        ];
        let out = truncate_messages(&messages, 1 + 5 + 9, &CharCounter).unwrap();
        assert_eq!(contents(&out), vec!["s", "summarize"]);
    }

    #[test]
    fn test_without_system_message() {
        let messages = vec![Message::user("aaaa"), Message::user("bb")];
        let out = truncate_messages(&messages, 3, &CharCounter).unwrap();
        assert_eq!(contents(&out), vec!["bb"]);
    }

    #[test]
    fn test_char_estimate_counter_rounds_up() {
        assert_eq!(CharEstimateCounter.count_text(""), 0);
        assert_eq!(CharEstimateCounter.count_text("abcde"), 2);
        assert_eq!(
            CharEstimateCounter.count_message(&Message::user("abcd")),
            MESSAGE_OVERHEAD + 1
        );
    }
}
