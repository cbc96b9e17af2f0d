//! Mention parsing and routing-queue arithmetic for the message processor.
//!
//! Pure functions; the processor supplies the thread state and persists the outcome.

use once_cell::sync::Lazy;
use regex::Regex;

/// Mention body: a word char, optionally followed by word/dot/dash chars ending in a word
/// char. The "not preceded by a word char" half of the reference pattern is enforced in
/// [`parse_mentions`] because the regex crate has no lookbehind.
static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(\w[\w.-]*\w|\w)").expect("mention regex compiles"));

/// Extracts `@mention`s in order of appearance, deduplicated. `a@b.c` does not mention
/// `b.c`; `@agent's` mentions `agent`.
pub fn parse_mentions(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut mentions = Vec::new();
    for capture in MENTION.captures_iter(content) {
        let (Some(whole), Some(name)) = (capture.get(0), capture.get(1)) else {
            continue;
        };
        if whole.start() > 0 {
            let prev = content[..whole.start()]
                .chars()
                .next_back()
                .unwrap_or(' ');
            if prev.is_alphanumeric() || prev == '_' {
                continue;
            }
        }
        let name = name.as_str().to_string();
        if seen.insert(name.clone()) {
            mentions.push(name);
        }
    }
    mentions
}

/// Builds the target queue for a mention-routed message: remaining mentions, then the
/// carried queue, then the origin sender, deduplicated and never containing the target.
pub fn build_mention_queue(
    rest_of_mentions: &[String],
    carried_queue: &[String],
    origin_sender: Option<&str>,
    target: &str,
) -> Vec<String> {
    let mut queue: Vec<String> = Vec::new();
    let candidates = rest_of_mentions
        .iter()
        .map(String::as_str)
        .chain(carried_queue.iter().map(String::as_str))
        .chain(origin_sender);
    for candidate in candidates {
        if candidate != target && !queue.iter().any(|q| q == candidate) {
            queue.push(candidate.to_string());
        }
    }
    queue
}

/// Pops the next routing stop off a queue, returning `(next_target, rest)`.
pub fn pop_queue(queue: &[String]) -> (Option<String>, Vec<String>) {
    match queue.split_first() {
        Some((head, rest)) => (Some(head.clone()), rest.to_vec()),
        None => (None, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: mentions parse in order, deduplicate, and respect word boundaries.
    #[test]
    fn parse_mentions_reference_cases() {
        assert_eq!(parse_mentions("@alice hello"), vec!["alice"]);
        assert_eq!(
            parse_mentions("@alice and @bob then @alice again"),
            vec!["alice", "bob"]
        );
        // Email-style text must not produce a mention.
        assert!(parse_mentions("mail me at ana@example.com").is_empty());
        // Leading underscore on the preceding token blocks the match.
        assert!(parse_mentions("foo_@bar").is_empty());
        // Dots and dashes inside, but not trailing.
        assert_eq!(parse_mentions("ping @data-team. thanks"), vec!["data-team"]);
        assert_eq!(parse_mentions("cc @v1.2relay."), vec!["v1.2relay"]);
        // Single-char mention.
        assert_eq!(parse_mentions("hey @x!"), vec!["x"]);
        // Punctuation before @ is fine.
        assert_eq!(parse_mentions("(@ops)"), vec!["ops"]);
    }

    /// **Scenario**: queue building appends mentions, carried stops, then the origin,
    /// without duplicates or the target itself.
    #[test]
    fn mention_queue_composition() {
        let queue = build_mention_queue(
            &["writer".to_string()],
            &["ana".to_string()],
            Some("ana"),
            "researcher",
        );
        assert_eq!(queue, vec!["writer".to_string(), "ana".to_string()]);

        // Target never appears in its own queue.
        let queue = build_mention_queue(&[], &["researcher".to_string()], Some("ana"), "researcher");
        assert_eq!(queue, vec!["ana".to_string()]);
    }

    /// **Scenario**: popping walks the queue front to back.
    #[test]
    fn queue_pop() {
        let (next, rest) = pop_queue(&["w".to_string(), "u".to_string()]);
        assert_eq!(next.as_deref(), Some("w"));
        assert_eq!(rest, vec!["u".to_string()]);
        let (none, empty) = pop_queue(&[]);
        assert!(none.is_none() && empty.is_empty());
    }
}
