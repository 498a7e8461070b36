//! `@agent <task>` mention parsing (§4.5 "Mention dispatch").

use regex::Regex;
use std::sync::LazyLock;

static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)^@(\w+)\s+(.+)$").unwrap());

#[derive(Debug, PartialEq, Eq)]
pub struct ParsedMention {
    pub target: String,
    pub content: String,
}

/// Parses a leading `@target content` mention. If the first mention is the bot's own handle
/// (case-insensitive), it is skipped and the remainder is parsed as the real mention, so
/// `@mybot @alice do the thing` dispatches to `alice` rather than to the bot itself.
pub fn parse_mention(text: &str, bot_handle: &str) -> Option<ParsedMention> {
    let caps = MENTION.captures(text.trim_start())?;
    let target = caps[1].to_string();
    let content = caps[2].to_string();

    if target.eq_ignore_ascii_case(bot_handle) {
        let inner = MENTION.captures(&content)?;
        return Some(ParsedMention { target: inner[1].to_string(), content: inner[2].to_string() });
    }
    Some(ParsedMention { target, content })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_mention() {
        let parsed = parse_mention("@alice do the thing", "hub_bot").unwrap();
        assert_eq!(parsed.target, "alice");
        assert_eq!(parsed.content, "do the thing");
    }

    #[test]
    fn skips_own_handle_case_insensitively() {
        let parsed = parse_mention("@Hub_Bot @alice do the thing", "hub_bot").unwrap();
        assert_eq!(parsed.target, "alice");
        assert_eq!(parsed.content, "do the thing");
    }

    #[test]
    fn rejects_text_with_no_mention() {
        assert!(parse_mention("just talking", "hub_bot").is_none());
    }

    #[test]
    fn mention_with_no_content_is_rejected() {
        assert!(parse_mention("@alice", "hub_bot").is_none());
    }

    #[test]
    fn multiline_content_is_captured() {
        let parsed = parse_mention("@alice line one\nline two", "hub_bot").unwrap();
        assert_eq!(parsed.content, "line one\nline two");
    }
}
