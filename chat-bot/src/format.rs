//! Markdown-to-rich-text rendering and pagination for task results (§4.5 "Result rendering").
//!
//! Telegram's Bot API only understands a handful of HTML tags (`<b>`, `<i>`, `<code>`,
//! `<pre>`, `<a href>`), so fences, inline code, bold/italic, links and headings are converted
//! to that subset; everything else is escaped plain text.

use regex::Regex;
use std::sync::LazyLock;

pub const PAGE_SIZE: usize = 4000;

/// Escapes text for safe inclusion in Telegram HTML (both content and attribute position).
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Converts a markdown result body into Telegram-flavored HTML. Tables are pre-rendered as
/// fixed-width blocks before the rest of the conversion runs, so pipe characters inside a
/// table row never get mistaken for anything else.
pub fn md_to_rich_text(md: &str) -> String {
    static CODE_BLOCK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"```(\w*)\n?([\s\S]*?)```").expect("invalid regex"));
    static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("invalid regex"));
    static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("invalid regex"));
    static ITALIC: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"([^*]|^)\*([^*]+)\*([^*]|$)").expect("invalid regex"));
    static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("invalid regex"));
    static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").expect("invalid regex"));

    let md = render_tables(md);

    let mut protected: Vec<String> = Vec::new();
    let text = CODE_BLOCK.replace_all(&md, |caps: &regex::Captures<'_>| {
        let code = html_escape(&caps[2]);
        let placeholder = format!("\x00CODE{}\x00", protected.len());
        protected.push(format!("<pre>{code}</pre>"));
        placeholder
    });
    let text = INLINE_CODE.replace_all(&text, |caps: &regex::Captures<'_>| {
        let code = html_escape(&caps[1]);
        let placeholder = format!("\x00CODE{}\x00", protected.len());
        protected.push(format!("<code>{code}</code>"));
        placeholder
    });

    let text = html_escape(&text);
    let text = BOLD.replace_all(&text, "<b>$1</b>");
    let text = ITALIC.replace_all(&text, "$1<i>$2</i>$3");
    let text = LINK.replace_all(&text, |caps: &regex::Captures<'_>| {
        let label = &caps[1];
        let url = &caps[2];
        if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("tg://") {
            format!("<a href=\"{url}\">{label}</a>")
        } else {
            format!("{label} ({url})")
        }
    });
    let text = HEADING.replace_all(&text, "<b>$1</b>");

    let mut text = text.into_owned();
    for (i, block) in protected.iter().enumerate() {
        text = text.replace(&format!("\x00CODE{i}\x00"), block);
    }
    text
}

/// Wraps contiguous markdown-table line groups (`|...|` rows, with or without a separator
/// row) as `<pre>` blocks ahead of the rest of the conversion, so they render fixed-width.
fn render_tables(md: &str) -> String {
    static ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\|.*\|\s*$").expect("invalid regex"));

    let mut out = String::with_capacity(md.len());
    let mut block: Vec<&str> = Vec::new();
    let flush = |block: &mut Vec<&str>, out: &mut String| {
        if block.is_empty() {
            return;
        }
        out.push_str("```\n");
        for line in block.drain(..) {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("```\n");
    };

    for line in md.lines() {
        if ROW.is_match(line) {
            block.push(line);
        } else {
            flush(&mut block, &mut out);
            out.push_str(line);
            out.push('\n');
        }
    }
    flush(&mut block, &mut out);
    out.trim_end_matches('\n').to_string()
}

/// Paginates already-converted HTML into pages of at most `page_size` bytes: splits at the
/// last newline within the window, but only when that newline falls in the upper 70% of the
/// window — a newline any earlier is treated as not found, and the page is hard-cut instead
/// (at an HTML-safe boundary, closing any tag left open by the cut).
pub fn paginate(html: &str, page_size: usize) -> Vec<String> {
    if html.len() <= page_size {
        return vec![html.to_string()];
    }

    let mut pages = Vec::new();
    let mut remaining = html;
    while !remaining.is_empty() {
        if remaining.len() <= page_size {
            pages.push(remaining.to_string());
            break;
        }

        let hard_cut = find_safe_html_boundary(remaining, page_size);
        let window_start = hard_cut * 3 / 10;
        let split_at = remaining[..hard_cut]
            .rfind('\n')
            .filter(|&pos| pos >= window_start)
            .map(|pos| pos + 1)
            .unwrap_or(hard_cut);
        let split_at = if split_at == 0 { remaining.floor_char_boundary(page_size.max(1)) } else { split_at };

        let (chunk, rest) = remaining.split_at(split_at);
        pages.push(close_open_tags(chunk));
        remaining = rest.trim_start_matches('\n');
    }
    pages
}

fn find_safe_html_boundary(html: &str, max_len: usize) -> usize {
    let mut boundary = html.floor_char_boundary(max_len.min(html.len()));
    while boundary > 0 {
        let bytes = &html.as_bytes()[..boundary];
        let last_open = bytes.iter().rposition(|&b| b == b'<');
        let last_close = bytes.iter().rposition(|&b| b == b'>');
        let inside_tag = match (last_open, last_close) {
            (Some(lt), Some(gt)) => lt > gt,
            (Some(_), None) => true,
            _ => false,
        };
        let last_amp = bytes.iter().rposition(|&b| b == b'&');
        let last_semi = bytes.iter().rposition(|&b| b == b';');
        let inside_entity = match (last_amp, last_semi) {
            (Some(amp), Some(semi)) => amp > semi,
            (Some(_), None) => true,
            _ => false,
        };
        if !inside_tag && !inside_entity {
            break;
        }
        boundary = html.floor_char_boundary(boundary.saturating_sub(1));
    }
    boundary
}

fn close_open_tags(html: &str) -> String {
    use std::fmt::Write as _;
    static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<(/?)(\w+)[^>]*>").expect("invalid regex"));

    let mut open_tags: Vec<String> = Vec::new();
    for cap in TAG.captures_iter(html) {
        let tag_name = cap[2].to_lowercase();
        if &cap[1] == "/" {
            if let Some(pos) = open_tags.iter().rposition(|t| *t == tag_name) {
                open_tags.remove(pos);
            }
        } else {
            open_tags.push(tag_name);
        }
    }
    if open_tags.is_empty() {
        return html.to_string();
    }
    let mut result = html.to_string();
    for tag in open_tags.into_iter().rev() {
        let _ = write!(result, "</{tag}>");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_and_inline_code_convert() {
        let out = md_to_rich_text("**bold** and `code`");
        assert!(out.contains("<b>bold</b>"));
        assert!(out.contains("<code>code</code>"));
    }

    #[test]
    fn code_fence_is_not_touched_by_bold() {
        let out = md_to_rich_text("```\n**not bold**\n```");
        assert!(out.contains("<pre>**not bold**"));
    }

    #[test]
    fn table_rows_become_a_pre_block() {
        let out = md_to_rich_text("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(out.contains("<pre>"));
        assert!(out.contains("| a | b |"));
    }

    #[test]
    fn short_text_is_a_single_page() {
        let pages = paginate("hello", PAGE_SIZE);
        assert_eq!(pages, vec!["hello".to_string()]);
    }

    #[test]
    fn pagination_splits_at_late_newline() {
        let a = "a".repeat(90);
        let b = "b".repeat(90);
        let text = format!("{a}\n{b}");
        let pages = paginate(&text, 100);
        assert_eq!(pages.len(), 2);
        assert!(pages[0].starts_with('a'));
        assert!(pages[1].starts_with('b'));
    }

    #[test]
    fn pagination_hard_cuts_when_newline_too_early() {
        // A newline at byte 5 sits well below the 30%-of-window mark for a 100-byte page,
        // so it must be ignored in favor of a hard cut.
        let text = format!("{}\n{}", "a".repeat(5), "b".repeat(200));
        let pages = paginate(&text, 100);
        assert_eq!(pages[0].len(), 100);
    }

    #[test]
    fn pagination_does_not_split_mid_tag() {
        let padding = "x".repeat(95);
        let html = format!("{padding}<b>bold</b>{padding}<i>ital</i>");
        let pages = paginate(&html, 100);
        for page in &pages {
            let trimmed = page.trim_end();
            if let Some(last_lt) = trimmed.rfind('<') {
                assert!(trimmed[last_lt..].contains('>'));
            }
        }
    }
}
