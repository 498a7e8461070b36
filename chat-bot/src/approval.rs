//! Inline-keyboard encoding for approval and pagination callbacks (§4.5).
//!
//! Callback data is `<kind>:<task_id>:<arg>`, always well under Telegram's 64-byte
//! `callback_data` limit since task ids are UUIDs (36 chars).

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

pub fn approval_keyboard(task_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Approve", format!("appr:{task_id}:approve")),
        InlineKeyboardButton::callback("❌ Reject", format!("appr:{task_id}:reject")),
    ]])
}

/// Attached to the in-progress message so the owner can cancel a running task (§5).
pub fn cancel_keyboard(task_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback("🚫 Cancel", format!("cancel:{task_id}"))]])
}

pub enum ApprovalDecision {
    Approve,
    Reject,
}

pub enum ParsedCallback {
    Approval { task_id: String, decision: ApprovalDecision },
    Page { task_id: String, page: usize },
    EndConversation { task_id: String },
    Cancel { task_id: String },
}

pub fn parse_callback(data: &str) -> Option<ParsedCallback> {
    let mut parts = data.splitn(3, ':');
    match parts.next()? {
        "appr" => {
            let task_id = parts.next()?.to_string();
            let decision = match parts.next()? {
                "approve" => ApprovalDecision::Approve,
                "reject" => ApprovalDecision::Reject,
                _ => return None,
            };
            Some(ParsedCallback::Approval { task_id, decision })
        }
        "page" => {
            let task_id = parts.next()?.to_string();
            let page = parts.next()?.parse().ok()?;
            Some(ParsedCallback::Page { task_id, page })
        }
        "endconv" => Some(ParsedCallback::EndConversation { task_id: parts.next()?.to_string() }),
        "cancel" => Some(ParsedCallback::Cancel { task_id: parts.next()?.to_string() }),
        _ => None,
    }
}

/// Buttons attached to a result page: prev/next when there is more than one page, plus an
/// end-conversation control when the result invites a follow-up turn.
pub fn result_keyboard(task_id: &str, page: usize, total_pages: usize, conversation_open: bool) -> Option<InlineKeyboardMarkup> {
    let mut rows = Vec::new();

    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineKeyboardButton::callback("◀ Prev", format!("page:{task_id}:{}", page - 1)));
    }
    if page + 1 < total_pages {
        nav.push(InlineKeyboardButton::callback("Next ▶", format!("page:{task_id}:{}", page + 1)));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }
    if conversation_open {
        rows.push(vec![InlineKeyboardButton::callback("🔚 End conversation", format!("endconv:{task_id}"))]);
    }

    if rows.is_empty() {
        None
    } else {
        Some(InlineKeyboardMarkup::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approve() {
        match parse_callback("appr:t-1:approve").unwrap() {
            ParsedCallback::Approval { task_id, decision } => {
                assert_eq!(task_id, "t-1");
                assert!(matches!(decision, ApprovalDecision::Approve));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_page() {
        match parse_callback("page:t-1:2").unwrap() {
            ParsedCallback::Page { task_id, page } => {
                assert_eq!(task_id, "t-1");
                assert_eq!(page, 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(parse_callback("bogus:t-1:2").is_none());
    }

    #[test]
    fn parses_cancel() {
        match parse_callback("cancel:t-1").unwrap() {
            ParsedCallback::Cancel { task_id } => assert_eq!(task_id, "t-1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn result_keyboard_omits_nav_for_single_page() {
        assert!(result_keyboard("t-1", 0, 1, false).is_none());
    }

    #[test]
    fn result_keyboard_includes_next_on_first_of_many() {
        let markup = result_keyboard("t-1", 0, 3, false).unwrap();
        assert_eq!(markup.inline_keyboard[0].len(), 1);
    }
}
