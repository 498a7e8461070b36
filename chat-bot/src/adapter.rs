//! Telegram chat adapter (C6): mention dispatch, approvals, progress, status panel,
//! multi-turn continuation (§4.5). Implements [`hub_gateway::ChatCallbacks`] so C5 can push
//! hub-side events back into the chat without depending on this crate.

use crate::approval::{self, ApprovalDecision, ParsedCallback};
use crate::format::{self, PAGE_SIZE};
use crate::mention;
use crate::progress::ProgressTracker;
use crate::status_panel::{self, PanelTracker};
use async_trait::async_trait;
use hub_core::{AgentStatusCache, CreateTaskParams, Registry, Task, TaskStore};
use hub_protocol::TaskStatus;
use hub_storage::{PanelPointer, PanelRepo};
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ParseMode, Update, UpdateKind};
use tracing::warn;

pub struct ChatAdapter {
    bot: Bot,
    bot_handle: String,
    registry: Arc<Registry>,
    tasks: Arc<TaskStore>,
    status_cache: Arc<AgentStatusCache>,
    progress: ProgressTracker,
    panel: PanelTracker,
    online_debounce: crate::debounce::DebounceGate,
    default_chat_id: Option<i64>,
}

impl ChatAdapter {
    pub fn new(
        bot: Bot,
        bot_handle: String,
        registry: Arc<Registry>,
        tasks: Arc<TaskStore>,
        status_cache: Arc<AgentStatusCache>,
        panel_repo: Option<Arc<PanelRepo>>,
        initial_panels: Vec<PanelPointer>,
        default_chat_id: Option<i64>,
    ) -> Self {
        Self {
            bot,
            bot_handle,
            registry,
            tasks,
            status_cache,
            progress: ProgressTracker::new(),
            panel: PanelTracker::new(panel_repo, initial_panels),
            online_debounce: crate::debounce::DebounceGate::new(std::time::Duration::from_secs(5)),
            default_chat_id,
        }
    }

    async fn dispatch_update(&self, update: Update) {
        match update.kind {
            UpdateKind::Message(msg) => self.handle_message(msg).await,
            UpdateKind::CallbackQuery(query) => self.handle_callback(query).await,
            _ => {}
        }
    }

    async fn handle_message(&self, msg: Message) {
        let chat_id = msg.chat.id;
        let message_id = msg.id;
        let sender_id = msg.from.as_ref().map(|u| u.id.0 as i64);
        let text = msg.text().map(str::to_string).or_else(|| msg.caption().map(str::to_string));
        let attachment = self.download_attachment(&msg).await;

        if text.is_none() && attachment.is_none() {
            return;
        }
        let content = text.unwrap_or_default();

        if let Some(replied) = msg.reply_to_message() {
            if let Some(anchor) = self.tasks.find_by_result_message(replied.id.0 as i64).await {
                if !self.tasks.is_closed(&anchor.conversation_id).await {
                    self.continue_conversation(
                        chat_id,
                        message_id,
                        sender_id,
                        anchor.to.clone(),
                        content,
                        anchor.conversation_id.clone(),
                        anchor.task_id.clone(),
                        attachment,
                    )
                    .await;
                    return;
                }
            }
        }

        if let Some(parsed) = mention::parse_mention(&content, &self.bot_handle) {
            self.create_and_route(chat_id, message_id, sender_id, parsed.target, parsed.content, None, None, attachment).await;
        }
    }

    /// Downloads a photo or document attached to `msg`, if any and under the inline size
    /// ceiling (§3). Oversized or undownloadable attachments are dropped, not rejected outright.
    async fn download_attachment(&self, msg: &Message) -> Option<hub_core::Attachment> {
        let (file_id, filename, mime_type): (String, String, String) = if let Some(sizes) = msg.photo() {
            let largest = sizes.last()?;
            (largest.file.id.clone(), format!("{}.jpg", largest.file.unique_id), "image/jpeg".to_string())
        } else if let Some(doc) = msg.document() {
            let name = doc.file_name.clone().unwrap_or_else(|| doc.file.unique_id.clone());
            let mime = doc.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "application/octet-stream".to_string());
            (doc.file.id.clone(), name, mime)
        } else {
            return None;
        };

        let file = self.bot.get_file(&file_id).await.ok()?;
        if file.size as usize > hub_protocol::attachment::MAX_ATTACHMENT_BYTES {
            warn!(file_id, size = file.size, "dropping attachment over the inline size ceiling");
            return None;
        }

        let mut buf = Vec::with_capacity(file.size as usize);
        if let Err(e) = self.bot.download_file(&file.path, &mut buf).await {
            warn!(file_id, error = %e, "failed to download chat attachment");
            return None;
        }

        Some(hub_core::Attachment { filename, mime_type, size: buf.len(), bytes: buf })
    }

    async fn create_and_route(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: Option<i64>,
        to: String,
        content: String,
        conversation_id: Option<String>,
        parent_task_id: Option<String>,
        attachment: Option<hub_core::Attachment>,
    ) {
        let Some(owner_id) = self.registry.credential_owner(&to).await else {
            let _ = self
                .bot
                .send_message(chat_id, format!("Unknown agent: {}", format::html_escape(&to)))
                .parse_mode(ParseMode::Html)
                .await;
            return;
        };

        let task = self
            .tasks
            .create_task(CreateTaskParams {
                from: sender_id.map(|id| id.to_string()).unwrap_or_default(),
                to,
                content,
                chat_id: chat_id.0,
                message_id: message_id.0 as i64,
                conversation_id,
                parent_task_id,
            })
            .await;
        if let Some(attachment) = attachment {
            self.tasks.attach(&task.task_id, vec![attachment]).await;
        }

        // §4.5: the sender who owns the target agent's credential auto-approves; anyone
        // else's task sits behind an approval card.
        if sender_id == Some(owner_id) {
            match self.tasks.update_status(&task.task_id, TaskStatus::Approved, None).await {
                Ok(update) => {
                    if self.registry.is_online(&update.task.to).await {
                        hub_core::dispatch_task(&self.registry, &self.tasks, &update.task).await;
                    }
                }
                Err(e) => warn!(task_id = %task.task_id, error = %e, "auto-approval transition failed"),
            }
        } else {
            let _ = self.tasks.update_status(&task.task_id, TaskStatus::AwaitingApproval, None).await;
            self.send_approval_card(chat_id, &task).await;
        }
    }

    /// A reply on an already-open conversation auto-approves unconditionally (§4.5, §9
    /// Scenario 3) — unlike a fresh `@mention`, it doesn't re-check who owns the credential.
    #[allow(clippy::too_many_arguments)]
    async fn continue_conversation(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: Option<i64>,
        to: String,
        content: String,
        conversation_id: String,
        parent_task_id: String,
        attachment: Option<hub_core::Attachment>,
    ) {
        let task = self
            .tasks
            .create_task(CreateTaskParams {
                from: sender_id.map(|id| id.to_string()).unwrap_or_default(),
                to,
                content,
                chat_id: chat_id.0,
                message_id: message_id.0 as i64,
                conversation_id: Some(conversation_id),
                parent_task_id: Some(parent_task_id),
            })
            .await;
        if let Some(attachment) = attachment {
            self.tasks.attach(&task.task_id, vec![attachment]).await;
        }

        match self.tasks.update_status(&task.task_id, TaskStatus::Approved, None).await {
            Ok(update) => {
                if self.registry.is_online(&update.task.to).await {
                    hub_core::dispatch_task(&self.registry, &self.tasks, &update.task).await;
                }
            }
            Err(e) => warn!(task_id = %task.task_id, error = %e, "conversation continuation transition failed"),
        }
    }

    async fn send_approval_card(&self, chat_id: ChatId, task: &Task) {
        let text = format!(
            "<b>Approval needed</b>\nTo: <b>{}</b>\n{}",
            format::html_escape(&task.to),
            format::html_escape(&task.content),
        );
        let _ = self
            .bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(approval::approval_keyboard(&task.task_id))
            .await;
    }

    async fn handle_callback(&self, query: CallbackQuery) {
        let Some(data) = query.data.as_deref() else { return };
        let Some(parsed) = approval::parse_callback(data) else { return };
        match parsed {
            ParsedCallback::Approval { task_id, decision } => self.handle_approval(&query, task_id, decision).await,
            ParsedCallback::Page { task_id, page } => self.handle_page(&query, task_id, page).await,
            ParsedCallback::EndConversation { task_id } => self.handle_end_conversation(&query, task_id).await,
            ParsedCallback::Cancel { task_id } => self.handle_cancel(&query, task_id).await,
        }
    }

    /// Owner-initiated cancel (§5, §9 Scenario 6). If the agent is online the hub asks it to
    /// stop and waits for `task_cancelled`; otherwise there's nothing to ask, so the task is
    /// marked cancelled directly.
    async fn handle_cancel(&self, query: &CallbackQuery, task_id: String) {
        let Some(task) = self.tasks.get(&task_id).await else {
            let _ = self.bot.answer_callback_query(&query.id).text("Task no longer exists").await;
            return;
        };
        if task.status.is_terminal() {
            let _ = self.bot.answer_callback_query(&query.id).text("Already finished").await;
            return;
        }

        let clicker_id = query.from.id.0 as i64;
        let owner_id = self.registry.credential_owner(&task.to).await;
        if owner_id != Some(clicker_id) {
            let _ = self.bot.answer_callback_query(&query.id).text("Not authorized").await;
            return;
        }

        if self.registry.is_online(&task.to).await {
            self.registry
                .send_to(&task.to, hub_protocol::HubMessage::CancelTask(hub_protocol::hub::CancelTaskFrame { task_id: task_id.clone() }))
                .await;
            let _ = self.bot.answer_callback_query(&query.id).text("Cancel requested").await;
        } else {
            match self.tasks.update_status(&task_id, TaskStatus::Cancelled, None).await {
                Ok(update) if update.applied => {
                    self.on_task_cancelled(update.task).await;
                    let _ = self.bot.answer_callback_query(&query.id).text("Cancelled").await;
                }
                Ok(_) => {
                    let _ = self.bot.answer_callback_query(&query.id).text("Already finished").await;
                }
                Err(e) => {
                    warn!(task_id, error = %e, "cancel transition failed");
                    let _ = self.bot.answer_callback_query(&query.id).text("Cannot cancel in this state").await;
                }
            }
        }
    }

    async fn handle_approval(&self, query: &CallbackQuery, task_id: String, decision: ApprovalDecision) {
        let Some(task) = self.tasks.get(&task_id).await else {
            let _ = self.bot.answer_callback_query(&query.id).text("Task no longer exists").await;
            return;
        };
        if task.status != TaskStatus::AwaitingApproval {
            let _ = self.bot.answer_callback_query(&query.id).text("Already decided").await;
            return;
        }

        let clicker_id = query.from.id.0 as i64;
        let owner_id = self.registry.credential_owner(&task.to).await;
        if owner_id != Some(clicker_id) {
            let _ = self.bot.answer_callback_query(&query.id).text("Not authorized").await;
            return;
        }

        let (new_status, label) = match decision {
            ApprovalDecision::Approve => (TaskStatus::Approved, "Approved"),
            ApprovalDecision::Reject => (TaskStatus::Rejected, "Rejected"),
        };
        let task = match self.tasks.update_status(&task_id, new_status, None).await {
            Ok(update) => update.task,
            Err(e) => {
                warn!(task_id, error = %e, "approval transition failed");
                let _ = self.bot.answer_callback_query(&query.id).text("Error").await;
                return;
            }
        };
        if new_status == TaskStatus::Approved && self.registry.is_online(&task.to).await {
            hub_core::dispatch_task(&self.registry, &self.tasks, &task).await;
        }

        let _ = self.bot.answer_callback_query(&query.id).text(label).await;
        self.clear_markup(query, ChatId(task.chat_id)).await;
    }

    async fn handle_page(&self, query: &CallbackQuery, task_id: String, page: usize) {
        let Some(task) = self.tasks.get(&task_id).await else {
            let _ = self.bot.answer_callback_query(&query.id).text("Task no longer exists").await;
            return;
        };
        let Some(msg) = &query.message else { return };

        let body = task.result.clone().unwrap_or_default();
        let pages = format::paginate(&format::md_to_rich_text(&body), PAGE_SIZE);
        let Some(text) = pages.get(page) else {
            let _ = self.bot.answer_callback_query(&query.id).text("No such page").await;
            return;
        };
        let conversation_open = task.status == TaskStatus::Completed && !self.tasks.is_closed(&task.conversation_id).await;
        let keyboard = approval::result_keyboard(&task_id, page, pages.len(), conversation_open);

        let mut edit = self.bot.edit_message_text(ChatId(task.chat_id), msg.id(), text).parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            edit = edit.reply_markup(keyboard);
        }
        let _ = edit.await;
        let _ = self.bot.answer_callback_query(&query.id).await;
    }

    async fn handle_end_conversation(&self, query: &CallbackQuery, task_id: String) {
        let chat_id = match self.tasks.get(&task_id).await {
            Some(task) => {
                self.tasks.close_conversation(&task.conversation_id).await;
                Some(ChatId(task.chat_id))
            }
            None => None,
        };
        let _ = self.bot.answer_callback_query(&query.id).text("Conversation ended").await;
        if let Some(chat_id) = chat_id {
            self.clear_markup(query, chat_id).await;
        }
    }

    async fn clear_markup(&self, query: &CallbackQuery, chat_id: ChatId) {
        let Some(msg) = &query.message else { return };
        let _ = self
            .bot
            .edit_message_reply_markup(chat_id, msg.id())
            .reply_markup(teloxide::types::InlineKeyboardMarkup::new(Vec::<Vec<teloxide::types::InlineKeyboardButton>>::new()))
            .await;
    }

    async fn refresh_panel(&self, chat_id: i64) {
        if !self.panel.should_update(chat_id).await {
            return;
        }
        let agents = self.registry.list_all().await;
        let statuses = self.status_cache.all().await;
        let text = status_panel::render_panel(&agents, &statuses);

        if let Some(message_id) = self.panel.pointer(chat_id).await {
            let edited = self
                .bot
                .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), &text)
                .parse_mode(ParseMode::Html)
                .await;
            if edited.is_ok() {
                return;
            }
        }
        self.send_new_panel(chat_id, &text).await;
    }

    async fn send_new_panel(&self, chat_id: i64, text: &str) {
        match self.bot.send_message(ChatId(chat_id), text).parse_mode(ParseMode::Html).await {
            Ok(sent) => {
                self.panel.record(chat_id, sent.id.0 as i64).await;
                let _ = self.bot.pin_chat_message(ChatId(chat_id), sent.id).await;
            }
            Err(e) => warn!(chat_id, error = %e, "failed to send status panel"),
        }
    }
}

#[async_trait]
impl hub_gateway::ChatCallbacks for ChatAdapter {
    async fn on_agent_online(&self, agent_name: &str) {
        let Some(chat_id) = self.default_chat_id else { return };
        if self.online_debounce.allow(&format!("online:{agent_name}")).await {
            let _ = self.bot.send_message(ChatId(chat_id), format!("🟢 {} connected", format::html_escape(agent_name))).await;
        }
        self.refresh_panel(chat_id).await;
    }

    async fn on_agent_offline(&self, agent_name: &str) {
        let Some(chat_id) = self.default_chat_id else { return };
        if self.online_debounce.allow(&format!("offline:{agent_name}")).await {
            let _ = self.bot.send_message(ChatId(chat_id), format!("⚪ {} disconnected", format::html_escape(agent_name))).await;
        }
        self.refresh_panel(chat_id).await;
    }

    async fn on_task_progress(&self, task_id: &str, status: &str, detail: Option<String>, elapsed_ms: u64) {
        let Some(task) = self.tasks.get(task_id).await else { return };

        let chat_id = ChatId(task.chat_id);
        let reply_to = MessageId(task.message_id as i32);
        // The first progress event for a task opens its slot; later ones just update it.
        if !self.progress.exists(task_id).await {
            self.progress.start(task_id, chat_id, reply_to).await;
        }
        let Some(slot) = self.progress.try_update(task_id).await else { return };

        let label = crate::progress::render_label(status, detail.as_deref(), std::time::Duration::from_millis(elapsed_ms));
        let keyboard = approval::cancel_keyboard(task_id);
        match slot.progress_message_id {
            Some(message_id) => {
                let _ = self.bot.edit_message_text(slot.chat_id, message_id, &label).reply_markup(keyboard).await;
            }
            None => {
                if let Ok(sent) = self.bot.send_message(slot.chat_id, &label).reply_markup(keyboard).await {
                    self.progress.set_message_id(task_id, sent.id).await;
                }
            }
        }
    }

    async fn on_task_result(&self, task: Task) {
        if let Some((chat_id, Some(message_id))) = self.progress.remove(&task.task_id).await {
            let _ = self.bot.delete_message(chat_id, message_id).await;
        }

        let body = task.result.clone().unwrap_or_default();
        let pages = format::paginate(&format::md_to_rich_text(&body), PAGE_SIZE);
        let conversation_open = task.status == TaskStatus::Completed && !self.tasks.is_closed(&task.conversation_id).await;
        let keyboard = approval::result_keyboard(&task.task_id, 0, pages.len(), conversation_open);

        let status_label = if task.status == TaskStatus::Completed { "✅ done" } else { "❌ failed" };
        let header = format!("<b>{}</b> — {status_label}\n\n", format::html_escape(&task.to));
        let text = format!("{header}{}", pages.first().cloned().unwrap_or_default());

        let mut request = self.bot.send_message(ChatId(task.chat_id), text).parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard);
        }
        match request.await {
            Ok(sent) => self.tasks.set_result_message(&task.task_id, sent.id.0 as i64).await,
            Err(e) => warn!(task_id = %task.task_id, error = %e, "failed to send task result"),
        }

        self.refresh_panel(task.chat_id).await;
    }

    async fn on_task_cancelled(&self, task: Task) {
        if let Some((chat_id, Some(message_id))) = self.progress.remove(&task.task_id).await {
            let _ = self.bot.delete_message(chat_id, message_id).await;
        }
        let _ = self
            .bot
            .send_message(ChatId(task.chat_id), format!("🚫 task for <b>{}</b> cancelled", format::html_escape(&task.to)))
            .parse_mode(ParseMode::Html)
            .await;
        self.refresh_panel(task.chat_id).await;
    }

    async fn on_api_task_created(&self, task: Task, owner_id: Option<i64>) {
        let Some(chat_id) = self.default_chat_id else {
            warn!(task_id = %task.task_id, "API task created with no configured chat to route the approval to");
            return;
        };
        let _ = owner_id;
        self.send_approval_card(ChatId(chat_id), &task).await;
    }

    async fn on_webhook_update(&self, update: serde_json::Value) {
        match serde_json::from_value::<Update>(update) {
            Ok(update) => self.dispatch_update(update).await,
            Err(e) => warn!(error = %e, "failed to parse incoming chat platform update"),
        }
    }
}
