//! Lifecycle binary (C8): loads configuration, opens persistence, wires C1-C7 together, and
//! runs the gateway until Ctrl-C (§4.8).
//!
//! Startup order follows the dependency chain exactly: persistence before the registry/task
//! store that read from it, C5's `AppState` before C6 (which registers its callbacks into it),
//! the HTTP listener bound last so nothing can race a partially-wired state.

use anyhow::Context;
use hub_core::{AgentStatusCache, Registry, TaskStore};
use hub_gateway::{AppState, GatewayConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hub_config::init_tracing();
    let config = hub_config::HubConfig::load().context("loading configuration")?;

    let (credential_store, task_repo, panel_repo) = open_storage(&config)?;

    let registry = Arc::new(Registry::load(credential_store).await.context("loading credentials")?);
    let tasks = Arc::new(TaskStore::new(task_repo));
    tasks.reload_non_terminal().await.context("reloading non-terminal tasks")?;
    let status_cache = Arc::new(AgentStatusCache::new());

    let gateway_config = GatewayConfig { default_chat_id: config.default_chat_id, ..Default::default() };
    let state = Arc::new(AppState::new(registry.clone(), tasks.clone(), status_cache.clone(), gateway_config));

    let bot = teloxide::Bot::new(&config.chat_bot_token);
    let me = bot.get_me().await.context("calling getMe")?;
    let bot_handle = me.username.clone().unwrap_or_default();

    let initial_panels = match &panel_repo {
        Some(repo) => repo.load_all().await.context("reloading status panel pointers")?,
        None => Vec::new(),
    };

    let adapter = Arc::new(chat_bot::ChatAdapter::new(
        bot.clone(),
        bot_handle,
        registry.clone(),
        tasks.clone(),
        status_cache.clone(),
        panel_repo,
        initial_panels,
        config.default_chat_id,
    ));
    state.set_callbacks(adapter);

    register_webhook(&bot, &config).await;

    // Closes conversations that have gone quiet and drops their backlog entries; runs for the
    // life of the process (§4.5 idle conversation sweep).
    let _idle_sweeper = tasks.clone().spawn_idle_sweeper(Duration::from_secs(60), Duration::from_secs(30 * 60), None);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding 0.0.0.0:{}", config.port))?;
    hub_gateway::run_gateway_on_listener(listener, state).await.context("running gateway")?;
    Ok(())
}

type OpenedStorage = (Arc<dyn hub_core::CredentialStore>, Option<Arc<hub_storage::TaskRepo>>, Option<Arc<hub_storage::PanelRepo>>);

/// Picks the SQLite-backed repositories when `DATABASE_URL` is configured, else falls back to
/// the JSON credential file with tasks and the status panel kept in memory only (§4.1).
fn open_storage(config: &hub_config::HubConfig) -> anyhow::Result<OpenedStorage> {
    match &config.database_url {
        Some(path) => {
            let persistence = hub_storage::Persistence::open(path).context("opening database")?;
            Ok((Arc::new(persistence.credentials), Some(Arc::new(persistence.tasks)), Some(Arc::new(persistence.panels))))
        }
        None => {
            warn!("DATABASE_URL not set; tasks and status panel pointers are in-memory only");
            let dir = std::path::PathBuf::from("./data");
            std::fs::create_dir_all(&dir).context("creating fallback credential directory")?;
            let store = hub_storage::FileCredentialStore::new(&dir).context("opening fallback credential store")?;
            Ok((Arc::new(store), None, None))
        }
    }
}

/// Registers the webhook that C7's `/webhook` route forwards to C6, if a public URL is
/// configured. Without one the bot receives no updates; this is logged, not fatal, since a
/// deployment behind a reverse proxy may set the webhook out-of-band.
async fn register_webhook(bot: &teloxide::Bot, config: &hub_config::HubConfig) {
    let Some(public_url) = &config.hub_public_url else {
        warn!("HUB_PUBLIC_URL not set; skipping webhook registration");
        return;
    };
    let url = match url::Url::parse(&format!("{}/webhook", public_url.trim_end_matches('/'))) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "invalid HUB_PUBLIC_URL; skipping webhook registration");
            return;
        }
    };
    match teloxide::requests::Requester::set_webhook(bot, url.clone()).await {
        Ok(_) => info!(%url, "webhook registered"),
        Err(e) => warn!(error = %e, "webhook registration failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_url_join_strips_trailing_slash() {
        let base = "https://hub.example.com/";
        let joined = format!("{}/webhook", base.trim_end_matches('/'));
        assert_eq!(joined, "https://hub.example.com/webhook");
    }
}
