use anyhow::{Context, Result};
use chat_sync::logging::{self, LogFormat};
use chat_sync::session::SyncUpdate;
use chat_sync::storage::FileStore;
use chat_sync::{SyncConfig, SyncContext};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Connects with the credential from the environment and logs the
/// conversation as it synchronizes, until Ctrl-C.
#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing(LogFormat::from_env());

    let config = SyncConfig::from_env().context("loading configuration")?;
    let user_id = config
        .user_id
        .clone()
        .context("CHAT_SYNC_USER_ID is required")?;
    let storage = Arc::new(FileStore::open(&config.storage_path).context("opening local state")?);

    let ctx = SyncContext::init(config, storage).context("initializing sync context")?;
    ctx.connect().context("no active session credential")?;

    let mut session = ctx.session(user_id);
    session.open().await.context("loading conversation")?;
    for entry in session.messages() {
        let m = &entry.message;
        info!(at = %m.created_at, from = %m.sender_id, id = %m.id, "{}", m.content);
    }

    // Commands are not issued from here; the channel only keeps the driver alive
    let (_commands_tx, commands_rx) = mpsc::channel(16);
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let driver = tokio::spawn(session.run(commands_rx, updates_tx, shutdown_rx));

    loop {
        tokio::select! {
            update = updates_rx.recv() => match update {
                Some(SyncUpdate::SessionInvalidated) => {
                    warn!("credential rejected by the server");
                    break;
                }
                Some(update) => info!(?update, "sync update"),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for ctrl-c")?;
                info!("shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    let session = driver.await.context("session driver panicked")?;
    for entry in session.messages().rev().take(5) {
        info!(id = %entry.message.id, "{}", entry.message.content);
    }
    let unread = session.unread();
    info!(chat = unread.display_chat(), notifications = unread.display_notifications(), "final unread counts");

    ctx.teardown().await;
    Ok(())
}
