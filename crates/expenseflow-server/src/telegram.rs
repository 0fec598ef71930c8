//! Telegram transport for the conversation engine
//!
//! Long-polls the Bot API, turns each message into an `Inbound` for the
//! engine and sends the engine's replies back as plain text. Uploaded
//! photos and documents are written to the inbox directory first.
//!
//! Configuration:
//! - `TELEGRAM_BOT_TOKEN`: Bot API token (required)
//! - `TELEGRAM_INBOX_DIR`: Where uploads are stored (default: `inbox`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use teloxide::dptree;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{MediaKind, MessageKind};
use tracing::{debug, info, warn};

use expenseflow_core::conversation::messages;
use expenseflow_core::conversation::{ConversationEngine, Inbound, Upload};

/// Default directory for uploaded receipt files
pub const DEFAULT_INBOX_DIR: &str = "inbox";

/// Telegram bot configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub inbox_dir: PathBuf,
}

impl TelegramConfig {
    /// Returns None if `TELEGRAM_BOT_TOKEN` is not set
    pub fn from_env() -> Option<Self> {
        Self::from_values(
            std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            std::env::var("TELEGRAM_INBOX_DIR").ok(),
        )
    }

    fn from_values(token: Option<String>, inbox_dir: Option<String>) -> Option<Self> {
        let token = token.filter(|t| !t.trim().is_empty())?;
        let inbox_dir = inbox_dir
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INBOX_DIR.to_string());

        Some(Self {
            token: token.trim().to_string(),
            inbox_dir: PathBuf::from(inbox_dir),
        })
    }
}

/// State shared with every message handler
struct BotState {
    engine: Arc<ConversationEngine>,
    inbox_dir: PathBuf,
}

/// A file attached to a chat message, before download
#[derive(Debug, Clone, PartialEq)]
struct Attachment {
    file_id: String,
    file_name: String,
}

/// Run the bot until Ctrl+C
pub async fn run_telegram_bot(
    engine: Arc<ConversationEngine>,
    config: TelegramConfig,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.inbox_dir)
        .await
        .with_context(|| format!("Failed to create inbox {}", config.inbox_dir.display()))?;

    info!(inbox = %config.inbox_dir.display(), "Starting Telegram bot (long polling)");

    let bot = Bot::new(config.token);
    let state = Arc::new(BotState {
        engine,
        inbox_dir: config.inbox_dir,
    });

    Dispatcher::builder(bot, Update::filter_message().endpoint(handle_message))
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram bot stopped");
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        debug!("Ignoring message without sender");
        return Ok(());
    };
    let user_id = user.id.0 as i64;

    let inbound = if let Some(attachment) = attachment_of(&msg, user_id) {
        send_reply(&bot, &msg, messages::PROCESSING).await;

        match download(&bot, &attachment, &state.inbox_dir).await {
            Ok(upload) => Inbound::Upload(upload),
            Err(e) => {
                warn!(user_id, error = %e, "Failed to download upload");
                send_reply(
                    &bot,
                    &msg,
                    "⚠️ Could not download your file. Please send it again.",
                )
                .await;
                return Ok(());
            }
        }
    } else if let Some(text) = msg.text() {
        Inbound::Text(text.to_string())
    } else {
        debug!(user_id, "Ignoring unsupported message kind");
        return Ok(());
    };

    for reply in state.engine.handle(user_id, inbound).await {
        send_reply(&bot, &msg, &reply).await;
    }

    Ok(())
}

/// Send failures are logged and never touch engine state
async fn send_reply(bot: &Bot, msg: &Message, text: &str) {
    if let Err(e) = bot.send_message(msg.chat.id, text).await {
        warn!(chat_id = %msg.chat.id, error = %e, "Failed to send reply");
    }
}

/// Photo (largest size) or document attached to the message
fn attachment_of(msg: &Message, user_id: i64) -> Option<Attachment> {
    let MessageKind::Common(common) = &msg.kind else {
        return None;
    };

    match &common.media_kind {
        MediaKind::Photo(photo) => {
            let largest = photo
                .photo
                .iter()
                .max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
            Some(Attachment {
                file_id: largest.file.id.clone(),
                file_name: photo_file_name(user_id, Utc::now().timestamp()),
            })
        }
        MediaKind::Document(doc) => Some(Attachment {
            file_id: doc.document.file.id.clone(),
            file_name: document_file_name(
                doc.document.file_name.as_deref(),
                Utc::now().timestamp(),
            ),
        }),
        _ => None,
    }
}

async fn download(bot: &Bot, attachment: &Attachment, inbox_dir: &Path) -> anyhow::Result<Upload> {
    let file = bot
        .get_file(attachment.file_id.as_str())
        .await
        .context("Failed to look up file")?;

    let mut bytes: Vec<u8> = Vec::new();
    bot.download_file(&file.path, &mut bytes)
        .await
        .context("Failed to download file")?;

    store_upload(inbox_dir, &attachment.file_name, bytes).await
}

/// Write downloaded bytes into the inbox
async fn store_upload(
    inbox_dir: &Path,
    file_name: &str,
    bytes: Vec<u8>,
) -> anyhow::Result<Upload> {
    let path = inbox_dir.join(file_name);
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!(path = %path.display(), size = bytes.len(), "Stored upload");

    Ok(Upload {
        bytes,
        file_name: file_name.to_string(),
        file_path: Some(path.to_string_lossy().into_owned()),
    })
}

fn photo_file_name(user_id: i64, timestamp: i64) -> String {
    format!("receipt_{}_{}.jpg", user_id, timestamp)
}

/// Keep the uploaded name's safe characters, prefixed with a timestamp
fn document_file_name(original: Option<&str>, timestamp: i64) -> String {
    let sanitized = original.map(sanitize_file_name).unwrap_or_default();
    if sanitized.is_empty() {
        format!("{}_document", timestamp)
    } else {
        format!("{}_{}", timestamp, sanitized)
    }
}

fn sanitize_file_name(name: &str) -> String {
    // Drop any directory part first
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
