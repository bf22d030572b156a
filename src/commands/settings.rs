use urlrelay_core::fs_paths::remove_quietly;
use urlrelay_core::models::transfer::MessageRef;

use super::{BotContext, IncomingMessage};

const START_TEXT: &str = "Hi! Send me a direct link and I will upload the file here.\n\n\
Use /help to see everything I can do.";

const HELP_TEXT: &str = "How to use me:\n\n\
1. Send a link (http or https).\n\
2. Pick how it should arrive: video, file, audio or video note.\n\
   \"Audio (yt-dlp)\" and \"Video (yt-dlp)\" work for streaming sites.\n\n\
Rename a file by sending `link * new name.ext`.\n\n\
Send a photo to use it as the thumbnail of your uploads.\n\
/showthumb tells you if a thumbnail is set, /delthumb removes it.";

const THUMB_SAVED: &str = "Custom thumbnail saved. It will be used for your next uploads.";
const THUMB_DELETED: &str = "Custom thumbnail deleted.";
const THUMB_SET: &str = "A custom thumbnail is set. Send /delthumb to remove it.";
const THUMB_NOT_SET: &str = "No custom thumbnail is set. Send a photo to add one.";
const COOKIES_USAGE: &str = "Reply to a cookie file with /cookies";
const COOKIES_SAVED: &str = "Cookies file updated successfully!";

async fn reply(ctx: &BotContext, msg: &IncomingMessage, text: &str) -> anyhow::Result<MessageRef> {
    ctx.api
        .send_text(msg.message.chat, Some(msg.message.id), text)
        .await
}

pub async fn start(ctx: &BotContext, msg: &IncomingMessage) -> anyhow::Result<()> {
    reply(ctx, msg, START_TEXT).await?;
    Ok(())
}

pub async fn help(ctx: &BotContext, msg: &IncomingMessage) -> anyhow::Result<()> {
    reply(ctx, msg, HELP_TEXT).await?;
    Ok(())
}

pub async fn save_thumbnail(ctx: &BotContext, msg: &IncomingMessage) -> anyhow::Result<()> {
    let path = ctx.transfer.scratch.thumbnail(msg.user);
    ctx.api.download_attachment(msg.message, &path).await?;
    tracing::info!("[bot] thumbnail saved for {}", msg.user);
    reply(ctx, msg, THUMB_SAVED).await?;
    Ok(())
}

pub async fn delete_thumbnail(ctx: &BotContext, msg: &IncomingMessage) -> anyhow::Result<()> {
    remove_quietly(&ctx.transfer.scratch.thumbnail(msg.user)).await;
    reply(ctx, msg, THUMB_DELETED).await?;
    Ok(())
}

pub async fn show_thumbnail(ctx: &BotContext, msg: &IncomingMessage) -> anyhow::Result<()> {
    let exists = tokio::fs::try_exists(ctx.transfer.scratch.thumbnail(msg.user))
        .await
        .unwrap_or(false);
    reply(ctx, msg, if exists { THUMB_SET } else { THUMB_NOT_SET }).await?;
    Ok(())
}

pub async fn set_cookies(ctx: &BotContext, msg: &IncomingMessage) -> anyhow::Result<()> {
    if !ctx.access.is_owner(msg.user.0) {
        tracing::debug!("[bot] /cookies from non-owner {}", msg.user);
        return Ok(());
    }
    let Some(replied) = msg.reply_to.filter(|r| r.has_document) else {
        reply(ctx, msg, COOKIES_USAGE).await?;
        return Ok(());
    };

    let source = MessageRef::new(msg.message.chat, replied.id);
    match ctx.api.download_attachment(source, &ctx.cookie_file).await {
        Ok(()) => {
            tracing::info!("[bot] cookies updated at {}", ctx.cookie_file.display());
            reply(ctx, msg, COOKIES_SAVED).await?;
        }
        Err(e) => {
            tracing::warn!("[bot] cookie upload failed: {:#}", e);
            reply(ctx, msg, &format!("Error updating cookies: {}", e)).await?;
        }
    }
    Ok(())
}
