use std::sync::Arc;

use anyhow::anyhow;
use grammers_client::client::updates::UpdateStream;
use grammers_client::grammers_tl_types as tl;
use grammers_client::types::update::CallbackQuery;
use grammers_client::types::{Media, Message};
use grammers_client::Update;
use tokio_util::sync::CancellationToken;

use urlrelay_core::models::transfer::{ChatId, MessageId, MessageRef, UserId};

use super::client::GrammersClient;
use crate::commands::{
    self, BotContext, IncomingCallback, IncomingMessage, LinkEntity, RepliedMessage,
};

/// Receives updates until `shutdown` fires. Each update is handled on its
/// own task so a long transfer never blocks the next message.
pub async fn run(
    ctx: Arc<BotContext>,
    api: Arc<GrammersClient>,
    mut updates: UpdateStream,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let update = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = updates.next() => next.map_err(|e| anyhow!("Update stream failed: {}", e))?,
        };

        match update {
            Update::NewMessage(message) if !message.outgoing() => {
                api.remember(&message).await;
                let incoming = incoming_message(&message).await;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = commands::handle_message(&ctx, incoming).await {
                        tracing::warn!("[bot] message handler failed: {:#}", e);
                    }
                });
            }
            Update::CallbackQuery(query) => {
                let ctx = ctx.clone();
                let api = api.clone();
                tokio::spawn(async move {
                    let callback = match incoming_callback(&api, &query).await {
                        Ok(callback) => callback,
                        Err(e) => {
                            tracing::warn!("[bot] cannot load callback message: {:#}", e);
                            return;
                        }
                    };
                    if let Err(e) = commands::handle_callback(&ctx, callback).await {
                        tracing::warn!("[bot] callback handler failed: {:#}", e);
                    }
                });
            }
            _ => {}
        }
    }

    updates.sync_update_state();
    tracing::info!("[telegram] update loop stopped");
    Ok(())
}

fn message_ref(message: &Message) -> MessageRef {
    MessageRef::new(ChatId(message.peer_id().bare_id()), MessageId(message.id()))
}

fn has_document(message: &Message) -> bool {
    matches!(message.media(), Some(Media::Document(_)))
}

async fn incoming_message(message: &Message) -> IncomingMessage {
    let message_ref = message_ref(message);
    let text = message.text().to_string();

    // Only commands look at what they reply to; skip the round trip otherwise.
    let reply_to = match message.reply_to_message_id() {
        Some(id) if text.starts_with('/') => {
            let replied = message.get_reply().await.ok().flatten();
            Some(RepliedMessage {
                id: MessageId(id),
                has_document: replied.as_ref().is_some_and(has_document),
            })
        }
        Some(id) => Some(RepliedMessage {
            id: MessageId(id),
            has_document: false,
        }),
        None => None,
    };

    IncomingMessage {
        message: message_ref,
        user: UserId(
            message
                .sender()
                .map(|s| s.id().bare_id())
                .unwrap_or(message_ref.chat.0),
        ),
        entities: message
            .fmt_entities()
            .map(|e| link_entities(e))
            .unwrap_or_default(),
        has_photo: matches!(message.media(), Some(Media::Photo(_))),
        has_document: has_document(message),
        reply_to,
        text,
    }
}

async fn incoming_callback(
    api: &GrammersClient,
    query: &CallbackQuery,
) -> anyhow::Result<IncomingCallback> {
    if let Err(e) = query.answer().send().await {
        tracing::debug!("[bot] answering callback failed: {}", e);
    }

    let keyboard = query
        .load_message()
        .await
        .map_err(|e| anyhow!("load_message: {}", e))?;
    api.remember(&keyboard).await;

    let source = match keyboard.get_reply().await {
        Ok(Some(source)) => Some(incoming_message(&source).await),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!("[bot] cannot load source message: {}", e);
            None
        }
    };

    Ok(IncomingCallback {
        user: UserId(query.sender().id().bare_id()),
        data: String::from_utf8_lossy(query.data()).into_owned(),
        message: message_ref(&keyboard),
        source,
    })
}

fn link_entities(entities: &[tl::enums::MessageEntity]) -> Vec<LinkEntity> {
    entities
        .iter()
        .filter_map(|entity| match entity {
            tl::enums::MessageEntity::Url(e) => Some(LinkEntity {
                offset: e.offset.max(0) as usize,
                length: e.length.max(0) as usize,
                url: None,
            }),
            tl::enums::MessageEntity::TextUrl(e) => Some(LinkEntity {
                offset: e.offset.max(0) as usize,
                length: e.length.max(0) as usize,
                url: Some(e.url.clone()),
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_link_entities() {
        let entities = vec![
            tl::enums::MessageEntity::Bold(tl::types::MessageEntityBold {
                offset: 0,
                length: 4,
            }),
            tl::enums::MessageEntity::Url(tl::types::MessageEntityUrl {
                offset: 5,
                length: 20,
            }),
            tl::enums::MessageEntity::TextUrl(tl::types::MessageEntityTextUrl {
                offset: 26,
                length: 4,
                url: "https://cdn.example/a.mp4".into(),
            }),
        ];

        assert_eq!(
            link_entities(&entities),
            vec![
                LinkEntity {
                    offset: 5,
                    length: 20,
                    url: None
                },
                LinkEntity {
                    offset: 26,
                    length: 4,
                    url: Some("https://cdn.example/a.mp4".into())
                },
            ]
        );
    }
}
