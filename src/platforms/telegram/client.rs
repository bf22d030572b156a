use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use grammers_client::grammers_tl_types as tl;
use grammers_client::session::defs::{PeerAuth, PeerId, PeerRef};
use grammers_client::types::{Attribute, Message};
use grammers_client::{button, reply_markup, Client, InputMessage};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, Mutex};

use urlrelay_core::core::traits::ChatClient;
use urlrelay_core::models::media::{Attachment, Caption, ChatAction, OutgoingMedia};
use urlrelay_core::models::transfer::{ChatId, MessageId, MessageRef};

use crate::commands::{BotApi, Button};

/// Reports the size of every chunk handed to the uploader.
struct ProgressReader<R> {
    inner: R,
    progress: mpsc::UnboundedSender<u64>,
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &polled {
            let read = (buf.filled().len() - before) as u64;
            if read > 0 {
                let _ = self.progress.send(read);
            }
        }
        polled
    }
}

const PEER_CACHE_CAPACITY: usize = 4096;

/// Chat references by bare id, evicting the oldest entry once full.
struct PeerCache {
    entries: HashMap<i64, PeerRef>,
    order: VecDeque<i64>,
    capacity: usize,
}

impl PeerCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, id: i64) -> Option<PeerRef> {
        self.entries.get(&id).copied()
    }

    fn insert(&mut self, id: i64, peer: PeerRef) {
        if self.entries.insert(id, peer).is_some() {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// [`ChatClient`] and [`BotApi`] over a signed-in grammers bot client.
pub struct GrammersClient {
    client: Client,
    peers: Mutex<PeerCache>,
}

impl GrammersClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            peers: Mutex::new(PeerCache::new(PEER_CACHE_CAPACITY)),
        }
    }

    /// Records the chat an update came from so replies can reach it.
    pub async fn remember(&self, message: &Message) {
        let mut peers = self.peers.lock().await;
        match message.peer() {
            Ok(peer) => {
                let peer = PeerRef::from(peer);
                peers.insert(peer.id.bare_id(), peer);
            }
            // Without the full peer only the id is known; keep a better entry.
            Err(peer) => {
                if peers.get(peer.id.bare_id()).is_none() {
                    peers.insert(peer.id.bare_id(), peer);
                }
            }
        }
    }

    async fn peer(&self, chat: ChatId) -> anyhow::Result<PeerRef> {
        if let Some(peer) = self.peers.lock().await.get(chat.0) {
            return Ok(peer);
        }
        let peer_ref = PeerRef {
            id: PeerId::user(chat.0),
            auth: PeerAuth::default(),
        };
        let peer = self
            .client
            .resolve_peer(peer_ref)
            .await
            .map_err(|e| anyhow!("Cannot resolve chat {}: {}", chat.0, e))?;
        let peer = PeerRef::from(&peer);
        self.peers.lock().await.insert(chat.0, peer);
        Ok(peer)
    }

    async fn fetch_message(&self, message: MessageRef) -> anyhow::Result<Message> {
        let peer = self.peer(message.chat).await?;
        self.client
            .get_messages_by_id(peer, &[message.id.0])
            .await
            .map_err(|e| anyhow!("{}", e))?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| anyhow!("Message {} not found", message.id.0))
    }

    async fn send(&self, chat: ChatId, input: InputMessage) -> anyhow::Result<MessageRef> {
        let peer = self.peer(chat).await?;
        let sent = self
            .client
            .send_message(peer, input)
            .await
            .map_err(|e| anyhow!("send_message: {}", e))?;
        Ok(MessageRef::new(chat, MessageId(sent.id())))
    }
}

fn message_action(action: ChatAction) -> tl::enums::SendMessageAction {
    match action {
        ChatAction::Typing => tl::enums::SendMessageAction::SendMessageTypingAction,
        ChatAction::UploadDocument => tl::enums::SendMessageAction::SendMessageUploadDocumentAction(
            tl::types::SendMessageUploadDocumentAction { progress: 0 },
        ),
        ChatAction::Cancel => tl::enums::SendMessageAction::SendMessageCancelAction,
    }
}

fn caption_input(caption: &Caption) -> InputMessage {
    match caption {
        Caption::None => InputMessage::new().text(""),
        Caption::Plain(text) => InputMessage::new().text(text),
        Caption::Html(html) => InputMessage::new().html(html),
    }
}

fn media_attribute(attachment: &Attachment) -> Option<Attribute> {
    match attachment {
        Attachment::Video {
            duration_seconds,
            width,
            height,
            supports_streaming,
        } => Some(Attribute::Video {
            round_message: false,
            supports_streaming: *supports_streaming,
            duration: Duration::from_secs(u64::from(*duration_seconds)),
            w: *width as i32,
            h: *height as i32,
        }),
        Attachment::VideoNote {
            duration_seconds,
            length,
        } => Some(Attribute::Video {
            round_message: true,
            supports_streaming: false,
            duration: Duration::from_secs(u64::from(*duration_seconds)),
            w: *length as i32,
            h: *length as i32,
        }),
        Attachment::Audio {
            duration_seconds,
            title,
            performer,
        } => Some(Attribute::Audio {
            duration: Duration::from_secs(u64::from(*duration_seconds)),
            title: title.clone(),
            performer: performer.clone(),
        }),
        Attachment::Document => None,
    }
}

#[async_trait]
impl ChatClient for GrammersClient {
    async fn send_text(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> anyhow::Result<MessageRef> {
        let input = InputMessage::new()
            .text(text)
            .reply_to(reply_to.map(|id| id.0));
        self.send(chat, input).await
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> anyhow::Result<()> {
        let peer = self.peer(message.chat).await?;
        self.client
            .edit_message(peer, message.id.0, InputMessage::new().text(text))
            .await
            .map_err(|e| anyhow!("edit_message: {}", e))?;
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()> {
        let peer = self.peer(message.chat).await?;
        self.client
            .delete_messages(peer, &[message.id.0])
            .await
            .map_err(|e| anyhow!("delete_messages: {}", e))?;
        Ok(())
    }

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> anyhow::Result<()> {
        let peer = self.peer(chat).await?;
        self.client
            .action(peer)
            .oneshot(message_action(action))
            .await
            .map_err(|e| anyhow!("send_action: {}", e))?;
        Ok(())
    }

    async fn send_media(
        &self,
        media: OutgoingMedia,
        progress: mpsc::UnboundedSender<u64>,
    ) -> anyhow::Result<MessageRef> {
        let file = tokio::fs::File::open(&media.path).await?;
        let size = file.metadata().await?.len() as usize;
        let mut reader = ProgressReader {
            inner: file,
            progress,
        };
        let uploaded = self
            .client
            .upload_stream(&mut reader, size, media.file_name.clone())
            .await?;

        let mut input = caption_input(&media.caption)
            .reply_to(media.reply_to.map(|id| id.0))
            .document(uploaded);
        if let Some(attribute) = media_attribute(&media.attachment) {
            input = input.attribute(attribute);
        }
        if let Some(thumb) = &media.thumbnail {
            let thumb = self.client.upload_file(thumb).await?;
            input = input.thumbnail(thumb);
        }
        self.send(media.chat, input).await
    }
}

#[async_trait]
impl BotApi for GrammersClient {
    async fn send_keyboard(
        &self,
        message: MessageRef,
        text: &str,
        rows: Vec<Vec<Button>>,
    ) -> anyhow::Result<MessageRef> {
        let markup = reply_markup::inline(
            rows.into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|b| button::inline(b.label, b.data.into_bytes()))
                        .collect()
                })
                .collect::<Vec<Vec<_>>>(),
        );
        let input = InputMessage::new()
            .text(text)
            .reply_to(Some(message.id.0))
            .reply_markup(&markup);
        self.send(message.chat, input).await
    }

    async fn download_attachment(
        &self,
        message: MessageRef,
        destination: &Path,
    ) -> anyhow::Result<()> {
        let found = self.fetch_message(message).await?;
        let media = found
            .media()
            .ok_or_else(|| anyhow!("No media in message"))?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.client
            .download_media(&media, destination)
            .await
            .map_err(|e| anyhow!("download_media: {}", e))?;
        Ok(())
    }
}
