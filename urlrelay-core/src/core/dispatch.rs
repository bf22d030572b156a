use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::core::events::{StatusMessage, StatusSink};
use crate::core::progress::{render_upload, ProgressThrottle};
use crate::core::traits::{ChatClient, MediaProbe};
use crate::error::UploadError;
use crate::fs_paths::remove_quietly;
use crate::messages;
use crate::models::media::{Attachment, Caption, MediaMetadata, OutgoingMedia};
use crate::models::settings::TransferSettings;
use crate::models::transfer::{ChatId, MessageId, MessageRef, SendType};

/// A local file ready to be sent, with everything needed to build the
/// attachment.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub chat: ChatId,
    pub reply_to: Option<MessageId>,
    pub send_type: SendType,
    pub path: PathBuf,
    pub file_name: String,
    pub caption: Caption,
    /// Candidate thumbnail; attached only if it exists on disk.
    pub thumbnail: Option<PathBuf>,
    pub audio_title: Option<String>,
    pub audio_performer: Option<String>,
    /// Metadata already known from the source. Skips probing when set.
    pub known_metadata: Option<MediaMetadata>,
    /// Extra files removed together with the upload.
    pub side_artifacts: Vec<PathBuf>,
    pub download_elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub message: MessageRef,
    pub bytes: u64,
    pub send_type: SendType,
    pub upload_elapsed: Duration,
}

pub async fn dispatch<S: StatusSink>(
    client: &dyn ChatClient,
    probe: &dyn MediaProbe,
    job: UploadJob,
    status: &mut StatusMessage<S>,
    settings: &TransferSettings,
) -> Result<UploadReport, UploadError> {
    let size = match tokio::fs::metadata(&job.path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            cleanup(&job).await;
            return Err(UploadError::FileMissing(job.path.clone()));
        }
        Err(e) => {
            cleanup(&job).await;
            return Err(e.into());
        }
    };
    if size == 0 {
        cleanup(&job).await;
        return Err(UploadError::EmptyFile(job.path.clone()));
    }

    status.update(messages::UPLOAD_START).await;

    if size > settings.max_file_size {
        tracing::warn!(
            "[upload] {} is {} bytes, over the {} byte limit",
            job.path.display(),
            size,
            settings.max_file_size
        );
        cleanup(&job).await;
        return Err(UploadError::FileTooLarge {
            size,
            max: settings.max_file_size,
        });
    }

    let metadata = match job.known_metadata {
        Some(known) => known,
        None => probe_or_default(probe, &job).await,
    };
    let attachment = build_attachment(&job, metadata);

    let thumbnail = match &job.thumbnail {
        Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => Some(path.clone()),
        _ => None,
    };

    let media = OutgoingMedia {
        chat: job.chat,
        reply_to: job.reply_to,
        path: job.path.clone(),
        file_name: job.file_name.clone(),
        caption: job.caption.clone(),
        thumbnail,
        attachment,
    };

    tracing::info!(
        "[upload] sending {} as {:?} ({} bytes)",
        job.path.display(),
        job.send_type,
        size
    );

    let started = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
    let send = client.send_media(media, tx);
    tokio::pin!(send);

    let mut throttle = ProgressThrottle::new(settings.progress_interval());
    let mut uploaded: u64 = 0;
    let result = loop {
        tokio::select! {
            sent = &mut send => break sent,
            Some(n) = rx.recv() => {
                uploaded = (uploaded + n).min(size);
                let elapsed = started.elapsed();
                if throttle.should_emit(elapsed, uploaded >= size) {
                    status
                        .update(render_upload(
                            messages::UPLOAD_START,
                            uploaded,
                            size,
                            elapsed.as_secs_f64(),
                        ))
                        .await;
                }
            }
        }
    };
    let upload_elapsed = started.elapsed();

    cleanup(&job).await;

    let message = result.map_err(|e| {
        tracing::error!("[upload] {} failed: {:#}", job.path.display(), e);
        UploadError::UploadFailed(e)
    })?;

    status
        .update(messages::after_upload(
            job.download_elapsed.as_secs(),
            upload_elapsed.as_secs(),
        ))
        .await;

    tracing::info!(
        "[upload] {} done in {:?}",
        job.file_name,
        upload_elapsed
    );

    Ok(UploadReport {
        message,
        bytes: size,
        send_type: job.send_type,
        upload_elapsed,
    })
}

async fn probe_or_default(probe: &dyn MediaProbe, job: &UploadJob) -> MediaMetadata {
    if job.send_type == SendType::Document {
        return MediaMetadata::default();
    }
    match probe.probe(&job.path).await {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!("[upload] probe failed for {}: {:#}", job.path.display(), e);
            MediaMetadata::default()
        }
    }
}

fn build_attachment(job: &UploadJob, meta: MediaMetadata) -> Attachment {
    match job.send_type {
        SendType::Video => Attachment::Video {
            duration_seconds: meta.duration_seconds,
            width: meta.width,
            height: meta.height,
            supports_streaming: true,
        },
        SendType::Audio => Attachment::Audio {
            duration_seconds: meta.duration_seconds,
            title: job.audio_title.clone(),
            performer: job.audio_performer.clone(),
        },
        SendType::VideoNote => Attachment::VideoNote {
            duration_seconds: meta.duration_seconds,
            length: meta.width,
        },
        SendType::Document => Attachment::Document,
    }
}

async fn cleanup(job: &UploadJob) {
    remove_quietly(&job.path).await;
    for artifact in &job.side_artifacts {
        remove_quietly(artifact).await;
    }
}
