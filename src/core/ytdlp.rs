use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use urlrelay_core::core::traits::MediaExtractor;
use urlrelay_core::models::transfer::{ExtractionJob, ExtractionResult};

use crate::core::process;

const OUTPUT_TEMPLATE: &str = "%(title)s - %(extractor)s-%(id)s.%(ext)s";
const THUMBNAIL_EXTENSIONS: [&str; 4] = ["webp", "jpg", "jpeg", "png"];

fn bin_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

pub async fn find_ytdlp() -> Option<PathBuf> {
    if process::is_available(bin_name(), "--version").await {
        return Some(PathBuf::from(bin_name()));
    }

    let managed = managed_ytdlp_path()?;
    if managed.exists() {
        return Some(managed);
    }

    None
}

fn managed_ytdlp_path() -> Option<PathBuf> {
    Some(process::managed_bin_dir()?.join(bin_name()))
}

pub async fn ensure_ytdlp() -> anyhow::Result<PathBuf> {
    if let Some(path) = find_ytdlp().await {
        return Ok(path);
    }

    download_ytdlp_binary().await
}

async fn download_ytdlp_binary() -> anyhow::Result<PathBuf> {
    let target = managed_ytdlp_path()
        .ok_or_else(|| anyhow!("Could not determine the data directory"))?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let download_url = if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    };

    tracing::info!("[ytdlp] fetching {}", download_url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()?;

    let response = client.get(download_url).send().await?;

    if !response.status().is_success() {
        return Err(anyhow!("Failed to download yt-dlp: HTTP {}", response.status()));
    }

    let bytes = response.bytes().await?;
    tokio::fs::write(&target, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(&target, perms).await?;
    }

    Ok(target)
}

/// Resolves and downloads page URLs with the yt-dlp CLI.
pub struct YtDlpExtractor {
    binary: PathBuf,
    cookie_file: PathBuf,
    proxy: Option<String>,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(
        binary: PathBuf,
        cookie_file: PathBuf,
        proxy: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            binary,
            cookie_file,
            proxy,
            timeout,
        }
    }

    /// Options shared by the info and download invocations.
    async fn common_args(&self, format: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            format.to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        if tokio::fs::try_exists(&self.cookie_file).await.unwrap_or(false) {
            tracing::debug!("[ytdlp] using cookies from {}", self.cookie_file.display());
            args.push("--cookies".to_string());
            args.push(self.cookie_file.to_string_lossy().to_string());
        }
        if let Some(proxy) = self.proxy.as_deref().filter(|p| !p.is_empty()) {
            args.push("--proxy".to_string());
            args.push(proxy.to_string());
        }
        args
    }

    async fn video_info(&self, url: &str, format: &str) -> anyhow::Result<serde_json::Value> {
        let mut args = self.common_args(format).await;
        args.extend(["--dump-json".to_string(), url.to_string()]);

        let output = process::command(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to run yt-dlp: {}", e))?;

        if !output.status.success() {
            return Err(anyhow!("{}", stderr_summary(&output.stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| anyhow!("yt-dlp returned invalid JSON: {}", e))
    }

    async fn download(&self, job: &ExtractionJob) -> anyhow::Result<Option<PathBuf>> {
        let mut args = self.common_args(job.mode.format_selector()).await;
        args.extend(download_args(&job.output_dir, &job.url));

        let output = process::command(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to run yt-dlp: {}", e))?;

        if !output.status.success() {
            return Err(anyhow!("{}", stderr_summary(&output.stderr)));
        }

        Ok(printed_path(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, job: &ExtractionJob) -> anyhow::Result<ExtractionResult> {
        let work = async {
            tracing::info!("[ytdlp] resolving {} ({:?})", job.url, job.mode);
            let info = self.video_info(&job.url, job.mode.format_selector()).await?;
            let mut result = parse_info(&info, &job.url);

            tokio::fs::create_dir_all(&job.output_dir).await?;
            let printed = self.download(job).await?;
            result.file_path = match printed {
                Some(path) => path,
                None => {
                    let id = info["id"].as_str().unwrap_or("");
                    find_downloaded_file(&job.output_dir, id).await?
                }
            };
            result.thumbnail_path =
                find_thumbnail(&result.file_path, result.thumbnail_url.as_deref()).await;

            tracing::info!("[ytdlp] downloaded {}", result.file_path.display());
            Ok::<_, anyhow::Error>(result)
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "yt-dlp did not finish within {} seconds",
                self.timeout.as_secs()
            )),
        }
    }
}

fn download_args(output_dir: &Path, url: &str) -> Vec<String> {
    let output_template = output_dir.join(OUTPUT_TEMPLATE).to_string_lossy().to_string();
    vec![
        "--write-thumbnail".to_string(),
        "--no-simulate".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-o".to_string(),
        output_template,
        url.to_string(),
    ]
}

/// Last non-empty line of stdout, which `--print after_move:filepath` writes.
fn printed_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(PathBuf::from)
}

/// The `ERROR:` lines yt-dlp printed, or the whole stderr when there are none.
fn stderr_summary(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let errors: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .collect();
    if errors.is_empty() {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            "yt-dlp failed without an error message".to_string()
        } else {
            trimmed.to_string()
        }
    } else {
        errors.join("\n")
    }
}

fn parse_info(json: &serde_json::Value, fallback_url: &str) -> ExtractionResult {
    let text = |key: &str| json[key].as_str().unwrap_or("").to_string();
    let number = |key: &str| json[key].as_f64().unwrap_or(0.0).max(0.0);

    let (width, height) = resolution(json);
    let webpage_url = match text("webpage_url") {
        url if url.is_empty() => fallback_url.to_string(),
        url => url,
    };

    ExtractionResult {
        file_path: PathBuf::new(),
        title: text("title"),
        webpage_url,
        duration_seconds: number("duration") as u32,
        width,
        height,
        uploader: text("uploader"),
        thumbnail_url: json["thumbnail"].as_str().map(str::to_string),
        thumbnail_path: None,
    }
}

/// Width and height of the selected format, read from the top level or,
/// failing that, from a `WxH` resolution string.
fn resolution(json: &serde_json::Value) -> (u32, u32) {
    let width = json["width"].as_u64();
    let height = json["height"].as_u64();
    if let (Some(w), Some(h)) = (width, height) {
        return (w as u32, h as u32);
    }
    json["resolution"]
        .as_str()
        .and_then(|r| r.split_once('x'))
        .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)))
        .unwrap_or((0, 0))
}

fn thumbnail_extension(thumbnail_url: &str) -> Option<String> {
    let parsed = url::Url::parse(thumbnail_url).ok()?;
    let last = parsed.path_segments()?.next_back()?.to_string();
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 5).then_some(ext)
}

async fn find_thumbnail(media: &Path, thumbnail_url: Option<&str>) -> Option<PathBuf> {
    let mut extensions: Vec<String> = thumbnail_url
        .and_then(thumbnail_extension)
        .into_iter()
        .collect();
    extensions.extend(THUMBNAIL_EXTENSIONS.iter().map(|e| e.to_string()));

    for ext in extensions {
        let candidate = media.with_extension(&ext);
        if candidate != media && tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

async fn find_downloaded_file(output_dir: &Path, video_id: &str) -> anyhow::Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(output_dir).await?;
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.') {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| THUMBNAIL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image || video_id.is_empty() || !name.contains(video_id) {
            continue;
        }

        if let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) {
            match &best {
                Some((_, best_time)) if modified <= *best_time => {}
                _ => best = Some((path, modified)),
            }
        }
    }

    best.map(|(p, _)| p)
        .ok_or_else(|| anyhow!("Downloaded file not found in {}", output_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn info_fields() {
        let info = json!({
            "id": "abc",
            "title": "Song",
            "webpage_url": "https://video.example/watch?v=abc",
            "duration": 185.7,
            "uploader": "Channel",
            "width": 1280,
            "height": 720,
            "thumbnail": "https://img.example/vi/abc/maxresdefault.webp"
        });
        let result = parse_info(&info, "https://fallback");
        assert_eq!(result.title, "Song");
        assert_eq!(result.duration_seconds, 185);
        assert_eq!((result.width, result.height), (1280, 720));
        assert_eq!(result.uploader, "Channel");
        assert_eq!(result.webpage_url, "https://video.example/watch?v=abc");
    }

    #[test]
    fn info_missing_fields() {
        let result = parse_info(&json!({"resolution": "640x360"}), "https://fallback");
        assert_eq!(result.title, "");
        assert_eq!(result.duration_seconds, 0);
        assert_eq!((result.width, result.height), (640, 360));
        assert_eq!(result.webpage_url, "https://fallback");
        assert!(result.thumbnail_url.is_none());
    }

    #[test]
    fn audio_only_resolution() {
        assert_eq!(resolution(&json!({"resolution": "audio only"})), (0, 0));
    }

    #[test]
    fn printed_path_takes_last_line() {
        let stdout = "\n/tmp/42/Song - youtube-abc.webm\n\n";
        assert_eq!(
            printed_path(stdout),
            Some(PathBuf::from("/tmp/42/Song - youtube-abc.webm"))
        );
        assert_eq!(printed_path("  \n"), None);
    }

    #[test]
    fn stderr_prefers_error_lines() {
        let stderr = b"WARNING: something\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(stderr_summary(stderr), "ERROR: [youtube] abc: Video unavailable");
        assert_eq!(stderr_summary(b"boom\n"), "boom");
    }

    #[test]
    fn download_args_use_template() {
        let args = download_args(Path::new("/tmp/42"), "https://v.example/x");
        let template = args.iter().position(|a| a == "-o").map(|i| &args[i + 1]).unwrap();
        assert_eq!(
            template,
            &Path::new("/tmp/42").join(OUTPUT_TEMPLATE).to_string_lossy().to_string()
        );
        assert!(args.contains(&"--write-thumbnail".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://v.example/x"));
    }

    #[test]
    fn thumbnail_extension_from_url() {
        assert_eq!(
            thumbnail_extension("https://i.ytimg.com/vi/abc/maxresdefault.jpg?x=1").as_deref(),
            Some("jpg")
        );
        assert_eq!(thumbnail_extension("https://img.example/thumb"), None);
    }

    #[tokio::test]
    async fn finds_written_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("Song - youtube-abc.m4a");
        std::fs::write(&media, b"a").unwrap();
        assert_eq!(find_thumbnail(&media, None).await, None);

        let thumb = dir.path().join("Song - youtube-abc.webp");
        std::fs::write(&thumb, b"img").unwrap();
        assert_eq!(find_thumbnail(&media, None).await, Some(thumb));
    }

    #[tokio::test]
    async fn finds_file_by_id_ignoring_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Song - youtube-abc.webp"), b"img").unwrap();
        std::fs::write(dir.path().join("Song - youtube-abc.mp4.part"), b"p").unwrap();
        std::fs::write(dir.path().join("Song - youtube-abc.mp4"), b"v").unwrap();
        std::fs::write(dir.path().join("Other - youtube-zzz.mp4"), b"v").unwrap();

        let found = find_downloaded_file(dir.path(), "abc").await.unwrap();
        assert_eq!(found, dir.path().join("Song - youtube-abc.mp4"));
        assert!(find_downloaded_file(dir.path(), "nope").await.is_err());
    }
}
