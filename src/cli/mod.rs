use crate::config::Config;
use crate::media::{
    DownloadResult, DownloadStatus, PlatformId, ResolutionRequest, VideoInfo, VideoPipeline,
};
use crate::sign::{Clock, RequestToken, DEFAULT_TOKEN_WINDOW};
use crate::utils::format_number;
use anyhow::{Context, Result};
use clap::Subcommand;
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve share text or a link and print the video metadata
    Parse {
        /// Share text copied from an app, or a bare URL
        text: String,

        /// Skip detection and treat the link as this platform
        #[arg(long)]
        platform: Option<PlatformId>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Resolve and store the video and its cover
    Download {
        text: String,

        #[arg(long)]
        platform: Option<PlatformId>,

        /// Overrides `[download] output_dir`
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Overall limit in seconds, overrides `[download] timeout_secs`
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Issue or check a timestamp-keyed request token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// List supported platforms
    Platforms,
}

#[derive(Subcommand, Debug)]
pub enum TokenAction {
    Issue {
        plain: String,
    },
    Verify {
        timestamp: String,
        plain: String,
        encrypted: String,

        /// Accepted clock skew in seconds
        #[arg(long, default_value_t = DEFAULT_TOKEN_WINDOW.as_secs())]
        window_secs: u64,
    },
}

pub async fn run(command: Command, mut config: Config) -> Result<()> {
    match command {
        Command::Parse {
            text,
            platform,
            json,
        } => {
            let pipeline = VideoPipeline::from_config(&config)?;
            let request = ResolutionRequest::new(text, platform, Clock::System);
            let info = pipeline.parse(&request).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&info).context("Failed to encode video info")?
                );
            } else {
                print!("{}", render_info(&info));
            }
        }
        Command::Download {
            text,
            platform,
            output_dir,
            timeout,
        } => {
            if let Some(dir) = output_dir {
                config.download.output_dir = dir;
            }
            if let Some(secs) = timeout {
                config.download.timeout_secs = secs;
            }
            let pipeline = VideoPipeline::from_config(&config)?;
            let request = ResolutionRequest::new(text, platform, Clock::System);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, cancelling download");
                    on_interrupt.cancel();
                }
            });

            let (info, result) = pipeline.fetch(&request, &cancel).await?;
            print!("{}", render_info(&info));
            print!("{}", render_download(&result));
            if let DownloadStatus::Failed(e) = &result.status {
                error!("Download failed: {}", e);
                return Err(e.clone().into());
            }
        }
        Command::Token { action } => run_token(action)?,
        Command::Platforms => {
            for platform in PlatformId::ALL {
                println!("{:<12} {}", platform.as_str(), platform.display_name());
            }
        }
    }
    Ok(())
}

fn run_token(action: TokenAction) -> Result<()> {
    match action {
        TokenAction::Issue { plain } => {
            let token = RequestToken::issue(Clock::System.now_ms(), &plain);
            for (name, value) in token.headers() {
                println!("{}: {}", name, value);
            }
        }
        TokenAction::Verify {
            timestamp,
            plain,
            encrypted,
            window_secs,
        } => {
            let token = RequestToken {
                timestamp,
                plain,
                encrypted,
            };
            token
                .verify(Clock::System.now_ms(), Duration::from_secs(window_secs))
                .context("Token rejected")?;
            println!("token ok");
        }
    }
    Ok(())
}

fn render_info(info: &VideoInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{}] {}",
        info.platform.display_name(),
        if info.title.is_empty() { "(untitled)" } else { info.title.as_str() }
    );
    let _ = writeln!(out, "id:       {}", info.video_id);
    let _ = writeln!(out, "author:   {}", info.author);
    if let Some(secs) = info.duration_secs {
        let _ = writeln!(out, "duration: {}:{:02}", secs / 60, secs % 60);
    }
    if let Some(cover) = &info.cover_url {
        let _ = writeln!(out, "cover:    {}", cover);
    }
    for (i, media) in info.media.iter().enumerate() {
        let mut tags = Vec::new();
        if media.watermark_free {
            tags.push("no watermark".to_string());
        }
        if let Some(height) = media.height {
            tags.push(format!("{}p", height));
        }
        if let Some(bitrate) = media.bitrate {
            tags.push(format!("{} bps", format_number(bitrate)));
        }
        let _ = writeln!(out, "media {}:  {} [{}]", i + 1, media.url, tags.join(", "));
    }
    if let Some(audio) = &info.audio_url {
        let _ = writeln!(out, "audio:    {}", audio);
    }
    out
}

fn render_download(result: &DownloadResult) -> String {
    let mut out = String::new();
    match &result.status {
        DownloadStatus::Success => {
            let _ = writeln!(out, "status:   complete");
        }
        DownloadStatus::Partial => {
            let _ = writeln!(out, "status:   partial (cover missing)");
        }
        DownloadStatus::Failed(e) => {
            let _ = writeln!(out, "status:   failed: {}", e);
        }
    }
    if let Some(path) = &result.media_path {
        let _ = writeln!(
            out,
            "saved:    {} ({} bytes)",
            path.display(),
            format_number(result.bytes)
        );
    }
    if let Some(path) = &result.cover_path {
        let _ = writeln!(out, "cover:    {}", path.display());
    }
    out
}
