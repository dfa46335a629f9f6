//! Source metadata resolution.
//!
//! A track request carries a user-facing URL; before it can be queued it is resolved once
//! into a direct media URL plus the metadata the scheduler needs (total duration).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

/// Resolved metadata for one source URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSource {
    /// The URL the user asked for.
    pub url: String,
    /// Direct media URL handed to the transcoder.
    pub media_url: String,
    pub title: Option<String>,
    /// Total source duration, when the resolver knows it.
    pub duration: Option<Duration>,
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<ResolvedSource>;
}

/// Resolver backed by a `youtube-dl` compatible executable (`-j` JSON output).
#[derive(Clone, Debug)]
pub struct YtdlResolver {
    program: PathBuf,
}

impl YtdlResolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for YtdlResolver {
    fn default() -> Self {
        Self::new("youtube-dl")
    }
}

#[derive(Debug, Deserialize)]
struct YtdlInfo {
    url: String,
    #[serde(default)]
    fulltitle: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[async_trait]
impl SourceResolver for YtdlResolver {
    async fn resolve(&self, url: &str) -> Result<ResolvedSource> {
        let output = Command::new(&self.program)
            .args(["-f", "bestaudio", "--no-playlist", "-j"])
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("run {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            ));
        }

        let source = parse_info(url, &output.stdout)?;
        tracing::debug!(
            url = %url,
            title = source.title.as_deref().unwrap_or(""),
            duration_ms = source.duration.map(|d| d.as_millis() as u64),
            "source resolved"
        );
        Ok(source)
    }
}

/// Parse the first JSON document printed by the resolver.
fn parse_info(url: &str, stdout: &[u8]) -> Result<ResolvedSource> {
    let first_line = stdout
        .split(|b| *b == b'\n')
        .find(|line| !line.iter().all(u8::is_ascii_whitespace))
        .ok_or_else(|| anyhow!("resolver printed no metadata"))?;
    let info: YtdlInfo = serde_json::from_slice(first_line).context("parse resolver json")?;

    let duration = info
        .duration
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    Ok(ResolvedSource {
        url: url.to_string(),
        media_url: info.url,
        title: info.fulltitle.or(info.title),
        duration,
    })
}
