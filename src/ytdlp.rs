#![forbid(unsafe_code)]

//! [`Extractor`] backed by the `yt-dlp` command line tool.
//!
//! yt-dlp prints the resolved info JSON on stdout (`--dump-single-json
//! --no-simulate`) while it downloads, so a single invocation yields both the
//! media file and its title/duration/thumbnail.

use std::{
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    acquire::{ExtractedMetadata, ExtractionRequest, Extractor, ExtractorFailure},
    cookies::find_cookie_file,
};

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

const FORMAT_SELECTOR: &str = "bestvideo+bestaudio/best";
const MERGE_FORMAT: &str = "mp4";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
const REFERER: &str = "https://www.youtube.com/";
const ACCEPT_LANGUAGE: &str = "Accept-Language:en-US,en;q=0.9";
const POSTPROCESSOR_ARGS: &str = "ffmpeg:-c:v libx264 -c:a aac";
const EXTRACTOR_ARGS: &str = "youtube:player_client=android,web";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Subset of yt-dlp's info JSON that ends up in a record.
#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

impl From<InfoJson> for ExtractedMetadata {
    fn from(info: InfoJson) -> Self {
        Self {
            title: info.title,
            duration_seconds: info
                .duration
                .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
                .map(|seconds| seconds.round() as u64),
            thumbnail_url: info.thumbnail.filter(|url| !url.is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies_dir: None,
            timeout: None,
        }
    }

    /// Directory searched for `youtube_cookies.txt` / `cookies.txt` on every run.
    pub fn with_cookies_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cookies_dir = Some(dir.into());
        self
    }

    /// Kills the tool once this much wall-clock time has passed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `yt-dlp --version`, or `None` when the tool cannot be run.
    pub fn version(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!version.is_empty()).then_some(version)
    }

    fn build_command(&self, request: &ExtractionRequest<'_>, cookies: Option<&Path>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--format")
            .arg(FORMAT_SELECTOR)
            .arg("--output")
            .arg(request.output_template())
            .arg("--no-playlist")
            .arg("--merge-output-format")
            .arg(MERGE_FORMAT)
            .arg("--geo-bypass")
            .arg("--postprocessor-args")
            .arg(POSTPROCESSOR_ARGS)
            .arg("--extractor-args")
            .arg(EXTRACTOR_ARGS)
            .arg("--user-agent")
            .arg(USER_AGENT)
            .arg("--referer")
            .arg(REFERER)
            .arg("--add-header")
            .arg(ACCEPT_LANGUAGE)
            .arg("--dump-single-json")
            .arg("--no-simulate")
            .arg("--no-progress");

        if let Some(cookies) = cookies {
            command.arg("--cookies").arg(cookies);
        }

        command.arg("--").arg(request.source_url);
        command
    }

    /// Runs the child with stdout/stderr redirected to temp files so a chatty
    /// tool cannot fill a pipe while we wait on it.
    fn run(&self, mut command: Command) -> Result<(bool, String, String), ExtractorFailure> {
        let mut stdout = tempfile::tempfile().map_err(spawn_failure)?;
        let mut stderr = tempfile::tempfile().map_err(spawn_failure)?;
        command
            .stdin(Stdio::null())
            .stdout(stdout.try_clone().map_err(spawn_failure)?)
            .stderr(stderr.try_clone().map_err(spawn_failure)?);

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ExtractorFailure(format!(
                    "{} is not installed or not in PATH: {err}",
                    self.program.display()
                ))
            } else {
                ExtractorFailure(format!("launching {}: {err}", self.program.display()))
            }
        })?;

        let status = match self.timeout {
            None => child
                .wait()
                .map_err(|err| ExtractorFailure(format!("waiting for download: {err}")))?,
            Some(limit) => wait_with_deadline(&mut child, limit)?,
        };

        let stdout = read_all(&mut stdout)?;
        let stderr = read_all(&mut stderr)?;
        Ok((status.success(), stdout, stderr))
    }
}

impl Extractor for YtDlp {
    fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractedMetadata, ExtractorFailure> {
        let cookies = self.cookies_dir.as_deref().and_then(find_cookie_file);
        let command = self.build_command(request, cookies.as_deref());
        debug!(?command, "invoking extractor");

        let (success, stdout, stderr) = self.run(command)?;
        if !success {
            let text = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(ExtractorFailure(text.trim().to_string()));
        }

        parse_info(&stdout)
    }
}

/// Polls `child` until it exits or `limit` passes, killing it on timeout.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<ExitStatus, ExtractorFailure> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(err) => return Err(ExtractorFailure(format!("waiting for download: {err}"))),
        }
        if started.elapsed() >= limit {
            if let Err(err) = child.kill() {
                warn!("failed to kill timed out download: {err}");
            }
            if let Err(err) = child.wait() {
                warn!("failed to reap timed out download: {err}");
            }
            return Err(ExtractorFailure(format!(
                "download timed out after {:.1} seconds",
                limit.as_secs_f64()
            )));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// The info JSON is the last non-empty line yt-dlp printed.
fn parse_info(stdout: &str) -> Result<ExtractedMetadata, ExtractorFailure> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ExtractorFailure("Failed to extract video information".to_string()))?;
    let info: InfoJson = serde_json::from_str(line.trim()).map_err(|err| {
        ExtractorFailure(format!("Failed to extract video information: {err}"))
    })?;
    Ok(info.into())
}

fn read_all(file: &mut File) -> Result<String, ExtractorFailure> {
    let mut buffer = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut buffer))
        .map_err(|err| ExtractorFailure(format!("reading extractor output: {err}")))?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn spawn_failure(err: std::io::Error) -> ExtractorFailure {
    ExtractorFailure(format!("preparing extractor output capture: {err}"))
}
