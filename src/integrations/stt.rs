//! Audio transcription via `ffmpeg` and `llm groq-whisper`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::config::SttConfig;
use crate::transport::BoxFuture;
use crate::{AppError, Result};

/// Exit code reported when a step times out.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Longest window allowed for the ffmpeg conversion step.
const MAX_CONVERT_SECONDS: u64 = 120;

/// Characters of tool output quoted in error messages.
const ERROR_OUTPUT_CHARS: usize = 400;

/// Turns an audio file into text.
pub trait Transcriber: Send + Sync {
    /// Transcribe the file at `audio`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcription` on any failure.
    fn transcribe<'a>(&'a self, audio: &'a Path) -> BoxFuture<'a, Result<String>>;
}

/// Cut `text` to `max_chars` characters, appending `…` when shortened.
/// A limit of zero disables truncation.
#[must_use]
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

/// Shells out to `ffmpeg` then `llm groq-whisper`.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    config: SttConfig,
}

impl CommandTranscriber {
    /// Build from transcription settings.
    #[must_use]
    pub fn new(config: SttConfig) -> Self {
        Self { config }
    }

    async fn run(&self, audio: &Path) -> Result<String> {
        if !self.config.enabled {
            return Err(AppError::Transcription("transcription is disabled".into()));
        }

        let scratch = tempfile::Builder::new()
            .prefix("agent-courier-stt-")
            .tempdir()
            .map_err(|err| AppError::Transcription(format!("scratch dir: {err}")))?;
        let mp3 = scratch.path().join("audio.mp3");
        let step_timeout = Duration::from_secs(self.config.timeout_seconds.max(1));

        let convert: Vec<String> = vec![
            "ffmpeg".into(),
            "-y".into(),
            "-i".into(),
            audio.display().to_string(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            "-c:a".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            "128k".into(),
            mp3.display().to_string(),
        ];
        let (code, out) = run_captured(
            &convert,
            step_timeout.min(Duration::from_secs(MAX_CONVERT_SECONDS)),
        )
        .await?;
        if code != 0 || !mp3.exists() {
            return Err(AppError::Transcription(format!(
                "ffmpeg failed ({code}): {}",
                excerpt(&out)
            )));
        }

        let mut whisper: Vec<String> = vec![
            "llm".into(),
            "groq-whisper".into(),
            "--model".into(),
            self.config.model.clone(),
            "--response-format".into(),
            "text".into(),
        ];
        if let Some(language) = &self.config.language {
            whisper.push("--language".into());
            whisper.push(language.clone());
        }
        if let Some(prompt) = &self.config.prompt {
            whisper.push("--prompt".into());
            whisper.push(prompt.clone());
        }
        whisper.push(mp3.display().to_string());

        let (code, out) = run_captured(&whisper, step_timeout).await?;
        if code != 0 {
            return Err(AppError::Transcription(format!(
                "transcription failed ({code}): {}",
                excerpt(&out)
            )));
        }

        let text = out.trim();
        if text.is_empty() {
            return Err(AppError::Transcription("empty transcription output".into()));
        }
        info!(chars = text.chars().count(), "transcription complete");
        Ok(text.to_owned())
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe<'a>(&'a self, audio: &'a Path) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.run(audio))
    }
}

fn excerpt(out: &str) -> String {
    out.trim().chars().take(ERROR_OUTPUT_CHARS).collect()
}

/// Run `argv`, returning the exit code and its output: stdout alone on
/// success, stdout plus stderr otherwise. A timeout reports code 124 with
/// empty output.
async fn run_captured(argv: &[String], timeout: Duration) -> Result<(i32, String)> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AppError::Transcription("empty command".into()))?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AppError::Transcription(format!("{program} not found"))
            } else {
                AppError::Transcription(format!("failed to start {program}: {err}"))
            }
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => Ok((TIMEOUT_EXIT_CODE, String::new())),
        Ok(Err(err)) => Err(AppError::Transcription(format!("{program} wait failed: {err}"))),
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                text.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            Ok((output.status.code().unwrap_or(-1), text))
        }
    }
}
