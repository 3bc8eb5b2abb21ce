//! Transcode Service
//!
//! Produces quality derivatives and previews of a local source file by
//! running the `ffmpeg` command-line tool.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::EncodeError;
use async_trait::async_trait;
use converter_config::EncoderConfig;
use converter_types::Quality;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines of ffmpeg stderr kept in a failure report
const STDERR_TAIL_LINES: usize = 20;

/// Derivative production used by the converter
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode `source` scaled to the height of `quality`
    async fn convert(
        &self,
        temp_dir: &Path,
        source: &Path,
        quality: Quality,
    ) -> Result<PathBuf, EncodeError>;

    /// Copy the opening segment of `source` without re-encoding
    async fn make_preview(&self, temp_dir: &Path, source: &Path) -> Result<PathBuf, EncodeError>;
}

/// Transcoder running the ffmpeg executable
pub struct FfmpegEncoder {
    binary: PathBuf,
    threads: usize,
    preview_duration: Duration,
    cancel: CancellationToken,
}

impl FfmpegEncoder {
    /// Create an encoder; cancelling `cancel` kills running ffmpeg processes
    pub fn new(config: &EncoderConfig, cancel: CancellationToken) -> Self {
        Self {
            binary: config.ffmpeg_path.clone(),
            threads: config.threads,
            preview_duration: config.preview_duration,
            cancel,
        }
    }

    /// Check that ffmpeg can be run, returning its version banner
    pub async fn probe(&self) -> Result<String, EncodeError> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(EncodeError::Failed {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    fn scale_args(&self, source: &Path, output: &Path, height: u32) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            source.into(),
            "-profile:v".into(),
            "baseline".into(),
            "-movflags".into(),
            "+faststart".into(),
            "-vcodec".into(),
            "libx264".into(),
            "-crf".into(),
            "28".into(),
            "-preset".into(),
            "faster".into(),
            "-acodec".into(),
            "aac".into(),
            // Keep the aspect ratio with an even width
            "-filter:v".into(),
            format!("scale=trunc(oh*a/2)*2:{}", height).into(),
        ];
        if self.threads > 0 {
            args.push("-threads".into());
            args.push(self.threads.to_string().into());
        }
        args.push(output.into());
        args
    }

    fn preview_args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-ss".into(),
            "00:00:00".into(),
            "-to".into(),
            clock_time(self.preview_duration).into(),
            "-i".into(),
            source.into(),
            "-c".into(),
            "copy".into(),
            output.into(),
        ]
    }

    async fn run(&self, args: Vec<OsString>, output: PathBuf) -> Result<PathBuf, EncodeError> {
        debug!(binary = %self.binary.display(), ?args, "Running ffmpeg");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future kills the child
        let result = tokio::select! {
            result = child.wait_with_output() => result?,
            _ = self.cancel.cancelled() => {
                warn!(output = %output.display(), "Transcoding cancelled");
                discard(&output).await;
                return Err(EncodeError::Cancelled);
            }
        };

        if !result.status.success() {
            discard(&output).await;
            return Err(EncodeError::Failed {
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            });
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(EncodeError::MissingOutput(output));
        }

        info!(file = %output.display(), "Transcoding completed");
        Ok(output)
    }
}

#[async_trait]
impl Transcoder for FfmpegEncoder {
    async fn convert(
        &self,
        temp_dir: &Path,
        source: &Path,
        quality: Quality,
    ) -> Result<PathBuf, EncodeError> {
        let Some(height) = quality.height() else {
            return self.make_preview(temp_dir, source).await;
        };

        let output = output_path(temp_dir, source, quality)?;
        let args = self.scale_args(source, &output, height);
        self.run(args, output).await
    }

    async fn make_preview(&self, temp_dir: &Path, source: &Path) -> Result<PathBuf, EncodeError> {
        let output = output_path(temp_dir, source, Quality::Preview)?;
        let args = self.preview_args(source, &output);
        self.run(args, output).await
    }
}

/// `{temp_dir}/v-{tag}-{source file name}`
pub fn output_path(temp_dir: &Path, source: &Path, quality: Quality) -> Result<PathBuf, EncodeError> {
    let file_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| EncodeError::InvalidSource(source.to_path_buf()))?;

    Ok(temp_dir.join(format!("v-{}-{}", quality.tag(), file_name)))
}

/// `HH:MM:SS` for ffmpeg's `-to`
fn clock_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(file = %path.display(), error = %e, "Failed to remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(binary: &Path, threads: usize) -> FfmpegEncoder {
        let config = EncoderConfig {
            ffmpeg_path: binary.to_path_buf(),
            threads,
            preview_duration: Duration::from_secs(180),
        };
        FfmpegEncoder::new(&config, CancellationToken::new())
    }

    fn as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_output_path_is_quality_tagged() {
        let path = output_path(Path::new("/tmp/work"), Path::new("/tmp/work/lesson-1.mp4"), Quality::P480).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/work/v-480-lesson-1.mp4"));

        let preview = output_path(Path::new("/tmp/work"), Path::new("lesson-1.mp4"), Quality::Preview).unwrap();
        assert_eq!(preview, PathBuf::from("/tmp/work/v-preview-lesson-1.mp4"));
    }

    #[test]
    fn test_output_path_requires_file_name() {
        assert!(matches!(
            output_path(Path::new("/tmp"), Path::new("/"), Quality::P360),
            Err(EncodeError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_scale_args() {
        let args = as_strings(&encoder(Path::new("ffmpeg"), 0).scale_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            720,
        ));

        assert!(args.contains(&"scale=trunc(oh*a/2)*2:720".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(!args.contains(&"-threads".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_thread_limit_passed_through() {
        let args = as_strings(&encoder(Path::new("ffmpeg"), 3).scale_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            360,
        ));

        let position = args.iter().position(|a| a == "-threads").unwrap();
        assert_eq!(args[position + 1], "3");
    }

    #[test]
    fn test_preview_args_copy_opening_segment() {
        let args = as_strings(&encoder(Path::new("ffmpeg"), 0).preview_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
        ));

        assert_eq!(
            args,
            vec!["-y", "-ss", "00:00:00", "-to", "00:03:00", "-i", "in.mp4", "-c", "copy", "out.mp4"]
        );
    }

    #[test]
    fn test_clock_time() {
        assert_eq!(clock_time(Duration::from_secs(180)), "00:03:00");
        assert_eq!(clock_time(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(stderr.as_bytes());

        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn stub(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("ffmpeg-stub");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_convert_writes_tagged_output() {
            let dir = TempDir::new().unwrap();
            // The output file is the last argument
            let binary = stub(&dir, "for last; do :; done\necho encoded > \"$last\"");
            let source = dir.path().join("clip.mp4");
            std::fs::write(&source, b"source").unwrap();

            let output = encoder(&binary, 0)
                .convert(dir.path(), &source, Quality::P1080)
                .await
                .unwrap();

            assert_eq!(output, dir.path().join("v-1080-clip.mp4"));
            assert!(output.exists());
        }

        #[tokio::test]
        async fn test_failed_exit_reports_stderr() {
            let dir = TempDir::new().unwrap();
            let binary = stub(&dir, "echo 'Invalid data found' >&2\nexit 1");
            let source = dir.path().join("clip.mp4");

            let err = encoder(&binary, 0)
                .make_preview(dir.path(), &source)
                .await
                .unwrap_err();

            match err {
                EncodeError::Failed { stderr, .. } => assert!(stderr.contains("Invalid data found")),
                other => panic!("unexpected error: {}", other),
            }
        }

        #[tokio::test]
        async fn test_success_without_output_is_an_error() {
            let dir = TempDir::new().unwrap();
            let binary = stub(&dir, "exit 0");
            let source = dir.path().join("clip.mp4");

            let err = encoder(&binary, 0)
                .convert(dir.path(), &source, Quality::P360)
                .await
                .unwrap_err();

            assert!(matches!(err, EncodeError::MissingOutput(_)));
        }

        #[tokio::test]
        async fn test_cancel_stops_running_process() {
            let dir = TempDir::new().unwrap();
            let binary = stub(&dir, "sleep 30");
            let source = dir.path().join("clip.mp4");
            let cancel = CancellationToken::new();
            let config = EncoderConfig {
                ffmpeg_path: binary,
                threads: 0,
                preview_duration: Duration::from_secs(180),
            };
            let encoder = FfmpegEncoder::new(&config, cancel.clone());

            let trigger = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            });

            let err = tokio::time::timeout(
                Duration::from_secs(10),
                encoder.convert(dir.path(), &source, Quality::P720),
            )
            .await
            .expect("cancellation should end the run")
            .unwrap_err();

            assert!(matches!(err, EncodeError::Cancelled));
            trigger.await.unwrap();
        }

        #[tokio::test]
        async fn test_probe_reads_version_banner() {
            let dir = TempDir::new().unwrap();
            let binary = stub(&dir, "echo 'ffmpeg version 6.1'");

            let banner = encoder(&binary, 0).probe().await.unwrap();
            assert_eq!(banner, "ffmpeg version 6.1");
        }

        #[tokio::test]
        async fn test_probe_missing_binary() {
            let dir = TempDir::new().unwrap();
            let result = encoder(&dir.path().join("absent"), 0).probe().await;

            assert!(matches!(result, Err(EncodeError::Spawn(_))));
        }
    }
}
