//! Executes one planned encode as an external ffmpeg process, streaming
//! status lines back as progress events and honoring the kill switch.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::config::Settings;
use crate::orchestrator::{EncodeRunner, ExitOutcome, JobEvent, LaunchRequest, OperationHandle};
use crate::probe;
use crate::progress;
use crate::trash;

/// Runner backed by the real ffmpeg binary from the settings snapshot.
pub struct FfmpegRunner;

impl EncodeRunner for FfmpegRunner {
    fn launch(&mut self, request: LaunchRequest) -> Result<OperationHandle> {
        let mut child = Command::new(&request.settings.ffmpeg_bin)
            .args(request.plan.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to spawn {} for {}",
                    request.settings.ffmpeg_bin.display(),
                    request.source.display()
                )
            })?;

        let stderr = child
            .stderr
            .take()
            .context("ffmpeg child has no stderr pipe")?;

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(child, stderr, kill_rx, request));
        Ok(OperationHandle::new(kill_tx))
    }
}

/// Drive one encode to its end: relay progress, react to the kill switch,
/// classify the exit, and run the post-steps. Emits exactly one `Exited`.
async fn supervise(
    mut child: Child,
    stderr: tokio::process::ChildStderr,
    kill_rx: oneshot::Receiver<()>,
    request: LaunchRequest,
) {
    // a dropped handle closes the channel without firing; that means "let it
    // run", not "kill it"
    let killed = async move {
        if kill_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(killed);

    // ffmpeg status lines only carry elapsed time; the total duration turns
    // them into fractions. Unknown duration just means no percentage.
    let duration = match probe::duration_secs(&request.settings.ffprobe_bin, &request.source).await
    {
        Ok(d) => d,
        Err(e) => {
            log::warn!("duration probe failed for {}: {e:#}", request.source.display());
            0.0
        }
    };

    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            _ = &mut killed => {
                kill_and_reap(&mut child).await;
                let _ = request.events.send(JobEvent::Exited {
                    job_id: request.job_id,
                    run: request.run,
                    outcome: ExitOutcome::Killed,
                });
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(fraction) = progress::parse_progress(&line, duration) {
                        let _ = request.events.send(JobEvent::Progress {
                            job_id: request.job_id,
                            run: request.run,
                            fraction,
                        });
                    }
                }
                // EOF or a broken pipe: the process is winding down
                Ok(None) | Err(_) => break,
            },
        }
    }

    // stderr is closed; stay kill-responsive while waiting for the exit code
    let status = tokio::select! {
        _ = &mut killed => {
            kill_and_reap(&mut child).await;
            let _ = request.events.send(JobEvent::Exited {
                job_id: request.job_id,
                run: request.run,
                outcome: ExitOutcome::Killed,
            });
            return;
        }
        status = child.wait() => status,
    };

    let outcome = match status {
        Ok(status) if status.success() => {
            let output_size =
                match probe::file_size(&request.settings.ffprobe_bin, &request.output).await {
                    0 => None,
                    size => Some(size),
                };
            if request.settings.enable_thumbnail {
                if let Err(e) =
                    extract_thumbnail(&request.settings, &request.source, &request.output).await
                {
                    log::warn!(
                        "thumbnail extraction failed for {}: {e:#}",
                        request.source.display()
                    );
                }
            }
            if request.settings.move_to_trash {
                match trash::move_to_trash(&request.source) {
                    Ok(dest) => log::info!(
                        "moved {} to {}",
                        request.source.display(),
                        dest.display()
                    ),
                    Err(e) => log::warn!(
                        "could not trash {}: {e:#}",
                        request.source.display()
                    ),
                }
            }
            ExitOutcome::Success { output_size }
        }
        Ok(status) => match status.code() {
            // no exit code means signal-terminated, which is a cancellation
            None => ExitOutcome::Killed,
            Some(code) => ExitOutcome::Failure {
                detail: format!("ffmpeg exited with code {code}"),
            },
        },
        Err(e) => ExitOutcome::Failure {
            detail: format!("failed to reap ffmpeg: {e}"),
        },
    };

    let _ = request.events.send(JobEvent::Exited {
        job_id: request.job_id,
        run: request.run,
        outcome,
    });
}

/// `<output stem>_thumb.jpg` in the output's directory.
fn thumbnail_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output.with_file_name(format!("{stem}_thumb.jpg"))
}

/// Best-effort post-step: grab one frame a second into the source as a
/// preview image next to the output. Failures never affect the encode result.
async fn extract_thumbnail(settings: &Settings, source: &Path, output: &Path) -> Result<()> {
    let thumb = thumbnail_path(output);
    let status = Command::new(&settings.ffmpeg_bin)
        .arg("-ss")
        .arg("1")
        .arg("-i")
        .arg(source)
        .arg("-frames:v")
        .arg("1")
        .arg("-q:v")
        .arg("2")
        .arg("-y")
        .arg(&thumb)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .with_context(|| format!("Failed to run ffmpeg for {}", thumb.display()))?;
    anyhow::ensure!(status.success(), "thumbnail ffmpeg exited with {status}");
    log::info!("saved thumbnail {}", thumb.display());
    Ok(())
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::warn!("failed to kill ffmpeg: {e}");
    }
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    use crate::capability::EncoderCapabilities;
    use crate::config::Settings;
    use crate::planner;

    fn request(events: mpsc::UnboundedSender<JobEvent>) -> LaunchRequest {
        let settings = Settings {
            ffmpeg_bin: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe_bin: PathBuf::from("/nonexistent/ffprobe"),
            ..Settings::default()
        };
        let source = PathBuf::from("/videos/clip.mp4");
        let output = settings.output_path_for(&source);
        let plan = planner::plan(&source, &output, &settings, &EncoderCapabilities::software_only());
        LaunchRequest {
            job_id: uuid::Uuid::new_v4(),
            run: 0,
            source,
            output,
            plan,
            settings,
            events,
        }
    }

    #[tokio::test]
    async fn test_missing_binary_fails_at_launch() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let err = FfmpegRunner.launch(request(events_tx)).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to spawn"));
        // launch failures are reported by the return value, not an event
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_true_binary_reports_success() {
        // substitute a trivially succeeding binary for ffmpeg; the output
        // size probe fails and degrades to None
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut req = request(events_tx);
        req.settings.ffmpeg_bin = PathBuf::from("/bin/true");
        let _handle = FfmpegRunner.launch(req).unwrap();

        let event = events_rx.recv().await.unwrap();
        match event {
            JobEvent::Exited { outcome: ExitOutcome::Success { output_size }, .. } => {
                assert_eq!(output_size, None);
            }
            other => panic!("expected success exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_binary_reports_exit_code() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut req = request(events_tx);
        req.settings.ffmpeg_bin = PathBuf::from("/bin/false");
        let _handle = FfmpegRunner.launch(req).unwrap();

        let event = events_rx.recv().await.unwrap();
        match event {
            JobEvent::Exited { outcome: ExitOutcome::Failure { detail }, .. } => {
                assert!(detail.contains("code 1"), "got: {detail}");
            }
            other => panic!("expected failure exit, got {other:?}"),
        }
    }

    #[test]
    fn test_thumbnail_path_sits_next_to_the_output() {
        assert_eq!(
            thumbnail_path(Path::new("/out/clip_compressed.webm")),
            PathBuf::from("/out/clip_compressed_thumb.jpg")
        );
    }

    #[tokio::test]
    async fn test_thumbnail_failure_does_not_fail_the_encode() {
        // the shell exits 0 for the encode but rejects the thumbnail
        // arguments, exercising the best-effort path
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut req = request(events_tx);
        req.settings.ffmpeg_bin = PathBuf::from("/bin/sh");
        req.settings.enable_thumbnail = true;
        req.plan = planner::EncodePlan::from_args(vec!["-c".to_string(), "exit 0".to_string()]);
        let _handle = FfmpegRunner.launch(req).unwrap();

        let event = events_rx.recv().await.unwrap();
        match event {
            JobEvent::Exited { outcome: ExitOutcome::Success { .. }, .. } => {}
            other => panic!("expected success exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kill_switch_reports_killed() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut req = request(events_tx);
        // a process that would run forever without the kill
        req.settings.ffmpeg_bin = PathBuf::from("/bin/sleep");
        req.plan = planner::EncodePlan::from_args(vec!["60".to_string()]);

        let mut handle = FfmpegRunner.launch(req).unwrap();
        handle.kill();

        let event = events_rx.recv().await.unwrap();
        match event {
            JobEvent::Exited { outcome: ExitOutcome::Killed, .. } => {}
            other => panic!("expected killed exit, got {other:?}"),
        }
    }
}
