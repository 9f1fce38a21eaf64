use std::path::Path;
use anyhow::{Context, Result};
use tokio::process::Command;

/// Ask ffprobe for a single format-level entry, printed bare.
async fn probe_entry(ffprobe_bin: &Path, file_path: &Path, entry: &str) -> Result<String> {
    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg(format!("format={}", entry))
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(file_path)
        .output()
        .await
        .with_context(|| format!("Failed to execute ffprobe for: {}", file_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            output.status.code().unwrap_or(-1),
            file_path.display(),
            stderr.lines().last().unwrap_or("unknown error")
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Total duration of a media file in seconds.
///
/// Consumed once per job before encoding so status lines can be turned into
/// fractions. Callers treat a failure as "duration unknown": the job still
/// runs, progress just degrades to no percentage.
pub async fn duration_secs(ffprobe_bin: &Path, file_path: &Path) -> Result<f64> {
    let value = probe_entry(ffprobe_bin, file_path, "duration").await?;
    value
        .parse::<f64>()
        .with_context(|| format!("ffprobe returned unparsable duration {value:?} for {}", file_path.display()))
}

/// On-disk size of a media file in bytes, probed through the same engine the
/// encodes use. Returns 0 when the probe fails (size display degrades, the
/// job itself is unaffected).
pub async fn file_size(ffprobe_bin: &Path, file_path: &Path) -> u64 {
    match probe_entry(ffprobe_bin, file_path, "size").await {
        Ok(value) => value.parse::<u64>().unwrap_or(0),
        Err(e) => {
            log::debug!("size probe failed for {}: {e:#}", file_path.display());
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_duration_probe_missing_binary_errors() {
        let err = duration_secs(
            &PathBuf::from("/nonexistent/ffprobe"),
            &PathBuf::from("/videos/a.mp4"),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to execute ffprobe"));
    }

    #[tokio::test]
    async fn test_size_probe_degrades_to_zero() {
        let size = file_size(
            &PathBuf::from("/nonexistent/ffprobe"),
            &PathBuf::from("/videos/a.mp4"),
        )
        .await;
        assert_eq!(size, 0);
    }
}
