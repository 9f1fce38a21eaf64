/// Per-job progress never reports 100% from a status line; completion is only
/// signaled by the orchestrator on clean process exit, so a trailing status
/// line can never race a failed exit into a false "done".
const PROGRESS_CEILING: f64 = 0.999;

/// Parse one ffmpeg status line into a completion fraction.
///
/// Example input:
/// `frame= 1234 fps= 30 q=28.0 size=12345kB time=00:00:41.36 bitrate=244.8kbits/s speed=1.23x`
///
/// Returns `None` when the line carries no recognizable `time=` stamp or the
/// total duration is unknown; such lines are ignored, not errors.
pub fn parse_progress(line: &str, known_duration_secs: f64) -> Option<f64> {
    if !known_duration_secs.is_finite() || known_duration_secs <= 0.0 {
        return None;
    }

    let elapsed = extract_timestamp(line)?;
    Some((elapsed / known_duration_secs).min(PROGRESS_CEILING))
}

/// Extract the `time=HH:MM:SS.cc` elapsed timestamp, in seconds.
fn extract_timestamp(line: &str) -> Option<f64> {
    let rest = &line[line.find("time=")? + "time=".len()..];
    let stamp = rest.split_whitespace().next()?;

    // ffmpeg prints "N/A" before the first frame is encoded
    let mut parts = stamp.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    if !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
