use std::path::Path;
use anyhow::{Context, Result};
use tokio::process::Command;

/// AV1 encoder implementations the runtime ffmpeg may expose, in the order we
/// prefer them when several are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Av1Encoder {
    /// SVT-AV1 software encoder
    SvtAv1,
    /// NVIDIA NVENC hardware encoder
    Nvenc,
    /// Intel QuickSync hardware encoder
    Qsv,
    /// AMD AMF hardware encoder
    Amf,
    /// libaom reference encoder (slow, always-works fallback)
    LibAom,
}

impl Av1Encoder {
    /// The ffmpeg `-c:v` name for this implementation
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Av1Encoder::SvtAv1 => "libsvtav1",
            Av1Encoder::Nvenc => "av1_nvenc",
            Av1Encoder::Qsv => "av1_qsv",
            Av1Encoder::Amf => "av1_amf",
            Av1Encoder::LibAom => "libaom-av1",
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, Av1Encoder::Nvenc | Av1Encoder::Qsv | Av1Encoder::Amf)
    }
}

/// Snapshot of which encoder implementations the runtime environment reports.
///
/// Detected once per run and handed to the planner as plain data, so planning
/// stays pure and two plans built from the same snapshot are identical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderCapabilities {
    pub available: Vec<Av1Encoder>,
}

impl EncoderCapabilities {
    /// Capabilities listing every implementation; handy in tests.
    pub fn all() -> Self {
        Self {
            available: vec![
                Av1Encoder::SvtAv1,
                Av1Encoder::Nvenc,
                Av1Encoder::Qsv,
                Av1Encoder::Amf,
                Av1Encoder::LibAom,
            ],
        }
    }

    /// Software-only capabilities.
    pub fn software_only() -> Self {
        Self {
            available: vec![Av1Encoder::SvtAv1, Av1Encoder::LibAom],
        }
    }

    pub fn has(&self, encoder: Av1Encoder) -> bool {
        self.available.contains(&encoder)
    }

    /// Best software AV1 implementation, preferring SVT-AV1 over libaom.
    /// Falls back to libaom when nothing was detected: ffmpeg builds without
    /// any AV1 encoder will fail at spawn time with a clear error instead.
    pub fn best_software(&self) -> Av1Encoder {
        if self.has(Av1Encoder::SvtAv1) {
            Av1Encoder::SvtAv1
        } else {
            Av1Encoder::LibAom
        }
    }

    /// First available hardware implementation, if any. `available` is kept
    /// in preference order (NVENC, then QSV, then AMF), see [`Self::parse`].
    pub fn best_hardware(&self) -> Option<Av1Encoder> {
        self.available.iter().copied().find(|e| e.is_hardware())
    }

    /// Parse `ffmpeg -encoders` output into a capability snapshot. The push
    /// order below doubles as the hardware preference order.
    pub fn parse(encoders_output: &str) -> Self {
        let mut available = Vec::new();
        if encoders_output.contains("libsvtav1") {
            available.push(Av1Encoder::SvtAv1);
        }
        if encoders_output.contains("av1_nvenc") {
            available.push(Av1Encoder::Nvenc);
        }
        if encoders_output.contains("av1_qsv") {
            available.push(Av1Encoder::Qsv);
        }
        if encoders_output.contains("av1_amf") {
            available.push(Av1Encoder::Amf);
        }
        if encoders_output.contains("libaom-av1") {
            available.push(Av1Encoder::LibAom);
        }
        Self { available }
    }
}

/// Query the ffmpeg binary once for its encoder list.
///
/// A failed query degrades to software-only capabilities rather than failing
/// the run: the safe VP9 path never needs this information at all.
pub async fn detect(ffmpeg_bin: &Path) -> Result<EncoderCapabilities> {
    let output = Command::new(ffmpeg_bin)
        .arg("-hide_banner")
        .arg("-encoders")
        .output()
        .await
        .with_context(|| format!("Failed to query encoders at: {}", ffmpeg_bin.display()))?;

    if !output.status.success() {
        log::warn!("ffmpeg -encoders exited non-zero, assuming software encoders only");
        return Ok(EncoderCapabilities::software_only());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let caps = EncoderCapabilities::parse(&stdout);
    log::info!(
        "Detected AV1 encoders: {:?}",
        caps.available.iter().map(|e| e.ffmpeg_name()).collect::<Vec<_>>()
    );
    Ok(caps)
}
