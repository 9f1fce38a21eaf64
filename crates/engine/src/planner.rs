use std::path::Path;

use crate::capability::{Av1Encoder, EncoderCapabilities};
use crate::config::{OutputFormat, ResolutionPreset, Settings};

/// Ordered argument list handed to the external ffmpeg process.
///
/// Fully determined by `(source, output, settings, capabilities)`; building it
/// twice from the same inputs yields an identical list, and ordering is part
/// of the contract (ffmpeg's argument grammar is positional).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodePlan {
    args: Vec<String>,
}

impl EncodePlan {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn into_args(self) -> Vec<String> {
        self.args
    }

    #[cfg(test)]
    pub(crate) fn from_args(args: Vec<String>) -> Self {
        Self { args }
    }
}

/// Codec family used for a plan; determines which CRF scale applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    /// libvpx-vp9: royalty-free, universally supported
    Vp9,
    /// AV1: higher compression, newer decoders required
    Av1,
}

/// Map the 1..=10 user compression level onto a codec family's CRF scale.
///
/// Linear: `base + (level - 1) * step`, strictly monotonic in `level`.
/// VP9 uses its 0-63 scale (useful range starts higher), AV1 its 0-63 scale
/// with a lower perceptual floor. Levels outside 1..=10 are a caller contract
/// violation and are not clamped here.
pub fn crf_for_level(family: CodecFamily, level: u8) -> u8 {
    let (base, step) = match family {
        CodecFamily::Vp9 => (28.0_f32, 2.5_f32),
        CodecFamily::Av1 => (18.0_f32, 3.5_f32),
    };
    (base + (level as f32 - 1.0) * step).round() as u8
}

/// Fixed GIF pipeline: frame-rate reduction plus two-pass palette generation.
const GIF_FILTER: &str =
    "fps=15,scale=-1:-1:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse";

/// Pick the AV1 implementation for a plan from the capability snapshot.
///
/// Hardware implementations are only eligible when turbo is requested AND the
/// environment reports one; everything else gets the best software encoder.
fn select_av1_encoder(settings: &Settings, caps: &EncoderCapabilities) -> Av1Encoder {
    if settings.enable_turbo {
        if let Some(hw) = caps.best_hardware() {
            return hw;
        }
    }
    caps.best_software()
}

/// Build the encode directive list for one file.
///
/// Pure and total: no I/O, no filesystem inspection, no clock. Malformed
/// settings (custom resolution without both dimensions) degrade to a no-op
/// filter step rather than failing; validating input is the caller's job.
pub fn plan(source: &Path, output: &Path, settings: &Settings, caps: &EncoderCapabilities) -> EncodePlan {
    let mut args: Vec<String> = Vec::new();
    let push = |args: &mut Vec<String>, s: &str| args.push(s.to_string());

    push(&mut args, "-i");
    args.push(source.to_string_lossy().into_owned());

    let is_gif = settings.format == OutputFormat::Gif;

    if is_gif {
        // Palette pipeline replaces codec, quality and scale steps entirely.
        push(&mut args, "-vf");
        push(&mut args, GIF_FILTER);
    } else {
        if settings.use_high_efficiency_codec {
            let encoder = select_av1_encoder(settings, caps);
            let crf = crf_for_level(CodecFamily::Av1, settings.compression_level);

            push(&mut args, "-c:v");
            push(&mut args, encoder.ffmpeg_name());

            match encoder {
                Av1Encoder::SvtAv1 => {
                    push(&mut args, "-crf");
                    args.push(crf.to_string());
                    push(&mut args, "-preset");
                    push(&mut args, if settings.enable_turbo { "10" } else { "6" });

                    let mut svt_params: Vec<String> = Vec::new();
                    if settings.subjective_tune {
                        svt_params.push("tune=0".to_string());
                    }
                    if settings.enable_hdr {
                        push(&mut args, "-pix_fmt");
                        push(&mut args, "yuv420p10le");
                        svt_params.push("enable-hdr=1".to_string());
                    }
                    if settings.enable_turbo {
                        svt_params.push("tile-columns=2".to_string());
                        svt_params.push("tile-rows=1".to_string());
                    }
                    if !svt_params.is_empty() {
                        push(&mut args, "-svtav1-params");
                        args.push(svt_params.join(":"));
                    }
                }
                Av1Encoder::Nvenc | Av1Encoder::Qsv | Av1Encoder::Amf => {
                    push(&mut args, "-rc");
                    push(&mut args, "vbr");
                    push(&mut args, "-cq");
                    args.push(crf.to_string());
                    push(&mut args, "-preset");
                    push(&mut args, if settings.enable_turbo { "p1" } else { "p4" });
                    if settings.enable_hdr {
                        push(&mut args, "-pix_fmt");
                        push(&mut args, "p010le");
                    }
                }
                Av1Encoder::LibAom => {
                    push(&mut args, "-crf");
                    args.push(crf.to_string());
                    push(&mut args, "-cpu-used");
                    push(&mut args, if settings.enable_turbo { "8" } else { "4" });
                    if settings.enable_hdr {
                        push(&mut args, "-pix_fmt");
                        push(&mut args, "yuv420p10le");
                    }
                }
            }
        } else {
            // Safe family: always libvpx-vp9, hardware availability is
            // deliberately ignored. Constrained-quality mode with a
            // realtime deadline keeps encodes responsive.
            let crf = crf_for_level(CodecFamily::Vp9, settings.compression_level);

            push(&mut args, "-c:v");
            push(&mut args, "libvpx-vp9");
            push(&mut args, "-b:v");
            push(&mut args, "0");
            push(&mut args, "-crf");
            args.push(crf.to_string());
            push(&mut args, "-deadline");
            push(&mut args, "realtime");
            push(&mut args, "-cpu-used");
            push(&mut args, if settings.enable_turbo { "8" } else { "5" });
            push(&mut args, "-row-mt");
            push(&mut args, "1");
        }

        if settings.enable_turbo {
            push(&mut args, "-threads");
            push(&mut args, "0");
        }

        if let Some(filter) = filter_chain(settings) {
            push(&mut args, "-vf");
            args.push(filter);
        }
    }

    // Audio: GIF has no audio track by definition; otherwise the codec must
    // match the container. AAC inside WebM is invalid and never emitted.
    if settings.remove_audio || is_gif {
        push(&mut args, "-an");
    } else {
        push(&mut args, "-c:a");
        match settings.format {
            OutputFormat::WebM => push(&mut args, "libopus"),
            _ => push(&mut args, "aac"),
        }
        push(&mut args, "-b:a");
        push(&mut args, "128k");
    }

    if settings.clean_metadata {
        push(&mut args, "-map_metadata");
        push(&mut args, "-1");
    }

    push(&mut args, "-y");
    args.push(output.to_string_lossy().into_owned());

    EncodePlan { args }
}

/// Fallback watermark text when none is configured.
const WATERMARK_DEFAULT: &str = "vlite";

/// Comma-joined video filter chain: stabilization, then the watermark
/// overlay, then scaling. `None` when no filter applies.
fn filter_chain(settings: &Settings) -> Option<String> {
    let mut filters: Vec<String> = Vec::new();
    if settings.enable_deshake {
        filters.push("deshake".to_string());
    }
    if settings.enable_watermark {
        let text = settings
            .watermark_text
            .as_deref()
            .unwrap_or(WATERMARK_DEFAULT);
        filters.push(format!(
            "drawtext=text='{text}':x=w-tw-20:y=h-th-20:fontsize=24:fontcolor=white@0.5:shadowcolor=black:shadowx=2:shadowy=2"
        ));
    }
    if let Some(scale) = scale_filter(settings) {
        filters.push(scale);
    }
    if filters.is_empty() {
        None
    } else {
        Some(filters.join(","))
    }
}

/// Resolution preset to ffmpeg scale filter. `None` means no filter step,
/// including the silent fallback for a custom preset missing a dimension.
fn scale_filter(settings: &Settings) -> Option<String> {
    match settings.resolution {
        ResolutionPreset::Original => None,
        ResolutionPreset::R2160p => Some("scale=3840:-2".to_string()),
        ResolutionPreset::R1080p => Some("scale=1920:-2".to_string()),
        ResolutionPreset::R720p => Some("scale=1280:-2".to_string()),
        ResolutionPreset::R480p => Some("scale=854:-2".to_string()),
        ResolutionPreset::Square1080 => Some(
            "scale=1080:1080:force_original_aspect_ratio=increase,crop=1080:1080".to_string(),
        ),
        ResolutionPreset::Custom => {
            let (w, h) = match (settings.custom_width, settings.custom_height) {
                (Some(w), Some(h)) => (w, h),
                _ => return None,
            };
            if settings.lock_aspect_ratio {
                // Fit inside the box, then pad to exact dimensions so the
                // image is never distorted.
                Some(format!(
                    "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
                ))
            } else {
                Some(format!("scale={w}:{h}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn src() -> PathBuf {
        PathBuf::from("/videos/input.mp4")
    }

    fn out() -> PathBuf {
        PathBuf::from("/videos/input_compressed.mp4")
    }

    fn settings() -> Settings {
        Settings::default()
    }

    fn contains_pair(args: &[String], a: &str, b: &str) -> bool {
        args.windows(2).any(|w| w[0] == a && w[1] == b)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.windows(2)
            .find(|w| w[0] == flag)
            .map(|w| w[1].as_str())
    }

    #[test]
    fn test_plan_is_deterministic() {
        let s = Settings {
            use_high_efficiency_codec: true,
            enable_turbo: true,
            enable_hdr: true,
            clean_metadata: true,
            resolution: ResolutionPreset::R720p,
            ..settings()
        };
        let caps = EncoderCapabilities::all();
        let a = plan(&src(), &out(), &s, &caps);
        let b = plan(&src(), &out(), &s, &caps);
        assert_eq!(a, b, "identical inputs must yield a byte-identical plan");
    }

    #[test]
    fn test_gif_always_drops_audio_and_uses_palette_chain() {
        for remove_audio in [false, true] {
            let s = Settings {
                format: OutputFormat::Gif,
                remove_audio,
                ..settings()
            };
            let p = plan(&src(), &out(), &s, &EncoderCapabilities::all());
            let args = p.args();
            assert!(args.contains(&"-an".to_string()));
            assert!(contains_pair(args, "-vf", GIF_FILTER));
            // no codec or quality step for GIF
            assert!(!args.contains(&"-c:v".to_string()));
            assert!(!args.contains(&"-crf".to_string()));
        }
    }

    #[test]
    fn test_safe_family_ignores_available_hardware() {
        let s = Settings {
            use_high_efficiency_codec: false,
            enable_turbo: true,
            ..settings()
        };
        // all hardware encoders reported available
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::all());
        assert!(contains_pair(p.args(), "-c:v", "libvpx-vp9"));
        assert!(contains_pair(p.args(), "-deadline", "realtime"));
    }

    #[test]
    fn test_vp9_constrained_quality_mode() {
        let p = plan(&src(), &out(), &settings(), &EncoderCapabilities::software_only());
        let args = p.args();
        assert!(contains_pair(args, "-b:v", "0"));
        assert!(contains_pair(args, "-row-mt", "1"));
        assert!(contains_pair(args, "-cpu-used", "5"));
        // level 6 on the VP9 scale: 28 + 5 * 2.5 = 40.5 -> 41
        assert_eq!(value_after(args, "-crf"), Some("41"));
    }

    #[test]
    fn test_av1_hardware_only_with_turbo() {
        let caps = EncoderCapabilities::all();

        let no_turbo = Settings {
            use_high_efficiency_codec: true,
            enable_turbo: false,
            ..settings()
        };
        let p = plan(&src(), &out(), &no_turbo, &caps);
        assert!(contains_pair(p.args(), "-c:v", "libsvtav1"));

        let turbo = Settings {
            use_high_efficiency_codec: true,
            enable_turbo: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &turbo, &caps);
        assert!(contains_pair(p.args(), "-c:v", "av1_nvenc"));
        assert!(contains_pair(p.args(), "-rc", "vbr"));
        assert!(contains_pair(p.args(), "-preset", "p1"));
    }

    #[test]
    fn test_av1_turbo_without_hardware_stays_software() {
        let turbo = Settings {
            use_high_efficiency_codec: true,
            enable_turbo: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &turbo, &EncoderCapabilities::software_only());
        let args = p.args();
        assert!(contains_pair(args, "-c:v", "libsvtav1"));
        assert!(contains_pair(args, "-preset", "10"));
        // turbo requests multi-tile encoding on SVT-AV1
        let svt = value_after(args, "-svtav1-params").unwrap();
        assert!(svt.contains("tile-columns=2"));
        assert!(svt.contains("tile-rows=1"));
        assert!(contains_pair(args, "-threads", "0"));
    }

    #[test]
    fn test_av1_hdr_forces_10bit_and_hdr_param() {
        let s = Settings {
            use_high_efficiency_codec: true,
            enable_hdr: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let args = p.args();
        assert!(contains_pair(args, "-pix_fmt", "yuv420p10le"));
        let svt = value_after(args, "-svtav1-params").unwrap();
        assert!(svt.contains("enable-hdr=1"));
    }

    #[test]
    fn test_av1_subjective_tune_param() {
        let s = Settings {
            use_high_efficiency_codec: true,
            subjective_tune: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let svt = value_after(p.args(), "-svtav1-params").unwrap();
        assert!(svt.contains("tune=0"));

        let s = Settings {
            subjective_tune: false,
            enable_hdr: false,
            enable_turbo: false,
            use_high_efficiency_codec: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        assert!(value_after(p.args(), "-svtav1-params").is_none());
    }

    #[test]
    fn test_libaom_fallback_when_svt_missing() {
        let caps = EncoderCapabilities {
            available: vec![Av1Encoder::LibAom],
        };
        let s = Settings {
            use_high_efficiency_codec: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &caps);
        assert!(contains_pair(p.args(), "-c:v", "libaom-av1"));
        assert!(contains_pair(p.args(), "-cpu-used", "4"));
    }

    #[test]
    fn test_custom_resolution_locked_adds_pad() {
        let s = Settings {
            resolution: ResolutionPreset::Custom,
            custom_width: Some(640),
            custom_height: Some(480),
            lock_aspect_ratio: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let filter = value_after(p.args(), "-vf").unwrap();
        assert!(filter.contains("scale=640:480"));
        assert!(filter.contains("pad=640:480"));
    }

    #[test]
    fn test_custom_resolution_unlocked_scales_only() {
        let s = Settings {
            resolution: ResolutionPreset::Custom,
            custom_width: Some(640),
            custom_height: Some(480),
            lock_aspect_ratio: false,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let filter = value_after(p.args(), "-vf").unwrap();
        assert_eq!(filter, "scale=640:480");
        assert!(!filter.contains("pad"));
    }

    #[test]
    fn test_custom_resolution_missing_dimension_is_noop() {
        let s = Settings {
            resolution: ResolutionPreset::Custom,
            custom_width: Some(640),
            custom_height: None,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        assert!(value_after(p.args(), "-vf").is_none());
    }

    #[test]
    fn test_preset_scale_filters() {
        for (preset, expected) in [
            (ResolutionPreset::R2160p, "scale=3840:-2"),
            (ResolutionPreset::R1080p, "scale=1920:-2"),
            (ResolutionPreset::R720p, "scale=1280:-2"),
            (ResolutionPreset::R480p, "scale=854:-2"),
        ] {
            let s = Settings {
                resolution: preset,
                ..settings()
            };
            let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
            assert_eq!(value_after(p.args(), "-vf"), Some(expected));
        }
    }

    #[test]
    fn test_deshake_precedes_scale_in_the_chain() {
        let s = Settings {
            enable_deshake: true,
            resolution: ResolutionPreset::R720p,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        assert_eq!(value_after(p.args(), "-vf"), Some("deshake,scale=1280:-2"));
    }

    #[test]
    fn test_watermark_defaults_and_custom_text() {
        let s = Settings {
            enable_watermark: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let filter = value_after(p.args(), "-vf").unwrap();
        assert!(filter.starts_with("drawtext=text='vlite'"));
        assert!(filter.contains("x=w-tw-20:y=h-th-20"));

        let s = Settings {
            enable_watermark: true,
            watermark_text: Some("sample reel".to_string()),
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let filter = value_after(p.args(), "-vf").unwrap();
        assert!(filter.contains("text='sample reel'"));
    }

    #[test]
    fn test_watermark_text_alone_does_not_enable_the_overlay() {
        let s = Settings {
            enable_watermark: false,
            watermark_text: Some("ignored".to_string()),
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        assert!(value_after(p.args(), "-vf").is_none());
    }

    #[test]
    fn test_full_filter_chain_order() {
        let s = Settings {
            enable_deshake: true,
            enable_watermark: true,
            resolution: ResolutionPreset::R480p,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let filter = value_after(p.args(), "-vf").unwrap();
        let steps: Vec<&str> = filter.splitn(3, ',').collect();
        assert_eq!(steps[0], "deshake");
        assert!(steps[1].starts_with("drawtext="));
        assert_eq!(steps[2], "scale=854:-2");
    }

    #[test]
    fn test_gif_keeps_its_palette_chain_over_other_filters() {
        let s = Settings {
            format: OutputFormat::Gif,
            enable_deshake: true,
            enable_watermark: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        assert_eq!(value_after(p.args(), "-vf"), Some(GIF_FILTER));
    }

    #[test]
    fn test_webm_never_gets_aac() {
        let s = Settings {
            format: OutputFormat::WebM,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let args = p.args();
        assert!(contains_pair(args, "-c:a", "libopus"));
        assert!(!args.contains(&"aac".to_string()));
    }

    #[test]
    fn test_mp4_and_mkv_get_aac() {
        for format in [OutputFormat::Mp4, OutputFormat::Mkv] {
            let s = Settings { format, ..settings() };
            let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
            assert!(contains_pair(p.args(), "-c:a", "aac"));
        }
    }

    #[test]
    fn test_remove_audio_drops_audio_step() {
        let s = Settings {
            remove_audio: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        let args = p.args();
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
    }

    #[test]
    fn test_clean_metadata_appends_strip_directive() {
        let s = Settings {
            clean_metadata: true,
            ..settings()
        };
        let p = plan(&src(), &out(), &s, &EncoderCapabilities::software_only());
        assert!(contains_pair(p.args(), "-map_metadata", "-1"));
    }

    #[test]
    fn test_plan_ends_with_overwrite_and_output() {
        let p = plan(&src(), &out(), &settings(), &EncoderCapabilities::software_only());
        let args = p.args();
        let n = args.len();
        assert_eq!(args[n - 2], "-y");
        assert_eq!(args[n - 1], out().to_string_lossy());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// CRF mapping is strictly monotonic over the 1..=10 level range
        /// within each codec family.
        #[test]
        fn test_quality_strictly_monotonic(
            family in prop_oneof![Just(CodecFamily::Vp9), Just(CodecFamily::Av1)],
            level in 1u8..10,
        ) {
            let lower = crf_for_level(family, level);
            let higher = crf_for_level(family, level + 1);
            prop_assert!(
                higher > lower,
                "{:?} CRF must strictly increase: level {} -> {}, level {} -> {}",
                family, level, lower, level + 1, higher
            );
        }

        /// Any settings combination produces the same plan twice.
        #[test]
        fn test_plan_determinism_across_settings(
            high_eff in prop::bool::ANY,
            turbo in prop::bool::ANY,
            hdr in prop::bool::ANY,
            tune in prop::bool::ANY,
            clean in prop::bool::ANY,
            no_audio in prop::bool::ANY,
            deshake in prop::bool::ANY,
            watermark in prop::bool::ANY,
            level in 1u8..=10,
        ) {
            let s = Settings {
                use_high_efficiency_codec: high_eff,
                enable_turbo: turbo,
                enable_hdr: hdr,
                subjective_tune: tune,
                clean_metadata: clean,
                remove_audio: no_audio,
                enable_deshake: deshake,
                enable_watermark: watermark,
                compression_level: level,
                ..Settings::default()
            };
            let caps = EncoderCapabilities::all();
            prop_assert_eq!(plan(&src(), &out(), &s, &caps), plan(&src(), &out(), &s, &caps));
        }
    }
}
