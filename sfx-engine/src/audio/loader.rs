//! Decode an audio file to mono `f32` PCM at a target sample rate (§4.7
//! step 1): callers load at most the first 10 seconds, averaging channels.
//!
//! Grounded on `wkmp-ai/src/utils/audio_decoder.rs` (symphonia
//! decode-to-f32-and-mix-to-mono pattern) and
//! `wkmp-ai/src/import_v2/tier1/audio_loader.rs` (rubato `SincFixedIn`
//! resampling idiom).

use std::path::Path;

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::debug;

use crate::error::PreprocessError;

/// Mono PCM samples at the caller's requested sample rate, truncated to at
/// most `max_seconds` of audio (§4.7 step 1).
pub struct LoadedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode `path`, mix down to mono, resample to `target_sample_rate`, and
/// truncate to the first `max_seconds` seconds.
pub fn load_mono_waveform(
    path: &Path,
    target_sample_rate: u32,
    max_seconds: f64,
) -> Result<LoadedAudio, PreprocessError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PreprocessError::UnsupportedFormat(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PreprocessError::Decode("no audio track found".into()))?;
    let track_id = track.id;
    let native_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PreprocessError::Decode("sample rate unknown".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PreprocessError::Decode(e.to_string()))?;

    let max_native_samples = (max_seconds * native_rate as f64).ceil() as usize;
    let mut mono = Vec::new();

    loop {
        if mono.len() >= max_native_samples {
            break;
        }
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(PreprocessError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder.decode(&packet).map_err(|e| PreprocessError::Decode(e.to_string()))?;
        mono.extend(mix_to_mono(&decoded));
    }
    mono.truncate(max_native_samples);

    debug!(path = %path.display(), native_rate, samples = mono.len(), "decoded audio to mono");

    let samples = if native_rate == target_sample_rate {
        mono
    } else {
        resample_mono(&mono, native_rate, target_sample_rate)?
    };

    Ok(LoadedAudio { samples, sample_rate: target_sample_rate })
}

fn mix_to_mono(decoded: &AudioBufferRef) -> Vec<f32> {
    fn to_f32<S: Sample>(s: S) -> f32
    where
        f32: FromSample<S>,
    {
        f32::from_sample(s)
    }

    macro_rules! average_channels {
        ($buf:expr) => {{
            let channels = $buf.spec().channels.count().max(1);
            let frames = $buf.frames();
            let mut out = Vec::with_capacity(frames);
            for frame in 0..frames {
                let mut sum = 0.0f32;
                for ch in 0..channels {
                    sum += to_f32($buf.chan(ch)[frame]);
                }
                out.push(sum / channels as f32);
            }
            out
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => average_channels!(buf),
        AudioBufferRef::U8(buf) => average_channels!(buf),
        AudioBufferRef::U16(buf) => average_channels!(buf),
        AudioBufferRef::U24(buf) => average_channels!(buf),
        AudioBufferRef::U32(buf) => average_channels!(buf),
        AudioBufferRef::S8(buf) => average_channels!(buf),
        AudioBufferRef::S16(buf) => average_channels!(buf),
        AudioBufferRef::S24(buf) => average_channels!(buf),
        AudioBufferRef::S32(buf) => average_channels!(buf),
        AudioBufferRef::F64(buf) => average_channels!(buf),
    }
}

/// High-quality mono resampling via rubato's sinc interpolator (§4.7 step
/// 1). Mirrors `wkmp-ai`'s stereo resampler, de-interleaving dropped since
/// the input is already mono.
fn resample_mono(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, PreprocessError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = target_rate as f64 / source_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| PreprocessError::Decode(format!("resampler init failed: {e}")))?;

    let input = vec![samples.to_vec()];
    let output = resampler
        .process(&input, None)
        .map_err(|e| PreprocessError::Decode(format!("resampling failed: {e}")))?;
    Ok(output.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_mono_waveform(Path::new("/nonexistent/file.wav"), 48_000, 10.0);
        assert!(result.is_err());
    }
}
