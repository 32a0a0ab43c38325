use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

// Fixed formats for each direction of the live API.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;
pub const CAPTURE_MIME: &str = "audio/pcm;rate=16000";
/// Samples per outbound capture window.
pub const CAPTURE_WINDOW: usize = 4096;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )?;
    Ok(resampler)
}

/// Resamples one complete mono buffer from `in_rate` to `out_rate`.
///
/// The result is exactly `len * out_rate / in_rate` samples (rounded down),
/// so consecutive buffers never outgrow the time slot they were given.
pub fn resample_buffer(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let target = (samples.len() as u64 * out_rate as u64 / in_rate as u64) as usize;
    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, samples.len())?;
    let mut output = resampler.process(&[samples], None)?.swap_remove(0);
    output.resize(target, 0.0);
    Ok(output)
}

/// Converts f32 samples to little-endian PCM16 bytes.
///
/// Each sample is scaled by 32768 and truncated toward zero. The cast
/// saturates, so out-of-range input lands on the i16 bounds and NaN becomes 0.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| ((sample * 32768.0) as i16).to_le_bytes())
        .collect()
}

/// De-interleaves little-endian PCM16 bytes into one f32 buffer per channel.
///
/// A trailing partial frame (odd byte, or an incomplete set of channels) is dropped.
pub fn pcm16_to_float(bytes: &[u8], channels: usize) -> Vec<Vec<f32>> {
    let channels = channels.max(1);
    let frame_bytes = 2 * channels;
    let frames = bytes.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frames); channels];

    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, sample) in frame.chunks_exact(2).enumerate() {
            let v = i16::from_le_bytes([sample[0], sample[1]]);
            out[channel].push(v as f32 / 32768.0);
        }
    }
    out
}

pub fn to_transport_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_transport_text(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(text)
}

/// Encodes f32 samples as base64 PCM16, the live API's realtime input format.
pub fn encode_f32_to_base64_i16(samples: &[f32]) -> String {
    to_transport_text(&float_to_pcm16(samples))
}

/// Decodes a base64 mono PCM16 fragment into f32 samples.
pub fn decode_f32_from_base64_i16(fragment: &str) -> Result<Vec<f32>, base64::DecodeError> {
    let bytes = from_transport_text(fragment)?;
    Ok(pcm16_to_float(&bytes, 1).swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 16000.0, 1024).is_ok());
        assert!(create_resampler(44100.0, 16000.0, 1024).is_ok());
        assert!(create_resampler(16000.0, 16000.0, 1024).is_ok());
    }

    #[test]
    fn test_resample_buffer_exact_lengths() {
        let chunk = vec![0.25f32; 2400];
        assert_eq!(resample_buffer(&chunk, 24000, 48000).unwrap().len(), 4800);
        assert_eq!(resample_buffer(&chunk, 24000, 44100).unwrap().len(), 4410);
        assert_eq!(resample_buffer(&chunk, 24000, 24000).unwrap(), chunk);
        assert!(resample_buffer(&[], 24000, 48000).unwrap().is_empty());
    }

    #[test]
    fn test_float_to_pcm16_known_values() {
        let bytes = float_to_pcm16(&[0.0, 0.5, -0.5, -1.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![0, 16384, -16384, -32768]);
    }

    #[test]
    fn test_float_to_pcm16_saturates_and_maps_nan_to_zero() {
        let bytes = float_to_pcm16(&[1.0, 2.5, -7.0, f32::NAN]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MAX, i16::MIN, 0]);
    }

    #[test]
    fn test_float_to_pcm16_truncates_toward_zero() {
        // 0.00002 * 32768 = 0.655..., -0.00002 * 32768 = -0.655...
        let bytes = float_to_pcm16(&[0.00002, -0.00002]);
        assert_eq!(bytes, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_pcm16_to_float_mono() {
        // 16384 = [0x00, 0x40], -32768 = [0x00, 0x80]
        let out = pcm16_to_float(&[0x00, 0x40, 0x00, 0x80], 1);
        assert_eq!(out.len(), 1);
        assert_abs_diff_eq!(out[0][0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[0][1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pcm16_to_float_deinterleaves_stereo() {
        let mut bytes = Vec::new();
        for v in [100i16, -100, 200, -200] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let out = pcm16_to_float(&bytes, 2);
        assert_eq!(out.len(), 2);
        assert_abs_diff_eq!(out[0][0], 100.0 / 32768.0, epsilon = 1e-7);
        assert_abs_diff_eq!(out[0][1], 200.0 / 32768.0, epsilon = 1e-7);
        assert_abs_diff_eq!(out[1][0], -100.0 / 32768.0, epsilon = 1e-7);
        assert_abs_diff_eq!(out[1][1], -200.0 / 32768.0, epsilon = 1e-7);
    }

    #[test]
    fn test_pcm16_to_float_drops_partial_frame() {
        assert_eq!(pcm16_to_float(&[0x00, 0x40, 0x7f], 1)[0].len(), 1);
        // Three samples cannot fill two stereo frames.
        let out = pcm16_to_float(&[0u8; 6], 2);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[1].len(), 1);
        assert!(pcm16_to_float(&[], 1)[0].is_empty());
    }

    #[test]
    fn test_pcm_round_trip_error_bound() {
        let input: Vec<f32> = (0..=200).map(|i| -1.0 + i as f32 * 0.01).collect();
        let decoded = pcm16_to_float(&float_to_pcm16(&input), 1).swap_remove(0);
        assert_eq!(decoded.len(), input.len());
        for (original, restored) in input.iter().zip(decoded.iter()) {
            // 1.0 saturates to i16::MAX, one step short of full scale.
            assert_abs_diff_eq!(original, restored, epsilon = 1.0 / 32768.0 + 1e-6);
        }
    }

    #[test]
    fn test_transport_text_round_trip_arbitrary_bytes() {
        let all_bytes: Vec<u8> = (0..=255).collect();
        for bytes in [vec![], vec![0u8], vec![0u8, 0, 0], all_bytes] {
            let text = to_transport_text(&bytes);
            assert_eq!(from_transport_text(&text).unwrap(), bytes);
        }
    }

    #[test]
    fn test_from_transport_text_rejects_invalid_input() {
        assert!(from_transport_text("not base64!").is_err());
    }

    #[test]
    fn test_encode_decode_base64_i16() {
        let text = encode_f32_to_base64_i16(&[0.25, -0.25]);
        let decoded = decode_f32_from_base64_i16(&text).unwrap();
        assert_abs_diff_eq!(decoded[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(decoded[1], -0.25, epsilon = 1e-6);
        assert!(decode_f32_from_base64_i16("%%%").is_err());
    }
}
