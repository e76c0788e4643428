//! PCM codec: signed 16-bit samples ⇄ normalized floats ⇄ base64 transport
//! encoding, plus WAV container framing for whole-file playback targets.
//!
//! All numeric conversions live here so capture, playback, and tests share
//! one set of semantics.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::{Error, Result};

/// Convert raw little-endian PCM16 bytes to normalized f32 samples in [-1, 1)
#[must_use]
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Convert normalized f32 samples to raw little-endian PCM16 bytes
///
/// Samples are clamped to [-1, 1]; negative values scale by 32768 and
/// positive by 32767 so both rails are reachable without overflow.
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let scale = if s < 0.0 { 32768.0 } else { 32767.0 };
        #[allow(clippy::cast_possible_truncation)]
        let v = (s * scale).round() as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a base64 transport chunk to normalized f32 samples
///
/// # Errors
///
/// Returns [`Error::Audio`] if the chunk is not valid base64
pub fn decode_transport(chunk: &str) -> Result<Vec<f32>> {
    let bytes = B64
        .decode(chunk)
        .map_err(|e| Error::Audio(format!("invalid base64 audio chunk: {e}")))?;
    Ok(pcm16_to_f32(&bytes))
}

/// Encode normalized f32 samples as a base64 transport chunk
#[must_use]
pub fn encode_transport(samples: &[f32]) -> String {
    B64.encode(f32_to_pcm16(samples))
}

/// Unwrap a base64 transport chunk to raw PCM16 bytes
///
/// # Errors
///
/// Returns [`Error::Audio`] if the chunk is not valid base64
pub fn unwrap_transport(chunk: &str) -> Result<Vec<u8>> {
    B64.decode(chunk)
        .map_err(|e| Error::Audio(format!("invalid base64 audio chunk: {e}")))
}

/// Wrap raw PCM bytes in a minimal WAV container
///
/// For playback targets whose API accepts whole files rather than a sample
/// stream. The declared RIFF size is computed from the payload length.
///
/// # Errors
///
/// Returns [`Error::Audio`] if container framing fails
pub fn wrap_wav(pcm: &[u8], sample_rate: u32, bits_per_sample: u16, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Audio(e.to_string()))?;

        for b in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([b[0], b[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_round_trip_within_one_quantization_step() {
        let samples: Vec<f32> = (-10..=10).map(|i| i as f32 / 10.0).collect();
        let decoded = pcm16_to_f32(&f32_to_pcm16(&samples));
        assert_eq!(decoded.len(), samples.len());
        for (orig, got) in samples.iter().zip(&decoded) {
            assert!(
                (orig - got).abs() <= 1.0 / 32768.0,
                "expected {orig}, got {got}"
            );
        }
    }

    #[test]
    fn transport_round_trip() {
        let samples = vec![0.0, 0.5, -0.5, 0.999, -1.0];
        let encoded = encode_transport(&samples);
        let decoded = decode_transport(&encoded).unwrap();
        for (orig, got) in samples.iter().zip(&decoded) {
            assert!((orig - got).abs() <= 1.0 / 32768.0);
        }
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = f32_to_pcm16(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(decode_transport("not-valid-base64!!").is_err());
    }

    #[test]
    fn decode_ignores_trailing_odd_byte() {
        // 3 bytes = one complete sample plus a dangling byte
        let decoded = pcm16_to_f32(&[0x00, 0x40, 0x7f]);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn wav_header_declares_consistent_sizes() {
        for payload_len in [0usize, 2, 320, 3200] {
            let pcm = vec![0u8; payload_len];
            let wav = wrap_wav(&pcm, 24000, 16, 1).unwrap();

            // RIFF magic + declared size covers everything after offset 8
            assert_eq!(&wav[0..4], b"RIFF");
            let declared = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]) as usize;
            assert_eq!(declared, wav.len() - 8);
            assert_eq!(&wav[8..12], b"WAVE");
        }
    }

    #[test]
    fn wav_payload_survives_framing() {
        let samples = vec![0.25f32; 480];
        let pcm = f32_to_pcm16(&samples);
        let wav = wrap_wav(&pcm, 16000, 16, 1).unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let read: Vec<i16> = reader.into_samples().map(std::result::Result::unwrap).collect();
        assert_eq!(f32_to_pcm16(&samples), {
            let mut b = Vec::new();
            for v in &read {
                b.extend_from_slice(&v.to_le_bytes());
            }
            b
        });
    }
}
