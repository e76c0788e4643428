//! Linear-interpolation sample rate conversion
//!
//! Single source of truth for rate conversion on both the capture and
//! playback paths; keeping one implementation avoids drift between two
//! separately tuned converters.

/// Convert `input` from `source_rate` to `target_rate` by linear
/// interpolation.
///
/// Cheap enough for real-time use and adequate for speech-band signal.
/// Deterministic and stateless; an empty input yields an empty output.
#[must_use]
pub fn resample(input: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let out_len = (input.len() as f64 / ratio) as usize;

    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lo = pos as usize;
        let hi = (lo + 1).min(input.len() - 1);
        #[allow(clippy::cast_possible_truncation)]
        let frac = (pos - lo as f64) as f32;
        output.push(input[lo] + (input[hi] - input[lo]) * frac);
    }
    output
}
