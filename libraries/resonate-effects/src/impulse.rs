//! Synthetic reverb impulse responses
//!
//! Stereo white noise shaped by a `(1 - t)^decay` envelope. Each channel gets
//! independent noise so the tail decorrelates between left and right.

use rand::Rng;

/// Longest impulse response generated, in seconds
pub const MAX_DURATION_SECS: f32 = 10.0;

/// Generate a planar stereo impulse response
///
/// `duration_secs` is clamped to `(0, MAX_DURATION_SECS]`; a non-positive
/// `decay` is treated as a linear envelope.
pub fn generate<R: Rng + ?Sized>(
    sample_rate: f32,
    duration_secs: f32,
    decay: f32,
    rng: &mut R,
) -> Vec<Vec<f32>> {
    let duration = if duration_secs.is_finite() && duration_secs > 0.0 {
        duration_secs.min(MAX_DURATION_SECS)
    } else {
        0.1
    };
    let decay = if decay.is_finite() && decay > 0.0 { decay } else { 1.0 };
    let length = ((sample_rate * duration) as usize).max(1);

    (0..2)
        .map(|_| {
            (0..length)
                .map(|i| {
                    let envelope = (1.0 - i as f32 / length as f32).powf(decay);
                    rng.gen_range(-1.0f32..=1.0) * envelope
                })
                .collect()
        })
        .collect()
}
