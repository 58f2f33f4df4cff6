/// Loudness measurement
///
/// RMS over raw 16-bit sample values. Silence comes out near 0 and a
/// clipped frame comes out near 32767; neither needs special handling.

use crate::audio_buffer::AudioSample;

/// Default full-scale reference for the [0, 1] level meter
pub const DEFAULT_LEVEL_CEILING: f32 = 5000.0;

/// Root-mean-square of the sample values. Empty input yields 0.
pub fn loudness(samples: &[AudioSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Loudness scaled against `ceiling` and clamped to [0, 1], for live meters
pub fn level(samples: &[AudioSample], ceiling: f32) -> f32 {
    if ceiling <= 0.0 {
        return 0.0;
    }
    (loudness(samples) / ceiling).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_silence_is_zero() {
        assert_eq!(loudness(&[0; 1024]), 0.0);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(loudness(&[]), 0.0);
    }

    #[test]
    fn test_constant_amplitude() {
        for amplitude in [1i16, 1500, -1500, 32767, -32768] {
            let frame = vec![amplitude; 512];
            assert_eq!(loudness(&frame), (amplitude as f32).abs());
        }
    }

    #[test]
    fn test_square_wave() {
        let frame: Vec<i16> = (0..1000).map(|i| if i % 2 == 0 { 3000 } else { -3000 }).collect();
        assert_relative_eq!(loudness(&frame), 3000.0, epsilon = 1e-3);
    }

    #[test]
    fn test_sine_rms() {
        let frame: Vec<i16> = (0..16000)
            .map(|i| {
                let t = i as f32 / 16000.0;
                (10000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
            })
            .collect();
        // RMS of a sine is peak / sqrt(2)
        assert_relative_eq!(loudness(&frame), 10000.0 / 2f32.sqrt(), max_relative = 0.01);
    }

    #[test]
    fn test_level_scaling() {
        assert_relative_eq!(level(&[2500; 64], 5000.0), 0.5);
        assert_eq!(level(&[i16::MAX; 64], 5000.0), 1.0);
        assert_eq!(level(&[0; 64], 5000.0), 0.0);
        assert_eq!(level(&[100; 64], 0.0), 0.0);
    }
}
