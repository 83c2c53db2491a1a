//! Loudness envelope for lip-sync
//!
//! One value per fixed-length frame: the frame's RMS divided by the loudest
//! frame's RMS. The last frame may be short and still counts. A silent buffer
//! yields all zeros.

/// Samples per frame, never less than one.
pub fn frame_size(sample_rate: u32, frame_ms: u64) -> usize {
    let size = (sample_rate as u64 * frame_ms) / 1000;
    size.max(1) as usize
}

pub fn compute(samples: &[f32], sample_rate: u32, frame_ms: u64) -> Vec<f32> {
    let rms: Vec<f64> = samples
        .chunks(frame_size(sample_rate, frame_ms))
        .map(|frame| {
            let sum: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
            (sum / frame.len() as f64).sqrt()
        })
        .collect();

    let max = rms.iter().copied().fold(0.0_f64, f64::max);
    rms.into_iter()
        .map(|v| if max > 0.0 { (v / max) as f32 } else { 0.0 })
        .collect()
}

/// Round an envelope value to the two decimals the runtime receives.
pub fn mouth_level(value: f32) -> f64 {
    let v = (value as f64).clamp(0.0, 1.0);
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_floors_and_never_zero() {
        assert_eq!(frame_size(48_000, 50), 2400);
        assert_eq!(frame_size(22_050, 50), 1102);
        assert_eq!(frame_size(10, 50), 1);
    }

    #[test]
    fn silence_is_all_zeros() {
        let env = compute(&vec![0.0; 96_000], 48_000, 50);
        assert_eq!(env.len(), 40);
        assert!(env.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn normalized_by_loudest_frame() {
        // Four frames of 10 samples: A/2, A, A/2, A/2
        let a = 0.8_f32;
        let mut samples = Vec::new();
        for level in [a / 2.0, a, a / 2.0, a / 2.0] {
            samples.extend(std::iter::repeat(level).take(10));
        }

        let env = compute(&samples, 200, 50);
        assert_eq!(env.len(), 4);
        assert!((env[1] - 1.0).abs() < 1e-6);
        for i in [0, 2, 3] {
            assert!((env[i] - 0.5).abs() < 1e-6, "frame {} = {}", i, env[i]);
        }
    }

    #[test]
    fn partial_last_frame_counts() {
        let samples = vec![0.5_f32; 25];
        let env = compute(&samples, 200, 50);
        assert_eq!(env, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn empty_buffer_is_empty_envelope() {
        assert!(compute(&[], 48_000, 50).is_empty());
    }

    #[test]
    fn mouth_level_rounds_to_hundredths() {
        assert_eq!(mouth_level(0.456), 0.46);
        assert_eq!(mouth_level(1.7), 1.0);
        assert_eq!(mouth_level(-0.2), 0.0);
    }
}
