//! Sample-level helpers for the capture path.

/// Block-average `input` from `in_rate` down to `out_rate`.
///
/// Each output sample is the mean of the input samples that fall in its
/// window. Rates at or below `out_rate` pass through untouched.
pub fn downsample(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if out_rate == 0 || in_rate <= out_rate {
        return input.to_vec();
    }

    let ratio = in_rate as f64 / out_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let start = ((i as f64 * ratio).round() as usize).min(input.len());
        let end = (((i + 1) as f64 * ratio).round() as usize).min(input.len());
        let window = &input[start..end.max(start)];
        if window.is_empty() {
            // Rounding can leave a trailing window empty; reuse the last sample
            output.push(input.get(start.saturating_sub(1)).copied().unwrap_or(0.0));
        } else {
            let sum: f64 = window.iter().map(|&s| s as f64).sum();
            output.push((sum / window.len() as f64) as f32);
        }
    }

    output
}

/// Convert to PCM16 with clamping. Negative full scale maps to -32768,
/// positive to 32767.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Root mean square of a block, 0 for an empty one.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Polyline for an oscilloscope view `width` × `height`.
///
/// Samples in [-1, 1] map to y in [0, height]; x steps evenly from 0.
pub fn waveform_points(samples: &[f32], width: f32, height: f32) -> Vec<(f32, f32)> {
    if samples.is_empty() {
        return Vec::new();
    }
    let slice = width / samples.len() as f32;
    samples
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as f32 * slice, (s * 0.5 + 0.5) * height))
        .collect()
}
