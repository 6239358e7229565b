// machine_learning.rs
pub mod reinforcement_learning;

#[cfg(test)]
pub(crate) fn compare_outputs(a: &[f32], b: &[f32]) -> bool {
    use float_cmp::{ApproxEq, F32Margin};

    if a.len() != b.len() {
        return false;
    }
    let lax_margin = F32Margin {
        epsilon: 1e-5, // Allows for small numerical errors in very small numbers
        ulps: 50,      // Tolerates rounding errors for larger numbers
    };
    for (&a, &b) in a.iter().zip(b) {
        if !a.approx_eq(b, lax_margin) {
            return false;
        }
    }
    true
}

pub fn linspace(start: f32, end: f32, num: usize) -> Vec<f32> {
    if num == 0 {
        return Vec::new();
    }
    let step = if num == 1 {
        0.0
    } else {
        (end - start) / (num - 1) as f32
    };
    (0..num).map(|i| start + step * i as f32).collect()
}

/// Discrete linear convolution cropped to the length of the longer input and centered with
/// respect to the full convolution.
pub fn convolve_same(signal: &[f32], kernel: &[f32]) -> Vec<f32> {
    if signal.is_empty() || kernel.is_empty() {
        return Vec::new();
    }
    let (long, short) = if signal.len() >= kernel.len() {
        (signal, kernel)
    } else {
        (kernel, signal)
    };
    let offset = (short.len() - 1) / 2;
    (0..long.len())
        .map(|k| {
            // index into the full convolution
            let j = k + offset;
            let first = j.saturating_sub(long.len() - 1);
            let last = j.min(short.len() - 1);
            (first..=last).map(|i| short[i] * long[j - i]).sum()
        })
        .collect()
}
