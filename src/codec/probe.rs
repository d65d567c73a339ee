// probe.rs - incompressibility heuristics for the encode path.
//
// Compressing 2 KiB of /dev/urandom costs real CPU and saves nothing. The
// probe inspects a bounded prefix of the value on the stack and answers
// "worth compressing?" before any encoder context is touched. Decision
// rules, in order:
//
//   printable-ASCII ratio >= 0.85      -> compressible
//   Shannon entropy >= 7.5 bits/byte   -> incompressible
//   Shannon entropy <= 7.0 bits/byte   -> compressible
//   otherwise                          -> trial-compress the sample and
//                                         require a >= 2% reduction

/// Bytes of the value prefix the probe inspects.
pub const PROBE_SAMPLE_MAX: usize = 512;

/// Values shorter than this skip the probe entirely; the min-size gate in
/// the engine fires first for anything this small.
pub const PROBE_INPUT_MIN: usize = 64;

const ASCII_RATIO_MIN: f64 = 0.85;
const ENTROPY_SKIP_BITS: f64 = 7.5;
const ENTROPY_PASS_BITS: f64 = 7.0;
const TRIAL_MIN_GAIN: f64 = 0.02;

/// Returns true when `value` looks worth handing to the compressor.
///
/// Allocation-free except for the trial branch, which reuses the calling
/// thread's codec scratch.
pub fn is_compressible(value: &[u8]) -> bool {
    if value.len() < PROBE_INPUT_MIN {
        return true;
    }
    let sample = &value[..value.len().min(PROBE_SAMPLE_MAX)];

    let mut histogram = [0u32; 256];
    let mut printable = 0usize;
    for &b in sample {
        histogram[b as usize] += 1;
        if matches!(b, 0x20..=0x7E | b'\t' | b'\n' | b'\r') {
            printable += 1;
        }
    }

    let ascii_ratio = printable as f64 / sample.len() as f64;
    if ascii_ratio >= ASCII_RATIO_MIN {
        return true;
    }

    let entropy = shannon_entropy(&histogram, sample.len());
    if entropy >= ENTROPY_SKIP_BITS {
        return false;
    }
    if entropy <= ENTROPY_PASS_BITS {
        return true;
    }

    // Ambiguous band: let the codec itself vote on a tiny sample.
    match super::trial_compressed_len(sample) {
        Ok(n) => (n as f64) <= sample.len() as f64 * (1.0 - TRIAL_MIN_GAIN),
        Err(_) => false,
    }
}

/// Shannon entropy in bits/byte over a byte histogram.
fn shannon_entropy(histogram: &[u32; 256], total: usize) -> f64 {
    let total = total as f64;
    let mut h = 0.0f64;
    for &count in histogram.iter() {
        if count == 0 {
            continue;
        }
        let p = count as f64 / total;
        h -= p * p.log2();
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram_of(data: &[u8]) -> [u32; 256] {
        let mut h = [0u32; 256];
        for &b in data {
            h[b as usize] += 1;
        }
        h
    }

    #[test]
    fn uniform_bytes_have_eight_bits_entropy() {
        let data: Vec<u8> = (0u8..=255).collect();
        let h = histogram_of(&data);
        let e = shannon_entropy(&h, data.len());
        assert!((e - 8.0).abs() < 1e-9);
    }

    #[test]
    fn constant_bytes_have_zero_entropy() {
        let data = vec![b'x'; 512];
        let h = histogram_of(&data);
        assert_eq!(shannon_entropy(&h, data.len()), 0.0);
    }

    #[test]
    fn ascii_text_is_compressible() {
        let text: Vec<u8> = b"{\"id\": 42, \"name\": \"example\"} "
            .iter()
            .cycle()
            .take(2048)
            .copied()
            .collect();
        assert!(is_compressible(&text));
    }

    #[test]
    fn high_entropy_binary_is_skipped() {
        // Deterministic pseudo-random bytes: xorshift64 covers the byte
        // space well enough to push entropy past the skip threshold.
        let mut x = 0x9E3779B97F4A7C15u64;
        let mut data = Vec::with_capacity(2048);
        while data.len() < 2048 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            data.extend_from_slice(&x.to_le_bytes());
        }
        assert!(!is_compressible(&data));
    }

    #[test]
    fn short_values_bypass_the_probe() {
        let tiny = [0xFFu8; 16];
        assert!(is_compressible(&tiny));
    }

    #[test]
    fn repetitive_binary_is_compressible() {
        // Non-ASCII but low entropy: a repeating 16-byte binary pattern.
        let pattern: Vec<u8> = (0..16u8).map(|b| 0x80 | b).collect();
        let data: Vec<u8> = pattern.iter().cycle().take(4096).copied().collect();
        assert!(is_compressible(&data));
    }
}
