// lorem.rs - deterministic test-payload generator.
//
// Tests and benchmarks need realistic cache values: JSON-ish records with
// shared structure (so dictionaries help) and plain ASCII text. Everything
// is seeded and reproducible; no external RNG is involved.

static K_WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "amet", "tempor", "labore", "magna", "aliqua",
    "lectus", "mattis", "velit", "commodo", "lacus", "mauris", "gravida",
    "dictum", "blandit", "aliquam", "enim", "fermentum", "ornare", "cursus",
    "porta", "interdum", "varius", "pharetra", "auctor", "viverra", "natus",
    "totam", "aperiam", "inventore", "beatae", "dicta", "explicabo", "sequi",
    "porro", "tempora", "magnam", "veniam", "nostrum", "corporis", "aliquid",
    "voluptate", "molestiae", "pariatur", "accusamus", "ducimus", "atque",
    "corrupti", "provident", "similique", "deserunt", "mollitia", "rerum",
];

// Small deterministic generator (xorshift64*), good enough for word picks.
struct SeededRng(u64);

impl SeededRng {
    fn new(seed: u64) -> Self {
        SeededRng(seed.wrapping_mul(2685821657736338717).max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn pick<'a>(&mut self, pool: &[&'a str]) -> &'a str {
        pool[(self.next() % pool.len() as u64) as usize]
    }
}

/// JSON-like cache record of roughly `approx_len` bytes. Records produced
/// from nearby seeds share field names and vocabulary, which is exactly the
/// redundancy dictionary training exploits.
pub fn json_payload(seed: u64, approx_len: usize) -> Vec<u8> {
    let mut rng = SeededRng::new(seed);
    let mut out = Vec::with_capacity(approx_len + 128);
    out.extend_from_slice(b"{\"records\":[");
    let mut first = true;
    while out.len() < approx_len.saturating_sub(64) {
        if !first {
            out.push(b',');
        }
        first = false;
        let id = rng.next() % 1_000_000;
        let entry = format!(
            "{{\"id\":{id},\"user\":\"user-{}\",\"tag\":\"{}\",\"bio\":\"{} {} {} {}\",\"active\":{}}}",
            id % 10_000,
            rng.pick(K_WORDS),
            rng.pick(K_WORDS),
            rng.pick(K_WORDS),
            rng.pick(K_WORDS),
            rng.pick(K_WORDS),
            if rng.next() % 2 == 0 { "true" } else { "false" },
        );
        out.extend_from_slice(entry.as_bytes());
    }
    out.extend_from_slice(b"]}");
    out
}

/// Plain ASCII filler text of exactly `len` bytes.
pub fn ascii_text(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = SeededRng::new(seed);
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        out.extend_from_slice(rng.pick(K_WORDS).as_bytes());
        out.push(b' ');
    }
    out.truncate(len);
    out
}

/// High-entropy bytes of exactly `len` bytes; reliably incompressible.
pub fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = SeededRng::new(seed);
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        out.extend_from_slice(&rng.next().to_le_bytes());
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_are_deterministic() {
        assert_eq!(json_payload(42, 1024), json_payload(42, 1024));
        assert_ne!(json_payload(42, 1024), json_payload(43, 1024));
    }

    #[test]
    fn json_payload_is_near_target_length() {
        let p = json_payload(7, 4096);
        assert!(p.len() >= 4096 - 64 && p.len() <= 4096 + 256, "len={}", p.len());
    }

    #[test]
    fn ascii_text_is_exact_length_and_printable() {
        let t = ascii_text(1, 333);
        assert_eq!(t.len(), 333);
        assert!(t.iter().all(|&b| b == b' ' || b.is_ascii_lowercase()));
    }

    #[test]
    fn noise_does_not_compress() {
        let n = noise(9, 2048);
        let c = zstd::bulk::compress(&n, 3).unwrap();
        assert!(c.len() >= n.len());
    }
}
