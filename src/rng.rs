use std::time::{SystemTime, UNIX_EPOCH};

use rand::distr::Alphanumeric;
use rand::Rng as _;

/// Source of uniform floats in `[0, 1)`.
///
/// The maze generator only depends on this trait so that seeded levels
/// can be replayed bit-for-bit.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;

    fn pick_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        ((self.next_f64() * len as f64).floor() as usize).min(len - 1)
    }
}

#[derive(Clone, Debug)]
pub struct Rng {
    seed: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(hash_seed(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(rand::random::<u32>())
    }

    pub fn next_u32(&mut self) -> u32 {
        self.seed = self.seed.wrapping_add(0x6d2b79f5);
        let mut t = self.seed;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    pub fn int(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = (max - min + 1) as f64;
        min + (self.next_f64() * span).floor() as i32
    }

    pub fn bool(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }
}

impl RandomSource for Rng {
    fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }
}

/// 32-bit FNV-1a over the UTF-8 bytes of a seed string.
pub fn hash_seed(seed: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in seed.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Builds a challenge seed such as `"m1x9k2ab-q7w3zt"`.
pub fn create_seed(now_ms: u64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}", to_base36(now_ms), suffix)
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_string_replays_same_sequence() {
        let mut a = Rng::from_seed_str("X");
        let mut b = Rng::from_seed_str("X");
        for _ in 0..64 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn next_f64_stays_in_unit_interval() {
        let mut rng = Rng::new(7);
        for _ in 0..10_000 {
            let value = rng.next_f64();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn pick_index_never_exceeds_len() {
        let mut rng = Rng::new(99);
        assert_eq!(rng.pick_index(0), 0);
        assert_eq!(rng.pick_index(1), 0);
        for _ in 0..1_000 {
            assert!(rng.pick_index(4) < 4);
        }
    }

    #[test]
    fn hash_seed_distinguishes_strings() {
        assert_ne!(hash_seed("round-1"), hash_seed("round-2"));
        assert_eq!(hash_seed(""), 0x811c_9dc5);
    }

    #[test]
    fn create_seed_has_base36_prefix_and_suffix() {
        let seed = create_seed(36);
        let (prefix, suffix) = seed.split_once('-').expect("seed has separator");
        assert_eq!(prefix, "10");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn int_is_inclusive_and_bool_honors_extremes() {
        let mut rng = Rng::new(3);
        for _ in 0..1_000 {
            assert!((0..=2).contains(&rng.int(0, 2)));
        }
        assert_eq!(rng.int(5, 5), 5);
        assert!(!rng.bool(0.0));
        assert!(rng.bool(1.0));
    }
}
