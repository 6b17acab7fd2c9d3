//! Identifier generation, parsing, and classification.
//!
//! Top-level IDs are content-addressed: a SHA-256 over the issue's identity
//! fields, truncated and base36-encoded, prefixed with the store's
//! configured prefix (`sp-4k2x`). Child issues use hierarchical suffixes
//! (`sp-4k2x.1`, `sp-4k2x.1.2`) allocated from per-parent counters.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Base36 alphabet (0-9, a-z).
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Default adaptive-length configuration.
pub mod adaptive_defaults {
    /// Collision probability ceiling for picking the base length.
    pub const MAX_COLLISION_PROB: f64 = 0.25;
    /// Shortest hash suffix ever generated.
    pub const MIN_LENGTH: usize = 3;
    /// Longest hash suffix; also the retry ceiling on collisions.
    pub const MAX_LENGTH: usize = 8;
    /// Nonces tried per length before growing the suffix.
    pub const NONCE_ATTEMPTS: i32 = 10;
}

/// Default cap on hierarchical depth when `hierarchy.max-depth` is unset.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Encodes a byte slice as a base36 string of exactly `length` characters.
pub fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let zero = BigUint::zero();

    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        let digits = rem.to_u32_digits();
        let i = if digits.is_empty() {
            0
        } else {
            digits[0] as usize
        };
        chars.push(BASE36_ALPHABET[i]);
    }
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("base36 chars are valid UTF-8");

    if s.len() < length {
        s = "0".repeat(length - s.len()) + &s;
    }
    // Keep the least significant digits when over-long.
    if s.len() > length {
        s = s[s.len() - length..].to_owned();
    }
    s
}

/// Generates a content-addressed ID: `<prefix>-<base36 hash suffix>`.
///
/// Deterministic in all inputs; the nonce is the collision-retry knob.
pub fn generate_hash_id(
    prefix: &str,
    title: &str,
    description: &str,
    creator: &str,
    created_at: DateTime<Utc>,
    length: usize,
    nonce: i32,
) -> String {
    let content = format!(
        "{}|{}|{}|{}|{}",
        title,
        description,
        creator,
        created_at.timestamp_nanos_opt().unwrap_or(0),
        nonce
    );
    let hash = Sha256::digest(content.as_bytes());

    // Byte width matched to the target base36 length (36^len information).
    let num_bytes = match length {
        3 => 2,
        4 => 3,
        5 | 6 => 4,
        7 | 8 => 5,
        _ => 2,
    };

    let suffix = encode_base36(&hash[..num_bytes], length);
    format!("{prefix}-{suffix}")
}

/// Birthday-paradox approximation: P(collision) ~ 1 - e^(-n^2 / 2N).
fn collision_probability(num_issues: usize, id_length: usize) -> f64 {
    let total: f64 = 36.0_f64.powi(id_length as i32);
    let exponent = -(num_issues as f64).powi(2) / (2.0 * total);
    1.0 - exponent.exp()
}

/// Picks the shortest length in `[min_length, max_length]` whose collision
/// probability at the current store size stays under `max_collision_prob`.
pub fn compute_adaptive_length(
    num_issues: usize,
    min_length: usize,
    max_length: usize,
    max_collision_prob: f64,
) -> usize {
    for length in min_length..=max_length {
        if collision_probability(num_issues, length) <= max_collision_prob {
            return length;
        }
    }
    max_length
}

// ---------------------------------------------------------------------------
// Hierarchical IDs
// ---------------------------------------------------------------------------

/// Splits a hierarchical ID into `(parent, child_num)`.
///
/// An ID is hierarchical iff its LAST dot is followed by a pure-digit,
/// positive suffix and preceded by a non-empty parent. The rule is keyed on
/// the last dot so dotted prefixes stay top-level: `my.project-abc123` is
/// NOT hierarchical, while `my.project-abc123.1` parses as
/// `("my.project-abc123", 1)`.
pub fn parse_hierarchical(id: &str) -> Option<(&str, u32)> {
    let dot = id.rfind('.')?;
    let (parent, suffix) = (&id[..dot], &id[dot + 1..]);
    if parent.is_empty() || suffix.is_empty() {
        return None;
    }
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u32 = suffix.parse().ok()?;
    if n == 0 {
        return None;
    }
    Some((parent, n))
}

/// Returns `true` if the ID denotes a hierarchical child.
pub fn is_hierarchical(id: &str) -> bool {
    parse_hierarchical(id).is_some()
}

/// Number of hierarchical segments below the top-level ID.
///
/// `sp-abc` -> 0, `sp-abc.1` -> 1, `sp-abc.1.2` -> 2.
pub fn hierarchy_depth(id: &str) -> usize {
    let mut depth = 0;
    let mut current = id;
    while let Some((parent, _)) = parse_hierarchical(current) {
        depth += 1;
        current = parent;
    }
    depth
}

/// Checks that an explicit ID carries the configured prefix.
///
/// Empty IDs pass (they signal auto-generation and are never validated).
pub fn has_valid_prefix(id: &str, prefix: &str) -> bool {
    if id.is_empty() {
        return true;
    }
    id.starts_with(&format!("{prefix}-"))
}
