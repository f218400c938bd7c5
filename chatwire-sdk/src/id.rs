//! Time-sortable identifiers for locally created records (notifications).
//!
//! 26 Crockford base32 characters: 48 bits of milliseconds since the epoch
//! followed by 80 random bits, so lexical order matches creation order across
//! milliseconds.

use rand::Rng;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// A fresh identifier stamped with the current time.
pub fn generate() -> String {
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    generate_at(now_ms)
}

/// A fresh identifier stamped with `ms` (milliseconds since the epoch).
pub fn generate_at(ms: u64) -> String {
    let mut rng = rand::thread_rng();
    let random: u128 = (rng.r#gen::<u128>()) & ((1u128 << 80) - 1);

    let mut out = String::with_capacity(26);
    for shift in (0..10).rev() {
        out.push(CROCKFORD[((ms >> (shift * 5)) & 0x1F) as usize] as char);
    }
    for shift in (0..16).rev() {
        out.push(CROCKFORD[((random >> (shift * 5)) & 0x1F) as usize] as char);
    }
    out
}
