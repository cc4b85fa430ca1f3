use rand::Rng;

/// Unambiguous alphabet: no `I`, `O`, `0` or `1`.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

/// Up to this many codes are drawn per shipment before giving up.
pub const MAX_TRACKING_CODE_ATTEMPTS: usize = 5;

/// `{prefix}-XXXXXX`. Uniqueness is enforced by the datastore, not here.
pub fn make_tracking_code(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{prefix}-{suffix}")
}
