//! Random name tokens for the bootstrap snapshot and staging directory.

use rand::Rng;

const HEX: &[u8] = b"0123456789abcdef";

/// Length used for generated snapshot and staging names.
pub const TOKEN_LEN: usize = 12;

/// Generate a random lowercase-hex token of `len` characters.
#[must_use]
pub fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(HEX[rng.gen_range(0..HEX.len())]))
        .collect()
}
