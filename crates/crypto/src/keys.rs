//! API key generation

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};

/// Random bytes drawn for each API key
const API_KEY_ENTROPY_BYTES: usize = 25;

/// Generate a new alphanumeric API key.
///
/// Draws 25 bytes from the OS RNG, base64-encodes them and strips every
/// character outside `[A-Za-z0-9]`, leaving at most 34 characters.
pub fn new_api_key() -> String {
    let mut bytes = [0u8; API_KEY_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    STANDARD
        .encode(bytes)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}
