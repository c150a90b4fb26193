//! Write-authorization token derivation.
//!
//! Every `WriteDevice` request carries an `AccessToken`: the current
//! session token encrypted with the bridge's 16-character pre-shared
//! key, AES-128 in ECB mode, no padding, rendered as uppercase hex.
//! The hub hands out the session token in the directory listing and
//! refreshes it with every heartbeat.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};

use crate::error::ProtoError;

const BLOCK_SIZE: usize = 16;

/// Compute the `AccessToken` for a write.
///
/// `key` is the pre-shared bridge key (exactly 16 bytes), `token` the
/// current session token. The token length must be a multiple of the
/// AES block size since the cipher runs unpadded.
pub fn access_token(key: &str, token: &str) -> Result<String, ProtoError> {
    let key_bytes = key.as_bytes();
    if key_bytes.len() != BLOCK_SIZE {
        return Err(ProtoError::Key(format!(
            "expected {BLOCK_SIZE} bytes, got {}",
            key_bytes.len()
        )));
    }

    let token_bytes = token.as_bytes();
    if token_bytes.is_empty() || token_bytes.len() % BLOCK_SIZE != 0 {
        return Err(ProtoError::Validation {
            field: "session token",
            value: format!("length {} not a multiple of {BLOCK_SIZE}", token_bytes.len()),
        });
    }

    let cipher = Aes128::new(GenericArray::from_slice(key_bytes));
    let mut buffer = token_bytes.to_vec();
    for chunk in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }

    let mut out = String::with_capacity(buffer.len() * 2);
    for byte in &buffer {
        out.push_str(&format!("{byte:02X}"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const KEY: &str = "12ab345c-d67e-8f"; // 16 chars, app-issued shape

    #[test]
    fn produces_uppercase_hex_of_block_length() {
        let out = access_token(KEY, "a3f8c12b99d04e71").unwrap();
        assert_eq!(out.len(), 32);
        assert!(out.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(out, out.to_uppercase());
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let a = access_token(KEY, "a3f8c12b99d04e71").unwrap();
        let b = access_token(KEY, "a3f8c12b99d04e71").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn token_refresh_changes_the_output() {
        let a = access_token(KEY, "a3f8c12b99d04e71").unwrap();
        let b = access_token(KEY, "b4e9d23ca0e15f82").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn handles_multi_block_tokens() {
        let out = access_token(KEY, "a3f8c12b99d04e71a3f8c12b99d04e71").unwrap();
        assert_eq!(out.len(), 64);
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            access_token("short", "a3f8c12b99d04e71"),
            Err(ProtoError::Key(_))
        ));
    }

    #[test]
    fn rejects_unaligned_token() {
        assert!(matches!(
            access_token(KEY, "abc"),
            Err(ProtoError::Validation { .. })
        ));
        assert!(matches!(
            access_token(KEY, ""),
            Err(ProtoError::Validation { .. })
        ));
    }
}
