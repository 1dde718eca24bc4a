//! Field-level token encryption (spec.md §9 Design Note: "connector
//! credentials are stored encrypted at rest").
//!
//! No AEAD crate appears anywhere in the retrieval pack, but `hmac`+`sha2`
//! are already a teacher dependency (S3 SigV4 signing in the original
//! `connector_s3.rs`). This reuses them to build an HMAC-SHA256 keystream
//! cipher: deterministic per-block keystream XORed against the plaintext,
//! no authentication tag. It is a placeholder swappable behind this same
//! two-function interface — not a production-grade AEAD construction — and
//! is documented as such rather than silently passed off as one.

use anyhow::{Context, Result};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
const BLOCK_SIZE: usize = 32;

fn keystream_block(key: &[u8], nonce: &[u8], counter: u64) -> [u8; BLOCK_SIZE] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(nonce);
    mac.update(&counter.to_le_bytes());
    mac.finalize().into_bytes().into()
}

fn keystream(key: &[u8], nonce: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter = 0u64;
    while out.len() < len {
        out.extend_from_slice(&keystream_block(key, nonce, counter));
        counter += 1;
    }
    out.truncate(len);
    out
}

/// Encrypt `plaintext` under `key`, returning `base64(nonce || ciphertext)`.
/// A fresh random nonce is generated per call, so encrypting the same
/// plaintext twice produces different ciphertext.
pub fn encrypt_field(key: &[u8], plaintext: &str) -> String {
    use rand::RngCore;
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let stream = keystream(key, &nonce, plaintext.len());
    let ciphertext: Vec<u8> = plaintext
        .as_bytes()
        .iter()
        .zip(stream.iter())
        .map(|(p, k)| p ^ k)
        .collect();

    let mut payload = nonce.to_vec();
    payload.extend_from_slice(&ciphertext);
    base64::engine::general_purpose::STANDARD.encode(payload)
}

/// Inverse of [`encrypt_field`].
pub fn decrypt_field(key: &[u8], encoded: &str) -> Result<String> {
    let payload = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("invalid base64 ciphertext")?;
    if payload.len() < 16 {
        anyhow::bail!("ciphertext too short to contain a nonce");
    }
    let (nonce, ciphertext) = payload.split_at(16);

    let stream = keystream(key, nonce, ciphertext.len());
    let plaintext: Vec<u8> = ciphertext.iter().zip(stream.iter()).map(|(c, k)| c ^ k).collect();

    String::from_utf8(plaintext).context("decrypted payload was not valid utf-8")
}

/// Load the encryption key from the environment variable named in config.
pub fn load_key(env_var: &str) -> Result<Vec<u8>> {
    let raw = std::env::var(env_var)
        .with_context(|| format!("{env_var} is not set; required to encrypt connector credentials"))?;
    Ok(raw.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let key = b"a test key of arbitrary length";
        let plaintext = "super-secret-oauth-token";
        let encrypted = encrypt_field(key, plaintext);
        let decrypted = decrypt_field(key, &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn same_plaintext_encrypts_differently_each_call() {
        let key = b"key";
        let a = encrypt_field(key, "token");
        let b = encrypt_field(key, "token");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_does_not_decrypt_to_original() {
        let plaintext = "token-value";
        let encrypted = encrypt_field(b"key-one", plaintext);
        let decrypted = decrypt_field(b"key-two", &encrypted);
        assert!(decrypted.is_err() || decrypted.unwrap() != plaintext);
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let key = b"key";
        let encrypted = encrypt_field(key, "");
        assert_eq!(decrypt_field(key, &encrypted).unwrap(), "");
    }
}
