//! Response body encryption.
//!
//! Key derivation and wire format are a contract with existing clients:
//!
//! ```text
//! key   = ascii(lowercase_hex(md5(trim(bearer) ++ trim(salt))))   // 32 bytes
//! body  = iv[16] ++ aes256_cbc(key, iv, pkcs7(plaintext))
//! ```
//!
//! There is no MAC and no length prefix; clients decrypt exactly this layout.

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Initialization vector length prefixed to every ciphertext.
pub const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key length {0}, expected 32 bytes")]
    KeyLength(usize),

    #[error("failed to generate IV: {0}")]
    Randomness(#[from] rand::Error),
}

/// Hex-encoded digest used verbatim as AES-256 key material.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey(String);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derive the response key from a bearer token and the shared salt.
pub fn derive_key(credential: &str, salt: &str) -> DerivedKey {
    let mut input = String::with_capacity(credential.len() + salt.len());
    input.push_str(credential.trim());
    input.push_str(salt.trim());
    DerivedKey(format!("{:x}", md5::compute(input.as_bytes())))
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.try_fill_bytes(&mut iv)?;
    encrypt_with_iv(key.as_bytes(), &iv, plaintext)
}

fn encrypt_with_iv(key: &[u8], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let encryptor = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CipherError::KeyLength(key.len()))?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut output = Vec::with_capacity(IV_LEN + ciphertext.len());
    output.extend_from_slice(iv);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Length of `encrypt` output for a plaintext of `len` bytes.
pub fn encrypted_len(len: usize) -> usize {
    IV_LEN + (len / BLOCK_SIZE + 1) * BLOCK_SIZE
}
