//! Bearer token codec for the hub handshake.
//!
//! A token binds an application identity to its API key:
//!
//! ```text
//! plaintext  = app_id (16 bytes, little-endian UUID layout) || UTF-8 api_key
//! token      = base64( IV (16 bytes) || AES-CBC-PKCS7(key, IV, plaintext) )
//! ```
//!
//! The IV is drawn from the OS RNG for every call, so encoding the same
//! inputs twice yields different tokens. The AES key is shared out-of-band;
//! its length selects AES-128, AES-192 or AES-256 and is validated once, when
//! the codec is built.

use aes::cipher::{
    block_padding::Pkcs7, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

/// IV size for AES-CBC (one block)
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Fixed width of the application identity in the plaintext
pub const APP_ID_SIZE: usize = 16;

/// Smallest decodable token buffer: IV plus one ciphertext block
pub const MIN_TOKEN_BYTES: usize = IV_SIZE + BLOCK_SIZE;

/// Token codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Key is not a valid AES key length
    #[error("Invalid AES key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    /// Token is structurally malformed
    #[error("Token format error: {0}")]
    Format(String),

    /// Decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Result type for token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// AES variant selected by the key length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySize {
    /// 16-byte key
    Aes128,
    /// 24-byte key
    Aes192,
    /// 32-byte key
    Aes256,
}

impl KeySize {
    fn from_len(len: usize) -> TokenResult<Self> {
        match len {
            16 => Ok(Self::Aes128),
            24 => Ok(Self::Aes192),
            32 => Ok(Self::Aes256),
            other => Err(TokenError::InvalidKeyLength(other)),
        }
    }
}

/// Encrypts and decrypts hub bearer tokens with a shared AES key.
///
/// Key material is zeroized when the codec is dropped.
#[derive(Clone)]
pub struct TokenCodec {
    key: Zeroizing<Vec<u8>>,
    size: KeySize,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from raw key bytes.
    pub fn new(key: &[u8]) -> TokenResult<Self> {
        let size = KeySize::from_len(key.len())?;
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            size,
        })
    }

    /// Build a codec from a key string, using its UTF-8 bytes as the key.
    pub fn from_passphrase(key: &str) -> TokenResult<Self> {
        Self::new(key.as_bytes())
    }

    /// AES variant in use
    pub fn key_size(&self) -> KeySize {
        self.size
    }

    /// Encode `(app_id, api_key)` into a fresh token.
    pub fn encode(&self, app_id: Uuid, api_key: &str) -> TokenResult<String> {
        let mut plaintext = Zeroizing::new(Vec::with_capacity(APP_ID_SIZE + api_key.len()));
        plaintext.extend_from_slice(&app_id.to_bytes_le());
        plaintext.extend_from_slice(api_key.as_bytes());

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let sealed = self.seal(&iv, &plaintext)?;
        Ok(STANDARD.encode(sealed))
    }

    /// Decode a token back into `(app_id, api_key)`.
    pub fn decode(&self, token: &str) -> TokenResult<(Uuid, String)> {
        let buffer = STANDARD
            .decode(token.trim())
            .map_err(|e| TokenError::Format(format!("invalid base64: {e}")))?;

        let plaintext = self.open(&buffer).inspect_err(|e| {
            tracing::debug!(token_bytes = buffer.len(), error = %e, "Rejected bearer token");
        })?;
        if plaintext.len() < APP_ID_SIZE {
            return Err(TokenError::Format(format!(
                "plaintext too short: {} bytes",
                plaintext.len()
            )));
        }

        let (id_bytes, key_bytes) = plaintext.split_at(APP_ID_SIZE);
        let mut id = [0u8; APP_ID_SIZE];
        id.copy_from_slice(id_bytes);

        let api_key = std::str::from_utf8(key_bytes)
            .map_err(|e| TokenError::Format(format!("api key is not UTF-8: {e}")))?
            .to_string();

        Ok((Uuid::from_bytes_le(id), api_key))
    }

    /// IV || ciphertext
    fn seal(&self, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> TokenResult<Vec<u8>> {
        let ciphertext = match self.size {
            KeySize::Aes128 => encrypt_cbc::<Aes128>(&self.key, iv, plaintext)?,
            KeySize::Aes192 => encrypt_cbc::<Aes192>(&self.key, iv, plaintext)?,
            KeySize::Aes256 => encrypt_cbc::<Aes256>(&self.key, iv, plaintext)?,
        };

        let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
        out.extend_from_slice(iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, buffer: &[u8]) -> TokenResult<Zeroizing<Vec<u8>>> {
        if buffer.len() < MIN_TOKEN_BYTES {
            return Err(TokenError::Format(format!(
                "token is {} bytes, need at least {MIN_TOKEN_BYTES}",
                buffer.len()
            )));
        }

        let (iv, ciphertext) = buffer.split_at(IV_SIZE);
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(TokenError::Format(format!(
                "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
                ciphertext.len()
            )));
        }

        let plaintext = match self.size {
            KeySize::Aes128 => decrypt_cbc::<Aes128>(&self.key, iv, ciphertext)?,
            KeySize::Aes192 => decrypt_cbc::<Aes192>(&self.key, iv, ciphertext)?,
            KeySize::Aes256 => decrypt_cbc::<Aes256>(&self.key, iv, ciphertext)?,
        };
        Ok(Zeroizing::new(plaintext))
    }
}

fn encrypt_cbc<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> TokenResult<Vec<u8>>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| TokenError::Crypto(format!("cipher init failed: {e}")))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt_cbc<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> TokenResult<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| TokenError::Crypto(format!("cipher init failed: {e}")))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| TokenError::Crypto("padding check failed".to_string()))
}
