//! Cryptographic primitives for Callifornia.
//!
//! Provides:
//!   1. RSA-OAEP(SHA-256) key wrapping: per-call and per-packet AES keys are
//!      sent to a peer encrypted under the peer's RSA public key
//!   2. AES-256-CTR stream framing for media (`IV || ciphertext`)
//!   3. AES-256-GCM string encryption for small authenticated fields
//!   4. SHA-256 nickname hashing and UUID correlation ids
//!
//! Symmetric key material derives ZeroizeOnDrop. RSA private keys zeroize
//! themselves on drop. There is no unsafe code in this module.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// RSA modulus size used for every client keypair.
pub const RSA_KEY_BITS: usize = 3072;

/// AES-CTR IV length, prepended to every media frame.
pub const CTR_IV_LEN: usize = 16;

/// AES-GCM nonce length.
pub const GCM_IV_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const GCM_TAG_LEN: usize = 16;

// ── Hashing ───────────────────────────────────────────────────────────────────

/// Lowercase hex SHA-256 of a string.
///
/// Nicknames only ever appear on the wire in this form.
pub fn hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Fresh random UUID v4, used to correlate a request with its confirmation.
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── AES key ───────────────────────────────────────────────────────────────────

/// A 256-bit symmetric key. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; 32]);

impl AesKey {
    /// Generate a key from the OS-seeded CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

// ── RSA keypair ───────────────────────────────────────────────────────────────

/// The client's RSA keypair, generated once per authorized session.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh RSA-3072 keypair. Slow; call off the async runtime.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_bits(RSA_KEY_BITS)
    }

    /// Generate a keypair with a non-default modulus size.
    pub fn generate_with_bits(bits: usize) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Public key in wire form: Base64 of the SPKI DER encoding.
    pub fn public_key_base64(&self) -> Result<String, CryptoError> {
        serialize_public_key(&self.public)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &(self.public.size() * 8))
            .finish_non_exhaustive()
    }
}

/// Encode a public key as Base64 SPKI DER.
pub fn serialize_public_key(key: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|_| CryptoError::MalformedPublicKey)?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Decode a Base64 SPKI DER public key received from a peer.
pub fn deserialize_public_key(encoded: &str) -> Result<RsaPublicKey, CryptoError> {
    let der = STANDARD.decode(encoded)?;
    RsaPublicKey::from_public_key_der(&der).map_err(|_| CryptoError::MalformedPublicKey)
}

// ── Key wrapping ──────────────────────────────────────────────────────────────

/// Encrypt an AES key to a peer: RSA-OAEP(SHA-256), Base64 encoded.
pub fn rsa_wrap_key(public: &RsaPublicKey, key: &AesKey) -> Result<String, CryptoError> {
    let ciphertext = public.encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key.as_bytes())?;
    Ok(STANDARD.encode(ciphertext))
}

/// Recover an AES key wrapped to us by `rsa_wrap_key`.
///
/// The ciphertext must be exactly one modulus long before OAEP is attempted.
pub fn rsa_unwrap_key(private: &RsaPrivateKey, encoded: &str) -> Result<AesKey, CryptoError> {
    let ciphertext = STANDARD.decode(encoded)?;
    let expected = private.size();
    if ciphertext.len() != expected {
        return Err(CryptoError::InvalidCiphertextSize {
            expected,
            actual: ciphertext.len(),
        });
    }

    let mut plaintext = private.decrypt(Oaep::new::<Sha256>(), &ciphertext)?;
    let result = <[u8; 32]>::try_from(plaintext.as_slice())
        .map(AesKey::from_bytes)
        .map_err(|_| CryptoError::InvalidKeyLength(plaintext.len()));
    plaintext.zeroize();
    result
}

// ── AES-CTR stream framing ────────────────────────────────────────────────────

/// Encrypt a media frame. Output is `IV(16) || CTR(plaintext)`.
pub fn aes_stream_encrypt(key: &AesKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; CTR_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut out = Vec::with_capacity(CTR_IV_LEN + plaintext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plaintext);

    let mut cipher = Aes256Ctr::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?;
    cipher.apply_keystream(&mut out[CTR_IV_LEN..]);
    Ok(out)
}

/// Decrypt a frame produced by `aes_stream_encrypt`.
pub fn aes_stream_decrypt(key: &AesKey, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if frame.len() <= CTR_IV_LEN {
        return Err(CryptoError::TooShort(frame.len()));
    }
    let (iv, body) = frame.split_at(CTR_IV_LEN);

    let mut out = body.to_vec();
    let mut cipher = Aes256Ctr::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?;
    cipher.apply_keystream(&mut out);
    Ok(out)
}

// ── AES-GCM strings ───────────────────────────────────────────────────────────

/// Encrypt a short string. Output is Base64 of `IV(12) || ciphertext || tag(16)`.
pub fn aes_string_encrypt(key: &AesKey, text: &str) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?;

    let mut iv = [0u8; GCM_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), text.as_bytes())
        .map_err(|_| CryptoError::Authentication)?;

    let mut out = Vec::with_capacity(GCM_IV_LEN + sealed.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&sealed);
    Ok(STANDARD.encode(out))
}

/// Decrypt a string produced by `aes_string_encrypt`.
///
/// Any modification of the IV, ciphertext or tag yields
/// `CryptoError::Authentication`, never altered plaintext.
pub fn aes_string_decrypt(key: &AesKey, encoded: &str) -> Result<String, CryptoError> {
    let raw = STANDARD.decode(encoded)?;
    if raw.len() < GCM_IV_LEN + GCM_TAG_LEN {
        return Err(CryptoError::TooShort(raw.len()));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?;
    let (iv, sealed) = raw.split_at(GCM_IV_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| CryptoError::Authentication)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("RSA ciphertext is {actual} bytes, modulus is {expected}")]
    InvalidCiphertextSize { expected: usize, actual: usize },

    #[error("malformed public key")]
    MalformedPublicKey,

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("key has wrong length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    #[error("authentication tag mismatch")]
    Authentication,

    #[error("decrypted text is not valid UTF-8")]
    InvalidUtf8,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
