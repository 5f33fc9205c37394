//! Credential encryption and derivation of the device-bound password key.
use aes::Aes128;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use alloc::vec;
use alloc::vec::Vec;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// HMAC message used to derive the password key from the device secret.
pub const KEY_CONTEXT: &[u8] = b"userdb-password-key";
pub const KEY_LEN: usize = 16;
pub const BLOCK_LEN: usize = 16;
pub const MAX_PLAINTEXT_LEN: usize = 32;
pub const MAX_CIPHERTEXT_LEN: usize = 48;

const ZERO_IV: [u8; BLOCK_LEN] = [0; BLOCK_LEN];

type CbcEncryptor = cbc::Encryptor<Aes128>;
type CbcDecryptor = cbc::Decryptor<Aes128>;

/// Decrypted password bytes, wiped on drop.
pub type Plaintext = Zeroizing<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    Unavailable,
    Hardware,
}

impl core::fmt::Display for KeyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            KeyError::Unavailable => "device key unavailable",
            KeyError::Hardware => "HMAC peripheral failure",
        };
        write!(f, "{label}")
    }
}

impl core::error::Error for KeyError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    PlaintextTooLong { len: usize },
    Malformed,
    Key(KeyError),
}

impl From<KeyError> for CryptoError {
    fn from(error: KeyError) -> Self {
        CryptoError::Key(error)
    }
}

impl core::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CryptoError::PlaintextTooLong { len } => write!(
                f,
                "password of {len} bytes exceeds the {MAX_PLAINTEXT_LEN} byte limit"
            ),
            CryptoError::Malformed => write!(f, "malformed ciphertext"),
            CryptoError::Key(err) => write!(f, "key error: {err}"),
        }
    }
}

impl core::error::Error for CryptoError {}

/// Ciphertext of one password plus its true plaintext length.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct SealedPassword {
    cipher: Vec<u8>,
    len: u8,
}

impl SealedPassword {
    pub fn new(cipher: Vec<u8>, len: u8) -> Result<Self, CryptoError> {
        let sealed = Self { cipher, len };
        sealed.check()?;
        Ok(sealed)
    }

    pub fn cipher(&self) -> &[u8] {
        &self.cipher
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self) -> Result<(), CryptoError> {
        let cipher_len = self.cipher.len();
        let aligned = cipher_len % BLOCK_LEN == 0;
        if !aligned
            || !(BLOCK_LEN..=MAX_CIPHERTEXT_LEN).contains(&cipher_len)
            || self.len() > cipher_len
            || self.len() > MAX_PLAINTEXT_LEN
        {
            return Err(CryptoError::Malformed);
        }
        Ok(())
    }
}

impl core::fmt::Debug for SealedPassword {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SealedPassword")
            .field("cipher_len", &self.cipher.len())
            .field("len", &self.len)
            .finish()
    }
}

/// 128-bit password key, derived once per boot and never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey([u8; KEY_LEN]);

impl DeviceKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Source of the device-bound HMAC secret.
pub trait KeySource {
    /// HMAC-SHA256 of `message` under the device secret.
    fn hmac(&mut self, message: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeyError>;
}

/// Derive the password key as the first half of `HMAC(secret, KEY_CONTEXT)`.
pub fn derive_key<K: KeySource + ?Sized>(source: &mut K) -> Result<DeviceKey, KeyError> {
    let digest = source.hmac(KEY_CONTEXT)?;
    let mut key = DeviceKey([0u8; KEY_LEN]);
    key.0.copy_from_slice(&digest[..KEY_LEN]);
    Ok(key)
}

/// Secret held in RAM, used off-target and in tests.
pub struct SoftwareKeySource {
    secret: Zeroizing<Vec<u8>>,
}

impl SoftwareKeySource {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
        }
    }
}

impl KeySource for SoftwareKeySource {
    fn hmac(&mut self, message: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeyError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.secret)
            .map_err(|_| KeyError::Unavailable)?;
        mac.update(message);
        let output = mac.finalize().into_bytes();
        let mut digest = Zeroizing::new([0u8; 32]);
        digest.copy_from_slice(&output);
        Ok(digest)
    }
}

/// HMAC computed by the ESP32-S3 peripheral from eFuse key block 0.
#[cfg(target_arch = "xtensa")]
pub struct HardwareKeySource<'d> {
    hmac: esp_hal::hmac::Hmac<'d>,
}

#[cfg(target_arch = "xtensa")]
impl<'d> HardwareKeySource<'d> {
    pub fn new(hmac: esp_hal::hmac::Hmac<'d>) -> Self {
        Self { hmac }
    }
}

#[cfg(target_arch = "xtensa")]
impl KeySource for HardwareKeySource<'_> {
    fn hmac(&mut self, message: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeyError> {
        use esp_hal::hmac::{HmacPurpose, KeyId};

        self.hmac.init();
        nb::block!(self.hmac.configure(HmacPurpose::ToUser, KeyId::Key0))
            .map_err(|_| KeyError::Hardware)?;
        let mut remaining = message;
        while !remaining.is_empty() {
            remaining = nb::block!(self.hmac.update(remaining)).map_err(|_| KeyError::Hardware)?;
        }
        let mut digest = Zeroizing::new([0u8; 32]);
        nb::block!(self.hmac.finalize(digest.as_mut_slice())).map_err(|_| KeyError::Hardware)?;
        Ok(digest)
    }
}

/// Seals and opens password bytes for storage in the vault.
pub trait CredentialCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedPassword, CryptoError>;
    fn open(&self, sealed: &SealedPassword) -> Result<Plaintext, CryptoError>;
}

/// AES-128-CBC with an all-zero IV and zero padding.
///
/// Identical passwords produce identical ciphertext and tampering goes undetected. The format is
/// kept for compatibility with provisioned devices.
pub struct CbcZeroIvCipher {
    key: DeviceKey,
}

impl CbcZeroIvCipher {
    pub fn new(key: DeviceKey) -> Self {
        Self { key }
    }

    pub fn from_source<K: KeySource + ?Sized>(source: &mut K) -> Result<Self, KeyError> {
        derive_key(source).map(Self::new)
    }
}

impl CredentialCipher for CbcZeroIvCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedPassword, CryptoError> {
        let len = plaintext.len();
        if len > MAX_PLAINTEXT_LEN {
            return Err(CryptoError::PlaintextTooLong { len });
        }

        let padded = len.div_ceil(BLOCK_LEN).max(1) * BLOCK_LEN;
        let mut buffer = Zeroizing::new(vec![0u8; padded]);
        buffer[..len].copy_from_slice(plaintext);

        CbcEncryptor::new(self.key.as_bytes().into(), &ZERO_IV.into())
            .encrypt_padded_mut::<NoPadding>(&mut buffer, padded)
            .map_err(|_| CryptoError::Malformed)?;

        SealedPassword::new(buffer.to_vec(), len as u8)
    }

    fn open(&self, sealed: &SealedPassword) -> Result<Plaintext, CryptoError> {
        sealed.check()?;

        let mut buffer = Zeroizing::new(sealed.cipher.clone());
        CbcDecryptor::new(self.key.as_bytes().into(), &ZERO_IV.into())
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| CryptoError::Malformed)?;
        buffer.truncate(sealed.len());
        Ok(buffer)
    }
}
