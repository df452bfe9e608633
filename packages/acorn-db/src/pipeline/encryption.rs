//! Encryption root: AES-256-CBC over payload bytes.
//!
//! Key material comes either from a password + salt run through
//! PBKDF2-SHA256 (10 000 iterations, deriving a 256-bit key and a 128-bit
//! IV) or from an explicit key/IV pair. Each write appends the `aes256`
//! signature to the context trail; reads of data not produced by this root
//! fail with `Corrupt` (padding never validates).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut as _, BlockEncryptMut as _, KeyIvInit as _};
use rand::RngCore as _;

use acorn_core::{AcornError, Result};

use super::{Root, RootContext};

/// Default pipeline position: after compression (100).
pub const ENCRYPTION_SEQUENCE: i32 = 200;

/// PBKDF2 iteration count for password-derived keys.
const PBKDF2_ROUNDS: u32 = 10_000;

/// Signature appended to the context trail on write.
const SIGNATURE: &str = "aes256";

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC root.
pub struct EncryptionRoot {
    key: [u8; 32],
    iv: [u8; 16],
    sequence: i32,
}

impl EncryptionRoot {
    /// Derives key material from `password` and `salt` via PBKDF2-SHA256.
    #[must_use]
    pub fn from_password(password: &str, salt: &[u8]) -> Self {
        let mut derived = [0_u8; 48];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut derived);

        let mut key = [0_u8; 32];
        let mut iv = [0_u8; 16];
        key.copy_from_slice(&derived[..32]);
        iv.copy_from_slice(&derived[32..]);
        Self {
            key,
            iv,
            sequence: ENCRYPTION_SEQUENCE,
        }
    }

    /// Uses an explicit key and IV.
    #[must_use]
    pub fn from_key(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self {
            key,
            iv,
            sequence: ENCRYPTION_SEQUENCE,
        }
    }

    /// Overrides the pipeline position.
    #[must_use]
    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Generates a fresh 16-byte salt for password-derived setups.
    #[must_use]
    pub fn random_salt() -> [u8; 16] {
        let mut salt = [0_u8; 16];
        rand::rng().fill_bytes(&mut salt);
        salt
    }
}

impl Root for EncryptionRoot {
    fn name(&self) -> &str {
        "encryption"
    }

    fn sequence(&self) -> i32 {
        self.sequence
    }

    fn on_write(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(bytes);
        ctx.sign(SIGNATURE);
        Ok(ciphertext)
    }

    fn on_read(&self, bytes: &[u8], ctx: &mut RootContext) -> Result<Vec<u8>> {
        ctx.sign(SIGNATURE);
        Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(bytes)
            .map_err(|_| AcornError::Corrupt("AES-256-CBC padding did not validate".into()))
    }
}
