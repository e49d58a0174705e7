//! Encrypted keystore codec
//!
//! On-disk format: a JSON document holding the public identifier in the
//! clear and the 64-byte signing secret sealed with AES-256-GCM under a
//! scrypt-derived key. The file never contains a field whose name is
//! key-adjacent; the secret only exists in plaintext inside
//! [`SigningIdentity`], which zeroizes on drop.
//!
//! A wrong passphrase and a tampered ciphertext produce the same error, so
//! the codec cannot be used as a password oracle.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, KeyInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use zeroize::Zeroizing;

use crate::config::NodeEnv;
use crate::{Error, Result};

/// AES-256-GCM instantiated with the format's 16-byte IV.
type KeystoreCipher = AesGcm<Aes256, U16>;

const KEYSTORE_VERSION: u32 = 1;
const SECRET_LEN: usize = 64;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const SALT_LEN: usize = 32;
const MIN_PASSPHRASE_CHARS: usize = 8;

const WRONG_PASSWORD: &str = "wrong password or tampered";
const CORRUPTED: &str = "corrupted";

/// The in-memory signing secret. Exists only between keystore open and
/// wallet teardown; the backing bytes are zeroed on drop. Deliberately not
/// `Clone` and not serializable.
pub struct SigningIdentity {
    secret: Zeroizing<[u8; SECRET_LEN]>,
    public_key: Pubkey,
}

impl SigningIdentity {
    /// Build from a 64-byte secret (32-byte seed followed by the 32-byte
    /// public key). The input buffer is zeroed before this returns.
    pub fn from_bytes(mut bytes: [u8; SECRET_LEN]) -> Result<Self> {
        let keypair = Keypair::from_bytes(&bytes).map_err(|_| {
            zeroize::Zeroize::zeroize(&mut bytes);
            Error::InvalidKeystore(CORRUPTED.into())
        })?;
        let public_key = keypair.pubkey();
        let identity = Self {
            secret: Zeroizing::new(bytes),
            public_key,
        };
        zeroize::Zeroize::zeroize(&mut bytes);
        Ok(identity)
    }

    /// Fresh random identity (used when provisioning a new wallet).
    pub fn generate() -> Self {
        let keypair = Keypair::new();
        let public_key = keypair.pubkey();
        Self {
            secret: Zeroizing::new(keypair.to_bytes()),
            public_key,
        }
    }

    pub fn public_key(&self) -> Pubkey {
        self.public_key
    }

    /// Ephemeral signer for one signing operation. Only the wallet module
    /// may call this; the returned keypair must not outlive the call site.
    pub(crate) fn keypair(&self) -> Result<Keypair> {
        Keypair::from_bytes(&self.secret[..]).map_err(|e| Error::SigningFailed(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn secret_bytes(&self) -> [u8; SECRET_LEN] {
        *self.secret
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningIdentity({})", self.public_key)
    }
}

/// scrypt cost parameters persisted alongside the ciphertext.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KdfParams {
    pub n: u32,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { n: 16384, r: 8, p: 1 }
    }
}

impl KdfParams {
    fn to_scrypt(self) -> Result<scrypt::Params> {
        if !self.n.is_power_of_two() || self.n < 2 {
            return Err(Error::InvalidKeystore(CORRUPTED.into()));
        }
        let log_n = self.n.trailing_zeros() as u8;
        scrypt::Params::new(log_n, self.r, self.p, 32)
            .map_err(|_| Error::InvalidKeystore(CORRUPTED.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptedPayload {
    ciphertext: String,
    iv: String,
    tag: String,
    salt: String,
    algorithm: String,
    kdf: String,
    kdf_params: KdfParams,
}

/// The persisted keystore record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoreFile {
    version: u32,
    public_key: String,
    encrypted: EncryptedPayload,
}

impl KeystoreFile {
    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

/// Encrypt `identity` under `passphrase` and write the record to `path`
/// with owner-only permissions.
pub fn create(identity: &SigningIdentity, passphrase: &str, path: &Path) -> Result<KeystoreFile> {
    create_with_params(identity, passphrase, path, KdfParams::default())
}

/// As [`create`], with explicit scrypt parameters (tests lower N).
pub fn create_with_params(
    identity: &SigningIdentity,
    passphrase: &str,
    path: &Path,
    params: KdfParams,
) -> Result<KeystoreFile> {
    if passphrase.chars().count() < MIN_PASSPHRASE_CHARS {
        return Err(Error::InvalidConfig(format!(
            "passphrase must be at least {MIN_PASSPHRASE_CHARS} characters"
        )));
    }

    let mut salt = Zeroizing::new([0u8; SALT_LEN]);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut *salt);
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(passphrase, &*salt, params)?;
    let cipher = KeystoreCipher::new_from_slice(&*key)
        .map_err(|_| Error::InvalidKeystore(CORRUPTED.into()))?;

    // The working buffer starts as the plaintext secret and is encrypted in
    // place; the Zeroizing wrapper clears whatever is left on every path.
    let mut buffer = Zeroizing::new(identity.secret.to_vec());
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", buffer.as_mut_slice())
        .map_err(|_| Error::SigningFailed("keystore encryption failed".into()))?;

    let record = KeystoreFile {
        version: KEYSTORE_VERSION,
        public_key: identity.public_key.to_string(),
        encrypted: EncryptedPayload {
            ciphertext: hex::encode(&buffer[..]),
            iv: hex::encode(iv),
            tag: hex::encode(tag),
            salt: hex::encode(*salt),
            algorithm: "aes-256-gcm".into(),
            kdf: "scrypt".into(),
            kdf_params: params,
        },
    };

    write_owner_only(path, &serde_json::to_string_pretty(&record)?)?;
    Ok(record)
}

/// Decrypt the record at `path` and recover the signing identity.
pub fn open(path: &Path, passphrase: &str) -> Result<SigningIdentity> {
    let raw = fs::read_to_string(path)?;
    let record: KeystoreFile =
        serde_json::from_str(&raw).map_err(|_| Error::InvalidKeystore(CORRUPTED.into()))?;

    if record.version != KEYSTORE_VERSION {
        return Err(Error::InvalidKeystore(format!(
            "unsupported version {}",
            record.version
        )));
    }

    let ciphertext = decode_hex(&record.encrypted.ciphertext, None)?;
    let iv = decode_hex(&record.encrypted.iv, Some(IV_LEN))?;
    let tag = decode_hex(&record.encrypted.tag, Some(TAG_LEN))?;
    let salt = decode_hex(&record.encrypted.salt, Some(SALT_LEN))?;

    let key = derive_key(passphrase, &salt, record.encrypted.kdf_params)?;
    let cipher = KeystoreCipher::new_from_slice(&*key)
        .map_err(|_| Error::InvalidKeystore(CORRUPTED.into()))?;

    let mut buffer = Zeroizing::new(ciphertext);
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&iv),
            b"",
            buffer.as_mut_slice(),
            GenericArray::from_slice(&tag),
        )
        .map_err(|_| Error::InvalidKeystore(WRONG_PASSWORD.into()))?;

    if buffer.len() != SECRET_LEN {
        return Err(Error::InvalidKeystore(CORRUPTED.into()));
    }
    let mut secret = [0u8; SECRET_LEN];
    secret.copy_from_slice(&buffer[..]);
    let identity = SigningIdentity::from_bytes(secret)?;

    if identity.public_key.to_string() != record.public_key {
        return Err(Error::InvalidKeystore(CORRUPTED.into()));
    }
    Ok(identity)
}

/// Read the stored public identifier without decrypting.
pub fn peek_public(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)?;
    let record: KeystoreFile =
        serde_json::from_str(&raw).map_err(|_| Error::InvalidKeystore(CORRUPTED.into()))?;
    Ok(record.public_key)
}

/// Dev-only import of a raw secret from an environment value. Base58 is
/// tried first; a JSON byte array is the fallback when base58 decoding
/// fails or yields the wrong length. Refused outright in production.
pub fn identity_from_env_value(value: &str, node_env: NodeEnv) -> Result<SigningIdentity> {
    if node_env == NodeEnv::Production {
        return Err(Error::InvalidConfig(
            "raw secret-key environment variables are not allowed in production".into(),
        ));
    }

    if let Ok(decoded) = bs58::decode(value.trim()).into_vec() {
        let decoded = Zeroizing::new(decoded);
        if decoded.len() == SECRET_LEN {
            let mut bytes = [0u8; SECRET_LEN];
            bytes.copy_from_slice(&decoded);
            return SigningIdentity::from_bytes(bytes);
        }
    }

    let parsed: Vec<u8> = serde_json::from_str(value.trim()).map_err(|_| {
        Error::InvalidConfig(
            "wallet secret value is neither a base58 string nor a JSON byte array".into(),
        )
    })?;
    let parsed = Zeroizing::new(parsed);
    if parsed.len() != SECRET_LEN {
        return Err(Error::InvalidConfig(format!(
            "wallet secret value must decode to {SECRET_LEN} bytes, got {}",
            parsed.len()
        )));
    }
    let mut bytes = [0u8; SECRET_LEN];
    bytes.copy_from_slice(parsed.as_ref());
    SigningIdentity::from_bytes(bytes)
}

fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(passphrase.as_bytes(), salt, &params.to_scrypt()?, &mut *key)
        .map_err(|_| Error::InvalidKeystore(CORRUPTED.into()))?;
    Ok(key)
}

fn decode_hex(value: &str, expected_len: Option<usize>) -> Result<Vec<u8>> {
    let bytes = hex::decode(value).map_err(|_| Error::InvalidKeystore(CORRUPTED.into()))?;
    if let Some(expected) = expected_len {
        if bytes.len() != expected {
            return Err(Error::InvalidKeystore(CORRUPTED.into()));
        }
    }
    Ok(bytes)
}

fn write_owner_only(path: &Path, contents: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}
