//! Password-encrypted keystores for handing key material to the remote
//! signer.
//!
//! A keystore carries the encrypted secret scalar plus enough metadata to
//! identify the key without decrypting it. The encryption key is derived
//! from the password with HKDF-SHA256 and the payload sealed with
//! ChaCha20-Poly1305; a separate checksum lets a wrong password be
//! rejected before decryption is attempted.

use anyhow::{anyhow, Result};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::bls::BlsKeypair;

const KEYSTORE_VERSION: u32 = 1;
const KDF_FUNCTION: &str = "hkdf-sha256";
const CIPHER_FUNCTION: &str = "chacha20-poly1305";
const HKDF_INFO: &[u8] = b"keystore-encryption";

/// Serialized keystore, the unit exported to the remote signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keystore {
    pub version: u32,
    pub uuid: String,
    /// Public key of the encrypted secret, unprefixed hex.
    pub pubkey: String,
    /// Derivation path label for the key.
    pub path: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub crypto: KeystoreCrypto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreCrypto {
    pub kdf: KdfParams,
    pub cipher: CipherParams,
    pub checksum: ChecksumParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub function: String,
    /// Hex-encoded 32-byte salt.
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherParams {
    pub function: String,
    /// Hex-encoded 12-byte nonce.
    pub nonce: String,
    /// Base64-encoded ciphertext (secret scalar plus auth tag).
    pub ciphertext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumParams {
    pub function: String,
    /// Hex-encoded SHA-256 over the derived-key tail and ciphertext.
    pub value: String,
}

impl Keystore {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| anyhow!("keystore encode failed: {}", e))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow!("keystore decode failed: {}", e))
    }
}

/// Encrypt `keypair`'s secret under `password`.
pub fn build_keystore(keypair: &BlsKeypair, password: &str, path: &str) -> Result<Keystore> {
    let mut salt = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let derived = derive_encryption_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived[..32]));
    let secret = keypair.secret_key_bytes();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), secret.as_slice())
        .map_err(|_| anyhow!("keystore encryption failed"))?;

    let checksum = checksum_value(&derived, &ciphertext);

    Ok(Keystore {
        version: KEYSTORE_VERSION,
        uuid: uuid::Uuid::new_v4().to_string(),
        pubkey: keypair.public_key_hex(),
        path: path.to_string(),
        created_at: chrono::Utc::now(),
        crypto: KeystoreCrypto {
            kdf: KdfParams {
                function: KDF_FUNCTION.to_string(),
                salt: hex::encode(salt),
            },
            cipher: CipherParams {
                function: CIPHER_FUNCTION.to_string(),
                nonce: hex::encode(nonce),
                ciphertext: base64::engine::general_purpose::STANDARD.encode(&ciphertext),
            },
            checksum: ChecksumParams {
                function: "sha256".to_string(),
                value: checksum,
            },
        },
    })
}

/// Decrypt a keystore, returning the secret scalar bytes. Fails on an
/// unknown cipher suite, a wrong password, or tampered ciphertext.
pub fn open_keystore(keystore: &Keystore, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    if keystore.crypto.kdf.function != KDF_FUNCTION {
        return Err(anyhow!(
            "unsupported kdf function: {}",
            keystore.crypto.kdf.function
        ));
    }
    if keystore.crypto.cipher.function != CIPHER_FUNCTION {
        return Err(anyhow!(
            "unsupported cipher function: {}",
            keystore.crypto.cipher.function
        ));
    }

    let salt = hex::decode(&keystore.crypto.kdf.salt)
        .map_err(|e| anyhow!("invalid keystore salt: {}", e))?;
    let nonce = hex::decode(&keystore.crypto.cipher.nonce)
        .map_err(|e| anyhow!("invalid keystore nonce: {}", e))?;
    if nonce.len() != 12 {
        return Err(anyhow!("invalid keystore nonce length: {}", nonce.len()));
    }
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&keystore.crypto.cipher.ciphertext)
        .map_err(|e| anyhow!("invalid keystore ciphertext: {}", e))?;

    let derived = derive_encryption_key(password, &salt)?;
    if checksum_value(&derived, &ciphertext) != keystore.crypto.checksum.value {
        return Err(anyhow!("keystore checksum mismatch: wrong password"));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived[..32]));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| anyhow!("keystore decryption failed"))?;

    Ok(Zeroizing::new(plaintext))
}

/// HKDF-SHA256 expansion of the password into 48 bytes: 32 for the cipher
/// key, 16 reserved for the checksum input.
fn derive_encryption_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 48]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
    let mut okm = Zeroizing::new([0u8; 48]);
    hk.expand(HKDF_INFO, okm.as_mut())
        .map_err(|_| anyhow!("keystore key derivation failed"))?;
    Ok(okm)
}

fn checksum_value(derived: &[u8; 48], ciphertext: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&derived[32..]);
    hasher.update(ciphertext);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls::{derive_signing_keypair, signing_key_path, PoolSeed};

    fn keypair() -> BlsKeypair {
        derive_signing_keypair(&PoolSeed::from_phrase("abandon abandon about"), 4)
    }

    #[test]
    fn test_keystore_roundtrip() {
        let kp = keypair();
        let keystore = build_keystore(&kp, "validator_4_password", &signing_key_path(4)).unwrap();
        assert_eq!(keystore.pubkey, kp.public_key_hex());
        assert_eq!(keystore.path, "m/12381/3600/4/0/0");

        let secret = open_keystore(&keystore, "validator_4_password").unwrap();
        assert_eq!(*secret, *kp.secret_key_bytes());
    }

    #[test]
    fn test_wrong_password_rejected_by_checksum() {
        let keystore = build_keystore(&keypair(), "right", "m/12381/3600/4/0/0").unwrap();
        let err = open_keystore(&keystore, "wrong").unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let mut keystore = build_keystore(&keypair(), "pw", "m/12381/3600/4/0/0").unwrap();
        keystore.crypto.cipher.ciphertext =
            base64::engine::general_purpose::STANDARD.encode([0u8; 48]);
        assert!(open_keystore(&keystore, "pw").is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let keystore = build_keystore(&keypair(), "pw", "m/12381/3600/4/0/0").unwrap();
        let json = keystore.to_json().unwrap();
        let parsed = Keystore::from_json(&json).unwrap();
        assert_eq!(parsed.pubkey, keystore.pubkey);
        assert_eq!(parsed.crypto.cipher.ciphertext, keystore.crypto.cipher.ciphertext);
    }
}
