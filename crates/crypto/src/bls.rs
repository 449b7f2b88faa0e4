//! BLS12-381 keypairs derived deterministically from a pool seed.
//!
//! Derivation is a pure function of (seed, purpose, index): re-running the
//! same index range over the same seed always reproduces the same keys,
//! which is what makes a partially-failed bulk generation safely
//! re-runnable. Signing and withdrawal keys for one index are derived under
//! separate purpose labels.

use anyhow::{anyhow, Result};
use blsttc::{PublicKey, SecretKey, Signature};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const SIGNING_PURPOSE: &[u8] = b"validator/signing/v1";
const WITHDRAWAL_PURPOSE: &[u8] = b"validator/withdrawal/v1";

/// Root seed for a key pool. All keys in the pool derive from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PoolSeed([u8; 32]);

impl PoolSeed {
    /// Generate a fresh random seed from the OS entropy source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derive a seed from an operator-held recovery phrase.
    pub fn from_phrase(phrase: &str) -> Self {
        let digest = Sha256::digest(phrase.trim().as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_hex(input: &str) -> Result<Self> {
        let stripped = input.trim().strip_prefix("0x").unwrap_or(input.trim());
        let decoded =
            hex::decode(stripped).map_err(|e| anyhow!("pool seed is not valid hex: {}", e))?;
        if decoded.len() != 32 {
            return Err(anyhow!(
                "pool seed must be 32 bytes, got {}",
                decoded.len()
            ));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for PoolSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print seed material.
        write!(f, "PoolSeed(..)")
    }
}

/// A BLS12-381 keypair. The secret scalar lives inside `blsttc::SecretKey`,
/// which clears itself on drop.
pub struct BlsKeypair {
    secret: SecretKey,
    public: PublicKey,
}

impl BlsKeypair {
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Compressed public key bytes (48 bytes).
    pub fn public_key_bytes(&self) -> [u8; 48] {
        self.public.to_bytes()
    }

    /// Public key as unprefixed lowercase hex, the canonical record form.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.to_bytes())
    }

    /// Secret scalar bytes, zeroized when the returned guard drops.
    pub fn secret_key_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.secret.to_bytes().to_vec())
    }

    /// Sign an arbitrary 32-byte root. BLS signatures are deterministic, so
    /// the same root always yields the same 96-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 96] {
        self.secret.sign(message).to_bytes()
    }
}

/// Derive the signing keypair for a pool index.
pub fn derive_signing_keypair(seed: &PoolSeed, index: u32) -> BlsKeypair {
    derive_keypair(seed, SIGNING_PURPOSE, index)
}

/// Derive the withdrawal keypair for a pool index.
pub fn derive_withdrawal_keypair(seed: &PoolSeed, index: u32) -> BlsKeypair {
    derive_keypair(seed, WITHDRAWAL_PURPOSE, index)
}

fn derive_keypair(seed: &PoolSeed, purpose: &[u8], index: u32) -> BlsKeypair {
    // Hash (purpose, seed, index, counter) until the candidate lands inside
    // the scalar field. The counter rarely exceeds a handful of steps, and
    // the walk is part of the deterministic derivation.
    let mut counter: u8 = 0;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(purpose);
        hasher.update(seed.as_bytes());
        hasher.update(index.to_be_bytes());
        hasher.update([counter]);
        let mut candidate: [u8; 32] = hasher.finalize().into();

        match SecretKey::from_bytes(candidate) {
            Ok(secret) => {
                candidate.zeroize();
                let public = secret.public_key();
                return BlsKeypair { secret, public };
            }
            Err(_) => {
                candidate.zeroize();
                counter = counter.wrapping_add(1);
            }
        }
    }
}

/// Verify a 96-byte signature over `message` for a 48-byte public key.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
    if public_key.len() != 48 {
        return Err(anyhow!(
            "invalid public key length: expected 48, got {}",
            public_key.len()
        ));
    }
    if signature.len() != 96 {
        return Err(anyhow!(
            "invalid signature length: expected 96, got {}",
            signature.len()
        ));
    }

    let mut pk_bytes = [0u8; 48];
    pk_bytes.copy_from_slice(public_key);
    let pk = PublicKey::from_bytes(pk_bytes).map_err(|e| anyhow!("invalid public key: {}", e))?;

    let mut sig_bytes = [0u8; 96];
    sig_bytes.copy_from_slice(signature);
    let sig = Signature::from_bytes(sig_bytes).map_err(|e| anyhow!("invalid signature: {}", e))?;

    Ok(pk.verify(&sig, message))
}

/// Hierarchical path label recorded in keystores for a signing key.
pub fn signing_key_path(index: u32) -> String {
    format!("m/12381/3600/{}/0/0", index)
}

/// Hierarchical path label recorded in keystores for a withdrawal key.
pub fn withdrawal_key_path(index: u32) -> String {
    format!("m/12381/3600/{}/0", index)
}
