//! Deposit message construction: withdrawal credentials, hash tree roots,
//! signing domains, and the deposit signature itself.
//!
//! Roots follow the consensus-layer SSZ merkleization of the deposit
//! structures: fixed-size leaves padded to 32-byte chunks, paired with
//! SHA-256. The deposit domain builds on the fork version and the genesis
//! validators root (zero for pre-genesis deposits).

use sha2::{Digest, Sha256};

use crate::bls::BlsKeypair;

/// Domain type tag for deposits.
const DOMAIN_DEPOSIT: [u8; 4] = [0x03, 0x00, 0x00, 0x00];

/// Signature plus the two roots recorded alongside it.
#[derive(Debug, Clone)]
pub struct SignedDeposit {
    pub signature: [u8; 96],
    pub deposit_message_root: [u8; 32],
    pub deposit_data_root: [u8; 32],
}

/// Type 0x00 credentials: leading zero byte, then the tail of the hashed
/// withdrawal public key.
pub fn bls_withdrawal_credentials(withdrawal_public_key: &[u8; 48]) -> [u8; 32] {
    let digest = Sha256::digest(withdrawal_public_key);
    let mut credentials = [0u8; 32];
    credentials[0] = 0x00;
    credentials[1..].copy_from_slice(&digest[1..]);
    credentials
}

/// Type 0x01 credentials: 0x01 prefix, 11 zero bytes, 20-byte address.
pub fn execution_withdrawal_credentials(address: &[u8; 20]) -> [u8; 32] {
    let mut credentials = [0u8; 32];
    credentials[0] = 0x01;
    credentials[12..].copy_from_slice(address);
    credentials
}

/// Deposit signing domain from chain identity.
pub fn compute_deposit_domain(
    fork_version: [u8; 4],
    genesis_validators_root: [u8; 32],
) -> [u8; 32] {
    let mut version_chunk = [0u8; 32];
    version_chunk[..4].copy_from_slice(&fork_version);
    let fork_data_root = hash_pair(&version_chunk, &genesis_validators_root);

    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&DOMAIN_DEPOSIT);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

/// Root of the unsigned deposit message (pubkey, credentials, amount).
pub fn deposit_message_root(
    public_key: &[u8; 48],
    withdrawal_credentials: &[u8; 32],
    amount_gwei: u64,
) -> [u8; 32] {
    let left = hash_pair(&pubkey_root(public_key), withdrawal_credentials);
    let right = hash_pair(&amount_chunk(amount_gwei), &[0u8; 32]);
    hash_pair(&left, &right)
}

/// Root actually signed: the message root mixed with the domain.
pub fn signing_root(message_root: &[u8; 32], domain: &[u8; 32]) -> [u8; 32] {
    hash_pair(message_root, domain)
}

/// Root of the full deposit data (message fields plus signature), as
/// registered with the deposit contract.
pub fn deposit_data_root(
    public_key: &[u8; 48],
    withdrawal_credentials: &[u8; 32],
    amount_gwei: u64,
    signature: &[u8; 96],
) -> [u8; 32] {
    let left = hash_pair(&pubkey_root(public_key), withdrawal_credentials);
    let right = hash_pair(&amount_chunk(amount_gwei), &signature_root(signature));
    hash_pair(&left, &right)
}

/// Sign a deposit for `keypair` and return the signature with both roots.
pub fn sign_deposit(
    keypair: &BlsKeypair,
    withdrawal_credentials: &[u8; 32],
    amount_gwei: u64,
    fork_version: [u8; 4],
    genesis_validators_root: [u8; 32],
) -> SignedDeposit {
    let public_key = keypair.public_key_bytes();
    let message_root = deposit_message_root(&public_key, withdrawal_credentials, amount_gwei);
    let domain = compute_deposit_domain(fork_version, genesis_validators_root);
    let root = signing_root(&message_root, &domain);
    let signature = keypair.sign(&root);
    let data_root =
        deposit_data_root(&public_key, withdrawal_credentials, amount_gwei, &signature);

    SignedDeposit {
        signature,
        deposit_message_root: message_root,
        deposit_data_root: data_root,
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// 48-byte key padded into two 32-byte chunks and merkleized.
fn pubkey_root(public_key: &[u8; 48]) -> [u8; 32] {
    let mut chunk0 = [0u8; 32];
    chunk0.copy_from_slice(&public_key[..32]);
    let mut chunk1 = [0u8; 32];
    chunk1[..16].copy_from_slice(&public_key[32..]);
    hash_pair(&chunk0, &chunk1)
}

/// 96-byte signature split into three chunks, padded to a four-leaf tree.
fn signature_root(signature: &[u8; 96]) -> [u8; 32] {
    let mut chunk0 = [0u8; 32];
    chunk0.copy_from_slice(&signature[..32]);
    let mut chunk1 = [0u8; 32];
    chunk1.copy_from_slice(&signature[32..64]);
    let mut chunk2 = [0u8; 32];
    chunk2.copy_from_slice(&signature[64..]);

    let left = hash_pair(&chunk0, &chunk1);
    let right = hash_pair(&chunk2, &[0u8; 32]);
    hash_pair(&left, &right)
}

/// Little-endian amount in a 32-byte chunk.
fn amount_chunk(amount_gwei: u64) -> [u8; 32] {
    let mut chunk = [0u8; 32];
    chunk[..8].copy_from_slice(&amount_gwei.to_le_bytes());
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls::{derive_signing_keypair, derive_withdrawal_keypair, PoolSeed};
    use crate::bls::verify_signature;
    use stakeops_types::DEPOSIT_AMOUNT_GWEI;

    fn test_seed() -> PoolSeed {
        PoolSeed::from_phrase("abandon abandon about")
    }

    #[test]
    fn test_bls_credentials_prefix() {
        let withdrawal = derive_withdrawal_keypair(&test_seed(), 0);
        let credentials = bls_withdrawal_credentials(&withdrawal.public_key_bytes());
        assert_eq!(credentials[0], 0x00);
        assert_eq!(credentials.len(), 32);
    }

    #[test]
    fn test_execution_credentials_layout() {
        let address = [0xEEu8; 20];
        let credentials = execution_withdrawal_credentials(&address);
        assert_eq!(credentials[0], 0x01);
        assert_eq!(credentials[1..12], [0u8; 11]);
        assert_eq!(credentials[12..], address);
    }

    #[test]
    fn test_domain_depends_on_fork_version() {
        let a = compute_deposit_domain([0x10, 0, 0, 0x38], [0u8; 32]);
        let b = compute_deposit_domain([0x00, 0, 0, 0x00], [0u8; 32]);
        assert_ne!(a, b);
        assert_eq!(a[..4], DOMAIN_DEPOSIT);
    }

    #[test]
    fn test_sign_deposit_is_deterministic_and_verifiable() {
        let keypair = derive_signing_keypair(&test_seed(), 2);
        let withdrawal = derive_withdrawal_keypair(&test_seed(), 2);
        let credentials = bls_withdrawal_credentials(&withdrawal.public_key_bytes());
        let fork = [0x10, 0x00, 0x00, 0x38];

        let first = sign_deposit(&keypair, &credentials, DEPOSIT_AMOUNT_GWEI, fork, [0u8; 32]);
        let second = sign_deposit(&keypair, &credentials, DEPOSIT_AMOUNT_GWEI, fork, [0u8; 32]);
        assert_eq!(first.signature, second.signature);
        assert_eq!(first.deposit_data_root, second.deposit_data_root);

        let domain = compute_deposit_domain(fork, [0u8; 32]);
        let root = signing_root(&first.deposit_message_root, &domain);
        assert!(verify_signature(&keypair.public_key_bytes(), &root, &first.signature).unwrap());
    }

    #[test]
    fn test_fork_version_changes_signature() {
        let keypair = derive_signing_keypair(&test_seed(), 1);
        let credentials = execution_withdrawal_credentials(&[0x11u8; 20]);

        let devnet = sign_deposit(
            &keypair,
            &credentials,
            DEPOSIT_AMOUNT_GWEI,
            [0x10, 0, 0, 0x38],
            [0u8; 32],
        );
        let mainnet = sign_deposit(
            &keypair,
            &credentials,
            DEPOSIT_AMOUNT_GWEI,
            [0x00, 0, 0, 0x00],
            [0u8; 32],
        );
        assert_eq!(devnet.deposit_message_root, mainnet.deposit_message_root);
        assert_ne!(devnet.signature, mainnet.signature);
        assert_ne!(devnet.deposit_data_root, mainnet.deposit_data_root);
    }

    #[test]
    fn test_amount_is_part_of_message_root() {
        let keypair = derive_signing_keypair(&test_seed(), 0);
        let credentials = execution_withdrawal_credentials(&[0x22u8; 20]);
        let pk = keypair.public_key_bytes();

        let full = deposit_message_root(&pk, &credentials, DEPOSIT_AMOUNT_GWEI);
        let half = deposit_message_root(&pk, &credentials, DEPOSIT_AMOUNT_GWEI / 2);
        assert_ne!(full, half);
    }
}
