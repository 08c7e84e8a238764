//! BLS signing helpers for coin spends.
//!
//! Every standard spend is authorized by the coin owner's BLS key signing
//! `SHA-256(solution) || coin_id || genesis_challenge`. Binding the coin id
//! and network challenge stops a signature from being replayed against a
//! different coin or chain. Signatures of all spends in a bundle are
//! aggregated into one 96-byte G2 element.

use chia_bls::{PublicKey, SecretKey, Signature};
use std::fmt;

use crate::types::{Coin, Hash256};

/// Length of a serialized G1 public key.
pub const PUBLIC_KEY_LEN: usize = 48;
/// Length of a serialized G2 signature.
pub const SIGNATURE_LEN: usize = 96;

/// BLS keypair.
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
}

impl KeyPair {
    /// Derive a keypair from 32 bytes of seed material.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self { secret_key: SecretKey::from_seed(seed) }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public_key()
    }

    /// Serialized public key, which is also the standard puzzle reveal.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key().to_bytes().to_vec()
    }

    /// Puzzle hash of coins this key can spend.
    pub fn puzzle_hash(&self) -> Hash256 {
        puzzle_hash_for_pk(&self.public_key_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        chia_bls::sign(&self.secret_key, message)
    }

    /// Sign the standard authorization message for spending `coin` with `solution`.
    pub fn sign_spend(&self, coin: &Coin, solution: &[u8], genesis_challenge: &Hash256) -> Signature {
        self.sign(&spend_message(solution, &coin.coin_id(), genesis_challenge))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("puzzle_hash", &self.puzzle_hash())
            .finish_non_exhaustive()
    }
}

/// Puzzle hash committed to by coins locked to a public key.
pub fn puzzle_hash_for_pk(pk_bytes: &[u8]) -> Hash256 {
    Hash256::sha256(pk_bytes)
}

/// Message a coin owner signs to authorize one spend.
pub fn spend_message(solution: &[u8], coin_id: &Hash256, genesis_challenge: &Hash256) -> Vec<u8> {
    let mut msg = Vec::with_capacity(96);
    msg.extend_from_slice(Hash256::sha256(solution).as_bytes());
    msg.extend_from_slice(coin_id.as_bytes());
    msg.extend_from_slice(genesis_challenge.as_bytes());
    msg
}

pub fn parse_public_key(bytes: &[u8]) -> Option<PublicKey> {
    let arr: &[u8; PUBLIC_KEY_LEN] = bytes.try_into().ok()?;
    PublicKey::from_bytes(arr).ok()
}

pub fn parse_signature(bytes: &[u8]) -> Option<Signature> {
    let arr: &[u8; SIGNATURE_LEN] = bytes.try_into().ok()?;
    Signature::from_bytes(arr).ok()
}

/// Serialized identity signature, valid for a bundle with nothing to sign.
pub fn empty_signature() -> Vec<u8> {
    Signature::default().to_bytes().to_vec()
}

/// Aggregate signatures into one serialized G2 element.
pub fn aggregate_signatures<'a>(signatures: impl IntoIterator<Item = &'a Signature>) -> Vec<u8> {
    let mut aggregate = Signature::default();
    for sig in signatures {
        aggregate += sig;
    }
    aggregate.to_bytes().to_vec()
}

/// Aggregate already-serialized signatures. Returns `None` if any fails to parse.
pub fn aggregate_signature_bytes<'a>(
    signatures: impl IntoIterator<Item = &'a [u8]>,
) -> Option<Vec<u8>> {
    let mut aggregate = Signature::default();
    for bytes in signatures {
        aggregate += &parse_signature(bytes)?;
    }
    Some(aggregate.to_bytes().to_vec())
}

/// Verify an aggregated signature over `(public key, message)` pairs.
///
/// With no pairs the signature must be the identity element.
pub fn verify_aggregate(signature: &[u8], pairs: &[(PublicKey, Vec<u8>)]) -> bool {
    let Some(sig) = parse_signature(signature) else {
        return false;
    };
    if pairs.is_empty() {
        return sig == Signature::default();
    }
    chia_bls::aggregate_verify(&sig, pairs.iter().map(|(pk, msg)| (pk, msg.as_slice())))
}
