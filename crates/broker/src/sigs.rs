//! Key generation, address derivation, signing and verification for the
//! supported key families.
//!
//! secp256k1 signatures are 65 bytes (r + s + recovery id) over the SHA-256
//! of the message, so verification recovers the public key and compares its
//! address. ed25519 addresses embed the public key and verify directly.

use ed25519_dalek::Signer as _;
use k256::ecdsa::{
    RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey,
    signature::hazmat::PrehashSigner,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{WalletError, WalletResult};
use crate::types::{Address, KeyInfo, KeyType, Signature};

const SECP256K1_SIGNATURE_LEN: usize = 65;

/// Verifies an externally produced signature against the claimed signer.
///
/// Used by the offline signer before it accepts a submitted signature.
pub trait Verifier: Send + Sync {
    fn verify(&self, signature: &Signature, address: &Address, msg: &[u8]) -> WalletResult<()>;
}

/// [`Verifier`] backed by [`verify`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SigsVerifier;

impl Verifier for SigsVerifier {
    fn verify(&self, signature: &Signature, address: &Address, msg: &[u8]) -> WalletResult<()> {
        verify(signature, address, msg)
    }
}

/// Generates a fresh private key of the given family.
pub fn generate(key_type: KeyType) -> KeyInfo {
    let private_key = match key_type {
        KeyType::Secp256k1 => SigningKey::random(&mut OsRng).to_bytes().to_vec(),
        KeyType::Ed25519 => ed25519_dalek::SigningKey::generate(&mut OsRng)
            .to_bytes()
            .to_vec(),
    };
    KeyInfo {
        key_type,
        private_key,
    }
}

/// Derives the address owned by a private key.
pub fn address_of(key: &KeyInfo) -> WalletResult<Address> {
    match key.key_type {
        KeyType::Secp256k1 => secp256k1_address(secp256k1_key(&key.private_key)?.verifying_key()),
        KeyType::Ed25519 => Address::new(
            KeyType::Ed25519,
            ed25519_key(&key.private_key)?
                .verifying_key()
                .to_bytes()
                .to_vec(),
        ),
    }
}

pub fn sign(key: &KeyInfo, msg: &[u8]) -> WalletResult<Signature> {
    let data = match key.key_type {
        KeyType::Secp256k1 => {
            let signing_key = secp256k1_key(&key.private_key)?;
            let digest = Sha256::digest(msg);
            let (signature, recovery_id): (EcdsaSignature, RecoveryId) = signing_key
                .sign_prehash(&digest)
                .map_err(|e| WalletError::InvalidKey(format!("secp256k1 sign_prehash failed: {e}")))?;

            let mut sig_bytes = signature.to_bytes().to_vec();
            sig_bytes.push(recovery_id.to_byte());
            sig_bytes
        }
        KeyType::Ed25519 => ed25519_key(&key.private_key)?
            .sign(msg)
            .to_bytes()
            .to_vec(),
    };
    Ok(Signature {
        sig_type: key.key_type,
        data,
    })
}

/// Checks that `signature` over `msg` was produced by the key behind `address`.
pub fn verify(signature: &Signature, address: &Address, msg: &[u8]) -> WalletResult<()> {
    let failed = |reason: String| WalletError::VerificationFailed(reason);

    if signature.sig_type != address.key_type() {
        return Err(failed(format!(
            "{} signature cannot be checked against {} address {address}",
            signature.sig_type,
            address.key_type()
        )));
    }

    match signature.sig_type {
        KeyType::Secp256k1 => {
            if signature.data.len() != SECP256K1_SIGNATURE_LEN {
                return Err(failed(format!(
                    "secp256k1 signature must be {SECP256K1_SIGNATURE_LEN} bytes, got {}",
                    signature.data.len()
                )));
            }
            let ecdsa = EcdsaSignature::from_slice(&signature.data[..64])
                .map_err(|e| failed(format!("malformed secp256k1 signature: {e}")))?;
            let recovery_id = RecoveryId::from_byte(signature.data[64])
                .ok_or_else(|| failed("invalid recovery id".to_string()))?;

            let digest = Sha256::digest(msg);
            let recovered = VerifyingKey::recover_from_prehash(&digest, &ecdsa, recovery_id)
                .map_err(|e| failed(format!("recovering public key: {e}")))?;

            if secp256k1_address(&recovered)? != *address {
                return Err(failed(format!("signature was not produced by {address}")));
            }
            Ok(())
        }
        KeyType::Ed25519 => {
            let public_key: [u8; 32] = address
                .payload()
                .try_into()
                .map_err(|_| failed("ed25519 address must embed a 32-byte key".to_string()))?;
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&public_key)
                .map_err(|e| failed(format!("invalid ed25519 public key: {e}")))?;
            let ed_signature = ed25519_dalek::Signature::from_slice(&signature.data)
                .map_err(|e| failed(format!("malformed ed25519 signature: {e}")))?;
            verifying_key
                .verify_strict(msg, &ed_signature)
                .map_err(|e| failed(format!("signature was not produced by {address}: {e}")))
        }
    }
}

fn secp256k1_key(bytes: &[u8]) -> WalletResult<SigningKey> {
    SigningKey::from_slice(bytes)
        .map_err(|e| WalletError::InvalidKey(format!("invalid secp256k1 private key: {e}")))
}

fn ed25519_key(bytes: &[u8]) -> WalletResult<ed25519_dalek::SigningKey> {
    let secret: [u8; 32] = bytes.try_into().map_err(|_| {
        WalletError::InvalidKey(format!(
            "ed25519 private key must be 32 bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&secret))
}

fn secp256k1_address(verifying_key: &VerifyingKey) -> WalletResult<Address> {
    // Uncompressed point, same as the recovered key will encode to.
    let hash = Sha256::digest(verifying_key.to_encoded_point(false).as_bytes());
    Address::new(
        KeyType::Secp256k1,
        hash[..KeyType::Secp256k1.payload_len()].to_vec(),
    )
}
