//! Consent signature verification.

use ed25519_dalek::{Signature, VerifyingKey};
use tracing::debug;

use market_types::{ActorId, MarketError, Result};

/// Checks that `signature` over `message` was made by `signer`.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: &ActorId, message: &str, signature: &str) -> Result<()>;
}

/// Signer is a hex ed25519 public key, signature is hex (optional `0x`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signer: &ActorId, message: &str, signature: &str) -> Result<()> {
        let key_bytes: [u8; 32] = decode_fixed(signer.as_str(), "signer public key")?;
        let sig_bytes: [u8; 64] = decode_fixed(signature, "signature")?;

        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| MarketError::InvalidSignature)?;
        let signature = Signature::from_bytes(&sig_bytes);
        key.verify_strict(message.as_bytes(), &signature)
            .map_err(|_| MarketError::InvalidSignature)?;

        debug!(signer = %signer, "Consent signature verified");
        Ok(())
    }
}

/// Accepts any non-empty signature. For front-ends that verify upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _signer: &ActorId, _message: &str, signature: &str) -> Result<()> {
        if signature.trim().is_empty() {
            return Err(MarketError::MissingField("signature"));
        }
        Ok(())
    }
}

fn decode_fixed<const N: usize>(raw: &str, what: &str) -> Result<[u8; N]> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_part)
        .map_err(|e| MarketError::InvalidArgument(format!("{what} is not hex: {e}")))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        MarketError::InvalidArgument(format!("{what} must be {N} bytes, got {len}"))
    })
}
