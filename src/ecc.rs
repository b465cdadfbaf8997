//! Elliptic-curve primitives from Orange Paper Section 4.3 (C3)
//!
//! ECDSA verification over secp256k1 with BIP66 strict-DER parsing and an
//! optional BIP62/141 low-S policy check, plus BIP340 Schnorr verification
//! over x-only public keys for Taproot.

use crate::error::{ConsensusError, Result};
use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{Message, PublicKey, Secp256k1, Verification, XOnlyPublicKey};

/// The upper half of the curve order; an ECDSA `s` value above this is
/// "high-S" and, when BIP62/141 enforcement applies, must be rejected
/// (transaction malleability fix).
const SECP256K1_ORDER_HALF: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// Parse a DER-encoded ECDSA signature under BIP66 strict rules (no
/// trailing garbage, canonical lengths, non-negative/minimal integers).
/// `secp256k1::ecdsa::Signature::from_der` already rejects the malformed
/// forms BIP66 cares about; this wraps that in the crate's error type.
pub fn parse_der_signature(der: &[u8]) -> Result<EcdsaSignature> {
    EcdsaSignature::from_der(der).map_err(|_| ConsensusError::BadSignatureEncoding)
}

/// Lenient DER parse for pre-BIP66 history, ported from libsecp256k1's
/// `ecdsa_signature_parse_der_lax`. Structurally odd input never fails the
/// parse itself; an overflowing or missing `r`/`s` component collapses to
/// the all-zero signature (which no public key ever verifies against)
/// instead of rejecting the transaction. Used only when `Flags::BIP66` is
/// inactive, so strict-DER-only signatures from after the soft fork still
/// go through `parse_der_signature`.
pub fn parse_der_signature_lax(der: &[u8]) -> EcdsaSignature {
    zero_signature_or(|| {
        let len = der.len();
        let mut pos = 0usize;

        if pos == len || der[pos] != 0x30 {
            return None;
        }
        pos += 1;
        pos += read_length(der, &mut pos)?;

        if pos == len || der[pos] != 0x02 {
            return None;
        }
        pos += 1;
        let rlen = read_length(der, &mut pos)?;
        if rlen > len - pos {
            return None;
        }
        let mut rpos = pos;
        let mut rlen = rlen;
        pos += rlen;

        if pos == len || der[pos] != 0x02 {
            return None;
        }
        pos += 1;
        let slen = read_length(der, &mut pos)?;
        if slen > len - pos {
            return None;
        }
        let mut spos = pos;
        let mut slen = slen;

        while rlen > 0 && der[rpos] == 0 {
            rlen -= 1;
            rpos += 1;
        }
        while slen > 0 && der[spos] == 0 {
            slen -= 1;
            spos += 1;
        }
        if rlen > 32 || slen > 32 {
            return None;
        }

        let mut compact = [0u8; 64];
        compact[32 - rlen..32].copy_from_slice(&der[rpos..rpos + rlen]);
        compact[64 - slen..64].copy_from_slice(&der[spos..spos + slen]);
        EcdsaSignature::from_compact(&compact).ok()
    })
}

/// Reads a DER length octet (short or long form) starting at `*pos`,
/// advances `*pos` past it, and returns the decoded length. `None` on
/// truncated or oversized (more than 8 length-of-length bytes) input.
fn read_length(der: &[u8], pos: &mut usize) -> Option<usize> {
    if *pos == der.len() {
        return None;
    }
    let mut lenbyte = der[*pos] as usize;
    *pos += 1;
    if lenbyte & 0x80 == 0 {
        return Some(lenbyte);
    }
    lenbyte -= 0x80;
    if lenbyte > der.len() - *pos {
        return None;
    }
    while lenbyte > 0 && der[*pos] == 0 {
        *pos += 1;
        lenbyte -= 1;
    }
    if lenbyte >= 8 {
        return None;
    }
    let mut value = 0usize;
    while lenbyte > 0 {
        value = (value << 8) | der[*pos] as usize;
        *pos += 1;
        lenbyte -= 1;
    }
    Some(value)
}

fn zero_signature_or(f: impl FnOnce() -> Option<EcdsaSignature>) -> EcdsaSignature {
    f().unwrap_or_else(|| EcdsaSignature::from_compact(&[0u8; 64]).expect("all-zero signature always parses"))
}

/// True if the signature's `s` component is in the lower half of the
/// curve order (BIP62/141 low-S policy).
pub fn is_low_s(sig: &EcdsaSignature) -> bool {
    let compact = sig.serialize_compact();
    let s = &compact[32..64];
    s <= &SECP256K1_ORDER_HALF[..]
}

pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_slice(bytes).map_err(|_| ConsensusError::BadPubkeyEncoding)
}

pub fn parse_xonly_public_key(bytes: &[u8]) -> Result<XOnlyPublicKey> {
    XOnlyPublicKey::from_slice(bytes).map_err(|_| ConsensusError::BadPubkeyEncoding)
}

/// Verify an ECDSA signature over a 32-byte sighash, requiring the
/// signature to already be DER-parsed and the key already parsed. Callers
/// enforce low-S separately via `is_low_s` where the active flags require it.
pub fn verify_ecdsa<C: Verification>(
    ctx: &Secp256k1<C>,
    sighash: &[u8; 32],
    sig: &EcdsaSignature,
    pubkey: &PublicKey,
) -> Result<()> {
    let message = Message::from_digest(*sighash);
    ctx.verify_ecdsa(&message, sig, pubkey)
        .map_err(|_| ConsensusError::EcdsaVerifyFailed)
}

/// Verify a BIP340 Schnorr signature (64 bytes, r || s) over a 32-byte
/// tapsighash against an x-only public key.
pub fn verify_schnorr<C: Verification>(
    ctx: &Secp256k1<C>,
    sighash: &[u8; 32],
    sig_bytes: &[u8; 64],
    pubkey: &XOnlyPublicKey,
) -> Result<()> {
    let sig = secp256k1::schnorr::Signature::from_slice(sig_bytes)
        .map_err(|_| ConsensusError::BadSignatureEncoding)?;
    let message = Message::from_digest(*sighash);
    ctx.verify_schnorr(&sig, &message, pubkey)
        .map_err(|_| ConsensusError::SchnorrVerifyFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{rand, SecretKey};

    #[test]
    fn test_ecdsa_round_trip() {
        let ctx = Secp256k1::new();
        let secret = SecretKey::new(&mut rand::thread_rng());
        let public = PublicKey::from_secret_key(&ctx, &secret);
        let digest = crate::hash::hash256(b"message");
        let message = Message::from_digest(digest);
        let sig = ctx.sign_ecdsa(&message, &secret);
        assert!(verify_ecdsa(&ctx, &digest, &sig, &public).is_ok());
    }

    #[test]
    fn test_ecdsa_wrong_message_fails() {
        let ctx = Secp256k1::new();
        let secret = SecretKey::new(&mut rand::thread_rng());
        let public = PublicKey::from_secret_key(&ctx, &secret);
        let digest = crate::hash::hash256(b"message");
        let message = Message::from_digest(digest);
        let sig = ctx.sign_ecdsa(&message, &secret);
        let other_digest = crate::hash::hash256(b"other");
        assert!(verify_ecdsa(&ctx, &other_digest, &sig, &public).is_err());
    }

    #[test]
    fn test_schnorr_round_trip() {
        let ctx = Secp256k1::new();
        let keypair = secp256k1::Keypair::new(&ctx, &mut rand::thread_rng());
        let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
        let digest = crate::hash::tagged_hash("TapSighash", b"msg");
        let message = Message::from_digest(digest);
        let sig = ctx.sign_schnorr(&message, &keypair);
        let sig_bytes: [u8; 64] = sig.as_ref().try_into().unwrap();
        assert!(verify_schnorr(&ctx, &digest, &sig_bytes, &xonly).is_ok());
    }

    #[test]
    fn test_parse_der_signature_rejects_garbage() {
        assert!(parse_der_signature(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_is_low_s_threshold() {
        let ctx = Secp256k1::new();
        let secret = SecretKey::new(&mut rand::thread_rng());
        let digest = crate::hash::hash256(b"low-s-test");
        let message = Message::from_digest(digest);
        let sig = ctx.sign_ecdsa_low_r(&message, &secret);
        assert!(is_low_s(&sig));
    }
}
