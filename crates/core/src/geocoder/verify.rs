use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;

/// Wire layout of a downloaded geocode data source payload:
/// `[4 bytes signature length][signature bytes][index bytes]`.
///
/// A public key can only verify, not decrypt, so authenticity and integrity
/// are both covered by a detached RSA-PKCS1v15/SHA-256 signature over the
/// plaintext index bytes rather than literal asymmetric decryption. See
/// `DESIGN.md` for this decision.
pub fn split_signed_payload(payload: &[u8]) -> Result<(&[u8], &[u8]), String> {
    if payload.len() < 4 {
        return Err("payload too short for a signature length prefix".to_string());
    }
    let sig_len = u32::from_be_bytes(payload[0..4].try_into().unwrap()) as usize;
    let rest = &payload[4..];
    if rest.len() < sig_len {
        return Err("payload truncated before end of signature".to_string());
    }
    Ok((&rest[..sig_len], &rest[sig_len..]))
}

pub fn verify_payload(public_key_pem: &str, payload: &[u8]) -> Result<Vec<u8>, String> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| format!("invalid public key: {e}"))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);

    let (sig_bytes, index_bytes) = split_signed_payload(payload)?;
    let signature = Signature::try_from(sig_bytes).map_err(|e| format!("invalid signature encoding: {e}"))?;
    verifying_key
        .verify(index_bytes, &signature)
        .map_err(|e| format!("signature verification failed: {e}"))?;
    Ok(index_bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_payload() {
        assert!(split_signed_payload(&[0, 0, 0, 10, 1, 2]).is_err());
    }

    #[test]
    fn splits_well_formed_payload() {
        let mut payload = Vec::new();
        payload.extend(2u32.to_be_bytes());
        payload.extend([0xAA, 0xBB]);
        payload.extend([1, 2, 3]);
        let (sig, body) = split_signed_payload(&payload).unwrap();
        assert_eq!(sig, &[0xAA, 0xBB]);
        assert_eq!(body, &[1, 2, 3]);
    }
}
