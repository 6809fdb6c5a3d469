//! RSA-2048 PKCS#1 v1.5 / SHA-256 manifest signature verification.
//!
//! The public key ships as a compile-time PEM constant. No example repo in
//! the corpus verifies RSA signatures, so this leans on the `rsa`
//! (RustCrypto) crate directly rather than inventing a verifier by hand.

use base64::Engine;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha2::Sha256;
use signature::Verifier as _;
use thiserror::Error;

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("public key is not valid PEM (missing header/footer)")]
    MalformedPublicKey,
    #[error("public key base64/DER decoding failed: {0}")]
    MalformedPublicKeyDetail(String),
    #[error("signature is not valid base64: {0}")]
    MalformedSignature(String),
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
}

impl SignatureError {
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature_base64: &str) -> Result<(), SignatureError>;
}

/// Strips PEM header/footer, base64-decodes the body, and parses the
/// resulting DER as an SPKI-encoded RSA public key.
fn parse_pem_public_key(pem: &str) -> Result<RsaPublicKey, SignatureError> {
    let inner = pem
        .lines()
        .filter(|line| !line.contains(PEM_HEADER) && !line.contains(PEM_FOOTER))
        .collect::<String>();
    if inner.is_empty() || !pem.contains(PEM_HEADER) || !pem.contains(PEM_FOOTER) {
        return Err(SignatureError::MalformedPublicKey);
    }
    let der = base64::engine::general_purpose::STANDARD
        .decode(inner.trim())
        .map_err(|e| SignatureError::MalformedPublicKeyDetail(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| SignatureError::MalformedPublicKeyDetail(e.to_string()))
}

pub struct RsaPkcs1Sha256Verifier {
    verifying_key: VerifyingKey<Sha256>,
}

impl RsaPkcs1Sha256Verifier {
    pub fn from_pem(pem: &str) -> Result<Self, SignatureError> {
        let public_key = parse_pem_public_key(pem)?;
        Ok(RsaPkcs1Sha256Verifier {
            verifying_key: VerifyingKey::new(public_key),
        })
    }
}

impl SignatureVerifier for RsaPkcs1Sha256Verifier {
    fn verify(&self, message: &[u8], signature_base64: &str) -> Result<(), SignatureError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(signature_base64)
            .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?;
        let sig = Signature::try_from(raw.as_slice())
            .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?;
        self.verifying_key
            .verify(message, &sig)
            .map_err(|e| SignatureError::VerificationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;
    use rsa::signature::Signer;

    fn keypair() -> (RsaPrivateKey, String) {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = private_key
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();
        (private_key, pem)
    }

    #[test]
    fn rejects_pem_without_header() {
        let err = parse_pem_public_key("not a pem").unwrap_err();
        assert!(matches!(err, SignatureError::MalformedPublicKey));
    }

    #[test]
    fn round_trips_a_real_signature() {
        let (private_key, pem) = keypair();
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let message = b"canonical manifest body bytes";
        let sig = signing_key.sign(message);
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(sig.to_bytes());

        let verifier = RsaPkcs1Sha256Verifier::from_pem(&pem).unwrap();
        verifier.verify(message, &sig_b64).unwrap();
    }

    #[test]
    fn rejects_tampered_message() {
        let (private_key, pem) = keypair();
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let sig = signing_key.sign(b"original");
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(sig.to_bytes());

        let verifier = RsaPkcs1Sha256Verifier::from_pem(&pem).unwrap();
        let err = verifier.verify(b"tampered", &sig_b64).unwrap_err();
        assert!(matches!(err, SignatureError::VerificationFailed(_)));
    }
}
