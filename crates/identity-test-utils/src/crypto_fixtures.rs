//! Deterministic cryptographic fixtures for testing
//!
//! The same seed always produces the same Ed25519 keypair.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;
use serde_json::{json, Value};

/// Expand a one-byte seed into a 32-byte Ed25519 seed.
fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    for (i, byte) in bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    bytes
}

/// Build a PKCS#8 v1 document from an Ed25519 seed (RFC 8410).
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// Ed25519 signing key with a `kid`, for EdDSA tokens and JWKS fixtures.
#[derive(Debug, Clone)]
pub struct TestKeypair {
    kid: String,
    public_key: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Deterministic keypair for `seed`.
    pub fn new(seed: u8, kid: &str) -> Self {
        let seed = seed_bytes(seed);
        let key_pair =
            Ed25519KeyPair::from_seed_unchecked(&seed).expect("Failed to create test keypair");

        Self {
            kid: kid.to_string(),
            public_key: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key_pkcs8(&self) -> &[u8] {
        &self.private_key_pkcs8
    }

    /// Public key as a JWK.
    pub fn jwk_json(&self) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key),
            "alg": "EdDSA",
            "use": "sig"
        })
    }

    /// Sign `claims` as an EdDSA JWT with this key's `kid`.
    pub fn sign<T: Serialize>(&self, claims: &T) -> String {
        self.sign_with_kid(claims, Some(&self.kid))
    }

    /// Sign with an explicit `kid` header, or none.
    pub fn sign_with_kid<T: Serialize>(&self, claims: &T, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = kid.map(ToString::to_string);

        encode(
            &header,
            claims,
            &EncodingKey::from_ed_der(&self.private_key_pkcs8),
        )
        .expect("Failed to sign EdDSA token")
    }
}

/// JWKS document containing `keys`.
pub fn jwks_json(keys: &[&TestKeypair]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>() })
}
