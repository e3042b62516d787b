/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP Signatures (draft-cavage), RSA-SHA256.
//!
//! Outbound requests sign the fixed header set
//! `(request-target) host digest date`; the digest covers the empty
//! string for bodyless requests. Inbound verification reconstructs the
//! signing string from whatever header list the sender declared,
//! expanding the `(request-target)`, `(created)` and `(expires)`
//! pseudo-headers.

use crate::store::{valid_status, ObjectStore};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

pub fn sha256_base64(data: &[u8]) -> String {
    B64.encode(Sha256::digest(data))
}

/// The `Digest` header value for a request body.
pub fn digest_header(body: &[u8]) -> String {
    format!("SHA-256={}", sha256_base64(body))
}

/// The canonical string signed on outbound requests.
pub fn signing_string(method: &str, target: &str, host: &str, digest: &str, date: &str) -> String {
    format!(
        "(request-target): {} {}\nhost: {}\ndigest: {}\ndate: {}",
        method.to_ascii_lowercase(),
        target,
        host,
        digest,
        date
    )
}

fn private_key_from_pem(pem: &str) -> Option<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .ok()
        .or_else(|| RsaPrivateKey::from_pkcs1_pem(pem).ok())
}

fn public_key_from_pem(pem: &str) -> Option<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .ok()
        .or_else(|| RsaPublicKey::from_pkcs1_pem(pem).ok())
}

/// RSA-SHA256 over `msg`, base64-encoded.
pub fn sign_rsa_sha256(private_pem: &str, msg: &str) -> Option<String> {
    let key = private_key_from_pem(private_pem)?;
    let signing_key = SigningKey::<Sha256>::new(key);
    let mut rng = rand::rngs::OsRng;
    let sig = signing_key.sign_with_rng(&mut rng, msg.as_bytes());
    Some(B64.encode(sig.to_bytes()))
}

pub fn verify_rsa_sha256(public_pem: &str, msg: &str, signature_b64: &str) -> bool {
    let Some(key) = public_key_from_pem(public_pem) else {
        return false;
    };
    let Ok(raw) = B64.decode(signature_b64.as_bytes()) else {
        return false;
    };
    let Ok(sig) = Signature::try_from(raw.as_slice()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(key)
        .verify(msg.as_bytes(), &sig)
        .is_ok()
}

/// The `Signature` header emitted on outbound requests. The key id is
/// always the actor url plus `#main-key`.
pub fn signature_header(actor: &str, signature_b64: &str) -> String {
    format!(
        "keyId=\"{actor}#main-key\",algorithm=\"rsa-sha256\",\
         headers=\"(request-target) host digest date\",signature=\"{signature_b64}\""
    )
}

#[derive(Debug, Default)]
pub struct SignatureFields {
    pub key_id: String,
    pub headers: Vec<String>,
    pub signature: String,
    pub created: Option<String>,
    pub expires: Option<String>,
}

/// Parses a comma-separated `Signature` header. Returns `None` when any
/// of `keyId`, `headers` or `signature` is missing.
pub fn parse_signature_header(value: &str) -> Option<SignatureFields> {
    let mut fields = SignatureFields::default();

    for part in value.split(',') {
        let part = part.trim();
        let Some((k, v)) = part.split_once('=') else {
            continue;
        };
        let v = v.trim().trim_matches('"').to_string();
        match k.trim() {
            "keyId" => fields.key_id = v,
            "headers" => {
                fields.headers = v
                    .split_whitespace()
                    .map(|h| h.to_ascii_lowercase())
                    .collect()
            }
            "signature" => fields.signature = v,
            "created" => fields.created = Some(v),
            "expires" => fields.expires = Some(v),
            _ => {}
        }
    }

    if fields.key_id.is_empty() || fields.headers.is_empty() || fields.signature.is_empty() {
        return None;
    }
    Some(fields)
}

/// Rebuilds the signing string for an inbound request from the stored
/// request dict (lowercased headers plus a `path` pseudo-entry). Inbound
/// signed requests are always POSTs. Returns `None` when a declared
/// header is absent.
pub fn signing_string_from_request(fields: &SignatureFields, req: &Value) -> Option<String> {
    let mut out = String::new();

    for name in &fields.headers {
        if !out.is_empty() {
            out.push('\n');
        }
        match name.as_str() {
            "(request-target)" => {
                let path = req.get("path").and_then(Value::as_str)?;
                out.push_str(&format!("(request-target): post {path}"));
            }
            "(created)" => {
                out.push_str(&format!("(created): {}", fields.created.as_deref()?));
            }
            "(expires)" => {
                out.push_str(&format!("(expires): {}", fields.expires.as_deref()?));
            }
            _ => {
                let value = req.get(name).and_then(Value::as_str)?;
                out.push_str(&format!("{name}: {value}"));
            }
        }
    }

    Some(out)
}

/// Verifies the signature of a queued inbound request against the
/// sender's stored actor document. Any missing piece fails closed.
pub fn check_signature(store: &ObjectStore, req: &Value) -> bool {
    let Some(sig_hdr) = req.get("signature").and_then(Value::as_str) else {
        debug!("check_signature no signature header");
        return false;
    };
    let Some(fields) = parse_signature_header(sig_hdr) else {
        debug!("check_signature bad signature header");
        return false;
    };

    // strip the #fragment to get the actor url
    let actor_url = fields
        .key_id
        .split_once('#')
        .map(|(a, _)| a)
        .unwrap_or(&fields.key_id);

    let (status, actor) = store.get(actor_url, None);
    if !valid_status(status) {
        debug!("check_signature unknown actor {actor_url}");
        return false;
    }
    let Some(actor) = actor else { return false };

    let Some(pubkey) = actor
        .get("publicKey")
        .and_then(|k| k.get("publicKeyPem"))
        .and_then(Value::as_str)
    else {
        debug!("check_signature no publicKeyPem for {actor_url}");
        return false;
    };

    let Some(sig_str) = signing_string_from_request(&fields, req) else {
        debug!("check_signature missing signed header");
        return false;
    };

    if !verify_rsa_sha256(pubkey, &sig_str, &fields.signature) {
        debug!("check_signature rsa verify error {actor_url}");
        return false;
    }

    true
}
