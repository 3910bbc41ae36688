//! # Request Signing and Verification
//!
//! Wires the canonicalizer and structured-field codec to the key
//! primitives, and enforces verification policy:
//!
//! - the verifier's required components must all be covered
//! - `created` must be within the caller's max-age window
//! - `expires` must not have passed
//! - the algorithm label must match the verification key type
//!
//! Signing appends to existing `Signature-Input`/`Signature` headers so
//! multiple labelled signatures can coexist on one request.

use hmac::{Hmac, Mac as _};
use sha2::{Digest, Sha256};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::crypto::{KeyPair, PublicKey};
use crate::error::{Error, Result};
use crate::httpsig::{
    algorithm_label, build_signature_base, parse_signature, parse_signature_input,
    render_signature, SignatureParams, SIGNATURE_HEADER, SIGNATURE_INPUT_HEADER,
};
use crate::time;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request body digest
pub const CONTENT_DIGEST_HEADER: &str = "content-digest";

/// Algorithm label for symmetric signatures
const HMAC_ALG: &str = "hmac-sha256";

/// Verification policy
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Label to verify; defaults to the only signature present
    pub signature_name: Option<String>,
    /// Component names that must be covered (e.g. `@method`)
    pub required_components: Vec<String>,
    /// Maximum accepted age of `created`, in seconds
    pub max_age: Option<i64>,
}

// ============================================================================
// SIGNING
// ============================================================================

/// Sign a request with an asymmetric keypair under the given label
///
/// Fills in `alg` (from the key type) and `keyid` when the caller left
/// them unset; a caller-provided `alg` that contradicts the key type
/// fails with `AlgorithmMismatch`. Existing signature labels on the
/// request are preserved.
pub fn sign_request<B>(
    req: &mut http::Request<B>,
    label: &str,
    params: &SignatureParams,
    keypair: &KeyPair,
) -> Result<()> {
    let expected = algorithm_label(keypair.key_type())?;
    let mut params = params.clone();
    match &params.algorithm {
        Some(alg) if alg != expected => {
            return Err(Error::AlgorithmMismatch(format!(
                "Algorithm '{}' does not match {} key",
                alg,
                keypair.key_type()
            )));
        }
        Some(_) => {}
        None => params.algorithm = Some(expected.to_string()),
    }
    if params.key_id.is_none() {
        params.key_id = Some(keypair.key_id());
    }

    let base = build_signature_base(req, &params)?;
    let signature = keypair.sign(base.as_bytes())?;
    append_signature_headers(req, label, &params, &signature)
}

/// Sign a request with a shared HMAC-SHA256 key under the given label
pub fn sign_request_hmac<B>(
    req: &mut http::Request<B>,
    label: &str,
    params: &SignatureParams,
    key: &[u8],
) -> Result<()> {
    let mut params = params.clone();
    match &params.algorithm {
        Some(alg) if alg != HMAC_ALG => {
            return Err(Error::AlgorithmMismatch(format!(
                "Algorithm '{}' does not match an HMAC key",
                alg
            )));
        }
        Some(_) => {}
        None => params.algorithm = Some(HMAC_ALG.to_string()),
    }

    let base = build_signature_base(req, &params)?;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::InvalidKey("HMAC key rejected".into()))?;
    mac.update(base.as_bytes());
    let signature = mac.finalize().into_bytes().to_vec();
    append_signature_headers(req, label, &params, &signature)
}

/// Append one labelled signature to the request headers, preserving any
/// labels already present
fn append_signature_headers<B>(
    req: &mut http::Request<B>,
    label: &str,
    params: &SignatureParams,
    signature: &[u8],
) -> Result<()> {
    let input_member = format!("{}={}", label, params.render());
    let signature_member = render_signature(label, signature);

    append_header(req, SIGNATURE_INPUT_HEADER, &input_member)?;
    append_header(req, SIGNATURE_HEADER, &signature_member)
}

fn append_header<B>(req: &mut http::Request<B>, name: &str, member: &str) -> Result<()> {
    let combined = match req.headers().get(name) {
        Some(existing) => {
            let existing = existing
                .to_str()
                .map_err(|_| Error::MalformedHeader(format!("Existing {} not ASCII", name)))?;
            format!("{}, {}", existing, member)
        }
        None => member.to_string(),
    };
    let value = http::HeaderValue::from_str(&combined)
        .map_err(|e| Error::MalformedHeader(format!("Invalid header value: {}", e)))?;
    req.headers_mut().insert(
        http::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::MalformedHeader(format!("Invalid header name: {}", e)))?,
        value,
    );
    Ok(())
}

// ============================================================================
// VERIFICATION
// ============================================================================

/// Verify a labelled signature on a request against a public key
pub fn verify_request<B>(
    req: &http::Request<B>,
    public_key: &PublicKey,
    options: &VerifyOptions,
) -> Result<()> {
    let (params, signature) = select_signature(req, options)?;
    enforce_policy(&params, options)?;

    if let Some(alg) = &params.algorithm {
        let expected = algorithm_label(public_key.key_type())?;
        if alg != expected {
            return Err(Error::AlgorithmMismatch(format!(
                "Signature algorithm '{}' does not match {} key",
                alg,
                public_key.key_type()
            )));
        }
    }

    let base = build_signature_base(req, &params)?;
    public_key.verify(base.as_bytes(), &signature)
}

/// Verify a labelled HMAC-SHA256 signature on a request
pub fn verify_request_hmac<B>(
    req: &http::Request<B>,
    key: &[u8],
    options: &VerifyOptions,
) -> Result<()> {
    let (params, signature) = select_signature(req, options)?;
    enforce_policy(&params, options)?;

    if let Some(alg) = &params.algorithm {
        if alg != HMAC_ALG {
            return Err(Error::AlgorithmMismatch(format!(
                "Signature algorithm '{}' does not match an HMAC key",
                alg
            )));
        }
    }

    let base = build_signature_base(req, &params)?;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::InvalidKey("HMAC key rejected".into()))?;
    mac.update(base.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)
}

/// Pick the labelled signature named by the options, or the only one
fn select_signature<B>(
    req: &http::Request<B>,
    options: &VerifyOptions,
) -> Result<(SignatureParams, Vec<u8>)> {
    let inputs = parse_signature_input(&collect_header(req, SIGNATURE_INPUT_HEADER)?)?;
    let signatures = parse_signature(&collect_header(req, SIGNATURE_HEADER)?)?;

    let label = match &options.signature_name {
        Some(name) => name.clone(),
        None if inputs.len() == 1 => inputs.keys().next().cloned().unwrap_or_default(),
        None => {
            return Err(Error::MalformedHeader(
                "Multiple signatures present; a signature name is required".into(),
            ))
        }
    };

    let params = inputs
        .get(&label)
        .ok_or_else(|| Error::MalformedHeader(format!("No Signature-Input labelled '{}'", label)))?
        .clone();
    let signature = signatures
        .get(&label)
        .ok_or_else(|| Error::MalformedHeader(format!("No Signature labelled '{}'", label)))?
        .clone();
    Ok((params, signature))
}

/// All lines of a (possibly repeated) header, joined for dictionary parse
fn collect_header<B>(req: &http::Request<B>, name: &str) -> Result<String> {
    let mut values = Vec::new();
    for value in req.headers().get_all(name) {
        values.push(
            value
                .to_str()
                .map_err(|_| Error::MalformedHeader(format!("{} not ASCII", name)))?
                .to_string(),
        );
    }
    if values.is_empty() {
        return Err(Error::MalformedHeader(format!("Missing {} header", name)));
    }
    Ok(values.join(", "))
}

/// Required-component and timestamp checks
fn enforce_policy(params: &SignatureParams, options: &VerifyOptions) -> Result<()> {
    for required in &options.required_components {
        let covered = params
            .components
            .iter()
            .any(|c| c.name == *required || c.render() == *required);
        if !covered {
            return Err(Error::MissingComponent(required.clone()));
        }
    }

    let now = time::now_timestamp();
    if let (Some(created), Some(max_age)) = (params.created, options.max_age) {
        if now - created > max_age {
            return Err(Error::SignatureExpired(format!(
                "created {}s ago exceeds max age {}s",
                now - created,
                max_age
            )));
        }
    }
    if let Some(expires) = params.expires {
        if now > expires {
            return Err(Error::SignatureExpired(format!(
                "expired {}s ago",
                now - expires
            )));
        }
    }
    Ok(())
}

// ============================================================================
// CONTENT DIGEST
// ============================================================================

/// Produce a `Content-Digest` header value for a body:
/// `sha-256=:base64(SHA-256(body)):`
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", BASE64.encode(Sha256::digest(body)))
}

/// Check a `Content-Digest` header value against a body
pub fn verify_content_digest(header_value: &str, body: &[u8]) -> Result<()> {
    let expected = content_digest(body);
    if header_value.trim() == expected {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyType;

    fn request(uri: &str) -> http::Request<()> {
        http::Request::builder()
            .method("GET")
            .uri(uri)
            .body(())
            .unwrap()
    }

    fn ed25519() -> KeyPair {
        KeyPair::generate(KeyType::Ed25519).unwrap()
    }

    #[test]
    fn test_sign_verify_happy_path() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo?bar=baz");
        let params = SignatureParams::covering(["@method", "@authority", "@path", "@query"])
            .with_created(time::now_timestamp());

        sign_request(&mut req, "sig1", &params, &kp).unwrap();

        assert!(req.headers().contains_key(SIGNATURE_INPUT_HEADER));
        assert!(req.headers().contains_key(SIGNATURE_HEADER));

        verify_request(&req, &kp.public_key(), &VerifyOptions::default()).unwrap();
    }

    #[test]
    fn test_verify_each_algorithm() {
        for key_type in [KeyType::Ed25519, KeyType::Secp256k1, KeyType::Rsa2048] {
            let kp = KeyPair::generate(key_type).unwrap();
            let mut req = request("https://example.com/resource");
            let params = SignatureParams::covering(["@method", "@path"]);

            sign_request(&mut req, "sig1", &params, &kp).unwrap();
            verify_request(&req, &kp.public_key(), &VerifyOptions::default()).unwrap();
        }
    }

    #[test]
    fn test_covered_change_breaks_signature() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo?bar=baz");
        let params = SignatureParams::covering(["@method", "@path", "@query"]);
        sign_request(&mut req, "sig1", &params, &kp).unwrap();

        // Rebuild the request with a different covered query
        let (mut parts, body) = req.into_parts();
        parts.uri = "https://example.com/foo?bar=qux".parse().unwrap();
        let tampered = http::Request::from_parts(parts, body);

        let result = verify_request(&tampered, &kp.public_key(), &VerifyOptions::default());
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn test_uncovered_header_change_preserves_signature() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method", "@path"]);
        sign_request(&mut req, "sig1", &params, &kp).unwrap();

        req.headers_mut()
            .insert("x-trace-id", "added-after-signing".parse().unwrap());

        verify_request(&req, &kp.public_key(), &VerifyOptions::default()).unwrap();
    }

    #[test]
    fn test_query_param_protection() {
        let kp = ed25519();
        let sign_params = SignatureParams {
            components: vec![crate::httpsig::ComponentId::query_param("id")],
            ..Default::default()
        };

        let mut req = request("/api/v1/users?id=123&format=json&cache=false");
        sign_request(&mut req, "sig1", &sign_params, &kp).unwrap();
        let headers = req.headers().clone();

        // Same id, different uncovered params: verifies
        let mut same_id = request("/api/v1/users?id=123&format=xml&cache=false");
        *same_id.headers_mut() = headers.clone();
        verify_request(&same_id, &kp.public_key(), &VerifyOptions::default()).unwrap();

        // Different id: fails
        let mut new_id = request("/api/v1/users?id=456&format=json&cache=false");
        *new_id.headers_mut() = headers;
        let result = verify_request(&new_id, &kp.public_key(), &VerifyOptions::default());
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn test_signing_missing_component_fails() {
        let kp = ed25519();
        let mut req = request("/api/v1/users?id=123&format=json&cache=false");
        let params = SignatureParams::covering(["status"]);
        let result = sign_request(&mut req, "sig1", &params, &kp);
        assert!(matches!(result, Err(Error::ComponentNotFound(_))));
    }

    #[test]
    fn test_required_component_enforced() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method"]);
        sign_request(&mut req, "sig1", &params, &kp).unwrap();

        let options = VerifyOptions {
            required_components: vec!["@authority".into()],
            ..Default::default()
        };
        let result = verify_request(&req, &kp.public_key(), &options);
        assert!(matches!(result, Err(Error::MissingComponent(_))));
    }

    #[test]
    fn test_created_outside_max_age_rejected() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method"])
            .with_created(time::now_timestamp() - 600);
        sign_request(&mut req, "sig1", &params, &kp).unwrap();

        // 10 minutes old against a 5 minute window
        let strict = VerifyOptions {
            max_age: Some(300),
            ..Default::default()
        };
        let result = verify_request(&req, &kp.public_key(), &strict);
        assert!(matches!(result, Err(Error::SignatureExpired(_))));

        // Same signature within a 15 minute window
        let relaxed = VerifyOptions {
            max_age: Some(900),
            ..Default::default()
        };
        verify_request(&req, &kp.public_key(), &relaxed).unwrap();
    }

    #[test]
    fn test_expires_in_past_rejected() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method"])
            .with_expires(time::now_timestamp() - 10);
        sign_request(&mut req, "sig1", &params, &kp).unwrap();

        let result = verify_request(&req, &kp.public_key(), &VerifyOptions::default());
        assert!(matches!(result, Err(Error::SignatureExpired(_))));
    }

    #[test]
    fn test_algorithm_mismatch_on_sign() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method"]).with_algorithm("es256k");
        let result = sign_request(&mut req, "sig1", &params, &kp);
        assert!(matches!(result, Err(Error::AlgorithmMismatch(_))));
    }

    #[test]
    fn test_algorithm_mismatch_on_verify() {
        let ed = ed25519();
        let secp = KeyPair::generate(KeyType::Secp256k1).unwrap();

        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method"]);
        sign_request(&mut req, "sig1", &params, &ed).unwrap();

        let result = verify_request(&req, &secp.public_key(), &VerifyOptions::default());
        assert!(matches!(result, Err(Error::AlgorithmMismatch(_))));
    }

    #[test]
    fn test_multiple_labels_coexist() {
        let kp1 = ed25519();
        let kp2 = KeyPair::generate(KeyType::Secp256k1).unwrap();

        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method", "@path"]);
        sign_request(&mut req, "alpha", &params, &kp1).unwrap();
        sign_request(&mut req, "beta", &params, &kp2).unwrap();

        let alpha = VerifyOptions {
            signature_name: Some("alpha".into()),
            ..Default::default()
        };
        verify_request(&req, &kp1.public_key(), &alpha).unwrap();

        let beta = VerifyOptions {
            signature_name: Some("beta".into()),
            ..Default::default()
        };
        verify_request(&req, &kp2.public_key(), &beta).unwrap();

        // No name with two signatures present is ambiguous
        let result = verify_request(&req, &kp1.public_key(), &VerifyOptions::default());
        assert!(matches!(result, Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_unknown_label_fails() {
        let kp = ed25519();
        let mut req = request("https://example.com/foo");
        let params = SignatureParams::covering(["@method"]);
        sign_request(&mut req, "sig1", &params, &kp).unwrap();

        let options = VerifyOptions {
            signature_name: Some("nope".into()),
            ..Default::default()
        };
        let result = verify_request(&req, &kp.public_key(), &options);
        assert!(matches!(result, Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_hmac_sign_verify() {
        let key = b"0123456789abcdef0123456789abcdef";
        let mut req = request("https://example.com/foo?bar=baz");
        let params = SignatureParams::covering(["@method", "@query"]);

        sign_request_hmac(&mut req, "sig1", &params, key).unwrap();
        verify_request_hmac(&req, key, &VerifyOptions::default()).unwrap();

        let result = verify_request_hmac(&req, b"wrong key material!!", &VerifyOptions::default());
        assert!(matches!(result, Err(Error::InvalidSignature)));
    }

    #[test]
    fn test_content_digest_round_trip() {
        let body = br#"{"hello":"world"}"#;
        let digest = content_digest(body);
        assert!(digest.starts_with("sha-256=:"));
        verify_content_digest(&digest, body).unwrap();
        assert!(verify_content_digest(&digest, b"other body").is_err());
    }
}
