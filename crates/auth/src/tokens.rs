//! Signed-token issuance and validation (specification §4.10).
//!
//! Wire format: `base64(payload json).base64(signature)`, deliberately not
//! a general JWT — this workspace has no `jsonwebtoken`/`jwt` dependency,
//! and the specification only asks for "asymmetric signature, 32-byte
//! keypair class", not header/alg negotiation. Grounded on the
//! `Signature::try_from`/`verify_strict` idiom in `decision-gate-mcp`'s
//! `evidence.rs`.

use crate::keys::TokenKeys;
use akashi_core::{AgentId, Claims, Error, OrgId, Result, Role};
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ed25519_dalek::{Signature, Signer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;
const ISSUER: &str = "akashi";

/// What the caller wants a freshly-issued token to claim.
pub struct TokenRequest {
    pub subject: uuid::Uuid,
    pub agent_id: AgentId,
    pub org_id: OrgId,
    pub role: Role,
    pub jti: Option<String>,
    /// Present for a scoped (narrower-privilege, shorter-lived) token
    /// issued by another subject on its own behalf.
    pub scoped_by: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    iss: String,
    subject: String,
    agent_id: AgentId,
    org_id: OrgId,
    role: Role,
    jti: Option<String>,
    scoped_by: Option<String>,
    exp: DateTime<Utc>,
}

/// Issue a signed token. `ttl` is clamped to `scoped_token_ttl_cap` when
/// `request.scoped_by` is set — the cap named in specification §4.10 is
/// enforced here, at issuance, rather than trusted from the caller.
pub fn issue_token(
    keys: &TokenKeys,
    request: TokenRequest,
    ttl: Duration,
    scoped_token_ttl_cap: Duration,
) -> Result<String> {
    let effective_ttl = if request.scoped_by.is_some() { ttl.min(scoped_token_ttl_cap) } else { ttl };
    let exp = Utc::now()
        + ChronoDuration::from_std(effective_ttl)
            .map_err(|e| Error::Fatal(format!("invalid token ttl: {e}")))?;

    let payload = TokenPayload {
        iss: ISSUER.to_string(),
        subject: request.subject.to_string(),
        agent_id: request.agent_id,
        org_id: request.org_id,
        role: request.role,
        jti: request.jti,
        scoped_by: request.scoped_by,
        exp,
    };
    let payload_json =
        serde_json::to_vec(&payload).map_err(|e| Error::Fatal(format!("token payload serialize failed: {e}")))?;
    let signature = keys.signing_key.sign(&payload_json);

    Ok(format!("{}.{}", BASE64.encode(&payload_json), BASE64.encode(signature.to_bytes())))
}

/// Validate a token string against `keys`, returning the [`Claims`] it
/// carries. Rejects: malformed framing, bad signature, wrong/empty issuer,
/// a non-UUID subject, and an expired `exp`.
pub fn validate_token(keys: &TokenKeys, token: &str) -> Result<Claims> {
    let (payload_b64, sig_b64) =
        token.split_once('.').ok_or_else(|| Error::Auth("malformed token".into()))?;

    let payload_json =
        BASE64.decode(payload_b64).map_err(|_| Error::Auth("malformed token payload".into()))?;
    let sig_bytes = BASE64.decode(sig_b64).map_err(|_| Error::Auth("malformed token signature".into()))?;
    let signature =
        Signature::try_from(sig_bytes.as_slice()).map_err(|_| Error::Auth("malformed token signature".into()))?;

    keys.verifying_key()
        .verify_strict(&payload_json, &signature)
        .map_err(|_| Error::Auth("token signature verification failed".into()))?;

    let payload: TokenPayload =
        serde_json::from_slice(&payload_json).map_err(|_| Error::Auth("malformed token payload".into()))?;

    if payload.iss != ISSUER {
        return Err(Error::Auth("token issuer mismatch".into()));
    }
    uuid::Uuid::parse_str(&payload.subject).map_err(|_| Error::Auth("token subject is not a uuid".into()))?;
    if payload.exp < Utc::now() {
        return Err(Error::Auth("token expired".into()));
    }

    Ok(Claims {
        subject: payload.subject,
        agent_id: payload.agent_id,
        org_id: payload.org_id,
        role: payload.role,
        jti: payload.jti,
        scoped_by: payload.scoped_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TokenRequest {
        TokenRequest {
            subject: uuid::Uuid::new_v4(),
            agent_id: AgentId::from("agent-1"),
            org_id: OrgId::new(),
            role: Role::Agent,
            jti: Some("jti-1".into()),
            scoped_by: None,
        }
    }

    #[test]
    fn issued_token_validates() {
        let keys = TokenKeys::generate_dev();
        let token = issue_token(&keys, request(), Duration::from_secs(3600), Duration::from_secs(900)).unwrap();
        let claims = validate_token(&keys, &token).unwrap();
        assert_eq!(claims.agent_id, AgentId::from("agent-1"));
        assert_eq!(claims.role, Role::Agent);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let keys = TokenKeys::generate_dev();
        let token = issue_token(&keys, request(), Duration::from_secs(3600), Duration::from_secs(900)).unwrap();
        let (payload_b64, sig_b64) = token.split_once('.').unwrap();
        let mut payload = BASE64.decode(payload_b64).unwrap();
        payload[0] ^= 0xFF;
        let tampered = format!("{}.{}", BASE64.encode(payload), sig_b64);
        assert!(validate_token(&keys, &tampered).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let keys = TokenKeys::generate_dev();
        let other = TokenKeys::generate_dev();
        let token = issue_token(&keys, request(), Duration::from_secs(3600), Duration::from_secs(900)).unwrap();
        assert!(validate_token(&other, &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = TokenKeys::generate_dev();
        let token = issue_token(&keys, request(), Duration::from_millis(0), Duration::from_secs(900)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(validate_token(&keys, &token).is_err());
    }

    #[test]
    fn scoped_token_ttl_is_capped() {
        let keys = TokenKeys::generate_dev();
        let mut req = request();
        req.scoped_by = Some("admin-subject".into());
        let token = issue_token(&keys, req, Duration::from_secs(10_000), Duration::from_secs(1)).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(validate_token(&keys, &token).is_err());
    }

    #[test]
    fn malformed_framing_is_rejected() {
        let keys = TokenKeys::generate_dev();
        assert!(validate_token(&keys, "not-a-token").is_err());
    }
}
