//! Issuer / audience checks on a reconstructed compact token
//! (`header.payload.signature`).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::config::ClaimPolicy;
use crate::types::ProveError;

/// Check the `iss` and `aud` claims of `token` against `policy`.
pub fn check_claims(token: &[u8], policy: &ClaimPolicy) -> Result<(), ProveError> {
    let invalid = |why: &str| ProveError::InvalidInput(format!("token claims: {}", why));

    let token = std::str::from_utf8(token).map_err(|_| invalid("token is not UTF-8"))?;
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| invalid("token has no payload"))?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| invalid("payload is not base64url"))?;
    let claims: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|e| ProveError::MalformedJson(e.to_string()))?;

    let iss = claims
        .get("iss")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("missing iss"))?;
    let aud = claims
        .get("aud")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("missing aud"))?;

    if iss != policy.issuer || aud != policy.audience {
        return Err(invalid("iss or aud is incorrect"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ClaimPolicy {
        ClaimPolicy {
            circuit_id: "10007".into(),
            issuer: "https://issuer.example".into(),
            audience: "app".into(),
        }
    }

    fn token(payload: &str) -> Vec<u8> {
        format!("eyJhbGciOiJSUzI1NiJ9.{}.c2ln", URL_SAFE_NO_PAD.encode(payload)).into_bytes()
    }

    #[test]
    fn test_accepts_matching_claims() {
        let t = token(r#"{"iss":"https://issuer.example","aud":"app","sub":"42"}"#);
        assert!(check_claims(&t, &policy()).is_ok());
    }

    #[test]
    fn test_rejects_wrong_audience() {
        let t = token(r#"{"iss":"https://issuer.example","aud":"other"}"#);
        assert!(matches!(check_claims(&t, &policy()), Err(ProveError::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_non_string_claims() {
        let t = token(r#"{"iss":"https://issuer.example","aud":["app"]}"#);
        assert!(matches!(check_claims(&t, &policy()), Err(ProveError::InvalidInput(_))));
    }

    #[test]
    fn test_payload_errors() {
        assert!(matches!(check_claims(b"no-dots", &policy()), Err(ProveError::InvalidInput(_))));
        assert!(matches!(check_claims(b"a.!!!.b", &policy()), Err(ProveError::InvalidInput(_))));
        assert!(matches!(
            check_claims(&token("not json"), &policy()),
            Err(ProveError::MalformedJson(_))
        ));
    }
}
