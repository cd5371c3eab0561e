//! Bearer-token gate for the board API.
//!
//! Tokens are HMAC-signed JWTs issued by an external identity service that
//! shares `secret_key` with us. The `sub` claim names the acting user; it is
//! only used for audit stamping and never checked against a local table.

use std::str::FromStr;

use anyhow::{Context, Result};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::api::{ApiError, SharedState};
use crate::config::ServiceConfig;
use crate::errors::BoardError;

/// Authenticated external user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub i64);

impl Actor {
    pub fn id(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

/// Only the shared-secret HMAC family is accepted.
pub fn parse_algorithm(raw: &str) -> Result<Algorithm, BoardError> {
    match Algorithm::from_str(raw.trim()) {
        Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => Ok(alg),
        _ => Err(BoardError::validation(
            "algorithm",
            format!("unsupported signing algorithm '{}', expected HS256, HS384 or HS512", raw),
        )),
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let algorithm = parse_algorithm(&config.algorithm)?;
        Ok(Self::new(&config.secret_key, algorithm))
    }

    /// Checks signature and expiry, then reads the actor from `sub`.
    pub fn verify(&self, token: &str) -> Result<Actor, BoardError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| BoardError::Unauthorized(e.to_string()))?;
        match data.claims.sub.trim().parse::<i64>() {
            Ok(id) if id > 0 => Ok(Actor(id)),
            _ => Err(BoardError::Unauthorized(format!(
                "subject '{}' is not a user id",
                data.claims.sub
            ))),
        }
    }
}

/// Mints tokens with the configured lifetime. Used by `kanban token` and by
/// tests; production tokens come from the identity service.
pub struct TokenIssuer {
    key: EncodingKey,
    algorithm: Algorithm,
    ttl_minutes: i64,
}

impl TokenIssuer {
    pub fn new(secret: &str, algorithm: Algorithm, ttl_minutes: i64) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            algorithm,
            ttl_minutes,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let algorithm = parse_algorithm(&config.algorithm)?;
        Ok(Self::new(
            &config.secret_key,
            algorithm,
            config.access_token_expire_minutes,
        ))
    }

    pub fn issue(&self, actor: Actor) -> Result<String> {
        self.issue_for_minutes(actor, self.ttl_minutes)
    }

    pub fn issue_for_minutes(&self, actor: Actor, minutes: i64) -> Result<String> {
        let ttl = Duration::try_minutes(minutes)
            .with_context(|| format!("Token lifetime of {} minutes is out of range", minutes))?;
        self.issue_with_ttl(actor, ttl)
    }

    pub fn issue_with_ttl(&self, actor: Actor, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(ttl)
            .with_context(|| format!("Token expiry overflows after {}", ttl))?;
        let claims = Claims {
            sub: actor.id().to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(self.algorithm), &claims, &self.key).context("Failed to sign token")
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Verifies the `Authorization` header value or fails.
pub fn require_actor(verifier: &TokenVerifier, header: Option<&str>) -> Result<Actor, BoardError> {
    let header =
        header.ok_or_else(|| BoardError::Unauthorized("missing bearer token".to_string()))?;
    let token = bearer_token(header)
        .ok_or_else(|| BoardError::Unauthorized("malformed authorization header".to_string()))?;
    verifier.verify(token)
}

/// Like `require_actor`, but a missing or bad credential is simply anonymous.
pub fn optional_actor(verifier: &TokenVerifier, header: Option<&str>) -> Option<Actor> {
    header?;
    match require_actor(verifier, header) {
        Ok(actor) => Some(actor),
        Err(e) => {
            debug!(error = %e, "ignoring invalid credential on read");
            None
        }
    }
}

fn authorization(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

// ── Extractors ────────────────────────────────────────────────────────

/// Rejects the request with 401 unless it carries a valid token.
pub struct RequireActor(pub Actor);

/// Never rejects; `None` for anonymous callers.
pub struct MaybeActor(pub Option<Actor>);

impl FromRequestParts<SharedState> for RequireActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        match require_actor(&state.verifier, authorization(parts)) {
            Ok(actor) => Ok(RequireActor(actor)),
            Err(e) => {
                warn!(method = %parts.method, uri = %parts.uri, error = %e, "rejected credential");
                Err(ApiError::from(e))
            }
        }
    }
}

impl FromRequestParts<SharedState> for MaybeActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeActor(optional_actor(
            &state.verifier,
            authorization(parts),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET, Algorithm::HS256, 30)
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(SECRET, Algorithm::HS256)
    }

    fn sign(claims: &Claims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_issued_token_verifies() {
        let token = issuer().issue(Actor(7)).unwrap();
        assert_eq!(verifier().verify(&token).unwrap(), Actor(7));
        let header = format!("Bearer {}", token);
        assert_eq!(require_actor(&verifier(), Some(&header)).unwrap(), Actor(7));
        assert_eq!(optional_actor(&verifier(), Some(&header)), Some(Actor(7)));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let token = issuer().issue(Actor(3)).unwrap();
        let header = format!("bearer {}", token);
        assert_eq!(require_actor(&verifier(), Some(&header)).unwrap(), Actor(3));
    }

    #[test]
    fn test_missing_and_malformed_headers_are_unauthorized() {
        for header in [None, Some("Basic abc"), Some("Bearer"), Some("Bearer   ")] {
            match require_actor(&verifier(), header) {
                Err(BoardError::Unauthorized(_)) => {}
                other => panic!("Expected Unauthorized for {:?}, got {:?}", header, other),
            }
            assert_eq!(optional_actor(&verifier(), header), None);
        }
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let token = issuer()
            .issue_with_ttl(Actor(7), Duration::seconds(-5))
            .unwrap();
        let err = verifier().verify(&token).unwrap_err();
        assert!(matches!(err, BoardError::Unauthorized(_)));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = TokenIssuer::new("other-secret", Algorithm::HS256, 30)
            .issue(Actor(7))
            .unwrap();
        assert!(verifier().verify(&token).is_err());
    }

    #[test]
    fn test_algorithm_mismatch_is_rejected() {
        let token = TokenIssuer::new(SECRET, Algorithm::HS512, 30)
            .issue(Actor(7))
            .unwrap();
        assert!(verifier().verify(&token).is_err());
        assert!(TokenVerifier::new(SECRET, Algorithm::HS512).verify(&token).is_ok());
    }

    #[test]
    fn test_subject_must_be_positive_integer() {
        let exp = (Utc::now() + Duration::minutes(5)).timestamp();
        for sub in ["alice", "0", "-4", ""] {
            let token = sign(&Claims {
                sub: sub.to_string(),
                exp,
                iat: 0,
            });
            assert!(
                matches!(verifier().verify(&token), Err(BoardError::Unauthorized(_))),
                "sub {:?} should be rejected",
                sub
            );
        }
    }

    #[test]
    fn test_token_without_exp_is_rejected() {
        #[derive(Serialize)]
        struct NoExp {
            sub: String,
        }
        let token = encode(
            &Header::new(Algorithm::HS256),
            &NoExp { sub: "7".into() },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(verifier().verify(&token).is_err());
    }

    #[test]
    fn test_out_of_range_lifetime_is_error() {
        for minutes in [i64::MAX, i64::MAX / 2, 300_000_000_000] {
            let issuer = TokenIssuer::new(SECRET, Algorithm::HS256, minutes);
            assert!(issuer.issue(Actor(7)).is_err(), "{} minutes", minutes);
        }
        let far = Duration::try_days(100_000_000).unwrap();
        assert!(issuer().issue_with_ttl(Actor(7), far).is_err());
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("HS256").unwrap(), Algorithm::HS256);
        assert_eq!(parse_algorithm("HS512").unwrap(), Algorithm::HS512);
        assert!(parse_algorithm("RS256").is_err());
        assert!(parse_algorithm("none").is_err());
    }

    #[test]
    fn test_from_config_uses_configured_secret_and_ttl() {
        let config = ServiceConfig {
            secret_key: SECRET.into(),
            access_token_expire_minutes: 1,
            ..Default::default()
        };
        let token = TokenIssuer::from_config(&config)
            .unwrap()
            .issue(Actor(9))
            .unwrap();
        let verifier = TokenVerifier::from_config(&config).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), Actor(9));
    }
}
