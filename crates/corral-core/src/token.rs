use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ISSUER: &str = "corral.auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: String,
    pub role: Role,
    pub tag: String,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IssueRequest {
    pub subject_id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub tag: String,
}

impl IssueRequest {
    pub fn new(subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
            tag: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub access_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token subject must not be empty")]
    EmptySubject,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Mints and verifies bearer tokens.
///
/// Implementations do not know which kind of token a caller expects; callers
/// must check [`Claims::kind`] themselves.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, request: &IssueRequest) -> Result<Token, TokenError>;

    fn parse(&self, token: &str) -> Result<Claims, TokenError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    iss: String,
    sub: String,
    role: Role,
    #[serde(default)]
    tag: String,
    #[serde(rename = "type")]
    kind: TokenKind,
    iat: i64,
    exp: i64,
}

/// HMAC-SHA256 signed JWTs sharing one secret between access and refresh
/// tokens.
pub struct JwtTokenService {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtTokenService {
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    fn sign(
        &self,
        request: &IssueRequest,
        kind: TokenKind,
        now: i64,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| now.checked_add(secs))
            .filter(|exp| DateTime::from_timestamp(*exp, 0).is_some())
            .ok_or_else(|| TokenError::Signing(format!("{kind:?} ttl out of range")))?;
        let claims = JwtClaims {
            iss: self.issuer.clone(),
            sub: request.subject_id.clone(),
            role: request.role,
            tag: request.tag.clone(),
            kind,
            iat: now,
            exp,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        validation
    }
}

impl TokenIssuer for JwtTokenService {
    fn issue(&self, request: &IssueRequest) -> Result<Token, TokenError> {
        if request.subject_id.is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let now = Utc::now().timestamp();
        let access_token = self.sign(request, TokenKind::Access, now, self.access_ttl)?;
        let refresh_token = self.sign(request, TokenKind::Refresh, now, self.refresh_ttl)?;

        Ok(Token {
            access_token,
            refresh_token,
            access_type: "Bearer".to_string(),
        })
    }

    fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })?;
        let claims = data.claims;

        if claims.sub.is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| TokenError::Invalid("iat out of range".to_string()))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Invalid("exp out of range".to_string()))?;

        Ok(Claims {
            subject_id: claims.sub,
            role: claims.role,
            tag: claims.tag,
            kind: claims.kind,
            issued_at,
            expires_at,
        })
    }
}
