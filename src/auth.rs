//! Credential verification and topic authorization for the real-time layer.
//!
//! Identity arrives as a signed JWT, carried either in a session cookie or a
//! `token` query parameter for clients that cannot send cookies. A caller may
//! subscribe to its own `agent/{agentId}/metrics` topic; the `admin` role may
//! subscribe to any well-formed topic, including the admin firehose.

use jsonwebtoken::{decode, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role with access to every topic.
pub const ROLE_ADMIN: &str = "admin";

/// Errors from credential verification and topic authorization.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("expired token")]
    ExpiredToken,
    #[error("malformed topic: {0}")]
    MalformedTopic(String),
    #[error("principal {principal} may not access topic {topic}")]
    Forbidden { principal: String, topic: String },
}

/// JWT claims for real-time subscribers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub agent_id: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// Where the signed token came from. Both forms carry the same JWT and are
/// verified identically; the raw value is never trusted.
#[derive(Debug, Clone)]
pub enum Credential {
    SessionCookie(String),
    QueryToken(String),
}

impl Credential {
    pub fn token(&self) -> &str {
        match self {
            Credential::SessionCookie(t) => t,
            Credential::QueryToken(t) => t,
        }
    }
}

/// Decode and verify a credential's JWT with the given HMAC secret.
pub fn verify_credential(credential: &Credential, secret: &[u8]) -> Result<Claims, AuthError> {
    let token = credential.token();
    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);

    let token_data: TokenData<Claims> =
        decode(token, &key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

    Ok(token_data.claims)
}

/// A subscribable channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `agent/{agentId}/metrics` — one agent's live metrics stream.
    AgentMetrics(String),
    /// `admin/metrics` — every metrics push, admin-only.
    AdminFirehose,
}

impl Topic {
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let parts: Vec<&str> = raw.split('/').collect();
        match parts.as_slice() {
            ["agent", agent_id, "metrics"] if !agent_id.is_empty() => {
                Ok(Topic::AgentMetrics(agent_id.to_string()))
            }
            ["admin", "metrics"] => Ok(Topic::AdminFirehose),
            _ => Err(AuthError::MalformedTopic(raw.to_string())),
        }
    }

    /// The agent id scoping this topic, if any.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Topic::AgentMetrics(id) => Some(id),
            Topic::AdminFirehose => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::AgentMetrics(id) => write!(f, "agent/{}/metrics", id),
            Topic::AdminFirehose => f.write_str("admin/metrics"),
        }
    }
}

/// Authorization rule: the caller's identity must equal the topic's agent id,
/// or the caller holds the admin role. Everything else is denied.
pub fn authorize(claims: &Claims, topic: &Topic) -> Result<(), AuthError> {
    if claims.is_admin() {
        return Ok(());
    }
    match topic {
        Topic::AgentMetrics(agent_id) if *agent_id == claims.agent_id => Ok(()),
        _ => Err(AuthError::Forbidden {
            principal: claims.agent_id.clone(),
            topic: topic.to_string(),
        }),
    }
}
