//! Real-time distribution layer: an authenticated, topic-scoped push channel.
//!
//! Subscribers connect with a signed credential and a topic string. Denied
//! attempts are closed before any handshake completes and always leave an
//! access-log entry. Admitted connections are tagged with their topic and
//! receive broadcasts over a bounded channel; a full or closed subscriber is
//! simply skipped, never waited on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{authorize, verify_credential, AuthError, Credential, Topic};
use crate::feedback::SimulationMetrics;
use crate::task::TaskType;

/// Per-connection buffer. A subscriber this far behind starts losing pushes.
const CONNECTION_BUFFER: usize = 64;

/// One admission decision, appended for every connection attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub principal: String,
    pub topic: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Payload of a metrics push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPayload {
    pub agent_id: String,
    pub task_type: TaskType,
    pub generation: u32,
    pub metrics: SimulationMetrics,
    pub fitness: f64,
}

/// Wire message pushed to subscribers:
/// `{"type": "metrics", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum PushMessage {
    Metrics(MetricsPayload),
}

struct Connection {
    id: Uuid,
    topic: Topic,
    principal: String,
    tx: mpsc::Sender<PushMessage>,
}

/// Broadcast hub owning the live connection set and the access log.
pub struct Hub {
    secret: Vec<u8>,
    connections: Vec<Connection>,
    access_log: Vec<AccessLogEntry>,
}

impl Hub {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            connections: Vec::new(),
            access_log: Vec::new(),
        }
    }

    /// Admit or refuse a subscriber. On success the connection is tagged with
    /// its topic and the returned receiver delivers broadcasts; on denial the
    /// attempt is logged and no channel is ever handed out.
    pub fn connect(
        &mut self,
        credential: &Credential,
        topic: &str,
    ) -> Result<mpsc::Receiver<PushMessage>, AuthError> {
        let claims = match verify_credential(credential, &self.secret) {
            Ok(claims) => claims,
            Err(e) => {
                self.log_attempt("unauthenticated", topic, false, Some(e.to_string()));
                warn!(topic = %topic, error = %e, "subscriber refused: bad credential");
                return Err(e);
            }
        };

        let parsed = match Topic::parse(topic) {
            Ok(t) => t,
            Err(e) => {
                self.log_attempt(&claims.agent_id, topic, false, Some(e.to_string()));
                warn!(principal = %claims.agent_id, topic = %topic, "subscriber refused: bad topic");
                return Err(e);
            }
        };

        if let Err(e) = authorize(&claims, &parsed) {
            self.log_attempt(&claims.agent_id, topic, false, Some(e.to_string()));
            warn!(principal = %claims.agent_id, topic = %topic, "subscriber refused: forbidden");
            return Err(e);
        }

        self.log_attempt(&claims.agent_id, topic, true, None);
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let id = Uuid::new_v4();
        info!(
            connection_id = %id,
            principal = %claims.agent_id,
            topic = %parsed,
            "subscriber admitted"
        );
        self.connections.push(Connection {
            id,
            topic: parsed,
            principal: claims.agent_id,
            tx,
        });
        Ok(rx)
    }

    /// Send to every live connection tagged with exactly this topic, plus the
    /// admin firehose. Fire-and-forget: a full subscriber misses this message,
    /// a closed one is dropped from the set.
    pub fn broadcast(&mut self, topic: &Topic, message: &PushMessage) -> usize {
        let mut delivered = 0;
        let mut closed: Vec<Uuid> = Vec::new();

        for conn in &self.connections {
            if conn.topic != *topic && conn.topic != Topic::AdminFirehose {
                continue;
            }
            match conn.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(connection_id = %conn.id, principal = %conn.principal, "subscriber lagging, push skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(conn.id);
                }
            }
        }

        if !closed.is_empty() {
            self.connections.retain(|c| !closed.contains(&c.id));
            debug!(dropped = closed.len(), "pruned closed subscribers");
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Every admission decision, in order.
    pub fn access_log(&self) -> &[AccessLogEntry] {
        &self.access_log
    }

    fn log_attempt(&mut self, principal: &str, topic: &str, allowed: bool, reason: Option<String>) {
        self.access_log.push(AccessLogEntry {
            principal: principal.to_string(),
            topic: topic.to_string(),
            allowed,
            reason,
            ts: Utc::now(),
        });
    }
}
