//! Stable agent identity.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Identity a worker agent presents on every (re)connect.
///
/// The id is derived once from role and endpoint, so a restarted process
/// with the same role talking to the same server is recognized as the same
/// client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Derived identifier, `<role>-<16 hex chars>`
    pub agent_id: String,
    /// Agent role, e.g. `sql_generator`
    pub role: String,
    /// Server endpoint the identity was derived against
    pub endpoint: String,
    /// Capabilities advertised to the server
    pub capabilities: Vec<String>,
}

impl AgentIdentity {
    /// Derives the identity for `role` talking to `endpoint`.
    pub fn derive(role: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let role = role.into();
        let endpoint = endpoint.into();

        let mut hasher = Sha256::new();
        hasher.update(role.as_bytes());
        hasher.update(b"\0");
        hasher.update(endpoint.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Self {
            agent_id: format!("{}-{}", role, &digest[..16]),
            role,
            endpoint,
            capabilities: Vec::new(),
        }
    }

    /// Sets the advertised capability list.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Payload of the `agent_identify` event sent after each connect.
    pub fn identification_payload(&self) -> Value {
        json!({
            "agent_id": self.agent_id,
            "role": self.role,
            "endpoint": self.endpoint,
            "capabilities": self.capabilities,
        })
    }
}
