use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── App types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    pub organization: Organization,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub name: String,
    pub slug: String,
}

// ── Machine types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateMachineRequest {
    pub name: String,
    pub region: String,
    pub config: MachineConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineConfig {
    pub image: String,
    pub guest: GuestConfig,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_destroy: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuestConfig {
    pub cpus: u32,
    pub cpu_kind: String,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub state: String,
    pub region: String,
    pub private_ip: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: MachineConfigView,
}

/// The parts of a machine's stored config that callers read back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MachineConfigView {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Machine {
    /// Machines being torn down still show up in listings for a while.
    pub fn is_destroyed(&self) -> bool {
        matches!(self.state.as_str(), "destroyed" | "destroying")
    }
}
