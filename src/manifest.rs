//! External-collaborator interface types: values the core consumes from
//! a manifest loader it does not implement, and values it emits to a
//! session persistence layer it does not implement.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The subset of an adapter manifest the core actually consumes.
/// Grounded on `debug::client::DebugAdapterConfig`'s
/// command/args/env shape; all other manifest fields (capabilities
/// advertised, configuration schema, persistence flag) are peripheral
/// and live in the manifest loader, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    pub identifier: String,
    pub executable: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// A write-only snapshot of an in-flight session, emitted at the
/// persistence boundary. No core logic reads these back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub adapter_identifier: String,
    pub configuration: serde_json::Map<String, serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SessionRecord {
    pub fn new(
        adapter_identifier: impl Into<String>,
        configuration: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            adapter_identifier: adapter_identifier.into(),
            configuration,
            timestamp: chrono::Utc::now(),
        }
    }
}
