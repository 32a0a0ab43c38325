//! Operator Identity Tool
//!
//! The one capability the remote voice agent may invoke on this client:
//! registering the operator's name. The name is persisted in the local store
//! and feeds the system directive of every later voice session.

use crate::store::LocalStore;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const REGISTER_IDENTITY_TOOL: &str = "register_user_identity";
pub const REGISTER_IDENTITY_DESCRIPTION: &str =
    "Registers the user's name into the biometric system.";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ToolError {
    #[error("Invalid tool arguments: {0}")]
    InvalidToolArgs(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// Arguments accepted by `register_user_identity`.
#[derive(Deserialize, Debug)]
pub struct RegisterIdentityArgs {
    pub name: String,
}

/// JSON parameter schema advertised to the agent for `register_user_identity`,
/// in the uppercase type vocabulary the live API expects.
pub fn register_identity_parameters() -> Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING", "description": "The name of the user." }
        },
        "required": ["name"]
    })
}

/// Builds the system directive for a voice session given the known operator.
pub fn system_directive(identity: Option<&str>) -> String {
    let user = identity
        .filter(|name| !name.trim().is_empty())
        .unwrap_or("UNIDENTIFIED");
    format!(
        "SYSTEM: BIOMETRIC VOICE INTERFACE. User: {user}. \
         If the user is unidentified, ask for their name to calibrate and register it with the \
         {REGISTER_IDENTITY_TOOL} tool. Once the name is known, greet them by name in technical \
         Hinglish, for example: \"Swaagat hai {user}, scans ready hain.\" Always sound high-tech."
    )
}

/// Executes identity tool calls against the local store.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<LocalStore>,
}

impl IdentityService {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// The currently registered operator, if any.
    pub fn current(&self) -> Option<String> {
        self.store.user_name()
    }

    /// Routes a tool call by name. Only `register_user_identity` exists.
    pub fn call(&self, name: &str, args: &Value) -> Result<String, ToolError> {
        match name {
            REGISTER_IDENTITY_TOOL => self.register_user_identity(args),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Overwrites the persisted identity and returns the acknowledgment text.
    pub fn register_user_identity(&self, args: &Value) -> Result<String, ToolError> {
        info!(?args, "Executing tool 'register_user_identity'");
        let args: RegisterIdentityArgs = serde_json::from_value(args.clone())
            .map_err(|e| ToolError::InvalidToolArgs(e.to_string()))?;
        let name = args.name.trim();
        if name.is_empty() {
            return Err(ToolError::InvalidToolArgs(
                "`name` must not be empty".to_string(),
            ));
        }

        if let Err(e) = self.store.set_user_name(name) {
            // The in-memory identity is already updated; only durability is lost.
            warn!(error = %e, "Failed to persist registered identity");
        }
        info!(name, "Operator identity registered");
        Ok(format!("IDENTITY REGISTERED: USER {}", name.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn service() -> (TempDir, IdentityService) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("state.json")));
        (dir, IdentityService::new(store))
    }

    #[test]
    fn test_register_persists_and_acknowledges() {
        let (dir, service) = service();

        let ack = service
            .register_user_identity(&json!({ "name": "Asha" }))
            .unwrap();

        assert_eq!(ack, "IDENTITY REGISTERED: USER ASHA");
        assert_eq!(service.current(), Some("Asha".to_string()));
        let reopened = LocalStore::open(dir.path().join("state.json"));
        assert_eq!(reopened.user_name(), Some("Asha".to_string()));
    }

    #[test]
    fn test_register_overwrites_previous_name() {
        let (_dir, service) = service();
        service.call(REGISTER_IDENTITY_TOOL, &json!({ "name": "Asha" })).unwrap();
        service.call(REGISTER_IDENTITY_TOOL, &json!({ "name": "Ravi" })).unwrap();
        assert_eq!(service.current(), Some("Ravi".to_string()));
    }

    #[test]
    fn test_register_rejects_missing_name() {
        let (_dir, service) = service();
        let err = service.register_user_identity(&json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidToolArgs(_)));
        assert_eq!(service.current(), None);
    }

    #[test]
    fn test_register_rejects_non_string_and_blank_names() {
        let (_dir, service) = service();
        assert!(matches!(
            service.register_user_identity(&json!({ "name": 7 })),
            Err(ToolError::InvalidToolArgs(_))
        ));
        assert!(matches!(
            service.register_user_identity(&json!({ "name": "   " })),
            Err(ToolError::InvalidToolArgs(_))
        ));
    }

    #[test]
    fn test_unknown_tool() {
        let (_dir, service) = service();
        assert_eq!(
            service.call("launch_satellite", &json!({})),
            Err(ToolError::UnknownTool("launch_satellite".to_string()))
        );
    }

    #[test]
    fn test_system_directive_reflects_identity() {
        assert!(system_directive(Some("Asha")).contains("User: Asha."));
        assert!(system_directive(None).contains("User: UNIDENTIFIED."));
        assert!(system_directive(Some("  ")).contains("UNIDENTIFIED"));
    }

    #[test]
    fn test_parameters_require_name() {
        let schema = register_identity_parameters();
        assert_eq!(schema["required"][0], "name");
        assert_eq!(schema["properties"]["name"]["type"], "STRING");
    }
}
