//! Tool definitions offered to the model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::LlmError;

/// A tool the model may call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Canonical name, unique within a request.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON-Schema parameter spec (`type`, `properties`, `required`, ...).
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Reject a tool list whose canonical names are not unique.
pub fn validate_tool_names(tools: &[ToolDefinition]) -> Result<(), LlmError> {
    let mut seen = HashSet::with_capacity(tools.len());
    for tool in tools {
        if !seen.insert(tool.name.as_str()) {
            return Err(LlmError::configuration(
                "tools",
                format!("duplicate tool name `{}`", tool.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn unique_names_pass() {
        let tools = vec![
            ToolDefinition::new("a", "", json!({})),
            ToolDefinition::new("b", "", json!({})),
        ];
        assert!(validate_tool_names(&tools).is_ok());
    }

    #[test]
    fn duplicate_names_rejected() {
        let tools = vec![
            ToolDefinition::new("a", "", json!({})),
            ToolDefinition::new("a", "again", json!({})),
        ];
        assert_matches!(
            validate_tool_names(&tools),
            Err(LlmError::Configuration { field, .. }) if field == "tools"
        );
    }

    #[test]
    fn description_defaults_when_missing() {
        let t: ToolDefinition = serde_json::from_value(json!({"name": "x", "parameters": {}})).unwrap();
        assert_eq!(t.description, "");
    }
}
