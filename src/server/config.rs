//! Database server configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A physical database host registered with the TM server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseServerRef {
    /// Friendly name, unique within the TM server
    pub name: String,
    /// Engine-defined connection properties
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

impl DatabaseServerRef {
    /// Create a new database server reference
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: HashMap::new(),
        }
    }

    /// Add a connection property
    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

impl std::fmt::Display for DatabaseServerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_builder() {
        let server = DatabaseServerRef::new("DB01")
            .property("host", "db01.internal")
            .property("port", "1433");

        assert_eq!(server.name, "DB01");
        assert_eq!(server.properties.get("port"), Some(&"1433".to_string()));
        assert_eq!(server.to_string(), "DB01");
    }

    #[test]
    fn test_empty_properties_are_omitted() {
        let json = serde_json::to_string(&DatabaseServerRef::new("DB01")).unwrap();
        assert_eq!(json, r#"{"name":"DB01"}"#);
    }
}
