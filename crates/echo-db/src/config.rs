use echo_model::MODEL_DOCUMENT;
use echo_types::LEGACY_TYPE_HOST;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Model admitted by a filter that does not name its models.
    pub default_model: String,
    /// Host assumed for protobuf type references that carry none.
    pub legacy_type_host: String,
    /// Sub-filters of a composite source take the parent's options.
    pub inherit_filter_options: bool,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            default_model: MODEL_DOCUMENT.to_string(),
            legacy_type_host: LEGACY_TYPE_HOST.to_string(),
            inherit_filter_options: true,
        }
    }
}

impl EchoConfig {
    pub fn from_toml_str(source: &str) -> DbResult<Self> {
        toml::from_str(source).map_err(|e| DbError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> DbResult<String> {
        toml::to_string(self).map_err(|e| DbError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = EchoConfig::default();
        assert_eq!(c.default_model, "dxos:model/document");
        assert_eq!(c.legacy_type_host, "dxos.org");
        assert!(c.inherit_filter_options);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EchoConfig::from_toml_str("inherit_filter_options = false\n").unwrap();
        assert!(!c.inherit_filter_options);
        assert_eq!(c.default_model, "dxos:model/document");
    }

    #[test]
    fn toml_round_trip() {
        let c = EchoConfig {
            default_model: "custom:model".into(),
            ..EchoConfig::default()
        };
        let text = c.to_toml_string().unwrap();
        assert_eq!(EchoConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(matches!(
            EchoConfig::from_toml_str("default_model = 3"),
            Err(DbError::Config(_))
        ));
    }
}
