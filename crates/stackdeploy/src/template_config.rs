//! Template configuration file parsing.
//!
//! The file format is the CloudFormation template-configuration JSON:
//!
//! ```json
//! {
//!   "Parameters": { "Env": "prod" },
//!   "Tags": { "team": "orders" },
//!   "StackPolicy": { "Statement": [] }
//! }
//! ```
//!
//! Every section is optional. Parameter and tag order follows the file.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{DeployError, DeployResult};
use crate::types::{Parameter, Tag, TemplateConfiguration};

/// Parses template configuration bytes.
pub trait ConfigParser: Send + Sync {
    /// Parse a configuration file.
    fn parse(&self, data: &[u8]) -> DeployResult<TemplateConfiguration>;
}

/// JSON template configuration parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConfigParser;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfiguration {
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    tags: Map<String, Value>,
    #[serde(default)]
    stack_policy: Option<Value>,
}

impl ConfigParser for JsonConfigParser {
    fn parse(&self, data: &[u8]) -> DeployResult<TemplateConfiguration> {
        let raw: RawConfiguration =
            serde_json::from_slice(data).map_err(|e| DeployError::ConfigParse(e.to_string()))?;

        let parameters = raw
            .parameters
            .into_iter()
            .map(|(key, value)| Ok(Parameter::new(key.clone(), scalar(&key, value)?)))
            .collect::<DeployResult<Vec<_>>>()?;

        let tags = raw
            .tags
            .into_iter()
            .map(|(key, value)| Ok(Tag::new(key.clone(), scalar(&key, value)?)))
            .collect::<DeployResult<Vec<_>>>()?;

        let stack_policy = match raw.stack_policy {
            None | Some(Value::Null) => None,
            Some(Value::String(body)) => Some(body),
            Some(policy) => Some(
                serde_json::to_string(&policy)
                    .map_err(|e| DeployError::ConfigParse(e.to_string()))?,
            ),
        };

        Ok(TemplateConfiguration {
            parameters,
            tags,
            stack_policy,
        })
    }
}

/// Values are strings on the wire; numbers and booleans are accepted as-is.
fn scalar(key: &str, value: Value) -> DeployResult<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(DeployError::ConfigParse(format!(
            "value for {key} must be a string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_configuration() {
        let json = br#"{
            "Parameters": { "Zeta": "1", "Alpha": 2, "Enabled": true },
            "Tags": { "team": "orders" },
            "StackPolicy": { "Statement": [{ "Effect": "Allow" }] }
        }"#;

        let config = JsonConfigParser.parse(json).unwrap();
        assert_eq!(
            config.parameters,
            vec![
                Parameter::new("Zeta", "1"),
                Parameter::new("Alpha", "2"),
                Parameter::new("Enabled", "true"),
            ]
        );
        assert_eq!(config.tags, vec![Tag::new("team", "orders")]);
        assert_eq!(
            config.stack_policy.as_deref(),
            Some(r#"{"Statement":[{"Effect":"Allow"}]}"#)
        );
    }

    #[test]
    fn sections_are_optional() {
        let config = JsonConfigParser.parse(b"{}").unwrap();
        assert_eq!(config, TemplateConfiguration::default());
    }

    #[test]
    fn malformed_input_is_a_parse_error() {
        let err = JsonConfigParser.parse(b"Parameters: [").unwrap_err();
        assert!(matches!(err, DeployError::ConfigParse(_)));

        let err = JsonConfigParser
            .parse(br#"{"Parameters": {"Env": ["prod"]}}"#)
            .unwrap_err();
        assert!(matches!(err, DeployError::ConfigParse(_)));
    }
}
