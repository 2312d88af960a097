//! AsyncAPI documentation for the WebSocket endpoint.
//!
//! Covers the subset of AsyncAPI 2.6.0 the server describes itself with,
//! plus the HTML page that renders it through the AsyncAPI React component.

use crate::config::DocsConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// AsyncAPI specification version emitted.
pub const ASYNCAPI_VERSION: &str = "2.6.0";

/// Root AsyncAPI document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncApi {
    pub asyncapi: String,
    pub info: Info,
    pub channels: BTreeMap<String, ChannelItem>,
}

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Operations available on one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<Operation>,
}

/// A publish or subscribe operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<OperationMessage>,
}

/// Either a single message or a `oneOf` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationMessage {
    OneOf {
        #[serde(rename = "oneOf")]
        one_of: Vec<MessageObject>,
    },
    Single(MessageObject),
}

/// A message definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AsyncApi {
    /// The document served for this server: a `hello` channel accepting
    /// `hello <name>` strings.
    #[must_use]
    pub fn generate(docs: &DocsConfig) -> Self {
        let say_hello = MessageObject {
            message_id: Some("sayHello".to_string()),
            payload: json!({"type": "string", "pattern": "^hello .+$"}),
            ..MessageObject::default()
        };

        let mut channels = BTreeMap::new();
        channels.insert(
            "hello".to_string(),
            ChannelItem {
                publish: Some(Operation {
                    message: Some(OperationMessage::Single(say_hello)),
                    ..Operation::default()
                }),
                ..ChannelItem::default()
            },
        );

        Self {
            asyncapi: ASYNCAPI_VERSION.to_string(),
            info: Info {
                title: docs.title.clone(),
                version: docs.version.clone(),
                description: docs.description.clone(),
            },
            channels,
        }
    }
}

/// HTML page rendering the schema found at `schema_url`.
#[must_use]
pub fn render_html(title: &str, schema_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>{title}</title>
  <link rel="stylesheet" href="https://unpkg.com/@asyncapi/react-component@latest/styles/default.min.css">
</head>
<body>
  <div id="asyncapi"></div>

  <script src="https://unpkg.com/@asyncapi/react-component@latest/browser/standalone/index.js"></script>
  <script>
    AsyncApiStandalone.render({{
      schema: {{
        url: '{schema_url}',
      }},
      config: {{
        show: {{
          sidebar: true,
        }}
      }},
    }}, document.getElementById('asyncapi'));
  </script>
</body>
</html>
"#
    )
}
