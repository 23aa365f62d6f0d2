//! Page descriptors stored as `index.json` in container directories.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::DomainError;

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Content of one page: an optional explicit template and the content of
/// each container, keyed by container id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub containers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_inject_lib: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PageContent {
    pub fn from_json(text: &str) -> Result<Self, DomainError> {
        serde_json::from_str(text)
            .map_err(|err| DomainError::validation(format!("invalid page content: {err}")))
    }

    pub fn container(&self, id: &str) -> Option<&Value> {
        self.containers.get(id)
    }
}

/// Reference from a container to one element of a type's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerItem {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerContent {
    Empty,
    Markup(String),
    Items(Vec<ContainerItem>),
}

impl ContainerContent {
    pub fn from_value(value: Option<&Value>) -> Result<Self, DomainError> {
        match value {
            None | Some(Value::Null) => Ok(Self::Empty),
            Some(Value::String(markup)) => Ok(Self::Markup(markup.clone())),
            Some(items @ Value::Array(_)) => {
                let items = Vec::<ContainerItem>::deserialize(items)
                    .map_err(|err| DomainError::validation(format!("invalid container item: {err}")))?;
                Ok(Self::Items(items))
            }
            Some(_) => Err(DomainError::validation(
                "container content must be markup or a list of items",
            )),
        }
    }
}
