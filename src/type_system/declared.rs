use serde_json::{Map, Value};

use super::TypeAlias;

pub(crate) const KEY_TYPES: &str = "Types";
const KEY_BASES: &str = "bases";
const KEY_ALIAS: &str = "alias";
const KEY_ALIASES: &str = "aliases";

/// One entry of a plugin's `Info.Types` document.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredType {
    pub name: String,
    pub bases: Vec<String>,
    pub aliases: Vec<TypeAlias>,
    /// The whole entry as written, `displayName` and custom keys included.
    pub metadata: Map<String, Value>,
}

impl DeclaredType {
    /// Reads every type declared in a plugin's `Info` document, in document
    /// order. Malformed fields are skipped with a debug log.
    pub fn parse_all(info: &Map<String, Value>) -> Vec<DeclaredType> {
        let Some(types) = info.get(KEY_TYPES).and_then(Value::as_object) else {
            return Vec::new();
        };
        types
            .iter()
            .map(|(name, entry)| Self::parse(name, entry))
            .collect()
    }

    fn parse(name: &str, entry: &Value) -> DeclaredType {
        let metadata = match entry {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                tracing::debug!(type_name = name, entry = %other, "Type entry is not an object");
                Map::new()
            }
        };

        let bases = string_list(metadata.get(KEY_BASES), name, KEY_BASES);

        let mut aliases = Vec::new();
        match metadata.get(KEY_ALIAS) {
            None | Some(Value::Null) => {}
            Some(Value::Object(by_base)) => {
                for (base, alias) in by_base {
                    match alias.as_str() {
                        Some(alias) => aliases.push(TypeAlias::under(base, alias)),
                        None => tracing::debug!(type_name = name, base = %base, "Ignoring non-string alias"),
                    }
                }
            }
            Some(_) => tracing::debug!(type_name = name, "Ignoring malformed 'alias' entry"),
        }
        aliases.extend(
            string_list(metadata.get(KEY_ALIASES), name, KEY_ALIASES)
                .into_iter()
                .map(TypeAlias::global),
        );

        DeclaredType {
            name: name.to_string(),
            bases,
            aliases,
            metadata,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.metadata.get("displayName").and_then(Value::as_str)
    }
}

fn string_list(value: Option<&Value>, type_name: &str, field: &str) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(single)) => vec![single.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(_) => {
            tracing::debug!(type_name, field, "Ignoring malformed list");
            Vec::new()
        }
    }
}
