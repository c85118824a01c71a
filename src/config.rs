//! The optional JSON configuration file of the command line tool.
//!
//! ```json
//! {
//!   "roots": ["build/classes"],
//!   "embeds": ["libs/gson.jar"],
//!   "refers": ["libs/runtime.jar"],
//!   "relocations": [{ "from": "com/google/gson", "to": "app/shaded/gson" }],
//!   "suppressions": [
//!     {
//!       "id": "UNRESOLVABLE_CLASS",
//!       "location": { "package": "app/optional" },
//!       "values": [{ "pattern": "org/slf4j/.*" }]
//!     }
//!   ],
//!   "keepRuntimeInvisibleAnnotation": false
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::diagnostic::{SuppressingDiagnostic, SuppressingLocation, SuppressingValue};
use crate::relocator::Relocator;
use crate::types::{MethodDescriptor, TypeDescriptor};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub embeds: Vec<PathBuf>,
    #[serde(default)]
    pub refers: Vec<PathBuf>,
    /// Kept as a list so a repeated prefix reaches the mapper and is rejected there.
    #[serde(default)]
    pub relocations: Vec<RelocationEntry>,
    #[serde(default)]
    pub suppressions: Vec<SuppressionEntry>,
    #[serde(default)]
    pub keep_runtime_invisible_annotation: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelocationEntry {
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuppressionEntry {
    pub id: String,
    #[serde(default)]
    pub location: Option<LocationEntry>,
    #[serde(default)]
    pub values: Vec<ValueEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationEntry {
    Package(String),
    Class(String),
    Method {
        owner: String,
        name: String,
        #[serde(default)]
        descriptor: Option<String>,
    },
    Field {
        owner: String,
        name: String,
        #[serde(default)]
        descriptor: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueEntry {
    Any,
    Int(i64),
    IntRange { min: i64, max: i64 },
    String(String),
    Pattern(String),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Config::from_json(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Compile every suppression entry, failing on the first bad descriptor or pattern.
    pub fn suppressions(&self) -> Result<Vec<SuppressingDiagnostic>> {
        self.suppressions
            .iter()
            .map(|entry| {
                entry
                    .to_suppression()
                    .with_context(|| format!("invalid suppression for {}", entry.id))
            })
            .collect()
    }

    /// Copy relocations, suppressions and flags into `relocator`. Paths are left to the caller.
    pub fn apply(&self, relocator: &mut Relocator) -> Result<()> {
        for entry in &self.relocations {
            relocator.add_relocation(&entry.from, &entry.to);
        }
        for suppression in self.suppressions()? {
            relocator.add_suppression(suppression);
        }
        if self.keep_runtime_invisible_annotation {
            relocator.keep_runtime_invisible_annotation(true);
        }
        Ok(())
    }
}

impl SuppressionEntry {
    fn to_suppression(&self) -> Result<SuppressingDiagnostic> {
        let location = self.location.as_ref().map(LocationEntry::to_location).transpose()?;
        let values = self
            .values
            .iter()
            .map(ValueEntry::to_value)
            .collect::<Result<Vec<_>>>()?;
        Ok(SuppressingDiagnostic::new(location, &self.id, values))
    }
}

impl LocationEntry {
    fn to_location(&self) -> Result<SuppressingLocation> {
        Ok(match self {
            LocationEntry::Package(name) => SuppressingLocation::in_package(name),
            LocationEntry::Class(name) => SuppressingLocation::in_class(name),
            LocationEntry::Method { owner, name, descriptor: None } => {
                SuppressingLocation::in_method(owner, name)
            }
            LocationEntry::Method { owner, name, descriptor: Some(descriptor) } => {
                SuppressingLocation::in_method_with_type(owner, name, MethodDescriptor::parse(descriptor)?)
            }
            LocationEntry::Field { owner, name, descriptor: None } => {
                SuppressingLocation::in_field(owner, name)
            }
            LocationEntry::Field { owner, name, descriptor: Some(descriptor) } => {
                SuppressingLocation::in_field_with_type(owner, name, TypeDescriptor::parse(descriptor)?)
            }
        })
    }
}

impl ValueEntry {
    fn to_value(&self) -> Result<SuppressingValue> {
        Ok(match self {
            ValueEntry::Any => SuppressingValue::Any,
            ValueEntry::Int(value) => SuppressingValue::IntValue(*value),
            ValueEntry::IntRange { min, max } => {
                if min > max {
                    anyhow::bail!("empty int range {min}..={max}");
                }
                SuppressingValue::int_range(*min, *max)
            }
            ValueEntry::String(value) => SuppressingValue::StringValue(value.clone()),
            ValueEntry::Pattern(pattern) => SuppressingValue::pattern(pattern)
                .with_context(|| format!("bad pattern '{pattern}'"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticValue;

    const SAMPLE: &str = r#"{
        "roots": ["build/classes"],
        "embeds": ["libs/gson.jar"],
        "relocations": [{ "from": "com/google/gson", "to": "app/shaded/gson" }],
        "suppressions": [
            {
                "id": "UNRESOLVABLE_CLASS",
                "location": { "package": "app.optional" },
                "values": [{ "pattern": "org/slf4j/.*" }]
            },
            {
                "id": "UNRESOLVABLE_METHOD",
                "location": { "method": { "owner": "app/Main", "name": "run", "descriptor": "()V" } },
                "values": ["any", { "intRange": { "min": 0, "max": 3 } }]
            }
        ],
        "keepRuntimeInvisibleAnnotation": true
    }"#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_json(SAMPLE).expect("parse config");

        assert_eq!(config.roots, vec![PathBuf::from("build/classes")]);
        assert_eq!(config.embeds, vec![PathBuf::from("libs/gson.jar")]);
        assert!(config.refers.is_empty());
        assert_eq!(
            config.relocations,
            vec![RelocationEntry {
                from: "com/google/gson".to_string(),
                to: "app/shaded/gson".to_string(),
            }]
        );
        assert!(config.keep_runtime_invisible_annotation);
        assert_eq!(
            config.suppressions[1].values,
            vec![ValueEntry::Any, ValueEntry::IntRange { min: 0, max: 3 }]
        );
    }

    #[test]
    fn compiles_suppressions() {
        let config = Config::from_json(SAMPLE).expect("parse config");
        let suppressions = config.suppressions().expect("compile suppressions");

        assert_eq!(
            suppressions[0].location,
            Some(SuppressingLocation::in_package("app/optional"))
        );
        assert!(suppressions[0].matches(&[DiagnosticValue::String("org/slf4j/Logger".to_string())]));
        assert!(!suppressions[0].matches(&[DiagnosticValue::String("org/other/Logger".to_string())]));
        assert_eq!(
            suppressions[1].location,
            Some(SuppressingLocation::in_method_with_type(
                "app/Main",
                "run",
                MethodDescriptor::parse("()V").expect("parse descriptor"),
            ))
        );
    }

    #[test]
    fn empty_config_is_valid() {
        let config = Config::from_json("{}").expect("parse config");

        assert!(config.roots.is_empty());
        assert!(config.suppressions().expect("compile suppressions").is_empty());
        assert!(!config.keep_runtime_invisible_annotation);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(Config::from_json(r#"{ "relocation": [] }"#).is_err());

        let bad_pattern = Config::from_json(
            r#"{ "suppressions": [{ "id": "X", "values": [{ "pattern": "(" }] }] }"#,
        )
        .expect("parse config");
        assert!(bad_pattern.suppressions().is_err());

        let bad_descriptor = Config::from_json(
            r#"{ "suppressions": [{ "id": "X", "location": { "field": { "owner": "a/B", "name": "f", "descriptor": "Q" } } }] }"#,
        )
        .expect("parse config");
        assert!(bad_descriptor.suppressions().is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("jrelocate.json");
        fs::write(&path, SAMPLE).expect("write config");

        let config = Config::load(&path).expect("load config");

        assert_eq!(config.suppressions.len(), 2);
        assert!(Config::load(&dir.path().join("missing.json")).is_err());
    }
}
