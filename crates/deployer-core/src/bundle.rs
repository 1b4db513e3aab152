//! Bundle document loading.
//!
//! A document is either a single v4 bundle (top-level `services` or
//! `applications`) or a map of named v3 stacks. Include tokens in option
//! values and stack inheritance are resolved before text reaches this
//! module.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::Value;

use crate::deployment::{BundleVersion, Deployment};
use crate::error::{BundleError, BundleResult};

/// Default name for a v4 bundle loaded without an explicit one.
pub const DEFAULT_BUNDLE_NAME: &str = "bundle";

/// A YAML scalar read as text: `1`, `"1"` and `true` all become strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scalar(pub String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Scalar, E> {
                Ok(Scalar(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// `to: 1` and `to: [1, lxc:2]` are both accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    Many(Vec<Scalar>),
    One(Scalar),
}

impl OneOrMany {
    pub fn into_strings(self) -> Vec<String> {
        match self {
            Self::Many(items) => items.into_iter().map(|s| s.0).collect(),
            Self::One(item) => vec![item.0],
        }
    }
}

/// One service entry as written in the bundle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSpec {
    pub charm: Option<String>,
    pub num_units: Option<u32>,
    pub to: Option<OneOrMany>,
    #[serde(rename = "force-machine")]
    pub force_machine: Option<OneOrMany>,
    pub options: Option<BTreeMap<String, Value>>,
    pub constraints: Option<Value>,
    pub storage: Option<BTreeMap<String, Value>>,
    pub resources: Option<BTreeMap<String, Value>>,
    pub bindings: Option<BTreeMap<String, Value>>,
    pub annotations: Option<BTreeMap<String, Value>>,
    pub expose: Option<bool>,
    pub series: Option<String>,
}

/// One machine entry (v4 `machines` block).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MachineSpecRaw {
    pub series: Option<String>,
    pub constraints: Option<Value>,
    pub annotations: Option<BTreeMap<String, Value>>,
}

/// Second element of a list relation: `[a, b]` or `[a, [b, c]]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelationTarget {
    Many(Vec<String>),
    One(String),
}

/// Legacy relation entry: `{weight: 100, consumes: [mysql]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRelation {
    pub weight: Option<i64>,
    #[serde(default)]
    pub consumes: Vec<String>,
}

/// The two relation layouts a bundle may use.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelationsSpec {
    List(Vec<Vec<RelationTarget>>),
    Legacy(BTreeMap<String, LegacyRelation>),
}

/// A single bundle (one v3 stack or a whole v4 document).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleSpec {
    #[serde(default, alias = "applications")]
    pub services: BTreeMap<String, ServiceSpec>,
    pub relations: Option<RelationsSpec>,
    #[serde(default)]
    pub machines: BTreeMap<Scalar, Option<MachineSpecRaw>>,
    pub series: Option<String>,
}

/// A parsed bundle file.
#[derive(Debug, Clone)]
pub enum BundleDocument {
    V3(BTreeMap<String, BundleSpec>),
    V4(BundleSpec),
}

impl BundleDocument {
    /// Parse YAML (or JSON) text.
    pub fn from_yaml(text: &str) -> BundleResult<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mapping = raw.as_mapping().ok_or(BundleError::NotAMapping)?;
        let is_v4 = mapping.contains_key("services") || mapping.contains_key("applications");
        if is_v4 {
            Ok(Self::V4(serde_yaml::from_value(raw)?))
        } else {
            Ok(Self::V3(serde_yaml::from_value(raw)?))
        }
    }

    pub fn from_path(path: &Path) -> BundleResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn version(&self) -> BundleVersion {
        match self {
            Self::V3(_) => BundleVersion::V3,
            Self::V4(_) => BundleVersion::V4,
        }
    }

    /// Names of the stacks in a v3 document (empty for v4).
    pub fn stack_names(&self) -> Vec<String> {
        match self {
            Self::V3(stacks) => stacks.keys().cloned().collect(),
            Self::V4(_) => Vec::new(),
        }
    }

    /// Build the deployment model.
    ///
    /// For v3 documents `stack` selects the named stack; it may be omitted
    /// when the document holds exactly one.
    pub fn into_deployment(self, stack: Option<&str>) -> BundleResult<Deployment> {
        match self {
            Self::V4(spec) => Deployment::from_spec(
                stack.unwrap_or(DEFAULT_BUNDLE_NAME),
                spec,
                BundleVersion::V4,
            ),
            Self::V3(mut stacks) => {
                let name = match stack {
                    Some(name) => name.to_string(),
                    None if stacks.len() == 1 => stacks.keys().next().cloned().unwrap_or_default(),
                    None => return Err(BundleError::AmbiguousStack(stacks.keys().cloned().collect())),
                };
                let spec = stacks
                    .remove(&name)
                    .ok_or_else(|| BundleError::StackNotFound(name.clone()))?;
                Deployment::from_spec(&name, spec, BundleVersion::V3)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V4: &str = r#"
series: xenial
services:
  mysql:
    charm: cs:mysql
    num_units: 1
  wordpress:
    charm: cs:wordpress
    to: [mysql]
relations:
  - [wordpress, mysql]
machines:
  1:
    series: trusty
"#;

    const V3: &str = r#"
wordpress-stage:
  series: precise
  services:
    blog:
      charm: wordpress
      to: 0
    db:
      charm: mysql
  relations:
    - [blog, db]
other:
  services: {}
"#;

    #[test]
    fn detects_v4() {
        let doc = BundleDocument::from_yaml(V4).unwrap();
        assert_eq!(doc.version(), BundleVersion::V4);
        let d = doc.into_deployment(None).unwrap();
        assert_eq!(d.name(), DEFAULT_BUNDLE_NAME);
        assert_eq!(d.service_names(), ["mysql", "wordpress"]);
        assert!(d.machines().contains_key("1"));
    }

    #[test]
    fn applications_alias() {
        let doc = BundleDocument::from_yaml("applications:\n  a:\n    charm: cs:a\n").unwrap();
        let d = doc.into_deployment(Some("x")).unwrap();
        assert_eq!(d.service_names(), ["a"]);
    }

    #[test]
    fn selects_v3_stack() {
        let doc = BundleDocument::from_yaml(V3).unwrap();
        assert_eq!(doc.version(), BundleVersion::V3);
        assert_eq!(doc.stack_names(), ["other", "wordpress-stage"]);
        let d = doc.into_deployment(Some("wordpress-stage")).unwrap();
        assert_eq!(d.series(), Some("precise"));
        assert_eq!(d.service("blog").unwrap().unit_placement, ["0"]);
    }

    #[test]
    fn v3_requires_stack_name_when_ambiguous() {
        let doc = BundleDocument::from_yaml(V3).unwrap();
        assert!(matches!(
            doc.into_deployment(None),
            Err(BundleError::AmbiguousStack(_))
        ));
    }

    #[test]
    fn v3_unknown_stack() {
        let doc = BundleDocument::from_yaml(V3).unwrap();
        assert!(matches!(
            doc.into_deployment(Some("prod")),
            Err(BundleError::StackNotFound(_))
        ));
    }

    #[test]
    fn rejects_non_mapping() {
        assert!(matches!(
            BundleDocument::from_yaml("- a\n- b\n"),
            Err(BundleError::NotAMapping)
        ));
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.yaml");
        std::fs::write(&path, V4).unwrap();
        let doc = BundleDocument::from_path(&path).unwrap();
        assert_eq!(doc.version(), BundleVersion::V4);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = BundleDocument::from_path(Path::new("/nonexistent/bundle.yaml")).unwrap_err();
        assert!(matches!(err, BundleError::Io { .. }));
    }
}
