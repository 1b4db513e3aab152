//! Charm metadata lookup.
//!
//! Fetching charms is someone else's job; the deployer only needs two
//! facts about each one: whether it is a subordinate, and the default
//! value of each config option. A [`CharmSource`] supplies them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::deployment::Service;
use crate::error::{CharmError, CharmResult};

/// One option from a charm's config schema.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CharmOption {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub default: Option<Value>,
    pub description: Option<String>,
}

/// What the deployer knows about a resolved charm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharmInfo {
    pub url: String,
    pub subordinate: bool,
    pub series: Option<String>,
    /// Local repository the charm was found in, if any.
    pub repo: Option<PathBuf>,
    pub options: BTreeMap<String, CharmOption>,
}

impl CharmInfo {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            series: CharmRef::parse(url).series,
            ..Self::default()
        }
    }

    pub fn subordinate(mut self) -> Self {
        self.subordinate = true;
        self
    }

    pub fn with_option(mut self, key: &str, default: Option<Value>) -> Self {
        self.options.insert(
            key.to_string(),
            CharmOption {
                default,
                ..CharmOption::default()
            },
        );
        self
    }

    /// Default for `key`, or `Null` when the schema has no such option or
    /// no default.
    pub fn default_for(&self, key: &str) -> Value {
        self.options
            .get(key)
            .and_then(|o| o.default.clone())
            .unwrap_or(Value::Null)
    }

    /// Bare charm name (`cs:trusty/mysql-12` → `mysql`).
    pub fn name(&self) -> String {
        CharmRef::parse(&self.url).name
    }
}

/// Resolves charm metadata for a service.
pub trait CharmSource {
    fn resolve(&self, service: &Service, series: Option<&str>) -> CharmResult<CharmInfo>;
}

/// A pieces-of-a-charm-URL view: `[scheme:][series/]name[-revision]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharmRef {
    pub scheme: Option<String>,
    pub series: Option<String>,
    pub name: String,
}

impl CharmRef {
    pub fn parse(reference: &str) -> Self {
        let (scheme, rest) = match reference.split_once(':') {
            Some((scheme, rest)) => (Some(scheme.to_string()), rest),
            None => (None, reference),
        };
        let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let last = segments.pop().unwrap_or_default();
        let series = segments.pop().map(str::to_string);
        let name = match last.rsplit_once('-') {
            Some((base, rev)) if !base.is_empty() && rev.chars().all(|c| c.is_ascii_digit()) => base,
            _ => last,
        };
        Self {
            scheme,
            series,
            name: name.to_string(),
        }
    }
}

/// Fixed metadata keyed by charm name, for tests and rehearsals.
#[derive(Debug, Clone, Default)]
pub struct StaticCharms {
    charms: BTreeMap<String, CharmInfo>,
}

impl StaticCharms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, info: CharmInfo) -> Self {
        self.charms.insert(info.name(), info);
        self
    }
}

impl CharmSource for StaticCharms {
    fn resolve(&self, service: &Service, series: Option<&str>) -> CharmResult<CharmInfo> {
        let reference = service
            .charm
            .as_deref()
            .ok_or_else(|| CharmError::MissingCharm(service.name.clone()))?;
        let name = CharmRef::parse(reference).name;
        Ok(self.charms.get(&name).cloned().unwrap_or_else(|| {
            let mut info = CharmInfo::new(reference);
            info.series = info.series.or_else(|| series.map(str::to_string));
            info
        }))
    }
}

#[derive(Debug, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    subordinate: bool,
    series: Option<SeriesField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeriesField {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    options: Option<BTreeMap<String, CharmOption>>,
}

/// Charms laid out on disk as `<root>/<series>/<name>/`.
#[derive(Debug, Clone)]
pub struct LocalCharmRepo {
    root: PathBuf,
}

impl LocalCharmRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> CharmResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|source| CharmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text)
            .map(Some)
            .map_err(|source| CharmError::Metadata {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl CharmSource for LocalCharmRepo {
    fn resolve(&self, service: &Service, series: Option<&str>) -> CharmResult<CharmInfo> {
        let reference = service
            .charm
            .as_deref()
            .ok_or_else(|| CharmError::MissingCharm(service.name.clone()))?;
        let charm = CharmRef::parse(reference);
        let series = charm.series.clone().or_else(|| series.map(str::to_string));

        let dir = match &series {
            Some(series) => self.root.join(series).join(&charm.name),
            None => self.root.join(&charm.name),
        };
        let Some(metadata) = Self::read_yaml::<MetadataFile>(&dir.join("metadata.yaml"))? else {
            warn!(service = %service.name, charm = %reference, path = ?dir, "charm not in local repository, assuming defaults");
            let mut info = CharmInfo::new(reference);
            info.series = series;
            return Ok(info);
        };
        let config: ConfigFile = Self::read_yaml(&dir.join("config.yaml"))?.unwrap_or_default();

        let series = series.or(match metadata.series {
            Some(SeriesField::One(s)) => Some(s),
            Some(SeriesField::Many(list)) => list.into_iter().next(),
            None => None,
        });
        let url = match &series {
            Some(s) => format!("local:{s}/{}", charm.name),
            None => format!("local:{}", charm.name),
        };
        Ok(CharmInfo {
            url,
            subordinate: metadata.subordinate,
            series,
            repo: Some(self.root.clone()),
            options: config.options.unwrap_or_default(),
        })
    }
}
