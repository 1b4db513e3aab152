//! Placement directive grammars.
//!
//! ```text
//! v3:  [container:]target[=index]      target = machine id | service | maas | zone
//! v4:  [container:](machine | service[/index] | new)
//! ```
//!
//! `maas=<host>` and `zone=<label>` are accepted by both grammars.

use std::fmt;

use deployer_core::{BundleVersion, ContainerKind};

use crate::error::DirectiveError;

/// What a directive points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementKind {
    /// An existing (or bundle-declared) machine id.
    Machine(String),
    /// A new container of the given kind on whatever `inner` resolves to.
    Container(ContainerKind, Box<PlacementKind>),
    /// Share a machine with a unit of another service.
    Colocate { service: String, unit: Option<u32> },
    /// A fresh machine (v4 only).
    New,
    Zone(String),
    Maas(String),
}

impl PlacementKind {
    /// The placement with any container wrapper removed.
    pub fn target(&self) -> &PlacementKind {
        match self {
            Self::Container(_, inner) => inner.target(),
            other => other,
        }
    }

    pub fn container(&self) -> Option<ContainerKind> {
        match self {
            Self::Container(kind, _) => Some(*kind),
            _ => None,
        }
    }

    /// Service this placement colocates with, if any.
    pub fn colocated_service(&self) -> Option<&str> {
        match self.target() {
            Self::Colocate { service, .. } => Some(service),
            _ => None,
        }
    }
}

/// A parsed directive and the text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub raw: String,
    pub kind: PlacementKind,
}

impl Directive {
    pub fn parse(raw: &str, grammar: BundleVersion) -> Result<Self, DirectiveError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(DirectiveError::Empty);
        }
        let kind = match text.split_once(':') {
            Some((container, rest)) => {
                let kind = ContainerKind::parse(container).ok_or_else(|| DirectiveError::InvalidContainer {
                    container: container.to_string(),
                })?;
                if rest.contains(':') {
                    return Err(DirectiveError::Malformed(raw.to_string()));
                }
                let inner = parse_target(rest, grammar)?;
                if matches!(inner, PlacementKind::Zone(_) | PlacementKind::Maas(_)) {
                    return Err(DirectiveError::Malformed(raw.to_string()));
                }
                PlacementKind::Container(kind, Box::new(inner))
            }
            None => parse_target(text, grammar)?,
        };
        Ok(Self {
            raw: raw.to_string(),
            kind,
        })
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_target(text: &str, grammar: BundleVersion) -> Result<PlacementKind, DirectiveError> {
    if text.is_empty() {
        return Err(DirectiveError::Empty);
    }
    if let Some(host) = text.strip_prefix("maas=") {
        return Ok(PlacementKind::Maas(host.to_string()));
    }
    if let Some(zone) = text.strip_prefix("zone=") {
        return Ok(PlacementKind::Zone(zone.to_string()));
    }
    let separator = match grammar {
        BundleVersion::V3 => '=',
        BundleVersion::V4 => '/',
    };
    let (target, unit) = match text.split_once(separator) {
        Some((target, index)) => (target, Some(parse_index(index)?)),
        None => (text, None),
    };
    if target.is_empty() {
        return Err(DirectiveError::Malformed(text.to_string()));
    }
    if grammar == BundleVersion::V4 && target == "new" && unit.is_none() {
        return Ok(PlacementKind::New);
    }
    if target.chars().all(|c| c.is_ascii_digit()) && unit.is_none() {
        return Ok(PlacementKind::Machine(target.to_string()));
    }
    Ok(PlacementKind::Colocate {
        service: target.to_string(),
        unit,
    })
}

fn parse_index(index: &str) -> Result<u32, DirectiveError> {
    index.parse().map_err(|_| DirectiveError::BadUnitIndex {
        index: index.to_string(),
    })
}
