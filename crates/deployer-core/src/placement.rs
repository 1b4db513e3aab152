//! Resolved placement targets.
//!
//! These are the concrete answers the placement resolver hands to the
//! cluster: an existing machine (optionally inside a new container), or a
//! provider-level hint (availability zone, MAAS host name). "Let the
//! cluster pick a fresh machine" is represented by `None` at call sites.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Container technologies a unit can be placed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Lxc,
    Lxd,
    Kvm,
}

impl ContainerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "lxc" => Some(Self::Lxc),
            "lxd" => Some(Self::Lxd),
            "kvm" => Some(Self::Kvm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lxc => "lxc",
            Self::Lxd => "lxd",
            Self::Kvm => "kvm",
        }
    }

    /// The container type actually requested from a controller of the
    /// given major version.
    ///
    /// Major version 1 has no lxd; from 2 onward `lxc` is an alias for
    /// `lxd`. Returns `None` when the controller cannot create this kind.
    pub fn for_controller(self, major: u64) -> Option<Self> {
        match (self, major) {
            (Self::Lxd, 0 | 1) => None,
            (Self::Lxc, 0 | 1) => Some(Self::Lxc),
            (Self::Lxc, _) => Some(Self::Lxd),
            (kind, _) => Some(kind),
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing machine, optionally with a new container on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinePlacement {
    pub machine: String,
    pub container: Option<ContainerKind>,
}

impl MachinePlacement {
    pub fn machine(id: impl Into<String>) -> Self {
        Self {
            machine: id.into(),
            container: None,
        }
    }

    pub fn container(kind: ContainerKind, host: impl Into<String>) -> Self {
        Self {
            machine: host.into(),
            container: Some(kind),
        }
    }
}

impl fmt::Display for MachinePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.container {
            Some(kind) => write!(f, "{}:{}", kind, self.machine),
            None => f.write_str(&self.machine),
        }
    }
}

/// Where a single unit should land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Placement {
    Machine(MachinePlacement),
    /// Provider availability zone.
    Zone { zone: String },
    /// Provider host name (MAAS node).
    Host { host: String },
}

impl Placement {
    pub fn machine(id: impl Into<String>) -> Self {
        Self::Machine(MachinePlacement::machine(id))
    }

    pub fn container(kind: ContainerKind, host: impl Into<String>) -> Self {
        Self::Machine(MachinePlacement::container(kind, host))
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine(m) => m.fmt(f),
            Self::Zone { zone } => write!(f, "zone={zone}"),
            Self::Host { host } => f.write_str(host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lxc_is_lxd_from_major_two() {
        assert_eq!(ContainerKind::Lxc.for_controller(2), Some(ContainerKind::Lxd));
        assert_eq!(ContainerKind::Lxc.for_controller(3), Some(ContainerKind::Lxd));
        assert_eq!(ContainerKind::Lxc.for_controller(1), Some(ContainerKind::Lxc));
    }

    #[test]
    fn lxd_needs_major_two() {
        assert_eq!(ContainerKind::Lxd.for_controller(1), None);
        assert_eq!(ContainerKind::Lxd.for_controller(2), Some(ContainerKind::Lxd));
        assert_eq!(ContainerKind::Kvm.for_controller(1), Some(ContainerKind::Kvm));
    }

    #[test]
    fn renders_directive_strings() {
        assert_eq!(Placement::machine("3").to_string(), "3");
        assert_eq!(Placement::container(ContainerKind::Lxd, "1").to_string(), "lxd:1");
        assert_eq!(Placement::Zone { zone: "zebra".into() }.to_string(), "zone=zebra");
        assert_eq!(Placement::Host { host: "arnolt".into() }.to_string(), "arnolt");
    }

    #[test]
    fn parses_known_kinds_only() {
        assert_eq!(ContainerKind::parse("kvm"), Some(ContainerKind::Kvm));
        assert_eq!(ContainerKind::parse("docker"), None);
    }
}
