//! Relation endpoints.
//!
//! An endpoint is `service` or `service:relation`. Two endpoints are equal
//! when the service names match and either side leaves the relation name
//! unset (or `*`). That makes equality non-transitive, so these types only
//! implement `PartialEq`.

use std::fmt;

use serde::{Serialize, Serializer};

/// One side of a relation.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub service: String,
    pub relation: Option<String>,
}

impl Endpoint {
    /// Parse `service` or `service:relation`.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((service, relation)) => Self::new(service, Some(relation)),
            None => Self::new(raw, None),
        }
    }

    pub fn new(service: &str, relation: Option<&str>) -> Self {
        let relation = relation
            .map(str::trim)
            .filter(|r| !r.is_empty() && *r != "*")
            .map(str::to_string);
        Self {
            service: service.trim().to_string(),
            relation,
        }
    }

    /// True when no relation name constrains the match.
    pub fn is_wildcard(&self) -> bool {
        self.relation.is_none()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        if self.service != other.service {
            return false;
        }
        match (&self.relation, &other.relation) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}:{}", self.service, relation),
            None => f.write_str(&self.service),
        }
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An unordered pair of endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointPair(pub Endpoint, pub Endpoint);

impl EndpointPair {
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        Self(a, b)
    }

    pub fn parse(a: &str, b: &str) -> Self {
        Self(Endpoint::parse(a), Endpoint::parse(b))
    }

    /// Both service names, in declaration order.
    pub fn services(&self) -> (&str, &str) {
        (&self.0.service, &self.1.service)
    }
}

impl PartialEq for EndpointPair {
    fn eq(&self, other: &Self) -> bool {
        (self.0 == other.0 && self.1 == other.1) || (self.0 == other.1 && self.1 == other.0)
    }
}

impl fmt::Display for EndpointPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.0, self.1)
    }
}
