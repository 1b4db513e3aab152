//! What an import run did.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Bundle machine key and the live machine it maps to.
    pub machines_created: Vec<(String, String)>,
    pub services_deployed: Vec<String>,
    pub services_existing: Vec<String>,
    pub units_added: Vec<String>,
    pub relations_added: Vec<String>,
    pub exposed: Vec<String>,
    /// Resolve-and-wait rounds used.
    pub retries: u32,
    /// Placement problems that fell back to a fresh machine.
    pub warnings: Vec<String>,
}

impl ImportReport {
    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.machines_created.is_empty()
            && self.services_deployed.is_empty()
            && self.units_added.is_empty()
            && self.relations_added.is_empty()
            && self.exposed.is_empty()
    }
}
