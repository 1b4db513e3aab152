//! deployer-env: the boundary between the deployer and a cluster.
//!
//! Everything the orchestration engine knows about a live cluster comes
//! through the [`Environment`] trait. Raw status documents and watch
//! events are normalized here, once, so nothing downstream has to care
//! whether the controller speaks the legacy (`Services`, `AgentState`) or
//! the current (`applications`, `workload-status`) schema.
//!
//! # Components
//!
//! - **`environment`**: the async gateway trait and `DeployRequest`
//! - **`status`**: `StatusSnapshot` and the raw-status adapter
//! - **`event`**: typed watch deltas and the wire adapter
//! - **`memory`**: `MemoryEnvironment`, an in-process control plane

pub mod environment;
pub mod error;
pub mod event;
pub mod memory;
pub mod status;

pub use environment::{DeployRequest, Environment, EventStream, WATCH_BUFFER};
pub use error::{EnvError, EnvResult};
pub use event::{ChangeKind, Delta, DeltaData, EntityKind, MachineDelta, RelationDelta, UnitDelta};
pub use memory::{CONTROLLER_MACHINE, MemoryEnvironment};
pub use status::{MachineStatus, ServiceStatus, StatusSnapshot, UnitStatus, unit_number};
