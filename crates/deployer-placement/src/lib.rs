//! deployer-placement: where each unit of a bundle lands.
//!
//! Placement directives come in two grammars. v3 bundles write
//! `[container:]target[=index]` and may name arbitrary machine ids; v4
//! bundles write `[container:](machine|service[/index]|new)` and may only
//! name machines declared in the bundle. Both are parsed once into a
//! [`Directive`] and then resolved unit by unit against live status.
//!
//! # Components
//!
//! - **`directive`**: `PlacementKind` / `Directive` and the two parsers
//! - **`resolver`**: `UnitPlacement` trait, `PlacementContext`, `Resolved`
//! - **`v3`** / **`v4`**: the per-grammar resolvers (v4 owns the fill table)
//! - **`colocate`**: find the host machine of another service's unit
//! - **`ordering`**: deploy order: unplaced first, colocation targets before dependents
//! - **`validate`**: bundle-wide placement validation

pub mod colocate;
pub mod directive;
pub mod error;
pub mod ordering;
pub mod resolver;
pub mod v3;
pub mod v4;
pub mod validate;

pub use colocate::colocate;
pub use directive::{Directive, PlacementKind};
pub use error::{CycleError, DirectiveError};
pub use ordering::deploy_order;
pub use resolver::{MachinesMap, PlacementContext, Resolved, UnitPlacement, unit_placement};
pub use v3::PlacementV3;
pub use v4::{PlacementV4, container_host_key, fill_placement};
pub use validate::validate_placement;
