//! The `trajlink_core` crate assembles multi-phase trajectories for collocation-based
//! optimal control.
//!
//! Key components:
//! - **Grid Mapper**: block-diagonal Lagrange interpolation/differentiation operators from a
//!   phase's collocation grid onto arbitrary output nodes.
//! - **Timeseries**: per-source input slots, value and rate outputs, unit conversion and
//!   sparse partials.
//! - **Classifier**: `VarClass` and the per-class source/units/shape resolution rules.
//! - **Linkages**: declaration, wildcard expansion, resolution, and the emitted connections
//!   or constraints.

pub mod classify;
pub mod error;
pub mod grid;
pub mod lagrange;
pub mod linkage;
pub mod linkage_comp;
pub mod mapper;
pub mod parameters;
pub mod phase;
pub mod report;
pub mod resolve;
pub mod timeseries;
pub mod traits;
pub mod trajectory;
pub mod units;

pub use classify::{ResolvedVar, VarClass};
pub use error::{GridError, TimeseriesError, TrajectoryError, TrajectoryResult, UnitError};
pub use grid::{GridData, Transcription};
pub use linkage::{LinkageOptions, LinkageRegistry, LinkageSpec, Loc};
pub use mapper::GridMapping;
pub use phase::{Phase, PhaseKind};
pub use resolve::{Connection, ResolvedLinkage, SrcIndices};
pub use timeseries::TimeseriesOutputs;
pub use traits::{Communicator, PhaseQuery, SingleProcess};
pub use trajectory::{Trajectory, TrajectoryConfiguration, TrajectoryOptions};
