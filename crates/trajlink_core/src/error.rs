//! Error types for grid mapping, timeseries outputs and trajectory configuration.

use thiserror::Error;

use crate::linkage::Loc;

/// Errors raised while building node grids or the operators that map between them.
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid grid: {what}")]
    InvalidGrid { what: String },

    #[error("Grid has no node subset named '{subset}'")]
    UnknownSubset { subset: String },

    #[error(
        "Output nodes must be sorted by phase-relative coordinate (node {index} at {value} follows {previous})"
    )]
    UnsortedOutputNodes {
        index: usize,
        value: f64,
        previous: f64,
    },

    #[error("Failed to build Lagrange matrices for segment {segment}: {source}")]
    Lagrange {
        segment: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised while parsing or converting unit strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("Failed to parse units '{units}': {what}")]
    Parse { units: String, what: String },

    #[error("Unknown unit '{unit}' in '{units}'")]
    UnknownUnit { unit: String, units: String },

    #[error("Units '{from}' and '{to}' are not compatible")]
    Incompatible { from: String, to: String },
}

/// Errors raised by the timeseries output registry.
#[derive(Error, Debug)]
pub enum TimeseriesError {
    #[error("Timeseries input '{name}' was not provided")]
    MissingInput { name: String },

    #[error("Timeseries input '{name}' has shape {actual:?} but {expected:?} was expected")]
    InputShape {
        name: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Cannot convert timeseries output '{name}': {source}")]
    Units {
        name: String,
        #[source]
        source: UnitError,
    },

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Fatal configuration errors raised by a trajectory.
#[derive(Error, Debug)]
pub enum TrajectoryError {
    #[error("Invalid linkage.  Phase '{phase}' does not exist in trajectory '{trajectory}'.")]
    MissingPhase { trajectory: String, phase: String },

    #[error(
        "{trajectory}: Error in linking {var_a} from {phase_a} to {var_b} in {phase_b}. \
         Unable to find variable '{var}' in phase '{phase}' or its ODE."
    )]
    MissingOdeVariable {
        trajectory: String,
        phase_a: String,
        var_a: String,
        phase_b: String,
        var_b: String,
        phase: String,
        var: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "{trajectory}: Could not create connection linkage from phase `{phase_a}` variable \
         `{var_a}` to phase `{phase_b}` variable `{var_b}`. For direct connections, the target \
         variable must be `time`, a state, or a parameter in the phase. Either remove the \
         linkage or specify `connected=false` to enforce it via an optimization constraint."
    )]
    InvalidConnectionTarget {
        trajectory: String,
        phase_a: String,
        var_a: String,
        phase_b: String,
        var_b: String,
    },

    #[error(
        "{trajectory}: Phase `{phase_a}` links variable `{var_a}` to phase `{phase_b}` state \
         variable `{var_b}` by connection, but phase `{phase_b}` is an analytic phase and does \
         not support linking initial state values with option `connected=true`."
    )]
    AnalyticPhaseConnection {
        trajectory: String,
        phase_a: String,
        var_a: String,
        phase_b: String,
        var_b: String,
    },

    #[error(
        "Invalid linkage in trajectory {trajectory}: Cannot link {loc_a} value of \"{var_a}\" in \
         {phase_a} to {loc_b} value of \"{var_b}\" in {phase_b}. Values on both sides of the \
         linkage are fixed and the linkage is enforced via constraint. Either link the variables \
         via connection or make the variables design variables on at least one side of the \
         connection."
    )]
    InfeasibleLinkage {
        trajectory: String,
        phase_a: String,
        var_a: String,
        loc_a: Loc,
        phase_b: String,
        var_b: String,
        loc_b: Loc,
    },

    #[error(
        "{trajectory}: Linkage units were not specified but the units of var_a '{var_a}' \
         ({units_a}) in {phase_a} and var_b '{var_b}' ({units_b}) in {phase_b} are not the same. \
         Units for this linkage constraint must be specified explicitly."
    )]
    AmbiguousUnits {
        trajectory: String,
        phase_a: String,
        var_a: String,
        units_a: String,
        phase_b: String,
        var_b: String,
        units_b: String,
    },

    #[error(
        "Both the deprecated '{deprecated}' option and option '{replacement}' were specified \
         for {context}. Going forward, please use only option {replacement}."
    )]
    DeprecatedOptionConflict {
        deprecated: &'static str,
        replacement: &'static str,
        context: String,
    },

    #[error(
        "Attempted to add parameter \"{name}\" to trajectory '{trajectory}' but the trajectory \
         already has a parameter of that name."
    )]
    DuplicateParameter { trajectory: String, name: String },

    #[error(
        "Trajectory '{trajectory}' has no parameter named \"{name}\"."
    )]
    UnknownParameter { trajectory: String, name: String },

    #[error(
        "Invalid target for trajectory `{trajectory}` parameter `{name}` in phase `{phase}`: \
         {what}"
    )]
    InvalidParameterTarget {
        trajectory: String,
        name: String,
        phase: String,
        what: String,
    },

    #[error(
        "No target was found for trajectory `{trajectory}` parameter `{name}` in any phase. \
         {reason}"
    )]
    NoParameterTarget {
        trajectory: String,
        name: String,
        reason: String,
    },

    #[error(
        "Parameter {name} in trajectory {trajectory} is connected to targets in multiple phases \
         that have different shapes."
    )]
    ParameterShapeMismatch { trajectory: String, name: String },

    #[error(
        "Parameter {name} in trajectory {trajectory} is connected to targets in multiple phases \
         that have different units. You must explicitly provide units for the parameter since \
         they cannot be inferred."
    )]
    ParameterUnitsAmbiguous { trajectory: String, name: String },

    #[error("Invalid phase sequence in trajectory '{trajectory}': {what}")]
    InvalidLinkSequence { trajectory: String, what: String },

    #[error(
        "Trajectory '{trajectory}': no rank owns phase '{phase}', so the metadata of '{var}' \
         cannot be determined."
    )]
    MetadataUnavailable {
        trajectory: String,
        phase: String,
        var: String,
    },

    #[error("Trajectory '{trajectory}' has already been configured.")]
    AlreadyConfigured { trajectory: String },
}

pub type TrajectoryResult<T> = Result<T, TrajectoryError>;
