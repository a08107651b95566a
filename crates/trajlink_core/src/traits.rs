use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

use crate::classify::VarClass;
use crate::linkage::Loc;
use crate::phase::{
    ControlOptions, OdeOutputMeta, OptionsMap, ParameterOptions, PolynomialControlOptions,
    StateOptions, TimeOptions,
};

/// A trait for types that can be used as scalars in the Lagrange operators.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// The query surface a phase exposes to the trajectory during configuration.
///
/// Option lookups return the phase's declared metadata. The `is_*_fixed` predicates report
/// whether the optimizer has any freedom over the variable at the given boundary.
pub trait PhaseQuery {
    fn time_options(&self) -> &TimeOptions;
    fn state_options(&self) -> &OptionsMap<StateOptions>;
    fn control_options(&self) -> &OptionsMap<ControlOptions>;
    fn polynomial_control_options(&self) -> &OptionsMap<PolynomialControlOptions>;
    fn parameter_options(&self) -> &OptionsMap<ParameterOptions>;

    /// True for phase types that cannot receive an injected initial state value.
    fn is_analytic(&self) -> bool {
        false
    }

    /// Path of the subsystem whose outputs are the raw ODE outputs.
    fn rhs_source(&self) -> &str;

    /// Declared units and shape of an ODE output, or an error if the ODE has no such output.
    fn ode_output_meta(&self, name: &str) -> anyhow::Result<OdeOutputMeta>;

    fn is_time_fixed(&self, loc: Loc) -> bool;
    fn is_state_fixed(&self, name: &str, loc: Loc) -> bool;
    fn is_control_fixed(&self, name: &str, loc: Loc) -> bool;
    fn is_polynomial_control_fixed(&self, name: &str, loc: Loc) -> bool;
    fn is_control_rate_fixed(&self, name: &str, loc: Loc) -> bool;
    fn is_polynomial_control_rate_fixed(&self, name: &str, loc: Loc) -> bool;

    /// Classify `name` against this phase's declared variables.
    fn classify_var(&self, name: &str) -> VarClass {
        VarClass::classify(
            name,
            self.time_options(),
            self.state_options(),
            self.control_options(),
            self.polynomial_control_options(),
            self.parameter_options(),
        )
    }
}

/// Minimal collective-communication seam used to reconcile phase metadata when phases are
/// owned by different processes.
pub trait Communicator {
    fn rank(&self) -> usize;

    /// Number of participating ranks.
    fn size(&self) -> usize;

    /// Gather one value from every rank, in rank order, on every rank.
    fn allgather<T: Clone>(&self, value: T) -> Vec<T>;
}

/// Communicator for a single process owning every phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allgather<T: Clone>(&self, value: T) -> Vec<T> {
        vec![value]
    }
}
