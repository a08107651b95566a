//! Classification of phase variable names and the per-class resolution rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::linkage::Loc;
use crate::phase::{
    rate_base, ControlOptions, OptionsMap, ParameterOptions, PolynomialControlOptions,
    StateOptions, TimeOptions,
};
use crate::traits::PhaseQuery;
use crate::units::{rate_units, Units};

/// The category a variable name falls into within a particular phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarClass {
    Time,
    TimePhase,
    State,
    Parameter,
    InputControl,
    IndepControl,
    ControlRate,
    ControlRate2,
    InputPolynomialControl,
    IndepPolynomialControl,
    PolynomialControlRate,
    PolynomialControlRate2,
    OdeOutput,
}

/// Where a variable's values come from, with its units and per-node shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVar {
    pub class: VarClass,
    pub source: String,
    pub units: Units,
    pub shape: Vec<usize>,
}

impl VarClass {
    /// Classify `name` given the phase's declared variables.
    ///
    /// Names that match nothing declared are assumed to be outputs of the phase's ODE.
    pub fn classify(
        name: &str,
        time: &TimeOptions,
        states: &OptionsMap<StateOptions>,
        controls: &OptionsMap<ControlOptions>,
        polynomial_controls: &OptionsMap<PolynomialControlOptions>,
        parameters: &OptionsMap<ParameterOptions>,
    ) -> Self {
        if name == time.name {
            return VarClass::Time;
        }
        if name.strip_suffix("_phase") == Some(time.name.as_str()) {
            return VarClass::TimePhase;
        }
        if states.contains_key(name) {
            return VarClass::State;
        }
        if let Some(control) = controls.get(name) {
            return if control.opt {
                VarClass::IndepControl
            } else {
                VarClass::InputControl
            };
        }
        if let Some(control) = polynomial_controls.get(name) {
            return if control.opt {
                VarClass::IndepPolynomialControl
            } else {
                VarClass::InputPolynomialControl
            };
        }
        if parameters.contains_key(name) {
            return VarClass::Parameter;
        }
        if let Some(base) = name.strip_suffix("_rate") {
            if controls.contains_key(base) {
                return VarClass::ControlRate;
            }
            if polynomial_controls.contains_key(base) {
                return VarClass::PolynomialControlRate;
            }
        }
        if let Some(base) = name.strip_suffix("_rate2") {
            if controls.contains_key(base) {
                return VarClass::ControlRate2;
            }
            if polynomial_controls.contains_key(base) {
                return VarClass::PolynomialControlRate2;
            }
        }
        VarClass::OdeOutput
    }

    /// Namespace prefix of the class as shown in linkage names and reports.
    pub fn prefix(self) -> &'static str {
        match self {
            VarClass::Time | VarClass::TimePhase | VarClass::OdeOutput => "",
            VarClass::State => "states:",
            VarClass::Parameter => "parameters:",
            VarClass::InputControl | VarClass::IndepControl => "controls:",
            VarClass::ControlRate | VarClass::ControlRate2 => "control_rates:",
            VarClass::InputPolynomialControl | VarClass::IndepPolynomialControl => {
                "polynomial_controls:"
            }
            VarClass::PolynomialControlRate | VarClass::PolynomialControlRate2 => {
                "polynomial_control_rates:"
            }
        }
    }

    pub fn prefixed(self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    /// Order of the time derivative for rate classes.
    fn derivative_order(self) -> Option<u32> {
        match self {
            VarClass::ControlRate | VarClass::PolynomialControlRate => Some(1),
            VarClass::ControlRate2 | VarClass::PolynomialControlRate2 => Some(2),
            _ => None,
        }
    }

    /// Source path, units and shape of `name` in `phase`.
    ///
    /// Fails only for ODE outputs the phase's ODE does not declare, or for names that do not
    /// belong to the class.
    pub fn resolve<P: PhaseQuery + ?Sized>(
        self,
        phase: &P,
        name: &str,
    ) -> anyhow::Result<ResolvedVar> {
        let time = phase.time_options();
        let missing = || anyhow::anyhow!("'{}' is not declared as {:?}", name, self);
        let (source, units, shape) = match self {
            VarClass::Time => (
                format!("timeseries.{}", time.name),
                time.units.clone(),
                vec![1],
            ),
            VarClass::TimePhase => (
                format!("timeseries.{}_phase", time.name),
                time.units.clone(),
                vec![1],
            ),
            VarClass::State => {
                let opts = phase.state_options().get(name).ok_or_else(missing)?;
                (
                    format!("timeseries.states:{name}"),
                    opts.units.clone(),
                    opts.shape.clone(),
                )
            }
            VarClass::InputControl | VarClass::IndepControl => {
                let opts = phase.control_options().get(name).ok_or_else(missing)?;
                (
                    format!("timeseries.controls:{name}"),
                    opts.units.clone(),
                    opts.shape.clone(),
                )
            }
            VarClass::ControlRate | VarClass::ControlRate2 => {
                let opts = phase
                    .control_options()
                    .get(rate_base(name))
                    .ok_or_else(missing)?;
                (
                    format!("timeseries.control_rates:{name}"),
                    self.rate_units(opts.units.as_deref(), time),
                    opts.shape.clone(),
                )
            }
            VarClass::InputPolynomialControl | VarClass::IndepPolynomialControl => {
                let opts = phase
                    .polynomial_control_options()
                    .get(name)
                    .ok_or_else(missing)?;
                (
                    format!("timeseries.polynomial_controls:{name}"),
                    opts.units.clone(),
                    opts.shape.clone(),
                )
            }
            VarClass::PolynomialControlRate | VarClass::PolynomialControlRate2 => {
                let opts = phase
                    .polynomial_control_options()
                    .get(rate_base(name))
                    .ok_or_else(missing)?;
                (
                    format!("timeseries.polynomial_control_rates:{name}"),
                    self.rate_units(opts.units.as_deref(), time),
                    opts.shape.clone(),
                )
            }
            VarClass::Parameter => {
                let opts = phase.parameter_options().get(name).ok_or_else(missing)?;
                (
                    format!("parameter_vals:{name}"),
                    opts.units.clone(),
                    opts.shape.clone(),
                )
            }
            VarClass::OdeOutput => {
                let meta = phase.ode_output_meta(name)?;
                (format!("{}.{name}", phase.rhs_source()), meta.units, meta.shape)
            }
        };
        Ok(ResolvedVar {
            class: self,
            source,
            units,
            shape,
        })
    }

    fn rate_units(self, units: Option<&str>, time: &TimeOptions) -> Units {
        rate_units(
            units,
            time.units.as_deref(),
            self.derivative_order().unwrap_or(1),
        )
    }

    /// Whether the optimizer has no freedom over `name` at `loc`.
    ///
    /// Classes without fixed/free bookkeeping (time since phase start, ODE outputs) are
    /// reported as free.
    pub fn is_fixed<P: PhaseQuery + ?Sized>(self, phase: &P, name: &str, loc: Loc) -> bool {
        match self {
            VarClass::Time => phase.is_time_fixed(loc),
            VarClass::State => phase.is_state_fixed(name, loc),
            VarClass::InputControl | VarClass::IndepControl => phase.is_control_fixed(name, loc),
            VarClass::InputPolynomialControl | VarClass::IndepPolynomialControl => {
                phase.is_polynomial_control_fixed(name, loc)
            }
            VarClass::ControlRate | VarClass::ControlRate2 => {
                phase.is_control_rate_fixed(name, loc)
            }
            VarClass::PolynomialControlRate | VarClass::PolynomialControlRate2 => {
                phase.is_polynomial_control_rate_fixed(name, loc)
            }
            VarClass::Parameter => phase
                .parameter_options()
                .get(name)
                .is_some_and(|p| !p.opt),
            VarClass::TimePhase | VarClass::OdeOutput => false,
        }
    }
}

impl fmt::Display for VarClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            VarClass::Time => "t",
            VarClass::TimePhase => "t_phase",
            VarClass::State => "state",
            VarClass::Parameter => "parameter",
            VarClass::InputControl => "input_control",
            VarClass::IndepControl => "indep_control",
            VarClass::ControlRate => "control_rate",
            VarClass::ControlRate2 => "control_rate2",
            VarClass::InputPolynomialControl => "input_polynomial_control",
            VarClass::IndepPolynomialControl => "indep_polynomial_control",
            VarClass::PolynomialControlRate => "polynomial_control_rate",
            VarClass::PolynomialControlRate2 => "polynomial_control_rate2",
            VarClass::OdeOutput => "ode",
        };
        f.write_str(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{OdeOutputMeta, Phase};

    fn phase() -> Phase {
        let mut phase = Phase::default();
        phase
            .add_state(
                "r",
                StateOptions {
                    units: Some("km".into()),
                    shape: vec![3],
                    ..Default::default()
                },
            )
            .add_control("theta", ControlOptions { units: Some("rad".into()), ..Default::default() })
            .add_control(
                "throttle",
                ControlOptions {
                    opt: false,
                    ..Default::default()
                },
            )
            .add_polynomial_control(
                "alpha",
                PolynomialControlOptions { units: Some("deg".into()), ..Default::default() },
            )
            .add_parameter(
                "m",
                ParameterOptions { units: Some("kg".into()), opt: false, ..Default::default() },
            )
            .add_ode_output("q", OdeOutputMeta { units: Some("Pa".into()), shape: vec![1] });
        phase
    }

    #[test]
    fn classification_table() {
        let phase = phase();
        let cases = [
            ("time", VarClass::Time),
            ("time_phase", VarClass::TimePhase),
            ("r", VarClass::State),
            ("theta", VarClass::IndepControl),
            ("throttle", VarClass::InputControl),
            ("theta_rate", VarClass::ControlRate),
            ("theta_rate2", VarClass::ControlRate2),
            ("alpha", VarClass::IndepPolynomialControl),
            ("alpha_rate", VarClass::PolynomialControlRate),
            ("alpha_rate2", VarClass::PolynomialControlRate2),
            ("m", VarClass::Parameter),
            ("q", VarClass::OdeOutput),
            ("anything_else", VarClass::OdeOutput),
        ];
        for (name, expected) in cases {
            assert_eq!(phase.classify_var(name), expected, "{name}");
        }
    }

    #[test]
    fn renamed_time_is_recognized() {
        let mut phase = phase();
        phase.time.name = "t".into();
        assert_eq!(phase.classify_var("t"), VarClass::Time);
        assert_eq!(phase.classify_var("t_phase"), VarClass::TimePhase);
        assert_eq!(phase.classify_var("time"), VarClass::OdeOutput);
    }

    #[test]
    fn resolution_rules() {
        let phase = phase();
        let r = VarClass::State.resolve(&phase, "r").unwrap();
        assert_eq!(r.source, "timeseries.states:r");
        assert_eq!(r.units.as_deref(), Some("km"));
        assert_eq!(r.shape, vec![3]);

        let t = VarClass::TimePhase.resolve(&phase, "time_phase").unwrap();
        assert_eq!(t.source, "timeseries.time_phase");
        assert_eq!(t.units.as_deref(), Some("s"));

        let rate2 = VarClass::ControlRate2.resolve(&phase, "theta_rate2").unwrap();
        assert_eq!(rate2.source, "timeseries.control_rates:theta_rate2");
        assert_eq!(rate2.units.as_deref(), Some("rad/s**2"));

        let prate = VarClass::PolynomialControlRate.resolve(&phase, "alpha_rate").unwrap();
        assert_eq!(prate.source, "timeseries.polynomial_control_rates:alpha_rate");
        assert_eq!(prate.units.as_deref(), Some("deg/s"));

        let m = VarClass::Parameter.resolve(&phase, "m").unwrap();
        assert_eq!(m.source, "parameter_vals:m");

        let q = VarClass::OdeOutput.resolve(&phase, "q").unwrap();
        assert_eq!(q.source, "rhs_all.q");
        assert_eq!(q.units.as_deref(), Some("Pa"));

        assert!(VarClass::OdeOutput.resolve(&phase, "lift").is_err());
    }

    #[test]
    fn prefixes_and_fixedness() {
        let phase = phase();
        assert_eq!(VarClass::State.prefixed("r"), "states:r");
        assert_eq!(VarClass::ControlRate.prefixed("theta_rate"), "control_rates:theta_rate");
        assert_eq!(VarClass::Time.prefixed("time"), "time");

        assert!(VarClass::Parameter.is_fixed(&phase, "m", Loc::Initial));
        assert!(VarClass::InputControl.is_fixed(&phase, "throttle", Loc::Final));
        assert!(!VarClass::IndepControl.is_fixed(&phase, "theta", Loc::Final));
        assert!(!VarClass::OdeOutput.is_fixed(&phase, "q", Loc::Final));
        assert_eq!(VarClass::TimePhase.to_string(), "t_phase");
    }
}
