//! Trajectory-level parameters shared by the phases of a trajectory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{TrajectoryError, TrajectoryResult};
use crate::phase::{OptionsMap, ParameterOptions, Phase};
use crate::resolve::Connection;
use crate::units::Units;

/// Bound used for design variables that were declared without one.
pub const INF_BOUND: f64 = 1.0e21;

/// How a trajectory parameter reaches one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterTarget {
    /// An existing phase parameter with a different name.
    Renamed(String),
    /// ODE inputs; the phase parameter is created during setup.
    Ode(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajParameterOptions {
    pub units: Units,
    /// `None` infers the shape from the targets.
    pub shape: Option<Vec<usize>>,
    pub val: f64,
    pub desc: String,
    pub opt: bool,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub scaler: Option<f64>,
    pub adder: Option<f64>,
    pub ref0: Option<f64>,
    #[serde(rename = "ref")]
    pub ref_: Option<f64>,
    /// Per-phase targets. `None` targets a same-named parameter in every phase. Phases absent
    /// from the map are treated the same way; a `null` entry excludes the phase.
    pub targets: Option<BTreeMap<String, Option<ParameterTarget>>>,
    pub static_target: Option<bool>,
    /// Deprecated inverse of `static_target`.
    pub dynamic: Option<bool>,
}

impl Default for TrajParameterOptions {
    fn default() -> Self {
        Self {
            units: None,
            shape: None,
            val: 0.0,
            desc: String::new(),
            opt: false,
            lower: None,
            upper: None,
            scaler: None,
            adder: None,
            ref0: None,
            ref_: None,
            targets: None,
            static_target: None,
            dynamic: None,
        }
    }
}

impl TrajParameterOptions {
    /// Fold the deprecated `dynamic` flag into `static_target`.
    pub(crate) fn normalize(mut self, trajectory: &str, name: &str) -> TrajectoryResult<Self> {
        match (self.dynamic, self.static_target) {
            (Some(_), Some(_)) => {
                return Err(TrajectoryError::DeprecatedOptionConflict {
                    deprecated: "dynamic",
                    replacement: "static_target",
                    context: format!("parameter '{name}' of trajectory '{trajectory}'"),
                })
            }
            (Some(dynamic), None) => {
                log::warn!("'dynamic' has been deprecated. Use 'static_target' instead.");
                self.static_target = Some(!dynamic);
                self.dynamic = None;
            }
            _ => {}
        }
        Ok(self)
    }

    fn target_for(&self, phase: &str) -> Option<&Option<ParameterTarget>> {
        self.targets.as_ref().and_then(|t| t.get(phase))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignVar {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub scaler: Option<f64>,
    pub adder: Option<f64>,
    pub ref0: Option<f64>,
    #[serde(rename = "ref")]
    pub ref_: Option<f64>,
}

/// A trajectory parameter after its targets, shape and units have been settled.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredParameter {
    pub name: String,
    pub val: f64,
    pub shape: Vec<usize>,
    pub units: Units,
    pub targets: Vec<String>,
    pub design_var: Option<DesignVar>,
}

/// Add the phase parameters requested by ODE targets.
pub(crate) fn setup_parameters(
    parameters: &OptionsMap<TrajParameterOptions>,
    phases: &mut OptionsMap<Phase>,
) {
    for (name, options) in parameters.iter() {
        for (phase_name, phase) in phases.iter_mut() {
            if let Some(Some(ParameterTarget::Ode(targets))) = options.target_for(phase_name) {
                phase.add_parameter(
                    name,
                    ParameterOptions {
                        units: options.units.clone(),
                        shape: options.shape.clone().unwrap_or_else(|| vec![1]),
                        opt: options.opt,
                        static_target: options.static_target.unwrap_or(false),
                        targets: Some(targets.clone()),
                        val: options.val,
                        lower: options.lower,
                        upper: options.upper,
                    },
                );
            }
        }
    }
}

/// Resolve every trajectory parameter to its phase targets.
///
/// Returns the configured parameters and the connections feeding their targets.
pub(crate) fn configure_parameters(
    trajectory: &str,
    parameters: &OptionsMap<TrajParameterOptions>,
    phases: &OptionsMap<Phase>,
) -> TrajectoryResult<(Vec<ConfiguredParameter>, Vec<Connection>)> {
    let mut configured = Vec::with_capacity(parameters.len());
    let mut connections = Vec::new();

    for (name, options) in parameters.iter() {
        let mut targets = Vec::new();
        let mut shapes: Vec<&Vec<usize>> = Vec::new();
        let mut units: Vec<&Units> = Vec::new();

        for (phase_name, phase) in phases.iter() {
            let invalid = |what: String| TrajectoryError::InvalidParameterTarget {
                trajectory: trajectory.to_string(),
                name: name.to_string(),
                phase: phase_name.to_string(),
                what,
            };
            let target = match options.target_for(phase_name) {
                None => match phase.parameters.get(name) {
                    Some(_) => name,
                    None => continue,
                },
                Some(None) => continue,
                Some(Some(ParameterTarget::Renamed(renamed))) => {
                    if !phase.parameters.contains_key(renamed) {
                        return Err(invalid(format!(
                            "the target is '{renamed}' but the phase has no such parameter"
                        )));
                    }
                    renamed.as_str()
                }
                Some(Some(ParameterTarget::Ode(_))) => {
                    if !phase.parameters.contains_key(name) {
                        return Err(invalid(
                            "the phase did not add the parameter for its ODE targets".to_string(),
                        ));
                    }
                    name
                }
            };
            // Presence was checked above.
            if let Some(param) = phase.parameters.get(target) {
                shapes.push(&param.shape);
                units.push(&param.units);
            }
            targets.push(format!("{phase_name}.parameters:{target}"));
        }

        if targets.is_empty() {
            let reason = match &options.targets {
                None => format!(
                    "Option `targets=None` but no phase in the trajectory has a parameter named \
                     `{name}`."
                ),
                Some(map)
                    if map.values().all(Option::is_none)
                        && phases.keys().all(|p| map.contains_key(p)) =>
                {
                    "Option `targets` is keyed by phase name but the target for each phase is None."
                        .to_string()
                }
                Some(_) => format!("No phase has a parameter matching the targets of `{name}`."),
            };
            return Err(TrajectoryError::NoParameterTarget {
                trajectory: trajectory.to_string(),
                name: name.to_string(),
                reason,
            });
        }

        let shape = match &options.shape {
            Some(shape) => shape.clone(),
            None => {
                if shapes.windows(2).any(|w| w[0] != w[1]) {
                    return Err(TrajectoryError::ParameterShapeMismatch {
                        trajectory: trajectory.to_string(),
                        name: name.to_string(),
                    });
                }
                shapes[0].clone()
            }
        };

        let param_units = match &options.units {
            Some(u) => Some(u.clone()),
            None => {
                if units.windows(2).any(|w| w[0] != w[1]) {
                    return Err(TrajectoryError::ParameterUnitsAmbiguous {
                        trajectory: trajectory.to_string(),
                        name: name.to_string(),
                    });
                }
                units[0].clone()
            }
        };

        let design_var = options.opt.then(|| DesignVar {
            name: format!("parameters:{name}"),
            lower: options.lower.unwrap_or(-INF_BOUND),
            upper: options.upper.unwrap_or(INF_BOUND),
            scaler: options.scaler,
            adder: options.adder,
            ref0: options.ref0,
            ref_: options.ref_,
        });

        for tgt in &targets {
            connections.push(Connection::new(format!("parameter_vals:{name}"), tgt.clone(), None));
        }

        configured.push(ConfiguredParameter {
            name: name.to_string(),
            val: options.val,
            shape,
            units: param_units,
            targets,
            design_var,
        });
    }

    Ok((configured, connections))
}
