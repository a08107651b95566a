//! Phase configuration records and a concrete [`Phase`] implementing [`PhaseQuery`].

use std::collections::HashMap;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::TimeseriesError;
use crate::grid::GridData;
use crate::linkage::Loc;
use crate::timeseries::TimeseriesOutputs;
use crate::traits::PhaseQuery;
use crate::units::{rate_units, Units};

fn scalar_shape() -> Vec<usize> {
    vec![1]
}

fn default_true() -> bool {
    true
}

/// Insertion-ordered map from variable name to its options record.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionsMap<T> {
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> Default for OptionsMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> OptionsMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`. A replaced entry keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: T) -> Option<T> {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.index.get(name).map(|&i| &mut self.entries[i].1)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> FromIterator<(String, T)> for OptionsMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeOptions {
    pub name: String,
    pub units: Units,
    pub fix_initial: bool,
    pub fix_duration: bool,
    /// Initial time is supplied from outside the phase (e.g. a connected linkage).
    pub input_initial: bool,
    pub input_duration: bool,
}

impl Default for TimeOptions {
    fn default() -> Self {
        Self {
            name: "time".to_string(),
            units: Some("s".to_string()),
            fix_initial: false,
            fix_duration: false,
            input_initial: false,
            input_duration: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateOptions {
    pub units: Units,
    pub shape: Vec<usize>,
    pub fix_initial: bool,
    pub fix_final: bool,
    pub input_initial: bool,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            units: None,
            shape: scalar_shape(),
            fix_initial: false,
            fix_final: false,
            input_initial: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlOptions {
    pub units: Units,
    pub shape: Vec<usize>,
    /// Whether the control is a design variable (`indep`) or fed from outside (`input`).
    #[serde(default = "default_true")]
    pub opt: bool,
    pub fix_initial: bool,
    pub fix_final: bool,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            units: None,
            shape: scalar_shape(),
            opt: true,
            fix_initial: false,
            fix_final: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolynomialControlOptions {
    pub units: Units,
    pub shape: Vec<usize>,
    pub order: usize,
    #[serde(default = "default_true")]
    pub opt: bool,
    pub fix_initial: bool,
    pub fix_final: bool,
}

impl Default for PolynomialControlOptions {
    fn default() -> Self {
        Self {
            units: None,
            shape: scalar_shape(),
            order: 3,
            opt: true,
            fix_initial: false,
            fix_final: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterOptions {
    pub units: Units,
    pub shape: Vec<usize>,
    #[serde(default = "default_true")]
    pub opt: bool,
    pub static_target: bool,
    /// ODE inputs fed by this parameter; `None` means an input of the same name.
    pub targets: Option<Vec<String>>,
    pub val: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Default for ParameterOptions {
    fn default() -> Self {
        Self {
            units: None,
            shape: scalar_shape(),
            opt: true,
            static_target: false,
            targets: None,
            val: 0.0,
            lower: None,
            upper: None,
        }
    }
}

/// Declared metadata of an ODE output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdeOutputMeta {
    pub units: Units,
    pub shape: Vec<usize>,
}

impl Default for OdeOutputMeta {
    fn default() -> Self {
        Self {
            units: None,
            shape: scalar_shape(),
        }
    }
}

/// A boundary or path constraint declared on a phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConstraint {
    pub name: String,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub equals: Option<f64>,
    /// Overrides the constrained variable's own units in reports.
    pub units: Units,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    #[default]
    Pseudospectral,
    /// Phases whose states are evaluated in closed form; they cannot accept an injected
    /// initial state.
    Analytic,
}

#[derive(Debug, Clone)]
pub struct Phase {
    pub kind: PhaseKind,
    pub time: TimeOptions,
    pub states: OptionsMap<StateOptions>,
    pub controls: OptionsMap<ControlOptions>,
    pub polynomial_controls: OptionsMap<PolynomialControlOptions>,
    pub parameters: OptionsMap<ParameterOptions>,
    pub rhs_source: String,
    pub ode_outputs: OptionsMap<OdeOutputMeta>,
    /// Whether this process owns the phase.
    pub is_local: bool,
    pub initial_constraints: Vec<PhaseConstraint>,
    pub final_constraints: Vec<PhaseConstraint>,
    pub path_constraints: Vec<PhaseConstraint>,
}

impl Default for Phase {
    fn default() -> Self {
        Self::new(PhaseKind::Pseudospectral)
    }
}

impl Phase {
    pub fn new(kind: PhaseKind) -> Self {
        Self {
            kind,
            time: TimeOptions::default(),
            states: OptionsMap::new(),
            controls: OptionsMap::new(),
            polynomial_controls: OptionsMap::new(),
            parameters: OptionsMap::new(),
            rhs_source: "rhs_all".to_string(),
            ode_outputs: OptionsMap::new(),
            is_local: true,
            initial_constraints: Vec::new(),
            final_constraints: Vec::new(),
            path_constraints: Vec::new(),
        }
    }

    pub fn set_time_options(&mut self, options: TimeOptions) -> &mut Self {
        self.time = options;
        self
    }

    pub fn add_state(&mut self, name: &str, options: StateOptions) -> &mut Self {
        self.states.insert(name, options);
        self
    }

    pub fn add_control(&mut self, name: &str, options: ControlOptions) -> &mut Self {
        self.controls.insert(name, options);
        self
    }

    pub fn add_polynomial_control(
        &mut self,
        name: &str,
        options: PolynomialControlOptions,
    ) -> &mut Self {
        self.polynomial_controls.insert(name, options);
        self
    }

    pub fn add_parameter(&mut self, name: &str, options: ParameterOptions) -> &mut Self {
        self.parameters.insert(name, options);
        self
    }

    pub fn add_ode_output(&mut self, name: &str, meta: OdeOutputMeta) -> &mut Self {
        self.ode_outputs.insert(name, meta);
        self
    }

    pub fn add_boundary_constraint(&mut self, loc: Loc, constraint: PhaseConstraint) -> &mut Self {
        match loc {
            Loc::Initial => self.initial_constraints.push(constraint),
            Loc::Final => self.final_constraints.push(constraint),
        }
        self
    }

    pub fn add_path_constraint(&mut self, constraint: PhaseConstraint) -> &mut Self {
        self.path_constraints.push(constraint);
        self
    }

    pub fn has_constraints(&self) -> bool {
        !(self.initial_constraints.is_empty()
            && self.final_constraints.is_empty()
            && self.path_constraints.is_empty())
    }

    /// Register the phase's standard timeseries outputs, resampled from `input_grid` onto
    /// `output_grid` (or the input grid itself).
    pub fn timeseries_outputs(
        &self,
        input_grid: &GridData,
        output_grid: Option<&GridData>,
        subset: &str,
    ) -> Result<TimeseriesOutputs, TimeseriesError> {
        let time_units = self.time.units.as_deref();
        let mut ts =
            TimeseriesOutputs::from_grids(input_grid, output_grid, subset, self.time.units.clone())?;

        let time_name = &self.time.name;
        ts.add_output(time_name, time_units, &[1], "time", time_name, false)?;
        let time_phase = format!("{time_name}_phase");
        ts.add_output(&time_phase, time_units, &[1], "elapsed time of the phase", &time_phase, false)?;

        for (name, opts) in self.states.iter() {
            let path = format!("states:{name}");
            ts.add_output(&path, opts.units.as_deref(), &opts.shape, "state value", &path, false)?;
        }

        for (name, opts) in self.controls.iter() {
            self.add_control_outputs(&mut ts, "controls", "control_rates", name, opts.units.as_deref(), &opts.shape)?;
        }

        for (name, opts) in self.polynomial_controls.iter() {
            self.add_control_outputs(
                &mut ts,
                "polynomial_controls",
                "polynomial_control_rates",
                name,
                opts.units.as_deref(),
                &opts.shape,
            )?;
        }

        Ok(ts)
    }

    fn add_control_outputs(
        &self,
        ts: &mut TimeseriesOutputs,
        value_prefix: &str,
        rate_prefix: &str,
        name: &str,
        units: Option<&str>,
        shape: &[usize],
    ) -> Result<(), TimeseriesError> {
        let time_units = self.time.units.as_deref();
        let src = format!("{value_prefix}:{name}");
        ts.add_output(&src, units, shape, "control value", &src, false)?;

        // The first rate is differentiated from the control's own slot.
        let rate = format!("{rate_prefix}:{name}_rate");
        let units_rate = rate_units(units, time_units, 1);
        ts.add_output(&rate, units_rate.as_deref(), shape, "first time-derivative", &src, true)?;

        let rate2 = format!("{rate_prefix}:{name}_rate2");
        let units_rate2 = rate_units(units, time_units, 2);
        ts.add_output(&rate2, units_rate2.as_deref(), shape, "second time-derivative", &rate2, false)?;
        Ok(())
    }
}

/// Strip a `_rate` or `_rate2` suffix.
pub(crate) fn rate_base(name: &str) -> &str {
    name.strip_suffix("_rate2")
        .or_else(|| name.strip_suffix("_rate"))
        .unwrap_or(name)
}

fn boundary_fixed(opt: bool, fix_initial: bool, fix_final: bool, loc: Loc) -> bool {
    !opt || match loc {
        Loc::Initial => fix_initial,
        Loc::Final => fix_final,
    }
}

impl PhaseQuery for Phase {
    fn time_options(&self) -> &TimeOptions {
        &self.time
    }

    fn state_options(&self) -> &OptionsMap<StateOptions> {
        &self.states
    }

    fn control_options(&self) -> &OptionsMap<ControlOptions> {
        &self.controls
    }

    fn polynomial_control_options(&self) -> &OptionsMap<PolynomialControlOptions> {
        &self.polynomial_controls
    }

    fn parameter_options(&self) -> &OptionsMap<ParameterOptions> {
        &self.parameters
    }

    fn is_analytic(&self) -> bool {
        self.kind == PhaseKind::Analytic
    }

    fn rhs_source(&self) -> &str {
        &self.rhs_source
    }

    fn ode_output_meta(&self, name: &str) -> anyhow::Result<OdeOutputMeta> {
        self.ode_outputs
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("'{}' is not an output of '{}'", name, self.rhs_source))
    }

    fn is_time_fixed(&self, loc: Loc) -> bool {
        let initial_fixed = self.time.fix_initial || self.time.input_initial;
        match loc {
            Loc::Initial => initial_fixed,
            Loc::Final => {
                initial_fixed && (self.time.fix_duration || self.time.input_duration)
            }
        }
    }

    fn is_state_fixed(&self, name: &str, loc: Loc) -> bool {
        self.states.get(name).is_some_and(|s| match loc {
            Loc::Initial => s.fix_initial || s.input_initial,
            Loc::Final => s.fix_final,
        })
    }

    fn is_control_fixed(&self, name: &str, loc: Loc) -> bool {
        self.controls
            .get(name)
            .is_some_and(|c| boundary_fixed(c.opt, c.fix_initial, c.fix_final, loc))
    }

    fn is_polynomial_control_fixed(&self, name: &str, loc: Loc) -> bool {
        self.polynomial_controls
            .get(name)
            .is_some_and(|c| boundary_fixed(c.opt, c.fix_initial, c.fix_final, loc))
    }

    fn is_control_rate_fixed(&self, name: &str, loc: Loc) -> bool {
        self.is_control_fixed(rate_base(name), loc)
    }

    fn is_polynomial_control_rate_fixed(&self, name: &str, loc: Loc) -> bool {
        self.is_polynomial_control_fixed(rate_base(name), loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Transcription;

    fn phase() -> Phase {
        let mut phase = Phase::default();
        phase
            .add_state(
                "x",
                StateOptions {
                    units: Some("m".into()),
                    fix_initial: true,
                    ..Default::default()
                },
            )
            .add_state("v", StateOptions::default())
            .add_control(
                "u",
                ControlOptions {
                    units: Some("m/s".into()),
                    shape: vec![2],
                    ..Default::default()
                },
            )
            .add_ode_output("drag", OdeOutputMeta { units: Some("N".into()), shape: vec![1] });
        phase
    }

    #[test]
    fn options_map_keeps_insertion_order_on_replace() {
        let mut map = OptionsMap::new();
        map.insert("b", 1);
        map.insert("a", 2);
        assert_eq!(map.insert("b", 3), Some(1));
        assert_eq!(map.keys().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(map.get("b"), Some(&3));
    }

    #[test]
    fn time_final_requires_fixed_start_and_duration() {
        let mut phase = phase();
        assert!(!phase.is_time_fixed(Loc::Initial));
        phase.time.input_initial = true;
        assert!(phase.is_time_fixed(Loc::Initial));
        assert!(!phase.is_time_fixed(Loc::Final));
        phase.time.fix_duration = true;
        assert!(phase.is_time_fixed(Loc::Final));
    }

    #[test]
    fn state_and_control_fixedness() {
        let mut phase = phase();
        assert!(phase.is_state_fixed("x", Loc::Initial));
        assert!(!phase.is_state_fixed("x", Loc::Final));
        assert!(!phase.is_state_fixed("missing", Loc::Initial));

        assert!(!phase.is_control_fixed("u", Loc::Final));
        phase.controls.get_mut("u").unwrap().opt = false;
        assert!(phase.is_control_fixed("u", Loc::Final));
        assert!(phase.is_control_rate_fixed("u_rate", Loc::Initial));
        assert!(phase.is_control_rate_fixed("u_rate2", Loc::Final));
    }

    #[test]
    fn missing_ode_output_is_a_lookup_error() {
        let phase = phase();
        assert_eq!(phase.ode_output_meta("drag").unwrap().units.as_deref(), Some("N"));
        let err = phase.ode_output_meta("lift").unwrap_err();
        assert!(err.to_string().contains("'lift' is not an output of 'rhs_all'"));
    }

    #[test]
    fn timeseries_outputs_share_control_slot_with_rate() {
        let phase = phase();
        let grid = GridData::new(Transcription::RadauPs, 3, 3, None).unwrap();
        let ts = phase.timeseries_outputs(&grid, None, "all").unwrap();

        let names: Vec<_> = ts.outputs().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "time",
                "time_phase",
                "states:x",
                "states:v",
                "controls:u",
                "control_rates:u_rate",
                "control_rates:u_rate2",
            ]
        );
        let rate = ts.output("control_rates:u_rate").unwrap();
        assert!(rate.is_rate);
        assert_eq!(rate.input_name, "input_values:controls:u");
        assert_eq!(rate.units.as_deref(), Some("m/s/s"));
        assert_eq!(
            ts.output("control_rates:u_rate2").unwrap().input_name,
            "input_values:control_rates:u_rate2"
        );
    }

    #[test]
    fn parameter_options_deserialize_with_defaults() {
        let opts: ParameterOptions = serde_json::from_str(r#"{"units": "kg"}"#).unwrap();
        assert!(opts.opt);
        assert_eq!(opts.shape, vec![1]);
        assert_eq!(opts.units.as_deref(), Some("kg"));
    }
}
