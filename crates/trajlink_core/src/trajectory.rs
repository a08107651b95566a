//! Multi-phase trajectories: declaration of phases, parameters and linkages, and the
//! configuration pass that turns them into wiring.
//!
//! Configuration runs in two ordered stages. The setup stage only touches declared data: it
//! validates phase names and adjusts phase options implied by connected linkages. The resolve
//! stage queries the phases to classify and resolve every linkage, and emits connections and
//! constraints.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{TrajectoryError, TrajectoryResult};
use crate::linkage::{LinkageOptions, LinkageRegistry, LinkageSpec, Loc, WILDCARD};
use crate::linkage_comp::LinkageComp;
use crate::parameters::{
    configure_parameters, setup_parameters, ConfiguredParameter, DesignVar, TrajParameterOptions,
};
use crate::phase::{OptionsMap, Phase};
use crate::report::{constraint_report, linkage_report};
use crate::resolve::{resolve_linkage, Connection, LinkageWiring, ResolvedLinkage};
use crate::traits::{Communicator, PhaseQuery, SingleProcess};
use crate::units::Units;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryOptions {
    /// Set when the trajectory is rebuilt for simulation; reports and parameter setup are
    /// skipped.
    pub sim_mode: bool,
}

/// Everything the configuration pass produces.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryConfiguration {
    pub connections: Vec<Connection>,
    /// Present when at least one linkage is enforced by constraint.
    pub linkage_comp: Option<LinkageComp>,
    pub parameters: Vec<ConfiguredParameter>,
    pub design_vars: Vec<DesignVar>,
    pub linkages: Vec<ResolvedLinkage>,
    pub linkage_report: Option<String>,
    pub constraint_report: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    pathname: String,
    pub options: TrajectoryOptions,
    phases: OptionsMap<Phase>,
    parameter_options: OptionsMap<TrajParameterOptions>,
    linkages: LinkageRegistry,
    configured: bool,
}

impl Trajectory {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self::with_options(pathname, TrajectoryOptions::default())
    }

    pub fn with_options(pathname: impl Into<String>, options: TrajectoryOptions) -> Self {
        Self {
            pathname: pathname.into(),
            options,
            phases: OptionsMap::new(),
            parameter_options: OptionsMap::new(),
            linkages: LinkageRegistry::new(),
            configured: false,
        }
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    pub fn add_phase(&mut self, name: &str, phase: Phase) -> &mut Self {
        self.phases.insert(name, phase);
        self
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.get(name)
    }

    pub fn phase_mut(&mut self, name: &str) -> Option<&mut Phase> {
        self.phases.get_mut(name)
    }

    pub fn phases(&self) -> &OptionsMap<Phase> {
        &self.phases
    }

    pub fn parameter_options(&self) -> &OptionsMap<TrajParameterOptions> {
        &self.parameter_options
    }

    pub fn linkages(&self) -> &LinkageRegistry {
        &self.linkages
    }

    /// Declare a trajectory parameter. Names must be unique within the trajectory.
    pub fn add_parameter(
        &mut self,
        name: &str,
        options: TrajParameterOptions,
    ) -> TrajectoryResult<()> {
        if self.parameter_options.contains_key(name) {
            return Err(TrajectoryError::DuplicateParameter {
                trajectory: self.pathname.clone(),
                name: name.to_string(),
            });
        }
        let options = options.normalize(&self.pathname, name)?;
        self.parameter_options.insert(name, options);
        Ok(())
    }

    /// Replace the options of an existing trajectory parameter.
    pub fn set_parameter_options(
        &mut self,
        name: &str,
        options: TrajParameterOptions,
    ) -> TrajectoryResult<()> {
        if !self.parameter_options.contains_key(name) {
            return Err(TrajectoryError::UnknownParameter {
                trajectory: self.pathname.clone(),
                name: name.to_string(),
            });
        }
        let options = options.normalize(&self.pathname, name)?;
        self.parameter_options.insert(name, options);
        Ok(())
    }

    /// Declare that `mult_a * var_a[loc_a] + mult_b * var_b[loc_b]` is to be constrained, or
    /// with `connected`, that `var_b` is fed directly from `var_a`.
    ///
    /// Declaring the same phase and variable pair again replaces the earlier declaration.
    pub fn add_linkage_constraint(
        &mut self,
        phase_a: &str,
        phase_b: &str,
        var_a: &str,
        var_b: &str,
        options: LinkageOptions,
    ) -> TrajectoryResult<()> {
        let spec = LinkageSpec::declare(&self.pathname, phase_a, phase_b, var_a, var_b, options)?;
        self.linkages.insert(spec);
        Ok(())
    }

    /// Link each consecutive pair of `phases` in every variable of `vars` (time and all
    /// states when empty).
    ///
    /// `locs` holds either nothing (final to initial), one location pair used for every phase
    /// pair, or one location pair per phase pair. Locations in `options` are ignored.
    pub fn link_phases(
        &mut self,
        phases: &[&str],
        vars: &[&str],
        locs: &[(Loc, Loc)],
        options: LinkageOptions,
    ) -> TrajectoryResult<()> {
        let num_links = phases.len().saturating_sub(1);
        if num_links == 0 {
            return Err(TrajectoryError::InvalidLinkSequence {
                trajectory: self.pathname.clone(),
                what: "a phase sequence must consist of at least two phases".to_string(),
            });
        }

        let locs: Vec<(Loc, Loc)> = match locs.len() {
            0 => vec![(Loc::Final, Loc::Initial); num_links],
            1 => vec![locs[0]; num_links],
            n if n == num_links => locs.to_vec(),
            n => {
                return Err(TrajectoryError::InvalidLinkSequence {
                    trajectory: self.pathname.clone(),
                    what: format!(
                        "the number of location pairs, if provided, must be one or one less than \
                         the number of phases. There are {num_links} phase pairs but {n} location \
                         pairs were given."
                    ),
                })
            }
        };
        let vars: &[&str] = if vars.is_empty() { &[WILDCARD] } else { vars };

        for (pair, (loc_a, loc_b)) in phases.windows(2).zip(locs) {
            for var in vars {
                let options = LinkageOptions {
                    loc_a,
                    loc_b,
                    ..options.clone()
                };
                self.add_linkage_constraint(pair[0], pair[1], var, var, options)?;
            }
        }
        Ok(())
    }

    pub fn configure(&mut self) -> TrajectoryResult<TrajectoryConfiguration> {
        self.configure_with_comm(&SingleProcess)
    }

    /// Run the setup and resolve stages.
    ///
    /// Phase metadata is reconciled across ranks with `comm` before linkages are resolved.
    /// Reports are only produced on rank 0.
    pub fn configure_with_comm<C: Communicator>(
        &mut self,
        comm: &C,
    ) -> TrajectoryResult<TrajectoryConfiguration> {
        if self.configured {
            return Err(TrajectoryError::AlreadyConfigured {
                trajectory: self.pathname.clone(),
            });
        }

        // Setup stage.
        self.check_linkage_phases()?;
        if !self.options.sim_mode {
            setup_parameters(&self.parameter_options, &mut self.phases);
        }
        self.setup_linkages()?;

        // Resolve stage.
        let mut config = TrajectoryConfiguration::default();
        if !self.parameter_options.is_empty() {
            let (parameters, connections) =
                configure_parameters(&self.pathname, &self.parameter_options, &self.phases)?;
            config.design_vars = parameters
                .iter()
                .filter_map(|p| p.design_var.clone())
                .collect();
            config.parameters = parameters;
            config.connections = connections;
        }

        if !self.linkages.is_empty() {
            if comm.size() > 1 {
                self.reconcile_metadata(comm)?;
            }
            self.expand_wildcards();

            let mut wiring = LinkageWiring::new();
            for spec in self.linkages.iter() {
                let phase_a = self.existing_phase(&spec.phase_a)?;
                let phase_b = self.existing_phase(&spec.phase_b)?;
                let linkage = resolve_linkage(&self.pathname, spec, phase_a, phase_b)?;
                wiring.emit(&self.pathname, &linkage)?;
                config.linkages.push(linkage);
            }
            config.connections.extend(wiring.connections);
            if !wiring.linkage_comp.is_empty() {
                config.linkage_comp = Some(wiring.linkage_comp);
            }
        }

        if !self.options.sim_mode && comm.rank() == 0 {
            if !self.linkages.is_empty() {
                let report = linkage_report(&self.pathname, &config.linkages);
                report.lines().for_each(|line| info!("{line}"));
                config.linkage_report = Some(report);
            }
            let report = constraint_report(&self.pathname, &self.phases);
            report.lines().for_each(|line| info!("{line}"));
            config.constraint_report = Some(report);
        }

        self.configured = true;
        Ok(config)
    }

    fn existing_phase(&self, name: &str) -> TrajectoryResult<&Phase> {
        self.phases
            .get(name)
            .ok_or_else(|| TrajectoryError::MissingPhase {
                trajectory: self.pathname.clone(),
                phase: name.to_string(),
            })
    }

    fn check_linkage_phases(&self) -> TrajectoryResult<()> {
        for name in self.linkages.phase_names() {
            self.existing_phase(name)?;
        }
        Ok(())
    }

    /// Adjust the options of the receiving phase of every connected linkage: a connected
    /// value becomes an input of that phase.
    fn setup_linkages(&mut self) -> TrajectoryResult<()> {
        for spec in self.linkages.iter().filter(|s| s.connected) {
            let Some(phase_b) = self.phases.get_mut(&spec.phase_b) else {
                return Err(TrajectoryError::MissingPhase {
                    trajectory: self.pathname.clone(),
                    phase: spec.phase_b.clone(),
                });
            };
            let analytic_error = || TrajectoryError::AnalyticPhaseConnection {
                trajectory: self.pathname.clone(),
                phase_a: spec.phase_a.clone(),
                var_a: spec.var_a.clone(),
                phase_b: spec.phase_b.clone(),
                var_b: spec.var_b.clone(),
            };

            let var_b = spec.var_b.as_str();
            if var_b == WILDCARD || var_b == phase_b.time.name {
                phase_b.time.input_initial = true;
                phase_b.time.fix_initial = false;
            }
            if var_b == WILDCARD {
                if phase_b.is_analytic() && !phase_b.states.is_empty() {
                    return Err(analytic_error());
                }
                for (_, state) in phase_b.states.iter_mut() {
                    state.input_initial = true;
                }
            } else if var_b != phase_b.time.name {
                if phase_b.states.contains_key(var_b) {
                    if phase_b.is_analytic() {
                        return Err(analytic_error());
                    }
                    if let Some(state) = phase_b.states.get_mut(var_b) {
                        state.input_initial = true;
                        state.fix_initial = false;
                    }
                } else if let Some(param) = phase_b.parameters.get_mut(var_b) {
                    param.opt = false;
                }
            }
        }
        Ok(())
    }

    /// Replace `('*', '*')` linkages with time and every state of the receiving phase.
    fn expand_wildcards(&mut self) {
        let phases = &self.phases;
        self.linkages.expand_wildcards(|spec| {
            let (Some(phase_a), Some(phase_b)) =
                (phases.get(&spec.phase_a), phases.get(&spec.phase_b))
            else {
                return Vec::new();
            };
            let mut vars = vec![(phase_a.time.name.clone(), phase_b.time.name.clone())];
            vars.extend(phase_b.states.keys().map(|s| (s.to_string(), s.to_string())));
            debug!(
                "expanded wildcard linkage {} - {} into {} linkages",
                spec.phase_a,
                spec.phase_b,
                vars.len()
            );
            vars
        });
    }

    /// Adopt, for every phase variable, the shape and units reported by a rank that owns
    /// the phase.
    fn reconcile_metadata<C: Communicator>(&mut self, comm: &C) -> TrajectoryResult<()> {
        let trajectory = &self.pathname;
        for (phase_name, phase) in self.phases.iter_mut() {
            let local = phase.is_local;
            let sync = |var: &str, units: &mut Units, shape: &mut Vec<usize>| {
                let gathered = comm.allgather((local, shape.clone(), units.clone()));
                let (_, owner_shape, owner_units) = gathered
                    .into_iter()
                    .find(|(is_local, _, _)| *is_local)
                    .ok_or_else(|| TrajectoryError::MetadataUnavailable {
                        trajectory: trajectory.clone(),
                        phase: phase_name.to_string(),
                        var: var.to_string(),
                    })?;
                *shape = owner_shape;
                *units = owner_units;
                Ok::<(), TrajectoryError>(())
            };

            let mut time_shape = vec![1];
            let time_name = phase.time.name.clone();
            sync(&time_name, &mut phase.time.units, &mut time_shape)?;
            for (name, opts) in phase.states.iter_mut() {
                sync(name, &mut opts.units, &mut opts.shape)?;
            }
            for (name, opts) in phase.controls.iter_mut() {
                sync(name, &mut opts.units, &mut opts.shape)?;
            }
            for (name, opts) in phase.polynomial_controls.iter_mut() {
                sync(name, &mut opts.units, &mut opts.shape)?;
            }
            for (name, opts) in phase.parameters.iter_mut() {
                sync(name, &mut opts.units, &mut opts.shape)?;
            }
        }
        Ok(())
    }
}
