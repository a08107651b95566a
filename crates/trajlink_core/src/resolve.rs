//! Resolution of declared linkages against their phases, and the wiring they emit.

use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::classify::VarClass;
use crate::error::{TrajectoryError, TrajectoryResult};
use crate::linkage::{LinkageSpec, Loc};
use crate::linkage_comp::LinkageComp;
use crate::traits::PhaseQuery;
use crate::units::{display_units, Units};

/// Which nodes of the source are read by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrcIndices {
    /// Only the last node.
    Last,
    /// The first and the last node, in that order.
    FirstAndLast,
}

/// A direct data dependency between two ports of the hosting model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub src: String,
    pub tgt: String,
    /// `None` reads every value of the source.
    pub src_indices: Option<SrcIndices>,
}

impl Connection {
    pub fn new(src: impl Into<String>, tgt: impl Into<String>, src_indices: Option<SrcIndices>) -> Self {
        Self {
            src: src.into(),
            tgt: tgt.into(),
            src_indices,
        }
    }
}

/// One side of a resolved linkage.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSide {
    pub phase: String,
    pub var: String,
    pub loc: Loc,
    pub class: VarClass,
    /// Variable name with its class prefix, e.g. `states:x`.
    pub prefixed: String,
    pub source: String,
    pub units: Units,
    pub shape: Vec<usize>,
    pub fixed: bool,
}

/// A linkage whose both sides have been resolved against their phases.
///
/// Only [`resolve_linkage`] constructs these.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLinkage {
    spec: LinkageSpec,
    a: ResolvedSide,
    b: ResolvedSide,
    units: Units,
}

impl ResolvedLinkage {
    pub fn spec(&self) -> &LinkageSpec {
        &self.spec
    }

    pub fn side_a(&self) -> &ResolvedSide {
        &self.a
    }

    pub fn side_b(&self) -> &ResolvedSide {
        &self.b
    }

    /// Units in which the linkage is enforced.
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    /// Per-node shape of the linked value, taken from side b.
    pub fn shape(&self) -> &[usize] {
        &self.b.shape
    }

    pub fn connected(&self) -> bool {
        self.spec.connected
    }
}

fn resolve_side<P: PhaseQuery + ?Sized>(
    trajectory: &str,
    spec: &LinkageSpec,
    phase: &P,
    phase_name: &str,
    var: &str,
    loc: Loc,
) -> TrajectoryResult<ResolvedSide> {
    let class = phase.classify_var(var);
    let resolved =
        class
            .resolve(phase, var)
            .map_err(|source| TrajectoryError::MissingOdeVariable {
                trajectory: trajectory.to_string(),
                phase_a: spec.phase_a.clone(),
                var_a: spec.var_a.clone(),
                phase_b: spec.phase_b.clone(),
                var_b: spec.var_b.clone(),
                phase: phase_name.to_string(),
                var: var.to_string(),
                source,
            })?;
    Ok(ResolvedSide {
        phase: phase_name.to_string(),
        var: var.to_string(),
        loc,
        class,
        prefixed: class.prefixed(var),
        source: resolved.source,
        units: resolved.units,
        shape: resolved.shape,
        fixed: class.is_fixed(phase, var, loc),
    })
}

/// Resolve both sides of `spec` and validate that it can be enforced.
pub fn resolve_linkage<P: PhaseQuery + ?Sized>(
    trajectory: &str,
    spec: &LinkageSpec,
    phase_a: &P,
    phase_b: &P,
) -> TrajectoryResult<ResolvedLinkage> {
    let a = resolve_side(trajectory, spec, phase_a, &spec.phase_a, &spec.var_a, spec.loc_a)?;
    let b = resolve_side(trajectory, spec, phase_b, &spec.phase_b, &spec.var_b, spec.loc_b)?;

    if !spec.connected && spec.units.is_none() && a.units != b.units {
        return Err(TrajectoryError::AmbiguousUnits {
            trajectory: trajectory.to_string(),
            phase_a: spec.phase_a.clone(),
            var_a: spec.var_a.clone(),
            units_a: display_units(a.units.as_deref()).to_string(),
            phase_b: spec.phase_b.clone(),
            var_b: spec.var_b.clone(),
            units_b: display_units(b.units.as_deref()).to_string(),
        });
    }
    let units = spec.units.clone().or_else(|| a.units.clone());

    if !spec.connected && a.fixed && b.fixed {
        return Err(TrajectoryError::InfeasibleLinkage {
            trajectory: trajectory.to_string(),
            phase_a: spec.phase_a.clone(),
            var_a: spec.var_a.clone(),
            loc_a: spec.loc_a,
            phase_b: spec.phase_b.clone(),
            var_b: spec.var_b.clone(),
            loc_b: spec.loc_b,
        });
    }

    debug!(
        "resolved linkage {}.{} ({}) -> {}.{} ({})",
        a.phase, a.var, a.class, b.phase, b.var, b.class
    );

    Ok(ResolvedLinkage {
        spec: spec.clone(),
        a,
        b,
        units,
    })
}

/// Accumulates the wiring produced by resolved linkages.
#[derive(Debug, Default)]
pub struct LinkageWiring {
    pub connections: Vec<Connection>,
    pub linkage_comp: LinkageComp,
    connected_inputs: HashSet<String>,
}

impl LinkageWiring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a direct connection or a constraint for `linkage`.
    pub fn emit(&mut self, trajectory: &str, linkage: &ResolvedLinkage) -> TrajectoryResult<()> {
        let (a, b) = (&linkage.a, &linkage.b);
        let src = format!("{}.{}", a.phase, a.source);

        if linkage.connected() {
            let (tgt, indices) = match b.class {
                VarClass::Time => (format!("{}.t_initial", b.phase), SrcIndices::Last),
                VarClass::State => (
                    format!("{}.initial_states:{}", b.phase, b.var),
                    SrcIndices::Last,
                ),
                VarClass::Parameter => (
                    format!("{}.parameters:{}", b.phase, b.var),
                    SrcIndices::Last,
                ),
                _ => {
                    return Err(TrajectoryError::InvalidConnectionTarget {
                        trajectory: trajectory.to_string(),
                        phase_a: a.phase.clone(),
                        var_a: a.var.clone(),
                        phase_b: b.phase.clone(),
                        var_b: b.var.clone(),
                    })
                }
            };
            self.connections.push(Connection::new(src, tgt, Some(indices)));
            return Ok(());
        }

        let (input_a, input_b) = self.linkage_comp.add_linkage(linkage);
        for (input, src) in [
            (input_a, src),
            (input_b, format!("{}.{}", b.phase, b.source)),
        ] {
            if self.connected_inputs.insert(input.clone()) {
                self.connections.push(Connection::new(
                    src,
                    format!("linkages.{input}"),
                    Some(SrcIndices::FirstAndLast),
                ));
            }
        }
        Ok(())
    }
}
