//! Linkage declarations and the ordered registry they are kept in until configuration.

use std::collections::HashMap;
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{TrajectoryError, TrajectoryResult};
use crate::units::Units;

/// Variable name that stands for time plus every state of the target phase.
pub const WILDCARD: &str = "*";

/// Boundary of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loc {
    Initial,
    Final,
}

impl Loc {
    /// Row of the `(first, last)` boundary-value pair holding this location.
    pub fn index(self) -> usize {
        match self {
            Loc::Initial => 0,
            Loc::Final => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Loc::Initial => "initial",
            Loc::Final => "final",
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing options of a linkage declaration. Unset fields take their defaults when the
/// declaration is turned into a [`LinkageSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkageOptions {
    pub loc_a: Loc,
    pub loc_b: Loc,
    /// Deprecated alias of `mult_a`.
    pub sign_a: Option<f64>,
    /// Deprecated alias of `mult_b`.
    pub sign_b: Option<f64>,
    pub mult_a: Option<f64>,
    pub mult_b: Option<f64>,
    pub units: Units,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub equals: Option<f64>,
    pub scaler: Option<f64>,
    pub adder: Option<f64>,
    pub ref0: Option<f64>,
    #[serde(rename = "ref")]
    pub ref_: Option<f64>,
    pub linear: bool,
    pub connected: bool,
}

impl Default for LinkageOptions {
    fn default() -> Self {
        Self {
            loc_a: Loc::Final,
            loc_b: Loc::Initial,
            sign_a: None,
            sign_b: None,
            mult_a: None,
            mult_b: None,
            units: None,
            lower: None,
            upper: None,
            equals: None,
            scaler: None,
            adder: None,
            ref0: None,
            ref_: None,
            linear: false,
            connected: false,
        }
    }
}

impl LinkageOptions {
    /// Names of the options that have no effect on a direct connection.
    fn constraint_only_options(&self) -> Vec<&'static str> {
        let set = [
            ("lower", self.lower.is_some()),
            ("upper", self.upper.is_some()),
            ("equals", self.equals.is_some()),
            ("scaler", self.scaler.is_some()),
            ("adder", self.adder.is_some()),
            ("ref0", self.ref0.is_some()),
            ("ref", self.ref_.is_some()),
            ("units", self.units.is_some()),
            ("linear", self.linear),
        ];
        set.iter().filter(|(_, on)| *on).map(|(n, _)| *n).collect()
    }
}

/// A declared linkage with every default applied.
///
/// The enforced quantity is `mult_a * var_a[loc_a] + mult_b * var_b[loc_b]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageSpec {
    pub phase_a: String,
    pub phase_b: String,
    pub var_a: String,
    pub var_b: String,
    pub loc_a: Loc,
    pub loc_b: Loc,
    pub mult_a: f64,
    pub mult_b: f64,
    /// Explicit linkage units; `None` adopts the units of `var_a`.
    pub units: Units,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub equals: Option<f64>,
    pub scaler: Option<f64>,
    pub adder: Option<f64>,
    pub ref0: Option<f64>,
    #[serde(rename = "ref")]
    pub ref_: Option<f64>,
    pub linear: bool,
    pub connected: bool,
}

fn resolve_multiplier(
    sign: Option<f64>,
    mult: Option<f64>,
    default: f64,
    names: (&'static str, &'static str),
    context: impl FnOnce() -> String,
) -> TrajectoryResult<f64> {
    let (deprecated, replacement) = names;
    match (sign, mult) {
        (Some(_), Some(_)) => Err(TrajectoryError::DeprecatedOptionConflict {
            deprecated,
            replacement,
            context: context(),
        }),
        (Some(sign), None) => {
            warn!("'{deprecated}' has been deprecated. Use '{replacement}' instead.");
            Ok(sign)
        }
        (None, mult) => Ok(mult.unwrap_or(default)),
    }
}

impl LinkageSpec {
    /// Apply defaults and deprecations to a linkage declaration.
    pub fn declare(
        trajectory: &str,
        phase_a: &str,
        phase_b: &str,
        var_a: &str,
        var_b: &str,
        options: LinkageOptions,
    ) -> TrajectoryResult<Self> {
        let context = || {
            format!("linkage {phase_a}:{var_a} -> {phase_b}:{var_b} in trajectory '{trajectory}'")
        };
        let mult_a = resolve_multiplier(
            options.sign_a,
            options.mult_a,
            1.0,
            ("sign_a", "mult_a"),
            context,
        )?;
        let mult_b = resolve_multiplier(
            options.sign_b,
            options.mult_b,
            -1.0,
            ("sign_b", "mult_b"),
            context,
        )?;

        let mut equals = options.equals;
        if options.connected {
            let unused = options.constraint_only_options();
            if !unused.is_empty() {
                warn!(
                    "Invalid option in linkage between {phase_a}:{var_a} and {phase_b}:{var_b} in \
                     trajectory {trajectory}. The following options for add_linkage_constraint \
                     were specified but not valid when option 'connected' is True: {}",
                    unused.join(" ")
                );
            }
        } else if options.lower.is_none() && options.upper.is_none() && equals.is_none() {
            equals = Some(0.0);
        }

        Ok(Self {
            phase_a: phase_a.to_string(),
            phase_b: phase_b.to_string(),
            var_a: var_a.to_string(),
            var_b: var_b.to_string(),
            loc_a: options.loc_a,
            loc_b: options.loc_b,
            mult_a,
            mult_b,
            units: options.units,
            lower: options.lower,
            upper: options.upper,
            equals,
            scaler: options.scaler,
            adder: options.adder,
            ref0: options.ref0,
            ref_: options.ref_,
            linear: options.linear,
            connected: options.connected,
        })
    }

    pub fn is_wildcard(&self) -> bool {
        self.var_a == WILDCARD && self.var_b == WILDCARD
    }

    fn same_vars(&self, var_a: &str, var_b: &str) -> bool {
        self.var_a == var_a && self.var_b == var_b
    }

    /// Copy of this linkage applied to another variable pair.
    fn with_vars(&self, var_a: &str, var_b: &str) -> Self {
        Self {
            var_a: var_a.to_string(),
            var_b: var_b.to_string(),
            ..self.clone()
        }
    }
}

/// Linkages grouped by ordered phase pair, both levels kept in declaration order.
#[derive(Debug, Clone, Default)]
pub struct LinkageRegistry {
    pairs: Vec<((String, String), Vec<LinkageSpec>)>,
    index: HashMap<(String, String), usize>,
}

impl LinkageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `spec`, replacing an earlier declaration for the same phases and variables.
    pub fn insert(&mut self, spec: LinkageSpec) {
        let key = (spec.phase_a.clone(), spec.phase_b.clone());
        let slot = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.index.insert(key.clone(), self.pairs.len());
                self.pairs.push((key, Vec::new()));
                self.pairs.len() - 1
            }
        };
        let list = &mut self.pairs[slot].1;
        match list.iter_mut().find(|s| s.same_vars(&spec.var_a, &spec.var_b)) {
            Some(existing) => *existing = spec,
            None => list.push(spec),
        }
    }

    pub fn get(&self, phase_a: &str, phase_b: &str, var_a: &str, var_b: &str) -> Option<&LinkageSpec> {
        let key = (phase_a.to_string(), phase_b.to_string());
        self.index
            .get(&key)
            .and_then(|&i| self.pairs[i].1.iter().find(|s| s.same_vars(var_a, var_b)))
    }

    /// Phase pairs and their linkages, in declaration order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, &[LinkageSpec])> {
        self.pairs
            .iter()
            .map(|((a, b), list)| (a.as_str(), b.as_str(), list.as_slice()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkageSpec> {
        self.pairs.iter().flat_map(|(_, list)| list.iter())
    }

    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.pairs
            .iter()
            .flat_map(|((a, b), _)| [a.as_str(), b.as_str()])
    }

    pub fn len(&self) -> usize {
        self.pairs.iter().map(|(_, list)| list.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace each wildcard linkage, in place, with one linkage per variable pair returned
    /// by `expand`. Pairs already declared explicitly for the same phases are left alone.
    pub fn expand_wildcards<F>(&mut self, mut expand: F)
    where
        F: FnMut(&LinkageSpec) -> Vec<(String, String)>,
    {
        for (_, list) in &mut self.pairs {
            if !list.iter().any(LinkageSpec::is_wildcard) {
                continue;
            }
            let mut expanded: Vec<LinkageSpec> = Vec::with_capacity(list.len());
            for spec in list.iter() {
                if !spec.is_wildcard() {
                    expanded.push(spec.clone());
                    continue;
                }
                for (var_a, var_b) in expand(spec) {
                    let declared = list
                        .iter()
                        .chain(expanded.iter())
                        .any(|s| s.same_vars(&var_a, &var_b));
                    if !declared {
                        expanded.push(spec.with_vars(&var_a, &var_b));
                    }
                }
            }
            *list = expanded;
        }
    }
}
