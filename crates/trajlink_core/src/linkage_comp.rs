//! The shared subsystem that evaluates constraint-mode linkages.
//!
//! Each input holds the first and last node value of one phase variable. Each constraint
//! evaluates `mult_a * a[loc_a] + mult_b * b[loc_b]` componentwise.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::phase::OptionsMap;
use crate::resolve::{ResolvedLinkage, ResolvedSide};
use crate::timeseries::SparsePartials;
use crate::units::Units;

#[derive(Debug, Clone, PartialEq)]
pub struct LinkageInput {
    pub name: String,
    /// `(2,) + shape`: the first and last node values.
    pub shape: Vec<usize>,
    pub units: Units,
}

impl LinkageInput {
    fn size(&self) -> usize {
        self.shape[1..].iter().product()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkageConstraint {
    pub name: String,
    pub input_a: String,
    pub input_b: String,
    /// Row of each input holding the linked boundary value.
    pub index_a: usize,
    pub index_b: usize,
    pub mult_a: f64,
    pub mult_b: f64,
    pub shape: Vec<usize>,
    pub units: Units,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub equals: Option<f64>,
    pub scaler: Option<f64>,
    pub adder: Option<f64>,
    pub ref0: Option<f64>,
    pub ref_: Option<f64>,
    pub linear: bool,
}

impl LinkageConstraint {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkageComp {
    inputs: OptionsMap<LinkageInput>,
    constraints: Vec<LinkageConstraint>,
}

fn input_name(side: &ResolvedSide) -> String {
    format!("{}:{}", side.phase, side.prefixed)
}

impl LinkageComp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &LinkageInput> {
        self.inputs.iter().map(|(_, input)| input)
    }

    pub fn constraints(&self) -> &[LinkageConstraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Add the constraint for `linkage`, returning the names of its two inputs.
    ///
    /// Inputs already present are shared; the first registration fixes their units.
    pub fn add_linkage(&mut self, linkage: &ResolvedLinkage) -> (String, String) {
        let spec = linkage.spec();
        let (a, b) = (linkage.side_a(), linkage.side_b());
        let (input_a, input_b) = (input_name(a), input_name(b));

        for (name, shape) in [(&input_a, &a.shape), (&input_b, &b.shape)] {
            if !self.inputs.contains_key(name) {
                let mut full_shape = vec![2];
                full_shape.extend_from_slice(shape);
                self.inputs.insert(
                    name.clone(),
                    LinkageInput {
                        name: name.clone(),
                        shape: full_shape,
                        units: linkage.units().map(str::to_string),
                    },
                );
            }
        }

        self.constraints.push(LinkageConstraint {
            name: format!(
                "{}:{}_to_{}:{}",
                spec.phase_a, spec.var_a, spec.phase_b, spec.var_b
            ),
            input_a: input_a.clone(),
            input_b: input_b.clone(),
            index_a: spec.loc_a.index(),
            index_b: spec.loc_b.index(),
            mult_a: spec.mult_a,
            mult_b: spec.mult_b,
            shape: linkage.shape().to_vec(),
            units: linkage.units().map(str::to_string),
            lower: spec.lower,
            upper: spec.upper,
            equals: spec.equals,
            scaler: spec.scaler,
            adder: spec.adder,
            ref0: spec.ref0,
            ref_: spec.ref_,
            linear: spec.linear,
        });

        (input_a, input_b)
    }

    /// Evaluate every constraint. Inputs are `2 x size` matrices of boundary values.
    pub fn compute(
        &self,
        inputs: &HashMap<String, DMatrix<f64>>,
    ) -> Result<HashMap<String, DVector<f64>>> {
        let mut outputs = HashMap::with_capacity(self.constraints.len());
        for con in &self.constraints {
            let a = self.input_values(inputs, &con.input_a)?;
            let b = self.input_values(inputs, &con.input_b)?;
            if a.ncols() != con.size() || b.ncols() != con.size() {
                bail!(
                    "Linkage constraint '{}' has size {} but its inputs have sizes {} and {}",
                    con.name,
                    con.size(),
                    a.ncols(),
                    b.ncols()
                );
            }
            let value = DVector::from_fn(con.size(), |i, _| {
                con.mult_a * a[(con.index_a, i)] + con.mult_b * b[(con.index_b, i)]
            });
            outputs.insert(con.name.clone(), value);
        }
        Ok(outputs)
    }

    /// Constant partials of each constraint with respect to its inputs.
    ///
    /// A constraint linking a variable to itself yields a single partial set with both
    /// multipliers.
    pub fn partials(&self) -> Vec<SparsePartials> {
        let mut partials = Vec::new();
        for con in &self.constraints {
            let size = con.size();
            let mut by_input: BTreeMap<&str, BTreeMap<(usize, usize), f64>> = BTreeMap::new();
            for (input, index, mult) in [
                (con.input_a.as_str(), con.index_a, con.mult_a),
                (con.input_b.as_str(), con.index_b, con.mult_b),
            ] {
                let entries = by_input.entry(input).or_default();
                for i in 0..size {
                    *entries.entry((i, index * size + i)).or_insert(0.0) += mult;
                }
            }
            for (wrt, entries) in by_input {
                let (keys, values): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
                let (rows, cols) = keys.into_iter().unzip();
                partials.push(SparsePartials {
                    of: con.name.clone(),
                    wrt: wrt.to_string(),
                    rows,
                    cols,
                    values,
                });
            }
        }
        partials
    }

    fn input_values<'a>(
        &self,
        inputs: &'a HashMap<String, DMatrix<f64>>,
        name: &str,
    ) -> Result<&'a DMatrix<f64>> {
        let Some(input) = self.inputs.get(name) else {
            bail!("'{}' is not an input of the linkage subsystem", name);
        };
        let Some(values) = inputs.get(name) else {
            bail!("Linkage input '{}' was not provided", name);
        };
        if values.shape() != (2, input.size()) {
            bail!(
                "Linkage input '{}' has shape {:?} but (2, {}) was expected",
                name,
                values.shape(),
                input.size()
            );
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkage::{LinkageOptions, LinkageSpec, Loc};
    use crate::phase::{Phase, StateOptions};
    use crate::resolve::resolve_linkage;

    fn phase() -> Phase {
        let mut phase = Phase::default();
        phase.add_state(
            "r",
            StateOptions {
                units: Some("m".into()),
                shape: vec![2],
                ..Default::default()
            },
        );
        phase
    }

    fn linkage(phase_a: &str, phase_b: &str, options: LinkageOptions) -> ResolvedLinkage {
        let spec = LinkageSpec::declare("traj", phase_a, phase_b, "r", "r", options).unwrap();
        resolve_linkage("traj", &spec, &phase(), &phase()).unwrap()
    }

    #[test]
    fn continuity_constraint_values() {
        let mut comp = LinkageComp::new();
        let (a, b) = comp.add_linkage(&linkage("p1", "p2", LinkageOptions::default()));
        assert_eq!(a, "p1:states:r");
        assert_eq!(b, "p2:states:r");
        assert_eq!(comp.inputs().next().unwrap().shape, vec![2, 2]);

        let inputs = HashMap::from([
            (a, DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 3.0, 4.0])),
            (b, DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 9.0, 9.0])),
        ]);
        let out = comp.compute(&inputs).unwrap();
        let con = &out["p1:r_to_p2:r"];
        assert_eq!(con.as_slice(), &[2.0, 3.0]);
        assert_eq!(comp.constraints()[0].equals, Some(0.0));
    }

    #[test]
    fn cyclic_linkage_merges_partials() {
        let mut comp = LinkageComp::new();
        let options = LinkageOptions {
            loc_a: Loc::Initial,
            loc_b: Loc::Final,
            ..Default::default()
        };
        let (a, b) = comp.add_linkage(&linkage("p1", "p1", options));
        assert_eq!(a, b);
        assert_eq!(comp.inputs().count(), 1);

        let partials = comp.partials();
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].rows, vec![0, 0, 1, 1]);
        assert_eq!(partials[0].cols, vec![0, 2, 1, 3]);
        assert_eq!(partials[0].values, vec![1.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn misshapen_inputs_are_rejected() {
        let mut comp = LinkageComp::new();
        let (a, b) = comp.add_linkage(&linkage("p1", "p2", LinkageOptions::default()));
        let inputs = HashMap::from([(a, DMatrix::zeros(2, 2)), (b, DMatrix::zeros(3, 2))]);
        let err = comp.compute(&inputs).unwrap_err();
        assert!(err.to_string().contains("(2, 2) was expected"));
    }
}
