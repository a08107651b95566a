//! Registry of timeseries outputs resampled from a phase's input grid.
//!
//! Every distinct data source is pulled in through exactly one input slot; any number of
//! outputs (values or rates, possibly in different units) can be derived from that slot.

use std::collections::HashMap;

use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;

use crate::error::{GridError, TimeseriesError};
use crate::grid::GridData;
use crate::mapper::GridMapping;
use crate::units::{integral_units, rate_units, unit_conversion, Units};

/// Name of the input carrying `dt/dstau` at each input node.
pub const DT_DSTAU: &str = "dt_dstau";

/// Sparse partial derivatives of one output with respect to one input, in COO form over the
/// flattened `(node, component)` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SparsePartials {
    pub of: String,
    pub wrt: String,
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesInput {
    pub name: String,
    /// Full shape, node dimension first.
    pub shape: Vec<usize>,
    pub units: Units,
    pub desc: String,
}

#[derive(Debug, Clone)]
pub struct TimeseriesVar {
    pub name: String,
    pub input_name: String,
    /// Shape of a single node's value.
    pub shape: Vec<usize>,
    pub units: Units,
    pub desc: String,
    pub is_rate: bool,
    /// `(scale, offset)` applied as `scale * (value + offset)`.
    pub conversion: Option<(f64, f64)>,
    pub partials: SparsePartials,
}

impl TimeseriesVar {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone)]
pub struct TimeseriesOutputs {
    mapping: GridMapping,
    interpolation: CsrMatrix<f64>,
    time_units: Units,
    inputs: Vec<TimeseriesInput>,
    sources: HashMap<String, usize>,
    vars: Vec<TimeseriesVar>,
    var_index: HashMap<String, usize>,
}

impl TimeseriesOutputs {
    pub fn new(mapping: GridMapping, time_units: Units) -> Self {
        let interpolation = mapping.interpolation_matrix();
        let dt_dstau = TimeseriesInput {
            name: DT_DSTAU.to_string(),
            shape: vec![mapping.input_num_nodes],
            units: time_units.clone(),
            desc: "time step size per unit segment tau".to_string(),
        };
        Self {
            mapping,
            interpolation,
            time_units,
            inputs: vec![dt_dstau],
            sources: HashMap::new(),
            vars: Vec::new(),
            var_index: HashMap::new(),
        }
    }

    pub fn from_grids(
        input: &GridData,
        output: Option<&GridData>,
        subset: &str,
        time_units: Units,
    ) -> Result<Self, GridError> {
        Ok(Self::new(GridMapping::build(input, output, subset)?, time_units))
    }

    pub fn mapping(&self) -> &GridMapping {
        &self.mapping
    }

    pub fn time_units(&self) -> Option<&str> {
        self.time_units.as_deref()
    }

    pub fn inputs(&self) -> &[TimeseriesInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TimeseriesVar] {
        &self.vars
    }

    pub fn output(&self, name: &str) -> Option<&TimeseriesVar> {
        self.var_index.get(name).map(|&i| &self.vars[i])
    }

    /// Input slot fed by `src`, if that source has been registered.
    pub fn input_for_source(&self, src: &str) -> Option<&TimeseriesInput> {
        self.sources.get(src).map(|&i| &self.inputs[i])
    }

    /// Register output `name` drawn from data source `src`.
    ///
    /// Returns `true` if a new input slot was added for `src`, or `false` if an existing slot
    /// was reused (or `name` was already registered, in which case nothing changes).
    pub fn add_output(
        &mut self,
        name: &str,
        units: Option<&str>,
        shape: &[usize],
        desc: &str,
        src: &str,
        is_rate: bool,
    ) -> Result<bool, TimeseriesError> {
        if self.var_index.contains_key(name) {
            return Ok(false);
        }

        let (input_idx, added_source) = match self.sources.get(src) {
            Some(&idx) => (idx, false),
            None => {
                let mut full_shape = vec![self.mapping.input_num_nodes];
                full_shape.extend_from_slice(shape);
                // A slot always holds values, even when a rate output opens it.
                let slot_units = if is_rate {
                    integral_units(units, self.time_units.as_deref())
                } else {
                    units.map(str::to_string)
                };
                self.inputs.push(TimeseriesInput {
                    name: format!("input_values:{name}"),
                    shape: full_shape,
                    units: slot_units,
                    desc: desc.to_string(),
                });
                let idx = self.inputs.len() - 1;
                self.sources.insert(src.to_string(), idx);
                (idx, true)
            }
        };
        let input = &self.inputs[input_idx];

        // The slot may have been opened by another output with different units. Rates are
        // compared against the slot's rate units.
        let slot_units = if is_rate {
            rate_units(input.units.as_deref(), self.time_units.as_deref(), 1)
        } else {
            input.units.clone()
        };
        let conversion = match (slot_units.as_deref(), units) {
            _ if added_source => None,
            (Some(from), Some(to)) if from != to => {
                Some(
                    unit_conversion(from, to).map_err(|source| TimeseriesError::Units {
                        name: name.to_string(),
                        source,
                    })?,
                )
            }
            _ => None,
        };

        let size: usize = shape.iter().product();
        let matrix = if is_rate {
            self.mapping.differentiation()
        } else {
            &self.interpolation
        };
        let scale = conversion.map_or(1.0, |(scale, _)| scale);
        let partials = tile_partials(matrix, size, scale, name, &input.name);

        self.vars.push(TimeseriesVar {
            name: name.to_string(),
            input_name: input.name.clone(),
            shape: shape.to_vec(),
            units: units.map(str::to_string),
            desc: desc.to_string(),
            is_rate,
            conversion,
            partials,
        });
        self.var_index.insert(name.to_string(), self.vars.len() - 1);

        Ok(added_source)
    }

    /// Evaluate every registered output.
    ///
    /// Each input is a matrix with one row per input node and one column per flattened
    /// component. Rate outputs additionally require the [`DT_DSTAU`] input.
    pub fn compute(
        &self,
        inputs: &HashMap<String, DMatrix<f64>>,
    ) -> Result<HashMap<String, DMatrix<f64>>, TimeseriesError> {
        let dt_out = self.output_dt_dstau(inputs)?;
        let mut outputs = HashMap::with_capacity(self.vars.len());

        for var in &self.vars {
            let values = self.input_values(inputs, &var.input_name, var.size())?;
            let mut result = if var.is_rate {
                let mut rates = self.mapping.differentiate(values);
                if let Some(dt) = &dt_out {
                    for (k, mut row) in rates.row_iter_mut().enumerate() {
                        row /= dt[k];
                    }
                }
                rates
            } else {
                self.mapping.interpolate(values)
            };
            if let Some((scale, offset)) = var.conversion {
                result.apply(|v| *v = scale * (*v + offset));
            }
            outputs.insert(var.name.clone(), result);
        }

        Ok(outputs)
    }

    /// Partial derivatives of every output at the given inputs.
    ///
    /// Value outputs have constant partials. Rate outputs depend on `dt_dstau`, and also
    /// report their partials with respect to it.
    pub fn compute_partials(
        &self,
        inputs: &HashMap<String, DMatrix<f64>>,
    ) -> Result<Vec<SparsePartials>, TimeseriesError> {
        let dt_out = self.output_dt_dstau(inputs)?;
        let mut partials = Vec::new();

        for var in &self.vars {
            if !var.is_rate {
                partials.push(var.partials.clone());
                continue;
            }
            let dt = match &dt_out {
                Some(dt) => dt,
                None => continue,
            };
            let size = var.size();
            let mut wrt_values = var.partials.clone();
            for (row, value) in wrt_values.rows.iter().zip(wrt_values.values.iter_mut()) {
                *value /= dt[row / size];
            }
            partials.push(wrt_values);

            // d(rate)/d(dt_in) = -scale * (D x) / dt_out^2 * L
            let scale = var.conversion.map_or(1.0, |(scale, _)| scale);
            let deriv = self
                .mapping
                .differentiate(self.input_values(inputs, &var.input_name, size)?);
            let mut wrt_dt = SparsePartials {
                of: var.name.clone(),
                wrt: DT_DSTAU.to_string(),
                rows: Vec::new(),
                cols: Vec::new(),
                values: Vec::new(),
            };
            for (o, row) in self.interpolation.row_iter().enumerate() {
                for c in 0..size {
                    let factor = -scale * deriv[(o, c)] / (dt[o] * dt[o]);
                    for (&k, &l) in row.col_indices().iter().zip(row.values()) {
                        wrt_dt.rows.push(o * size + c);
                        wrt_dt.cols.push(k);
                        wrt_dt.values.push(factor * l);
                    }
                }
            }
            partials.push(wrt_dt);
        }

        Ok(partials)
    }

    fn output_dt_dstau(
        &self,
        inputs: &HashMap<String, DMatrix<f64>>,
    ) -> Result<Option<Vec<f64>>, TimeseriesError> {
        if !self.vars.iter().any(|v| v.is_rate) {
            return Ok(None);
        }
        let dt_in = self.input_values(inputs, DT_DSTAU, 1)?;
        Ok(Some(self.mapping.interpolate(dt_in).column(0).iter().copied().collect()))
    }

    fn input_values<'a>(
        &self,
        inputs: &'a HashMap<String, DMatrix<f64>>,
        name: &str,
        size: usize,
    ) -> Result<&'a DMatrix<f64>, TimeseriesError> {
        let values = inputs.get(name).ok_or_else(|| TimeseriesError::MissingInput {
            name: name.to_string(),
        })?;
        let expected = (self.mapping.input_num_nodes, size);
        if values.shape() != expected {
            return Err(TimeseriesError::InputShape {
                name: name.to_string(),
                expected,
                actual: values.shape(),
            });
        }
        Ok(values)
    }
}

/// Replicate `matrix` independently along each of `size` flattened components.
fn tile_partials(
    matrix: &CsrMatrix<f64>,
    size: usize,
    scale: f64,
    of: &str,
    wrt: &str,
) -> SparsePartials {
    let mut partials = SparsePartials {
        of: of.to_string(),
        wrt: wrt.to_string(),
        rows: Vec::with_capacity(matrix.nnz() * size),
        cols: Vec::with_capacity(matrix.nnz() * size),
        values: Vec::with_capacity(matrix.nnz() * size),
    };
    for (o, row) in matrix.row_iter().enumerate() {
        for c in 0..size {
            for (&i, &v) in row.col_indices().iter().zip(row.values()) {
                partials.rows.push(o * size + c);
                partials.cols.push(i * size + c);
                partials.values.push(scale * v);
            }
        }
    }
    partials
}
