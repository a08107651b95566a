//! Operators that resample values on a phase's input grid onto an output node set.
//!
//! Each input segment contributes one dense Lagrange block mapping its own nodes onto the
//! output nodes it captures. Blocks are assembled block-diagonally into CSR matrices.

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::GridError;
use crate::grid::GridData;
use crate::lagrange::lagrange_matrices;

/// Interpolation and differentiation operators from an input grid to an output node set.
#[derive(Debug, Clone)]
pub struct GridMapping {
    pub input_num_nodes: usize,
    pub output_num_nodes: usize,
    /// `None` when the output nodes are exactly the input nodes.
    interpolation: Option<CsrMatrix<f64>>,
    differentiation: CsrMatrix<f64>,
    /// Half-open output row range captured by each input segment.
    segment_rows: Vec<(usize, usize)>,
}

impl GridMapping {
    /// Build the operators mapping `input` onto the `subset` nodes of `output`.
    ///
    /// When `output` is `None` the input grid is used as the output grid.
    pub fn build(
        input: &GridData,
        output: Option<&GridData>,
        subset: &str,
    ) -> Result<Self, GridError> {
        let output = output.unwrap_or(input);
        let same_grid = output == input;
        let output_indices = output.subset_indices(subset)?;
        let output_num_nodes = output_indices.len();
        let identity = same_grid && subset == "all";

        let output_ptau: Vec<f64> = output_indices.iter().map(|&i| output.node_ptau[i]).collect();
        for (k, w) in output_ptau.windows(2).enumerate() {
            if w[1] < w[0] {
                return Err(GridError::UnsortedOutputNodes {
                    index: k + 1,
                    value: w[1],
                    previous: w[0],
                });
            }
        }

        let mut l_coo = CooMatrix::new(output_num_nodes, input.num_nodes);
        let mut d_coo = CooMatrix::new(output_num_nodes, input.num_nodes);
        let mut segment_rows = Vec::with_capacity(input.num_segments);
        let mut consumed = 0usize;

        for iseg in 0..input.num_segments {
            let (i1, i2) = input.segment_indices[iseg];
            let istau = &input.node_stau[i1..i2];
            let (seg_a, seg_b) = (input.segment_ends[iseg], input.segment_ends[iseg + 1]);

            let captured = if same_grid {
                output_indices[consumed..]
                    .iter()
                    .take_while(|&&i| i < i2)
                    .count()
            } else if iseg + 1 < input.num_segments {
                output_ptau[consumed..]
                    .iter()
                    .take_while(|&&p| p <= seg_b)
                    .count()
            } else {
                output_num_nodes - consumed
            };
            let rows = (consumed, consumed + captured);

            let ostau: Vec<f64> = if same_grid {
                output_indices[rows.0..rows.1]
                    .iter()
                    .map(|&i| input.node_stau[i])
                    .collect()
            } else {
                output_ptau[rows.0..rows.1]
                    .iter()
                    .map(|&p| 2.0 * (p - seg_a) / (seg_b - seg_a) - 1.0)
                    .collect()
            };

            let (l_block, d_block) = lagrange_matrices(istau, &ostau)
                .map_err(|source| GridError::Lagrange {
                    segment: iseg,
                    source,
                })?;
            push_block(&mut l_coo, &l_block, rows.0, i1);
            push_block(&mut d_coo, &d_block, rows.0, i1);

            log::debug!(
                "segment {}: output rows {}..{} from input nodes {}..{}",
                iseg,
                rows.0,
                rows.1,
                i1,
                i2
            );
            segment_rows.push(rows);
            consumed = rows.1;
        }

        debug_assert_eq!(consumed, output_num_nodes);

        Ok(Self {
            input_num_nodes: input.num_nodes,
            output_num_nodes,
            interpolation: if identity {
                None
            } else {
                Some(CsrMatrix::from(&l_coo))
            },
            differentiation: CsrMatrix::from(&d_coo),
            segment_rows,
        })
    }

    /// True when no interpolation is needed and input values pass through unchanged.
    pub fn is_identity(&self) -> bool {
        self.interpolation.is_none()
    }

    pub fn interpolation(&self) -> Option<&CsrMatrix<f64>> {
        self.interpolation.as_ref()
    }

    /// The interpolation matrix, materializing the identity for the fast path.
    pub fn interpolation_matrix(&self) -> CsrMatrix<f64> {
        match &self.interpolation {
            Some(l) => l.clone(),
            None => CsrMatrix::identity(self.input_num_nodes),
        }
    }

    /// Maps input values to derivatives with respect to segment tau at the output nodes.
    pub fn differentiation(&self) -> &CsrMatrix<f64> {
        &self.differentiation
    }

    pub fn segment_rows(&self) -> &[(usize, usize)] {
        &self.segment_rows
    }

    /// Values at the output nodes. `values` has one row per input node.
    pub fn interpolate(&self, values: &DMatrix<f64>) -> DMatrix<f64> {
        match &self.interpolation {
            Some(l) => csr_mul_dense(l, values),
            None => values.clone(),
        }
    }

    /// Derivatives with respect to segment tau at the output nodes.
    pub fn differentiate(&self, values: &DMatrix<f64>) -> DMatrix<f64> {
        csr_mul_dense(&self.differentiation, values)
    }
}

fn push_block(coo: &mut CooMatrix<f64>, block: &DMatrix<f64>, row0: usize, col0: usize) {
    for i in 0..block.nrows() {
        for j in 0..block.ncols() {
            let v = block[(i, j)];
            if v != 0.0 {
                coo.push(row0 + i, col0 + j, v);
            }
        }
    }
}

/// Sparse-dense product `m * x`.
pub(crate) fn csr_mul_dense(m: &CsrMatrix<f64>, x: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(m.nrows(), x.ncols());
    for (i, row) in m.row_iter().enumerate() {
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            for c in 0..x.ncols() {
                out[(i, c)] += v * x[(j, c)];
            }
        }
    }
    out
}
