//! Lagrange interpolation and differentiation matrices on arbitrary node sets.

use anyhow::{bail, Result};
use nalgebra::DMatrix;

use crate::traits::Scalar;

/// Build the matrices that map values at `x_disc` to values (`L`) and first derivatives (`D`)
/// at `x_interp` of the Lagrange polynomial through the `x_disc` nodes.
///
/// Both matrices have shape `(x_interp.len(), x_disc.len())`. Derivatives are with respect to
/// the same coordinate the nodes are expressed in.
pub fn lagrange_matrices<T: Scalar>(
    x_disc: &[T],
    x_interp: &[T],
) -> Result<(DMatrix<T>, DMatrix<T>)> {
    let num_disc = x_disc.len();
    let num_interp = x_interp.len();
    if num_disc == 0 {
        bail!("Lagrange interpolation requires at least one node");
    }

    let denominators = basis_denominators(x_disc)?;
    let mut l = DMatrix::from_element(num_interp, num_disc, T::zero());
    let mut d = DMatrix::from_element(num_interp, num_disc, T::zero());

    for (i, &x) in x_interp.iter().enumerate() {
        for j in 0..num_disc {
            let mut numer = T::one();
            for (k, &xk) in x_disc.iter().enumerate() {
                if k != j {
                    numer = numer * (x - xk);
                }
            }
            l[(i, j)] = numer / denominators[j];

            // d/dx prod_{k != j}(x - x_k) = sum_{m != j} prod_{k != j, m}(x - x_k)
            let mut deriv = T::zero();
            for m in 0..num_disc {
                if m == j {
                    continue;
                }
                let mut prod = T::one();
                for (k, &xk) in x_disc.iter().enumerate() {
                    if k != j && k != m {
                        prod = prod * (x - xk);
                    }
                }
                deriv = deriv + prod;
            }
            d[(i, j)] = deriv / denominators[j];
        }
    }

    Ok((l, d))
}

fn basis_denominators<T: Scalar>(x_disc: &[T]) -> Result<Vec<T>> {
    let mut denominators = Vec::with_capacity(x_disc.len());
    for (j, &xj) in x_disc.iter().enumerate() {
        let mut denom = T::one();
        for (k, &xk) in x_disc.iter().enumerate() {
            if k != j {
                denom = denom * (xj - xk);
            }
        }
        if denom == T::zero() || !denom.is_finite() {
            bail!("Lagrange nodes must be distinct (node {} is repeated)", j);
        }
        denominators.push(denom);
    }
    Ok(denominators)
}
