//! Segmented node layouts for pseudospectral phases.
//!
//! A phase's time span is normalized to the phase coordinate `ptau` in `[-1, 1]` and split into
//! segments. Within a segment, nodes are described by the segment-local coordinate `stau`, also
//! in `[-1, 1]`.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// Node distribution used within each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transcription {
    /// Legendre-Gauss-Lobatto nodes; state discretization at even nodes, collocation at odd.
    GaussLobatto,
    /// Legendre-Gauss-Radau nodes plus the segment's final endpoint.
    RadauPs,
    /// Equally spaced nodes including both endpoints.
    Uniform,
    /// Caller-provided segment-local nodes.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridData {
    pub transcription: Transcription,
    pub num_segments: usize,
    /// Segment boundaries in the phase coordinate, from -1 to 1.
    pub segment_ends: Vec<f64>,
    pub nodes_per_seg: Vec<usize>,
    pub num_nodes: usize,
    /// Half-open `(start, end)` node index range of each segment.
    pub segment_indices: Vec<(usize, usize)>,
    pub node_stau: Vec<f64>,
    pub node_ptau: Vec<f64>,
    pub node_dptau_dstau: Vec<f64>,
    pub subset_node_indices: BTreeMap<String, Vec<usize>>,
}

impl GridData {
    /// Build a grid of `num_segments` segments using `transcription`.
    ///
    /// `order` is the number of nodes per segment for Gauss-Lobatto and uniform grids, and
    /// the number of Radau collocation nodes for `RadauPs` (which adds the segment endpoint).
    /// `segment_ends`, if given, are rescaled to `[-1, 1]`; otherwise segments are equal.
    pub fn new(
        transcription: Transcription,
        num_segments: usize,
        order: usize,
        segment_ends: Option<&[f64]>,
    ) -> Result<Self, GridError> {
        if num_segments == 0 {
            return Err(invalid("a grid requires at least one segment"));
        }
        let seg_nodes = match transcription {
            Transcription::GaussLobatto => lgl_nodes(order)?,
            Transcription::RadauPs => {
                let mut nodes = lgr_nodes(order)?;
                nodes.push(1.0);
                nodes
            }
            Transcription::Uniform => uniform_nodes(order)?,
            Transcription::Custom => {
                return Err(invalid(
                    "custom grids must be built with GridData::from_segment_nodes",
                ))
            }
        };
        let ends = match segment_ends {
            Some(ends) => ends.to_vec(),
            None => (0..=num_segments)
                .map(|i| -1.0 + 2.0 * i as f64 / num_segments as f64)
                .collect(),
        };
        if ends.len() != num_segments + 1 {
            return Err(invalid(format!(
                "expected {} segment ends for {} segments, got {}",
                num_segments + 1,
                num_segments,
                ends.len()
            )));
        }
        Self::assemble(transcription, &ends, vec![seg_nodes; num_segments])
    }

    /// Build a grid from explicit segment-local node coordinates.
    pub fn from_segment_nodes(
        segment_ends: &[f64],
        segment_nodes: Vec<Vec<f64>>,
    ) -> Result<Self, GridError> {
        if segment_nodes.is_empty() || segment_ends.len() != segment_nodes.len() + 1 {
            return Err(invalid(format!(
                "expected {} segment ends for {} segments, got {}",
                segment_nodes.len() + 1,
                segment_nodes.len(),
                segment_ends.len()
            )));
        }
        Self::assemble(Transcription::Custom, segment_ends, segment_nodes)
    }

    fn assemble(
        transcription: Transcription,
        ends: &[f64],
        segment_nodes: Vec<Vec<f64>>,
    ) -> Result<Self, GridError> {
        if ends.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(invalid("segment ends must be strictly increasing"));
        }
        let (first, last) = (ends[0], ends[ends.len() - 1]);
        let segment_ends: Vec<f64> = ends
            .iter()
            .map(|e| -1.0 + 2.0 * (e - first) / (last - first))
            .collect();

        let num_segments = segment_nodes.len();
        let mut nodes_per_seg = Vec::with_capacity(num_segments);
        let mut segment_indices = Vec::with_capacity(num_segments);
        let mut node_stau = Vec::new();
        let mut node_ptau = Vec::new();
        let mut node_dptau_dstau = Vec::new();

        for (iseg, staus) in segment_nodes.iter().enumerate() {
            if staus.is_empty() {
                return Err(invalid(format!("segment {iseg} has no nodes")));
            }
            if staus.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(invalid(format!(
                    "nodes of segment {iseg} must be strictly increasing"
                )));
            }
            if staus.iter().any(|s| !(-1.0..=1.0).contains(s)) {
                return Err(invalid(format!(
                    "nodes of segment {iseg} must lie in [-1, 1]"
                )));
            }
            let (a, b) = (segment_ends[iseg], segment_ends[iseg + 1]);
            let start = node_stau.len();
            for &s in staus {
                node_stau.push(s);
                node_ptau.push(a + 0.5 * (s + 1.0) * (b - a));
                node_dptau_dstau.push(0.5 * (b - a));
            }
            nodes_per_seg.push(staus.len());
            segment_indices.push((start, node_stau.len()));
        }

        let num_nodes = node_stau.len();
        let subset_node_indices = build_subsets(transcription, &segment_indices, num_nodes);

        Ok(Self {
            transcription,
            num_segments,
            segment_ends,
            nodes_per_seg,
            num_nodes,
            segment_indices,
            node_stau,
            node_ptau,
            node_dptau_dstau,
            subset_node_indices,
        })
    }

    pub fn subset_indices(&self, subset: &str) -> Result<&[usize], GridError> {
        self.subset_node_indices
            .get(subset)
            .map(Vec::as_slice)
            .ok_or_else(|| GridError::UnknownSubset {
                subset: subset.to_string(),
            })
    }

    pub fn subset_num_nodes(&self, subset: &str) -> Result<usize, GridError> {
        Ok(self.subset_indices(subset)?.len())
    }
}

fn invalid(what: impl Into<String>) -> GridError {
    GridError::InvalidGrid { what: what.into() }
}

fn build_subsets(
    transcription: Transcription,
    segment_indices: &[(usize, usize)],
    num_nodes: usize,
) -> BTreeMap<String, Vec<usize>> {
    let all: Vec<usize> = (0..num_nodes).collect();
    let mut segment_ends = Vec::with_capacity(2 * segment_indices.len());
    for &(i1, i2) in segment_indices {
        segment_ends.push(i1);
        if i2 - 1 != i1 {
            segment_ends.push(i2 - 1);
        }
    }

    let (state_disc, col) = match transcription {
        Transcription::GaussLobatto => (
            select_local(segment_indices, |local, _| local % 2 == 0),
            select_local(segment_indices, |local, _| local % 2 == 1),
        ),
        Transcription::RadauPs => (
            all.clone(),
            select_local(segment_indices, |local, n| local + 1 < n),
        ),
        Transcription::Uniform | Transcription::Custom => (all.clone(), all.clone()),
    };

    let mut subsets = BTreeMap::new();
    subsets.insert("all".to_string(), all);
    subsets.insert("segment_ends".to_string(), segment_ends);
    subsets.insert("state_disc".to_string(), state_disc);
    subsets.insert("col".to_string(), col);
    subsets
}

/// Indices whose segment-local position `(local, nodes_in_segment)` satisfies `keep`.
fn select_local(
    segment_indices: &[(usize, usize)],
    keep: impl Fn(usize, usize) -> bool,
) -> Vec<usize> {
    let mut selected = Vec::new();
    for &(i1, i2) in segment_indices {
        for i in i1..i2 {
            if keep(i - i1, i2 - i1) {
                selected.push(i);
            }
        }
    }
    selected
}

/// Returns `(P_n(x), P_{n-1}(x))`.
fn legendre_eval(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p0 = 1.0;
    let mut p1 = x;
    for k in 2..=n {
        let kf = k as f64;
        let pn = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
        p0 = p1;
        p1 = pn;
    }
    (p1, p0)
}

/// Legendre-Gauss-Lobatto nodes on `[-1, 1]`, ascending.
pub fn lgl_nodes(n: usize) -> Result<Vec<f64>, GridError> {
    if n < 2 {
        return Err(invalid("Gauss-Lobatto segments require at least 2 nodes"));
    }
    let order = n - 1;
    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let mut x = f64::cos(PI * i as f64 / order as f64);
        for _ in 0..100 {
            let (p, p_prev) = legendre_eval(order, x);
            let dx = (x * p - p_prev) / (n as f64 * p);
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        nodes.push(x);
    }
    nodes.reverse();
    nodes[0] = -1.0;
    nodes[n - 1] = 1.0;
    Ok(nodes)
}

/// Legendre-Gauss-Radau nodes on `[-1, 1)`, including -1, ascending.
pub fn lgr_nodes(n: usize) -> Result<Vec<f64>, GridError> {
    if n == 0 {
        return Err(invalid("Radau segments require at least 1 node"));
    }
    let order = n - 1;
    let mut nodes = Vec::with_capacity(n);
    nodes.push(-1.0);
    for j in 1..n {
        let mut x = -f64::cos(2.0 * PI * j as f64 / (2 * order + 1) as f64);
        for _ in 0..100 {
            let (p_n, p_prev) = legendre_eval(n, x);
            let dx = ((1.0 - x) / n as f64) * (p_prev + p_n) / (p_prev - p_n);
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        nodes.push(x);
    }
    nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(nodes)
}

fn uniform_nodes(n: usize) -> Result<Vec<f64>, GridError> {
    if n < 2 {
        return Err(invalid("uniform segments require at least 2 nodes"));
    }
    Ok((0..n)
        .map(|i| -1.0 + 2.0 * i as f64 / (n - 1) as f64)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn lgl_nodes_match_closed_forms() {
        assert_close(&lgl_nodes(2).unwrap(), &[-1.0, 1.0]);
        assert_close(&lgl_nodes(3).unwrap(), &[-1.0, 0.0, 1.0]);
        let r = 1.0 / 5.0_f64.sqrt();
        assert_close(&lgl_nodes(4).unwrap(), &[-1.0, -r, r, 1.0]);
        let r = (3.0_f64 / 7.0).sqrt();
        assert_close(&lgl_nodes(5).unwrap(), &[-1.0, -r, 0.0, r, 1.0]);
    }

    #[test]
    fn lgr_nodes_match_closed_forms() {
        assert_close(&lgr_nodes(1).unwrap(), &[-1.0]);
        assert_close(&lgr_nodes(2).unwrap(), &[-1.0, 1.0 / 3.0]);
        let s6 = 6.0_f64.sqrt();
        assert_close(
            &lgr_nodes(3).unwrap(),
            &[-1.0, (1.0 - s6) / 5.0, (1.0 + s6) / 5.0],
        );
    }

    #[test]
    fn gauss_lobatto_grid_layout() {
        let grid = GridData::new(Transcription::GaussLobatto, 2, 3, None).unwrap();
        assert_eq!(grid.num_nodes, 6);
        assert_eq!(grid.segment_indices, vec![(0, 3), (3, 6)]);
        assert_close(&grid.node_ptau, &[-1.0, -0.5, 0.0, 0.0, 0.5, 1.0]);
        assert_close(&grid.node_dptau_dstau, &[0.5; 6]);
        assert_eq!(grid.subset_indices("state_disc").unwrap(), &[0, 2, 3, 5]);
        assert_eq!(grid.subset_indices("col").unwrap(), &[1, 4]);
        assert_eq!(grid.subset_indices("segment_ends").unwrap(), &[0, 2, 3, 5]);
        assert_eq!(grid.subset_num_nodes("all").unwrap(), 6);
    }

    #[test]
    fn radau_grid_appends_segment_endpoint() {
        let grid = GridData::new(Transcription::RadauPs, 3, 3, None).unwrap();
        assert_eq!(grid.nodes_per_seg, vec![4, 4, 4]);
        assert_eq!(grid.num_nodes, 12);
        assert_eq!(grid.subset_num_nodes("col").unwrap(), 9);
        assert_eq!(*grid.node_stau.last().unwrap(), 1.0);
    }

    #[test]
    fn custom_segment_ends_are_normalized() {
        let grid = GridData::new(Transcription::Uniform, 2, 3, Some(&[0.0, 1.0, 4.0])).unwrap();
        assert_close(&grid.segment_ends, &[-1.0, -0.5, 1.0]);
        assert_close(&grid.node_ptau, &[-1.0, -0.75, -0.5, -0.5, 0.25, 1.0]);
        assert_close(&grid.node_dptau_dstau[..3], &[0.25; 3]);
        assert_close(&grid.node_dptau_dstau[3..], &[0.75; 3]);
    }

    #[test]
    fn invalid_grids_are_rejected() {
        assert!(GridData::new(Transcription::GaussLobatto, 0, 3, None).is_err());
        assert!(GridData::new(Transcription::GaussLobatto, 2, 1, None).is_err());
        assert!(GridData::new(Transcription::Uniform, 2, 3, Some(&[0.0, 1.0])).is_err());
        assert!(GridData::new(Transcription::Uniform, 2, 3, Some(&[0.0, 2.0, 1.0])).is_err());
        assert!(GridData::from_segment_nodes(&[0.0, 1.0], vec![vec![0.5, -0.5]]).is_err());
        let grid = GridData::new(Transcription::Uniform, 1, 2, None).unwrap();
        assert!(matches!(
            grid.subset_indices("state_input"),
            Err(GridError::UnknownSubset { .. })
        ));
    }
}
