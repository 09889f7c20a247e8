//! Regression trees fitted to gradient/hessian statistics

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Structural limits and regularization for a single tree fit
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_child_weight: f32,
    pub gamma: f32,
    pub lambda: f32,
    /// Shrinkage applied to leaf weights
    pub learning_rate: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Node {
    pub feature: u32,
    pub threshold: f32,
    pub left: u32,
    pub right: u32,
    /// Leaf output (already shrunk); meaningless on internal nodes
    pub weight: f32,
    /// Split gain; meaningless on leaves
    pub gain: f32,
    pub leaf: bool,
}

/// A single regression tree stored as a node arena; index 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegressionTree {
    pub nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f32,
    gain: f32,
}

impl RegressionTree {
    /// Fit a tree to the given rows/columns against grad/hess statistics.
    ///
    /// `rows` and `cols` must be sorted so the fit is deterministic for a
    /// given sampling order.
    pub fn fit(
        x: &Array2<f32>,
        rows: &[usize],
        cols: &[usize],
        grad: &[f32],
        hess: &[f32],
        params: &TreeParams,
    ) -> Self {
        let mut tree = RegressionTree { nodes: Vec::new() };
        tree.build(x, rows, cols, grad, hess, params, 0);
        tree
    }

    /// Recursively grow the subtree for `rows`; returns its node index.
    fn build(
        &mut self,
        x: &Array2<f32>,
        rows: &[usize],
        cols: &[usize],
        grad: &[f32],
        hess: &[f32],
        params: &TreeParams,
        depth: usize,
    ) -> usize {
        let g: f64 = rows.iter().map(|&r| grad[r] as f64).sum();
        let h: f64 = rows.iter().map(|&r| hess[r] as f64).sum();

        let leaf_weight =
            (-(g / (h + params.lambda as f64)) * params.learning_rate as f64) as f32;

        if depth >= params.max_depth || rows.len() < 2 {
            return self.push_leaf(leaf_weight);
        }

        let Some(split) = best_split(x, rows, cols, grad, hess, g, h, params) else {
            return self.push_leaf(leaf_weight);
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| x[[r, split.feature]] < split.threshold);

        // Reserve the internal node before recursing so the root stays at 0
        let id = self.nodes.len();
        self.nodes.push(Node {
            feature: split.feature as u32,
            threshold: split.threshold,
            left: 0,
            right: 0,
            weight: 0.0,
            gain: split.gain,
            leaf: false,
        });

        let left = self.build(x, &left_rows, cols, grad, hess, params, depth + 1);
        let right = self.build(x, &right_rows, cols, grad, hess, params, depth + 1);
        self.nodes[id].left = left as u32;
        self.nodes[id].right = right as u32;
        id
    }

    fn push_leaf(&mut self, weight: f32) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            weight,
            gain: 0.0,
            leaf: true,
        });
        id
    }

    pub fn predict_row(&self, row: ArrayView1<f32>) -> f32 {
        let mut node = &self.nodes[0];
        while !node.leaf {
            node = if row[node.feature as usize] < node.threshold {
                &self.nodes[node.left as usize]
            } else {
                &self.nodes[node.right as usize]
            };
        }
        node.weight
    }

    /// Accumulate split gain per feature index
    pub fn accumulate_gain(&self, gains: &mut [f32]) {
        for node in &self.nodes {
            if !node.leaf {
                gains[node.feature as usize] += node.gain;
            }
        }
    }
}

/// Greedy exact split search over the candidate columns.
#[allow(clippy::too_many_arguments)]
fn best_split(
    x: &Array2<f32>,
    rows: &[usize],
    cols: &[usize],
    grad: &[f32],
    hess: &[f32],
    g_total: f64,
    h_total: f64,
    params: &TreeParams,
) -> Option<Split> {
    let lambda = params.lambda as f64;
    let parent_score = g_total * g_total / (h_total + lambda);
    let mut best: Option<Split> = None;

    for &col in cols {
        // Total order (value, row) keeps the scan deterministic under ties
        let mut sorted: Vec<(f32, usize)> = rows.iter().map(|&r| (x[[r, col]], r)).collect();
        sorted.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let mut g_left = 0.0f64;
        let mut h_left = 0.0f64;

        for i in 0..sorted.len() - 1 {
            let (value, row) = sorted[i];
            g_left += grad[row] as f64;
            h_left += hess[row] as f64;

            let next_value = sorted[i + 1].0;
            if value == next_value {
                continue;
            }

            let h_right = h_total - h_left;
            if h_left < params.min_child_weight as f64
                || h_right < params.min_child_weight as f64
            {
                continue;
            }

            let g_right = g_total - g_left;
            let gain = 0.5
                * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                    - parent_score)
                - params.gamma as f64;

            if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain as f64) {
                best = Some(Split {
                    feature: col,
                    threshold: (value + next_value) / 2.0,
                    gain: gain as f32,
                });
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 3,
            min_child_weight: 0.0,
            gamma: 0.0,
            lambda: 1.0,
            learning_rate: 1.0,
        }
    }

    #[test]
    fn test_splits_on_informative_feature() {
        // Feature 0 separates the gradient sign; feature 1 is constant
        let x = array![[0.0, 7.0], [1.0, 7.0], [2.0, 7.0], [3.0, 7.0]];
        let grad = [1.0, 1.0, -1.0, -1.0];
        let hess = [1.0, 1.0, 1.0, 1.0];
        let rows = [0, 1, 2, 3];
        let cols = [0, 1];

        let tree = RegressionTree::fit(&x, &rows, &cols, &grad, &hess, &params());
        let root = &tree.nodes[0];
        assert!(!root.leaf);
        assert_eq!(root.feature, 0);
        assert_eq!(root.threshold, 1.5);

        // Leaf weights move against the gradient
        assert!(tree.predict_row(x.row(0)) < 0.0);
        assert!(tree.predict_row(x.row(3)) > 0.0);
    }

    #[test]
    fn test_constant_gradient_gives_single_leaf() {
        let x = array![[0.0], [1.0], [2.0]];
        let grad = [0.5, 0.5, 0.5];
        let hess = [1.0, 1.0, 1.0];

        let tree = RegressionTree::fit(&x, &[0, 1, 2], &[0], &grad, &hess, &params());
        assert_eq!(tree.nodes.len(), 1);
        assert!(tree.nodes[0].leaf);
        // -G/(H+lambda) = -1.5/4
        assert!((tree.nodes[0].weight + 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_min_child_weight_blocks_small_leaves() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let grad = [5.0, -1.0, -1.0, -1.0];
        let hess = [1.0, 1.0, 1.0, 1.0];
        let p = TreeParams {
            min_child_weight: 2.0,
            max_depth: 1,
            ..params()
        };

        let tree = RegressionTree::fit(&x, &[0, 1, 2, 3], &[0], &grad, &hess, &p);
        if !tree.nodes[0].leaf {
            // The lone outlier row cannot be isolated: threshold must leave
            // at least two rows on each side
            assert!(tree.nodes[0].threshold > 1.0);
        }
    }
}
