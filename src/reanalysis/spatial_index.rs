//! Nearest-neighbour index over flattened (lat, lon) grid cells.
//!
//! A 2-d kd-tree using Euclidean distance in raw degree coordinates. This
//! ignores meridian convergence, so near the poles the "nearest" cell in
//! degree space can be noticeably further away on the ground than another
//! cell. Callers are told about this when a field set reaches high latitudes.

use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct Node {
    point: [f64; 2],
    /// Position of this point in the slice passed to `build`.
    index: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Read-only kd-tree; built once per field set.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl SpatialIndex {
    /// Build from `(lat, lon)` pairs. Returned indices refer to positions in `points`.
    ///
    /// Points with non-finite coordinates are skipped.
    pub fn build(points: &[(f64, f64)]) -> Self {
        let mut items: Vec<(usize, [f64; 2])> = points
            .iter()
            .enumerate()
            .filter(|(_, (lat, lon))| lat.is_finite() && lon.is_finite())
            .map(|(i, &(lat, lon))| (i, [lat, lon]))
            .collect();
        let mut nodes = Vec::with_capacity(items.len());
        let root = build_recursive(&mut items, 0, &mut nodes);
        Self { nodes, root }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the nearest point to (`lat`, `lon`).
    ///
    /// Equidistant candidates resolve to the lowest index. Returns `None`
    /// for an empty index or a non-finite query.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<usize> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        let root = self.root?;
        let query = [lat, lon];
        let mut best = (f64::INFINITY, usize::MAX);
        self.search(root, &query, &mut best);
        (best.1 != usize::MAX).then_some(best.1)
    }

    fn search(&self, node_id: usize, query: &[f64; 2], best: &mut (f64, usize)) {
        let node = &self.nodes[node_id];
        let d = sq_dist(&node.point, query);
        if d < best.0 || (d == best.0 && node.index < best.1) {
            *best = (d, node.index);
        }

        let diff = query[node.axis] - node.point[node.axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(n) = near {
            self.search(n, query, best);
        }
        // `<=` so an equidistant point with a lower index on the far side is still found
        if diff * diff <= best.0 {
            if let Some(f) = far {
                self.search(f, query, best);
            }
        }
    }
}

fn sq_dist(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dlat = a[0] - b[0];
    let dlon = a[1] - b[1];
    dlat * dlat + dlon * dlon
}

fn build_recursive(
    items: &mut [(usize, [f64; 2])],
    depth: usize,
    nodes: &mut Vec<Node>,
) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let axis = depth % 2;
    items.sort_by(|a, b| match a.1[axis].total_cmp(&b.1[axis]) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    let mid = items.len() / 2;
    let (index, point) = items[mid];

    let id = nodes.len();
    nodes.push(Node {
        point,
        index,
        axis,
        left: None,
        right: None,
    });

    let (left_items, rest) = items.split_at_mut(mid);
    let right_items = &mut rest[1..];
    let left = build_recursive(left_items, depth + 1, nodes);
    let right = build_recursive(right_items, depth + 1, nodes);
    nodes[id].left = left;
    nodes[id].right = right;
    Some(id)
}
