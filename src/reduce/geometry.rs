//! Conversion of physical slit traces to pixel space

use crate::frame::{SlitGeometry, TraceEdges};

/// Physical coordinate of each spatial pixel centre
pub fn pixel_locations(nspat: usize) -> Vec<f64> {
    (0..nspat).map(|j| j as f64).collect()
}

/// Index of the pixel whose location is nearest to `x`.
///
/// `locations` must be sorted ascending; returns 0 when it is empty.
pub fn phys_to_pix(x: f64, locations: &[f64]) -> usize {
    if locations.is_empty() {
        return 0;
    }
    let upper = locations.partition_point(|&loc| loc < x);
    if upper == 0 {
        return 0;
    }
    if upper == locations.len() {
        return locations.len() - 1;
    }
    let lower = upper - 1;
    if (x - locations[lower]) <= (locations[upper] - x) {
        lower
    } else {
        upper
    }
}

/// Slit centre, width and edges in pixels.
///
/// The width is the mean edge separation truncated to whole pixels.
pub fn derive_geometry(edges: &TraceEdges, locations: &[f64]) -> SlitGeometry {
    let center = edges
        .left
        .iter()
        .zip(&edges.right)
        .map(|(l, r)| phys_to_pix(0.5 * (l + r), locations))
        .collect();

    let n = edges.left.len().min(edges.right.len());
    let width = if n == 0 {
        0
    } else {
        let total: f64 = edges
            .left
            .iter()
            .zip(&edges.right)
            .map(|(l, r)| r - l)
            .sum();
        (total / n as f64).max(0.0) as usize
    };

    SlitGeometry {
        center,
        width,
        left: edges.left.iter().map(|&l| phys_to_pix(l, locations)).collect(),
        right: edges.right.iter().map(|&r| phys_to_pix(r, locations)).collect(),
    }
}
