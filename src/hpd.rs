//! Highest-posterior-density estimators.
//!
//! # 1-D intervals
//! The narrowest interval containing a given fraction of the samples.
//! Found exactly by sliding a window of `k = round(p·N)` consecutive
//! values over the sorted samples: a minimal-width k-subset of a sorted
//! array is necessarily contiguous, so the narrowest window is the HPD
//! interval.
//!
//! # 2-D regions
//! Joint regions for bivariate traits come from an external
//! density-contour service, consumed through [`ContourSource`]. The
//! kernel-density and contouring internals are the service's business;
//! this crate only forwards samples and a probability mass and receives
//! polygon boundaries back.

use crate::stats;

/// A closed polygon boundary, as (x, y) vertices.
pub type Polygon = Vec<(f64, f64)>;

/// External density-contour collaborator for joint 2-D HPD regions.
///
/// The call is synchronous; a stalled implementation blocks the run.
pub trait ContourSource {
    /// Returns the boundary polygons enclosing `mass` of the joint sample
    /// density. Disjoint regions come back as multiple polygons.
    fn contour(&self, xs: &[f64], ys: &[f64], mass: f64) -> Vec<Polygon>;
}

/// Computes the minimal-width interval containing `mass` of the samples.
///
/// Returns `(lower, upper)`. Degenerate inputs (one sample, or a window
/// that rounds to zero width) return the full observed range rather than
/// an error; they occur naturally at the edges of a finite sample.
///
/// # Example
/// ```
/// # use tree_annotate::hpd::interval;
/// // samples bunched near 0 with one outlier: the 80% interval
/// // excludes the outlier
/// let (lo, hi) = interval(&[0.0, 0.1, 0.2, 0.3, 100.0], 0.8);
/// assert_eq!((lo, hi), (0.0, 0.3));
/// ```
pub fn interval(values: &[f64], mass: f64) -> (f64, f64) {
    let n = values.len();
    let k = (mass * n as f64).round() as usize;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    if n <= 1 || k == 0 {
        return stats::min_max(values).unwrap_or((0.0, 0.0));
    }
    let k = k.min(n);

    let mut best = 0;
    let mut best_width = f64::INFINITY;
    for i in 0..=(n - k) {
        let width = sorted[i + k - 1] - sorted[i];
        if width < best_width {
            best_width = width;
            best = i;
        }
    }
    (sorted[best], sorted[best + k - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_excludes_tail() {
        let samples = [1.0, 1.1, 1.2, 1.3, 1.4, 1.5, 1.6, 1.7, 9.0, 10.0];
        let (lo, hi) = interval(&samples, 0.8);
        assert_eq!((lo, hi), (1.0, 1.7));
    }

    #[test]
    fn test_interval_minimality() {
        // Property from the design: the returned window is no wider than any
        // other contiguous k-window of the sorted samples.
        let samples = [0.3, 2.0, 0.1, 5.0, 0.2, 1.0, 0.15, 0.25, 4.0, 0.05];
        let mass = 0.5;
        let (lo, hi) = interval(&samples, mass);

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let k = (mass * sorted.len() as f64).round() as usize;
        for i in 0..=(sorted.len() - k) {
            assert!(hi - lo <= sorted[i + k - 1] - sorted[i] + 1e-12);
        }
    }

    #[test]
    fn test_uniform_grid_any_minimal_window_is_valid() {
        // 20 evenly spaced samples at mass 0.5: every 10-value run spans
        // exactly 9, so any of them is a correct answer. Check validity,
        // not uniqueness.
        let samples: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let (lo, hi) = interval(&samples, 0.5);
        assert_eq!(hi - lo, 9.0);
        assert!(lo >= 1.0 && hi <= 20.0);
        assert_eq!(lo.fract(), 0.0);
    }

    #[test]
    fn test_degenerate_inputs_return_range() {
        assert_eq!(interval(&[3.0], 0.95), (3.0, 3.0));
        assert_eq!(interval(&[], 0.95), (0.0, 0.0));
        // mass so small the window rounds to zero
        assert_eq!(interval(&[1.0, 2.0, 3.0], 0.01), (1.0, 3.0));
    }

    #[test]
    fn test_full_mass_covers_everything() {
        let samples = [4.0, 2.0, 8.0, 6.0];
        assert_eq!(interval(&samples, 1.0), (2.0, 8.0));
    }

    /// A stand-in contour service: one rectangle around the data. Exercises
    /// the trait boundary the way the annotator consumes it.
    struct BoundingBox;

    impl ContourSource for BoundingBox {
        fn contour(&self, xs: &[f64], ys: &[f64], _mass: f64) -> Vec<Polygon> {
            let (x0, x1) = crate::stats::min_max(xs).unwrap();
            let (y0, y1) = crate::stats::min_max(ys).unwrap();
            vec![vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)]]
        }
    }

    #[test]
    fn test_contour_source_boundary() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [5.0, 6.0, 7.0];
        let polys = BoundingBox.contour(&xs, &ys, 0.8);
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0][0], (0.0, 5.0));
        assert_eq!(polys[0][2], (2.0, 7.0));
    }
}
