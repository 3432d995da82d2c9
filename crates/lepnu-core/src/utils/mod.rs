/// Useful enumerations for particle identification.
pub mod enums;
/// Cartesian three- and four-vectors with collider-coordinate helpers.
pub mod vectors;

/// Conversion factor from the native detector energy unit (MeV) to GeV.
pub const MEV_TO_GEV: f64 = 0.001;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`](crate::histogram::Histogram)
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`. Lower edges are inclusive and the upper limit is exclusive,
/// so values equal to `limits.1` return [`None`] (overflow).
///
/// # See Also
/// [`Histogram`](crate::histogram::Histogram)
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_binning() {
        assert_eq!(get_bin_index(0.0, 3, (0.0, 1.0)), Some(0));
        assert_eq!(get_bin_index(0.1, 3, (0.0, 1.0)), Some(0));
        assert_eq!(get_bin_index(0.5, 3, (0.0, 1.0)), Some(1));
        assert_eq!(get_bin_index(0.9, 3, (0.0, 1.0)), Some(2));
        assert_eq!(get_bin_index(1.0, 3, (0.0, 1.0)), None);
        assert_eq!(get_bin_index(-0.1, 3, (0.0, 1.0)), None);
        assert_eq!(get_bin_index(f64::NAN, 3, (0.0, 1.0)), None);
        let edges = get_bin_edges(3, (0.0, 1.0));
        assert_eq!(edges.len(), 4);
        assert_relative_eq!(edges[1], 1.0 / 3.0);
        assert_relative_eq!(edges[3], 1.0);
    }

    #[test]
    fn test_lepton_pt_binning() {
        assert_eq!(get_bin_index(40.0, 20, (0.0, 200.0)), Some(4));
        assert_eq!(get_bin_index(59.999, 20, (0.0, 200.0)), Some(5));
        assert_eq!(get_bin_index(199.999, 20, (0.0, 200.0)), Some(19));
        assert_eq!(get_bin_index(200.0, 20, (0.0, 200.0)), None);
    }
}
