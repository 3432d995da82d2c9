use accurate::{sum::Klein, traits::*};
use auto_ops::impl_op_ex;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    utils::{get_bin_edges, get_bin_index},
    LepnuError, LepnuResult,
};

/// Number of bins of the lepton transverse-momentum histogram.
pub const LEPTON_PT_BINS: usize = 20;
/// Range (GeV) of the lepton transverse-momentum histogram.
pub const LEPTON_PT_RANGE: (f64, f64) = (0.0, 200.0);

/// A weighted histogram with evenly spaced bins.
///
/// Alongside the weighted counts it keeps the per-bin sum of squared weights, the weight that fell
/// outside the range on either side, and the number of fills.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    bins: usize,
    range: (f64, f64),
    counts: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: usize,
}

impl Histogram {
    /// Create an empty histogram with `bins` evenly spaced bins over `range`.
    ///
    /// Fails with [`LepnuError::InvalidBinning`] if `bins` is zero or the range is empty or not
    /// finite.
    pub fn new(bins: usize, range: (f64, f64)) -> LepnuResult<Self> {
        if bins == 0 {
            return Err(LepnuError::InvalidBinning(
                "the number of bins must be greater than zero".to_string(),
            ));
        }
        if !(range.0.is_finite() && range.1.is_finite() && range.1 > range.0) {
            return Err(LepnuError::InvalidBinning(format!(
                "the range ({}, {}) must be finite with its lower edge below its upper edge",
                range.0, range.1
            )));
        }
        Ok(Self::empty(bins, range))
    }

    fn empty(bins: usize, range: (f64, f64)) -> Self {
        Self {
            bins,
            range,
            counts: vec![0.0; bins],
            sumw2: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// The lepton transverse-momentum histogram: 20 bins over 0 to 200 GeV.
    pub fn lepton_pt() -> Self {
        Self::empty(LEPTON_PT_BINS, LEPTON_PT_RANGE)
    }

    /// Add `weight` to the bin containing `value`.
    pub fn add(&mut self, value: f64, weight: f64) {
        self.entries += 1;
        match get_bin_index(value, self.bins, self.range) {
            Some(index) => {
                self.counts[index] += weight;
                self.sumw2[index] += weight * weight;
            }
            None if value < self.range.0 => self.underflow += weight,
            None => self.overflow += weight,
        }
    }

    /// Number of bins.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// The histogram range.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// Weighted counts per bin.
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Sum of squared weights per bin.
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    /// Statistical error per bin, $`\sqrt{\sum w^2}`$.
    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|w2| w2.sqrt()).collect()
    }

    /// Bin edges (one more than the number of bins).
    pub fn bin_edges(&self) -> Vec<f64> {
        get_bin_edges(self.bins, self.range)
    }

    /// Bin centers.
    pub fn bin_centers(&self) -> Vec<f64> {
        self.bin_edges()
            .windows(2)
            .map(|edges| 0.5 * (edges[0] + edges[1]))
            .collect()
    }

    /// Sum of in-range weighted counts.
    pub fn total(&self) -> f64 {
        self.counts
            .iter()
            .copied()
            .sum_with_accumulator::<Klein<f64>>()
    }

    /// Number of fills, in range or not.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Weight filled below the range.
    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    /// Weight filled at or above the upper edge.
    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    fn binning(&self) -> String {
        format!("{} bins in [{}, {})", self.bins, self.range.0, self.range.1)
    }

    pub(crate) fn accumulate(&mut self, other: &Self) {
        for (count, value) in self.counts.iter_mut().zip(&other.counts) {
            *count += value;
        }
        for (sumw2, value) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *sumw2 += value;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.entries += other.entries;
    }

    /// Add another histogram bin by bin.
    ///
    /// Fails with [`LepnuError::BinningMismatch`] unless both histograms share the same binning.
    pub fn merge(&mut self, other: &Self) -> LepnuResult<()> {
        if self.bins != other.bins || self.range != other.range {
            return Err(LepnuError::BinningMismatch {
                left: self.binning(),
                right: other.binning(),
            });
        }
        self.accumulate(other);
        Ok(())
    }

    /// A copy with every weight multiplied by `factor` (squared weights by `factor²`).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            bins: self.bins,
            range: self.range,
            counts: self.counts.iter().map(|c| c * factor).collect(),
            sumw2: self.sumw2.iter().map(|w| w * factor * factor).collect(),
            underflow: self.underflow * factor,
            overflow: self.overflow * factor,
            entries: self.entries,
        }
    }
}

impl_op_ex!(*|a: &Histogram, b: &f64| -> Histogram { a.scaled(*b) });

/// A histogram together with the metadata needed to draw it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedHistogram {
    /// The filled histogram.
    pub histogram: Histogram,
    /// Whether the histogram comes from simulation (drawn stacked) or measured data (drawn as
    /// markers).
    pub is_simulated: bool,
    /// Optional color as `#rrggbb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Number of events which passed the selection.
    pub pass_count: usize,
}

/// Histograms keyed by dataset name, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistogramCollection(IndexMap<String, NamedHistogram>);

impl HistogramCollection {
    /// An empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the histogram for `name`, keeping the original position on
    /// replacement.
    pub fn insert<S: Into<String>>(&mut self, name: S, histogram: NamedHistogram) {
        self.0.insert(name.into(), histogram);
    }

    /// Look up a histogram by name.
    pub fn get(&self, name: &str) -> Option<&NamedHistogram> {
        self.0.get(name)
    }

    /// Number of histograms.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NamedHistogram)> {
        self.0.iter().map(|(name, histogram)| (name.as_str(), histogram))
    }

    /// Dataset names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The simulated histograms, in insertion order.
    pub fn simulated(&self) -> impl Iterator<Item = (&str, &NamedHistogram)> {
        self.iter().filter(|(_, histogram)| histogram.is_simulated)
    }

    /// The measured histograms, in insertion order.
    pub fn measured(&self) -> impl Iterator<Item = (&str, &NamedHistogram)> {
        self.iter().filter(|(_, histogram)| !histogram.is_simulated)
    }
}

impl FromIterator<(String, NamedHistogram)> for HistogramCollection {
    fn from_iter<T: IntoIterator<Item = (String, NamedHistogram)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fill_and_flow() {
        let mut h = Histogram::lepton_pt();
        h.add(40.0, 2.0);
        h.add(45.0, 1.0);
        h.add(-1.0, 0.5);
        h.add(200.0, 3.0);
        h.add(250.0, 1.0);
        assert_eq!(h.counts()[4], 3.0);
        assert_eq!(h.sumw2()[4], 5.0);
        assert_relative_eq!(h.errors()[4], 5.0_f64.sqrt());
        assert_eq!(h.underflow(), 0.5);
        assert_eq!(h.overflow(), 4.0);
        assert_eq!(h.entries(), 5);
        assert_relative_eq!(h.total(), 3.0);
    }

    #[test]
    fn test_edges_and_centers() {
        let h = Histogram::lepton_pt();
        let edges = h.bin_edges();
        assert_eq!(edges.len(), 21);
        assert_relative_eq!(edges[0], 0.0);
        assert_relative_eq!(edges[20], 200.0);
        assert_relative_eq!(h.bin_centers()[0], 5.0);
        assert_eq!(h.bins(), LEPTON_PT_BINS);
        assert_eq!(h.range(), LEPTON_PT_RANGE);
    }

    #[test]
    fn test_merge() {
        let mut a = Histogram::lepton_pt();
        let mut b = Histogram::lepton_pt();
        a.add(10.0, 1.0);
        b.add(10.0, 2.0);
        b.add(150.0, 0.5);
        a.merge(&b).unwrap();
        assert_eq!(a.counts()[1], 3.0);
        assert_eq!(a.sumw2()[1], 5.0);
        assert_eq!(a.counts()[15], 0.5);
        assert_eq!(a.entries(), 3);
    }

    #[test]
    fn test_merge_rejects_different_binning() {
        let mut a = Histogram::lepton_pt();
        let b = Histogram::new(10, (0.0, 200.0)).unwrap();
        assert!(matches!(
            a.merge(&b),
            Err(LepnuError::BinningMismatch { .. })
        ));
    }

    #[test]
    fn test_scaled() {
        let mut h = Histogram::lepton_pt();
        h.add(60.0, 1.5);
        let doubled = &h * 2.0;
        assert_eq!(doubled.counts()[6], 3.0);
        assert_eq!(doubled.sumw2()[6], 9.0);
        assert_eq!(doubled.entries(), 1);
    }

    #[test]
    fn test_invalid_binning_is_rejected() {
        for (bins, range) in [
            (5, (1.0, 1.0)),
            (5, (2.0, 1.0)),
            (0, (0.0, 200.0)),
            (5, (0.0, f64::INFINITY)),
            (5, (f64::NAN, 1.0)),
        ] {
            assert!(matches!(
                Histogram::new(bins, range),
                Err(LepnuError::InvalidBinning(_))
            ));
        }
        let histogram = Histogram::new(LEPTON_PT_BINS, LEPTON_PT_RANGE).unwrap();
        assert_eq!(histogram, Histogram::lepton_pt());
    }

    #[test]
    fn test_collection_order_and_filters() {
        let mut collection = HistogramCollection::new();
        for (name, is_simulated) in [("data", false), ("wjets", true), ("ttbar", true)] {
            collection.insert(
                name,
                NamedHistogram {
                    histogram: Histogram::lepton_pt(),
                    is_simulated,
                    color: None,
                    pass_count: 0,
                },
            );
        }
        assert_eq!(collection.names().collect::<Vec<_>>(), ["data", "wjets", "ttbar"]);
        assert_eq!(
            collection.simulated().map(|(n, _)| n).collect::<Vec<_>>(),
            ["wjets", "ttbar"]
        );
        assert_eq!(collection.measured().count(), 1);
        assert_eq!(collection.len(), 3);
        assert!(collection.get("zjets").is_none());
    }
}
