//! `lepnu` selects events with exactly one well-identified, isolated muon and significant missing
//! transverse momentum (the signature of a leptonically decaying $`W`$ boson), fills a weighted
//! histogram of the muon's transverse momentum for every configured dataset, and draws the
//! simulated datasets stacked against the measured ones.
//!
//! # Selection
//! A lepton is *good* if it is a muon (PDG code 13) with the tight quality bit (512) set,
//! $`p_T \geq 25`$ GeV, $`\eta \leq 2.5`$ and both relative isolations at most 0.1. Events with
//! exactly one good lepton pass if
//! ```math
//! m_T = \sqrt{2 p_T^{\ell} E_T^{\text{miss}} (1 - \cos\Delta\phi)} \geq 30\text{ GeV}
//! ```
//! and $`E_T^{\text{miss}} \geq 30`$ GeV. Each passing event adds its lepton's $`p_T`$ (GeV) to a
//! 20-bin histogram over $`[0, 200)`$ GeV, weighted by the dataset's luminosity weight and, for
//! simulation, by the event's generator weight and pileup scale factor.
//!
//! # Quick Start
//! ```rust,no_run
//! use lepnu::{run_all, AnalysisConfig, LepnuResult};
//!
//! fn main() -> LepnuResult<()> {
//!     let config = AnalysisConfig::from_path("analysis.yaml")?;
//!     let histograms = run_all(&config)?;
//!     for (name, histogram) in histograms.iter() {
//!         println!("{name}: {} events", histogram.histogram.total());
//!     }
//!     lepnu::plot::render_overlay(&histograms, &config.overlay_options(), "lepton_pt.png")
//! }
//! ```
//!
//! # Data Format
//! Datasets are ROOT files holding a flat tree (`mini` by default) or Parquet files with the same
//! columns. Per-event lepton quantities (`lep_pt`, `lep_eta`, `lep_phi`, `lep_E`, `lep_type`,
//! `lep_flag`, `lep_etcone20`, `lep_ptcone30`, ...) are arrays with `lep_n` valid entries;
//! `met_et` and `met_phi` describe the missing momentum and `mcWeight` and `scaleFactor_PILEUP`
//! are only read for simulation. Energies and momenta are stored in MeV. The `lepnu convert`
//! command turns ROOT trees into Parquet files.
#![warn(clippy::perf, clippy::style, missing_docs)]

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::info;

/// The YAML/JSON analysis configuration.
pub mod config;

/// Methods for loading and storing event data.
pub mod data {
    pub use lepnu_core::data::io::canonicalize_dataset_path;
    pub use lepnu_core::data::{
        read_events, read_parquet, read_root, resolve_location, test_event, test_muon,
        validate_sample_fraction, write_parquet, write_root, DatasetDescriptor, DatasetReadOptions,
        DatasetWriteOptions, EventIter, EventRecord, EventSource, EventTable, FloatPrecision,
        Lepton, DEFAULT_TREE, MAX_LEPTONS,
    };
}
/// Weighted histograms and collections of them.
pub mod histogram {
    pub use lepnu_core::histogram::*;
}
/// The event selection.
pub mod selection {
    pub use lepnu_core::selection::*;
}
/// Utility functions, enums, and four-vectors.
pub mod utils {
    pub use lepnu_core::utils::*;
}
/// Drawing histogram overlays.
pub mod plot {
    pub use lepnu_plot::*;
}

pub use crate::config::{AnalysisConfig, LuminosityWeight, SampleConfig};
pub use lepnu_core::{
    event_weight, read_events, run_analysis, run_analysis_with_options, select_and_fill,
    select_event, transverse_mass, AnalysisOutput, CutFlow, DatasetDescriptor,
    DatasetReadOptions, EventRecord, EventSource, EventTable, Histogram, HistogramCollection,
    Lepton, NamedHistogram, ParticleType, Selection, Vec3, Vec4, DEFAULT_SAMPLE_FRACTION,
};
pub use lepnu_core::{LepnuError, LepnuResult};

/// Run the selection over every sample of `config`.
///
/// Samples are processed concurrently when the `rayon` feature is enabled; the returned
/// collection always follows the configuration order. The first failing sample aborts the run.
pub fn run_all(config: &config::AnalysisConfig) -> LepnuResult<HistogramCollection> {
    let options = config.read_options();
    let descriptors = config.descriptors();
    info!(
        samples = descriptors.len(),
        fraction = options.sample_fraction,
        "running analysis"
    );
    #[cfg(feature = "rayon")]
    let outputs = descriptors
        .par_iter()
        .map(|descriptor| run_analysis_with_options(descriptor, &options))
        .collect::<LepnuResult<Vec<AnalysisOutput>>>()?;
    #[cfg(not(feature = "rayon"))]
    let outputs = descriptors
        .iter()
        .map(|descriptor| run_analysis_with_options(descriptor, &options))
        .collect::<LepnuResult<Vec<AnalysisOutput>>>()?;
    Ok(descriptors
        .iter()
        .zip(outputs)
        .map(|(descriptor, output)| (descriptor.name.clone(), output.into_named(descriptor)))
        .collect())
}

/// [`run_all`] on a dedicated pool of `threads` threads (`0` uses the global pool).
#[cfg(feature = "rayon")]
pub fn run_all_with_threads(
    config: &config::AnalysisConfig,
    threads: usize,
) -> LepnuResult<HistogramCollection> {
    if threads == 0 {
        return run_all(config);
    }
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    pool.install(|| run_all(config))
}

/// [`run_all`] on the calling thread; the thread count is ignored without the `rayon` feature.
#[cfg(not(feature = "rayon"))]
pub fn run_all_with_threads(
    config: &config::AnalysisConfig,
    threads: usize,
) -> LepnuResult<HistogramCollection> {
    if threads > 1 {
        tracing::warn!(threads, "built without rayon, running on a single thread");
    }
    run_all(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{test_muon, write_parquet, DatasetWriteOptions};
    use std::{env, fs, path::PathBuf};

    fn temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("lepnu_run_all_{}", fastrand::u64(..)));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_sample(dir: &std::path::Path, name: &str, muon_pts: &[f64]) -> String {
        let table: EventTable = muon_pts
            .iter()
            .map(|&pt| {
                EventRecord::new(vec![test_muon(pt, 0.0, 0.0)], 50_000.0, std::f64::consts::PI)
                    .unwrap()
                    .with_simulation_weights(2.0, 0.5)
            })
            .collect();
        let path = dir.join(format!("{name}.parquet")).to_string_lossy().into_owned();
        write_parquet(&table, &path, &DatasetWriteOptions::default()).unwrap();
        path
    }

    #[test]
    fn test_run_all_keeps_configuration_order() {
        let dir = temp_dir();
        let data = write_sample(&dir, "data", &[40.0, 55.0, 10.0]);
        let wjets = write_sample(&dir, "wjets", &[40.0, 45.0, 150.0, 30.0]);
        let ttbar = write_sample(&dir, "ttbar", &[90.0]);
        let text = format!(
            "sample_fraction: 1.0\nsamples:\n  - {{name: data, location: '{data}'}}\n  - {{name: wjets, location: '{wjets}', simulated: true, weight: 0.5}}\n  - {{name: ttbar, location: '{ttbar}', simulated: true, weight: 3.0, color: '#00ff00'}}\n"
        );
        let config = AnalysisConfig::from_yaml_str(&text).unwrap();
        let histograms = run_all(&config).unwrap();
        assert_eq!(run_all_with_threads(&config, 2).unwrap(), histograms);
        assert_eq!(
            histograms.names().collect::<Vec<_>>(),
            ["data", "wjets", "ttbar"]
        );

        let data = histograms.get("data").unwrap();
        assert!(!data.is_simulated);
        assert_eq!(data.pass_count, 2);
        assert_eq!(data.histogram.counts()[4], 1.0);
        assert_eq!(data.histogram.counts()[5], 1.0);

        let wjets = histograms.get("wjets").unwrap();
        assert_eq!(wjets.pass_count, 4);
        assert_eq!(wjets.histogram.counts()[4], 1.0);
        assert_eq!(wjets.histogram.counts()[15], 0.5);

        let ttbar = histograms.get("ttbar").unwrap();
        assert_eq!(ttbar.histogram.counts()[9], 3.0);
        assert_eq!(ttbar.color.as_deref(), Some("#00ff00"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_run_all_reports_missing_dataset() {
        let config = AnalysisConfig::from_yaml_str(
            "samples: [{name: gone, location: /nonexistent/lepnu/sample.parquet}]",
        )
        .unwrap();
        assert!(run_all(&config).is_err());
    }
}
