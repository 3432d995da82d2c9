use std::fmt::Display;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    data::{
        read_events, validate_sample_fraction, DatasetDescriptor, DatasetReadOptions,
        EventRecord, EventSource, Lepton,
    },
    histogram::{Histogram, NamedHistogram},
    utils::{enums::ParticleType, vectors::transverse_mass},
    LepnuResult,
};

/// Quality bit which marks a tightly identified lepton.
pub const TIGHT_QUALITY_BIT: u32 = 512;
/// Minimum lepton transverse momentum (MeV).
pub const MIN_LEPTON_PT: f64 = 25_000.0;
/// Maximum lepton pseudorapidity. The cut is one-sided.
pub const MAX_LEPTON_ETA: f64 = 2.5;
/// Maximum isolation energy relative to the lepton transverse momentum, for both cones.
pub const MAX_RELATIVE_ISOLATION: f64 = 0.1;
/// Minimum transverse mass (GeV).
pub const MIN_TRANSVERSE_MASS: f64 = 30.0;
/// Minimum missing transverse momentum (GeV).
pub const MIN_MISSING_ET: f64 = 30.0;
/// Fraction of each dataset processed unless told otherwise.
pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.1;

/// Whether a lepton is a well-identified, isolated muon above threshold.
pub fn is_good_lepton(lepton: &Lepton) -> bool {
    lepton.kind() == ParticleType::Muon
        && lepton.quality_flag & TIGHT_QUALITY_BIT != 0
        && lepton.pt >= MIN_LEPTON_PT
        && lepton.eta <= MAX_LEPTON_ETA
        && lepton.isolation_cone20 / lepton.pt <= MAX_RELATIVE_ISOLATION
        && lepton.isolation_cone30 / lepton.pt <= MAX_RELATIVE_ISOLATION
}

/// The value cuts applied after reconstruction; both bounds are inclusive (GeV).
pub fn passes_kinematic_cuts(transverse_mass: f64, missing_et: f64) -> bool {
    transverse_mass >= MIN_TRANSVERSE_MASS && missing_et >= MIN_MISSING_ET
}

/// The reconstructed quantities of an event which passed the selection.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SelectedEvent {
    /// Position of the selected lepton in the event.
    pub lepton_index: usize,
    /// The selected lepton.
    pub lepton: Lepton,
    /// Lepton transverse momentum (GeV), recomputed from the components of
    /// [`Lepton::p4`] rather than copied from the stored `pt`. The two agree to rounding, so a
    /// stored value exactly on a bin edge can land in the bin below.
    pub lepton_pt: f64,
    /// Missing transverse momentum (GeV).
    pub missing_et: f64,
    /// Transverse mass of the lepton and the missing momentum (GeV).
    pub transverse_mass: f64,
}

/// The outcome of the selection for one event.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Selection {
    /// No lepton passed the quality requirements.
    NoGoodLepton,
    /// More than one lepton passed the quality requirements.
    MultipleGoodLeptons(usize),
    /// The transverse mass (GeV) is below [`MIN_TRANSVERSE_MASS`].
    TransverseMassTooLow(f64),
    /// The missing transverse momentum (GeV) is below [`MIN_MISSING_ET`].
    MissingEtTooLow(f64),
    /// The event passed every cut.
    Passed(SelectedEvent),
}

impl Selection {
    /// The selected event, if the event passed.
    pub fn passed(&self) -> Option<&SelectedEvent> {
        match self {
            Selection::Passed(selected) => Some(selected),
            _ => None,
        }
    }
}

/// Apply the full selection to one event.
///
/// When several leptons pass the quality requirements the event is vetoed, so the choice among
/// them never matters; the last good lepton is the one reconstructed. The histogrammed
/// [`SelectedEvent::lepton_pt`] is the transverse momentum of the reconstructed four-vector.
pub fn select_event(event: &EventRecord) -> Selection {
    let mut n_good = 0;
    let mut good_index = 0;
    for (index, lepton) in event.leptons().iter().enumerate() {
        if is_good_lepton(lepton) {
            n_good += 1;
            good_index = index;
        }
    }
    match n_good {
        0 => return Selection::NoGoodLepton,
        1 => {}
        n => return Selection::MultipleGoodLeptons(n),
    }
    let lepton = event.leptons()[good_index];
    let lepton_p4 = lepton.p4();
    let missing = event.missing_momentum();
    let mt = transverse_mass(&lepton_p4, &missing);
    let missing_et = missing.pt();
    if !passes_kinematic_cuts(mt, missing_et) {
        return if mt >= MIN_TRANSVERSE_MASS {
            Selection::MissingEtTooLow(missing_et)
        } else {
            Selection::TransverseMassTooLow(mt)
        };
    }
    Selection::Passed(SelectedEvent {
        lepton_index: good_index,
        lepton,
        lepton_pt: lepton_p4.pt(),
        missing_et,
        transverse_mass: mt,
    })
}

/// The histogram weight of an event: the product of the per-event simulation weights and the
/// dataset normalization for simulation, the normalization alone for measured data.
pub fn event_weight(event: &EventRecord, dataset: &DatasetDescriptor) -> f64 {
    if dataset.is_simulated {
        event.mc_weight * dataset.luminosity_weight * event.pileup_scale_factor
    } else {
        dataset.luminosity_weight
    }
}

/// Per-stage tally of the selection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutFlow {
    /// Events looked at.
    pub processed: usize,
    /// Events without a good lepton.
    pub no_good_lepton: usize,
    /// Events with more than one good lepton.
    pub multiple_good_leptons: usize,
    /// Events failing the transverse mass cut.
    pub failed_transverse_mass: usize,
    /// Events failing the missing transverse momentum cut.
    pub failed_missing_et: usize,
    /// Events passing every cut.
    pub passed: usize,
}

impl CutFlow {
    /// Count one event.
    pub fn record(&mut self, selection: &Selection) {
        self.processed += 1;
        match selection {
            Selection::NoGoodLepton => self.no_good_lepton += 1,
            Selection::MultipleGoodLeptons(_) => self.multiple_good_leptons += 1,
            Selection::TransverseMassTooLow(_) => self.failed_transverse_mass += 1,
            Selection::MissingEtTooLow(_) => self.failed_missing_et += 1,
            Selection::Passed(_) => self.passed += 1,
        }
    }

    /// Add the counts of another cut flow.
    pub fn merge(&mut self, other: &Self) {
        self.processed += other.processed;
        self.no_good_lepton += other.no_good_lepton;
        self.multiple_good_leptons += other.multiple_good_leptons;
        self.failed_transverse_mass += other.failed_transverse_mass;
        self.failed_missing_et += other.failed_missing_et;
        self.passed += other.passed;
    }
}

impl Display for CutFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "processed:              {}", self.processed)?;
        writeln!(f, "no good lepton:         {}", self.no_good_lepton)?;
        writeln!(f, "multiple good leptons:  {}", self.multiple_good_leptons)?;
        writeln!(f, "transverse mass < {MIN_TRANSVERSE_MASS}:  {}", self.failed_transverse_mass)?;
        writeln!(f, "missing E_T < {MIN_MISSING_ET}:      {}", self.failed_missing_et)?;
        write!(f, "passed:                 {}", self.passed)
    }
}

/// The result of running the selection over one dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Lepton transverse momentum (GeV) of the passing events.
    pub histogram: Histogram,
    /// Number of passing events.
    pub pass_count: usize,
    /// Per-stage tally.
    pub cut_flow: CutFlow,
}

impl Default for AnalysisOutput {
    fn default() -> Self {
        Self {
            histogram: Histogram::lepton_pt(),
            pass_count: 0,
            cut_flow: CutFlow::default(),
        }
    }
}

impl AnalysisOutput {
    fn fill(&mut self, event: &EventRecord, dataset: &DatasetDescriptor) {
        let selection = select_event(event);
        self.cut_flow.record(&selection);
        if let Some(selected) = selection.passed() {
            self.pass_count += 1;
            self.histogram.add(selected.lepton_pt, event_weight(event, dataset));
        }
    }

    /// Combine the output of another (disjoint) part of the same dataset.
    pub fn merge(&mut self, other: &Self) -> LepnuResult<()> {
        self.histogram.merge(&other.histogram)?;
        self.pass_count += other.pass_count;
        self.cut_flow.merge(&other.cut_flow);
        Ok(())
    }

    /// Attach the dataset's drawing metadata.
    pub fn into_named(self, dataset: &DatasetDescriptor) -> NamedHistogram {
        NamedHistogram {
            histogram: self.histogram,
            is_simulated: dataset.is_simulated,
            color: dataset.color.clone(),
            pass_count: self.pass_count,
        }
    }
}

/// Run the selection over the first `n_events` events of `source`, filling a fresh lepton
/// transverse-momentum histogram.
pub fn select_and_fill<S: EventSource + ?Sized>(
    source: &S,
    dataset: &DatasetDescriptor,
    n_events: usize,
) -> AnalysisOutput {
    let n_events = n_events.min(source.n_events());
    let mut output = AnalysisOutput::default();
    for event in (0..n_events).filter_map(|index| source.event(index)) {
        output.fill(&event, dataset);
    }
    output
}

/// Parallel version of [`select_and_fill`]: events are split across the current [`rayon`]
/// thread pool and the partial histograms are added together.
#[cfg(feature = "rayon")]
pub fn par_select_and_fill<S: EventSource + Sync + ?Sized>(
    source: &S,
    dataset: &DatasetDescriptor,
    n_events: usize,
) -> AnalysisOutput {
    let n_events = n_events.min(source.n_events());
    (0..n_events)
        .into_par_iter()
        .fold(AnalysisOutput::default, |mut output, index| {
            if let Some(event) = source.event(index) {
                output.fill(&event, dataset);
            }
            output
        })
        .reduce(AnalysisOutput::default, |mut left, right| {
            left.histogram.accumulate(&right.histogram);
            left.pass_count += right.pass_count;
            left.cut_flow.merge(&right.cut_flow);
            left
        })
}

/// Read a dataset and run the selection over the first `floor(total * sample_fraction)` events.
///
/// See [`DEFAULT_SAMPLE_FRACTION`] for the conventional fraction.
pub fn run_analysis(
    dataset: &DatasetDescriptor,
    sample_fraction: f64,
) -> LepnuResult<AnalysisOutput> {
    run_analysis_with_options(
        dataset,
        &DatasetReadOptions::new().sample_fraction(sample_fraction),
    )
}

/// Like [`run_analysis`], with full control over how the dataset is read. The simulation flag of
/// `options` is replaced by the descriptor's.
pub fn run_analysis_with_options(
    dataset: &DatasetDescriptor,
    options: &DatasetReadOptions,
) -> LepnuResult<AnalysisOutput> {
    validate_sample_fraction(options.sample_fraction)?;
    let options = options.clone().simulated(dataset.is_simulated);
    info!(
        dataset = %dataset.name,
        location = %dataset.source_location,
        fraction = options.sample_fraction,
        "processing dataset"
    );
    let table = read_events(&dataset.source_location, &options)?;
    let n_events = table.len();
    #[cfg(feature = "rayon")]
    let output = par_select_and_fill(&table, dataset, n_events);
    #[cfg(not(feature = "rayon"))]
    let output = select_and_fill(&table, dataset, n_events);
    info!(
        dataset = %dataset.name,
        processed = output.cut_flow.processed,
        passed = output.pass_count,
        total = output.histogram.total(),
        "finished dataset"
    );
    debug!(dataset = %dataset.name, "cut flow\n{}", output.cut_flow);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{test_event, test_muon, write_parquet, DatasetWriteOptions, EventTable},
        utils::MEV_TO_GEV,
        LepnuError,
    };
    use approx::assert_relative_eq;
    use std::{env, f64::consts::PI, fs};

    fn event(leptons: Vec<Lepton>, met_gev: f64, met_phi: f64) -> EventRecord {
        EventRecord::new(leptons, met_gev * 1000.0, met_phi).unwrap()
    }

    /// Ten events of which three (muons of 40, 60 and 90 GeV) pass.
    fn ten_events() -> Vec<EventRecord> {
        let electron = Lepton {
            particle_type: 11,
            ..test_muon(50.0, 0.0, 0.0)
        };
        let loose = Lepton {
            quality_flag: 0,
            ..test_muon(50.0, 0.0, 0.0)
        };
        let mut non_isolated = test_muon(50.0, 0.0, 0.0);
        non_isolated.isolation_cone20 = 0.2 * non_isolated.pt;
        vec![
            event(vec![test_muon(40.0, 0.5, 0.0)], 50.0, PI),
            event(vec![], 80.0, 1.0),
            event(vec![test_muon(60.0, -1.0, 0.0)], 40.0, PI),
            event(vec![electron], 60.0, PI),
            event(
                vec![test_muon(45.0, 0.1, 0.0), test_muon(35.0, 0.2, 2.0)],
                60.0,
                PI,
            ),
            event(vec![test_muon(90.0, 2.0, 0.0), electron], 35.0, PI / 2.0),
            event(vec![test_muon(50.0, 0.0, 1.0)], 50.0, 1.0),
            event(vec![test_muon(50.0, 0.0, 0.0)], 20.0, PI),
            event(vec![loose], 60.0, PI),
            event(vec![non_isolated], 60.0, PI),
        ]
        .into_iter()
        .map(|e| e.with_simulation_weights(3.0, 0.5))
        .collect()
    }

    #[test]
    fn test_end_to_end_measured() {
        let dataset = DatasetDescriptor::new("data", "memory", false, 2.0);
        let events = ten_events();
        let output = select_and_fill(&events, &dataset, events.len());
        assert_eq!(output.pass_count, 3);
        assert_eq!(output.histogram.entries(), 3);
        let counts = output.histogram.counts();
        for (bin, count) in counts.iter().enumerate() {
            let expected = if [4, 6, 9].contains(&bin) { 2.0 } else { 0.0 };
            assert_eq!(*count, expected, "bin {bin}");
        }
        assert_eq!(
            output.cut_flow,
            CutFlow {
                processed: 10,
                no_good_lepton: 4,
                multiple_good_leptons: 1,
                failed_transverse_mass: 1,
                failed_missing_et: 1,
                passed: 3,
            }
        );
    }

    #[test]
    fn test_end_to_end_simulated_weights() {
        let dataset = DatasetDescriptor::new("wjets", "memory", true, 2.0);
        let events = ten_events();
        let output = select_and_fill(&events, &dataset, events.len());
        assert_relative_eq!(output.histogram.counts()[4], 3.0 * 2.0 * 0.5);
        assert_relative_eq!(output.histogram.total(), 9.0);
    }

    #[test]
    fn test_n_events_limits_processing() {
        let dataset = DatasetDescriptor::new("data", "memory", false, 1.0);
        let events = ten_events();
        let output = select_and_fill(&events, &dataset, 3);
        assert_eq!(output.cut_flow.processed, 3);
        assert_eq!(output.pass_count, 2);
        let all = select_and_fill(&events, &dataset, 1000);
        assert_eq!(all.cut_flow.processed, 10);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_matches_serial() {
        let dataset = DatasetDescriptor::new("wjets", "memory", true, 0.7);
        let table: EventTable = (0..50).flat_map(|_| ten_events()).collect();
        let serial = select_and_fill(&table, &dataset, table.len());
        let parallel = par_select_and_fill(&table, &dataset, table.len());
        assert_eq!(serial.pass_count, parallel.pass_count);
        assert_eq!(serial.cut_flow, parallel.cut_flow);
        for (s, p) in serial
            .histogram
            .counts()
            .iter()
            .zip(parallel.histogram.counts())
        {
            assert_relative_eq!(*s, *p, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_zero_leptons_never_pass() {
        for met in [0.0, 30.0, 500.0] {
            assert_eq!(
                select_event(&event(vec![], met, 0.0)),
                Selection::NoGoodLepton
            );
        }
    }

    #[test]
    fn test_single_good_lepton_passes_veto() {
        let bad = Lepton {
            pt: 10_000.0,
            ..test_muon(10.0, 0.0, 0.0)
        };
        let selection = select_event(&event(vec![bad, test_muon(40.0, 0.0, 0.0), bad], 50.0, PI));
        let selected = selection.passed().copied().unwrap();
        assert_eq!(selected.lepton_index, 1);
        assert_relative_eq!(selected.lepton_pt, 40.0, epsilon = 1e-9);
        assert_relative_eq!(selected.missing_et, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_lepton_pt_comes_from_four_vector() {
        for (pt, eta, phi) in [(40.0, 0.0, 0.0), (73.3, -1.7, 2.9), (125.0, 2.4, -3.1)] {
            let muon = test_muon(pt, eta, phi);
            let selection = select_event(&event(vec![muon], 80.0, phi + PI));
            let selected = selection.passed().copied().unwrap();
            assert_eq!(selected.lepton_pt, muon.p4().pt());
            assert_relative_eq!(selected.lepton_pt, muon.pt * MEV_TO_GEV, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_two_good_leptons_vetoed() {
        let selection = select_event(&event(
            vec![test_muon(40.0, 0.0, 0.0), test_muon(30.0, 1.0, 1.0)],
            50.0,
            PI,
        ));
        assert_eq!(selection, Selection::MultipleGoodLeptons(2));
    }

    #[test]
    fn test_lepton_quality_requirements() {
        let good = test_muon(30.0, 0.0, 0.0);
        assert!(is_good_lepton(&good));
        assert!(!is_good_lepton(&Lepton {
            particle_type: 11,
            ..good
        }));
        assert!(!is_good_lepton(&Lepton {
            quality_flag: 511,
            ..good
        }));
        assert!(is_good_lepton(&Lepton {
            quality_flag: 512 | 3,
            ..good
        }));
        assert!(is_good_lepton(&Lepton {
            pt: MIN_LEPTON_PT,
            ..good
        }));
        assert!(!is_good_lepton(&Lepton {
            pt: MIN_LEPTON_PT - 1.0,
            ..good
        }));
        assert!(is_good_lepton(&Lepton {
            isolation_cone20: 0.1 * good.pt,
            isolation_cone30: 0.1 * good.pt,
            ..good
        }));
        assert!(!is_good_lepton(&Lepton {
            isolation_cone30: 0.11 * good.pt,
            ..good
        }));
    }

    #[test]
    fn test_eta_boundary() {
        let good = test_muon(30.0, 0.0, 0.0);
        assert!(is_good_lepton(&Lepton { eta: 2.5, ..good }));
        assert!(!is_good_lepton(&Lepton {
            eta: 2.50001,
            ..good
        }));
        assert!(is_good_lepton(&Lepton { eta: -3.0, ..good }));
    }

    #[test]
    fn test_kinematic_cut_boundaries() {
        assert!(passes_kinematic_cuts(30.0, 30.0));
        assert!(!passes_kinematic_cuts(29.999_999, 50.0));
        assert!(!passes_kinematic_cuts(50.0, 29.999_999));
        assert!(passes_kinematic_cuts(200.0, 100.0));
    }

    #[test]
    fn test_failure_stages() {
        let aligned = select_event(&event(vec![test_muon(50.0, 0.0, 1.0)], 50.0, 1.0));
        assert!(matches!(aligned, Selection::TransverseMassTooLow(mt) if mt < 1e-6));
        let soft = select_event(&event(vec![test_muon(50.0, 0.0, 0.0)], 20.0, PI));
        assert!(matches!(soft, Selection::MissingEtTooLow(met) if (met - 20.0).abs() < 1e-9));
    }

    #[test]
    fn test_transverse_mass_sign_of_delta_phi() {
        let a = select_event(&event(vec![test_muon(40.0, 0.0, 0.3)], 45.0, 2.1));
        let b = select_event(&event(vec![test_muon(40.0, 0.0, -0.3)], 45.0, -2.1));
        let (a, b) = (a.passed().copied().unwrap(), b.passed().copied().unwrap());
        assert_relative_eq!(a.transverse_mass, b.transverse_mass, epsilon = 1e-9);
    }

    #[test]
    fn test_linearity_in_weight() {
        let events = ten_events();
        let single = DatasetDescriptor::new("wjets", "memory", true, 1.3);
        let doubled = DatasetDescriptor::new("wjets", "memory", true, 2.6);
        let mut twice = select_and_fill(&events, &single, events.len());
        twice
            .merge(&select_and_fill(&events, &single, events.len()))
            .unwrap();
        let once = select_and_fill(&events, &doubled, events.len());
        for (t, o) in twice.histogram.counts().iter().zip(once.histogram.counts()) {
            assert_relative_eq!(*t, *o, epsilon = 1e-12);
        }
        assert_eq!(twice.pass_count, 2 * once.pass_count);
    }

    #[test]
    fn test_measured_weight_ignores_record() {
        let dataset = DatasetDescriptor::new("data", "memory", false, 0.25);
        let record = test_event().with_simulation_weights(7.0, 3.0);
        assert_eq!(event_weight(&record, &dataset), 0.25);
        let simulated = DatasetDescriptor::new("mc", "memory", true, 0.25);
        assert_relative_eq!(event_weight(&record, &simulated), 7.0 * 0.25 * 3.0);
    }

    #[test]
    fn test_run_analysis_reads_sampled_prefix() {
        let dir = env::temp_dir().join(format!("lepnu_test_{}", fastrand::u64(..)));
        fs::create_dir(&dir).unwrap();
        let path = dir.join("ten.parquet");
        let path_str = path.to_str().unwrap();
        let table: EventTable = ten_events().into_iter().collect();
        write_parquet(&table, path_str, &DatasetWriteOptions::default()).unwrap();

        let dataset = DatasetDescriptor::new("data", path_str, false, 2.0);
        let full = run_analysis(&dataset, 1.0).unwrap();
        assert_eq!(full.pass_count, 3);
        assert_eq!(full.histogram.counts()[9], 2.0);

        let half = run_analysis(&dataset, 0.5).unwrap();
        assert_eq!(half.cut_flow.processed, 5);
        assert_eq!(half.pass_count, 2);

        let sampled = run_analysis(&dataset, DEFAULT_SAMPLE_FRACTION).unwrap();
        assert_eq!(sampled.cut_flow.processed, 1);

        assert!(matches!(
            run_analysis(&dataset, 1.5),
            Err(LepnuError::InvalidSampleFraction(_))
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
