use std::{fmt::Display, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    utils::{enums::ParticleType, vectors::Vec4, MEV_TO_GEV},
    LepnuError, LepnuResult,
};

/// Dataset I/O implementations (ROOT, Parquet and remote retrieval).
pub mod io;

pub use io::{
    read_events, read_parquet, read_root, resolve_location, write_parquet, write_root,
};

/// The number of lepton slots available in every event.
pub const MAX_LEPTONS: usize = 5;
/// The tree read from ROOT files unless [`DatasetReadOptions::tree`] says otherwise.
pub const DEFAULT_TREE: &str = "mini";
/// Number of events per record batch when writing Parquet.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 10_000;

/// A reconstructed lepton as stored in the input tables.
///
/// Momenta and energies are in the native detector unit (MeV); see [`Lepton::p4`] for the
/// working-unit four-vector.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Lepton {
    /// Transverse momentum.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuthal angle.
    pub phi: f64,
    /// Energy.
    pub energy: f64,
    /// Species code (11 = electron, 13 = muon).
    pub particle_type: i32,
    /// Reconstruction quality bitmask.
    pub quality_flag: u32,
    /// Calorimeter isolation in a cone of $`\Delta R = 0.2`$.
    pub isolation_cone20: f64,
    /// Track isolation in a cone of $`\Delta R = 0.3`$.
    pub isolation_cone30: f64,
    /// Electric charge.
    pub charge: i32,
    /// Longitudinal impact parameter.
    pub z0: f64,
    /// Transverse impact parameter.
    pub d0: f64,
}

impl Lepton {
    /// The species of this lepton.
    pub fn kind(&self) -> ParticleType {
        ParticleType::from_code(self.particle_type)
    }

    /// The four-momentum in GeV.
    pub fn p4(&self) -> Vec4 {
        Vec4::from_pt_eta_phi_e(
            self.pt * MEV_TO_GEV,
            self.eta,
            self.phi,
            self.energy * MEV_TO_GEV,
        )
    }
}

/// A single event: the reconstructed leptons, the missing transverse momentum and (for
/// simulation) the per-event weights.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    leptons: Vec<Lepton>,
    /// Magnitude of the missing transverse momentum (MeV).
    pub missing_et: f64,
    /// Azimuth of the missing transverse momentum.
    pub missing_phi: f64,
    /// Generator weight (1.0 for measured data).
    pub mc_weight: f64,
    /// Pile-up correction factor (1.0 for measured data).
    pub pileup_scale_factor: f64,
}

impl EventRecord {
    /// Build an event with unit simulation weights.
    ///
    /// Fails with [`LepnuError::LeptonCountOutOfRange`] if more than [`MAX_LEPTONS`] leptons are
    /// given.
    pub fn new(leptons: Vec<Lepton>, missing_et: f64, missing_phi: f64) -> LepnuResult<Self> {
        if leptons.len() > MAX_LEPTONS {
            return Err(LepnuError::LeptonCountOutOfRange {
                event: 0,
                count: leptons.len(),
                capacity: MAX_LEPTONS,
            });
        }
        Ok(Self {
            leptons,
            missing_et,
            missing_phi,
            mc_weight: 1.0,
            pileup_scale_factor: 1.0,
        })
    }

    /// Attach simulation weights.
    pub fn with_simulation_weights(mut self, mc_weight: f64, pileup_scale_factor: f64) -> Self {
        self.mc_weight = mc_weight;
        self.pileup_scale_factor = pileup_scale_factor;
        self
    }

    /// Number of reconstructed leptons.
    pub fn lepton_count(&self) -> usize {
        self.leptons.len()
    }

    /// The reconstructed leptons.
    pub fn leptons(&self) -> &[Lepton] {
        &self.leptons
    }

    /// The missing transverse momentum as a massless, purely transverse four-vector in GeV.
    pub fn missing_momentum(&self) -> Vec4 {
        let met = self.missing_et * MEV_TO_GEV;
        Vec4::from_pt_eta_phi_e(met, 0.0, self.missing_phi, met)
    }
}

impl Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event:")?;
        writeln!(f, "  leptons:")?;
        for lepton in &self.leptons {
            writeln!(f, "    {} {}", lepton.kind(), lepton.p4())?;
        }
        writeln!(
            f,
            "  missing: {:.3} GeV at phi = {:.3}",
            self.missing_et * MEV_TO_GEV,
            self.missing_phi
        )?;
        writeln!(
            f,
            "  weights: mc = {}, pileup = {}",
            self.mc_weight, self.pileup_scale_factor
        )
    }
}

/// Random access to a sequence of [`EventRecord`]s.
pub trait EventSource {
    /// Total number of events available.
    fn n_events(&self) -> usize;

    /// The event at `index`, or [`None`] past the end.
    fn event(&self, index: usize) -> Option<EventRecord>;

    /// Iterate over the first `limit` events (or all of them, if fewer).
    fn iter_events(&self, limit: usize) -> EventIter<'_, Self>
    where
        Self: Sized,
    {
        EventIter {
            source: self,
            index: 0,
            end: limit.min(self.n_events()),
        }
    }
}

/// Sequential iterator returned by [`EventSource::iter_events`].
pub struct EventIter<'a, S> {
    source: &'a S,
    index: usize,
    end: usize,
}

impl<S: EventSource> Iterator for EventIter<'_, S> {
    type Item = EventRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.end {
            return None;
        }
        let event = self.source.event(self.index);
        self.index += 1;
        event
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.index;
        (remaining, Some(remaining))
    }
}

impl EventSource for [EventRecord] {
    fn n_events(&self) -> usize {
        self.len()
    }

    fn event(&self, index: usize) -> Option<EventRecord> {
        self.get(index).cloned()
    }
}

impl EventSource for Vec<EventRecord> {
    fn n_events(&self) -> usize {
        self.len()
    }

    fn event(&self, index: usize) -> Option<EventRecord> {
        self.get(index).cloned()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct LeptonColumns {
    pt: Vec<f64>,
    eta: Vec<f64>,
    phi: Vec<f64>,
    energy: Vec<f64>,
    particle_type: Vec<i32>,
    quality_flag: Vec<u32>,
    isolation_cone20: Vec<f64>,
    isolation_cone30: Vec<f64>,
    charge: Vec<i32>,
    z0: Vec<f64>,
    d0: Vec<f64>,
}

impl LeptonColumns {
    fn push(&mut self, lepton: &Lepton) {
        self.pt.push(lepton.pt);
        self.eta.push(lepton.eta);
        self.phi.push(lepton.phi);
        self.energy.push(lepton.energy);
        self.particle_type.push(lepton.particle_type);
        self.quality_flag.push(lepton.quality_flag);
        self.isolation_cone20.push(lepton.isolation_cone20);
        self.isolation_cone30.push(lepton.isolation_cone30);
        self.charge.push(lepton.charge);
        self.z0.push(lepton.z0);
        self.d0.push(lepton.d0);
    }

    fn get(&self, index: usize) -> Lepton {
        Lepton {
            pt: self.pt[index],
            eta: self.eta[index],
            phi: self.phi[index],
            energy: self.energy[index],
            particle_type: self.particle_type[index],
            quality_flag: self.quality_flag[index],
            isolation_cone20: self.isolation_cone20[index],
            isolation_cone30: self.isolation_cone30[index],
            charge: self.charge[index],
            z0: self.z0[index],
            d0: self.d0[index],
        }
    }

    fn truncate(&mut self, len: usize) {
        self.pt.truncate(len);
        self.eta.truncate(len);
        self.phi.truncate(len);
        self.energy.truncate(len);
        self.particle_type.truncate(len);
        self.quality_flag.truncate(len);
        self.isolation_cone20.truncate(len);
        self.isolation_cone30.truncate(len);
        self.charge.truncate(len);
        self.z0.truncate(len);
        self.d0.truncate(len);
    }
}

/// Columnar in-memory storage of events.
///
/// Lepton quantities are stored as flat columns; `offsets[i]..offsets[i + 1]` selects the
/// leptons belonging to event `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct EventTable {
    offsets: Vec<usize>,
    leptons: LeptonColumns,
    missing_et: Vec<f64>,
    missing_phi: Vec<f64>,
    mc_weight: Vec<f64>,
    pileup_scale_factor: Vec<f64>,
}

impl Default for EventTable {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            leptons: LeptonColumns::default(),
            missing_et: Vec::default(),
            missing_phi: Vec::default(),
            mc_weight: Vec::default(),
            pileup_scale_factor: Vec::default(),
        }
    }
}

impl EventTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a sequence of records.
    pub fn from_records<I: IntoIterator<Item = EventRecord>>(records: I) -> Self {
        let mut table = Self::new();
        for record in records {
            table.push(&record);
        }
        table
    }

    /// Append a record.
    pub fn push(&mut self, record: &EventRecord) {
        for lepton in record.leptons() {
            self.leptons.push(lepton);
        }
        self.offsets.push(self.leptons.pt.len());
        self.missing_et.push(record.missing_et);
        self.missing_phi.push(record.missing_phi);
        self.mc_weight.push(record.mc_weight);
        self.pileup_scale_factor.push(record.pileup_scale_factor);
    }

    /// Number of events stored.
    pub fn len(&self) -> usize {
        self.missing_et.len()
    }

    /// Whether the table holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of leptons over all events.
    pub fn n_leptons(&self) -> usize {
        self.leptons.pt.len()
    }

    /// Keep only the first `n_events` events.
    pub fn truncate(&mut self, n_events: usize) {
        if n_events >= self.len() {
            return;
        }
        self.offsets.truncate(n_events + 1);
        self.leptons.truncate(self.offsets[n_events]);
        self.missing_et.truncate(n_events);
        self.missing_phi.truncate(n_events);
        self.mc_weight.truncate(n_events);
        self.pileup_scale_factor.truncate(n_events);
    }

    /// Iterate over every event in the table.
    pub fn iter(&self) -> EventIter<'_, Self> {
        self.iter_events(self.len())
    }
}

impl EventSource for EventTable {
    fn n_events(&self) -> usize {
        self.len()
    }

    fn event(&self, index: usize) -> Option<EventRecord> {
        if index >= self.len() {
            return None;
        }
        let leptons = (self.offsets[index]..self.offsets[index + 1])
            .map(|i| self.leptons.get(i))
            .collect();
        Some(EventRecord {
            leptons,
            missing_et: self.missing_et[index],
            missing_phi: self.missing_phi[index],
            mc_weight: self.mc_weight[index],
            pileup_scale_factor: self.pileup_scale_factor[index],
        })
    }
}

impl FromIterator<EventRecord> for EventTable {
    fn from_iter<T: IntoIterator<Item = EventRecord>>(iter: T) -> Self {
        Self::from_records(iter)
    }
}

/// Metadata describing one dataset of the analysis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Label used for the resulting histogram.
    pub name: String,
    /// Local path or `http(s)://` URL of the event table.
    pub source_location: String,
    /// Whether the dataset is simulation (weighted per event) or measured data.
    pub is_simulated: bool,
    /// Normalization applied to every filled entry.
    pub luminosity_weight: f64,
    /// Optional plotting color as `#rrggbb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl DatasetDescriptor {
    /// Create a new descriptor without a color.
    pub fn new<N: Into<String>, L: Into<String>>(
        name: N,
        source_location: L,
        is_simulated: bool,
        luminosity_weight: f64,
    ) -> Self {
        Self {
            name: name.into(),
            source_location: source_location.into(),
            is_simulated,
            luminosity_weight,
            color: None,
        }
    }

    /// Set the plotting color.
    pub fn with_color<S: Into<String>>(mut self, color: S) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Check that a sampling fraction is a finite number in `[0, 1]`.
pub fn validate_sample_fraction(sample_fraction: f64) -> LepnuResult<()> {
    if sample_fraction.is_finite() && (0.0..=1.0).contains(&sample_fraction) {
        Ok(())
    } else {
        Err(LepnuError::InvalidSampleFraction(sample_fraction))
    }
}

/// Options for reading an [`EventTable`] from a file.
///
/// # See Also
/// [`read_parquet`], [`read_root`], [`read_events`]
#[derive(Clone, Debug)]
pub struct DatasetReadOptions {
    /// Name of the tree to read when loading ROOT files.
    pub tree: String,
    /// Read the simulation-only weight columns. When false they are set to 1.0.
    pub is_simulated: bool,
    /// Fraction of the stored events to read, counted from the start.
    pub sample_fraction: f64,
    /// Hard upper bound on the number of events read.
    pub max_events: Option<usize>,
    /// Directory used to cache remote datasets.
    pub cache_dir: Option<PathBuf>,
}

impl Default for DatasetReadOptions {
    fn default() -> Self {
        Self {
            tree: DEFAULT_TREE.to_string(),
            is_simulated: false,
            sample_fraction: 1.0,
            max_events: None,
            cache_dir: None,
        }
    }
}

impl DatasetReadOptions {
    /// Create a new [`Default`] set of [`DatasetReadOptions`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the tree to read when opening ROOT files.
    pub fn tree<S>(mut self, name: S) -> Self
    where
        S: AsRef<str>,
    {
        self.tree = name.as_ref().to_string();
        self
    }

    /// Read (or skip) the simulation-only columns.
    pub fn simulated(mut self, is_simulated: bool) -> Self {
        self.is_simulated = is_simulated;
        self
    }

    /// Read only `floor(total * fraction)` events.
    pub fn sample_fraction(mut self, sample_fraction: f64) -> Self {
        self.sample_fraction = sample_fraction;
        self
    }

    /// Read at most `max_events` events.
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }

    /// Cache remote datasets in the given directory.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// The number of rows to read from a file holding `total` rows.
    pub fn row_limit(&self, total: usize) -> LepnuResult<usize> {
        validate_sample_fraction(self.sample_fraction)?;
        let sampled = (total as f64 * self.sample_fraction).floor() as usize;
        Ok(self.max_events.map_or(sampled, |max| sampled.min(max)))
    }
}

/// Precision for writing floating-point columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FloatPrecision {
    /// 32-bit floats.
    F32,
    /// 64-bit floats.
    #[default]
    F64,
}

/// Options for writing an [`EventTable`] to disk.
#[derive(Clone, Debug)]
pub struct DatasetWriteOptions {
    /// Number of events to include in each batch when writing.
    pub batch_size: usize,
    /// Floating-point precision to use for persisted columns.
    pub precision: FloatPrecision,
    /// Name of the tree written to ROOT files.
    pub tree: String,
}

impl Default for DatasetWriteOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_WRITE_BATCH_SIZE,
            precision: FloatPrecision::default(),
            tree: DEFAULT_TREE.to_string(),
        }
    }
}

impl DatasetWriteOptions {
    /// Override the batch size used for writing; defaults to 10_000.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Select the floating-point precision for persisted columns.
    pub fn precision(mut self, precision: FloatPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Name the tree written to ROOT files (`mini` by default).
    pub fn tree<S>(mut self, name: S) -> Self
    where
        S: AsRef<str>,
    {
        self.tree = name.as_ref().to_string();
        self
    }
}

/// A muon passing every quality requirement, with the given transverse momentum in GeV.
pub fn test_muon(pt_gev: f64, eta: f64, phi: f64) -> Lepton {
    let pt = pt_gev / MEV_TO_GEV;
    Lepton {
        pt,
        eta,
        phi,
        energy: pt * eta.cosh(),
        particle_type: ParticleType::Muon.code(),
        quality_flag: 512,
        isolation_cone20: 0.0,
        isolation_cone30: 0.0,
        charge: -1,
        z0: 0.0,
        d0: 0.0,
    }
}

/// An event that can be used to test the selection: a single 40 GeV muon recoiling against
/// 50 GeV of missing transverse momentum.
pub fn test_event() -> EventRecord {
    EventRecord {
        leptons: vec![test_muon(40.0, 0.5, 0.0)],
        missing_et: 50_000.0,
        missing_phi: std::f64::consts::PI,
        mc_weight: 1.0,
        pileup_scale_factor: 1.0,
    }
}
