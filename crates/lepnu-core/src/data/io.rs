//! Dataset I/O: location resolution plus ROOT and Parquet readers and writers.

use super::*;
use arrow::{
    array::{
        Array, ArrayRef, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, ListArray,
        UInt32Array,
    },
    datatypes::{
        ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int32Type, Int64Type, UInt32Type,
    },
    record_batch::RecordBatch,
};
use indexmap::IndexMap;
use oxyroot::{Branch, RootFile, Slice, WriterTree};
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};
use std::{
    convert::identity,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

const LEPTON_COUNT: &str = "lep_n";
const LEPTON_PT: &str = "lep_pt";
const LEPTON_ETA: &str = "lep_eta";
const LEPTON_PHI: &str = "lep_phi";
const LEPTON_ENERGY: &str = "lep_E";
const LEPTON_TYPE: &str = "lep_type";
const LEPTON_FLAG: &str = "lep_flag";
const LEPTON_ETCONE20: &str = "lep_etcone20";
const LEPTON_PTCONE30: &str = "lep_ptcone30";
const LEPTON_CHARGE: &str = "lep_charge";
const LEPTON_Z0: &str = "lep_z0";
const LEPTON_D0: &str = "lep_trackd0pvunsigned";
const MISSING_ET: &str = "met_et";
const MISSING_PHI: &str = "met_phi";
const MC_WEIGHT: &str = "mcWeight";
const PILEUP_SCALE_FACTOR: &str = "scaleFactor_PILEUP";

/// Shell-expand (`~`, `$VAR`) and canonicalize a local path.
pub fn canonicalize_dataset_path(file_path: &str) -> LepnuResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

fn expand_output_path(file_path: &str) -> LepnuResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Turn a dataset location into a readable local path.
///
/// Local paths are shell-expanded (`~`, `$VAR`) and canonicalized. `http://` and `https://`
/// locations are downloaded once into `cache_dir` (or a `lepnu-cache` directory under the system
/// temporary directory), keyed by the full URL, and reused on later calls.
pub fn resolve_location(location: &str, cache_dir: Option<&Path>) -> LepnuResult<PathBuf> {
    if is_remote(location) {
        #[cfg(feature = "remote")]
        {
            return download_cached(location, cache_dir);
        }
        #[cfg(not(feature = "remote"))]
        {
            let _ = cache_dir;
            return Err(LepnuError::Custom(format!(
                "Reading \"{location}\" requires the `remote` feature"
            )));
        }
    }
    canonicalize_dataset_path(location)
}

#[cfg(feature = "remote")]
fn download_cached(url: &str, cache_dir: Option<&Path>) -> LepnuResult<PathBuf> {
    let dir = match cache_dir {
        Some(dir) => expand_output_path(&dir.to_string_lossy())?,
        None => std::env::temp_dir().join("lepnu-cache"),
    };
    let target = cache_path(&dir, url)?;
    if target.exists() {
        debug!(url, path = %target.display(), "using cached dataset");
        return Ok(target.canonicalize()?);
    }
    let parent = target.parent().unwrap_or(&dir);
    std::fs::create_dir_all(parent)?;
    info!(url, path = %target.display(), "downloading dataset");
    let mut response = reqwest::blocking::get(url)?.error_for_status()?;
    let partial = parent.join(format!(
        "{}.{}-{:016x}.part",
        target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default(),
        std::process::id(),
        fastrand::u64(..)
    ));
    let download = File::create(&partial)
        .map_err(LepnuError::from)
        .and_then(|mut file| Ok(response.copy_to(&mut file)?));
    let bytes = match download {
        Ok(bytes) => bytes,
        Err(err) => {
            let _ = std::fs::remove_file(&partial);
            return Err(err);
        }
    };
    std::fs::rename(&partial, &target)?;
    info!(url, bytes, "download finished");
    Ok(target.canonicalize()?)
}

/// Where `url` is cached under `dir`: one directory per host and path segment, with the query
/// kept in the file name so distinct URLs never share a file.
///
/// Bytes outside `[A-Za-z0-9._-]` are written as `%XX`, as are the dots of `.` and `..`
/// segments, so the result never leaves `dir`.
#[cfg(feature = "remote")]
fn cache_path(dir: &Path, url: &str) -> LepnuResult<PathBuf> {
    let invalid = || LepnuError::Custom(format!("Cannot derive a cache path from \"{url}\""));
    let without_fragment = url.split('#').next().unwrap_or(url);
    let (_, rest) = without_fragment.split_once("://").ok_or_else(invalid)?;
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let mut segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(encode_cache_segment)
        .collect();
    if segments.len() < 2 || path.ends_with('/') {
        return Err(invalid());
    }
    if let Some(query) = query {
        if let Some(last) = segments.last_mut() {
            last.push_str("%3F");
            last.push_str(&encode_cache_segment(query));
        }
    }
    Ok(segments.iter().fold(dir.to_path_buf(), |path, segment| path.join(segment)))
}

#[cfg(feature = "remote")]
fn encode_cache_segment(segment: &str) -> String {
    let dots_only = segment.bytes().all(|byte| byte == b'.');
    segment
        .bytes()
        .map(|byte| match byte {
            b'.' if dots_only => "%2E".to_string(),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                (byte as char).to_string()
            }
            _ => format!("%{byte:02X}"),
        })
        .collect()
}

fn extension_of(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Load an [`EventTable`] from a `.root` or `.parquet` location, chosen by file extension.
pub fn read_events(location: &str, options: &DatasetReadOptions) -> LepnuResult<EventTable> {
    match extension_of(location).as_deref() {
        Some("root") => read_root(location, options),
        Some("parquet") | Some("pq") => read_parquet(location, options),
        _ => Err(LepnuError::UnsupportedFormat {
            location: location.to_string(),
        }),
    }
}

/// Per-column values as read from a file, before validation.
///
/// Every quantity is widened to `f64` here; integer columns are narrowed back when the table is
/// built.
#[derive(Default)]
struct RawEventColumns {
    lepton_count: Vec<f64>,
    pt: Vec<Vec<f64>>,
    eta: Vec<Vec<f64>>,
    phi: Vec<Vec<f64>>,
    energy: Vec<Vec<f64>>,
    particle_type: Vec<Vec<f64>>,
    quality_flag: Vec<Vec<f64>>,
    isolation_cone20: Vec<Vec<f64>>,
    isolation_cone30: Vec<Vec<f64>>,
    charge: Vec<Vec<f64>>,
    z0: Vec<Vec<f64>>,
    d0: Vec<Vec<f64>>,
    missing_et: Vec<f64>,
    missing_phi: Vec<f64>,
    mc_weight: Option<Vec<f64>>,
    pileup_scale_factor: Option<Vec<f64>>,
}

impl RawEventColumns {
    fn lepton_columns(&self) -> [(&'static str, &Vec<Vec<f64>>); 11] {
        [
            (LEPTON_PT, &self.pt),
            (LEPTON_ETA, &self.eta),
            (LEPTON_PHI, &self.phi),
            (LEPTON_ENERGY, &self.energy),
            (LEPTON_TYPE, &self.particle_type),
            (LEPTON_FLAG, &self.quality_flag),
            (LEPTON_ETCONE20, &self.isolation_cone20),
            (LEPTON_PTCONE30, &self.isolation_cone30),
            (LEPTON_CHARGE, &self.charge),
            (LEPTON_Z0, &self.z0),
            (LEPTON_D0, &self.d0),
        ]
    }

    fn lepton_columns_mut(&mut self) -> [(&'static str, &mut Vec<Vec<f64>>); 11] {
        [
            (LEPTON_PT, &mut self.pt),
            (LEPTON_ETA, &mut self.eta),
            (LEPTON_PHI, &mut self.phi),
            (LEPTON_ENERGY, &mut self.energy),
            (LEPTON_TYPE, &mut self.particle_type),
            (LEPTON_FLAG, &mut self.quality_flag),
            (LEPTON_ETCONE20, &mut self.isolation_cone20),
            (LEPTON_PTCONE30, &mut self.isolation_cone30),
            (LEPTON_CHARGE, &mut self.charge),
            (LEPTON_Z0, &mut self.z0),
            (LEPTON_D0, &mut self.d0),
        ]
    }

    fn into_table(self) -> LepnuResult<EventTable> {
        let n_events = self.lepton_count.len();
        let mut scalars = vec![(MISSING_ET, &self.missing_et), (MISSING_PHI, &self.missing_phi)];
        if let Some(values) = &self.mc_weight {
            scalars.push((MC_WEIGHT, values));
        }
        if let Some(values) = &self.pileup_scale_factor {
            scalars.push((PILEUP_SCALE_FACTOR, values));
        }
        for (name, values) in scalars {
            check_length(name, values.len(), n_events)?;
        }
        let lepton_columns = self.lepton_columns();
        for (name, values) in &lepton_columns {
            check_length(name, values.len(), n_events)?;
        }

        let mut table = EventTable::new();
        for event in 0..n_events {
            let raw_count = self.lepton_count[event];
            if !raw_count.is_finite() || raw_count < 0.0 || raw_count.fract() != 0.0 {
                return Err(LepnuError::Custom(format!(
                    "Event {event}: invalid lepton count {raw_count}"
                )));
            }
            let count = raw_count as usize;
            if count > MAX_LEPTONS {
                return Err(LepnuError::LeptonCountOutOfRange {
                    event,
                    count,
                    capacity: MAX_LEPTONS,
                });
            }
            let available = lepton_columns
                .iter()
                .map(|(_, values)| values[event].len())
                .min()
                .unwrap_or(0);
            if count > available {
                return Err(LepnuError::LeptonCountOutOfRange {
                    event,
                    count,
                    capacity: available,
                });
            }
            let leptons = (0..count)
                .map(|slot| Lepton {
                    pt: self.pt[event][slot],
                    eta: self.eta[event][slot],
                    phi: self.phi[event][slot],
                    energy: self.energy[event][slot],
                    particle_type: self.particle_type[event][slot] as i32,
                    quality_flag: self.quality_flag[event][slot] as u32,
                    isolation_cone20: self.isolation_cone20[event][slot],
                    isolation_cone30: self.isolation_cone30[event][slot],
                    charge: self.charge[event][slot] as i32,
                    z0: self.z0[event][slot],
                    d0: self.d0[event][slot],
                })
                .collect();
            table.push(&EventRecord {
                leptons,
                missing_et: self.missing_et[event],
                missing_phi: self.missing_phi[event],
                mc_weight: self.mc_weight.as_ref().map_or(1.0, |values| values[event]),
                pileup_scale_factor: self
                    .pileup_scale_factor
                    .as_ref()
                    .map_or(1.0, |values| values[event]),
            });
        }
        Ok(table)
    }
}

fn check_length(name: &str, actual: usize, expected: usize) -> LepnuResult<()> {
    if actual != expected {
        return Err(LepnuError::LengthMismatch {
            context: format!("Column '{name}'"),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Load an [`EventTable`] from a ROOT TTree using the oxyroot backend.
///
/// Only the first [`DatasetReadOptions::row_limit`] entries are decoded. The simulation-only
/// branches are read only when [`DatasetReadOptions::is_simulated`] is set.
pub fn read_root(location: &str, options: &DatasetReadOptions) -> LepnuResult<EventTable> {
    let path = resolve_location(location, options.cache_dir.as_deref())?;
    let mut file = RootFile::open(&path).map_err(|err| {
        LepnuError::root(format!("Failed to open ROOT file '{}'", path.display()), err)
    })?;
    let tree = file.get_tree(&options.tree).map_err(|err| {
        LepnuError::root(format!("Failed to open ROOT tree '{}'", options.tree), err)
    })?;
    let total = usize::try_from(tree.entries()).unwrap_or(0);
    let limit = options.row_limit(total)?;
    debug!(path = %path.display(), tree = %options.tree, total, limit, "reading ROOT tree");

    let lookup: BranchLookup<'_> = tree
        .branches()
        .map(|branch| (branch.name(), branch))
        .collect();

    let mut raw = RawEventColumns {
        lepton_count: read_root_scalar(&lookup, LEPTON_COUNT, limit)?,
        ..Default::default()
    };
    for (name, column) in raw.lepton_columns_mut() {
        *column = read_root_jagged(&lookup, name, limit)?;
    }
    raw.missing_et = read_root_scalar(&lookup, MISSING_ET, limit)?;
    raw.missing_phi = read_root_scalar(&lookup, MISSING_PHI, limit)?;
    if options.is_simulated {
        raw.mc_weight = Some(read_root_scalar(&lookup, MC_WEIGHT, limit)?);
        raw.pileup_scale_factor = Some(read_root_scalar(&lookup, PILEUP_SCALE_FACTOR, limit)?);
    }
    let table = raw.into_table()?;
    info!(path = %path.display(), events = table.len(), "loaded ROOT dataset");
    Ok(table)
}

type BranchLookup<'a> = IndexMap<&'a str, &'a Branch>;

#[derive(Clone, Copy, Debug)]
enum RootValueKind {
    F32,
    F64,
    I32,
    U32,
}

fn root_value_kind(name: &str, branch: &Branch) -> LepnuResult<RootValueKind> {
    let type_name = branch.item_type_name();
    let lower = type_name.to_ascii_lowercase();
    if lower.contains("double") {
        Ok(RootValueKind::F64)
    } else if lower.contains("float") {
        Ok(RootValueKind::F32)
    } else if lower.contains("unsigned") || lower.contains("uint") {
        Ok(RootValueKind::U32)
    } else if lower.contains("int") {
        Ok(RootValueKind::I32)
    } else {
        Err(LepnuError::InvalidColumnType {
            name: name.to_string(),
            datatype: type_name,
        })
    }
}

fn lookup_branch<'a>(lookup: &BranchLookup<'a>, name: &str) -> LepnuResult<&'a Branch> {
    lookup
        .get(name)
        .copied()
        .ok_or_else(|| LepnuError::MissingColumn {
            name: name.to_string(),
        })
}

macro_rules! branch_rows {
    ($branch:expr, $ty:ty, $name:expr, $limit:expr) => {
        $branch
            .as_iter::<$ty>()
            .map_err(|err| LepnuError::root(format!("Failed to read branch '{}'", $name), err))?
            .take($limit)
    };
}

fn read_root_scalar(lookup: &BranchLookup<'_>, name: &str, limit: usize) -> LepnuResult<Vec<f64>> {
    let branch = lookup_branch(lookup, name)?;
    let values = match root_value_kind(name, branch)? {
        RootValueKind::F32 => branch_rows!(branch, f32, name, limit)
            .map(f64::from)
            .collect(),
        RootValueKind::F64 => branch_rows!(branch, f64, name, limit).collect(),
        RootValueKind::I32 => branch_rows!(branch, i32, name, limit)
            .map(f64::from)
            .collect(),
        RootValueKind::U32 => branch_rows!(branch, u32, name, limit)
            .map(f64::from)
            .collect(),
    };
    Ok(values)
}

fn widen<T: Into<f64>>(row: Vec<T>) -> Vec<f64> {
    row.into_iter().map(Into::into).collect()
}

/// Per-lepton branches are either `std::vector<T>` or C arrays sized by `lep_n`.
fn read_root_jagged(
    lookup: &BranchLookup<'_>,
    name: &str,
    limit: usize,
) -> LepnuResult<Vec<Vec<f64>>> {
    let branch = lookup_branch(lookup, name)?;
    let kind = root_value_kind(name, branch)?;
    let is_vector = branch
        .item_type_name()
        .to_ascii_lowercase()
        .contains("vector");
    let rows = match (kind, is_vector) {
        (RootValueKind::F32, true) => branch_rows!(branch, Vec<f32>, name, limit)
            .map(widen)
            .collect(),
        (RootValueKind::F64, true) => branch_rows!(branch, Vec<f64>, name, limit).collect(),
        (RootValueKind::I32, true) => branch_rows!(branch, Vec<i32>, name, limit)
            .map(widen)
            .collect(),
        (RootValueKind::U32, true) => branch_rows!(branch, Vec<u32>, name, limit)
            .map(widen)
            .collect(),
        (RootValueKind::F32, false) => branch_rows!(branch, Slice<f32>, name, limit)
            .map(|row| widen(row.into_vec()))
            .collect(),
        (RootValueKind::F64, false) => branch_rows!(branch, Slice<f64>, name, limit)
            .map(|row| row.into_vec())
            .collect(),
        (RootValueKind::I32, false) => branch_rows!(branch, Slice<i32>, name, limit)
            .map(|row| widen(row.into_vec()))
            .collect(),
        (RootValueKind::U32, false) => branch_rows!(branch, Slice<u32>, name, limit)
            .map(|row| widen(row.into_vec()))
            .collect(),
    };
    Ok(rows)
}

/// Load an [`EventTable`] from a Parquet file with one row per event and list columns for the
/// per-lepton quantities.
pub fn read_parquet(location: &str, options: &DatasetReadOptions) -> LepnuResult<EventTable> {
    let path = resolve_location(location, options.cache_dir.as_deref())?;
    let file = File::open(&path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let total = builder.metadata().file_metadata().num_rows().max(0) as usize;
    let limit = options.row_limit(total)?;
    debug!(path = %path.display(), total, limit, "reading Parquet file");

    let mut raw = RawEventColumns::default();
    if options.is_simulated {
        raw.mc_weight = Some(Vec::new());
        raw.pileup_scale_factor = Some(Vec::new());
    }
    if limit > 0 {
        let reader = builder.with_limit(limit).build()?;
        for batch in reader {
            append_record_batch(&mut raw, &batch?)?;
        }
    } else {
        check_parquet_schema(builder.schema(), options.is_simulated)?;
    }
    let mut table = raw.into_table()?;
    table.truncate(limit);
    info!(path = %path.display(), events = table.len(), "loaded Parquet dataset");
    Ok(table)
}

fn required_columns(is_simulated: bool) -> Vec<&'static str> {
    let mut names = vec![
        LEPTON_COUNT,
        LEPTON_PT,
        LEPTON_ETA,
        LEPTON_PHI,
        LEPTON_ENERGY,
        LEPTON_TYPE,
        LEPTON_FLAG,
        LEPTON_ETCONE20,
        LEPTON_PTCONE30,
        LEPTON_CHARGE,
        LEPTON_Z0,
        LEPTON_D0,
        MISSING_ET,
        MISSING_PHI,
    ];
    if is_simulated {
        names.extend([MC_WEIGHT, PILEUP_SCALE_FACTOR]);
    }
    names
}

fn check_parquet_schema(schema: &arrow::datatypes::Schema, is_simulated: bool) -> LepnuResult<()> {
    for name in required_columns(is_simulated) {
        if schema.field_with_name(name).is_err() {
            return Err(LepnuError::MissingColumn {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn append_record_batch(raw: &mut RawEventColumns, batch: &RecordBatch) -> LepnuResult<()> {
    raw.lepton_count
        .extend(scalar_column(batch, LEPTON_COUNT)?.to_vec());
    for (name, column) in raw.lepton_columns_mut() {
        column.extend(list_column_rows(batch, name)?);
    }
    raw.missing_et.extend(scalar_column(batch, MISSING_ET)?.to_vec());
    raw.missing_phi
        .extend(scalar_column(batch, MISSING_PHI)?.to_vec());
    if let Some(values) = raw.mc_weight.as_mut() {
        values.extend(scalar_column(batch, MC_WEIGHT)?.to_vec());
    }
    if let Some(values) = raw.pileup_scale_factor.as_mut() {
        values.extend(scalar_column(batch, PILEUP_SCALE_FACTOR)?.to_vec());
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum NumericColumn<'a> {
    F32(&'a Float32Array),
    F64(&'a Float64Array),
    I32(&'a Int32Array),
    U32(&'a UInt32Array),
    I64(&'a Int64Array),
}

impl<'a> NumericColumn<'a> {
    fn try_new(name: &str, array: &'a dyn Array) -> LepnuResult<Self> {
        match array.data_type() {
            DataType::Float32 => Ok(Self::F32(array.as_primitive::<Float32Type>())),
            DataType::Float64 => Ok(Self::F64(array.as_primitive::<Float64Type>())),
            DataType::Int32 => Ok(Self::I32(array.as_primitive::<Int32Type>())),
            DataType::UInt32 => Ok(Self::U32(array.as_primitive::<UInt32Type>())),
            DataType::Int64 => Ok(Self::I64(array.as_primitive::<Int64Type>())),
            other => Err(LepnuError::InvalidColumnType {
                name: name.to_string(),
                datatype: format!("{other:?}"),
            }),
        }
    }

    fn value(&self, row: usize) -> f64 {
        match self {
            Self::F32(array) => array.value(row) as f64,
            Self::F64(array) => array.value(row),
            Self::I32(array) => array.value(row) as f64,
            Self::U32(array) => array.value(row) as f64,
            Self::I64(array) => array.value(row) as f64,
        }
    }

    fn to_vec(self, range: std::ops::Range<usize>) -> Vec<f64> {
        range.map(|row| self.value(row)).collect()
    }
}

struct ScalarColumn<'a> {
    values: NumericColumn<'a>,
    len: usize,
}

impl ScalarColumn<'_> {
    fn to_vec(&self) -> Vec<f64> {
        self.values.to_vec(0..self.len)
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> LepnuResult<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| LepnuError::MissingColumn {
            name: name.to_string(),
        })
}

fn scalar_column<'a>(batch: &'a RecordBatch, name: &str) -> LepnuResult<ScalarColumn<'a>> {
    let array = column(batch, name)?;
    Ok(ScalarColumn {
        values: NumericColumn::try_new(name, array.as_ref())?,
        len: array.len(),
    })
}

fn list_column_rows(batch: &RecordBatch, name: &str) -> LepnuResult<Vec<Vec<f64>>> {
    let array = column(batch, name)?;
    let list = match array.data_type() {
        DataType::List(_) => array.as_list::<i32>(),
        other => {
            return Err(LepnuError::InvalidColumnType {
                name: name.to_string(),
                datatype: format!("{other:?}"),
            })
        }
    };
    let values = NumericColumn::try_new(name, list.values().as_ref())?;
    Ok(list
        .value_offsets()
        .windows(2)
        .map(|bounds| values.to_vec(bounds[0] as usize..bounds[1] as usize))
        .collect())
}

/// Persist an [`EventTable`] to a Parquet file.
///
/// Per-lepton quantities are written as list columns, so `lep_n` always matches the list
/// lengths. The simulation weights are always written (1.0 for measured data).
pub fn write_parquet(
    table: &EventTable,
    file_path: &str,
    options: &DatasetWriteOptions,
) -> LepnuResult<()> {
    let path = expand_output_path(file_path)?;
    let batch_size = options.batch_size.max(1);
    let schema = table_range_to_record_batch(table, 0, 0, options.precision)?.schema();
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    let n_rows = table.len();
    let mut start = 0usize;
    while start < n_rows {
        let end = (start + batch_size).min(n_rows);
        let batch = table_range_to_record_batch(table, start, end, options.precision)?;
        writer.write(&batch)?;
        start = end;
    }
    writer.close()?;
    info!(path = %path.display(), events = n_rows, "wrote Parquet dataset");
    Ok(())
}

fn table_range_to_record_batch(
    table: &EventTable,
    start: usize,
    end: usize,
    precision: FloatPrecision,
) -> arrow::error::Result<RecordBatch> {
    let offsets = &table.offsets[start..=end];
    let leptons = &table.leptons;
    let counts: Vec<u32> = offsets
        .windows(2)
        .map(|bounds| (bounds[1] - bounds[0]) as u32)
        .collect();
    RecordBatch::try_from_iter(vec![
        (LEPTON_COUNT, Arc::new(UInt32Array::from(counts)) as ArrayRef),
        (LEPTON_PT, float_list(offsets, &leptons.pt, precision)),
        (LEPTON_ETA, float_list(offsets, &leptons.eta, precision)),
        (LEPTON_PHI, float_list(offsets, &leptons.phi, precision)),
        (LEPTON_ENERGY, float_list(offsets, &leptons.energy, precision)),
        (
            LEPTON_TYPE,
            list_array::<Int32Type>(offsets, &leptons.particle_type),
        ),
        (
            LEPTON_FLAG,
            list_array::<UInt32Type>(offsets, &leptons.quality_flag),
        ),
        (
            LEPTON_ETCONE20,
            float_list(offsets, &leptons.isolation_cone20, precision),
        ),
        (
            LEPTON_PTCONE30,
            float_list(offsets, &leptons.isolation_cone30, precision),
        ),
        (LEPTON_CHARGE, list_array::<Int32Type>(offsets, &leptons.charge)),
        (LEPTON_Z0, float_list(offsets, &leptons.z0, precision)),
        (LEPTON_D0, float_list(offsets, &leptons.d0, precision)),
        (MISSING_ET, float_array(&table.missing_et[start..end], precision)),
        (MISSING_PHI, float_array(&table.missing_phi[start..end], precision)),
        (MC_WEIGHT, float_array(&table.mc_weight[start..end], precision)),
        (
            PILEUP_SCALE_FACTOR,
            float_array(&table.pileup_scale_factor[start..end], precision),
        ),
    ])
}

/// `offsets` are absolute positions into `values`; one list is produced per window.
fn list_array<T: ArrowPrimitiveType>(offsets: &[usize], values: &[T::Native]) -> ArrayRef {
    Arc::new(ListArray::from_iter_primitive::<T, _, _>(
        offsets
            .windows(2)
            .map(|bounds| Some(values[bounds[0]..bounds[1]].iter().copied().map(Some))),
    ))
}

fn float_list(offsets: &[usize], values: &[f64], precision: FloatPrecision) -> ArrayRef {
    match precision {
        FloatPrecision::F64 => list_array::<Float64Type>(offsets, values),
        FloatPrecision::F32 => {
            let base = offsets[0];
            let last = offsets[offsets.len() - 1];
            let rebased: Vec<usize> = offsets.iter().map(|offset| offset - base).collect();
            let narrowed: Vec<f32> = values[base..last].iter().map(|v| *v as f32).collect();
            list_array::<Float32Type>(&rebased, &narrowed)
        }
    }
}

fn float_array(values: &[f64], precision: FloatPrecision) -> ArrayRef {
    match precision {
        FloatPrecision::F64 => Arc::new(Float64Array::from(values.to_vec())),
        FloatPrecision::F32 => Arc::new(Float32Array::from(
            values.iter().map(|v| *v as f32).collect::<Vec<_>>(),
        )),
    }
}

/// Persist an [`EventTable`] to a ROOT file using the oxyroot backend.
///
/// The tree is named by [`DatasetWriteOptions::tree`]. `lep_n` is an `int32_t` branch and every
/// per-lepton quantity a `std::vector` branch, so the file reads back with [`read_root`]. The
/// simulation weights are always written (1.0 for measured data).
pub fn write_root(
    table: &EventTable,
    file_path: &str,
    options: &DatasetWriteOptions,
) -> LepnuResult<()> {
    let path = expand_output_path(file_path)?;
    match options.precision {
        FloatPrecision::F64 => write_root_with_type::<f64>(table, &path, &options.tree),
        FloatPrecision::F32 => write_root_with_type::<f32>(table, &path, &options.tree),
    }
}

trait FromF64 {
    fn from_f64(value: f64) -> Self;
}

impl FromF64 for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}

impl FromF64 for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

/// One row per event, cut from the flat per-lepton column at `offsets`.
fn jagged_rows<S: Copy, T>(offsets: &[usize], values: &[S], convert: fn(S) -> T) -> Vec<Vec<T>> {
    offsets
        .windows(2)
        .map(|bounds| {
            values[bounds[0]..bounds[1]]
                .iter()
                .copied()
                .map(convert)
                .collect()
        })
        .collect()
}

fn write_root_with_type<T>(table: &EventTable, path: &Path, tree_name: &str) -> LepnuResult<()>
where
    T: FromF64 + oxyroot::Marshaler + 'static,
{
    let offsets = &table.offsets;
    let leptons = &table.leptons;
    let mut tree = WriterTree::new(tree_name);

    let counts: Vec<i32> = offsets
        .windows(2)
        .map(|bounds| (bounds[1] - bounds[0]) as i32)
        .collect();
    tree.new_branch(LEPTON_COUNT, counts.into_iter());
    for (name, values) in [
        (LEPTON_PT, &leptons.pt),
        (LEPTON_ETA, &leptons.eta),
        (LEPTON_PHI, &leptons.phi),
        (LEPTON_ENERGY, &leptons.energy),
    ] {
        tree.new_branch(name, jagged_rows(offsets, values, T::from_f64).into_iter());
    }
    tree.new_branch(
        LEPTON_TYPE,
        jagged_rows(offsets, &leptons.particle_type, identity).into_iter(),
    );
    tree.new_branch(
        LEPTON_FLAG,
        jagged_rows(offsets, &leptons.quality_flag, identity).into_iter(),
    );
    for (name, values) in [
        (LEPTON_ETCONE20, &leptons.isolation_cone20),
        (LEPTON_PTCONE30, &leptons.isolation_cone30),
    ] {
        tree.new_branch(name, jagged_rows(offsets, values, T::from_f64).into_iter());
    }
    tree.new_branch(
        LEPTON_CHARGE,
        jagged_rows(offsets, &leptons.charge, identity).into_iter(),
    );
    for (name, values) in [(LEPTON_Z0, &leptons.z0), (LEPTON_D0, &leptons.d0)] {
        tree.new_branch(name, jagged_rows(offsets, values, T::from_f64).into_iter());
    }
    for (name, values) in [
        (MISSING_ET, &table.missing_et),
        (MISSING_PHI, &table.missing_phi),
        (MC_WEIGHT, &table.mc_weight),
        (PILEUP_SCALE_FACTOR, &table.pileup_scale_factor),
    ] {
        let values: Vec<T> = values.iter().copied().map(T::from_f64).collect();
        tree.new_branch(name, values.into_iter());
    }

    let mut file = RootFile::create(path).map_err(|err| {
        LepnuError::root(format!("Failed to create ROOT file '{}'", path.display()), err)
    })?;
    tree.write(&mut file).map_err(|err| {
        LepnuError::root(
            format!("Failed to write ROOT tree '{tree_name}' to '{}'", path.display()),
            err,
        )
    })?;
    file.close().map_err(|err| {
        LepnuError::root(format!("Failed to close ROOT file '{}'", path.display()), err)
    })?;
    info!(path = %path.display(), events = table.len(), "wrote ROOT dataset");
    Ok(())
}
