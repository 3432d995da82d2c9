use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use lepnu_core::{
    data::{io::canonicalize_dataset_path, DEFAULT_TREE},
    validate_sample_fraction, DatasetDescriptor, DatasetReadOptions, LepnuError, LepnuResult,
    DEFAULT_SAMPLE_FRACTION,
};
use lepnu_plot::{parse_color, OverlayOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_sample_fraction() -> f64 {
    DEFAULT_SAMPLE_FRACTION
}

fn default_tree() -> String {
    DEFAULT_TREE.to_string()
}

fn default_efficiency() -> f64 {
    1.0
}

fn config_error<S: Into<String>>(message: S) -> LepnuError {
    LepnuError::ConfigError(message.into())
}

/// The per-entry normalization of a sample.
///
/// Either given directly, or derived from the integrated luminosity and the sample's cross
/// section as `luminosity * cross_section / (sum_of_weights * efficiency)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LuminosityWeight {
    /// A precomputed weight.
    Value(f64),
    /// A weight derived from the sample's cross section.
    CrossSection {
        /// Integrated luminosity of the measured data.
        luminosity: f64,
        /// Cross section of the simulated process, in units matching `luminosity`.
        cross_section: f64,
        /// Sum of the generator weights of the full sample.
        sum_of_weights: f64,
        /// Filter efficiency of the sample.
        #[serde(default = "default_efficiency")]
        efficiency: f64,
    },
}

impl Default for LuminosityWeight {
    fn default() -> Self {
        Self::Value(1.0)
    }
}

impl LuminosityWeight {
    /// The resulting weight.
    pub fn value(&self) -> f64 {
        match self {
            Self::Value(value) => *value,
            Self::CrossSection {
                luminosity,
                cross_section,
                sum_of_weights,
                efficiency,
            } => luminosity * cross_section / (sum_of_weights * efficiency),
        }
    }
}

/// One dataset entry of an [`AnalysisConfig`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleConfig {
    /// Label of the resulting histogram.
    pub name: String,
    /// Local path or `http(s)://` URL. Relative paths are taken relative to the configuration file.
    pub location: String,
    /// Whether the sample is simulation.
    #[serde(default)]
    pub simulated: bool,
    /// Normalization of every filled entry.
    #[serde(default)]
    pub weight: LuminosityWeight,
    /// Optional plotting color as `#rrggbb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl SampleConfig {
    /// The [`DatasetDescriptor`] for this sample.
    pub fn descriptor(&self) -> DatasetDescriptor {
        let descriptor = DatasetDescriptor::new(
            self.name.clone(),
            self.location.clone(),
            self.simulated,
            self.weight.value(),
        );
        match &self.color {
            Some(color) => descriptor.with_color(color.clone()),
            None => descriptor,
        }
    }
}

/// A full analysis: the datasets to process and how to present them.
///
/// Read from YAML (or JSON, which is a subset) with [`AnalysisConfig::from_path`]:
///
/// ```yaml
/// sample_fraction: 0.1
/// stack_order: [ttbar, wjets]
/// samples:
///   - name: data
///     location: data/measured.parquet
///   - name: wjets
///     location: https://example.org/wjets.root
///     simulated: true
///     weight: {luminosity: 1000.0, cross_section: 31.0, sum_of_weights: 2.5e6}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// The datasets, in output order.
    pub samples: Vec<SampleConfig>,
    /// Fraction of every dataset to process.
    #[serde(default = "default_sample_fraction")]
    pub sample_fraction: f64,
    /// Name of the tree read from ROOT files.
    #[serde(default = "default_tree")]
    pub tree: String,
    /// Directory for downloaded datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Bottom-to-top order of the simulated samples in the overlay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_order: Option<Vec<String>>,
    /// Caption of the overlay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl AnalysisConfig {
    /// Parse and validate a configuration from YAML or JSON text.
    pub fn from_yaml_str(text: &str) -> LepnuResult<Self> {
        let config: Self = serde_yaml_ng::from_str(text)
            .map_err(|err| config_error(format!("Failed to parse configuration: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// Relative local sample locations and a relative cache directory are resolved against the
    /// directory holding the file.
    pub fn from_path<P: AsRef<str>>(path: P) -> LepnuResult<Self> {
        let path = canonicalize_dataset_path(path.as_ref())?;
        let bytes = fs::read(&path)?;
        let mut config: Self = serde_yaml_ng::from_slice(&bytes).map_err(|err| {
            config_error(format!("Failed to parse \"{}\": {}", path.display(), err))
        })?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;
        debug!(path = %path.display(), samples = config.samples.len(), "loaded configuration");
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for sample in &mut self.samples {
            let location = &sample.location;
            if location.contains("://") || location.starts_with('~') || location.starts_with('$') {
                continue;
            }
            if Path::new(location).is_relative() {
                sample.location = base.join(location).to_string_lossy().into_owned();
            }
        }
        if let Some(dir) = &self.cache_dir {
            if dir.is_relative() {
                self.cache_dir = Some(base.join(dir));
            }
        }
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> LepnuResult<()> {
        if self.samples.is_empty() {
            return Err(config_error("At least one sample is required"));
        }
        validate_sample_fraction(self.sample_fraction)?;
        let mut names = HashSet::new();
        for sample in &self.samples {
            if sample.name.is_empty() {
                return Err(config_error("Sample names must not be empty"));
            }
            if !names.insert(sample.name.as_str()) {
                return Err(config_error(format!(
                    "Sample \"{}\" is listed more than once",
                    sample.name
                )));
            }
            if sample.location.is_empty() {
                return Err(config_error(format!(
                    "Sample \"{}\" has no location",
                    sample.name
                )));
            }
            let weight = sample.weight.value();
            if !weight.is_finite() || weight <= 0.0 {
                return Err(config_error(format!(
                    "Sample \"{}\" has weight {}, expected a positive finite number",
                    sample.name, weight
                )));
            }
            if let Some(color) = &sample.color {
                parse_color(color)?;
            }
        }
        if let Some(order) = &self.stack_order {
            let mut seen = HashSet::new();
            for name in order {
                if !seen.insert(name.as_str()) {
                    return Err(config_error(format!(
                        "Sample \"{}\" appears twice in the stack order",
                        name
                    )));
                }
                match self.samples.iter().find(|sample| &sample.name == name) {
                    None => {
                        return Err(config_error(format!(
                            "Stack order names unknown sample \"{}\"",
                            name
                        )))
                    }
                    Some(sample) if !sample.simulated => {
                        return Err(config_error(format!(
                            "Stack order names measured sample \"{}\"",
                            name
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// A [`DatasetDescriptor`] per sample, in configuration order.
    pub fn descriptors(&self) -> Vec<DatasetDescriptor> {
        self.samples.iter().map(SampleConfig::descriptor).collect()
    }

    /// The read options shared by every sample.
    pub fn read_options(&self) -> DatasetReadOptions {
        let options = DatasetReadOptions::new()
            .tree(self.tree.clone())
            .sample_fraction(self.sample_fraction);
        match &self.cache_dir {
            Some(dir) => options.cache_dir(dir.clone()),
            None => options,
        }
    }

    /// The overlay options described by this configuration.
    pub fn overlay_options(&self) -> OverlayOptions {
        let options = OverlayOptions::new();
        let options = match &self.title {
            Some(title) => options.title(title.clone()),
            None => options,
        };
        match &self.stack_order {
            Some(order) => options.stack_order(order.iter().cloned()),
            None => options,
        }
    }
}
