//! # lepnu-plot
//!
//! Draws a [`HistogramCollection`] as a stack of simulated contributions with the measured
//! histograms overlaid as points with error bars.
#![warn(clippy::perf, clippy::style, missing_docs)]

use std::path::Path;

use lepnu_core::{HistogramCollection, LepnuError, LepnuResult};
use plotters::{coord::Shift, prelude::*};
use tracing::info;

/// Colors assigned (in stacking order) to simulated samples without a color of their own.
pub const PALETTE: [RGBColor; 8] = [
    RGBColor(0x4c, 0x72, 0xb0),
    RGBColor(0xdd, 0x84, 0x52),
    RGBColor(0x55, 0xa8, 0x68),
    RGBColor(0xc4, 0x4e, 0x52),
    RGBColor(0x81, 0x72, 0xb3),
    RGBColor(0x93, 0x78, 0x60),
    RGBColor(0xda, 0x8b, 0xc3),
    RGBColor(0x8c, 0x8c, 0x8c),
];

/// Presentation options for [`render_overlay`].
#[derive(Clone, Debug)]
pub struct OverlayOptions {
    /// Caption drawn above the plot (omitted when empty).
    pub title: String,
    /// Label of the horizontal axis.
    pub x_label: String,
    /// Label of the vertical axis.
    pub y_label: String,
    /// Image size in pixels.
    pub size: (u32, u32),
    /// Explicit bottom-to-top order of the simulated samples.
    pub stack_order: Option<Vec<String>>,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            x_label: "Lepton transverse momentum [GeV]".to_string(),
            y_label: "Events".to_string(),
            size: (1200, 800),
            stack_order: None,
        }
    }
}

impl OverlayOptions {
    /// Create a new [`Default`] set of [`OverlayOptions`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the caption.
    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = title.into();
        self
    }

    /// Set the axis labels.
    pub fn labels<X: Into<String>, Y: Into<String>>(mut self, x_label: X, y_label: Y) -> Self {
        self.x_label = x_label.into();
        self.y_label = y_label.into();
        self
    }

    /// Set the image size in pixels.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    /// Stack the simulated samples in this order, bottom first.
    pub fn stack_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stack_order = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Parse a `#rrggbb` color.
pub fn parse_color(color: &str) -> LepnuResult<RGBColor> {
    let invalid = || {
        LepnuError::RenderError(format!("Invalid color \"{color}\" (expected #rrggbb)"))
    };
    let hex = color.strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// The bottom-to-top order of the simulated histograms.
///
/// With an explicit order every name must refer to a simulated histogram of the collection;
/// simulated histograms it leaves out go underneath, smallest first. Without one, all simulated
/// histograms are stacked by ascending total so the largest contribution ends up on top.
pub fn stacking_order(
    collection: &HistogramCollection,
    explicit: Option<&[String]>,
) -> LepnuResult<Vec<String>> {
    let mut by_total: Vec<(&str, f64)> = collection
        .simulated()
        .map(|(name, named)| (name, named.histogram.total()))
        .collect();
    by_total.sort_by(|a, b| a.1.total_cmp(&b.1));
    let Some(explicit) = explicit else {
        return Ok(by_total.into_iter().map(|(name, _)| name.to_string()).collect());
    };
    for (i, name) in explicit.iter().enumerate() {
        match collection.get(name) {
            None => {
                return Err(LepnuError::RenderError(format!(
                    "Stack order names unknown sample \"{name}\""
                )))
            }
            Some(named) if !named.is_simulated => {
                return Err(LepnuError::RenderError(format!(
                    "Stack order names measured sample \"{name}\""
                )))
            }
            Some(_) if explicit[..i].contains(name) => {
                return Err(LepnuError::RenderError(format!(
                    "Stack order lists \"{name}\" twice"
                )))
            }
            Some(_) => {}
        }
    }
    let mut order: Vec<String> = by_total
        .into_iter()
        .map(|(name, _)| name.to_string())
        .filter(|name| !explicit.contains(name))
        .collect();
    order.extend(explicit.iter().cloned());
    Ok(order)
}

/// One filled band of the stack: bin `i` spans `lower[i]..upper[i]`.
#[derive(Clone, Debug, PartialEq)]
pub struct StackLayer {
    /// Sample name.
    pub name: String,
    /// Fill color.
    pub color: RGBColor,
    /// Bottom of the band in each bin.
    pub lower: Vec<f64>,
    /// Top of the band in each bin.
    pub upper: Vec<f64>,
}

/// Cumulative bands for the simulated histograms in `order`, bottom first.
pub fn stack_layers(
    collection: &HistogramCollection,
    order: &[String],
) -> LepnuResult<Vec<StackLayer>> {
    let mut layers: Vec<StackLayer> = Vec::with_capacity(order.len());
    for (index, name) in order.iter().enumerate() {
        let named = collection
            .get(name)
            .ok_or_else(|| LepnuError::RenderError(format!("Unknown sample \"{name}\"")))?;
        let lower = match layers.last() {
            Some(below) => below.upper.clone(),
            None => vec![0.0; named.histogram.bins()],
        };
        if lower.len() != named.histogram.bins() {
            return Err(LepnuError::RenderError(format!(
                "Sample \"{name}\" has {} bins, expected {}",
                named.histogram.bins(),
                lower.len()
            )));
        }
        let upper = lower
            .iter()
            .zip(named.histogram.counts())
            .map(|(base, count)| base + count)
            .collect();
        let color = match &named.color {
            Some(color) => parse_color(color)?,
            None => PALETTE[index % PALETTE.len()],
        };
        layers.push(StackLayer {
            name: name.clone(),
            color,
            lower,
            upper,
        });
    }
    Ok(layers)
}

fn render_error<E: std::fmt::Display>(err: E) -> LepnuError {
    LepnuError::RenderError(err.to_string())
}

/// Draw the collection to `path` as PNG or SVG (chosen by extension).
///
/// Simulated histograms are drawn as stacked filled bands in [`stacking_order`]; measured ones
/// as black markers with $`\sqrt{\sum w^2}`$ error bars.
pub fn render_overlay<P: AsRef<Path>>(
    collection: &HistogramCollection,
    options: &OverlayOptions,
    path: P,
) -> LepnuResult<()> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("svg") => draw(
            SVGBackend::new(path, options.size).into_drawing_area(),
            collection,
            options,
        )?,
        Some("png") => draw(
            BitMapBackend::new(path, options.size).into_drawing_area(),
            collection,
            options,
        )?,
        _ => {
            return Err(LepnuError::RenderError(format!(
                "Unsupported image format for \"{}\" (expected .png or .svg)",
                path.display()
            )))
        }
    }
    info!(path = %path.display(), samples = collection.len(), "wrote overlay");
    Ok(())
}

fn draw<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    collection: &HistogramCollection,
    options: &OverlayOptions,
) -> LepnuResult<()> {
    let reference = collection
        .iter()
        .next()
        .map(|(_, named)| &named.histogram)
        .ok_or_else(|| LepnuError::RenderError("Nothing to draw".to_string()))?;
    let edges = reference.bin_edges();
    let centers = reference.bin_centers();
    let (x_lo, x_hi) = reference.range();

    let order = stacking_order(collection, options.stack_order.as_deref())?;
    let layers = stack_layers(collection, &order)?;
    let stack_max = layers
        .last()
        .map(|top| top.upper.iter().copied().fold(0.0, f64::max))
        .unwrap_or(0.0);
    let data_max = collection
        .measured()
        .flat_map(|(_, named)| {
            named
                .histogram
                .counts()
                .iter()
                .zip(named.histogram.errors())
                .map(|(count, error)| count + error)
                .collect::<Vec<_>>()
        })
        .fold(0.0, f64::max);
    let y_hi = (stack_max.max(data_max) * 1.3).max(1.0);

    root.fill(&WHITE).map_err(render_error)?;
    let mut builder = ChartBuilder::on(&root);
    builder
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70);
    if !options.title.is_empty() {
        builder.caption(&options.title, ("sans-serif", 24));
    }
    let mut chart = builder
        .build_cartesian_2d(x_lo..x_hi, 0.0..y_hi)
        .map_err(render_error)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(options.x_label.as_str())
        .y_desc(options.y_label.as_str())
        .draw()
        .map_err(render_error)?;

    for layer in &layers {
        let color = layer.color;
        chart
            .draw_series(edges.windows(2).enumerate().map(|(bin, bounds)| {
                Rectangle::new(
                    [(bounds[0], layer.lower[bin]), (bounds[1], layer.upper[bin])],
                    color.filled(),
                )
            }))
            .map_err(render_error)?
            .label(layer.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.filled()));
    }

    for (name, named) in collection.measured() {
        let counts = named.histogram.counts();
        let errors = named.histogram.errors();
        chart
            .draw_series(centers.iter().zip(counts).zip(&errors).map(|((x, y), err)| {
                ErrorBar::new_vertical(*x, (y - err).max(0.0), *y, y + err, BLACK.filled(), 6)
            }))
            .map_err(render_error)?;
        chart
            .draw_series(
                centers
                    .iter()
                    .zip(counts)
                    .map(|(x, y)| Circle::new((*x, *y), 4, BLACK.filled())),
            )
            .map_err(render_error)?
            .label(name)
            .legend(|(x, y)| Circle::new((x + 7, y), 4, BLACK.filled()));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(render_error)?;
    root.present().map_err(render_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lepnu_core::{Histogram, NamedHistogram};
    use std::{env, fs, path::PathBuf};

    fn make_temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("lepnu_plot_test_{}", fastrand::u64(..)));
        fs::create_dir(&dir).expect("temp dir should be created");
        dir
    }

    fn named(is_simulated: bool, fills: &[(f64, f64)], color: Option<&str>) -> NamedHistogram {
        let mut histogram = Histogram::lepton_pt();
        for (value, weight) in fills {
            histogram.add(*value, *weight);
        }
        NamedHistogram {
            histogram,
            is_simulated,
            color: color.map(str::to_string),
            pass_count: fills.len(),
        }
    }

    fn sample_collection() -> HistogramCollection {
        let mut collection = HistogramCollection::new();
        collection.insert("data", named(false, &[(45.0, 1.0), (55.0, 1.0)], None));
        collection.insert("wjets", named(true, &[(45.0, 5.0), (55.0, 3.0)], None));
        collection.insert("ttbar", named(true, &[(45.0, 1.0)], Some("#ff0000")));
        collection.insert("zjets", named(true, &[(45.0, 2.0)], None));
        collection
    }

    #[test]
    fn test_default_order_is_ascending_total() {
        let order = stacking_order(&sample_collection(), None).unwrap();
        assert_eq!(order, ["ttbar", "zjets", "wjets"]);
    }

    #[test]
    fn test_explicit_order() {
        let collection = sample_collection();
        let explicit = vec!["wjets".to_string(), "ttbar".to_string()];
        let order = stacking_order(&collection, Some(&explicit)).unwrap();
        assert_eq!(order, ["zjets", "wjets", "ttbar"]);
        let measured = vec!["data".to_string()];
        assert!(stacking_order(&collection, Some(&measured)).is_err());
        let unknown = vec!["diboson".to_string()];
        assert!(stacking_order(&collection, Some(&unknown)).is_err());
        let twice = vec!["wjets".to_string(), "wjets".to_string()];
        assert!(stacking_order(&collection, Some(&twice)).is_err());
    }

    #[test]
    fn test_stack_layers_accumulate() {
        let collection = sample_collection();
        let order = stacking_order(&collection, None).unwrap();
        let layers = stack_layers(&collection, &order).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].name, "ttbar");
        assert_eq!(layers[0].color, RGBColor(255, 0, 0));
        assert_eq!(layers[1].color, PALETTE[1]);
        assert_relative_eq!(layers[0].upper[4], 1.0);
        assert_relative_eq!(layers[1].lower[4], 1.0);
        assert_relative_eq!(layers[2].upper[4], 8.0);
        assert_relative_eq!(layers[2].upper[5], 3.0);
        assert_eq!(layers[2].lower, layers[1].upper);
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#1a2B3c").unwrap(), RGBColor(0x1a, 0x2b, 0x3c));
        assert!(parse_color("1a2b3c").is_err());
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("#gg0000").is_err());
    }

    #[test]
    fn test_unsupported_image_format() {
        let err = render_overlay(&sample_collection(), &OverlayOptions::new(), "overlay.gif")
            .unwrap_err();
        assert!(matches!(err, LepnuError::RenderError(_)));
    }

    #[test]
    fn test_render_svg_overlay() {
        let dir = make_temp_dir();
        let path = dir.join("overlay.svg");
        let options = OverlayOptions::new().title("W to mu nu").size(640, 480);
        render_overlay(&sample_collection(), &options, &path).unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        for name in ["data", "wjets", "ttbar", "zjets", "W to mu nu"] {
            assert!(svg.contains(name), "missing {name}");
        }
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_render_png_overlay() {
        let dir = make_temp_dir();
        let path = dir.join("overlay.PNG");
        render_overlay(&sample_collection(), &OverlayOptions::new().size(320, 240), &path)
            .unwrap();
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_render_empty_collection() {
        let dir = make_temp_dir();
        let err = render_overlay(
            &HistogramCollection::new(),
            &OverlayOptions::new(),
            dir.join("empty.svg"),
        )
        .unwrap_err();
        assert!(matches!(err, LepnuError::RenderError(_)));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_options_builder() {
        let options = OverlayOptions::new()
            .title("W -> mu nu")
            .size(800, 600)
            .stack_order(["ttbar", "wjets"]);
        assert_eq!(options.size, (800, 600));
        assert_eq!(
            options.stack_order.as_deref(),
            Some(&["ttbar".to_string(), "wjets".to_string()][..])
        );
        assert_eq!(options.y_label, "Events");
    }
}
