//! Chart descriptions produced by reports and their PNG rendering with Plotters

use crate::error::AnalysisError;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

/// Color palette for series, groups and clusters
const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

const SIZE: (u32, u32) = (1000, 600);
const PANEL_SIZE: (u32, u32) = (1000, 1000);

/// Title, axis labels and output file stem of one chart
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub file_stem: String,
}

impl ChartSpec {
    pub fn new(title: impl Into<String>, file_stem: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            x_label: String::new(),
            y_label: String::new(),
            file_stem: file_stem.into(),
        }
    }

    pub fn axes(mut self, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        self.x_label = x_label.into();
        self.y_label = y_label.into();
        self
    }
}

/// Named values aligned with the categories of a chart; `None` is not drawn
#[derive(Debug, Clone, PartialEq)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl DataSeries {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    /// Index into the chart's group names, selects the color
    pub group: usize,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartData {
    Line {
        categories: Vec<String>,
        series: Vec<DataSeries>,
    },
    /// Grouped bars, one bar per series within each category
    Bar {
        categories: Vec<String>,
        series: Vec<DataSeries>,
    },
    Scatter {
        groups: Vec<String>,
        points: Vec<ScatterPoint>,
    },
    Heatmap {
        rows: Vec<String>,
        columns: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    },
    /// One line chart per series, stacked vertically over shared categories
    Panels {
        categories: Vec<String>,
        panels: Vec<DataSeries>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub spec: ChartSpec,
    pub data: ChartData,
}

impl Chart {
    pub fn new(spec: ChartSpec, data: ChartData) -> Self {
        Self { spec, data }
    }
}

/// `<dir>/<report>_<stem>.png`
pub fn chart_path(dir: &Path, report: &str, stem: &str) -> PathBuf {
    dir.join(format!("{report}_{stem}.png"))
}

/// Draw `chart` to a PNG file at `path`
pub fn render_chart(chart: &Chart, path: &Path) -> crate::Result<()> {
    let size = match chart.data {
        ChartData::Panels { .. } => PANEL_SIZE,
        _ => SIZE,
    };
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    match &chart.data {
        ChartData::Line { categories, series } => {
            draw_lines(&root, &chart.spec, categories, series)?
        }
        ChartData::Bar { categories, series } => draw_bars(&root, &chart.spec, categories, series)?,
        ChartData::Scatter { groups, points } => draw_scatter(&root, &chart.spec, groups, points)?,
        ChartData::Heatmap {
            rows,
            columns,
            values,
        } => draw_heatmap(&root, &chart.spec, rows, columns, values)?,
        ChartData::Panels { categories, panels } => {
            if panels.is_empty() {
                return Err(AnalysisError::Render(format!(
                    "chart `{}` has no panels",
                    chart.spec.title
                )));
            }
            let titled = root.titled(&chart.spec.title, ("sans-serif", 30))?;
            let areas = titled.split_evenly((panels.len(), 1));
            for (area, panel) in areas.iter().zip(panels) {
                let spec = ChartSpec::new(panel.name.clone(), String::new())
                    .axes(chart.spec.x_label.clone(), panel.name.clone());
                draw_lines(area, &spec, categories, std::slice::from_ref(panel))?;
            }
        }
    }

    root.present()?;
    log::debug!("chart saved to: {}", path.display());
    Ok(())
}

fn draw_lines(
    area: &DrawingArea<BitMapBackend, Shift>,
    spec: &ChartSpec,
    categories: &[String],
    series: &[DataSeries],
) -> crate::Result<()> {
    let (y_min, y_max) = value_range(series.iter().flat_map(|s| s.values.iter().flatten().copied()), false);
    let x_max = categories.len().max(1) as f64 - 0.5;

    let mut chart = ChartBuilder::on(area)
        .caption(&spec.title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .axis_desc_style(("sans-serif", 15))
        .x_labels(categories.len().clamp(1, 12))
        .x_label_formatter(&|x| category_label(categories, *x))
        .draw()?;

    for (i, s) in series.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let points: Vec<(f64, f64)> = s
            .values
            .iter()
            .enumerate()
            .filter_map(|(x, v)| v.map(|v| (x as f64, v)))
            .collect();
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))?
            .label(s.name.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    if series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_bars(
    area: &DrawingArea<BitMapBackend, Shift>,
    spec: &ChartSpec,
    categories: &[String],
    series: &[DataSeries],
) -> crate::Result<()> {
    let (y_min, y_max) = value_range(series.iter().flat_map(|s| s.values.iter().flatten().copied()), true);
    let x_max = categories.len().max(1) as f64 - 0.5;

    let mut chart = ChartBuilder::on(area)
        .caption(&spec.title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .axis_desc_style(("sans-serif", 15))
        .x_labels(categories.len().clamp(1, 20))
        .x_label_formatter(&|x| category_label(categories, *x))
        .draw()?;

    let width = 0.8 / series.len().max(1) as f64;
    for (j, s) in series.iter().enumerate() {
        let color = PALETTE[j % PALETTE.len()];
        let bars = s.values.iter().enumerate().filter_map(|(i, v)| {
            v.map(|v| {
                let left = i as f64 - 0.4 + j as f64 * width;
                Rectangle::new([(left, 0.0), (left + width, v)], color.filled())
            })
        });
        chart
            .draw_series(bars)?
            .label(s.name.clone())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    if series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_scatter(
    area: &DrawingArea<BitMapBackend, Shift>,
    spec: &ChartSpec,
    groups: &[String],
    points: &[ScatterPoint],
) -> crate::Result<()> {
    let (x_min, x_max) = value_range(points.iter().map(|p| p.x), false);
    let (y_min, y_max) = value_range(points.iter().map(|p| p.y), false);

    let mut chart = ChartBuilder::on(area)
        .caption(&spec.title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let group_count = groups.len().max(1);
    for group in 0..group_count {
        let color = PALETTE[group % PALETTE.len()];
        let members = points
            .iter()
            .filter(|p| p.group % group_count == group)
            .map(|p| Circle::new((p.x, p.y), 4, color.filled()));
        let drawn = chart.draw_series(members)?;
        if let Some(name) = groups.get(group) {
            drawn
                .label(name.clone())
                .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
        }
    }

    chart.draw_series(points.iter().filter_map(|p| {
        p.label
            .as_ref()
            .map(|label| Text::new(label.clone(), (p.x, p.y), ("sans-serif", 13)))
    }))?;

    if !groups.is_empty() {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_heatmap(
    area: &DrawingArea<BitMapBackend, Shift>,
    spec: &ChartSpec,
    rows: &[String],
    columns: &[String],
    values: &[Vec<Option<f64>>],
) -> crate::Result<()> {
    let (lo, hi) = values
        .iter()
        .flatten()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let n_rows = rows.len().max(1) as f64;
    let n_cols = columns.len().max(1) as f64;

    let mut chart = ChartBuilder::on(area)
        .caption(&spec.title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(90)
        .build_cartesian_2d(-0.5f64..n_cols - 0.5, -0.5f64..n_rows - 0.5)?;

    // first row at the top
    let row_label = |y: f64| category_label(rows, n_rows - 1.0 - y);
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .axis_desc_style(("sans-serif", 15))
        .x_labels(columns.len().clamp(1, 20))
        .y_labels(rows.len().clamp(1, 30))
        .x_label_formatter(&|x| category_label(columns, *x))
        .y_label_formatter(&|y| row_label(*y))
        .draw()?;

    let cells = values.iter().enumerate().flat_map(|(r, row)| {
        row.iter().enumerate().filter_map(move |(c, v)| {
            v.map(|v| {
                let t = if hi > lo { (v - lo) / (hi - lo) } else { 1.0 };
                let y = n_rows - 1.0 - r as f64;
                let x = c as f64;
                Rectangle::new(
                    [(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)],
                    heat_color(t).filled(),
                )
            })
        })
    });
    chart.draw_series(cells)?;
    Ok(())
}

/// White to dark blue as `t` goes from 0 to 1
fn heat_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let channel = |from: f64, to: f64| (from + (to - from) * t).round() as u8;
    RGBColor(channel(247.0, 8.0), channel(251.0, 48.0), channel(255.0, 107.0))
}

/// Axis bounds covering `values` with 5% padding
fn value_range(values: impl Iterator<Item = f64>, include_zero: bool) -> (f64, f64) {
    let (mut lo, mut hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return (0.0, 1.0);
    }
    if include_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    if lo == hi {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    let lo = if include_zero && lo == 0.0 { 0.0 } else { lo - pad };
    (lo, hi + pad)
}

/// Category name at an axis position; blank between categories
fn category_label(categories: &[String], position: f64) -> String {
    let index = position.round();
    if (position - index).abs() > 1e-6 || index < 0.0 {
        return String::new();
    }
    categories.get(index as usize).cloned().unwrap_or_default()
}
