use serde::{Deserialize, Serialize};

use crate::session::LiveUpdate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Color(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }
}

const RAW_COLOR: u32 = 0x1F6FEB;
const FILTERED_COLOR: u32 = 0xD62728;
const MAX_PLOT_POINTS: usize = 1024;

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

fn line(name: &str, elapsed_s: &[f64], values: &[f64], width: f32, color: u32) -> Series {
    let points: Vec<[f64; 2]> = elapsed_s
        .iter()
        .zip(values)
        .map(|(t, v)| [*t, *v])
        .collect();
    Series::Line(LineSeries {
        name: name.into(),
        points: decimate_points(&points, MAX_PLOT_POINTS),
        style: Style {
            width,
            dash: None,
            color: Color(color),
        },
    })
}

/// Raw + filtered PPG traces against elapsed seconds; the payload a display
/// collaborator renders.
pub fn figure_from_series(elapsed_s: &[f64], raw: &[f64], filtered: &[f64]) -> Figure {
    let mut fig = Figure::new(Some("PPG signal".into()));
    fig.x.label = Some("Time (s)".into());
    fig.y.label = Some("Intensity (normalized)".into());
    fig.add_series(line("Raw green", elapsed_s, raw, 1.4, RAW_COLOR));
    fig.add_series(line("Filtered", elapsed_s, filtered, 1.4, FILTERED_COLOR));
    fig
}

pub fn figure_from_update(update: &LiveUpdate) -> Figure {
    figure_from_series(&update.elapsed_s, &update.raw, &update.filtered)
}
