use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use plotters::prelude::*;
use thiserror::Error;

use crate::chart::{ChartSpec, ChartType};

const MARGIN: u32 = 24;
const GRID_LINES: usize = 5;
const BAR_WIDTH: f64 = 0.7;
const POINT_RADIUS: u32 = 4;
/// Values are clamped to this magnitude so spans and padding stay finite
const VALUE_LIMIT: f64 = f64::MAX / 4.0;

const AXIS_COLOR: RGBColor = RGBColor(60, 60, 60);
const GRID_COLOR: RGBColor = RGBColor(225, 225, 225);
/// Fill for bars
pub const BAR_COLOR: RGBColor = RGBColor(54, 162, 235);
/// Stroke for lines, area borders and points
pub const LINE_COLOR: RGBColor = RGBColor(255, 99, 132);

/// Canvas settings for rendering
///
/// Only the size is configurable; the palette is fixed so identical specs
/// always produce identical images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphOptions {
    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            width: 600,
            height: 400,
        }
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Canvas must be at least {min}x{min} pixels, got {width}x{height}")]
    Canvas { width: u32, height: u32, min: u32 },

    #[error("Drawing failed: {0}")]
    Draw(String),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

fn draw_error(e: impl ToString) -> RenderError {
    RenderError::Draw(e.to_string())
}

/// Rasterize a chart spec to PNG bytes
///
/// Rows are laid out left to right, one slot per row, in spec order. Cells
/// that are not numeric leave a gap: no bar, a break in the line or area,
/// no point. An empty spec still yields a valid image with axes and grid.
///
/// # Errors
/// * [`RenderError::Canvas`] if the canvas is too small to hold the margins
/// * [`RenderError::Draw`] or [`RenderError::Encode`] if plotting or PNG
///   encoding fails
pub fn render(spec: &ChartSpec, options: &GraphOptions) -> Result<Vec<u8>, RenderError> {
    let GraphOptions { width, height } = *options;
    let min = MARGIN * 2 + 1;
    if width < min || height < min {
        return Err(RenderError::Canvas { width, height, min });
    }

    let mut pixels = vec![0u8; width as usize * height as usize * 3];
    draw(spec, (width, height), &mut pixels)?;

    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(&pixels, width, height, ColorType::Rgb8)?;

    Ok(png)
}

fn draw(spec: &ChartSpec, size: (u32, u32), pixels: &mut [u8]) -> Result<(), RenderError> {
    let root = BitMapBackend::with_buffer(pixels, size).into_drawing_area();
    root.fill(&WHITE).map_err(draw_error)?;

    let series: Vec<Option<f64>> = spec
        .series()
        .into_iter()
        .map(|value| value.map(clamp_value))
        .collect();
    let slots = series.len().max(1) as f64;
    let (y_min, y_max) = value_bounds(&series);

    let mut chart = ChartBuilder::on(&root)
        .margin(MARGIN)
        .build_cartesian_2d(0f64..slots, y_min..y_max)
        .map_err(draw_error)?;

    // Grid and axes are plain geometry; no text is drawn so no font is needed
    let step = (y_max - y_min) / GRID_LINES as f64;
    chart
        .draw_series((0..=GRID_LINES).map(|k| {
            let y = y_min + step * k as f64;
            PathElement::new(vec![(0.0, y), (slots, y)], GRID_COLOR.stroke_width(1))
        }))
        .map_err(draw_error)?;
    chart
        .draw_series([
            PathElement::new(vec![(0.0, y_min), (0.0, y_max)], AXIS_COLOR.stroke_width(1)),
            PathElement::new(vec![(0.0, 0.0), (slots, 0.0)], AXIS_COLOR.stroke_width(1)),
        ])
        .map_err(draw_error)?;

    let points: Vec<(usize, f64)> = series
        .iter()
        .enumerate()
        .filter_map(|(i, value)| value.map(|v| (i, v)))
        .collect();

    match spec.chart_type {
        ChartType::Bar => {
            let inset = (1.0 - BAR_WIDTH) / 2.0;
            chart
                .draw_series(points.iter().map(|&(i, v)| {
                    let left = i as f64 + inset;
                    Rectangle::new([(left, 0.0), (left + BAR_WIDTH, v)], BAR_COLOR.filled())
                }))
                .map_err(draw_error)?;
        }
        ChartType::Line => {
            for segment in segments(&series) {
                chart
                    .draw_series(LineSeries::new(segment, LINE_COLOR.stroke_width(2)))
                    .map_err(draw_error)?;
            }
            chart
                .draw_series(points.iter().map(|&(i, v)| {
                    Circle::new((slot_center(i), v), POINT_RADIUS - 1, LINE_COLOR.filled())
                }))
                .map_err(draw_error)?;
        }
        ChartType::Area => {
            for segment in segments(&series) {
                chart
                    .draw_series(
                        AreaSeries::new(segment, 0.0, LINE_COLOR.mix(0.3).filled())
                            .border_style(LINE_COLOR.stroke_width(2)),
                    )
                    .map_err(draw_error)?;
            }
        }
        ChartType::Scatter => {
            chart
                .draw_series(points.iter().map(|&(i, v)| {
                    Circle::new((slot_center(i), v), POINT_RADIUS, LINE_COLOR.filled())
                }))
                .map_err(draw_error)?;
        }
    }

    root.present().map_err(draw_error)?;
    Ok(())
}

fn slot_center(i: usize) -> f64 {
    i as f64 + 0.5
}

/// Runs of consecutive numeric values, as plot coordinates
fn segments(series: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();

    for (i, value) in series.iter().enumerate() {
        match value {
            Some(v) => current.push((slot_center(i), *v)),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs
}

fn clamp_value(v: f64) -> f64 {
    v.clamp(-VALUE_LIMIT, VALUE_LIMIT)
}

/// Y range covering every value and zero, with a little headroom
fn value_bounds(series: &[Option<f64>]) -> (f64, f64) {
    let (min, max) = series
        .iter()
        .flatten()
        .map(|&v| clamp_value(v))
        .fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let span = max - min;
    if span == 0.0 {
        return (min, min + 1.0);
    }

    let pad = span * 0.05;
    let low = if min < 0.0 { min - pad } else { min };
    let high = if max > 0.0 { max + pad } else { max };
    (low, high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;

    const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn spec(chart_type: ChartType, values: Vec<CellValue>) -> ChartSpec {
        ChartSpec {
            chart_type,
            x_column: "Month".into(),
            y_column: "Sales".into(),
            labels: (0..values.len())
                .map(|i| CellValue::Text(format!("m{i}")))
                .collect(),
            values,
        }
    }

    fn count_color(png: &[u8], color: RGBColor) -> usize {
        let image = image::load_from_memory(png).unwrap().to_rgb8();
        image
            .pixels()
            .filter(|p| p.0 == [color.0, color.1, color.2])
            .count()
    }

    #[test]
    fn test_bar_chart_is_png_of_requested_size() {
        let png = render(
            &spec(ChartType::Bar, vec![CellValue::Int(100), CellValue::Int(150)]),
            &GraphOptions::default(),
        )
        .unwrap();

        assert!(png.starts_with(PNG_SIGNATURE));
        let image = image::load_from_memory(&png).unwrap();
        assert_eq!((image.width(), image.height()), (600, 400));
        assert!(count_color(&png, BAR_COLOR) > 0);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let spec = spec(
            ChartType::Line,
            vec![CellValue::Int(3), CellValue::Float(-1.5), CellValue::Int(8)],
        );
        let options = GraphOptions::default();
        assert_eq!(render(&spec, &options).unwrap(), render(&spec, &options).unwrap());
    }

    #[test]
    fn test_empty_series_renders_empty_chart() {
        for chart_type in [ChartType::Bar, ChartType::Line, ChartType::Area, ChartType::Scatter] {
            let png = render(&spec(chart_type, Vec::new()), &GraphOptions::default()).unwrap();
            assert!(png.starts_with(PNG_SIGNATURE));
            assert_eq!(count_color(&png, BAR_COLOR), 0);
        }
    }

    #[test]
    fn test_non_numeric_values_become_gaps() {
        let values = vec![
            CellValue::Int(5),
            CellValue::Text("n/a".into()),
            CellValue::Null,
            CellValue::Int(7),
        ];
        for chart_type in [ChartType::Bar, ChartType::Line, ChartType::Area, ChartType::Scatter] {
            let png = render(&spec(chart_type, values.clone()), &GraphOptions::default()).unwrap();
            assert!(png.starts_with(PNG_SIGNATURE));
        }
        assert_eq!(
            segments(&[Some(5.0), None, None, Some(7.0), Some(8.0)]),
            vec![vec![(0.5, 5.0)], vec![(3.5, 7.0), (4.5, 8.0)]]
        );
    }

    #[test]
    fn test_all_gaps_draw_no_bars() {
        let png = render(
            &spec(ChartType::Bar, vec![CellValue::Text("x".into()), CellValue::Null]),
            &GraphOptions::default(),
        )
        .unwrap();
        assert_eq!(count_color(&png, BAR_COLOR), 0);
    }

    #[test]
    fn test_bounds_include_zero() {
        assert_eq!(value_bounds(&[]), (0.0, 1.0));
        assert_eq!(value_bounds(&[Some(0.0)]), (0.0, 1.0));
        let (low, high) = value_bounds(&[Some(10.0), Some(20.0)]);
        assert_eq!(low, 0.0);
        assert!(high > 20.0);
        let (low, high) = value_bounds(&[Some(-4.0), None]);
        assert!(low < -4.0);
        assert_eq!(high, 0.0);
    }

    #[test]
    fn test_extreme_values_keep_bounds_finite() {
        let (low, high) = value_bounds(&[Some(f64::MAX), Some(-f64::MAX)]);
        assert!(low.is_finite() && high.is_finite());
        assert!(low < 0.0 && high > 0.0);
        assert!((high - low).is_finite());

        let values = vec![
            CellValue::Float(1e308),
            CellValue::Float(-1e308),
            CellValue::Int(1),
        ];
        for chart_type in [ChartType::Bar, ChartType::Line, ChartType::Area, ChartType::Scatter] {
            let png = render(&spec(chart_type, values.clone()), &GraphOptions::default()).unwrap();
            assert!(png.starts_with(PNG_SIGNATURE));
        }
    }

    #[test]
    fn test_tiny_canvas_is_rejected() {
        let err = render(
            &spec(ChartType::Bar, Vec::new()),
            &GraphOptions {
                width: 10,
                height: 10,
            },
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Canvas { .. }));
    }
}
