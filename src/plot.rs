//! Sweep result charts.

use std::path::Path;

use image::{ImageResult, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use etb_common::data::SweepRow;

pub const WIDTH: u32 = 800;
pub const PANEL_HEIGHT: u32 = 240;
const MARGIN: u32 = 40;
const GRID_LINES: u32 = 5;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FRAME: Rgba<u8> = Rgba([60, 60, 60, 255]);
const GRID: Rgba<u8> = Rgba([220, 220, 220, 255]);

/// Voltage, current and power panels, top to bottom.
const SERIES: [(fn(&SweepRow) -> f64, Rgba<u8>); 3] = [
    (volt, Rgba([31, 119, 180, 255])),
    (current, Rgba([214, 39, 40, 255])),
    (power, Rgba([44, 160, 44, 255])),
];

fn volt(row: &SweepRow) -> f64 { row.volt }
fn current(row: &SweepRow) -> f64 { row.current }
fn power(row: &SweepRow) -> f64 { row.power }

/// Smallest and largest value, widened if all values are equal.
fn range<I: Iterator<Item = f64>>(values: I) -> Option<(f64, f64)> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if min > max {
        None
    } else if (max - min).abs() < f64::EPSILON {
        Some((min - 0.5, max + 0.5))
    } else {
        Some((min, max))
    }
}

/// Inner plotting area of panel `index`.
fn area(index: u32) -> Rect {
    Rect::at(MARGIN as i32, (index * PANEL_HEIGHT + MARGIN / 2) as i32)
        .of_size(WIDTH - 2 * MARGIN, PANEL_HEIGHT - MARGIN)
}

fn draw_grid(image: &mut RgbaImage, area: Rect) {
    for i in 1..GRID_LINES {
        let x = area.left() as f32 + area.width() as f32 * i as f32 / GRID_LINES as f32;
        let y = area.top() as f32 + area.height() as f32 * i as f32 / GRID_LINES as f32;
        draw_line_segment_mut(image, (x, area.top() as f32), (x, area.bottom() as f32), GRID);
        draw_line_segment_mut(image, (area.left() as f32, y), (area.right() as f32, y), GRID);
    }
    draw_hollow_rect_mut(image, area, FRAME);
}

/// Plot measured rows against their Vout code. Summary rows are skipped.
pub fn render(rows: &[SweepRow]) -> RgbaImage {
    let height = PANEL_HEIGHT * SERIES.len() as u32;
    let mut image = RgbaImage::new(WIDTH, height);
    draw_filled_rect_mut(&mut image, Rect::at(0, 0).of_size(WIDTH, height), BACKGROUND);

    let mut points: Vec<(u8, &SweepRow)> = rows.iter()
        .filter_map(|row| row.code().map(|code| (code, row)))
        .collect();
    points.sort_by_key(|(code, _)| *code);

    let codes = range(points.iter().map(|(code, _)| *code as f64));

    for (index, (value, colour)) in SERIES.iter().enumerate() {
        let area = area(index as u32);
        draw_grid(&mut image, area);

        let (codes, values) = match (codes, range(points.iter().map(|(_, row)| value(row)))) {
            (Some(c), Some(v)) => (c, v),
            _ => continue,
        };

        let scale = |code: u8, v: f64| -> (f32, f32) {
            let x = (code as f64 - codes.0) / (codes.1 - codes.0);
            let y = (v - values.0) / (values.1 - values.0);
            (area.left() as f32 + x as f32 * (area.width() - 1) as f32,
             area.bottom() as f32 - y as f32 * (area.height() - 1) as f32)
        };

        let line: Vec<(f32, f32)> = points.iter()
            .map(|(code, row)| scale(*code, value(row)))
            .collect();
        for pair in line.windows(2) {
            draw_line_segment_mut(&mut image, pair[0], pair[1], *colour);
        }
        if let [single] = line.as_slice() {
            draw_filled_rect_mut(&mut image, Rect::at(single.0 as i32 - 1, single.1 as i32 - 1).of_size(3, 3), *colour);
        }
    }

    image
}

/// Render and write a PNG.
pub fn save(rows: &[SweepRow], path: &Path) -> ImageResult<()> {
    render(rows).save(path)
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn rows() -> Vec<SweepRow> {
        vec![
            SweepRow::step(150, 1.5, 4.0, 6.0),
            SweepRow::step(200, 2.5, 6.0, 15.0),
            SweepRow::step(240, 3.3, 8.0, 26.4),
        ]
    }

    #[test]
    pub fn value_ranges() {
        assert_eq!(range(vec![2.0, -1.0, 4.0].into_iter()), Some((-1.0, 4.0)));
        assert_eq!(range(vec![3.0, 3.0].into_iter()), Some((2.5, 3.5)));
        assert_eq!(range(Vec::new().into_iter()), None);
    }

    #[test]
    pub fn series_span_their_panels() {
        let image = render(&rows());
        assert_eq!(image.dimensions(), (WIDTH, 3 * PANEL_HEIGHT));

        // Lowest code at the bottom left, highest at the top right of each panel.
        for (index, (_, colour)) in SERIES.iter().enumerate() {
            let area = area(index as u32);
            assert_eq!(image.get_pixel(area.left() as u32, area.bottom() as u32), colour);
            assert_eq!(image.get_pixel(area.right() as u32, area.top() as u32), colour);
        }
    }

    #[test]
    pub fn summary_rows_are_ignored() {
        let mut with_summary = rows();
        with_summary.push(SweepRow { dec: "max".to_string(), volt: 99.0, current: 99.0, power: 99.0 });
        assert_eq!(render(&with_summary), render(&rows()));
    }

    #[test]
    pub fn empty_sweep_still_renders_frames() {
        let image = render(&[]);
        let area = area(0);
        assert_eq!(image.get_pixel(area.left() as u32, area.top() as u32), &FRAME);
    }

    #[test]
    pub fn writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.png");
        save(&rows(), &path).unwrap();
        assert_eq!(image::open(&path).unwrap().into_rgba8(), render(&rows()));
    }
}
