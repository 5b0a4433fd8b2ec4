//! Bar chart rendering for value frequencies.
//!
//! Bars are laid out left to right in the order given, one slot per value,
//! each bar half as wide as its slot. The y axis runs from zero to the first
//! "nice" tick (1, 2 or 5 times a power of ten) at or above the largest count,
//! with a light grid line at every tick. Text is rasterised with `ab_glyph`
//! from the DejaVu Sans face bundled in `assets/`.

use std::path::Path;

use ab_glyph::{point, Font, FontRef, ScaleFont};
use image::{ImageFormat, Rgb, RgbImage};

use survey_etl_types::{EtlError, Result};

static FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    pub margin_left: u32,
    pub margin_right: u32,
    pub margin_top: u32,
    pub margin_bottom: u32,
    pub background: Rgb<u8>,
    pub bar: Rgb<u8>,
    pub axis: Rgb<u8>,
    pub grid: Rgb<u8>,
    pub text: Rgb<u8>,
    /// Upper bound on the number of y ticks.
    pub max_ticks: usize,
    pub title_px: f32,
    pub label_px: f32,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 600,
            margin_left: 80,
            margin_right: 40,
            margin_top: 60,
            margin_bottom: 80,
            background: Rgb([255, 255, 255]),
            bar: Rgb([31, 119, 180]),
            axis: Rgb([0, 0, 0]),
            grid: Rgb([221, 221, 221]),
            text: Rgb([0, 0, 0]),
            max_ticks: 10,
            title_px: 20.0,
            label_px: 14.0,
        }
    }
}

/// Title and axis captions drawn around the plot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChartText {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
}

impl ChartText {
    /// Captions for a frequency chart of `column`.
    pub fn for_column(column: &str) -> Self {
        Self {
            title: format!("Responses per {column}"),
            x_label: column.to_string(),
            y_label: "Responses".to_string(),
        }
    }
}

/// Pixel rectangle of one bar; `y` is the top edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Computed geometry of a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartLayout {
    pub bars: Vec<BarRect>,
    /// Horizontal space given to each value.
    pub slot: u32,
    pub tick_step: usize,
    pub axis_max: usize,
}

impl ChartStyle {
    fn plot_width(&self) -> u32 {
        self.width
            .saturating_sub(self.margin_left + self.margin_right)
            .max(1)
    }

    fn plot_height(&self) -> u32 {
        self.height
            .saturating_sub(self.margin_top + self.margin_bottom)
            .max(1)
    }

    fn baseline(&self) -> u32 {
        self.margin_top + self.plot_height()
    }
}

/// Smallest 1/2/5 × 10^k step that covers `max` in at most `max_ticks` ticks.
fn nice_step(max: usize, max_ticks: usize) -> usize {
    let max_ticks = max_ticks.max(1);
    let mut magnitude = 1usize;
    loop {
        for factor in [1, 2, 5] {
            let step = factor * magnitude;
            if max.div_ceil(step) <= max_ticks {
                return step;
            }
        }
        magnitude = magnitude.saturating_mul(10);
    }
}

pub fn layout(counts: &[(String, usize)], style: &ChartStyle) -> ChartLayout {
    let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(0).max(1);
    let tick_step = nice_step(max_count, style.max_ticks);
    let axis_max = max_count.div_ceil(tick_step) * tick_step;

    let plot_w = style.plot_width();
    let plot_h = style.plot_height() as u64;
    let baseline = style.baseline();
    let n = counts.len().max(1) as u32;
    let slot = (plot_w / n).max(1);
    let bar_width = (slot / 2).max(1);

    let bars = counts
        .iter()
        .enumerate()
        .map(|(i, (_, count))| {
            let height = ((*count as u64 * plot_h) / axis_max as u64) as u32;
            BarRect {
                x: style.margin_left + i as u32 * slot + slot / 4,
                y: baseline - height,
                width: bar_width,
                height,
            }
        })
        .collect();

    ChartLayout {
        bars,
        slot,
        tick_step,
        axis_max,
    }
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

fn load_font() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(FONT_BYTES)
        .map_err(|e| EtlError::Chart(format!("bundled font: {e}")))
}

fn text_width(font: &FontRef<'_>, size: f32, text: &str) -> f32 {
    let scaled = font.as_scaled(size);
    text.chars().map(|c| scaled.h_advance(scaled.glyph_id(c))).sum()
}

/// Shorten `text` with a trailing ellipsis until it fits in `max_width` pixels.
fn fit_text(font: &FontRef<'_>, size: f32, text: &str, max_width: f32) -> String {
    if text_width(font, size, text) <= max_width {
        return text.to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    while !chars.is_empty() {
        chars.pop();
        let candidate: String = chars.iter().chain(std::iter::once(&'…')).collect();
        if text_width(font, size, &candidate) <= max_width {
            return candidate;
        }
    }
    String::new()
}

/// Draw `text` with its top-left corner at `(x, y)`, blending glyph coverage
/// into the existing pixels.
fn draw_text(
    img: &mut RgbImage,
    font: &FontRef<'_>,
    size: f32,
    (x, y): (f32, f32),
    color: Rgb<u8>,
    text: &str,
) {
    let scaled = font.as_scaled(size);
    let (width, height) = (img.width() as i64, img.height() as i64);
    let mut caret = x;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        let glyph = id.with_scale_and_position(size, point(caret, y + scaled.ascent()));
        caret += scaled.h_advance(id);
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let px = bounds.min.x as i64 + gx as i64;
            let py = bounds.min.y as i64 + gy as i64;
            if px < 0 || py < 0 || px >= width || py >= height {
                return;
            }
            let alpha = coverage.clamp(0.0, 1.0);
            let pixel = img.get_pixel_mut(px as u32, py as u32);
            for (channel, ink) in pixel.0.iter_mut().zip(color.0) {
                *channel = (*channel as f32 * (1.0 - alpha) + ink as f32 * alpha).round() as u8;
            }
        });
    }
}

/// Draw the chart into a new image.
pub fn render(
    counts: &[(String, usize)],
    text: &ChartText,
    style: &ChartStyle,
) -> Result<RgbImage> {
    let font = load_font()?;
    let geometry = layout(counts, style);
    let mut img = RgbImage::from_pixel(style.width, style.height, style.background);

    let left = style.margin_left;
    let plot_w = style.plot_width();
    let plot_h = style.plot_height() as u64;
    let baseline = style.baseline();
    let label_px = style.label_px;

    // Grid lines, y ticks and their values
    let mut tick = 0;
    while tick <= geometry.axis_max {
        let offset = ((tick as u64 * plot_h) / geometry.axis_max as u64) as u32;
        let y = baseline - offset;
        if tick > 0 {
            fill_rect(&mut img, left, y, plot_w, 1, style.grid);
        }
        fill_rect(&mut img, left.saturating_sub(6), y, 6, 1, style.axis);
        let value = tick.to_string();
        let x = left as f32 - 10.0 - text_width(&font, label_px, &value);
        draw_text(&mut img, &font, label_px, (x, y as f32 - label_px / 2.0), style.text, &value);
        tick += geometry.tick_step;
    }

    // Bars with their category labels underneath
    let slot = geometry.slot as f32;
    for (bar, (value, _)) in geometry.bars.iter().zip(counts) {
        fill_rect(&mut img, bar.x, bar.y, bar.width, bar.height, style.bar);
        let center = bar.x + bar.width / 2;
        fill_rect(&mut img, center, baseline, 1, 6, style.axis);
        let label = fit_text(&font, label_px, value, slot - 4.0);
        let x = center as f32 - text_width(&font, label_px, &label) / 2.0;
        draw_text(&mut img, &font, label_px, (x, baseline as f32 + 10.0), style.text, &label);
    }

    // Axes
    fill_rect(&mut img, left, style.margin_top, 1, baseline - style.margin_top + 1, style.axis);
    fill_rect(&mut img, left, baseline, plot_w, 1, style.axis);

    // Captions
    let title_x = (style.width as f32 - text_width(&font, style.title_px, &text.title)) / 2.0;
    draw_text(&mut img, &font, style.title_px, (title_x, 10.0), style.text, &text.title);
    draw_text(
        &mut img,
        &font,
        label_px,
        (8.0, style.margin_top as f32 - 2.0 * label_px - 6.0),
        style.text,
        &text.y_label,
    );
    let x_label_width = text_width(&font, label_px, &text.x_label);
    let x_label_x = left as f32 + (plot_w as f32 - x_label_width) / 2.0;
    draw_text(
        &mut img,
        &font,
        label_px,
        (x_label_x, baseline as f32 + 20.0 + 2.0 * label_px),
        style.text,
        &text.x_label,
    );

    Ok(img)
}

/// Render the chart and write it as PNG, replacing any existing file.
pub fn save(
    counts: &[(String, usize)],
    text: &ChartText,
    path: &Path,
    style: &ChartStyle,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    render(counts, text, style)?
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| EtlError::Chart(e.to_string()))?;
    tracing::info!(path = %path.display(), bars = counts.len(), "Chart written");
    Ok(())
}
