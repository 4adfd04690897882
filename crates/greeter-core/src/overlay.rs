//! Per-tick detection overlay.
//!
//! [`build_overlay`] turns one tick's detections into a display list; a
//! [`Canvas`] paints it. The overlay is shown mirrored together with the
//! video, so name labels are counter-mirrored around their centre while boxes
//! are left in frame coordinates. Nothing is retained between ticks.

use crate::types::{Detection, FrameSize, Profile};
use ab_glyph::{FontArc, PxScale};
use image::{imageops, Pixel, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("failed to read font {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid font file: {0}")]
    InvalidFont(String),
}

/// Load a TrueType/OpenType font for label text.
pub fn load_font(path: &Path) -> Result<FontArc, OverlayError> {
    let bytes = std::fs::read(path).map_err(|source| OverlayError::Io {
        path: path.display().to_string(),
        source,
    })?;
    FontArc::try_from_vec(bytes).map_err(|e| OverlayError::InvalidFont(format!("{}: {e}", path.display())))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub accent: Rgba<u8>,
    pub neutral: Rgba<u8>,
    pub label_text: Rgba<u8>,
    pub known_line_width: u32,
    pub unknown_line_width: u32,
    pub corner_length: f32,
    pub corner_line_width: u32,
    pub font_size: f32,
    pub label_padding: f32,
    pub label_height: f32,
    /// Gap between the label's bottom edge and the box top.
    pub label_gap: f32,
    pub label_radius: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            accent: Rgba([34, 197, 94, 255]),
            neutral: Rgba([107, 114, 128, 255]),
            label_text: Rgba([255, 255, 255, 255]),
            known_line_width: 3,
            unknown_line_width: 2,
            corner_length: 20.0,
            corner_line_width: 4,
            font_size: 16.0,
            label_padding: 12.0,
            label_height: 32.0,
            label_gap: 8.0,
            label_radius: 8.0,
        }
    }
}

/// A pill-shaped name label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSpec {
    pub text: String,
    pub center_x: f32,
    pub top: f32,
    pub height: f32,
    pub padding: f32,
    pub radius: f32,
    pub font_size: f32,
    pub fill: Rgba<u8>,
    pub text_color: Rgba<u8>,
    /// Counter-mirror the label horizontally around `center_x`.
    pub mirrored: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    StrokeRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Rgba<u8>,
        line_width: u32,
    },
    Polyline {
        points: Vec<(f32, f32)>,
        color: Rgba<u8>,
        line_width: u32,
    },
    Label(LabelSpec),
}

/// Display list for one tick. Painting always starts from a cleared surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub size: FrameSize,
    pub ops: Vec<DrawOp>,
}

impl Overlay {
    pub fn empty(size: FrameSize) -> Self {
        Self { size, ops: Vec::new() }
    }

    pub fn paint<C: Canvas + ?Sized>(&self, canvas: &mut C) {
        canvas.clear();
        for op in &self.ops {
            match op {
                DrawOp::StrokeRect { x, y, width, height, color, line_width } => {
                    canvas.stroke_rect(*x, *y, *width, *height, *color, *line_width)
                }
                DrawOp::Polyline { points, color, line_width } => {
                    canvas.polyline(points, *color, *line_width)
                }
                DrawOp::Label(label) => canvas.label(label),
            }
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &LabelSpec> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Label(l) => Some(l),
            _ => None,
        })
    }
}

/// Drawing surface for overlays.
pub trait Canvas {
    fn clear(&mut self);
    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba<u8>, line_width: u32);
    fn polyline(&mut self, points: &[(f32, f32)], color: Rgba<u8>, line_width: u32);
    fn label(&mut self, label: &LabelSpec);
}

/// Build the display list for one tick's detections.
///
/// Matched faces get the accent colour and a `WELCOME <NAME>` label; unknown
/// faces, or matches whose profile has left the roster, get no label.
pub fn build_overlay(
    detections: &[Detection],
    profiles: &[Profile],
    size: FrameSize,
    style: &OverlayStyle,
) -> Overlay {
    let mut ops = Vec::with_capacity(detections.len() * 6);

    for detection in detections {
        let b = &detection.bbox;
        let known = detection.label.is_known();
        let color = if known { style.accent } else { style.neutral };

        ops.push(DrawOp::StrokeRect {
            x: b.x,
            y: b.y,
            width: b.width,
            height: b.height,
            color,
            line_width: if known { style.known_line_width } else { style.unknown_line_width },
        });

        for points in corner_accents(b.x, b.y, b.width, b.height, style.corner_length) {
            ops.push(DrawOp::Polyline {
                points: points.to_vec(),
                color,
                line_width: style.corner_line_width,
            });
        }

        let profile = detection
            .label
            .profile_id()
            .and_then(|id| profiles.iter().find(|p| p.id == id));
        if let Some(profile) = profile {
            ops.push(DrawOp::Label(LabelSpec {
                text: format!("WELCOME {}", profile.name.to_uppercase()),
                center_x: b.x + b.width / 2.0,
                top: b.y - style.label_height - style.label_gap,
                height: style.label_height,
                padding: style.label_padding,
                radius: style.label_radius,
                font_size: style.font_size,
                fill: style.accent,
                text_color: style.label_text,
                mirrored: true,
            }));
        }
    }

    Overlay { size, ops }
}

/// Three-point strokes hugging each corner: TL, TR, BL, BR.
fn corner_accents(x: f32, y: f32, w: f32, h: f32, len: f32) -> [[(f32, f32); 3]; 4] {
    let (r, b) = (x + w, y + h);
    [
        [(x, y + len), (x, y), (x + len, y)],
        [(r - len, y), (r, y), (r, y + len)],
        [(x, b - len), (x, b), (x + len, b)],
        [(r - len, b), (r, b), (r, b - len)],
    ]
}

/// Paints overlays onto a transparent RGBA image.
pub struct RasterCanvas {
    image: RgbaImage,
    font: Option<FontArc>,
}

impl RasterCanvas {
    pub fn new(size: FrameSize, font: Option<FontArc>) -> Self {
        Self {
            image: RgbaImage::new(size.width, size.height),
            font,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        match &self.font {
            Some(font) => text_size(PxScale::from(font_size), font, text).0 as f32,
            // Rough advance for a bold sans face.
            None => text.chars().count() as f32 * font_size * 0.6,
        }
    }

    fn render_label(&self, label: &LabelSpec) -> RgbaImage {
        let width = (self.text_width(&label.text, label.font_size) + label.padding * 2.0).ceil().max(1.0) as u32;
        let height = label.height.ceil().max(1.0) as u32;
        let mut tile = RgbaImage::new(width, height);
        fill_rounded_rect(&mut tile, label.radius.round() as i32, label.fill);

        match &self.font {
            Some(font) => {
                let scale = PxScale::from(label.font_size);
                let (_, text_h) = text_size(scale, font, &label.text);
                let ty = (height as i32 - text_h as i32) / 2;
                draw_text_mut(&mut tile, label.text_color, label.padding.round() as i32, ty, scale, font, &label.text);
            }
            // No font: one block per visible character, at the same advance
            // `text_width` assumes.
            None => {
                let advance = label.font_size * 0.6;
                let glyph_w = (advance * 0.7).round().max(1.0) as u32;
                let glyph_h = (label.font_size * 0.7).round().max(1.0) as u32;
                let top = (height as i32 - glyph_h as i32) / 2;
                for (i, c) in label.text.chars().enumerate() {
                    if c.is_whitespace() {
                        continue;
                    }
                    let left = (label.padding + i as f32 * advance + advance * 0.15).round() as i32;
                    draw_filled_rect_mut(&mut tile, Rect::at(left, top).of_size(glyph_w, glyph_h), label.text_color);
                }
            }
        }

        if label.mirrored {
            imageops::flip_horizontal(&tile)
        } else {
            tile
        }
    }
}

impl Canvas for RasterCanvas {
    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba<u8>, line_width: u32) {
        // Strokes are centred on the outline, as a 2D canvas draws them.
        let first = -(line_width as i32 / 2);
        for i in 0..line_width as i32 {
            let grow = first + i;
            let w = width.round() as i32 + 2 * grow;
            let h = height.round() as i32 + 2 * grow;
            if w <= 0 || h <= 0 {
                continue;
            }
            let rect = Rect::at(x.round() as i32 - grow, y.round() as i32 - grow).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut self.image, rect, color);
        }
    }

    fn polyline(&mut self, points: &[(f32, f32)], color: Rgba<u8>, line_width: u32) {
        let half = line_width as f32 / 2.0;
        for seg in points.windows(2) {
            let ((x0, y0), (x1, y1)) = (seg[0], seg[1]);
            if x0 == x1 || y0 == y1 {
                // Axis-aligned: a filled rectangle covering the stroke, caps included.
                let left = (x0.min(x1) - half).round() as i32;
                let top = (y0.min(y1) - half).round() as i32;
                let w = ((x1 - x0).abs() + line_width as f32).round().max(1.0) as u32;
                let h = ((y1 - y0).abs() + line_width as f32).round().max(1.0) as u32;
                draw_filled_rect_mut(&mut self.image, Rect::at(left, top).of_size(w, h), color);
            } else {
                for i in 0..line_width.max(1) {
                    let off = i as f32 - half;
                    draw_line_segment_mut(&mut self.image, (x0 + off, y0), (x1 + off, y1), color);
                }
            }
        }
    }

    fn label(&mut self, label: &LabelSpec) {
        let tile = self.render_label(label);
        let left = (label.center_x - tile.width() as f32 / 2.0).round() as i64;
        let top = label.top.round() as i64;
        let (w, h) = (self.image.width() as i64, self.image.height() as i64);

        for (tx, ty, src) in tile.enumerate_pixels() {
            let (x, y) = (left + tx as i64, top + ty as i64);
            if src.0[3] == 0 || x < 0 || y < 0 || x >= w || y >= h {
                continue;
            }
            let dst = self.image.get_pixel_mut(x as u32, y as u32);
            if src.0[3] == u8::MAX {
                *dst = *src;
            } else {
                dst.blend(src);
            }
        }
    }
}

/// Fill the whole image with a rounded rectangle of corner radius `radius`.
fn fill_rounded_rect(image: &mut RgbaImage, radius: i32, color: Rgba<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let r = radius.clamp(0, w.min(h) / 2);

    if w - 2 * r > 0 {
        draw_filled_rect_mut(image, Rect::at(r, 0).of_size((w - 2 * r) as u32, h as u32), color);
    }
    if h - 2 * r > 0 {
        draw_filled_rect_mut(image, Rect::at(0, r).of_size(w as u32, (h - 2 * r) as u32), color);
    }
    if r > 0 {
        for (cx, cy) in [(r, r), (w - 1 - r, r), (r, h - 1 - r), (w - 1 - r, h - 1 - r)] {
            draw_filled_circle_mut(image, (cx, cy), r, color);
        }
    }
}

/// Paint `overlay` onto a fresh transparent image.
pub fn rasterize(overlay: &Overlay, font: Option<FontArc>) -> RgbaImage {
    let mut canvas = RasterCanvas::new(overlay.size, font);
    overlay.paint(&mut canvas);
    canvas.into_image()
}
