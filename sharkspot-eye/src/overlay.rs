//! Detection overlay rendering
//!
//! Every render removes the previous batch's visuals before adding the
//! new ones. Detections per frame are few, so a full redraw is cheap and
//! never leaves stale boxes behind.

use crate::error::VisionError;
use image::{Rgba, RgbaImage};
use sharkspot_core::{CoordinateMapper, DetectedObject, DetectionBatch, DisplayBox, Frame, PixelFormat, Rect};
use std::path::Path;
use tracing::debug;

/// Handle to a visual added to a surface
pub type VisualId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };

    fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }
}

/// Outline drawn around each detection
#[derive(Debug, Clone, PartialEq)]
pub struct BoxStyle {
    pub stroke: Color,
    pub line_width: f64,
    pub fill: Option<Color>,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            stroke: Color::RED,
            line_width: 2.0,
            fill: None,
        }
    }
}

/// Caption plate placed above each box
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStyle {
    pub text: Color,
    pub background: Color,
    pub font_size: f64,
    pub height: f64,
    /// Added to the estimated text width
    pub padding: f64,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            text: Color::RED,
            background: Color::WHITE,
            font_size: 14.0,
            height: 20.0,
            padding: 10.0,
        }
    }
}

impl LabelStyle {
    /// Approximate rendered width of `text` at this font size
    pub fn text_width(&self, text: &str) -> f64 {
        text.chars().count() as f64 * self.font_size * 0.6
    }

    /// Plate rect sitting directly on top of `box_rect`; not clamped to
    /// the viewport, so boxes at the top edge get an off-screen label.
    pub fn plate_rect(&self, box_rect: Rect, text: &str) -> Rect {
        Rect::new(
            box_rect.x(),
            box_rect.y() - self.height,
            self.text_width(text) + self.padding,
            self.height,
        )
    }
}

/// Caption shown for a detection
pub fn label_text(object: &DetectedObject) -> String {
    format!("{} ({})", object.label, object.confidence)
}

/// Rendering primitives owned by the UI layer
pub trait OverlaySurface {
    fn add_box(&mut self, rect: Rect, style: &BoxStyle) -> VisualId;

    fn add_label(&mut self, rect: Rect, text: &str, style: &LabelStyle) -> VisualId;

    fn remove(&mut self, id: VisualId);
}

/// Tracks the visuals of the current batch and replaces them per render
pub struct OverlayRenderer {
    box_style: BoxStyle,
    label_style: LabelStyle,
    visuals: Vec<VisualId>,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self::with_styles(BoxStyle::default(), LabelStyle::default())
    }

    pub fn with_styles(box_style: BoxStyle, label_style: LabelStyle) -> Self {
        Self {
            box_style,
            label_style,
            visuals: Vec::new(),
        }
    }

    /// Replace the drawn overlay with `batch`, returning the boxes placed
    pub fn render(
        &mut self,
        surface: &mut dyn OverlaySurface,
        batch: &DetectionBatch,
        mapper: &CoordinateMapper,
    ) -> Vec<DisplayBox> {
        self.clear(surface);

        let mut placed = Vec::with_capacity(batch.len());
        for object in &batch.objects {
            let display = DisplayBox::from_detection(object, mapper);
            let text = label_text(object);
            let plate = self.label_style.plate_rect(display.rect(), &text);

            self.visuals.push(surface.add_box(display.rect(), &self.box_style));
            self.visuals.push(surface.add_label(plate, &text, &self.label_style));
            placed.push(display);
        }

        debug!("Rendered {} boxes for frame {}", placed.len(), batch.frame_sequence);
        placed
    }

    /// Remove everything this renderer has drawn
    pub fn clear(&mut self, surface: &mut dyn OverlaySurface) {
        for id in self.visuals.drain(..) {
            surface.remove(id);
        }
    }

    pub fn visual_count(&self) -> usize {
        self.visuals.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Visual {
    Box { rect: Rect, style: BoxStyle },
    Label { rect: Rect, text: String, style: LabelStyle },
}

/// Retained in-memory layer list
#[derive(Debug, Default)]
pub struct OverlayScene {
    next_id: VisualId,
    visuals: Vec<(VisualId, Visual)>,
}

impl OverlayScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visuals(&self) -> impl Iterator<Item = &Visual> {
        self.visuals.iter().map(|(_, visual)| visual)
    }

    pub fn len(&self) -> usize {
        self.visuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visuals.is_empty()
    }

    pub fn box_rects(&self) -> Vec<Rect> {
        self.visuals()
            .filter_map(|visual| match visual {
                Visual::Box { rect, .. } => Some(*rect),
                Visual::Label { .. } => None,
            })
            .collect()
    }

    pub fn label_texts(&self) -> Vec<&str> {
        self.visuals()
            .filter_map(|visual| match visual {
                Visual::Label { text, .. } => Some(text.as_str()),
                Visual::Box { .. } => None,
            })
            .collect()
    }

    fn insert(&mut self, visual: Visual) -> VisualId {
        let id = self.next_id;
        self.next_id += 1;
        self.visuals.push((id, visual));
        id
    }
}

impl OverlaySurface for OverlayScene {
    fn add_box(&mut self, rect: Rect, style: &BoxStyle) -> VisualId {
        self.insert(Visual::Box { rect, style: style.clone() })
    }

    fn add_label(&mut self, rect: Rect, text: &str, style: &LabelStyle) -> VisualId {
        self.insert(Visual::Label {
            rect,
            text: text.to_string(),
            style: style.clone(),
        })
    }

    fn remove(&mut self, id: VisualId) {
        self.visuals.retain(|(visual_id, _)| *visual_id != id);
    }
}

/// Composites the overlay onto a still frame for annotated snapshots.
///
/// Label plates are drawn as filled backgrounds with a text-colored
/// border; glyphs are not rasterized.
pub struct RasterSurface {
    base: RgbaImage,
    scene: OverlayScene,
}

impl RasterSurface {
    pub fn new(base: RgbaImage) -> Self {
        Self {
            base,
            scene: OverlayScene::new(),
        }
    }

    /// Convert a captured frame into an RGBA canvas
    pub fn from_frame(frame: &Frame) -> Result<Self, VisionError> {
        frame.validate()?;
        let pixels = (frame.width as usize) * (frame.height as usize);
        let data = &frame.data[..pixels * frame.format.bytes_per_pixel()];

        let rgba: Vec<u8> = match frame.format {
            PixelFormat::Rgba8 => data.to_vec(),
            PixelFormat::Bgra8 => data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0], px[3]])
                .collect(),
            PixelFormat::Rgb8 => data
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect(),
            PixelFormat::Gray8 => data.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        };

        let base = RgbaImage::from_raw(frame.width, frame.height, rgba).ok_or_else(|| {
            VisionError::Processing(format!("frame {} does not fit an RGBA canvas", frame.sequence))
        })?;
        Ok(Self::new(base))
    }

    pub fn scene(&self) -> &OverlayScene {
        &self.scene
    }

    /// The base image with every current visual drawn on top
    pub fn compose(&self) -> RgbaImage {
        let mut image = self.base.clone();
        for visual in self.scene.visuals() {
            match visual {
                Visual::Box { rect, style } => {
                    if let Some(fill) = style.fill {
                        fill_rect(&mut image, *rect, fill.to_rgba());
                    }
                    let thickness = style.line_width.round().max(1.0) as i64;
                    draw_outline(&mut image, *rect, style.stroke.to_rgba(), thickness);
                }
                Visual::Label { rect, style, .. } => {
                    fill_rect(&mut image, *rect, style.background.to_rgba());
                    draw_outline(&mut image, *rect, style.text.to_rgba(), 1);
                }
            }
        }
        image
    }

    /// Write the composed image, format chosen by extension
    pub fn save(&self, path: &Path) -> Result<(), VisionError> {
        self.compose().save(path)?;
        Ok(())
    }
}

impl OverlaySurface for RasterSurface {
    fn add_box(&mut self, rect: Rect, style: &BoxStyle) -> VisualId {
        self.scene.add_box(rect, style)
    }

    fn add_label(&mut self, rect: Rect, text: &str, style: &LabelStyle) -> VisualId {
        self.scene.add_label(rect, text, style)
    }

    fn remove(&mut self, id: VisualId) {
        self.scene.remove(id)
    }
}

/// Pixel bounds of `rect` as half-open integer ranges, clipped to the image
fn pixel_bounds(image: &RgbaImage, rect: Rect) -> (i64, i64, i64, i64) {
    let (w, h) = image.dimensions();
    let x0 = rect.x().round() as i64;
    let y0 = rect.y().round() as i64;
    let x1 = rect.max_x().round() as i64;
    let y1 = rect.max_y().round() as i64;
    (x0.max(0), y0.max(0), x1.min(w as i64), y1.min(h as i64))
}

fn fill_rect(image: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    let (x0, y0, x1, y1) = pixel_bounds(image, rect);
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_outline(image: &mut RgbaImage, rect: Rect, color: Rgba<u8>, thickness: i64) {
    let left = rect.x().round() as i64;
    let top = rect.y().round() as i64;
    let right = rect.max_x().round() as i64;
    let bottom = rect.max_y().round() as i64;
    let (x0, y0, x1, y1) = pixel_bounds(image, rect);

    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x < left + thickness
                || x >= right - thickness
                || y < top + thickness
                || y >= bottom - thickness;
            if on_edge {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
