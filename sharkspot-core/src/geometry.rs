//! Geometry primitives and the model-space to display-space mapping
//!
//! Detections arrive as normalized boxes relative to the model input.
//! The live preview shows the camera image with aspect-fill scaling, so
//! boxes must be placed against the same overflowing image rect or they
//! drift away from the objects they outline.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Width and height in either pixels or normalized units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when either side is zero, negative or not finite
    pub fn is_empty(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }

    /// Width over height, `None` for an empty size
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.width / self.height)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle described by its origin corner and size
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    /// The unit square `{0, 0, 1, 1}`
    pub const fn unit() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn x(&self) -> f64 {
        self.origin.x
    }

    pub fn y(&self) -> f64 {
        self.origin.y
    }

    pub fn width(&self) -> f64 {
        self.size.width
    }

    pub fn height(&self) -> f64 {
        self.size.height
    }

    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.origin.x + self.size.width / 2.0,
            self.origin.y + self.size.height / 2.0,
        )
    }

    /// Translate the rect without resizing it
    pub fn offset_by(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.origin.x + dx, self.origin.y + dy, self.size.width, self.size.height)
    }

    /// Mirror a normalized rect across the horizontal midline, converting
    /// between bottom-left and top-left origin conventions.
    pub fn flipped_vertically(&self) -> Self {
        Self::new(
            self.origin.x,
            1.0 - self.origin.y - self.size.height,
            self.size.width,
            self.size.height,
        )
    }

    /// True when every component lies in `[0, 1]` and the far edges do too
    pub fn is_normalized(&self) -> bool {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        in_unit(self.origin.x)
            && in_unit(self.origin.y)
            && in_unit(self.size.width)
            && in_unit(self.size.height)
            && self.max_x() <= 1.0 + f64::EPSILON
            && self.max_y() <= 1.0 + f64::EPSILON
    }
}

/// Which corner normalized model boxes are measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoxOrigin {
    TopLeft,
    #[default]
    BottomLeft,
}

/// Rect the model input occupies when aspect-filled into `container`.
///
/// The side along which the image is relatively wider overflows the
/// container and the overflow is split evenly, so the returned origin is
/// zero or negative on exactly one axis.
pub fn aspect_fill_rect(image: Size, container: Size) -> Result<Rect> {
    let image_aspect = image
        .aspect_ratio()
        .ok_or_else(|| Error::InvalidGeometry(format!("image size {}x{} has no area", image.width, image.height)))?;
    let container_aspect = container.aspect_ratio().ok_or_else(|| {
        Error::InvalidGeometry(format!(
            "container size {}x{} has no area",
            container.width, container.height
        ))
    })?;

    if image_aspect > container_aspect {
        let scaled_width = container.height * image_aspect;
        let margin = -(scaled_width - container.width) / 2.0;
        Ok(Rect::new(margin, 0.0, scaled_width, container.height))
    } else {
        let scaled_height = container.width / image_aspect;
        let margin = -(scaled_height - container.height) / 2.0;
        Ok(Rect::new(0.0, margin, container.width, scaled_height))
    }
}

/// Maps normalized model boxes into viewport pixels.
///
/// Built once per viewport size; the scaled image rect is computed up
/// front so mapping a box is a multiply and a translate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    image_size: Size,
    container_size: Size,
    origin: BoxOrigin,
    image_rect: Rect,
}

impl CoordinateMapper {
    pub fn new(image_size: Size, container_size: Size, origin: BoxOrigin) -> Result<Self> {
        let image_rect = aspect_fill_rect(image_size, container_size)?;
        Ok(Self {
            image_size,
            container_size,
            origin,
            image_rect,
        })
    }

    pub fn image_size(&self) -> Size {
        self.image_size
    }

    pub fn container_size(&self) -> Size {
        self.container_size
    }

    pub fn origin(&self) -> BoxOrigin {
        self.origin
    }

    /// The aspect-filled image rect in container pixels
    pub fn image_rect(&self) -> Rect {
        self.image_rect
    }

    /// Map a normalized model-space box into container pixels.
    ///
    /// No clipping is applied: boxes near an overflowing edge map partly
    /// outside the container, symmetric to the crop.
    pub fn map(&self, normalized: Rect) -> Rect {
        let top_left = match self.origin {
            BoxOrigin::TopLeft => normalized,
            BoxOrigin::BottomLeft => normalized.flipped_vertically(),
        };

        Rect::new(
            top_left.x() * self.image_rect.width(),
            top_left.y() * self.image_rect.height(),
            top_left.width() * self.image_rect.width(),
            top_left.height() * self.image_rect.height(),
        )
        .offset_by(self.image_rect.x(), self.image_rect.y())
    }
}
