//! Page geometry: standard sizes, margins, fit-and-center placement

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default margin on every side, in points
pub const DEFAULT_MARGIN: f32 = 36.0;

/// Standard page sizes (portrait, in points)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Legal,
}

impl PageSize {
    /// Width and height in points
    pub fn dimensions(&self) -> (f32, f32) {
        match self {
            PageSize::A4 => (595.28, 841.89),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
        }
    }
}

impl FromStr for PageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a4" => Ok(PageSize::A4),
            "letter" => Ok(PageSize::Letter),
            "legal" => Ok(PageSize::Legal),
            other => Err(format!("unknown page size: {}", other)),
        }
    }
}

/// Page dimensions plus the margin kept clear on all sides
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
}

impl PageLayout {
    /// Layout for a standard size. The margin is clamped so that some
    /// drawable area always remains.
    pub fn new(size: PageSize, margin: f32) -> Self {
        let (width, height) = size.dimensions();
        let max_margin = width.min(height) / 2.0 - 1.0;
        let margin = if margin.is_finite() {
            margin.clamp(0.0, max_margin)
        } else {
            DEFAULT_MARGIN
        };
        Self {
            width,
            height,
            margin,
        }
    }

    pub fn available_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    pub fn available_height(&self) -> f32 {
        self.height - 2.0 * self.margin
    }

    /// Scale factor that fits an image inside the margins, never upscaling.
    /// Width is fitted first; the height is re-checked against the scaled
    /// result and the factor shrunk again if still over budget.
    pub fn fit_scale(&self, image_width: u32, image_height: u32) -> f32 {
        let (w, h) = (image_width.max(1) as f32, image_height.max(1) as f32);
        let mut scale = 1.0_f32;
        if w * scale > self.available_width() {
            scale = self.available_width() / w;
        }
        if h * scale > self.available_height() {
            scale = self.available_height() / h;
        }
        scale
    }

    /// Where and how large to draw an image of the given pixel size
    pub fn place(&self, image_width: u32, image_height: u32) -> Placement {
        let scale = self.fit_scale(image_width, image_height);
        let draw_width = image_width.max(1) as f32 * scale;
        let draw_height = image_height.max(1) as f32 * scale;
        Placement {
            scale,
            x: (self.width - draw_width) / 2.0,
            y: (self.height - draw_height) / 2.0,
            draw_width,
            draw_height,
        }
    }
}

impl Default for PageLayout {
    fn default() -> Self {
        Self::new(PageSize::default(), DEFAULT_MARGIN)
    }
}

/// Image rectangle on the page, origin at bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub scale: f32,
    pub x: f32,
    pub y: f32,
    pub draw_width: f32,
    pub draw_height: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_small_image_is_not_upscaled_and_centered() {
        let layout = PageLayout::default();
        let p = layout.place(200, 100);
        assert_eq!(p.scale, 1.0);
        assert!(approx(p.draw_width, 200.0));
        assert!(approx(p.draw_height, 100.0));
        assert!(approx(p.x, (595.28 - 200.0) / 2.0));
        assert!(approx(p.y, (841.89 - 100.0) / 2.0));
    }

    #[test]
    fn test_large_landscape_fits_width() {
        let layout = PageLayout::default();
        let p = layout.place(4000, 3000);
        assert!(approx(p.draw_width, layout.available_width()));
        assert!(p.draw_height <= layout.available_height());
        // aspect ratio preserved
        assert!(approx(p.draw_width / p.draw_height, 4000.0 / 3000.0));
        assert!(approx(p.x, layout.margin));
    }

    #[test]
    fn test_tall_image_rescaled_for_height() {
        let layout = PageLayout::default();
        // fits width unscaled but is far too tall
        let p = layout.place(500, 3000);
        assert!(approx(p.draw_height, layout.available_height()));
        assert!(p.draw_width < layout.available_width());
        assert!(approx(p.y, layout.margin));
    }

    #[test]
    fn test_wide_then_still_tall() {
        let layout = PageLayout::default();
        // width pass alone leaves the height over budget
        let p = layout.place(1000, 2000);
        assert!(p.draw_width <= layout.available_width() + 0.01);
        assert!(approx(p.draw_height, layout.available_height()));
    }

    #[rstest]
    #[case(PageSize::A4, (595.28, 841.89))]
    #[case(PageSize::Letter, (612.0, 792.0))]
    #[case(PageSize::Legal, (612.0, 1008.0))]
    fn test_page_size_dimensions(#[case] size: PageSize, #[case] expected: (f32, f32)) {
        assert_eq!(size.dimensions(), expected);
    }

    #[test]
    fn test_page_size_from_str() {
        assert_eq!("A4".parse::<PageSize>(), Ok(PageSize::A4));
        assert_eq!(" letter ".parse::<PageSize>(), Ok(PageSize::Letter));
        assert!("tabloid".parse::<PageSize>().is_err());
    }

    #[test]
    fn test_margin_clamped() {
        let layout = PageLayout::new(PageSize::A4, 10_000.0);
        assert!(layout.available_width() > 0.0);
        assert!(layout.available_height() > 0.0);

        let layout = PageLayout::new(PageSize::A4, -5.0);
        assert_eq!(layout.margin, 0.0);

        let layout = PageLayout::new(PageSize::A4, f32::NAN);
        assert_eq!(layout.margin, DEFAULT_MARGIN);
    }

    #[test]
    fn test_page_size_deserialize() {
        let size: PageSize = serde_json::from_str("\"letter\"").unwrap();
        assert_eq!(size, PageSize::Letter);
    }
}
