use image::{DynamicImage, ImageBuffer, Luma, Rgba, Rgba32FImage};

use crate::error::ConvertError;

/// Single-channel float image used as a per-pixel invert factor.
pub type FactorImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Blend factor between the input color and its inverse.
#[derive(Debug, Clone, Copy)]
pub enum InvertFactor<'a> {
    /// Same factor for every pixel.
    Constant(f32),
    /// Factor read from the first channel of a same-sized image.
    Image(&'a FactorImage),
}

/// Per-pixel color inversion blended by a factor.
///
/// A factor of `0` keeps the input, `1` fully inverts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvertOperation {
    /// Invert the RGB channels.
    pub color: bool,
    /// Invert the alpha channel.
    pub alpha: bool,
}

impl Default for InvertOperation {
    fn default() -> Self {
        Self {
            color: true,
            alpha: false,
        }
    }
}

impl InvertOperation {
    /// Inverts one RGBA pixel by `factor`.
    pub fn apply_pixel(&self, pixel: Rgba<f32>, factor: f32) -> Rgba<f32> {
        let [r, g, b, a] = pixel.0;
        let invert = |value: f32| (1.0 - value) * factor + value * (1.0 - factor);

        let [r, g, b] = if self.color {
            [invert(r), invert(g), invert(b)]
        } else {
            [r, g, b]
        };
        let a = if self.alpha { invert(a) } else { a };
        Rgba([r, g, b, a])
    }

    /// Inverts every pixel of `color`.
    ///
    /// A factor image must match the color image's dimensions.
    pub fn apply(
        &self,
        color: &Rgba32FImage,
        factor: InvertFactor<'_>,
    ) -> Result<Rgba32FImage, ConvertError> {
        if let InvertFactor::Image(factor_image) = factor
            && factor_image.dimensions() != color.dimensions()
        {
            return Err(ConvertError::ImageSizeMismatch {
                color_width: color.width(),
                color_height: color.height(),
                factor_width: factor_image.width(),
                factor_height: factor_image.height(),
            });
        }

        Ok(Rgba32FImage::from_fn(color.width(), color.height(), |x, y| {
            let value = match factor {
                InvertFactor::Constant(value) => value,
                InvertFactor::Image(factor_image) => factor_image.get_pixel(x, y).0[0],
            };
            self.apply_pixel(*color.get_pixel(x, y), value)
        }))
    }

    /// Inverts any decoded image, converting it to 32-bit float RGBA first.
    pub fn apply_dynamic(
        &self,
        image: &DynamicImage,
        factor: InvertFactor<'_>,
    ) -> Result<DynamicImage, ConvertError> {
        self.apply(&image.to_rgba32f(), factor)
            .map(DynamicImage::ImageRgba32F)
    }
}
