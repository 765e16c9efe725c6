use anyhow::{bail, ensure, Result};
use bevy::{
    ecs::component::Component,
    image::Image,
    math::Vec3,
    render::render_resource::TextureFormat,
};
use bytemuck::cast_slice;
use image::DynamicImage;
use itertools::iproduct;
use ndarray::Array2;
use std::io::{Read, Seek};
use tiff::decoder::{Decoder, DecodingResult};

/// The owned `(N+1)x(N+1)` height samples of a terrain, together with the
/// sample value that maps to a normalized height of one (255 for 8 bit
/// sources, 65535 for 16 bit ones).
///
/// The last row and column replicate the previous ones, so triangle corners
/// on the far boundary read valid samples. The store is immutable between
/// heightfield loads.
#[derive(Component, Clone, Debug)]
pub struct Heightfield {
    size: u32,
    samples: Array2<u16>,
    max_sample: u32,
}

impl Heightfield {
    /// Builds the store from `size`x`size` row-major samples, replicating the
    /// border. `size` must be a non-zero power of two.
    pub fn from_samples(size: u32, samples: &[u16], max_sample: u32) -> Result<Self> {
        ensure!(
            size > 0 && size.is_power_of_two(),
            "heightfield resolution {size} is not a power of two"
        );
        ensure!(
            samples.len() == (size * size) as usize,
            "expected {} height samples, got {}",
            size * size,
            samples.len()
        );
        ensure!(max_sample > 0, "maximum sample value must be non-zero");

        let n = size as usize;
        let mut grid = Array2::zeros((n + 1, n + 1));
        for (y, x) in iproduct!(0..n, 0..n) {
            grid[[y, x]] = samples[y * n + x];
        }
        for y in 0..n {
            grid[[y, n]] = grid[[y, n - 1]];
        }
        for x in 0..=n {
            grid[[n, x]] = grid[[n - 1, x]];
        }

        Ok(Self {
            size,
            samples: grid,
            max_sample,
        })
    }

    /// Extracts heights from a decoded grayscale image.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        ensure!(
            image.width() == image.height(),
            "height map must be square, got {}x{}",
            image.width(),
            image.height()
        );

        match image {
            DynamicImage::ImageLuma16(buffer) => {
                Self::from_samples(image.width(), buffer.as_raw(), u16::MAX as u32)
            }
            DynamicImage::ImageLuma8(buffer) => {
                let samples: Vec<u16> = buffer.as_raw().iter().map(|&v| v as u16).collect();
                Self::from_samples(image.width(), &samples, u8::MAX as u32)
            }
            other => {
                let samples: Vec<u16> =
                    other.to_luma8().as_raw().iter().map(|&v| v as u16).collect();
                Self::from_samples(image.width(), &samples, u8::MAX as u32)
            }
        }
    }

    /// Extracts heights from an 8 or 16 bit grayscale TIFF, the common format
    /// for digital elevation models.
    pub fn from_tiff<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut decoder = Decoder::new(reader)?;
        let (width, height) = decoder.dimensions()?;
        ensure!(
            width == height,
            "height map must be square, got {width}x{height}"
        );

        match decoder.read_image()? {
            DecodingResult::U16(samples) => Self::from_samples(width, &samples, u16::MAX as u32),
            DecodingResult::U8(samples) => {
                let samples: Vec<u16> = samples.iter().map(|&v| v as u16).collect();
                Self::from_samples(width, &samples, u8::MAX as u32)
            }
            _ => bail!("unsupported TIFF sample format"),
        }
    }

    /// Extracts heights from a loaded [`Image`] asset.
    pub fn from_bevy_image(image: &Image) -> Result<Self> {
        let width = image.width();
        ensure!(
            width == image.height(),
            "height map must be square, got {}x{}",
            width,
            image.height()
        );

        match image.texture_descriptor.format {
            TextureFormat::R16Unorm | TextureFormat::R16Uint => {
                Self::from_samples(width, cast_slice(&image.data), u16::MAX as u32)
            }
            TextureFormat::R8Unorm | TextureFormat::R8Uint => {
                let samples: Vec<u16> = image.data.iter().map(|&v| v as u16).collect();
                Self::from_samples(width, &samples, u8::MAX as u32)
            }
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {
                let samples: Vec<u16> =
                    image.data.chunks_exact(4).map(|p| p[0] as u16).collect();
                Self::from_samples(width, &samples, u8::MAX as u32)
            }
            format => bail!("unsupported height map texture format {format:?}"),
        }
    }

    /// The grid resolution N; samples are addressed in `[0, N]`.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn max_sample(&self) -> u32 {
        self.max_sample
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> u16 {
        self.samples[[y as usize, x as usize]]
    }

    /// The height at a grid index, scaled into `[0, 1]`.
    #[inline]
    pub fn normalized_height(&self, x: u32, y: u32) -> f32 {
        self.sample(x, y) as f32 / self.max_sample as f32
    }

    /// Maps a grid index to world space. The terrain spans
    /// `[-extent.x/2, extent.x/2] x [-extent.z/2, extent.z/2]` in the ground
    /// plane and scales normalized heights by `extent.y`.
    #[inline]
    pub fn world_point(&self, x: u32, y: u32, extent: Vec3) -> Vec3 {
        let n = self.size as f32;
        Vec3::new(
            extent.x * (x as f32 / n - 0.5),
            extent.y * self.normalized_height(x, y),
            extent.z * (y as f32 / n - 0.5),
        )
    }

    /// Bilinearly interpolated normalized height at a fractional grid
    /// position, used when subdividing triangle batches between samples.
    pub fn interpolated_height(&self, x: f32, y: f32) -> f32 {
        let n = self.size as f32;
        let x = x.clamp(0.0, n);
        let y = y.clamp(0.0, n);
        let x0 = (x.floor() as u32).min(self.size);
        let y0 = (y.floor() as u32).min(self.size);
        let x1 = (x0 + 1).min(self.size);
        let y1 = (y0 + 1).min(self.size);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let h00 = self.normalized_height(x0, y0);
        let h10 = self.normalized_height(x1, y0);
        let h01 = self.normalized_height(x0, y1);
        let h11 = self.normalized_height(x1, y1);

        let bottom = h00 + (h10 - h00) * fx;
        let top = h01 + (h11 - h01) * fx;
        bottom + (top - bottom) * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_is_replicated() {
        let samples: Vec<u16> = (0..16).collect();
        let field = Heightfield::from_samples(4, &samples, 255).unwrap();

        assert_eq!(field.sample(4, 0), field.sample(3, 0));
        assert_eq!(field.sample(0, 4), field.sample(0, 3));
        assert_eq!(field.sample(4, 4), field.sample(3, 3));
        assert_eq!(field.sample(2, 1), samples[6]);
    }

    #[test]
    fn invalid_sources_are_rejected() {
        assert!(Heightfield::from_samples(3, &[0; 9], 255).is_err());
        assert!(Heightfield::from_samples(0, &[], 255).is_err());
        assert!(Heightfield::from_samples(4, &[0; 15], 255).is_err());
    }

    #[test]
    fn eight_and_sixteen_bit_normalization() {
        let image8 = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            4,
            4,
            image::Luma([255u8]),
        ));
        let field = Heightfield::from_image(&image8).unwrap();
        assert_eq!(field.max_sample(), 255);
        assert_eq!(field.normalized_height(1, 1), 1.0);

        let image16 = DynamicImage::ImageLuma16(
            image::ImageBuffer::from_pixel(4, 4, image::Luma([32768u16])),
        );
        let field = Heightfield::from_image(&image16).unwrap();
        assert_eq!(field.max_sample(), 65535);
        assert!((field.normalized_height(1, 1) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn world_mapping_is_centered() {
        let field = Heightfield::from_samples(4, &[0; 16], 255).unwrap();
        let extent = Vec3::new(20.0, 2.0, 10.0);

        assert_eq!(field.world_point(2, 2, extent), Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(field.world_point(0, 0, extent), Vec3::new(-10.0, 0.0, -5.0));
        assert_eq!(field.world_point(4, 4, extent), Vec3::new(10.0, 0.0, 5.0));
    }

    #[test]
    fn interpolation_matches_samples() {
        let samples: Vec<u16> = (0..16).map(|i| i * 17).collect();
        let field = Heightfield::from_samples(4, &samples, 255).unwrap();

        assert_eq!(field.interpolated_height(1.0, 2.0), field.normalized_height(1, 2));
        let mid = field.interpolated_height(0.5, 0.0);
        let expected = (field.normalized_height(0, 0) + field.normalized_height(1, 0)) / 2.0;
        assert!((mid - expected).abs() < 1e-6);
    }
}
