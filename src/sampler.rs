use crate::error::SampleError;
use flock_common::{SamplerConfig, Vec2};
use image::RgbaImage;

/// Turns a video frame into target points: every `stride`-th pixel whose mean R, G, B value is
/// strictly above `threshold` becomes one point, mapped from frame to plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightPixelSampler {
    pub threshold: u8,
    pub stride: u32,
}

impl Default for BrightPixelSampler {
    fn default() -> Self {
        BrightPixelSampler { threshold: 128, stride: 8 }
    }
}

impl BrightPixelSampler {
    pub fn new(threshold: u8, stride: u32) -> Result<Self, SampleError> {
        if stride == 0 {
            return Err(SampleError::ZeroStride);
        }
        Ok(BrightPixelSampler { threshold, stride })
    }

    pub fn from_config(config: &SamplerConfig) -> Result<Self, SampleError> {
        Self::new(config.threshold, config.stride)
    }

    /// Samples a tightly packed RGBA8 buffer of `width x height` pixels. Points come out in
    /// row-major scan order.
    pub fn sample_rgba(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        plane_width: f32,
        plane_height: f32,
    ) -> Result<Vec<Vec2>, SampleError> {
        if self.stride == 0 {
            return Err(SampleError::ZeroStride);
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(SampleError::FrameSize { width, height, expected, actual: rgba.len() });
        }
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let scale_x = plane_width / width as f32;
        let scale_y = plane_height / height as f32;
        let cutoff = 3 * self.threshold as u32;
        let mut points = Vec::new();
        for y in (0..height).step_by(self.stride as usize) {
            let row = y as usize * width as usize * 4;
            for x in (0..width).step_by(self.stride as usize) {
                let i = row + x as usize * 4;
                let sum = rgba[i] as u32 + rgba[i + 1] as u32 + rgba[i + 2] as u32;
                if sum > cutoff {
                    points.push(Vec2::new(x as f32 * scale_x, y as f32 * scale_y));
                }
            }
        }
        Ok(points)
    }

    pub fn sample_image(&self, frame: &RgbaImage, plane_width: f32, plane_height: f32) -> Result<Vec<Vec2>, SampleError> {
        self.sample_rgba(frame.as_raw(), frame.width(), frame.height(), plane_width, plane_height)
    }
}
