use image::{codecs::jpeg::JpegEncoder, codecs::png::PngEncoder, ExtendedColorType, ImageEncoder};

use crate::{scene::SceneReadout, MuseError, Result};

/// Encoding used for stills piped to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    Jpeg { quality: u8 },
    /// Lossless and keeps the alpha channel.
    Png,
}

impl StillFormat {
    /// JPEG for opaque exports; PNG when the output keeps transparency.
    pub fn for_export(transparent: bool, jpeg_quality: u8) -> Self {
        if transparent {
            StillFormat::Png
        } else {
            StillFormat::Jpeg {
                quality: jpeg_quality.clamp(1, 100),
            }
        }
    }

    /// `ffmpeg` decoder name for an `image2pipe` input of this format.
    pub fn input_codec(self) -> &'static str {
        match self {
            StillFormat::Jpeg { .. } => "mjpeg",
            StillFormat::Png => "png",
        }
    }
}

/// Produces a still of the current rendered frame on demand. Called at most
/// once per due capture tick.
pub trait FrameSource {
    fn capture_still(&mut self, format: StillFormat) -> Result<Vec<u8>>;
}

/// Straight-alpha RGBA8 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = rgba_len(width, height)
            .ok_or(MuseError::InvalidInput("frame dimensions are too large"))?;
        Ok(Self {
            width,
            height,
            data: vec![0; len],
        })
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for pixel in self.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
    }
}

/// Byte length of a `width` x `height` RGBA8 buffer, `None` on overflow.
fn rgba_len(width: u32, height: u32) -> Option<usize> {
    usize::try_from(width)
        .ok()?
        .checked_mul(usize::try_from(height).ok()?)?
        .checked_mul(4)
}

pub fn encode_still(frame: &RgbaFrame, format: StillFormat) -> Result<Vec<u8>> {
    if rgba_len(frame.width, frame.height) != Some(frame.data.len()) {
        return Err(MuseError::InvalidInput(
            "frame data size mismatch with width*height*4",
        ));
    }

    let mut out = Vec::new();
    match format {
        StillFormat::Jpeg { quality } => {
            let rgb: Vec<u8> = frame
                .data
                .chunks_exact(4)
                .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
                .collect();
            JpegEncoder::new_with_quality(&mut out, quality).write_image(
                &rgb,
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )?;
        }
        StillFormat::Png => {
            PngEncoder::new(&mut out).write_image(
                &frame.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgba8,
            )?;
        }
    }
    Ok(out)
}

/// Largest side the reference renderer accepts.
pub const MAX_DIMENSION: u32 = 16_384;

/// Software stand-in for the 3D scene: a ring whose radius follows the
/// scene scale, with a marker that tracks the z rotation and brightness that
/// follows bloom.
#[derive(Debug, Clone)]
pub struct PulseRenderer {
    frame: RgbaFrame,
    background: [u8; 4],
    color: [u8; 3],
}

impl PulseRenderer {
    pub fn new(width: u32, height: u32, transparent: bool) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MuseError::InvalidInput("frame dimensions must be non-zero"));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(MuseError::InvalidInput("frame dimensions are too large"));
        }
        let background = if transparent {
            [0, 0, 0, 0]
        } else {
            [0, 0, 0, 255]
        };
        Ok(Self {
            frame: RgbaFrame::new(width, height)?,
            background,
            color: [230, 230, 240],
        })
    }

    pub fn frame(&self) -> &RgbaFrame {
        &self.frame
    }

    pub fn draw(&mut self, scene: &SceneReadout) {
        self.frame.fill(self.background);

        let width = self.frame.width as f32;
        let height = self.frame.height as f32;
        let (cx, cy) = (width * 0.5, height * 0.5);
        let outer = width.min(height) * 0.3 * scene.scale.max(0.0);
        let inner = outer * 0.3;
        let marker = (scene.rotation[2].cos(), scene.rotation[2].sin());
        let glow = (0.6 + 0.1 * scene.bloom_intensity).clamp(0.0, 1.0);

        for y in 0..self.frame.height {
            for x in 0..self.frame.width {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let distance = (dx * dx + dy * dy).sqrt();
                if distance > outer || distance < inner {
                    continue;
                }

                // Darker wedge around the marker angle shows the spin.
                let facing = if distance > 0.0 {
                    (dx * marker.0 + dy * marker.1) / distance
                } else {
                    0.0
                };
                let shade = if facing > 0.95 { 0.35 } else { glow };

                let offset = ((y * self.frame.width + x) * 4) as usize;
                let pixel = &mut self.frame.data[offset..offset + 4];
                for (channel, base) in pixel.iter_mut().zip(self.color) {
                    *channel = (f32::from(base) * shade) as u8;
                }
                pixel[3] = 255;
            }
        }
    }
}

impl FrameSource for PulseRenderer {
    fn capture_still(&mut self, format: StillFormat) -> Result<Vec<u8>> {
        encode_still(&self.frame, format)
    }
}
