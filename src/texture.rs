//! Position and normal textures.

use crate::decode::texel_coords;
use crate::error::{VatError, VatResult};
use glam::{UVec2, Vec2, Vec4};
use half::f16;
use image::{DynamicImage, ImageReader};
use serde::Deserialize;
use std::path::Path;

/// Extensions whose formats can carry unbounded floating-point texels.
/// Everything else is assumed to be 8/16-bit normalized data.
pub const UNPACKED_EXTENSIONS: [&str; 2] = ["exr", "hdr"];

/// How texel values map back to positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureEncoding {
    /// Normalized [0, 1] texels, scaled by the calibration bounds.
    Packed,
    /// Texels are the positions themselves.
    Unpacked,
}

impl TextureEncoding {
    pub fn from_extension(ext: &str) -> Self {
        let lowered = ext.trim_start_matches('.').to_ascii_lowercase();
        if UNPACKED_EXTENSIONS.contains(&lowered.as_str()) {
            TextureEncoding::Unpacked
        } else {
            TextureEncoding::Packed
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some(ext) => Self::from_extension(ext),
            None => TextureEncoding::Packed,
        }
    }

    pub fn is_packed(self) -> bool {
        self == TextureEncoding::Packed
    }

    /// Float exports store frame 0 on the bottom row; 8-bit exports on the top.
    pub fn default_flip_v(self) -> bool {
        self == TextureEncoding::Unpacked
    }

    pub fn label(self) -> &'static str {
        match self {
            TextureEncoding::Packed => "packed",
            TextureEncoding::Unpacked => "unpacked",
        }
    }

    /// Automatic → packed → unpacked → automatic.
    pub fn cycle_override(current: Option<Self>) -> Option<Self> {
        match current {
            None => Some(TextureEncoding::Packed),
            Some(TextureEncoding::Packed) => Some(TextureEncoding::Unpacked),
            Some(TextureEncoding::Unpacked) => None,
        }
    }
}

/// GPU storage used for floating-point textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum FloatTextureFormat {
    #[default]
    #[serde(rename = "rgba16f")]
    Rgba16F,
    #[serde(rename = "rgba32f")]
    Rgba32F,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TexelData {
    Unorm8(Vec<u8>),
    Float32(Vec<f32>),
}

/// Decoded RGBA texture kept on the CPU for upload and reference sampling.
#[derive(Debug, Clone)]
pub struct VatTexture {
    label: String,
    width: u32,
    height: u32,
    encoding: TextureEncoding,
    data: TexelData,
}

pub struct TexturePayload {
    pub format: wgpu::TextureFormat,
    pub bytes: Vec<u8>,
    pub bytes_per_pixel: u32,
}

impl VatTexture {
    pub fn load(path: impl AsRef<Path>) -> VatResult<Self> {
        let path = path.as_ref();
        let reader = ImageReader::open(path)
            .map_err(|err| VatError::load_from(path.display(), err))?
            .with_guessed_format()
            .map_err(|err| VatError::load_from(path.display(), err))?;
        let image = reader.decode().map_err(|err| VatError::load_from(path.display(), err))?;
        let label = path.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default();
        Ok(Self::from_image(label, &image, TextureEncoding::from_path(path)))
    }

    /// Keeps 8-bit sources as bytes; anything wider is widened to `f32` so no
    /// precision is lost before upload.
    pub fn from_image(label: impl Into<String>, image: &DynamicImage, encoding: TextureEncoding) -> Self {
        let data = match image {
            DynamicImage::ImageRgb32F(_)
            | DynamicImage::ImageRgba32F(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_) => TexelData::Float32(image.to_rgba32f().into_raw()),
            _ => TexelData::Unorm8(image.to_rgba8().into_raw()),
        };
        Self { label: label.into(), width: image.width(), height: image.height(), encoding, data }
    }

    pub fn from_rgba8(label: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> VatResult<Self> {
        let len = pixels.len();
        Self::checked(label.into(), width, height, len, TexelData::Unorm8(pixels), TextureEncoding::Packed)
    }

    pub fn from_rgba32f(
        label: impl Into<String>,
        width: u32,
        height: u32,
        texels: Vec<f32>,
    ) -> VatResult<Self> {
        Self::checked(
            label.into(),
            width,
            height,
            texels.len(),
            TexelData::Float32(texels),
            TextureEncoding::Unpacked,
        )
    }

    fn checked(
        label: String,
        width: u32,
        height: u32,
        len: usize,
        data: TexelData,
        encoding: TextureEncoding,
    ) -> VatResult<Self> {
        if width == 0 || height == 0 {
            return Err(VatError::validation(format!("texture '{label}' has zero size")));
        }
        let expected = width as usize * height as usize * 4;
        if len != expected {
            return Err(VatError::validation(format!(
                "texture '{label}' expected {expected} channel values for {width}x{height}, got {len}"
            )));
        }
        Ok(Self { label, width, height, encoding, data })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Encoding implied by the source file's extension.
    pub fn encoding(&self) -> TextureEncoding {
        self.encoding
    }

    pub fn data(&self) -> &TexelData {
        &self.data
    }

    /// RGBA at an integer texel; 8-bit channels are normalized to [0, 1].
    pub fn fetch(&self, x: u32, y: u32) -> Vec4 {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let base = (y * self.width as usize + x) * 4;
        match &self.data {
            TexelData::Unorm8(bytes) => {
                let px = &bytes[base..base + 4];
                Vec4::new(px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32) / 255.0
            }
            TexelData::Float32(values) => Vec4::from_slice(&values[base..base + 4]),
        }
    }

    pub fn sample_nearest(&self, uv: Vec2) -> Vec4 {
        let texel = texel_coords(uv, self.size());
        self.fetch(texel.x, texel.y)
    }

    pub fn gpu_payload(&self, float_format: FloatTextureFormat) -> TexturePayload {
        match (&self.data, float_format) {
            (TexelData::Unorm8(bytes), _) => TexturePayload {
                format: wgpu::TextureFormat::Rgba8Unorm,
                bytes: bytes.clone(),
                bytes_per_pixel: 4,
            },
            (TexelData::Float32(values), FloatTextureFormat::Rgba16F) => {
                let halves = f32_to_f16_bits(values);
                TexturePayload {
                    format: wgpu::TextureFormat::Rgba16Float,
                    bytes: bytemuck::cast_slice(&halves).to_vec(),
                    bytes_per_pixel: 8,
                }
            }
            (TexelData::Float32(values), FloatTextureFormat::Rgba32F) => TexturePayload {
                format: wgpu::TextureFormat::Rgba32Float,
                bytes: bytemuck::cast_slice(values).to_vec(),
                bytes_per_pixel: 16,
            },
        }
    }
}

fn f32_to_f16_bits(data: &[f32]) -> Vec<u16> {
    data.iter().map(|value| f16::from_f32(*value).to_bits()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn extension_table_classifies_hdr_formats_as_unpacked() {
        assert_eq!(TextureEncoding::from_path("walk_pos.exr"), TextureEncoding::Unpacked);
        assert_eq!(TextureEncoding::from_path("walk_pos.HDR"), TextureEncoding::Unpacked);
        assert_eq!(TextureEncoding::from_path("walk_pos.png"), TextureEncoding::Packed);
        assert_eq!(TextureEncoding::from_path("walk_pos.tga"), TextureEncoding::Packed);
        assert_eq!(TextureEncoding::from_path("no_extension"), TextureEncoding::Packed);
        assert!(TextureEncoding::Unpacked.default_flip_v());
        assert!(!TextureEncoding::Packed.default_flip_v());
    }

    #[test]
    fn override_cycle_returns_to_automatic() {
        let mut current = None;
        current = TextureEncoding::cycle_override(current);
        assert_eq!(current, Some(TextureEncoding::Packed));
        current = TextureEncoding::cycle_override(current);
        assert_eq!(current, Some(TextureEncoding::Unpacked));
        assert_eq!(TextureEncoding::cycle_override(current), None);
    }

    #[test]
    fn eight_bit_images_fetch_normalized_values() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(1, 0, Rgba([255, 0, 51, 255]));
        let texture = VatTexture::from_image("test", &DynamicImage::ImageRgba8(img), TextureEncoding::Packed);
        let texel = texture.fetch(1, 0);
        assert!((texel - Vec4::new(1.0, 0.0, 0.2, 1.0)).length() < 1e-6);
        assert!(matches!(texture.data(), TexelData::Unorm8(_)));
    }

    #[test]
    fn nearest_sample_never_blends_neighbours() {
        let texels = vec![
            0.0, 0.0, 0.0, 1.0, //
            10.0, 10.0, 10.0, 1.0, //
        ];
        let texture = VatTexture::from_rgba32f("strip", 1, 2, texels).expect("texture");
        assert_eq!(texture.sample_nearest(Vec2::new(0.5, 0.49)).x, 0.0);
        assert_eq!(texture.sample_nearest(Vec2::new(0.5, 0.5)).x, 10.0);
        assert_eq!(texture.sample_nearest(Vec2::new(0.5, 1.0)).x, 10.0);
    }

    #[test]
    fn mismatched_buffer_length_is_rejected() {
        let err = VatTexture::from_rgba8("bad", 2, 2, vec![0; 3]).unwrap_err();
        assert!(matches!(err, VatError::Validation(_)));
    }

    #[test]
    fn float_payload_halves_storage() {
        let texture = VatTexture::from_rgba32f("f", 1, 1, vec![1.0, 2.0, 3.0, 1.0]).expect("texture");
        let half_payload = texture.gpu_payload(FloatTextureFormat::Rgba16F);
        assert_eq!(half_payload.format, wgpu::TextureFormat::Rgba16Float);
        assert_eq!(half_payload.bytes.len(), 8);
        let full_payload = texture.gpu_payload(FloatTextureFormat::Rgba32F);
        assert_eq!(full_payload.bytes.len(), 16);
    }
}
