use std::sync::Arc;

/// Base colour image of a textured source material, expanded to RGBA8.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbedoTexture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// What the mesh's own material can contribute to shading. Resolved once when
/// the mesh is imported; the renderer only asks for an albedo texture.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMaterial {
    Textured { label: String, base_color: [f32; 4], albedo: Arc<AlbedoTexture> },
    Flat { label: String, base_color: [f32; 4] },
}

impl Default for SourceMaterial {
    fn default() -> Self {
        SourceMaterial::Flat { label: "Default".to_string(), base_color: [0.8, 0.8, 0.8, 1.0] }
    }
}

impl SourceMaterial {
    pub fn from_gltf(material: &gltf::Material<'_>, images: &[gltf::image::Data]) -> Self {
        let label = material
            .name()
            .map(|name| name.to_string())
            .or_else(|| material.index().map(|index| format!("material_{index}")))
            .unwrap_or_else(|| "Default".to_string());
        let pbr = material.pbr_metallic_roughness();
        let base_color = pbr.base_color_factor();

        let Some(info) = pbr.base_color_texture() else {
            return SourceMaterial::Flat { label, base_color };
        };
        let image_index = info.texture().source().index();
        let Some(image) = images.get(image_index) else {
            tracing::warn!(material = %label, image_index, "base colour image missing; using flat colour");
            return SourceMaterial::Flat { label, base_color };
        };
        match convert_image_to_rgba(image) {
            Some(rgba) => SourceMaterial::Textured {
                label,
                base_color,
                albedo: Arc::new(AlbedoTexture { width: image.width, height: image.height, rgba }),
            },
            None => {
                tracing::warn!(
                    material = %label,
                    format = ?image.format,
                    "unsupported base colour format; using flat colour"
                );
                SourceMaterial::Flat { label, base_color }
            }
        }
    }

    pub fn label(&self) -> &str {
        match self {
            SourceMaterial::Textured { label, .. } | SourceMaterial::Flat { label, .. } => label,
        }
    }

    pub fn base_color(&self) -> [f32; 4] {
        match self {
            SourceMaterial::Textured { base_color, .. } | SourceMaterial::Flat { base_color, .. } => {
                *base_color
            }
        }
    }

    pub fn albedo_texture(&self) -> Option<&Arc<AlbedoTexture>> {
        match self {
            SourceMaterial::Textured { albedo, .. } => Some(albedo),
            SourceMaterial::Flat { .. } => None,
        }
    }

    /// Drops to a flat colour when the albedo is larger than `max_dimension` per side.
    pub fn limited_to(&self, max_dimension: Option<u32>) -> SourceMaterial {
        match (self, max_dimension) {
            (SourceMaterial::Textured { label, base_color, albedo }, Some(max))
                if albedo.width > max || albedo.height > max =>
            {
                tracing::warn!(
                    material = %label,
                    width = albedo.width,
                    height = albedo.height,
                    max,
                    "base colour image exceeds the GPU texture limit; using flat colour"
                );
                SourceMaterial::Flat { label: label.clone(), base_color: *base_color }
            }
            _ => self.clone(),
        }
    }
}

fn convert_image_to_rgba(image: &gltf::image::Data) -> Option<Vec<u8>> {
    match image.format {
        gltf::image::Format::R8 => {
            let mut out = Vec::with_capacity(image.pixels.len() * 4);
            for &value in &image.pixels {
                out.extend_from_slice(&[value, value, value, 255]);
            }
            Some(out)
        }
        gltf::image::Format::R8G8 => {
            let mut out = Vec::with_capacity(image.pixels.len() / 2 * 4);
            for chunk in image.pixels.chunks_exact(2) {
                out.extend_from_slice(&[chunk[0], chunk[1], 0, 255]);
            }
            Some(out)
        }
        gltf::image::Format::R8G8B8 => {
            let mut out = Vec::with_capacity(image.pixels.len() / 3 * 4);
            for chunk in image.pixels.chunks_exact(3) {
                out.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            Some(out)
        }
        gltf::image::Format::R8G8B8A8 => Some(image.pixels.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_material_exposes_no_albedo() {
        let material = SourceMaterial::default();
        assert!(material.albedo_texture().is_none());
        assert_eq!(material.label(), "Default");
    }

    #[test]
    fn textured_material_exposes_albedo() {
        let albedo = Arc::new(AlbedoTexture { width: 1, height: 1, rgba: vec![255, 0, 0, 255] });
        let material =
            SourceMaterial::Textured { label: "skin".into(), base_color: [1.0; 4], albedo: albedo.clone() };
        assert!(Arc::ptr_eq(material.albedo_texture().expect("albedo"), &albedo));
    }

    #[test]
    fn oversized_albedo_falls_back_to_flat() {
        let albedo = Arc::new(AlbedoTexture { width: 8, height: 2, rgba: vec![255; 8 * 2 * 4] });
        let material = SourceMaterial::Textured { label: "skin".into(), base_color: [0.5; 4], albedo };
        assert!(material.limited_to(None).albedo_texture().is_some());
        assert!(material.limited_to(Some(8)).albedo_texture().is_some());
        let flat = material.limited_to(Some(4));
        assert!(flat.albedo_texture().is_none());
        assert_eq!(flat.base_color(), [0.5; 4]);
    }
}
