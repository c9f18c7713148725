use crate::error::{VatError, VatResult};
use crate::material::SourceMaterial;
use glam::{Vec2, Vec3};
use gltf::mesh::Mode;
use std::path::Path;

/// Static rest-pose vertex. `uv2` is the baked vertex-index coordinate that
/// locates this vertex's frame-0 texel in the position texture.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VatVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub uv2: [f32; 2],
}

impl VatVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2, uv2: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv: uv.to_array(),
            uv2: uv2.to_array(),
        }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<VatVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 24,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: 32,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub radius: f32,
}

impl MeshBounds {
    pub fn from_vertices(vertices: &[VatVertex]) -> Self {
        if vertices.is_empty() {
            return MeshBounds { min: Vec3::ZERO, max: Vec3::ZERO, center: Vec3::ZERO, radius: 0.0 };
        }
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for vertex in vertices {
            let pos = Vec3::from_array(vertex.position);
            min = min.min(pos);
            max = max.max(pos);
        }
        let center = (min + max) * 0.5;
        let radius = vertices
            .iter()
            .map(|vertex| (Vec3::from_array(vertex.position) - center).length())
            .fold(0.0f32, f32::max);
        MeshBounds { min, max, center, radius }
    }
}

/// Rest-pose mesh animated by the VAT program.
#[derive(Clone, Debug)]
pub struct VatMesh {
    label: String,
    vertices: Vec<VatVertex>,
    indices: Vec<u32>,
    bounds: MeshBounds,
    has_vertex_coords: bool,
    material: SourceMaterial,
}

impl VatMesh {
    pub fn from_parts(
        label: impl Into<String>,
        vertices: Vec<VatVertex>,
        indices: Vec<u32>,
        has_vertex_coords: bool,
    ) -> Self {
        let bounds = MeshBounds::from_vertices(&vertices);
        Self {
            label: label.into(),
            vertices,
            indices,
            bounds,
            has_vertex_coords,
            material: SourceMaterial::default(),
        }
    }

    pub fn with_material(mut self, material: SourceMaterial) -> Self {
        self.material = material;
        self
    }

    /// Imports every triangle primitive of the first mesh. A primitive without
    /// `TEXCOORD_1` marks the whole mesh as lacking baked coordinates.
    pub fn load_gltf(path: impl AsRef<Path>) -> VatResult<Self> {
        let path_ref = path.as_ref();
        let (document, buffers, images) =
            gltf::import(path_ref).map_err(|err| VatError::load_from(path_ref.display(), err))?;
        let mesh = document
            .meshes()
            .next()
            .ok_or_else(|| VatError::load(format!("no meshes found in {}", path_ref.display())))?;

        let mut vertices: Vec<VatVertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut has_vertex_coords = true;
        let mut material = None;

        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                continue;
            }
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| {
                    VatError::load(format!("POSITION attribute missing in {}", path_ref.display()))
                })?
                .map(Vec3::from_array)
                .collect();
            if positions.is_empty() {
                continue;
            }

            let local_indices: Vec<u32> = reader
                .read_indices()
                .map(|read| read.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());

            let mut normals: Vec<Vec3> = reader
                .read_normals()
                .map(|it| it.map(Vec3::from_array).collect())
                .unwrap_or_default();
            if normals.len() != positions.len() || normals.iter().all(|n| n.length_squared() == 0.0) {
                normals = compute_normals(&positions, &local_indices);
            }

            let mut tex_coords: Vec<Vec2> = reader
                .read_tex_coords(0)
                .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
                .unwrap_or_default();
            tex_coords.resize(positions.len(), Vec2::ZERO);

            let mut vertex_coords: Vec<Vec2> = match reader.read_tex_coords(1) {
                Some(coords) => coords.into_f32().map(Vec2::from_array).collect(),
                None => {
                    has_vertex_coords = false;
                    Vec::new()
                }
            };
            vertex_coords.resize(positions.len(), Vec2::ZERO);

            if material.is_none() {
                material = Some(SourceMaterial::from_gltf(&primitive.material(), &images));
            }

            let base_vertex = vertices.len() as u32;
            vertices.extend(positions.iter().enumerate().map(|(i, pos)| {
                let normal = normals.get(i).copied().unwrap_or(Vec3::Y).normalize_or_zero();
                VatVertex::new(*pos, normal, tex_coords[i], vertex_coords[i])
            }));
            indices.extend(local_indices.iter().map(|idx| idx + base_vertex));
        }

        if vertices.is_empty() {
            return Err(VatError::load(format!(
                "mesh in {} contains no triangle primitives",
                path_ref.display()
            )));
        }

        let label = mesh
            .name()
            .map(|name| name.to_string())
            .or_else(|| path_ref.file_name().map(|name| name.to_string_lossy().to_string()))
            .unwrap_or_default();
        tracing::debug!(
            mesh = %label,
            vertices = vertices.len(),
            indices = indices.len(),
            has_vertex_coords,
            "imported glTF mesh"
        );
        Ok(Self::from_parts(label, vertices, indices, has_vertex_coords)
            .with_material(material.unwrap_or_default()))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertices(&self) -> &[VatVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn bounds(&self) -> &MeshBounds {
        &self.bounds
    }

    /// Whether every primitive carried the baked vertex-index coordinate.
    pub fn has_vertex_coords(&self) -> bool {
        self.has_vertex_coords
    }

    pub fn material(&self) -> &SourceMaterial {
        &self.material
    }

    /// Indices of vertices whose baked coordinate does not fall inside the
    /// first frame band `[0, 1/num_frames)` vertically or `[0, 1]` horizontally.
    pub fn vertices_outside_first_band(&self, num_frames: u32) -> Vec<usize> {
        let band = 1.0 / num_frames.max(1) as f32;
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, vertex)| {
                let [u, v] = vertex.uv2;
                !(0.0..=1.0).contains(&u) || !(0.0..band).contains(&v)
            })
            .map(|(index, _)| index)
            .collect()
    }
}

fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let i0 = tri[0] as usize;
        let i1 = tri[1] as usize;
        let i2 = tri[2] as usize;
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }
        let normal = (positions[i1] - positions[i0]).cross(positions[i2] - positions[i0]);
        if normal.length_squared() > 0.0 {
            normals[i0] += normal;
            normals[i1] += normal;
            normals[i2] += normal;
        }
    }
    for normal in &mut normals {
        *normal = if normal.length_squared() > 0.0 { normal.normalize() } else { Vec3::Y };
    }
    normals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_triangle(dir: &Path, with_vertex_coords: bool) -> std::path::PathBuf {
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let coords: [f32; 6] = [0.125, 0.0, 0.375, 0.0, 0.625, 0.0];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(bytemuck::cast_slice(&positions));
        bytes.extend_from_slice(bytemuck::cast_slice(&coords));
        fs::write(dir.join("tri.bin"), &bytes).expect("write buffer");

        let attributes = if with_vertex_coords {
            r#"{ "POSITION": 0, "TEXCOORD_1": 1 }"#
        } else {
            r#"{ "POSITION": 0 }"#
        };
        let gltf = format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "buffers": [{{ "uri": "tri.bin", "byteLength": {len} }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 24 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
       "min": [0, 0, 0], "max": [1, 1, 0] }},
    {{ "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC2" }}
  ],
  "meshes": [{{ "name": "tri", "primitives": [{{ "attributes": {attributes} }}] }}]
}}"#,
            len = bytes.len()
        );
        let path = dir.join("tri.gltf");
        fs::write(&path, gltf).expect("write gltf");
        path
    }

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(std::mem::size_of::<VatVertex>(), 40);
        assert_eq!(VatVertex::layout().attributes.len(), 4);
    }

    #[test]
    fn gltf_import_reads_baked_coordinates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mesh = VatMesh::load_gltf(write_triangle(dir.path(), true)).expect("mesh loads");
        assert_eq!(mesh.label(), "tri");
        assert_eq!(mesh.vertices().len(), 3);
        assert_eq!(mesh.indices(), &[0, 1, 2]);
        assert!(mesh.has_vertex_coords());
        assert_eq!(mesh.vertices()[1].uv2, [0.375, 0.0]);
        for vertex in mesh.vertices() {
            assert!((Vec3::from_array(vertex.normal) - Vec3::Z).length() < 1e-5);
        }
        assert!(mesh.material().albedo_texture().is_none());
    }

    #[test]
    fn gltf_without_second_uv_is_flagged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mesh = VatMesh::load_gltf(write_triangle(dir.path(), false)).expect("mesh loads");
        assert!(!mesh.has_vertex_coords());
        assert!(mesh.vertices().iter().all(|vertex| vertex.uv2 == [0.0, 0.0]));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = VatMesh::load_gltf("does/not/exist.gltf").unwrap_err();
        assert!(matches!(err, VatError::Load(_)));
    }

    #[test]
    fn first_band_check_flags_out_of_range_coordinates() {
        let vertices = vec![
            VatVertex::new(Vec3::ZERO, Vec3::Y, Vec2::ZERO, Vec2::new(0.5, 0.0)),
            VatVertex::new(Vec3::ZERO, Vec3::Y, Vec2::ZERO, Vec2::new(0.5, 0.3)),
        ];
        let mesh = VatMesh::from_parts("sample", vertices, vec![], true);
        assert_eq!(mesh.vertices_outside_first_band(4), vec![1]);
        assert!(mesh.vertices_outside_first_band(1).is_empty());
    }
}
