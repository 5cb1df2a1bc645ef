// SPDX-License-Identifier: CEPL-1.0
//! Asset collaborators: triangle meshes, RGBA8 textures and SPIR-V blobs.
//! Everything here is consumed once, at renderer start-up.
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ember_math::Vertex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to open `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse mesh `{path}`: {source}")]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },
    #[error("failed to decode image `{path}`: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("mesh `{0}` contains no triangles")]
    EmptyMesh(PathBuf),
    #[error("SPIR-V blob `{0}` is not a whole number of 32-bit words")]
    BadSpirv(PathBuf),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Two stacked unit quads facing +Z.
    pub fn quad() -> Self {
        let n = [0.0, 0.0, 1.0];
        let mut vertices = Vec::with_capacity(8);
        for z in [0.0, 0.5] {
            vertices.extend_from_slice(&[
                Vertex::new([-0.5, -0.5, z], n, [0.0, 0.0]),
                Vertex::new([0.5, -0.5, z], n, [1.0, 0.0]),
                Vertex::new([0.5, 0.5, z], n, [1.0, 1.0]),
                Vertex::new([-0.5, 0.5, z], n, [0.0, 1.0]),
            ]);
        }
        MeshData {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Loads every model in an OBJ file into one indexed mesh. Faces are
/// triangulated and positions/normals/texcoords share a single index.
pub fn load_obj(path: &Path) -> Result<MeshData, AssetError> {
    let file = File::open(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mesh = parse_obj(&mut BufReader::new(file), path)?;
    info!(
        "mesh {}: {} vertices, {} indices",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

pub fn parse_obj(reader: &mut impl BufRead, path: &Path) -> Result<MeshData, AssetError> {
    let opts = tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ..Default::default()
    };
    let (models, _materials) = tobj::load_obj_buf(reader, &opts, |_| Ok(Default::default()))
        .map_err(|source| AssetError::Obj {
            path: path.to_path_buf(),
            source,
        })?;

    let mut out = MeshData::default();
    for model in &models {
        let m = &model.mesh;
        let base = out.vertices.len() as u32;
        let count = m.positions.len() / 3;
        for i in 0..count {
            let pos = [m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]];
            let normal = if m.normals.len() >= 3 * (i + 1) {
                [m.normals[3 * i], m.normals[3 * i + 1], m.normals[3 * i + 2]]
            } else {
                [0.0, 0.0, 0.0]
            };
            // OBJ puts v=0 at the bottom, Vulkan samples top-down
            let uv = if m.texcoords.len() >= 2 * (i + 1) {
                [m.texcoords[2 * i], 1.0 - m.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };
            out.vertices.push(Vertex::new(pos, normal, uv));
        }
        out.indices.extend(m.indices.iter().map(|&i| base + i));
    }

    if out.indices.is_empty() {
        return Err(AssetError::EmptyMesh(path.to_path_buf()));
    }
    Ok(out)
}

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let v = if light { 230 } else { 40 };
                pixels.extend_from_slice(&[v, v, v, 255]);
            }
        }
        TextureData {
            width: size,
            height: size,
            pixels,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

pub fn load_texture(path: &Path) -> Result<TextureData, AssetError> {
    let img = image::open(path)
        .map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_rgba8();
    let (width, height) = img.dimensions();
    info!("texture {}: {}x{}", path.display(), width, height);
    Ok(TextureData {
        width,
        height,
        pixels: img.into_raw(),
    })
}

/// Reads a SPIR-V blob verbatim. Only the length is checked here; the
/// driver validates the contents at shader-module creation.
pub fn load_shader_blob(path: &Path) -> Result<Vec<u8>, AssetError> {
    let bytes = fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(AssetError::BadSpirv(path.to_path_buf()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TRI_OBJ: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
vn 0.0 0.0 1.0
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn quad_mesh_indices_stay_in_range() {
        let q = MeshData::quad();
        assert_eq!(q.vertices.len(), 8);
        assert_eq!(q.indices.len(), 12);
        assert!(q.indices.iter().all(|&i| (i as usize) < q.vertices.len()));
        assert_eq!(q.vertex_bytes().len(), 8 * 32);
        assert_eq!(q.index_bytes().len(), 12 * 4);
    }

    #[test]
    fn obj_quad_is_triangulated_with_flipped_v() {
        let mesh = parse_obj(&mut Cursor::new(TRI_OBJ), Path::new("quad.obj")).unwrap();
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        let first = mesh.vertices[mesh.indices[0] as usize];
        assert_eq!(first.pos, [0.0, 0.0, 0.0]);
        assert_eq!(first.uv, [0.0, 1.0]);
        assert_eq!(first.normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn obj_without_faces_is_rejected() {
        let err = parse_obj(&mut Cursor::new("v 0 0 0\n"), Path::new("empty.obj")).unwrap_err();
        assert!(matches!(err, AssetError::EmptyMesh(_)));
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let tex = TextureData::checkerboard(4, 2);
        assert_eq!(tex.byte_len(), 4 * 4 * 4);
        let px = |x: usize, y: usize| tex.pixels[(y * 4 + x) * 4];
        assert_eq!(px(0, 0), 230);
        assert_eq!(px(2, 0), 40);
        assert_eq!(px(2, 2), 230);
    }

    #[test]
    fn png_round_trips_through_decoder() {
        let path = std::env::temp_dir().join(format!("ember-assets-{}.png", std::process::id()));
        let src = image::RgbaImage::from_fn(3, 5, |x, y| image::Rgba([x as u8, y as u8, 7, 255]));
        src.save(&path).unwrap();

        let tex = load_texture(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!((tex.width, tex.height), (3, 5));
        assert_eq!(tex.pixels, src.into_raw());
    }

    #[test]
    fn odd_sized_spirv_is_rejected() {
        let path = std::env::temp_dir().join(format!("ember-assets-{}.spv", std::process::id()));
        fs::write(&path, [0x03, 0x02, 0x23]).unwrap();
        let err = load_shader_blob(&path).unwrap_err();
        let _ = fs::remove_file(&path);
        assert!(matches!(err, AssetError::BadSpirv(_)));
    }
}
