use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use serde_json::json;

use crate::error::{Result, TerramError};
use crate::mesh::{Triangle, Vertex, VertexHandle};

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const CHUNK_TYPE_JSON: u32 = 0x4E4F_534A;
const CHUNK_TYPE_BIN: u32 = 0x004E_4942;

const COMPONENT_TYPE_FLOAT: u32 = 5126;
const COMPONENT_TYPE_UNSIGNED_INT: u32 = 5125;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u32 = 4;

/// Lazily assign `Vertex::id` (1-based, OBJ convention) to every vertex
/// referenced by a live triangle, in first-encountered order. Vertices
/// never referenced by a surviving triangle are left unassigned and
/// excluded from export.
fn assign_export_ids(points: &[Vertex], triangles: &[Triangle]) -> Vec<VertexHandle> {
    let mut order = Vec::new();
    let mut next_id: u32 = 1;
    for t in triangles {
        if t.is_deleted() {
            continue;
        }
        for &h in &t.vertices {
            let v = &points[h as usize];
            if v.id.get() == 0 {
                v.id.set(next_id);
                next_id += 1;
                order.push(h);
            }
        }
    }
    order
}

/// Write the surviving mesh as Wavefront OBJ text: positions, then
/// normals, then one `f v//vn` face per live triangle.
pub fn write_obj<W: Write>(points: &[Vertex], triangles: &[Triangle], mut writer: W) -> Result<()> {
    let order = assign_export_ids(points, triangles);

    for &h in &order {
        let p = points[h as usize].position;
        writeln!(writer, "v {} {} {}", p.x, p.y, p.z)?;
    }
    for &h in &order {
        let n = points[h as usize].normal;
        writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
    }
    for t in triangles {
        if t.is_deleted() {
            continue;
        }
        let ids: Vec<u32> = t
            .vertices
            .iter()
            .map(|&h| points[h as usize].id.get())
            .collect();
        writeln!(
            writer,
            "f {a}//{a} {b}//{b} {c}//{c}",
            a = ids[0],
            b = ids[1],
            c = ids[2]
        )?;
    }
    Ok(())
}

/// Write the surviving mesh as a single-buffer, single-mesh glTF binary
/// (GLB) container: one POSITION/NORMAL/indices accessor triple over one
/// embedded BIN chunk.
pub fn write_glb<W: Write>(points: &[Vertex], triangles: &[Triangle], mut writer: W) -> Result<()> {
    let order = assign_export_ids(points, triangles);
    let vertex_count = order.len();

    let mut positions: Vec<u8> = Vec::with_capacity(vertex_count * 12);
    let mut normals: Vec<u8> = Vec::with_capacity(vertex_count * 12);
    let mut min = [0.0f32; 3];
    let mut max = [0.0f32; 3];
    if vertex_count > 0 {
        min = [f32::INFINITY; 3];
        max = [f32::NEG_INFINITY; 3];
    }

    for &h in &order {
        let p = points[h as usize].position;
        let comps = [p.x as f32, p.y as f32, p.z as f32];
        for (i, c) in comps.iter().enumerate() {
            min[i] = min[i].min(*c);
            max[i] = max[i].max(*c);
            positions.write_f32::<LittleEndian>(*c)?;
        }
        let n = points[h as usize].normal;
        normals.write_f32::<LittleEndian>(n.x as f32)?;
        normals.write_f32::<LittleEndian>(n.y as f32)?;
        normals.write_f32::<LittleEndian>(n.z as f32)?;
    }

    let live_triangles: Vec<&Triangle> = triangles.iter().filter(|t| !t.is_deleted()).collect();
    let mut indices: Vec<u8> = Vec::with_capacity(live_triangles.len() * 12);
    for t in &live_triangles {
        for &h in &t.vertices {
            indices.write_u32::<LittleEndian>(points[h as usize].id.get() - 1)?;
        }
    }

    let positions_len = positions.len();
    let normals_len = normals.len();
    let indices_len = indices.len();

    let mut bin = Vec::with_capacity(positions_len + normals_len + indices_len);
    bin.extend_from_slice(&positions);
    bin.extend_from_slice(&normals);
    bin.extend_from_slice(&indices);

    let doc = json!({
        "asset": { "version": "2.0", "generator": "terramesh" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0, "NORMAL": 1 },
                "indices": 2,
                "mode": MODE_TRIANGLES,
            }],
        }],
        "buffers": [{ "byteLength": bin.len() }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": positions_len, "target": TARGET_ARRAY_BUFFER },
            { "buffer": 0, "byteOffset": positions_len, "byteLength": normals_len, "target": TARGET_ARRAY_BUFFER },
            { "buffer": 0, "byteOffset": positions_len + normals_len, "byteLength": indices_len, "target": TARGET_ELEMENT_ARRAY_BUFFER },
        ],
        "accessors": [
            {
                "bufferView": 0, "componentType": COMPONENT_TYPE_FLOAT, "count": vertex_count,
                "type": "VEC3", "min": min, "max": max,
            },
            { "bufferView": 1, "componentType": COMPONENT_TYPE_FLOAT, "count": vertex_count, "type": "VEC3" },
            {
                "bufferView": 2, "componentType": COMPONENT_TYPE_UNSIGNED_INT,
                "count": live_triangles.len() * 3, "type": "SCALAR",
            },
        ],
    });

    let mut json_bytes =
        serde_json::to_vec(&doc).map_err(|e| TerramError::FormatInvalid(e.to_string()))?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let total_len = 12 + 8 + json_bytes.len() + 8 + bin.len();

    writer.write_u32::<LittleEndian>(GLB_MAGIC)?;
    writer.write_u32::<LittleEndian>(GLB_VERSION)?;
    writer.write_u32::<LittleEndian>(total_len as u32)?;

    writer.write_u32::<LittleEndian>(json_bytes.len() as u32)?;
    writer.write_u32::<LittleEndian>(CHUNK_TYPE_JSON)?;
    writer.write_all(&json_bytes)?;

    writer.write_u32::<LittleEndian>(bin.len() as u32)?;
    writer.write_u32::<LittleEndian>(CHUNK_TYPE_BIN)?;
    writer.write_all(&bin)?;

    Ok(())
}
