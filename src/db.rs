use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, TerramError};
use crate::geom::{Point, Ray, Vec3};
use crate::mesh::Vertex;

const VERSION: i32 = 1;

/// Persisted point and ray lists: little-endian fixed layout of
/// `int32 version`, `int32 pointCount`, `pointCount * 6 f64`
/// (px,py,pz,nx,ny,nz), `int32 rayCount`, `rayCount * 6 f64`
/// (sx,sy,sz,ex,ey,ez).
#[derive(Default)]
pub struct Database {
    pub points: Vec<Vertex>,
    pub rays: Vec<Ray>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file loads as empty lists, not an
    /// error; a version mismatch is fatal for the load (the caller
    /// decides whether to fall back to a fresh database).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(TerramError::Io(e)),
        };
        Self::decode(&bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(bytes);

        let version = cursor.read_i32::<LittleEndian>()?;
        if version != VERSION {
            return Err(TerramError::DatabaseVersion {
                expected: VERSION,
                found: version,
            });
        }

        let point_count = cursor.read_i32::<LittleEndian>()?;
        if point_count < 0 {
            return Err(TerramError::FormatInvalid("negative point count".into()));
        }
        let mut points = Vec::with_capacity(point_count as usize);
        for _ in 0..point_count {
            let px = cursor.read_f64::<LittleEndian>()?;
            let py = cursor.read_f64::<LittleEndian>()?;
            let pz = cursor.read_f64::<LittleEndian>()?;
            let nx = cursor.read_f64::<LittleEndian>()?;
            let ny = cursor.read_f64::<LittleEndian>()?;
            let nz = cursor.read_f64::<LittleEndian>()?;
            points.push(Vertex::new(Point::new(px, py, pz), Vec3::new(nx, ny, nz)));
        }

        let ray_count = cursor.read_i32::<LittleEndian>()?;
        if ray_count < 0 {
            return Err(TerramError::FormatInvalid("negative ray count".into()));
        }
        let mut rays = Vec::with_capacity(ray_count as usize);
        for _ in 0..ray_count {
            let sx = cursor.read_f64::<LittleEndian>()?;
            let sy = cursor.read_f64::<LittleEndian>()?;
            let sz = cursor.read_f64::<LittleEndian>()?;
            let ex = cursor.read_f64::<LittleEndian>()?;
            let ey = cursor.read_f64::<LittleEndian>()?;
            let ez = cursor.read_f64::<LittleEndian>()?;
            rays.push(Ray::new(Point::new(sx, sy, sz), Point::new(ex, ey, ez)));
        }

        Ok(Self { points, rays })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(8 + self.points.len() * 48 + self.rays.len() * 48);
        buf.write_i32::<LittleEndian>(VERSION)?;

        buf.write_i32::<LittleEndian>(self.points.len() as i32)?;
        for v in &self.points {
            buf.write_f64::<LittleEndian>(v.position.x)?;
            buf.write_f64::<LittleEndian>(v.position.y)?;
            buf.write_f64::<LittleEndian>(v.position.z)?;
            buf.write_f64::<LittleEndian>(v.normal.x)?;
            buf.write_f64::<LittleEndian>(v.normal.y)?;
            buf.write_f64::<LittleEndian>(v.normal.z)?;
        }

        buf.write_i32::<LittleEndian>(self.rays.len() as i32)?;
        for r in &self.rays {
            buf.write_f64::<LittleEndian>(r.start.x)?;
            buf.write_f64::<LittleEndian>(r.start.y)?;
            buf.write_f64::<LittleEndian>(r.start.z)?;
            buf.write_f64::<LittleEndian>(r.end.x)?;
            buf.write_f64::<LittleEndian>(r.end.y)?;
            buf.write_f64::<LittleEndian>(r.end.z)?;
        }

        Ok(buf)
    }

    /// Atomically persist to `path`: write to `<path>.tmp`, then replace
    /// `path` in one filesystem operation. Falls back to delete-then-
    /// rename (best effort) if the atomic replace fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = tmp_path_for(path);

        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&self.encode()?)?;
            writer.flush()?;
        }

        if fs::rename(&tmp_path, path).is_err() {
            // Best-effort fallback: delete the destination then rename.
            let _ = fs::remove_file(path);
            fs::rename(&tmp_path, path)?;
        }

        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Merge two databases' point lists through `E`'s spacing rule and
/// concatenate their ray lists. Used by the `merge` CLI command.
pub fn merge(min_merge_distance: f64, a: Database, b: Database) -> Database {
    use crate::index::PointIndex;

    let mut index = PointIndex::bulk_load(min_merge_distance, a.points);
    index.add_range(b.points);
    let points = index.points().iter().map(|v| v.clone()).collect();

    let mut rays = Vec::with_capacity(a.rays.len() + b.rays.len());
    rays.extend(a.rays);
    rays.extend(b.rays);

    Database { points, rays }
}
