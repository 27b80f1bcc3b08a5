use std::sync::OnceLock;

use regex::Regex;

use crate::geom::{Point, Ray, Vec3};
use crate::mesh::Vertex;

/// Marker prefix the tailer uses for partial lines flushed at a state
/// transition. Downstream parsing must discard these.
pub const FRAGMENT_PREFIX: &str = "[FRAGMENT] ";

fn hit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^HIT\|P:\s*(?P<px>[+-]?\d*\.?\d+),(?P<py>[+-]?\d*\.?\d+),(?P<pz>[+-]?\d*\.?\d+)\|N:\s*(?P<nx>[+-]?\d*\.?\d+),(?P<ny>[+-]?\d*\.?\d+),(?P<nz>[+-]?\d*\.?\d+)\s*$",
        )
        .expect("HIT pattern is a fixed valid regex")
    })
}

fn miss_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^MISS\|S:\s*(?P<sx>[+-]?\d*\.?\d+),(?P<sy>[+-]?\d*\.?\d+),(?P<sz>[+-]?\d*\.?\d+)\|E:\s*(?P<ex>[+-]?\d*\.?\d+),(?P<ey>[+-]?\d*\.?\d+),(?P<ez>[+-]?\d*\.?\d+)\s*$",
        )
        .expect("MISS pattern is a fixed valid regex")
    })
}

/// A single parsed log record.
pub enum Record {
    Hit(Vertex),
    Miss(Ray),
}

/// Parse a single line into a `Record`. Lines that are empty, begin with
/// the fragment marker, or match neither pattern are silently skipped
/// (not an error — malformed log lines are expected noise).
pub fn parse_line(line: &str) -> Option<Record> {
    if line.is_empty() || line.starts_with(FRAGMENT_PREFIX) {
        return None;
    }

    if let Some(caps) = hit_re().captures(line) {
        let f = |name: &str| caps.name(name).unwrap().as_str().parse::<f64>().ok();
        let (px, py, pz, nx, ny, nz) = (f("px")?, f("py")?, f("pz")?, f("nx")?, f("ny")?, f("nz")?);
        return Some(Record::Hit(Vertex::new(
            Point::new(px, py, pz),
            Vec3::new(nx, ny, nz),
        )));
    }

    if let Some(caps) = miss_re().captures(line) {
        let f = |name: &str| caps.name(name).unwrap().as_str().parse::<f64>().ok();
        let (sx, sy, sz, ex, ey, ez) = (f("sx")?, f("sy")?, f("sz")?, f("ex")?, f("ey")?, f("ez")?);
        return Some(Record::Miss(Ray::new(
            Point::new(sx, sy, sz),
            Point::new(ex, ey, ez),
        )));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hit_record() {
        let rec = parse_line("HIT|P: 12.345,-6.7,8.9|N: 0.0,1.0,0.0").unwrap();
        match rec {
            Record::Hit(v) => {
                assert_eq!(v.position, Point::new(12.345, -6.7, 8.9));
                assert_eq!(v.normal, Vec3::new(0.0, 1.0, 0.0));
            }
            Record::Miss(_) => panic!("expected Hit"),
        }
    }

    #[test]
    fn parses_miss_record() {
        let rec = parse_line("MISS|S: 0.0,0.0,0.0|E: 10.0,0.0,0.0").unwrap();
        match rec {
            Record::Miss(r) => {
                assert_eq!(r.start, Point::new(0.0, 0.0, 0.0));
                assert_eq!(r.end, Point::new(10.0, 0.0, 0.0));
            }
            Record::Hit(_) => panic!("expected Miss"),
        }
    }

    #[test]
    fn tolerates_missing_whitespace_after_colon() {
        assert!(parse_line("HIT|P:1,2,3|N:0,0,1").is_some());
    }

    #[test]
    fn rejects_unknown_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("not a record").is_none());
        assert!(parse_line("[FRAGMENT] HIT|P: 1,2,3|N: 0,0,1").is_none());
    }

    #[test]
    fn rejects_exponent_notation() {
        assert!(parse_line("HIT|P: 1e5,0,0|N: 0,0,1").is_none());
    }
}
