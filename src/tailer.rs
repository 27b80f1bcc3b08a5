use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::records::FRAGMENT_PREFIX;

const HEARTBEAT: Duration = Duration::from_secs(1);

/// Why a Reset event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    NewFile,
    Truncation,
    Rotation,
    Deleted,
}

/// An event emitted by the tailer as it follows the log file.
#[derive(Debug, Clone)]
pub enum TailEvent {
    Line(String),
    Reset(ResetReason),
}

/// Where a newly-discovered file starts being read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Start,
    End,
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(windows)]
fn file_identity(_meta: &std::fs::Metadata) -> u64 {
    // A true per-file index requires a platform API beyond std::fs; 0
    // disables rotation detection while truncation detection (based on
    // byte length) still works, matching the spec's fallback.
    0
}

#[cfg(not(any(unix, windows)))]
fn file_identity(_meta: &std::fs::Metadata) -> u64 {
    0
}

struct Active {
    file: File,
    offset: u64,
    identity: u64,
}

/// Follows a single append-only file across rotations and truncations,
/// emitting complete lines and Reset events on state transitions.
pub struct LogTailer {
    path: PathBuf,
    start_position: StartPosition,
    active: Option<Active>,
    partial: String,
    _watcher: Option<RecommendedWatcher>,
    fs_events: Option<Receiver<()>>,
}

impl LogTailer {
    pub fn new(path: impl AsRef<Path>, start_position: StartPosition) -> Self {
        let path = path.as_ref().to_path_buf();
        let (tx, rx) = channel();
        let watcher = build_watcher(&path, tx);
        Self {
            path,
            start_position,
            active: None,
            partial: String::new(),
            _watcher: watcher,
            fs_events: Some(rx),
        }
    }

    /// Block until the next wake signal (filesystem event or heartbeat),
    /// then run one tick, pushing emitted events into `sink`.
    pub fn wait_and_tick(&mut self, sink: &mut dyn FnMut(TailEvent)) {
        if let Some(rx) = &self.fs_events {
            match rx.recv_timeout(HEARTBEAT) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {}
            }
        } else {
            std::thread::sleep(HEARTBEAT);
        }
        self.tick(sink);
    }

    /// Run one state-machine step without blocking on the wake signal
    /// (used directly by tests).
    pub fn tick(&mut self, sink: &mut dyn FnMut(TailEvent)) {
        let metadata = std::fs::metadata(&self.path);

        enum Step {
            Open,
            Closed,
            Rotated(u64),
            Truncated,
            Grew,
            Idle,
        }

        let step = match (&self.active, &metadata) {
            (None, Ok(_)) => Step::Open,
            (Some(_), Err(_)) => Step::Closed,
            (Some(active), Ok(meta)) => {
                let identity = file_identity(meta);
                let len = meta.len();
                if active.identity != 0 && identity != 0 && identity != active.identity {
                    Step::Rotated(identity)
                } else if len < active.offset {
                    Step::Truncated
                } else if len > active.offset {
                    Step::Grew
                } else {
                    Step::Idle
                }
            }
            (None, Err(_)) => Step::Idle,
        };

        match step {
            Step::Open => {
                let meta = metadata.expect("checked Ok above");
                let file = match File::open(&self.path) {
                    Ok(f) => f,
                    Err(_) => return, // transient: skip this tick, retry next wake
                };
                let identity = file_identity(&meta);
                let offset = match self.start_position {
                    StartPosition::Start => 0,
                    StartPosition::End => meta.len(),
                };
                self.active = Some(Active {
                    file,
                    offset,
                    identity,
                });
                sink(TailEvent::Reset(ResetReason::NewFile));
                self.read_available(sink);
            }
            Step::Closed => {
                self.flush_fragment(sink);
                self.active = None;
                sink(TailEvent::Reset(ResetReason::Deleted));
            }
            Step::Rotated(identity) => {
                self.flush_fragment(sink);
                let file = match File::open(&self.path) {
                    Ok(f) => f,
                    Err(_) => return, // transient: retry next wake
                };
                let active = self.active.as_mut().expect("Rotated implies Some(active)");
                active.file = file;
                active.identity = identity;
                active.offset = 0;
                sink(TailEvent::Reset(ResetReason::Rotation));
                self.read_available(sink);
            }
            Step::Truncated => {
                self.flush_fragment(sink);
                let active = self
                    .active
                    .as_mut()
                    .expect("Truncated implies Some(active)");
                active.offset = 0;
                let _ = active.file.seek(SeekFrom::Start(0));
                sink(TailEvent::Reset(ResetReason::Truncation));
                self.read_available(sink);
            }
            Step::Grew => self.read_available(sink),
            Step::Idle => {}
        }
    }

    /// Flush any pending partial line as a fragment. Called on shutdown
    /// so an in-flight partial read is never silently lost.
    pub fn flush_pending(&mut self, sink: &mut dyn FnMut(TailEvent)) {
        self.flush_fragment(sink);
    }

    fn flush_fragment(&mut self, sink: &mut dyn FnMut(TailEvent)) {
        if !self.partial.is_empty() {
            let fragment = std::mem::take(&mut self.partial);
            sink(TailEvent::Line(format!("{}{}", FRAGMENT_PREFIX, fragment)));
        }
    }

    fn read_available(&mut self, sink: &mut dyn FnMut(TailEvent)) {
        let Some(active) = &mut self.active else {
            return;
        };

        if active.file.seek(SeekFrom::Start(active.offset)).is_err() {
            return; // transient: retry next wake
        }

        let mut buf = Vec::new();
        if active.file.read_to_end(&mut buf).is_err() {
            return; // transient: retry next wake
        }
        if buf.is_empty() {
            return;
        }

        active.offset += buf.len() as u64;
        let chunk = String::from_utf8_lossy(&buf);
        self.partial.push_str(&chunk);

        let mut lines: Vec<String> = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line = self.partial[..pos].to_string();
            self.partial.drain(..=pos);
            lines.push(line);
        }

        for line in lines {
            sink(TailEvent::Line(line));
        }
    }
}

fn build_watcher(
    path: &Path,
    tx: std::sync::mpsc::Sender<()>,
) -> Option<RecommendedWatcher> {
    let watch_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut watcher = notify::recommended_watcher(move |_res: notify::Result<notify::Event>| {
        let _ = tx.send(());
    })
    .ok()?;
    watcher
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .ok()?;
    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn tailer_no_watch(path: &Path, start: StartPosition) -> LogTailer {
        LogTailer {
            path: path.to_path_buf(),
            start_position: start,
            active: None,
            partial: String::new(),
            _watcher: None,
            fs_events: None,
        }
    }

    #[test]
    fn emits_complete_lines_and_keeps_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, b"A\nB\nC").unwrap();

        let mut tailer = tailer_no_watch(&path, StartPosition::Start);
        let mut events = Vec::new();
        tailer.tick(&mut |e| events.push(e));

        let lines: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                TailEvent::Line(l) => Some(l.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(tailer.partial, "C");
    }

    /// File grows from empty to "A\nB\n", then is replaced (new inode)
    /// with "C\nD\n". Expect A, B, a reset, then C, D, with no duplicates.
    #[test]
    fn rotation_emits_lines_without_duplicates_or_loss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, b"").unwrap();

        let mut tailer = tailer_no_watch(&path, StartPosition::Start);
        let mut events = Vec::new();
        tailer.tick(&mut |e| events.push(e)); // Reset(NewFile), nothing to read

        fs::write(&path, b"A\nB\n").unwrap();
        tailer.tick(&mut |e| events.push(e));

        // Simulate rotation: remove and recreate (new inode on most filesystems).
        fs::remove_file(&path).unwrap();
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"C\nD\n").unwrap();
        drop(f);
        tailer.tick(&mut |e| events.push(e));

        let lines: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                TailEvent::Line(l) => Some(l.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()]
        );

        let resets: Vec<ResetReason> = events
            .iter()
            .filter_map(|e| match e {
                TailEvent::Reset(r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(resets[0], ResetReason::NewFile);
        assert!(resets.contains(&ResetReason::Rotation) || resets.contains(&ResetReason::Truncation));
    }

    #[test]
    fn truncation_flushes_partial_as_fragment_and_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, b"partial-no-newline").unwrap();

        let mut tailer = tailer_no_watch(&path, StartPosition::Start);
        let mut events = Vec::new();
        tailer.tick(&mut |e| events.push(e));
        assert_eq!(tailer.partial, "partial-no-newline");

        fs::write(&path, b"X\n").unwrap();
        events.clear();
        tailer.tick(&mut |e| events.push(e));

        let first_line = events.iter().find_map(|e| match e {
            TailEvent::Line(l) => Some(l.clone()),
            _ => None,
        });
        assert_eq!(
            first_line,
            Some(format!("{}partial-no-newline", FRAGMENT_PREFIX))
        );
    }

    #[test]
    fn deletion_flushes_fragment_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, b"lonely-fragment").unwrap();

        let mut tailer = tailer_no_watch(&path, StartPosition::Start);
        let mut events = Vec::new();
        tailer.tick(&mut |e| events.push(e));

        fs::remove_file(&path).unwrap();
        events.clear();
        tailer.tick(&mut |e| events.push(e));

        assert!(events.iter().any(|e| matches!(
            e,
            TailEvent::Reset(ResetReason::Deleted)
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            TailEvent::Line(l) if l.starts_with(FRAGMENT_PREFIX)
        )));
    }
}
