use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::db::Database;
use crate::error::Result;
use crate::geom::Ray;
use crate::index::PointIndex;
use crate::records::{parse_line, Record};
use crate::tailer::{LogTailer, StartPosition, TailEvent};

const QUEUE_CAPACITY: usize = 8192;
const BATCH_SIZE_LIMIT: usize = 500;
const BATCH_TIME_LIMIT: Duration = Duration::from_millis(200);
const SAVER_POLL: Duration = Duration::from_millis(500);
const MUTATION_QUIET_PERIOD: Duration = Duration::from_secs(1);
const MIN_SAVE_INTERVAL: Duration = Duration::from_secs(5);
const MAX_SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Totals reported when a streaming run ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunnerStats {
    pub processed_lines: u64,
    pub points_accepted: usize,
    pub rays_recorded: usize,
    pub saves: u64,
}

struct Gate {
    index: PointIndex,
    rays: Vec<Ray>,
    dirty: bool,
    last_mutation_time: Instant,
    last_save_time: Instant,
    processed_lines: u64,
    baseline_file_lines: u64,
    saves: u64,
}

fn count_file_lines(path: &Path) -> u64 {
    match std::fs::read(path) {
        Ok(bytes) => {
            let newlines = bytes.iter().filter(|&&b| b == b'\n').count() as u64;
            if bytes.is_empty() || bytes.last() == Some(&b'\n') {
                newlines
            } else {
                newlines + 1
            }
        }
        Err(_) => 0,
    }
}

fn should_save(dirty: bool, now: Instant, last_mutation: Instant, last_save: Instant) -> bool {
    let debounced = dirty
        && now.duration_since(last_mutation) >= MUTATION_QUIET_PERIOD
        && now.duration_since(last_save) >= MIN_SAVE_INTERVAL;
    debounced || now.duration_since(last_save) >= MAX_SAVE_INTERVAL
}

/// Ingest `log_path` into the database at `db_path` until `cancel` is
/// set, composing the tailer, record parser, point index, and database
/// behind a bounded line queue and a single mutex. If `export` is
/// provided it runs once against the final accepted state after the
/// loop ends (used by the `run` command; omitted for `update`).
pub fn run(
    log_path: &Path,
    db_path: &Path,
    min_merge_distance: f64,
    cancel: &AtomicBool,
    export: Option<&mut dyn FnMut(&PointIndex, &[Ray]) -> Result<()>>,
) -> Result<RunnerStats> {
    let initial = Database::load(db_path)?;
    let now = Instant::now();
    let gate = Mutex::new(Gate {
        index: PointIndex::bulk_load(min_merge_distance, initial.points),
        rays: initial.rays,
        dirty: false,
        last_mutation_time: now,
        last_save_time: now,
        processed_lines: 0,
        baseline_file_lines: count_file_lines(log_path),
        saves: 0,
    });

    let (tx, rx) = sync_channel::<TailEvent>(QUEUE_CAPACITY);

    // Tailer and consumer run to completion first so the consumer's final
    // drain-and-flush (on cancellation) lands in `gate` before the
    // authoritative final save below reads it. The periodic saver runs
    // alongside them but only performs debounced saves; it never races
    // the final save.
    std::thread::scope(|scope| {
        scope.spawn(|| loop {
            std::thread::sleep(SAVER_POLL);
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let mut g = gate.lock().unwrap();
            let now = Instant::now();
            if should_save(g.dirty, now, g.last_mutation_time, g.last_save_time) {
                let db = Database {
                    points: g.index.points().to_vec(),
                    rays: g.rays.clone(),
                };
                if let Err(e) = db.save(db_path) {
                    log::warn!("database save failed: {e}");
                } else {
                    g.dirty = false;
                    g.last_save_time = now;
                    g.saves += 1;
                }
            }
        });

        scope.spawn(|| {
            let mut tailer = LogTailer::new(log_path, StartPosition::Start);
            while !cancel.load(Ordering::Relaxed) {
                let sent = &tx;
                tailer.wait_and_tick(&mut |event| {
                    let _ = sent.send(event);
                });
            }
            tailer.flush_pending(&mut |event| {
                let _ = tx.send(event);
            });
        });

        scope.spawn(|| {
            let mut batch: Vec<Record> = Vec::with_capacity(BATCH_SIZE_LIMIT);
            let mut batch_started = Instant::now();

            let flush = |batch: &mut Vec<Record>| {
                if batch.is_empty() {
                    return;
                }
                let mut g = gate.lock().unwrap();
                let mut hits = Vec::new();
                for record in batch.drain(..) {
                    match record {
                        Record::Hit(v) => hits.push(v),
                        Record::Miss(r) => g.rays.push(r),
                    }
                }
                g.index.add_range(hits);
                g.dirty = true;
                g.last_mutation_time = Instant::now();
            };

            loop {
                match rx.recv_timeout(BATCH_TIME_LIMIT) {
                    Ok(TailEvent::Line(line)) => {
                        gate.lock().unwrap().processed_lines += 1;
                        if let Some(record) = parse_line(&line) {
                            batch.push(record);
                        }
                        if batch.len() >= BATCH_SIZE_LIMIT {
                            flush(&mut batch);
                            batch_started = Instant::now();
                        }
                    }
                    Ok(TailEvent::Reset(_)) => {
                        flush(&mut batch);
                        let mut g = gate.lock().unwrap();
                        g.processed_lines = 0;
                        g.baseline_file_lines = count_file_lines(log_path);
                        batch_started = Instant::now();
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if batch_started.elapsed() >= BATCH_TIME_LIMIT {
                            flush(&mut batch);
                            batch_started = Instant::now();
                        }
                        if cancel.load(Ordering::Relaxed) {
                            while let Ok(event) = rx.try_recv() {
                                match event {
                                    TailEvent::Line(line) => {
                                        if let Some(record) = parse_line(&line) {
                                            batch.push(record);
                                        }
                                    }
                                    TailEvent::Reset(_) => {}
                                }
                            }
                            flush(&mut batch);
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        flush(&mut batch);
                        break;
                    }
                }
            }
        });
    });

    // Forced final save: the streaming loop only exits once `cancel` is
    // set, at which point the consumer has already drained and flushed
    // whatever was pending, regardless of the save debounce.
    let mut g = gate.lock().unwrap();
    let db = Database {
        points: g.index.points().to_vec(),
        rays: g.rays.clone(),
    };
    db.save(db_path)?;
    g.dirty = false;
    g.last_save_time = Instant::now();
    g.saves += 1;

    if let Some(export) = export {
        export(&g.index, &g.rays)?;
    }
    Ok(RunnerStats {
        processed_lines: g.processed_lines,
        points_accepted: g.index.len(),
        rays_recorded: g.rays.len(),
        saves: g.saves,
    })
}
