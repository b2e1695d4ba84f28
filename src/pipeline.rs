//! Pipeline stages and the stage graph running them.
//!
//! Pass 1 is `reader -> sorter -> spiller`, pass 2 is `stream readers -> merger -> writer`.
//! Stages run on their own threads and talk over bounded channels only; a full channel
//! blocks its producer and an empty one blocks its consumer. The reader is additionally
//! held back by the [`ByteBudget`] which the spiller refills.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use log;
use parking_lot::Mutex;

use crate::chunk::ChunkLines;
use crate::compare::compare_lines;
use crate::error::IoContext;
use crate::{BinaryHeapMerger, ByteBudget, CancellationToken, Chunk, SortAlgorithm, SortError, SpilledChunk};

/// Chunk channels are rendezvous channels: a chunk is handed over only when the next stage takes it.
pub const CHUNK_CHANNEL_CAPACITY: usize = 0;
/// Depth of every line channel in pass 2.
pub const LINE_CHANNEL_CAPACITY: usize = 8;

/// Line read from a chunk file or produced by the merger.
pub type LineResult = Result<String, SortError>;

/// Work done by a single stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Lines the stage passed on.
    pub lines: u64,
    /// Time spent in the stage's own work (reading, sorting or writing).
    pub busy: Duration,
    /// Time spent held back by the byte budget.
    pub waited: Duration,
}

type StageFn<'a> = Box<dyn FnOnce(&CancellationToken) -> Result<StageReport, SortError> + Send + 'a>;

/// A pass of the pipeline: stages wired together by the channels their closures own.
///
/// Every stage gets the pass halt token, a child of the caller's cancellation token. When a
/// stage fails or panics the pass cancels the halt token so that stages parked on the byte
/// budget or polling for cancellation unwind too. Stages blocked on a channel are released
/// when the failed stage drops its channel ends.
pub struct Pass<'a> {
    name: &'static str,
    halt: CancellationToken,
    stages: Vec<(&'static str, StageFn<'a>)>,
}

impl<'a> Pass<'a> {
    pub fn new(name: &'static str, cancel: &CancellationToken) -> Self {
        Pass {
            name,
            halt: cancel.child_token(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage to the pass.
    pub fn stage<S>(mut self, name: &'static str, stage: S) -> Self
    where
        S: FnOnce(&CancellationToken) -> Result<StageReport, SortError> + Send + 'a,
    {
        self.stages.push((name, Box::new(stage)));
        self
    }

    /// Runs every stage on its own thread and waits until all of them are finished.
    /// Returns the stage reports in the order the stages were added, or the first stage error.
    pub fn run(self) -> Result<Vec<(&'static str, StageReport)>, SortError> {
        let Pass { name, halt, stages } = self;
        let first_error: Mutex<Option<SortError>> = Mutex::new(None);
        let fail = |err: SortError| {
            first_error.lock().get_or_insert(err);
        };

        log::debug!("{} pass: starting {} stages", name, stages.len());

        let reports = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(stages.len());

            for (stage_name, stage) in stages {
                let halt = &halt;
                let fail = &fail;
                let spawned = thread::Builder::new()
                    .name(stage_name.to_string())
                    .spawn_scoped(scope, move || {
                        let guard = HaltOnPanic::new(halt);
                        let result = stage(halt);
                        guard.disarm();

                        match result {
                            Ok(report) => {
                                log::debug!("{} stage done: {:?}", stage_name, report);
                                Some(report)
                            }
                            Err(err) => {
                                log::debug!("{} stage failed: {}", stage_name, err);
                                halt.cancel();
                                fail(err);
                                None
                            }
                        }
                    });

                match spawned {
                    Ok(handle) => handles.push((stage_name, handle)),
                    Err(err) => {
                        halt.cancel();
                        fail(SortError::io(format!("spawning {} stage", stage_name), err));
                    }
                }
            }

            let mut reports = Vec::with_capacity(handles.len());
            for (stage_name, handle) in handles {
                match handle.join() {
                    Ok(Some(report)) => reports.push((stage_name, report)),
                    Ok(None) => {}
                    Err(_) => fail(SortError::StagePanicked(stage_name)),
                }
            }
            reports
        });

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }
}

/// Cancels the halt token if the stage unwinds before [`HaltOnPanic::disarm`].
struct HaltOnPanic<'t> {
    halt: &'t CancellationToken,
    armed: bool,
}

impl<'t> HaltOnPanic<'t> {
    fn new(halt: &'t CancellationToken) -> Self {
        HaltOnPanic { halt, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HaltOnPanic<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.halt.cancel();
        }
    }
}

/// Reader stage: splits the source into chunks of about `budget.threshold()` bytes.
///
/// Before each line it waits for the budget to drop below the threshold, so the buffered bytes
/// exceed the threshold by at most one line. On end of input or cancellation the open chunk,
/// if any, is sent downstream.
pub fn read_chunks<R: BufRead>(
    source: R,
    budget: &ByteBudget,
    chunk_tx: Sender<Chunk>,
    cancel: &CancellationToken,
) -> Result<StageReport, SortError> {
    let mut report = StageReport::default();
    let mut chunk: Option<Chunk> = None;
    let mut lines = source.lines();

    while !cancel.is_cancelled() {
        report.waited += budget.wait_for_capacity(cancel);
        if cancel.is_cancelled() {
            break;
        }

        let start = Instant::now();
        let line = match lines.next() {
            Some(line) => line.context(|| "reading input")?,
            None => break,
        };
        report.busy += start.elapsed();

        let current = chunk.get_or_insert_with(|| Chunk::new(budget.threshold()));
        budget.acquire(current.push(line));
        report.lines += 1;

        if current.is_full() {
            if let Some(full) = chunk.take() {
                if chunk_tx.send(full).is_err() {
                    log::debug!("sorter is gone, stopping reader");
                    return Ok(report);
                }
            }
        }
    }

    if let Some(last) = chunk.filter(|chunk| !chunk.is_empty()) {
        // the sorter may already be gone if the pass is halted
        let _ = chunk_tx.send(last);
    }

    return Ok(report);
}

/// Sorter stage: sorts every chunk in place and passes it on.
pub fn sort_chunks(
    chunk_rx: Receiver<Chunk>,
    sorted_tx: Sender<Chunk>,
    algorithm: SortAlgorithm,
    thread_pool: &rayon::ThreadPool,
) -> Result<StageReport, SortError> {
    let mut report = StageReport::default();

    for mut chunk in chunk_rx {
        let start = Instant::now();
        chunk.sort(algorithm, thread_pool);
        report.busy += start.elapsed();
        report.lines += chunk.len() as u64;

        log::debug!("sorted chunk ({} lines, {} bytes)", chunk.len(), chunk.bytes());
        if sorted_tx.send(chunk).is_err() {
            break;
        }
    }

    return Ok(report);
}

/// Spiller stage: dumps every sorted chunk into its own file in `dir` and records it in `spilled`.
pub fn spill_chunks(
    sorted_rx: Receiver<Chunk>,
    dir: &Path,
    budget: &ByteBudget,
    buf_size: usize,
    spilled: &mut Vec<SpilledChunk>,
) -> Result<StageReport, SortError> {
    let mut report = StageReport::default();

    for chunk in sorted_rx {
        let path = SpilledChunk::path_for(dir, spilled.len());
        let lines = chunk.len() as u64;

        let start = Instant::now();
        let chunk = SpilledChunk::dump(path, chunk, budget, buf_size)?;
        report.busy += start.elapsed();
        report.lines += lines;

        log::debug!("saved chunk {} ({} lines)", chunk.path().display(), lines);
        spilled.push(chunk);
    }

    return Ok(report);
}

/// Stream reader stage: feeds the lines of one chunk file into its channel.
/// A read error is forwarded down the channel and ends the stage.
pub fn stream_chunk(
    mut lines: ChunkLines,
    line_tx: Sender<LineResult>,
    cancel: &CancellationToken,
) -> Result<StageReport, SortError> {
    let mut report = StageReport::default();

    while !cancel.is_cancelled() {
        let start = Instant::now();
        let line = lines.next();
        report.busy += start.elapsed();

        match line {
            Some(Ok(line)) => {
                if line_tx.send(Ok(line)).is_err() {
                    break;
                }
                report.lines += 1;
            }
            Some(Err(err)) => {
                let _ = line_tx.send(Err(err));
                break;
            }
            None => break,
        }
    }

    return Ok(report);
}

/// Merger stage: k-way merges the chunk streams into one sorted stream.
///
/// Cancellation is checked before every line is passed on. A stream reader closes its channel
/// early only after cancellation, so everything emitted is a prefix of the complete merge.
pub fn merge_streams(
    line_rxs: Vec<Receiver<LineResult>>,
    merged_tx: Sender<LineResult>,
    cancel: &CancellationToken,
) -> Result<StageReport, SortError> {
    let mut report = StageReport::default();
    let merger = BinaryHeapMerger::new(line_rxs, |a: &String, b: &String| compare_lines(a, b));

    for line in merger {
        if cancel.is_cancelled() {
            log::debug!("merge cancelled after {} lines", report.lines);
            break;
        }
        let is_line = line.is_ok();
        if merged_tx.send(line).is_err() {
            break;
        }
        if is_line {
            report.lines += 1;
        }
    }

    return Ok(report);
}

/// Writer stage: writes merged lines to the destination file and syncs it to disk.
pub fn write_output(
    merged_rx: Receiver<LineResult>,
    dest: fs::File,
    dest_path: &Path,
    buf_size: usize,
) -> Result<StageReport, SortError> {
    let mut report = StageReport::default();
    let mut writer = io::BufWriter::with_capacity(buf_size, dest);

    for line in merged_rx {
        let line = line?;

        let start = Instant::now();
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .context(|| format!("writing {}", dest_path.display()))?;
        report.busy += start.elapsed();
        report.lines += 1;
    }

    let start = Instant::now();
    let dest = writer
        .into_inner()
        .map_err(|err| SortError::io(format!("flushing {}", dest_path.display()), err.into_error()))?;
    dest.sync_all()
        .context(|| format!("syncing {}", dest_path.display()))?;
    report.busy += start.elapsed();

    return Ok(report);
}
