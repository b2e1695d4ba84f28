//! External sorter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::bounded;
use log;

use crate::error::IoContext;
use crate::pipeline::{self, Pass, StageReport, CHUNK_CHANNEL_CAPACITY, LINE_CHANNEL_CAPACITY};
use crate::{ByteBudget, CancellationToken, Options, SortAlgorithm, SortError, SpilledChunk};

/// How a sort run ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every input line was written to the destination.
    Completed,
    /// The run was cancelled and the chunk files spilled so far are left in the temporary directory.
    ///
    /// If cancelled during the first pass the destination is not touched. If cancelled during the
    /// second pass it holds a prefix of the sorted output.
    Interrupted,
}

/// Time spent in each part of the pipeline, summed over stages.
/// Stages overlap, so the values don't add up to the wall time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Timings {
    /// Reader held back by the byte budget.
    pub waited: Duration,
    /// Reading the source and the chunk files.
    pub read: Duration,
    /// Sorting chunks.
    pub sort: Duration,
    /// Writing chunk files.
    pub spill: Duration,
    /// Writing the destination.
    pub write: Duration,
}

/// Sort run summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSummary {
    pub outcome: Outcome,
    /// Number of chunk files spilled in pass 1.
    pub chunks: usize,
    pub lines_read: u64,
    pub lines_written: u64,
    /// Highest number of line bytes buffered in memory at once.
    pub peak_buffered_bytes: u64,
    pub timings: Timings,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone, Debug, Default)]
pub struct ExternalSorterBuilder {
    options: Options,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Creates an instance of a builder from complete options.
    pub fn from_options(options: Options) -> Self {
        ExternalSorterBuilder { options }
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(self.options)
    }

    /// Sets the file to be sorted.
    pub fn with_source(mut self, path: &Path) -> ExternalSorterBuilder {
        self.options.source = path.into();
        return self;
    }

    /// Sets the file sorted lines are written to.
    pub fn with_destination(mut self, path: &Path) -> ExternalSorterBuilder {
        self.options.destination = path.into();
        return self;
    }

    /// Sets memory budget in bytes.
    pub fn with_buffer_size(mut self, buffer_size: u64) -> ExternalSorterBuilder {
        self.options.buffer_size = buffer_size;
        return self;
    }

    /// Sets chunk sorting algorithm.
    pub fn with_algorithm(mut self, algorithm: SortAlgorithm) -> ExternalSorterBuilder {
        self.options.algorithm = algorithm;
        return self;
    }

    /// Keeps temporary chunk files after the sort.
    pub fn with_keep_temps(mut self, keep_temps: bool) -> ExternalSorterBuilder {
        self.options.keep_temps = keep_temps;
        return self;
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.options.threads = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.options.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.options.rw_buf_size = Some(buf_size);
        return self;
    }
}

/// External sorter.
///
/// Runs the two passes of an external merge sort over a text file:
/// pass 1 splits the source into sorted chunk files, pass 2 merges them into the destination.
pub struct ExternalSorter {
    options: Options,
    /// Thread pool for [`SortAlgorithm::Library`] chunk sorting.
    thread_pool: rayon::ThreadPool,
    /// Directory chunk files are written to.
    tmp_path: PathBuf,
    /// Owns `tmp_path` when the sorter created it, removing it on drop.
    _tmp_dir: Option<tempfile::TempDir>,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    /// Validates the options, starts the thread pool and prepares the temporary directory.
    pub fn new(options: Options) -> Result<Self, SortError> {
        options.validate()?;

        let thread_pool = Self::init_thread_pool(options.threads)?;
        let (tmp_path, tmp_dir) = Self::init_tmp_directory(options.tmp_dir.as_deref(), options.keep_temps)?;

        return Ok(ExternalSorter {
            options,
            thread_pool,
            tmp_path,
            _tmp_dir: tmp_dir,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder.build()?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(
        tmp_path: Option<&Path>,
        keep_temps: bool,
    ) -> Result<(PathBuf, Option<tempfile::TempDir>), SortError> {
        let (path, owned) = match tmp_path {
            Some(tmp_path) => {
                fs::create_dir_all(tmp_path)
                    .context(|| format!("creating temporary directory {}", tmp_path.display()))?;
                (tmp_path.to_path_buf(), None)
            }
            None => {
                let tmp_dir = tempfile::Builder::new()
                    .prefix("ext-line-sort-")
                    .tempdir()
                    .context(|| "creating temporary directory")?;
                if keep_temps {
                    (tmp_dir.into_path(), None)
                } else {
                    (tmp_dir.path().to_path_buf(), Some(tmp_dir))
                }
            }
        };

        log::info!("using {} as a temporary directory", path.display());

        return Ok((path, owned));
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Directory chunk files are written to.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_path
    }

    /// Sorts the source file into the destination file.
    ///
    /// Returns [`Outcome::Interrupted`] if `cancel` fired before every line was written. Chunk files
    /// are removed only after a completed run; on interruption or error they are left in the
    /// temporary directory. A temporary directory created by the sorter is still removed on drop.
    ///
    /// # Arguments
    /// * `cancel` - Token observed by the pipeline before each line read
    pub fn sort(&self, cancel: &CancellationToken) -> Result<SortSummary, SortError> {
        let source = fs::File::open(&self.options.source)
            .context(|| format!("opening {}", self.options.source.display()))?;
        let source = io::BufReader::with_capacity(self.options.rw_buffer_size(), source);

        self.sort_lines(source, cancel)
    }

    fn sort_lines<R: io::BufRead + Send>(
        &self,
        source: R,
        cancel: &CancellationToken,
    ) -> Result<SortSummary, SortError> {
        let mut spilled = Vec::new();

        let result = self.run(source, &mut spilled, cancel);
        match &result {
            Ok(summary) if summary.outcome == Outcome::Completed => self.cleanup(&spilled),
            Ok(_) => log::warn!(
                "sort interrupted, leaving {} chunk files in {}",
                spilled.len(),
                self.tmp_path.display()
            ),
            Err(err) if !spilled.is_empty() => log::warn!(
                "sort failed ({}), leaving {} chunk files in {}",
                err,
                spilled.len(),
                self.tmp_path.display()
            ),
            Err(_) => {}
        }

        return result;
    }

    fn run<R: io::BufRead + Send>(
        &self,
        source: R,
        spilled: &mut Vec<SpilledChunk>,
        cancel: &CancellationToken,
    ) -> Result<SortSummary, SortError> {
        let budget = ByteBudget::new(self.options.chunk_threshold());

        log::info!("1st pass: splitting {} into sorted chunks", self.options.source.display());
        let split = self.split(source, &budget, spilled, cancel)?;
        debug_assert_eq!(budget.buffered(), 0, "chunk bytes left in memory after the first pass");

        // an interrupted split leaves the destination untouched
        let split_interrupted = cancel.is_cancelled();
        let merge = if split_interrupted {
            log::warn!("1st pass interrupted, {} is not written", self.options.destination.display());
            Vec::new()
        } else {
            let buf_size = self.options.merge_buffer_size(spilled.len());
            log::info!(
                "2nd pass: merging {} chunks into {} (buffer: {} bytes)",
                spilled.len(),
                self.options.destination.display(),
                buf_size
            );
            self.merge(spilled, buf_size, cancel)?
        };

        let mut summary = SortSummary {
            outcome: Outcome::Completed,
            chunks: spilled.len(),
            lines_read: 0,
            lines_written: 0,
            peak_buffered_bytes: budget.peak(),
            timings: Timings::default(),
        };

        for (name, report) in split.iter().chain(merge.iter()) {
            match *name {
                READER => {
                    summary.lines_read = report.lines;
                    summary.timings.waited += report.waited;
                    summary.timings.read += report.busy;
                }
                SORTER => summary.timings.sort += report.busy,
                SPILLER => summary.timings.spill += report.busy,
                STREAM => summary.timings.read += report.busy,
                WRITER => {
                    summary.lines_written = report.lines;
                    summary.timings.write += report.busy;
                }
                _ => {}
            }
        }

        if split_interrupted || summary.lines_written < summary.lines_read {
            log::warn!("sort interrupted, {} lines of {} written", summary.lines_written, summary.lines_read);
            summary.outcome = Outcome::Interrupted;
        }
        debug_assert!(cancel.is_cancelled() || summary.lines_written == summary.lines_read);

        return Ok(summary);
    }

    /// Pass 1: reader -> sorter -> spiller. Returns once every chunk is on disk.
    fn split<R: io::BufRead + Send>(
        &self,
        source: R,
        budget: &ByteBudget,
        spilled: &mut Vec<SpilledChunk>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(&'static str, StageReport)>, SortError> {
        let (chunk_tx, chunk_rx) = bounded(CHUNK_CHANNEL_CAPACITY);
        let (sorted_tx, sorted_rx) = bounded(CHUNK_CHANNEL_CAPACITY);

        let algorithm = self.options.algorithm;
        let thread_pool = &self.thread_pool;
        let tmp_path = self.tmp_path.as_path();
        let rw_buf_size = self.options.rw_buffer_size();

        Pass::new("split", cancel)
            .stage(READER, move |cancel| pipeline::read_chunks(source, budget, chunk_tx, cancel))
            .stage(SORTER, move |_| pipeline::sort_chunks(chunk_rx, sorted_tx, algorithm, thread_pool))
            .stage(SPILLER, move |_| {
                pipeline::spill_chunks(sorted_rx, tmp_path, budget, rw_buf_size, spilled)
            })
            .run()
    }

    /// Pass 2: one stream reader per chunk file -> merger -> writer.
    fn merge(
        &self,
        spilled: &[SpilledChunk],
        buf_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<(&'static str, StageReport)>, SortError> {
        let mut streams = Vec::with_capacity(spilled.len());
        for chunk in spilled {
            streams.push(chunk.open(buf_size)?);
        }

        let dest_path = self.options.destination.as_path();
        let dest = fs::File::create(dest_path).context(|| format!("creating {}", dest_path.display()))?;

        let mut pass = Pass::new("merge", cancel);
        let mut line_rxs = Vec::with_capacity(streams.len());
        for lines in streams {
            let (line_tx, line_rx) = bounded(LINE_CHANNEL_CAPACITY);
            pass = pass.stage(STREAM, move |cancel| pipeline::stream_chunk(lines, line_tx, cancel));
            line_rxs.push(line_rx);
        }

        let (merged_tx, merged_rx) = bounded(LINE_CHANNEL_CAPACITY);
        pass.stage(MERGER, move |cancel| pipeline::merge_streams(line_rxs, merged_tx, cancel))
            .stage(WRITER, move |_| pipeline::write_output(merged_rx, dest, dest_path, buf_size))
            .run()
    }

    fn cleanup(&self, spilled: &[SpilledChunk]) {
        if self.options.keep_temps {
            log::info!("keeping {} chunk files in {}", spilled.len(), self.tmp_path.display());
            return;
        }

        for chunk in spilled {
            if let Err(err) = chunk.remove() {
                log::warn!("{}", err);
            }
        }
    }
}

const READER: &str = "reader";
const SORTER: &str = "sorter";
const SPILLER: &str = "spiller";
const STREAM: &str = "stream";
const MERGER: &str = "merger";
const WRITER: &str = "writer";

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, BufRead, Cursor, Read};
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, Outcome};
    use crate::compare::compare_lines;
    use crate::{CancellationToken, SortAlgorithm, SortError};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn write_lines(path: &Path, lines: &[String]) {
        fs::write(path, lines.iter().map(|line| format!("{}\n", line)).collect::<String>()).unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path).unwrap().lines().map(String::from).collect()
    }

    fn sorter(dir: &Path, buffer_size: u64, algorithm: SortAlgorithm) -> ExternalSorter {
        ExternalSorterBuilder::new()
            .with_source(&dir.join("input.txt"))
            .with_destination(&dir.join("output.txt"))
            .with_tmp_dir(&dir.join("cache"))
            .with_buffer_size(buffer_size)
            .with_algorithm(algorithm)
            .with_threads_number(2)
            .build()
            .unwrap()
    }

    #[rstest]
    #[case(SortAlgorithm::Library)]
    #[case(SortAlgorithm::Heap)]
    fn test_external_sorter(tmp_dir: tempfile::TempDir, #[case] algorithm: SortAlgorithm) {
        let input = vec!["banana", "Apple", "cherry", "apple"];
        write_lines(&tmp_dir.path().join("input.txt"), &Vec::from_iter(input.iter().map(|s| s.to_string())));

        let sorter = sorter(tmp_dir.path(), 10, algorithm);
        let summary = sorter.sort(&CancellationToken::new()).unwrap();

        assert_eq!(summary.outcome, Outcome::Completed);
        assert!(summary.chunks > 1);
        assert_eq!(summary.lines_read, 4);
        assert_eq!(summary.lines_written, 4);

        let output = read_lines(&tmp_dir.path().join("output.txt"));
        let folded = Vec::from_iter(output.iter().map(|line| line.to_lowercase()));
        assert_eq!(folded, vec!["apple", "apple", "banana", "cherry"]);

        let mut actual = output.clone();
        actual.sort();
        let mut expected = input.clone();
        expected.sort();
        assert_eq!(actual, expected);

        // chunk files are removed, the directory stays
        assert_eq!(fs::read_dir(tmp_dir.path().join("cache")).unwrap().count(), 0);
    }

    #[rstest]
    #[case(SortAlgorithm::Library, 64)]
    #[case(SortAlgorithm::Heap, 64)]
    #[case(SortAlgorithm::Heap, 1_000_000)]
    fn test_sort_permutation(tmp_dir: tempfile::TempDir, #[case] algorithm: SortAlgorithm, #[case] buffer_size: u64) {
        let mut input = Vec::from_iter((0..500).map(|idx| match idx % 5 {
            0 => format!("Line {}", idx),
            1 => format!("line {}", idx * 31 % 97),
            2 => String::new(),
            3 => format!("ÄRGER {}", idx % 11),
            _ => format!("ärger {}", idx % 13),
        }));
        input.shuffle(&mut rand::thread_rng());
        write_lines(&tmp_dir.path().join("input.txt"), &input);

        let sorter = sorter(tmp_dir.path(), buffer_size, algorithm);
        let summary = sorter.sort(&CancellationToken::new()).unwrap();

        let output = read_lines(&tmp_dir.path().join("output.txt"));
        assert_eq!(summary.lines_written, input.len() as u64);
        assert!(output.windows(2).all(|w| compare_lines(&w[0], &w[1]).is_le()));
        assert!(summary.peak_buffered_bytes < sorter.options().chunk_threshold() + 16);

        let mut actual = output;
        actual.sort();
        input.sort();
        assert_eq!(actual, input);
    }

    #[rstest]
    fn test_sorted_input_is_unchanged(tmp_dir: tempfile::TempDir) {
        let input = Vec::from_iter(
            (0..200).map(|idx| format!("{:04}-{}", idx, if idx % 2 == 0 { "Even" } else { "odd" })),
        );
        write_lines(&tmp_dir.path().join("input.txt"), &input);

        sorter(tmp_dir.path(), 100, SortAlgorithm::Heap)
            .sort(&CancellationToken::new())
            .unwrap();

        assert_eq!(
            fs::read(tmp_dir.path().join("output.txt")).unwrap(),
            fs::read(tmp_dir.path().join("input.txt")).unwrap()
        );
    }

    #[rstest]
    fn test_empty_input(tmp_dir: tempfile::TempDir) {
        write_lines(&tmp_dir.path().join("input.txt"), &[]);

        let summary = sorter(tmp_dir.path(), 100, SortAlgorithm::Heap)
            .sort(&CancellationToken::new())
            .unwrap();

        assert_eq!(summary.chunks, 0);
        assert_eq!(fs::read(tmp_dir.path().join("output.txt")).unwrap(), b"");
    }

    #[rstest]
    fn test_keep_temps(tmp_dir: tempfile::TempDir) {
        let input = Vec::from_iter((0..20).rev().map(|idx| format!("{:02}", idx)));
        write_lines(&tmp_dir.path().join("input.txt"), &input);

        let sorter = ExternalSorterBuilder::new()
            .with_source(&tmp_dir.path().join("input.txt"))
            .with_destination(&tmp_dir.path().join("output.txt"))
            .with_tmp_dir(&tmp_dir.path().join("cache"))
            .with_buffer_size(10)
            .with_keep_temps(true)
            .build()
            .unwrap();
        let summary = sorter.sort(&CancellationToken::new()).unwrap();

        assert!(summary.chunks > 1);
        for idx in 0..summary.chunks {
            assert!(tmp_dir.path().join("cache").join(format!("block_{}", idx)).exists());
        }
    }

    #[rstest]
    fn test_owned_tmp_dir_removed(tmp_dir: tempfile::TempDir) {
        write_lines(&tmp_dir.path().join("input.txt"), &["b".to_string(), "a".to_string()]);

        let sorter = ExternalSorterBuilder::new()
            .with_source(&tmp_dir.path().join("input.txt"))
            .with_destination(&tmp_dir.path().join("output.txt"))
            .with_buffer_size(1)
            .build()
            .unwrap();
        let tmp_path = sorter.tmp_dir().to_path_buf();
        assert!(tmp_path.exists());

        sorter.sort(&CancellationToken::new()).unwrap();
        assert_eq!(read_lines(&tmp_dir.path().join("output.txt")), vec!["a", "b"]);

        drop(sorter);
        assert!(!tmp_path.exists());
    }

    #[rstest]
    fn test_interrupted_before_read(tmp_dir: tempfile::TempDir) {
        write_lines(&tmp_dir.path().join("input.txt"), &["b".to_string(), "a".to_string()]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = sorter(tmp_dir.path(), 100, SortAlgorithm::Heap).sort(&cancel).unwrap();

        assert_eq!(summary.outcome, Outcome::Interrupted);
        assert_eq!(summary.chunks, 0);
        assert_eq!(summary.lines_read, 0);
        assert!(!tmp_dir.path().join("output.txt").exists());
    }

    /// Source that cancels the token once `remaining` lines were consumed.
    struct CancelAfterLines {
        inner: Cursor<Vec<u8>>,
        remaining: usize,
        cancel: CancellationToken,
    }

    impl CancelAfterLines {
        fn new(lines: &[String], remaining: usize, cancel: &CancellationToken) -> Self {
            let content = lines.iter().map(|line| format!("{}\n", line)).collect::<String>();
            CancelAfterLines {
                inner: Cursor::new(content.into_bytes()),
                remaining,
                cancel: cancel.clone(),
            }
        }
    }

    impl Read for CancelAfterLines {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl BufRead for CancelAfterLines {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            self.inner.fill_buf()
        }

        fn consume(&mut self, amt: usize) {
            let start = self.inner.position() as usize;
            let newlines = self.inner.get_ref()[start..start + amt].iter().filter(|b| **b == b'\n').count();
            self.inner.consume(amt);

            if newlines > 0 && self.remaining > 0 {
                self.remaining = self.remaining.saturating_sub(newlines);
                if self.remaining == 0 {
                    self.cancel.cancel();
                }
            }
        }
    }

    #[rstest]
    #[case(7)]
    #[case(20)]
    fn test_interrupted_while_splitting(tmp_dir: tempfile::TempDir, #[case] cancel_after: usize) {
        let input = Vec::from_iter((0..20).rev().map(|idx| format!("line {:02}", idx)));
        let dest_path = tmp_dir.path().join("output.txt");
        fs::write(&dest_path, "previous\n").unwrap();

        let sorter = sorter(tmp_dir.path(), 20, SortAlgorithm::Heap);
        let cancel = CancellationToken::new();
        let source = CancelAfterLines::new(&input, cancel_after, &cancel);

        let summary = sorter.sort_lines(source, &cancel).unwrap();

        assert_eq!(summary.outcome, Outcome::Interrupted);
        assert_eq!(summary.lines_read, cancel_after as u64);
        assert_eq!(summary.lines_written, 0);
        assert!(summary.chunks > 1);

        // the second pass never ran
        assert_eq!(fs::read_to_string(&dest_path).unwrap(), "previous\n");

        // every line read is in a chunk file, and the chunk files stay
        let cache = tmp_dir.path().join("cache");
        assert_eq!(fs::read_dir(&cache).unwrap().count(), summary.chunks);
        let mut spilled = Vec::new();
        for idx in 0..summary.chunks {
            let lines = read_lines(&cache.join(format!("block_{}", idx)));
            assert!(lines.windows(2).all(|w| compare_lines(&w[0], &w[1]).is_le()));
            spilled.extend(lines);
        }
        spilled.sort();
        let mut expected = input[..cancel_after].to_vec();
        expected.sort();
        assert_eq!(spilled, expected);
    }

    #[rstest]
    fn test_missing_source(tmp_dir: tempfile::TempDir) {
        let err = sorter(tmp_dir.path(), 100, SortAlgorithm::Heap)
            .sort(&CancellationToken::new())
            .unwrap_err();

        assert!(matches!(err, SortError::Io { .. }));
        assert_eq!(err.exit_code(), crate::EXIT_IO_ERROR);
    }

    #[rstest]
    fn test_invalid_options(tmp_dir: tempfile::TempDir) {
        let result = ExternalSorterBuilder::new()
            .with_source(&tmp_dir.path().join("input.txt"))
            .with_destination(&tmp_dir.path().join("input.txt"))
            .build();

        assert!(matches!(result, Err(SortError::Config(_))));
    }
}
