//! Sorter configuration.

use std::path::PathBuf;

use crate::SortError;

/// Share of the byte budget a chunk may grow to, in percent.
pub const CHUNK_PERCENTAGE: u64 = 90;
/// Share of the byte budget used for pass 1 read/write buffers, in percent.
pub const RW_BUFFER_PERCENTAGE: u64 = 5;
/// Smallest read/write buffer ever allocated, in bytes.
pub const MIN_RW_BUFFER_SIZE: usize = 512;
/// Default byte budget: 100 MB.
pub const DEFAULT_BUFFER_SIZE: u64 = 100 * 1000 * 1000;

/// In-memory chunk sorting algorithm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SortAlgorithm {
    /// Standard library unstable sort, parallelized over the sorter thread pool.
    Library,
    /// Single-threaded in-place heapsort.
    #[default]
    Heap,
}

/// External sort options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Memory budget in bytes for buffered lines and I/O buffers.
    pub buffer_size: u64,
    /// File to be sorted.
    pub source: PathBuf,
    /// File the sorted lines are written to.
    pub destination: PathBuf,
    /// Chunk sorting algorithm.
    pub algorithm: SortAlgorithm,
    /// Keep temporary chunk files after the sort.
    pub keep_temps: bool,
    /// Directory for temporary chunk files. A fresh directory inside the OS temporary directory
    /// is used if [`None`].
    pub tmp_dir: Option<PathBuf>,
    /// Number of threads sorting a chunk with [`SortAlgorithm::Library`].
    /// Selected by the CPU core number if [`None`].
    pub threads: Option<usize>,
    /// Pass 1 read/write buffer size. Derived from `buffer_size` if [`None`].
    pub rw_buf_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            buffer_size: DEFAULT_BUFFER_SIZE,
            source: PathBuf::new(),
            destination: PathBuf::new(),
            algorithm: SortAlgorithm::default(),
            keep_temps: false,
            tmp_dir: None,
            threads: None,
            rw_buf_size: None,
        }
    }
}

impl Options {
    /// Checks the options for consistency.
    pub fn validate(&self) -> Result<(), SortError> {
        if self.buffer_size == 0 {
            return Err(SortError::Config("buffer size must be positive".into()));
        }
        if self.threads == Some(0) {
            return Err(SortError::Config("threads number must be positive".into()));
        }
        if self.rw_buf_size == Some(0) {
            return Err(SortError::Config("read/write buffer size must be positive".into()));
        }
        if self.source.as_os_str().is_empty() || self.destination.as_os_str().is_empty() {
            return Err(SortError::Config("source and destination paths are required".into()));
        }
        if self.source == self.destination {
            return Err(SortError::Config(format!(
                "source and destination are the same file: {}",
                self.source.display()
            )));
        }

        return Ok(());
    }

    /// Byte count at which a chunk is handed off and the reader is held back.
    pub fn chunk_threshold(&self) -> u64 {
        (self.buffer_size.saturating_mul(CHUNK_PERCENTAGE) / 100).max(1)
    }

    /// Pass 1 read/write buffer size.
    pub fn rw_buffer_size(&self) -> usize {
        self.rw_buf_size
            .unwrap_or_else(|| clamp_buffer(self.buffer_size.saturating_mul(RW_BUFFER_PERCENTAGE) / 100))
    }

    /// Pass 2 per-stream buffer size: the budget shared by every chunk reader and the writer.
    pub fn merge_buffer_size(&self, chunks: usize) -> usize {
        clamp_buffer(self.buffer_size / (chunks as u64 + 1))
    }
}

fn clamp_buffer(size: u64) -> usize {
    usize::try_from(size).unwrap_or(usize::MAX).max(MIN_RW_BUFFER_SIZE)
}
