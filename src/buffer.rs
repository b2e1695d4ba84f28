//! In-memory chunk of lines limited by their total byte size.

use rayon;
use rayon::slice::ParallelSliceMut;

use crate::compare::compare_lines;
use crate::heap::heapsort_by;
use crate::SortAlgorithm;

/// Batch of lines accumulated by the reader until its byte size reaches the limit.
///
/// A chunk is owned by one pipeline stage at a time: the reader fills it, the sorter sorts it
/// and the spiller drains it to disk.
#[derive(Debug)]
pub struct Chunk {
    limit: u64,
    bytes: u64,
    lines: Vec<String>,
}

impl Chunk {
    pub fn new(limit: u64) -> Self {
        Chunk {
            limit,
            bytes: 0,
            lines: Vec::new(),
        }
    }

    /// Appends a line and returns its byte size (line terminator excluded).
    pub fn push(&mut self, line: String) -> u64 {
        let size = line.len() as u64;
        self.bytes += size;
        self.lines.push(line);
        size
    }

    /// Returns the number of lines in the chunk.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total byte size of the lines.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Checks if the chunk reached the limit.
    pub fn is_full(&self) -> bool {
        self.bytes >= self.limit
    }

    /// Sorts the lines in place with the line comparator.
    /// [`SortAlgorithm::Library`] runs on the provided thread pool.
    pub fn sort(&mut self, algorithm: SortAlgorithm, thread_pool: &rayon::ThreadPool) {
        match algorithm {
            SortAlgorithm::Library => thread_pool.install(|| {
                self.par_sort_unstable_by(|a, b| compare_lines(a, b));
            }),
            SortAlgorithm::Heap => heapsort_by(&mut self.lines, |a, b| compare_lines(a, b)),
        }
    }
}

impl IntoIterator for Chunk {
    type Item = String;
    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<String> for Chunk {
    fn as_parallel_slice_mut(&mut self) -> &mut [String] {
        self.lines.as_mut_slice()
    }
}
