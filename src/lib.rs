//! `ext-line-sort` is an external sort for line-oriented text files.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM, during the second pass it merges the sorted chunks
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   line bytes held in memory are accounted in a shared byte budget; the reader is held back while the budget
//!   is exhausted and resumes as sorted chunks are written out.
//! * **Pipelined:**
//!   reading, sorting and spilling (and, in the second pass, reading back, merging and writing) run on their own
//!   threads connected by bounded channels.
//! * **Case-insensitive order:**
//!   lines are ordered by their lower-cased code points, see [`compare_lines`].
//! * **Two chunk sort algorithms:**
//!   parallel standard library sort or in-place heapsort.
//! * **Cancellable:**
//!   a [`CancellationToken`] stops the run at the next line.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_line_sort::{CancellationToken, ExternalSorterBuilder, Outcome, SortAlgorithm};
//!
//! let sorter = ExternalSorterBuilder::new()
//!     .with_source(Path::new("input.txt"))
//!     .with_destination(Path::new("output.txt"))
//!     .with_buffer_size(50_000_000)
//!     .with_algorithm(SortAlgorithm::Library)
//!     .build()
//!     .unwrap();
//!
//! let summary = sorter.sort(&CancellationToken::new()).unwrap();
//! assert_eq!(summary.outcome, Outcome::Completed);
//! ```

pub mod budget;
pub mod buffer;
pub mod cancel;
pub mod chunk;
pub mod compare;
pub mod error;
pub mod heap;
pub mod merger;
pub mod options;
pub mod pipeline;
pub mod sort;

pub use budget::ByteBudget;
pub use buffer::Chunk;
pub use cancel::CancellationToken;
pub use chunk::SpilledChunk;
pub use compare::compare_lines;
pub use error::{SortError, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_IO_ERROR, EXIT_OK, EXIT_PARSE_ERROR};
pub use merger::BinaryHeapMerger;
pub use options::{Options, SortAlgorithm};
pub use sort::{ExternalSorter, ExternalSorterBuilder, Outcome, SortSummary, Timings};
