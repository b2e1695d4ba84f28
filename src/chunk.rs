//! Sorted chunks spilled to the file system.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::IoContext;
use crate::{ByteBudget, Chunk, SortError};

/// Temporary chunk file name prefix, followed by the chunk index.
pub const TEMP_FILE_PREFIX: &str = "block_";

/// Temporary file holding exactly one fully written sorted chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpilledChunk {
    path: PathBuf,
    lines: usize,
}

impl SpilledChunk {
    /// Returns the path of the temporary file for the chunk with index `idx`.
    pub fn path_for(dir: &Path, idx: usize) -> PathBuf {
        dir.join(format!("{}{}", TEMP_FILE_PREFIX, idx))
    }

    /// Writes every line of the chunk to a new file followed by a newline,
    /// releasing each line's bytes from the budget once it is handed to the writer.
    ///
    /// # Arguments
    /// * `path` - Temporary file to be created
    /// * `chunk` - Sorted chunk to be dumped
    /// * `budget` - Byte budget the chunk lines were accounted in
    /// * `buf_size` - Chunk file write buffer size
    pub fn dump(path: PathBuf, chunk: Chunk, budget: &ByteBudget, buf_size: usize) -> Result<Self, SortError> {
        let file = fs::File::create(&path).context(|| format!("creating chunk file {}", path.display()))?;
        let mut chunk_writer = io::BufWriter::with_capacity(buf_size, file);

        let mut lines = 0;
        for line in chunk {
            chunk_writer
                .write_all(line.as_bytes())
                .and_then(|_| chunk_writer.write_all(b"\n"))
                .context(|| format!("writing chunk file {}", path.display()))?;

            budget.release(line.len() as u64);
            lines += 1;
        }

        chunk_writer
            .flush()
            .context(|| format!("flushing chunk file {}", path.display()))?;

        return Ok(SpilledChunk { path, lines });
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines in the chunk file.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Opens the chunk file for reading its lines back in sorted order.
    pub fn open(&self, buf_size: usize) -> Result<ChunkLines, SortError> {
        let file = fs::File::open(&self.path).context(|| format!("opening chunk file {}", self.path.display()))?;

        return Ok(ChunkLines {
            path: self.path.clone(),
            reader: io::BufReader::with_capacity(buf_size, file).lines(),
        });
    }

    /// Deletes the chunk file.
    pub fn remove(&self) -> Result<(), SortError> {
        fs::remove_file(&self.path).context(|| format!("removing chunk file {}", self.path.display()))
    }
}

/// Iterator over the lines of a chunk file.
pub struct ChunkLines {
    path: PathBuf,
    reader: io::Lines<io::BufReader<fs::File>>,
}

impl Iterator for ChunkLines {
    type Item = Result<String, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = &self.path;
        self.reader
            .next()
            .map(|line| line.context(|| format!("reading chunk file {}", path.display())))
    }
}
