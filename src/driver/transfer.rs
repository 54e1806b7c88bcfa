//! Chunked streaming transfer
//!
//! Uploads and downloads move file bodies in fixed-size blocks so that no
//! whole file is ever held in memory. Upload bodies report their total size
//! up front, letting the transport send a Content-Length header instead of
//! chunked transfer encoding, which the repository service rejects.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use bytes::Bytes;

/// Iterator that yields fixed-size blocks from any reader.
pub struct ChunkedReader<R: Read> {
    reader: R,
    chunk_size: usize,
    finished: bool,
}

impl<R: Read> ChunkedReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size,
            finished: false,
        }
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut buffer = vec![0u8; self.chunk_size];
        match self.reader.read(&mut buffer) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(n) => {
                buffer.truncate(n);
                Some(Ok(Bytes::from(buffer)))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// A file read lazily in fixed-size blocks, with the total size known up
/// front from filesystem metadata.
///
/// Used as the streaming upload body: `Read` hands the transport at most one
/// block per call, and [`total_len`](Self::total_len) feeds the
/// Content-Length. Iterating yields the same blocks as `Bytes`.
pub struct FileChunks {
    file: File,
    chunk_size: usize,
    total: u64,
    finished: bool,
}

impl FileChunks {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        Ok(Self {
            file,
            chunk_size,
            total,
            finished: false,
        })
    }

    /// Total file size in bytes, known before any block is read.
    pub fn total_len(&self) -> u64 {
        self.total
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Read for FileChunks {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let cap = buf.len().min(self.chunk_size);
        self.file.read(&mut buf[..cap])
    }
}

impl Iterator for FileChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut buffer = vec![0u8; self.chunk_size];
        match self.file.read(&mut buffer) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(n) => {
                buffer.truncate(n);
                Some(Ok(Bytes::from(buffer)))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Write a stream of blocks to `out`, skipping zero-length keep-alive
/// chunks. Returns the number of bytes written.
pub(crate) fn drain<W: Write>(
    chunks: impl Iterator<Item = io::Result<Bytes>>,
    out: &mut W,
) -> io::Result<u64> {
    let mut written = 0u64;
    for chunk in chunks {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        out.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    out.flush()?;
    Ok(written)
}
