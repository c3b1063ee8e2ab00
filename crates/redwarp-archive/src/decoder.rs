//! Chunked text decoding of line-delimited dump streams.
//!
//! Reads fixed-size chunks, decodes UTF-8, and yields complete lines. A
//! multi-byte sequence split by a chunk boundary is carried into the next
//! read. Bytes that cannot be decoded keep accumulating until the window is
//! exhausted, which is reported as stream corruption.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};

/// zstd window log accepted when decompressing dumps (2GB windows).
pub const ZSTD_WINDOW_LOG_MAX: u32 = 31;

/// Chunk and window sizes for [`ChunkedLineReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Bytes requested per read (default 2MB).
    pub chunk_size: usize,
    /// Maximum undecodable bytes accumulated before failing (default 1GB).
    pub max_window: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1 << 21,
            max_window: 1 << 30,
        }
    }
}

/// A decoded line and the number of stream bytes consumed when it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    /// Line text without its separator.
    pub text: String,
    /// Cumulative bytes read from the underlying stream.
    pub offset: u64,
}

/// Lazily decodes a byte stream into lines.
pub struct ChunkedLineReader<R> {
    reader: R,
    config: DecoderConfig,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    carry: String,
    ready: VecDeque<DecodedLine>,
    offset: u64,
    undecoded_run: usize,
    finished: bool,
}

impl<R: Read> ChunkedLineReader<R> {
    /// Wraps `reader` with the given chunking.
    pub fn new(reader: R, config: DecoderConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            reader,
            config,
            chunk: vec![0u8; chunk_size],
            pending: Vec::new(),
            carry: String::new(),
            ready: VecDeque::new(),
            offset: 0,
            undecoded_run: 0,
            finished: false,
        }
    }

    /// Bytes consumed from the underlying reader so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_chunk(&mut self) -> ArchiveResult<usize> {
        loop {
            match self.reader.read(&mut self.chunk) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::Decompression(e.to_string())),
            }
        }
    }

    fn fill(&mut self) -> ArchiveResult<()> {
        let n = self.read_chunk()?;
        if n == 0 {
            self.finished = true;
            if !self.pending.is_empty() {
                let bad = std::str::from_utf8(&self.pending)
                    .err()
                    .map(|e| e.valid_up_to())
                    .unwrap_or(0);
                return Err(ArchiveError::InvalidUtf8 {
                    offset: self.offset - (self.pending.len() - bad) as u64,
                });
            }
            // dumps need not end with a separator
            if !self.carry.is_empty() {
                let text = std::mem::take(&mut self.carry);
                self.ready.push_back(DecodedLine {
                    text,
                    offset: self.offset,
                });
            }
            return Ok(());
        }

        self.offset += n as u64;
        self.pending.extend_from_slice(&self.chunk[..n]);
        self.undecoded_run += n;

        let valid_len = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // incomplete sequence at the tail: decode the prefix, carry the rest
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                if self.undecoded_run > self.config.max_window {
                    return Err(ArchiveError::DecodeWindowExceeded {
                        bytes: self.undecoded_run,
                        max_window: self.config.max_window,
                    });
                }
                debug!(
                    bytes = self.undecoded_run,
                    "decoding error, reading another chunk"
                );
                return Ok(());
            }
        };

        let tail = self.pending.split_off(valid_len);
        let head = std::mem::replace(&mut self.pending, tail);
        let text = String::from_utf8(head).map_err(|_| ArchiveError::InvalidUtf8 {
            offset: self.offset,
        })?;
        self.undecoded_run = self.pending.len();

        self.carry.push_str(&text);
        if let Some(last_sep) = self.carry.rfind('\n') {
            let rest = self.carry.split_off(last_sep + 1);
            let complete = std::mem::replace(&mut self.carry, rest);
            let offset = self.offset;
            self.ready.extend(
                complete[..last_sep]
                    .split('\n')
                    .map(|line| DecodedLine {
                        text: line.to_string(),
                        offset,
                    }),
            );
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ChunkedLineReader<R> {
    type Item = ArchiveResult<DecodedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(Ok(line));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fill() {
                self.finished = true;
                self.ready.clear();
                return Some(Err(e));
            }
        }
    }
}

/// Opens a zstd-compressed dump file for line decoding.
pub fn open_zstd(
    path: &Path,
    config: DecoderConfig,
) -> ArchiveResult<ChunkedLineReader<zstd::stream::read::Decoder<'static, BufReader<File>>>> {
    zstd_lines(File::open(path)?, config)
}

/// Line decoder over an already opened zstd-compressed dump.
pub fn zstd_lines(
    file: File,
    config: DecoderConfig,
) -> ArchiveResult<ChunkedLineReader<zstd::stream::read::Decoder<'static, BufReader<File>>>> {
    let mut decoder = zstd::stream::read::Decoder::new(file)
        .map_err(|e| ArchiveError::Decompression(e.to_string()))?;
    decoder
        .window_log_max(ZSTD_WINDOW_LOG_MAX)
        .map_err(|e| ArchiveError::Decompression(e.to_string()))?;
    Ok(ChunkedLineReader::new(decoder, config))
}
