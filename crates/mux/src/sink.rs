//! Byte sinks: where muxed bytes go.
//!
//! The muxer only ever appends, and later overwrites fixed-width reserved
//! fields it wrote itself. [`ByteSink`] captures exactly that contract so the
//! engine runs unchanged against an in-memory buffer or a seekable stream.

use std::io::{Seek, SeekFrom, Write};

use tracing::trace;

use crate::error::{MuxError, MuxResult};

/// Default size of the in-memory tail kept by [`StreamSink`] (64 KiB).
pub const DEFAULT_STREAM_WINDOW: usize = 64 * 1024;

/// Append/patch destination for muxed bytes.
pub trait ByteSink {
    /// What `close` hands back to the caller.
    type Output;

    /// Commit bytes at the current position and advance it.
    fn append(&mut self, bytes: &[u8]) -> MuxResult<()>;

    /// Overwrite already-committed bytes. The current position does not move.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> MuxResult<()>;

    /// Number of bytes committed so far.
    fn position(&self) -> u64;

    /// Flush everything and release the destination.
    fn close(self) -> MuxResult<Self::Output>
    where
        Self: Sized;
}

fn check_patch_range(offset: u64, len: usize, position: u64) -> MuxResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= position => Ok(()),
        _ => Err(MuxError::InvalidPatch {
            offset,
            len,
            position,
        }),
    }
}

/// Growable in-memory buffer. `close` yields the finished file.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    buf: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl ByteSink for MemorySink {
    type Output = Vec<u8>;

    fn append(&mut self, bytes: &[u8]) -> MuxResult<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> MuxResult<()> {
        check_patch_range(offset, bytes.len(), self.position())?;
        let start = offset as usize;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    fn close(self) -> MuxResult<Vec<u8>> {
        Ok(self.buf)
    }
}

/// Sink over any seekable writer (typically a `File`).
///
/// The most recent bytes are held in a small window so that patching the
/// currently open cluster never touches the destination. Patches older than
/// the window seek the writer, overwrite, and seek back.
///
/// Offsets are relative to the writer's position when the sink was created.
#[derive(Debug)]
pub struct StreamSink<W: Write + Seek> {
    writer: W,
    /// Writer position that corresponds to sink offset 0.
    origin: u64,
    /// Unflushed tail of the output.
    window: Vec<u8>,
    /// Sink offset of `window[0]`; everything before it is in `writer`.
    window_start: u64,
    window_capacity: usize,
}

impl<W: Write + Seek> StreamSink<W> {
    pub fn new(writer: W) -> MuxResult<Self> {
        Self::with_window(writer, DEFAULT_STREAM_WINDOW)
    }

    /// Create a sink that keeps at most `window_capacity` unflushed bytes.
    pub fn with_window(mut writer: W, window_capacity: usize) -> MuxResult<Self> {
        let origin = writer.stream_position()?;
        Ok(Self {
            writer,
            origin,
            window: Vec::with_capacity(window_capacity.min(DEFAULT_STREAM_WINDOW)),
            window_start: 0,
            window_capacity: window_capacity.max(1),
        })
    }

    /// Bytes already handed to the writer.
    pub fn flushed(&self) -> u64 {
        self.window_start
    }

    fn flush_window(&mut self) -> MuxResult<()> {
        if self.window.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.window)?;
        self.window_start += self.window.len() as u64;
        self.window.clear();
        Ok(())
    }

    /// Overwrite bytes that already left the window.
    fn patch_flushed(&mut self, offset: u64, bytes: &[u8]) -> MuxResult<()> {
        trace!(offset, len = bytes.len(), "Seek-patching flushed bytes");
        self.writer.seek(SeekFrom::Start(self.origin + offset))?;
        self.writer.write_all(bytes)?;
        self.writer
            .seek(SeekFrom::Start(self.origin + self.window_start))?;
        Ok(())
    }
}

impl<W: Write + Seek> ByteSink for StreamSink<W> {
    type Output = W;

    fn append(&mut self, bytes: &[u8]) -> MuxResult<()> {
        self.window.extend_from_slice(bytes);
        if self.window.len() >= self.window_capacity {
            self.flush_window()?;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> MuxResult<()> {
        check_patch_range(offset, bytes.len(), self.position())?;

        // Split at the window boundary: head goes to the writer, tail stays in memory.
        let head_len = self.window_start.saturating_sub(offset).min(bytes.len() as u64) as usize;
        let (head, tail) = bytes.split_at(head_len);

        if !head.is_empty() {
            self.patch_flushed(offset, head)?;
        }
        if !tail.is_empty() {
            let start = (offset + head_len as u64 - self.window_start) as usize;
            self.window[start..start + tail.len()].copy_from_slice(tail);
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }

    fn close(mut self) -> MuxResult<W> {
        self.flush_window()?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}
