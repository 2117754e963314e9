use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::format::{PcmFormat, BYTES_PER_SAMPLE};

/// Raw PCM backing store
///
/// A headerless file of interleaved signed 16-bit little-endian samples. The
/// format is not embedded; it comes from the session configuration.
#[derive(Debug, Clone)]
pub struct BackingStore {
    path: PathBuf,
    format: PcmFormat,
}

impl BackingStore {
    pub fn new(path: impl Into<PathBuf>, format: PcmFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Store size in bytes, zero when the file does not exist
    pub fn byte_len(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Whole frames held by the store
    pub fn frame_count(&self) -> u64 {
        self.format.frames_in_bytes(self.byte_len())
    }

    /// Truncate the store and open it for appending.
    ///
    /// Prior contents are discarded.
    pub fn create(&self) -> Result<StoreWriter> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create store directory: {:?}", parent))?;
            }
        }

        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create backing store: {:?}", self.path))?;

        info!("Backing store created: {}", self.path.display());

        Ok(StoreWriter {
            writer: Some(BufWriter::new(file)),
            scratch: Vec::new(),
            bytes_written: 0,
        })
    }

    /// Open the store for a single sequential pass over its whole frames
    pub fn open_reader(&self) -> Result<StoreReader> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open backing store: {:?}", self.path))?;
        let len = file
            .metadata()
            .context("Failed to stat backing store")?
            .len();

        let frame_bytes = self.format.frame_bytes() as u64;
        let whole = len - len % frame_bytes;
        if whole != len {
            warn!(
                "Backing store has {} trailing bytes outside a whole frame, ignoring them",
                len - whole
            );
        }

        Ok(StoreReader {
            reader: BufReader::new(file),
            scratch: Vec::new(),
            remaining: whole,
        })
    }
}

/// Append-only writer over a freshly created store
pub struct StoreWriter {
    writer: Option<BufWriter<File>>,
    scratch: Vec<u8>,
    bytes_written: u64,
}

impl StoreWriter {
    pub fn append(&mut self, samples: &[i16]) -> Result<()> {
        let Some(writer) = &mut self.writer else {
            anyhow::bail!("append to a finished backing store");
        };

        self.scratch.clear();
        self.scratch.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
        writer
            .write_all(&self.scratch)
            .context("Failed to append samples to backing store")?;

        self.bytes_written += self.scratch.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush everything to disk and return the total bytes written
    pub fn finish(mut self) -> Result<u64> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| e.into_error())
                .context("Failed to flush backing store")?;
            file.sync_data().context("Failed to sync backing store")?;
        }

        Ok(self.bytes_written)
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush backing store on drop: {}", e);
            }
        }
    }
}

/// Sequential reader over the whole frames of a store
pub struct StoreReader {
    reader: BufReader<File>,
    scratch: Vec<u8>,
    /// Whole-frame bytes not yet read
    remaining: u64,
}

impl StoreReader {
    /// Fill `buf` with the next samples; `Ok(0)` at end of store
    pub fn read_frames(&mut self, buf: &mut [i16]) -> Result<usize> {
        let want = (buf.len() * BYTES_PER_SAMPLE) as u64;
        let take = want.min(self.remaining) as usize;
        if take == 0 {
            return Ok(0);
        }

        self.scratch.resize(take, 0);
        self.reader
            .read_exact(&mut self.scratch)
            .context("Failed to read samples from backing store")?;

        let samples = take / BYTES_PER_SAMPLE;
        for (dst, bytes) in buf.iter_mut().zip(self.scratch.chunks_exact(BYTES_PER_SAMPLE)) {
            *dst = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        self.remaining -= take as u64;
        Ok(samples)
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.remaining
    }
}
