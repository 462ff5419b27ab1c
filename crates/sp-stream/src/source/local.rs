//! Segment source backed by a file on disk.

use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use sp_core::{ByteRange, Error, Result, Segment};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Reads a segment from a file on disk.
#[derive(Debug)]
pub struct LocalSource {
    file: File,
    segment: String,
    block_size: usize,
    /// Bytes left when the segment is restricted to a bounded range.
    remaining: Option<u64>,
}

impl LocalSource {
    pub async fn open(segment: &Segment, path: &Path, block_size: usize) -> Result<Self> {
        let name = segment.file_name.clone();
        if let Some(range) = segment.range.filter(ByteRange::is_inverted) {
            return Err(Error::source_read(
                &name,
                format!("range {} ends before it starts", range.to_header_value()),
            ));
        }
        let mut file = File::open(path)
            .await
            .map_err(|e| Error::source_read(&name, format!("{}: {e}", path.display())))?;

        let mut remaining = None;
        if let Some(range) = segment.range {
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| Error::source_read(&name, format!("seek to {}: {e}", range.start)))?;
            remaining = range.len();
        }

        tracing::debug!(segment = %name, path = %path.display(), "Opened local segment");

        Ok(Self {
            file,
            segment: name,
            block_size: block_size.max(1),
            remaining,
        })
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(left) => left.min(self.block_size as u64) as usize,
            None => self.block_size,
        };

        let mut buf = vec![0u8; want];
        let n = self
            .file
            .read(&mut buf)
            .await
            .map_err(|e| Error::source_read(&self.segment, e))?;

        if n == 0 {
            return match self.remaining {
                Some(left) => Err(Error::source_read(
                    &self.segment,
                    format!("file ended {left} bytes before the end of its range"),
                )),
                None => Ok(None),
            };
        }

        buf.truncate(n);
        if let Some(left) = self.remaining.as_mut() {
            *left -= n as u64;
        }
        Ok(Some(Bytes::from(buf)))
    }
}
