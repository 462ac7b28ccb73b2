//! Disk image copier.
//!
//! Streams one disk image into the destination directory in fixed-size
//! chunks. Data is written to `<name>.partial` and renamed into place once
//! the copy is complete, so a failed copy never leaves a truncated image
//! under the final name.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::error::{BackupError, Result};

const MIB: u64 = 1024 * 1024;

/// Copies disk images into a destination directory.
#[derive(Debug, Clone)]
pub struct DiskCopier {
    chunk_size: usize,
    show_progress: bool,
}

impl DiskCopier {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            show_progress: true,
        }
    }

    /// Enable or disable the in-place progress line on stdout.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Destination path for `source` inside `dest_dir`.
    pub fn destination_for(source: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = source.file_name().ok_or_else(|| BackupError::Io {
            path: source.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
        Ok(dest_dir.join(file_name))
    }

    /// Copy `source` into `dest_dir`, replacing any earlier copy.
    ///
    /// Returns the number of bytes copied.
    #[instrument(skip_all, fields(source = %source.display()))]
    pub async fn copy(&self, source: &Path, dest_dir: &Path) -> Result<u64> {
        let dest = Self::destination_for(source, dest_dir)?;
        let partial = partial_path(&dest);

        fs::create_dir_all(dest_dir).await.map_err(BackupError::io(dest_dir))?;
        ensure_distinct(source, &dest).await?;

        match fs::remove_file(&dest).await {
            Ok(()) => debug!(dest = %dest.display(), "Removed previous backup"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BackupError::io(&dest)(e)),
        }

        let bytes = match self.copy_to(source, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial copy");
                }
                return Err(e);
            }
        };

        fs::rename(&partial, &dest).await.map_err(BackupError::io(&dest))?;

        info!(dest = %dest.display(), bytes, "Disk copied");
        Ok(bytes)
    }

    async fn copy_to(&self, source: &Path, partial: &Path) -> Result<u64> {
        let mut src = File::open(source).await.map_err(BackupError::io(source))?;
        let total = src.metadata().await.map_err(BackupError::io(source))?.len();
        let mut dst = File::create(partial).await.map_err(BackupError::io(partial))?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut progress = CopyProgress::new(total);

        loop {
            let n = src.read(&mut buf).await.map_err(BackupError::io(source))?;
            if n == 0 {
                break;
            }

            dst.write_all(&buf[..n]).await.map_err(BackupError::io(partial))?;
            progress.advance(n as u64);

            if self.show_progress {
                print_in_place(&progress.render());
            }
        }

        dst.flush().await.map_err(BackupError::io(partial))?;
        dst.sync_all().await.map_err(BackupError::io(partial))?;

        if self.show_progress {
            println!();
        }

        Ok(progress.transferred())
    }
}

/// Refuse to copy a file onto itself; removing the old backup would delete
/// the source.
async fn ensure_distinct(source: &Path, dest: &Path) -> Result<()> {
    let source_real = fs::canonicalize(source).await.map_err(BackupError::io(source))?;
    let dest_real = match fs::canonicalize(dest).await {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(BackupError::io(dest)(e)),
    };

    if source_real == dest_real {
        return Err(BackupError::Io {
            path: source.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "destination is the source disk itself",
            ),
        });
    }

    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

fn print_in_place(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\r{}", line);
    let _ = out.flush();
}

/// Throughput bookkeeping for one copy.
#[derive(Debug, Clone)]
pub struct CopyProgress {
    total_bytes: u64,
    transferred_bytes: u64,
    start_time: Instant,
}

impl CopyProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            start_time: Instant::now(),
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.transferred_bytes += bytes;
    }

    pub fn transferred(&self) -> u64 {
        self.transferred_bytes
    }

    /// Whole seconds since the copy started.
    pub fn elapsed_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn render(&self) -> String {
        render_line(self.transferred_bytes, self.total_bytes, self.elapsed_secs())
    }
}

fn average_rate(bytes: u64, secs: u64) -> Option<u64> {
    (secs > 0).then(|| bytes / secs)
}

fn render_line(transferred: u64, total: u64, secs: u64) -> String {
    let speed = average_rate(transferred, secs)
        .map(|bps| format!("{} MB/s", bps / MIB))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "\t ==> {} / {} MB ({} seconds running, overall speed: {})",
        transferred / MIB,
        total / MIB,
        secs,
        speed
    )
}
