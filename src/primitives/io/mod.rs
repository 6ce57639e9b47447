#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use parking_lot::Mutex;

use crate::types::{Result, StoreError};

/// Positioned reads and writes on a store file.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from offset `off`; reading past the end is an error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at offset `off`, growing the file as needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true for a zero-length file.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// [`FileIo`] over an operating system file.
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    /// Opens `path` for reading and writing, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, dst: &mut [u8], off: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, dst, off)
}

#[cfg(unix)]
fn write_all_at(file: &File, src: &[u8], off: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, src, off)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut dst: &mut [u8], mut off: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !dst.is_empty() {
        match file.seek_read(dst, off)? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => {
                dst = &mut dst[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut src: &[u8], mut off: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !src.is_empty() {
        match file.seek_write(src, off)? {
            0 => return Err(io::ErrorKind::WriteZero.into()),
            n => {
                src = &src[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        read_exact_at(&self.file, dst, off).map_err(StoreError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        write_all_at(&self.file, src, off).map_err(StoreError::from)
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// [`FileIo`] over a growable in-memory buffer.
#[derive(Default)]
pub struct MemFileIo {
    bytes: Mutex<Vec<u8>>,
}

impl MemFileIo {
    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

fn offset(off: u64) -> Result<usize> {
    usize::try_from(off).map_err(|_| StoreError::Invalid("offset exceeds address space"))
}

impl FileIo for MemFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let start = offset(off)?;
        let bytes = self.bytes.lock();
        let src = bytes
            .get(start..start + dst.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let start = offset(off)?;
        let mut bytes = self.bytes.lock();
        let end = start + src.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }
}
