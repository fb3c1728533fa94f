#![allow(unsafe_code)]
//! Byte regions a pipe can own.
//!
//! The default store is a heap allocation. A memory-mapped file can be used
//! instead so that an external viewer process can map the same bytes (typically a
//! file in `/dev/shm`). Either way the pipe owns the store exclusively; cursor state
//! is never written into it.

use anyhow::{anyhow, Context, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Backing bytes of a pipe.
#[derive(Debug)]
pub enum BackingStore {
    /// Heap allocation.
    Heap(Vec<u8>),
    /// Memory-mapped file.
    Mapped {
        /// Filesystem path of the mapped file.
        path: PathBuf,
        /// The mapping; exactly the pipe capacity long.
        mmap: MmapMut,
    },
}

impl BackingStore {
    /// Zeroed heap store of `len` bytes.
    pub fn heap(len: usize) -> Self {
        BackingStore::Heap(vec![0u8; len])
    }

    /// Map `len` bytes of the file at `path`, creating or resizing it as needed.
    pub fn mapped(path: &Path, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(anyhow!("Cannot map a zero-length pipe store at {:?}", path));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to create/open pipe store file: {:?}", path))?;

        let existing = file
            .metadata()
            .context("Failed to get file metadata")?
            .len();
        if existing != len as u64 {
            file.set_len(len as u64)
                .context("Failed to set pipe store file size")?;
        }

        // SAFETY: the file was just opened read/write and sized to `len`. The pipe is
        // the only writer inside this process; other processes only map it to read.
        let mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .map_mut(&file)
                .context("Failed to create memory mapping")?
        };
        debug_assert_eq!(mmap.len(), len, "mapping shorter than requested");

        Ok(BackingStore::Mapped {
            path: path.to_path_buf(),
            mmap,
        })
    }

    /// The stored bytes.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            BackingStore::Heap(v) => v.as_slice(),
            BackingStore::Mapped { mmap, .. } => &mmap[..],
        }
    }

    /// The stored bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            BackingStore::Heap(v) => v.as_mut_slice(),
            BackingStore::Mapped { mmap, .. } => &mut mmap[..],
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the store holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the mapped file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            BackingStore::Heap(_) => None,
            BackingStore::Mapped { path, .. } => Some(path),
        }
    }

    /// Flush a mapped store to its file. No-op for heap stores.
    pub fn flush(&self) -> Result<()> {
        match self {
            BackingStore::Heap(_) => Ok(()),
            BackingStore::Mapped { mmap, path } => mmap
                .flush()
                .with_context(|| format!("Failed to flush pipe store {:?}", path)),
        }
    }

    /// Write `data` at byte `offset`, wrapping to byte 0 at the end of the store.
    ///
    /// `data` must not be longer than the store.
    pub fn write_wrapped(&mut self, offset: usize, data: &[u8]) {
        let store = self.as_mut_slice();
        let capacity = store.len();
        debug_assert!(data.len() <= capacity);
        debug_assert!(offset < capacity || data.is_empty());

        if offset + data.len() > capacity {
            let first_part_len = capacity - offset;
            store[offset..].copy_from_slice(&data[..first_part_len]);
            store[..data.len() - first_part_len].copy_from_slice(&data[first_part_len..]);
        } else {
            store[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_wraps_at_end() {
        let mut store = BackingStore::heap(8);
        store.write_wrapped(6, &[1, 2, 3, 4]);
        assert_eq!(store.as_slice(), &[3, 4, 0, 0, 0, 0, 1, 2]);

        store.clear();
        assert!(store.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_exactly_to_end() {
        let mut store = BackingStore::heap(4);
        store.write_wrapped(2, &[9, 9]);
        assert_eq!(store.as_slice(), &[0, 0, 9, 9]);
    }

    #[test]
    fn test_mapped_store_persists_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pipe.buf");

        {
            let mut store = BackingStore::mapped(&path, 16).unwrap();
            store.write_wrapped(14, &[0xAA, 0xBB, 0xCC]);
            store.flush().unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0], 0xCC);
        assert_eq!(&bytes[14..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_zero_length_mapping_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(BackingStore::mapped(&temp_dir.path().join("empty.buf"), 0).is_err());
    }
}
