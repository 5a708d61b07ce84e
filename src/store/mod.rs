//! Mapped store: owns the single memory-mapped file backing a genome
//! collection. Provides offset-based pointer resolution, bump allocation,
//! root-object registration and the clean/dirty lifecycle.

pub mod header;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use crate::error::{Result, StoreError};
use header::{align_round, StoreHeader, HEADER_SIZE, WORD_SIZE};

// ── Prefetch hook ──────────────────────────────────────────────────

/// A hook invoked before a byte range is dereferenced. The default is a
/// no-op; a remote-backed transport overrides `fetch` to ensure the range
/// is resident before `to_ptr` returns.
pub trait PrefetchHook: Send + Sync {
    fn fetch(&self, offset: u64, len: usize);
}

/// Default hook for purely local files: nothing to do, the OS serves page
/// faults synchronously.
#[derive(Debug, Default)]
pub struct NoopPrefetch;

impl PrefetchHook for NoopPrefetch {
    fn fetch(&self, _offset: u64, _len: usize) {}
}

/// Prefetch hook backed by `posix_fadvise(WILLNEED)`. Advisory only: a
/// failure to advise is not an error, it just means the next fault is
/// synchronous like it would have been anyway.
#[derive(Debug)]
pub struct FadvisePrefetch {
    fd: std::os::unix::io::RawFd,
}

impl FadvisePrefetch {
    pub fn new(file: &File) -> Self {
        use std::os::unix::io::AsRawFd;
        Self { fd: file.as_raw_fd() }
    }
}

impl PrefetchHook for FadvisePrefetch {
    fn fetch(&self, offset: u64, len: usize) {
        unsafe {
            libc::posix_fadvise(
                self.fd,
                offset as libc::off_t,
                len as libc::off_t,
                libc::POSIX_FADV_WILLNEED,
            );
        }
    }
}

// ── OpenMode ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

enum Mapping {
    Ro(Mmap),
    Rw(MmapMut),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Mapping::Ro(m) => &m[..],
            Mapping::Rw(m) => &m[..],
        }
    }
}

// ── MappedStore ────────────────────────────────────────────────────

/// Scoped owner of a single memory-mapped file. Single-writer: while a
/// write handle is open the dirty bit on disk prevents any other handle
/// (read or write) from opening the same file.
pub struct MappedStore {
    path: PathBuf,
    file: File,
    mapping: Mapping,
    mode: OpenMode,
    preload: bool,
    prefetch: Box<dyn PrefetchHook>,
}

impl MappedStore {
    /// Open or create the store at `path`.
    ///
    /// `file_size` is only consulted when creating a new write-mode file.
    /// `preload`, when true, forces the prefetch hook on every
    /// [`MappedStore::to_ptr`] resolution regardless of the `must_fetch`
    /// argument — intended for mappings backed by a remote transport.
    pub fn open(path: &Path, mode: OpenMode, file_size: u64, preload: bool) -> Result<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .create(mode == OpenMode::ReadWrite && !exists)
            .truncate(false)
            .open(path)?;

        if mode == OpenMode::ReadWrite && !exists {
            file.set_len(file_size)?;
            let mut mmap = unsafe { MmapMut::map_mut(&file)? };
            let header = StoreHeader::fresh();
            mmap[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
            mmap.flush()?;

            let prefetch: Box<dyn PrefetchHook> = Box::new(NoopPrefetch);
            return Ok(Self {
                path: path.to_path_buf(),
                file,
                mapping: Mapping::Rw(mmap),
                mode,
                preload,
                prefetch,
            });
        }

        // Existing file: validate header before mapping mutably.
        let existing = unsafe { Mmap::map(&file)? };
        let header = StoreHeader::from_bytes(&existing[..])?;
        if header.dirty {
            return Err(StoreError::DirtyOnOpen);
        }

        let prefetch: Box<dyn PrefetchHook> = Box::new(NoopPrefetch);

        match mode {
            OpenMode::ReadOnly => Ok(Self {
                path: path.to_path_buf(),
                file,
                mapping: Mapping::Ro(existing),
                mode,
                preload,
                prefetch,
            }),
            OpenMode::ReadWrite => {
                drop(existing);
                let mut mmap = unsafe { MmapMut::map_mut(&file)? };
                let mut header = StoreHeader::from_bytes(&mmap[..])?;
                header.dirty = true;
                mmap[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
                mmap.flush()?;
                Ok(Self {
                    path: path.to_path_buf(),
                    file,
                    mapping: Mapping::Rw(mmap),
                    mode,
                    preload,
                    prefetch,
                })
            }
        }
    }

    /// Replace the prefetch hook (e.g. with [`FadvisePrefetch`]).
    pub fn set_prefetch_hook(&mut self, hook: Box<dyn PrefetchHook>) {
        self.prefetch = hook;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> StoreHeader {
        StoreHeader::from_bytes(self.mapping.as_slice())
            .expect("header was validated at open and never overwritten with garbage")
    }

    pub fn next_offset(&self) -> u64 {
        self.header().next_offset
    }

    /// Registered root offset. Asserted non-zero: callers must not ask for
    /// the root before one has been allocated with `is_root = true`.
    pub fn root_offset(&self) -> Result<u64> {
        let offset = self.header().root_offset;
        if offset == header::NULL_OFFSET {
            return Err(StoreError::NoRoot);
        }
        Ok(offset)
    }

    /// Resolve `offset` to a byte slice of `access_size` bytes.
    ///
    /// `offset` must be less than `next_offset()` — violating this is a
    /// programming error and only checked in debug builds. When
    /// `must_fetch` is set (or the store was opened with `preload`), the
    /// prefetch hook runs first.
    pub fn to_ptr(&self, offset: u64, access_size: usize, must_fetch: bool) -> &[u8] {
        debug_assert!(
            offset < self.next_offset(),
            "offset {offset} out of bounds (next_offset = {})",
            self.next_offset()
        );
        if must_fetch || self.preload {
            self.prefetch.fetch(offset, access_size);
        }
        let start = offset as usize;
        &self.mapping.as_slice()[start..start + access_size]
    }

    /// Mutable counterpart of [`MappedStore::to_ptr`]. Write-mode only.
    pub fn to_ptr_mut(&mut self, offset: u64, access_size: usize) -> Result<&mut [u8]> {
        let next = self.next_offset();
        debug_assert!(offset < next, "offset {offset} out of bounds (next_offset = {next})");
        match &mut self.mapping {
            Mapping::Rw(m) => {
                let start = offset as usize;
                Ok(&mut m[start..start + access_size])
            }
            Mapping::Ro(_) => Err(StoreError::ReadOnly),
        }
    }

    /// Bump-allocate `size` bytes, returning the pre-advance offset.
    /// Fails with [`StoreError::CapacityExceeded`] without mutating state
    /// if the file is too small to hold the (aligned) request.
    pub fn alloc(&mut self, size: u64, is_root: bool) -> Result<u64> {
        let file_size = self.file.metadata()?.len();
        let mut header = self.header();
        let aligned = align_round(size);

        if header.next_offset + aligned > file_size {
            return Err(StoreError::CapacityExceeded {
                next_offset: header.next_offset,
                requested: size,
                file_size,
            });
        }

        let offset = header.next_offset;
        header.next_offset += aligned;
        if is_root {
            header.root_offset = offset;
        }

        match &mut self.mapping {
            Mapping::Rw(m) => m[..HEADER_SIZE].copy_from_slice(&header.to_bytes()),
            Mapping::Ro(_) => return Err(StoreError::ReadOnly),
        }

        Ok(offset)
    }

    /// Clear the dirty flag and flush. Write-mode only. Callers must call
    /// this on the happy path only — on any error they should simply drop
    /// the store, leaving the dirty bit set on disk so the next open is
    /// rejected.
    pub fn close(mut self) -> Result<()> {
        let mut header = self.header();
        header.dirty = false;
        match &mut self.mapping {
            Mapping::Rw(m) => {
                m[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
                m.flush()?;
            }
            Mapping::Ro(_) => return Err(StoreError::ReadOnly),
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use header::WORD_SIZE as WS;
    use tempfile::tempdir;

    #[test]
    fn test_create_then_alloc_then_close_then_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");

        let mut store = MappedStore::open(&path, OpenMode::ReadWrite, 4096, false).unwrap();
        let a = store.alloc(40, false).unwrap();
        let b = store.alloc(10, true).unwrap();
        assert!(b > a);
        assert_eq!(a % WS, 0);
        assert_eq!(b % WS, 0);
        store.close().unwrap();

        let reopened = MappedStore::open(&path, OpenMode::ReadOnly, 0, false).unwrap();
        assert_eq!(reopened.root_offset().unwrap(), b);
    }

    #[test]
    fn test_allocations_strictly_increasing_and_aligned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = MappedStore::open(&path, OpenMode::ReadWrite, 4096, false).unwrap();

        let mut offsets = Vec::new();
        for n in [1u64, 7, 8, 15, 100] {
            offsets.push(store.alloc(n, false).unwrap());
        }
        for w in offsets.windows(2) {
            assert!(w[1] > w[0]);
        }
        for o in offsets {
            assert_eq!(o % WS, 0);
        }
    }

    #[test]
    fn test_capacity_exceeded_leaves_previous_allocations_intact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = MappedStore::open(&path, OpenMode::ReadWrite, 4096, false).unwrap();

        let first = store.alloc(64, false).unwrap();
        let remaining = 4096 - store.next_offset();
        let err = store.alloc(remaining + 1, false).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { .. }));

        // Previous allocation is untouched and the file is never closed, so
        // the dirty bit stays set.
        assert_eq!(store.to_ptr(first, 8, false).len(), 8);
        drop(store);

        let err = MappedStore::open(&path, OpenMode::ReadWrite, 0, false).unwrap_err();
        assert!(matches!(err, StoreError::DirtyOnOpen));
    }

    #[test]
    fn test_dirty_on_open_after_crash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");

        let store = MappedStore::open(&path, OpenMode::ReadWrite, 4096, false).unwrap();
        // Simulate a crash: drop without calling close().
        drop(store);

        let err = MappedStore::open(&path, OpenMode::ReadOnly, 0, false).unwrap_err();
        assert!(matches!(err, StoreError::DirtyOnOpen));
    }

    #[test]
    fn test_root_offset_before_registration_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let store = MappedStore::open(&path, OpenMode::ReadWrite, 4096, false).unwrap();
        assert!(matches!(store.root_offset(), Err(StoreError::NoRoot)));
    }

    #[test]
    fn test_read_only_handle_cannot_alloc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = MappedStore::open(&path, OpenMode::ReadWrite, 4096, false).unwrap();
        store.alloc(8, true).unwrap();
        store.close().unwrap();

        let mut ro = MappedStore::open(&path, OpenMode::ReadOnly, 0, false).unwrap();
        assert!(matches!(ro.alloc(8, false), Err(StoreError::ReadOnly)));
    }

    #[test]
    fn test_version_mismatch_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        {
            let store = MappedStore::open(&path, OpenMode::ReadWrite, 4096, false).unwrap();
            store.close().unwrap();
        }

        // Corrupt the API version's major component in place.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[header::TAG_FIELD_SIZE] = b'9';
        std::fs::write(&path, bytes).unwrap();

        let err = MappedStore::open(&path, OpenMode::ReadOnly, 0, false).unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
    }
}
