use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

/// A read-write mapping of a file that stands in for a device memory region.
pub struct MmapFileMut {
    _file: File,
    mmap: MmapMut,
}

impl MmapFileMut {
    /// Create (or truncate) a file of `size_bytes` zero bytes and map it read-write
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Map `path` read-write, creating it when missing.
    ///
    /// Existing contents are kept so that a peripheral process which already
    /// created the file does not lose its state. A file shorter than
    /// `size_bytes` is extended with zeros.
    pub fn open_or_create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        if file.metadata()?.len() < size_bytes {
            file.set_len(size_bytes)?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Return raw pointer to start of memory mapped file data
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Flush outstanding writes back to the file.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}
