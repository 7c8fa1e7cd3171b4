use bytemuck::Pod;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Append-only memory-mapped buffer with one writer and any number of
/// wait-free readers.
pub(crate) struct JournalMmap {
    _mmap: Arc<MmapMut>,
    ptr: *mut u8,
    len: usize,
    write_index: Arc<AtomicUsize>,
    read_only: bool,
}

impl JournalMmap {
    /// Creates a fresh buffer, truncating the backing file if one is given.
    pub(crate) fn new(path: Option<PathBuf>, total_size: usize) -> Result<Self, std::io::Error> {
        let mut mmap = if let Some(p) = &path {
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(p)?;

            file.set_len(total_size as u64)?;
            unsafe { MmapOptions::new().map_mut(&file)? }
        } else {
            MmapOptions::new().len(total_size).map_anon()?
        };

        let ptr = mmap.as_mut_ptr();
        let len = mmap.len();
        Ok(Self {
            _mmap: Arc::new(mmap),
            ptr,
            len,
            write_index: Arc::new(AtomicUsize::new(0)),
            read_only: false,
        })
    }

    #[inline(always)]
    pub(crate) fn read<T: Pod>(&self, offset: usize) -> &T {
        let size = size_of::<T>();
        assert!(
            offset + size <= self.len,
            "Read crosses buffer boundary - alignment issue?"
        );
        let slice = unsafe { std::slice::from_raw_parts(self.ptr.add(offset), size) };
        bytemuck::from_bytes(slice)
    }

    /// # Panics
    /// Panics if the buffer is full or this handle is a reader.
    #[inline(always)]
    pub(crate) fn append<T: Pod>(&mut self, state: &T) {
        assert!(!self.read_only, "Cannot mutate read-only buffer");
        let current_pos = self.write_index.load(Ordering::Relaxed);
        let size = size_of::<T>();
        let end = current_pos + size;

        assert!(end <= self.len, "Journal is full. Cannot append more data.");

        unsafe {
            let dest_ptr = self.ptr.add(current_pos);
            let src_ptr = bytemuck::bytes_of(state).as_ptr();
            std::ptr::copy_nonoverlapping(src_ptr, dest_ptr, size);
        }

        self.write_index.store(end, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn get_write_index(&self) -> usize {
        self.write_index.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn reader(&self) -> JournalMmap {
        JournalMmap {
            _mmap: self._mmap.clone(),
            ptr: self.ptr,
            len: self.len,
            write_index: self.write_index.clone(),
            read_only: true,
        }
    }
}

unsafe impl Send for JournalMmap {}
