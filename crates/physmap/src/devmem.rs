//! [`PhysicalMemoryMapper`] backed by `mmap(2)` of a physical memory device.
//!
//! The device defaults to `/dev/mem`. Restricted devices such as `/dev/gpiomem`, or any file
//! whose offsets correspond to physical addresses, can be selected through [`DevMemConfig`].
//!
//! Requests are widened to page granularity for `mmap` and narrowed back, so `base` does not
//! need to be page-aligned.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::ptr::NonNull;

use crate::mapper::{MapperError, MapperErrorCode, MapperResult, PhysicalMemoryMapper, Width};

pub const DEFAULT_DEVICE: &str = "/dev/mem";

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Where and how [`DevMem`] maps physical memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevMemConfig {
    /// Device node (or file) whose offsets are physical addresses.
    pub path: PathBuf,
    /// Open the device with `O_SYNC` so accesses bypass the page cache.
    pub sync: bool,
}

impl Default for DevMemConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DEVICE),
            sync: true,
        }
    }
}

impl DevMemConfig {
    /// Builds a config from `PHYSMAP_DEVICE` and `PHYSMAP_SYNC`, falling back to the defaults for
    /// unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(path) = std::env::var_os("PHYSMAP_DEVICE") {
            if path.is_empty() {
                return Err(ConfigError::InvalidEnv("PHYSMAP_DEVICE"));
            }
            cfg.path = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("PHYSMAP_SYNC") {
            cfg.sync = parse_bool(&raw).ok_or(ConfigError::InvalidEnv("PHYSMAP_SYNC"))?;
        }
        Ok(cfg)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}

/// Maps physical memory through a device node.
#[derive(Debug, Clone)]
pub struct DevMem {
    config: DevMemConfig,
    page_size: usize,
}

impl DevMem {
    pub fn new(config: DevMemConfig) -> Self {
        // SAFETY: sysconf has no memory-safety preconditions.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = usize::try_from(raw)
            .ok()
            .filter(|p| p.is_power_of_two())
            .unwrap_or(FALLBACK_PAGE_SIZE);
        Self { config, page_size }
    }

    pub fn config(&self) -> &DevMemConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Default for DevMem {
    fn default() -> Self {
        Self::new(DevMemConfig::default())
    }
}

/// A live `mmap` of a physical range.
///
/// Dropping the mapping without passing it to [`DevMem::unmap`] still unmaps it; `unmap` exists
/// so failures can be reported.
#[derive(Debug)]
pub struct DevMemMapping {
    /// First byte of the requested range.
    ptr: NonNull<u8>,
    len: usize,
    /// Page-aligned start and length actually passed to `mmap`.
    map_ptr: NonNull<libc::c_void>,
    map_len: usize,
}

// SAFETY: the mapping is plain memory owned by this value; moving it to another thread moves the
// only handle through which it is accessed.
unsafe impl Send for DevMemMapping {}

impl DevMemMapping {
    fn release(self) -> io::Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `map_ptr`/`map_len` are exactly what `mmap` returned, and `ManuallyDrop` keeps
        // `Drop` from unmapping a second time.
        let rc = unsafe { libc::munmap(this.map_ptr.as_ptr(), this.map_len) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Returns a pointer to `offset` after validating that `len` bytes fit.
    #[inline]
    fn at(&self, offset: usize, len: usize) -> MapperResult<*mut u8> {
        match offset.checked_add(len) {
            // SAFETY: `offset + len <= self.len`, so the result stays inside the mapping.
            Some(end) if end <= self.len => Ok(unsafe { self.ptr.as_ptr().add(offset) }),
            _ => Err(MapperError::invalid_argument("access outside mapping")),
        }
    }
}

impl Drop for DevMemMapping {
    fn drop(&mut self) {
        // SAFETY: see `release`.
        unsafe {
            libc::munmap(self.map_ptr.as_ptr(), self.map_len);
        }
    }
}

/// Reads `N` bytes with one volatile access when `ptr` is aligned for `T`, byte-wise otherwise.
///
/// # Safety
/// `ptr..ptr + N` must lie inside a live mapping.
#[inline]
unsafe fn load<T: Copy, const N: usize>(ptr: *const u8, from_bytes: fn([u8; N]) -> T) -> T {
    if ptr.align_offset(core::mem::align_of::<T>()) == 0 {
        // SAFETY: in bounds per the caller, aligned per the check above.
        unsafe { ptr.cast::<T>().read_volatile() }
    } else {
        let mut buf = [0u8; N];
        for (i, slot) in buf.iter_mut().enumerate() {
            // SAFETY: in bounds per the caller; `u8` has alignment 1.
            *slot = unsafe { ptr.add(i).read_volatile() };
        }
        from_bytes(buf)
    }
}

/// Counterpart of [`load`].
///
/// # Safety
/// `ptr..ptr + N` must lie inside a live, writable mapping.
#[inline]
unsafe fn store<T: Copy, const N: usize>(ptr: *mut u8, value: T, to_bytes: fn(T) -> [u8; N]) {
    if ptr.align_offset(core::mem::align_of::<T>()) == 0 {
        // SAFETY: in bounds per the caller, aligned per the check above.
        unsafe { ptr.cast::<T>().write_volatile(value) }
    } else {
        for (i, byte) in to_bytes(value).into_iter().enumerate() {
            // SAFETY: in bounds per the caller; `u8` has alignment 1.
            unsafe { ptr.add(i).write_volatile(byte) };
        }
    }
}

impl PhysicalMemoryMapper for DevMem {
    type Handle = DevMemMapping;

    fn map(&mut self, base: u64, size: usize) -> MapperResult<DevMemMapping> {
        if size == 0 {
            return Err(MapperError::invalid_argument("size must be non-zero"));
        }

        let page_mask = (self.page_size - 1) as u64;
        let aligned_base = base & !page_mask;
        let lead = (base - aligned_base) as usize;
        let map_len = size
            .checked_add(lead)
            .and_then(|len| len.checked_next_multiple_of(self.page_size))
            .ok_or_else(|| MapperError::invalid_argument("mapping length overflows"))?;
        let file_offset = libc::off_t::try_from(aligned_base)
            .map_err(|_| MapperError::invalid_argument("base does not fit in off_t"))?;

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if self.config.sync {
            options.custom_flags(libc::O_SYNC);
        }
        let file = options
            .open(&self.config.path)
            .map_err(|err| MapperError::new(MapperErrorCode::Open, err))?;

        // SAFETY: requesting a fresh shared mapping of an open descriptor; no existing memory is
        // affected. The descriptor may be closed once `mmap` returns.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                file_offset,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(MapperError::new(
                MapperErrorCode::Map,
                io::Error::last_os_error(),
            ));
        }
        let map_ptr = NonNull::new(raw).ok_or_else(|| {
            MapperError::new(MapperErrorCode::Map, io::Error::other("mmap returned null"))
        })?;
        // SAFETY: `lead < page_size <= map_len`.
        let ptr = unsafe { NonNull::new_unchecked(map_ptr.as_ptr().cast::<u8>().add(lead)) };

        tracing::debug!(
            "mmap {} base=0x{base:x} size=0x{size:x} (aligned=0x{aligned_base:x} len=0x{map_len:x})",
            self.config.path.display()
        );

        Ok(DevMemMapping {
            ptr,
            len: size,
            map_ptr,
            map_len,
        })
    }

    fn unmap(&mut self, handle: DevMemMapping) -> MapperResult<()> {
        handle
            .release()
            .map_err(|err| MapperError::new(MapperErrorCode::Unmap, err))
    }

    fn mapped_len(&self, handle: &DevMemMapping) -> usize {
        handle.len
    }

    fn read(&mut self, handle: &DevMemMapping, offset: usize, width: Width) -> MapperResult<u64> {
        let ptr = handle.at(offset, width.bytes())?;
        // SAFETY: `at` validated `width.bytes()` bytes at `ptr`.
        let value = unsafe {
            match width {
                Width::U8 => u64::from(ptr.read_volatile()),
                Width::U16 => u64::from(load(ptr, u16::from_ne_bytes)),
                Width::U32 => u64::from(load(ptr, u32::from_ne_bytes)),
                Width::U64 => load(ptr, u64::from_ne_bytes),
            }
        };
        Ok(value)
    }

    fn write(
        &mut self,
        handle: &DevMemMapping,
        offset: usize,
        width: Width,
        value: u64,
    ) -> MapperResult<()> {
        let ptr = handle.at(offset, width.bytes())?;
        let value = value & width.mask();
        // SAFETY: `at` validated `width.bytes()` bytes at `ptr`; the mapping is writable.
        unsafe {
            match width {
                Width::U8 => ptr.write_volatile(value as u8),
                Width::U16 => store(ptr, value as u16, u16::to_ne_bytes),
                Width::U32 => store(ptr, value as u32, u32::to_ne_bytes),
                Width::U64 => store(ptr, value, u64::to_ne_bytes),
            }
        }
        Ok(())
    }

    fn read_bytes(
        &mut self,
        handle: &DevMemMapping,
        offset: usize,
        dst: &mut [u8],
    ) -> MapperResult<()> {
        let src = handle.at(offset, dst.len())?;
        for (i, slot) in dst.iter_mut().enumerate() {
            // SAFETY: `at` validated `dst.len()` bytes at `src`.
            *slot = unsafe { src.add(i).read_volatile() };
        }
        Ok(())
    }

    fn write_bytes(
        &mut self,
        handle: &DevMemMapping,
        offset: usize,
        src: &[u8],
    ) -> MapperResult<()> {
        let dst = handle.at(offset, src.len())?;
        for (i, byte) in src.iter().copied().enumerate() {
            // SAFETY: `at` validated `src.len()` bytes at `dst`; the mapping is writable.
            unsafe { dst.add(i).write_volatile(byte) };
        }
        Ok(())
    }
}
