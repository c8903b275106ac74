use core::fmt;

use crate::error::{AccessError, MappingError, Op};
use crate::mapper::{PhysicalMemoryMapper, Width};

/// A mapped window of physical memory with bounds-checked register accessors.
///
/// The register is either open (it owns a live mapping of `size` bytes at `base`) or closed. All
/// accessors fail with [`AccessError::NotOpen`] while closed and with [`AccessError::OutOfBounds`]
/// when `offset + len` exceeds the mapped size; in both cases the mapper is never called.
///
/// Opening an already open register fails with [`MappingError::AlreadyOpen`] and leaves the live
/// mapping untouched; remapping requires an explicit [`close`](Self::close) first.
///
/// [`base`](Self::base) and [`size`](Self::size) report the last successfully opened range (zero
/// before the first `open`) and keep reporting it after `close`.
///
/// Dropping an open register closes it.
pub struct MappedRegister<M: PhysicalMemoryMapper> {
    mapper: M,
    mapping: Option<M::Handle>,
    base: u64,
    size: usize,
}

impl<M: PhysicalMemoryMapper> MappedRegister<M> {
    /// Creates a closed register that will map through `mapper`.
    pub fn new(mapper: M) -> Self {
        Self {
            mapper,
            mapping: None,
            base: 0,
            size: 0,
        }
    }

    /// Creates a register and immediately maps `size` bytes at physical address `base`.
    pub fn open_with(mapper: M, base: u64, size: usize) -> Result<Self, MappingError> {
        let mut reg = Self::new(mapper);
        reg.open(base, size)?;
        Ok(reg)
    }

    /// Maps `size` bytes of physical memory starting at `base`.
    pub fn open(&mut self, base: u64, size: usize) -> Result<(), MappingError> {
        if self.mapping.is_some() {
            return Err(MappingError::AlreadyOpen {
                base: self.base,
                size: self.size,
            });
        }
        if size == 0 {
            return Err(MappingError::InvalidRange {
                base,
                size,
                reason: "size must be non-zero",
            });
        }
        // The last mapped byte must be addressable; the range may end at the top of the space.
        if base.checked_add(size as u64 - 1).is_none() {
            return Err(MappingError::InvalidRange {
                base,
                size,
                reason: "range wraps the physical address space",
            });
        }

        let handle = self
            .mapper
            .map(base, size)
            .map_err(|err| MappingError::from_mapper(base, size, err))?;

        let mapped = self.mapper.mapped_len(&handle);
        if mapped < size {
            if let Err(err) = self.mapper.unmap(handle) {
                tracing::warn!(base, size, "failed to release short mapping: {err}");
            }
            return Err(MappingError::ShortMapping { base, size, mapped });
        }

        tracing::debug!("mapped physical memory base=0x{base:x} size=0x{size:x}");
        self.mapping = Some(handle);
        self.base = base;
        self.size = size;
        Ok(())
    }

    /// Releases the mapping. Closing a closed register is a no-op.
    pub fn close(&mut self) {
        let Some(handle) = self.mapping.take() else {
            return;
        };
        match self.mapper.unmap(handle) {
            Ok(()) => tracing::debug!(
                "unmapped physical memory base=0x{:x} size=0x{:x}",
                self.base,
                self.size
            ),
            Err(err) => tracing::warn!(
                "failed to unmap physical memory base=0x{:x} size=0x{:x}: {err}",
                self.base,
                self.size
            ),
        }
    }

    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    fn read_width(&mut self, op: Op, offset: usize, width: Width) -> Result<u64, AccessError> {
        let (len, size) = (width.bytes(), self.size);
        let handle = check(&self.mapping, size, op, offset, len)?;
        let value = self
            .mapper
            .read(handle, offset, width)
            .map_err(|err| AccessError::from_mapper(op, offset, len, size, err))?;
        tracing::trace!("{op} @ 0x{offset:x} = 0x{value:x}");
        Ok(value & width.mask())
    }

    fn write_width(
        &mut self,
        op: Op,
        offset: usize,
        width: Width,
        value: u64,
    ) -> Result<(), AccessError> {
        let (len, size) = (width.bytes(), self.size);
        let handle = check(&self.mapping, size, op, offset, len)?;
        tracing::trace!("{op} @ 0x{offset:x} = 0x{value:x}");
        self.mapper
            .write(handle, offset, width, value)
            .map_err(|err| AccessError::from_mapper(op, offset, len, size, err))
    }

    pub fn read8(&mut self, offset: usize) -> Result<u8, AccessError> {
        let raw = self.read_width(Op::Read8, offset, Width::U8)?;
        // `read_width` already masked to 8 bits; the cast only drops zero bits.
        Ok((raw & 0xFF) as u8)
    }

    pub fn read16(&mut self, offset: usize) -> Result<u16, AccessError> {
        let raw = self.read_width(Op::Read16, offset, Width::U16)?;
        Ok((raw & 0xFFFF) as u16)
    }

    pub fn read32(&mut self, offset: usize) -> Result<u32, AccessError> {
        let raw = self.read_width(Op::Read32, offset, Width::U32)?;
        Ok((raw & 0xFFFF_FFFF) as u32)
    }

    pub fn read64(&mut self, offset: usize) -> Result<u64, AccessError> {
        self.read_width(Op::Read64, offset, Width::U64)
    }

    /// Reads `len` bytes starting at `offset` into a new vector.
    ///
    /// The range is validated before anything is allocated.
    pub fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, AccessError> {
        let size = self.size;
        let handle = check(&self.mapping, size, Op::Read, offset, len)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            self.mapper
                .read_bytes(handle, offset, &mut buf)
                .map_err(|err| AccessError::from_mapper(Op::Read, offset, len, size, err))?;
        }
        Ok(buf)
    }

    /// Fills `dst` with bytes starting at `offset`.
    pub fn read_into(&mut self, offset: usize, dst: &mut [u8]) -> Result<(), AccessError> {
        let (len, size) = (dst.len(), self.size);
        let handle = check(&self.mapping, size, Op::Read, offset, len)?;
        if dst.is_empty() {
            return Ok(());
        }
        self.mapper
            .read_bytes(handle, offset, dst)
            .map_err(|err| AccessError::from_mapper(Op::Read, offset, len, size, err))
    }

    pub fn write8(&mut self, offset: usize, value: u8) -> Result<(), AccessError> {
        self.write_width(Op::Write8, offset, Width::U8, u64::from(value))
    }

    pub fn write16(&mut self, offset: usize, value: u16) -> Result<(), AccessError> {
        self.write_width(Op::Write16, offset, Width::U16, u64::from(value))
    }

    pub fn write32(&mut self, offset: usize, value: u32) -> Result<(), AccessError> {
        self.write_width(Op::Write32, offset, Width::U32, u64::from(value))
    }

    pub fn write64(&mut self, offset: usize, value: u64) -> Result<(), AccessError> {
        self.write_width(Op::Write64, offset, Width::U64, value)
    }

    /// Writes `src` starting at `offset`.
    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<(), AccessError> {
        let (len, size) = (src.len(), self.size);
        let handle = check(&self.mapping, size, Op::Write, offset, len)?;
        if src.is_empty() {
            return Ok(());
        }
        self.mapper
            .write_bytes(handle, offset, src)
            .map_err(|err| AccessError::from_mapper(Op::Write, offset, len, size, err))
    }

    /// Describes the register, including a hex preview of up to `preview_len` bytes of mapped
    /// content when open.
    ///
    /// Never fails: if the preview cannot be read it is left out.
    pub fn describe(&mut self, preview_len: usize) -> String {
        let mut out = self.to_string();
        if !self.is_open() {
            return out;
        }

        let len = preview_len.min(self.size);
        match self.read(0, len) {
            Ok(bytes) => {
                // Re-open the parenthesised summary produced by `Display`.
                out.pop();
                let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                out.push_str(&format!(", preview=[{}])", hex.join(" ")));
            }
            Err(err) => tracing::debug!("omitting preview: {err}"),
        }
        out
    }
}

/// Validates an access of `len` bytes at `offset` and returns the live handle.
///
/// Takes the fields rather than `&self` so the handle borrow stays disjoint from the mapper.
#[inline]
fn check<H>(
    mapping: &Option<H>,
    size: usize,
    op: Op,
    offset: usize,
    len: usize,
) -> Result<&H, AccessError> {
    let handle = mapping
        .as_ref()
        .ok_or(AccessError::NotOpen { op, offset })?;
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(handle),
        _ => Err(AccessError::OutOfBounds {
            op,
            offset,
            len,
            size,
        }),
    }
}

impl<M: PhysicalMemoryMapper> fmt::Display for MappedRegister<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_open() { "open" } else { "closed" };
        write!(
            f,
            "MappedRegister(state={state}, base=0x{:08x}, size=0x{:08x})",
            self.base, self.size
        )
    }
}

impl<M: PhysicalMemoryMapper> fmt::Debug for MappedRegister<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegister")
            .field("open", &self.is_open())
            .field("base", &format_args!("0x{:x}", self.base))
            .field("size", &self.size)
            .finish()
    }
}

impl<M: PhysicalMemoryMapper> Drop for MappedRegister<M> {
    fn drop(&mut self) {
        self.close();
    }
}
