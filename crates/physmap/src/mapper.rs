use core::fmt;
use std::io;

use thiserror::Error;

/// Error codes reported by a [`PhysicalMemoryMapper`].
///
/// The discriminants are stable and mirror the integer codes of C-style mapping libraries. They
/// are only ever surfaced to [`MappedRegister`](crate::MappedRegister) callers as diagnostic
/// context inside [`MappingError`](crate::MappingError) and [`AccessError`](crate::AccessError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MapperErrorCode {
    /// The request was malformed or out of range for the mapper.
    InvalidArgument = -1,
    /// The backing device could not be opened (missing node, permission denied).
    Open = -2,
    /// The backing device could not be closed.
    Close = -3,
    /// The mapping itself could not be established.
    Map = -4,
    /// The mapping could not be torn down.
    Unmap = -5,
    /// A read or write failed without modifying the target.
    Access = -6,
    /// A write stopped part way through; the target contents are undefined.
    PartialAccess = -7,
}

impl MapperErrorCode {
    pub fn raw(self) -> i32 {
        self as i32
    }

    fn name(self) -> &'static str {
        match self {
            MapperErrorCode::InvalidArgument => "invalid argument",
            MapperErrorCode::Open => "open",
            MapperErrorCode::Close => "close",
            MapperErrorCode::Map => "map",
            MapperErrorCode::Unmap => "unmap",
            MapperErrorCode::Access => "access",
            MapperErrorCode::PartialAccess => "partial access",
        }
    }
}

impl fmt::Display for MapperErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.raw())
    }
}

/// Failure reported by a [`PhysicalMemoryMapper`] primitive.
#[derive(Debug, Error)]
#[error("mapper error {code}: {source}")]
pub struct MapperError {
    pub code: MapperErrorCode,
    #[source]
    pub source: io::Error,
}

impl MapperError {
    pub fn new(code: MapperErrorCode, source: io::Error) -> Self {
        Self { code, source }
    }

    pub fn invalid_argument(msg: &'static str) -> Self {
        Self::new(
            MapperErrorCode::InvalidArgument,
            io::Error::new(io::ErrorKind::InvalidInput, msg),
        )
    }
}

pub type MapperResult<T> = Result<T, MapperError>;

/// Width of a single register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }

    /// Mask selecting the bits a value of this width can hold.
    #[inline]
    pub const fn mask(self) -> u64 {
        match self {
            Width::U8 => 0xFF,
            Width::U16 => 0xFFFF,
            Width::U32 => 0xFFFF_FFFF,
            Width::U64 => u64::MAX,
        }
    }

    /// Width matching a bit count (`8`, `16`, `32` or `64`).
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Width::U8),
            16 => Some(Width::U16),
            32 => Some(Width::U32),
            64 => Some(Width::U64),
            _ => None,
        }
    }
}

/// The OS-level mechanism that maps physical memory into the process and performs raw accesses.
///
/// Implementations perform no bounds validation on behalf of their callers beyond what they need
/// for their own memory safety; [`MappedRegister`](crate::MappedRegister) validates every access
/// against the size it requested before delegating.
///
/// Reads take `&mut self` because device registers may have read side effects.
pub trait PhysicalMemoryMapper {
    /// Ownership token for one live mapping. Released by passing it back to [`Self::unmap`].
    type Handle;

    fn map(&mut self, base: u64, size: usize) -> MapperResult<Self::Handle>;

    fn unmap(&mut self, handle: Self::Handle) -> MapperResult<()>;

    /// Number of bytes addressable through `handle`, starting at offset 0.
    fn mapped_len(&self, handle: &Self::Handle) -> usize;

    /// Performs a single access of `width` bytes in native byte order. Bits above `width` in the
    /// returned value are zero.
    fn read(&mut self, handle: &Self::Handle, offset: usize, width: Width) -> MapperResult<u64>;

    /// Performs a single access of `width` bytes in native byte order. Bits of `value` above
    /// `width` are ignored.
    fn write(
        &mut self,
        handle: &Self::Handle,
        offset: usize,
        width: Width,
        value: u64,
    ) -> MapperResult<()>;

    fn read_bytes(&mut self, handle: &Self::Handle, offset: usize, dst: &mut [u8])
        -> MapperResult<()>;

    fn write_bytes(&mut self, handle: &Self::Handle, offset: usize, src: &[u8])
        -> MapperResult<()>;
}
