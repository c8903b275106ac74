use core::fmt;
use std::io;

use thiserror::Error;

use crate::mapper::{MapperError, MapperErrorCode};

pub type Result<T> = std::result::Result<T, Error>;

/// Any failure reported by a [`MappedRegister`](crate::MappedRegister).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Register operation that produced an [`AccessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read8,
    Read16,
    Read32,
    Read64,
    Read,
    Write8,
    Write16,
    Write32,
    Write64,
    Write,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Read8 => "read8",
            Op::Read16 => "read16",
            Op::Read32 => "read32",
            Op::Read64 => "read64",
            Op::Read => "read",
            Op::Write8 => "write8",
            Op::Write16 => "write16",
            Op::Write32 => "write32",
            Op::Write64 => "write64",
            Op::Write => "write",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of the target after a failed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// The mapper failed before modifying anything.
    Failed,
    /// The mapper completed only part of a write; the target contents are undefined.
    Partial,
}

impl fmt::Display for IoOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoOutcome::Failed => f.write_str("target unchanged"),
            IoOutcome::Partial => f.write_str("partially applied, contents undefined"),
        }
    }
}

/// Errors establishing a mapping in [`MappedRegister::open`](crate::MappedRegister::open).
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapping already open: base=0x{base:x} size=0x{size:x}")]
    AlreadyOpen { base: u64, size: usize },

    #[error("invalid mapping range base=0x{base:x} size=0x{size:x}: {reason}")]
    InvalidRange {
        base: u64,
        size: usize,
        reason: &'static str,
    },

    #[error("mapper rejected range base=0x{base:x} size=0x{size:x} [{code}]: {source}")]
    Rejected {
        base: u64,
        size: usize,
        code: MapperErrorCode,
        source: io::Error,
    },

    #[error(
        "failed to open physical memory device for base=0x{base:x} size=0x{size:x} [{code}]: {source}"
    )]
    DeviceOpen {
        base: u64,
        size: usize,
        code: MapperErrorCode,
        source: io::Error,
    },

    #[error("failed to map physical memory base=0x{base:x} size=0x{size:x} [{code}]: {source}")]
    Map {
        base: u64,
        size: usize,
        code: MapperErrorCode,
        source: io::Error,
    },

    #[error(
        "failed to close physical memory device for base=0x{base:x} size=0x{size:x} [{code}]: {source}"
    )]
    Close {
        base: u64,
        size: usize,
        code: MapperErrorCode,
        source: io::Error,
    },

    #[error("failed to unmap physical memory base=0x{base:x} size=0x{size:x} [{code}]: {source}")]
    Unmap {
        base: u64,
        size: usize,
        code: MapperErrorCode,
        source: io::Error,
    },

    #[error("short mapping: base=0x{base:x} size=0x{size:x} mapped=0x{mapped:x}")]
    ShortMapping {
        base: u64,
        size: usize,
        mapped: usize,
    },

    #[error("mapper failed mapping base=0x{base:x} size=0x{size:x} [{code}]: {source}")]
    Mapper {
        base: u64,
        size: usize,
        code: MapperErrorCode,
        source: io::Error,
    },
}

impl MappingError {
    pub(crate) fn from_mapper(base: u64, size: usize, err: MapperError) -> Self {
        let MapperError { code, source } = err;
        match code {
            MapperErrorCode::InvalidArgument => MappingError::Rejected {
                base,
                size,
                code,
                source,
            },
            MapperErrorCode::Open => MappingError::DeviceOpen {
                base,
                size,
                code,
                source,
            },
            MapperErrorCode::Map => MappingError::Map {
                base,
                size,
                code,
                source,
            },
            MapperErrorCode::Close => MappingError::Close {
                base,
                size,
                code,
                source,
            },
            MapperErrorCode::Unmap => MappingError::Unmap {
                base,
                size,
                code,
                source,
            },
            // Access codes have no mapping-time meaning of their own.
            MapperErrorCode::Access | MapperErrorCode::PartialAccess => MappingError::Mapper {
                base,
                size,
                code,
                source,
            },
        }
    }

    /// Mapper code behind this error, if the mapper reported one.
    pub fn mapper_code(&self) -> Option<MapperErrorCode> {
        match self {
            MappingError::Rejected { code, .. }
            | MappingError::DeviceOpen { code, .. }
            | MappingError::Map { code, .. }
            | MappingError::Close { code, .. }
            | MappingError::Unmap { code, .. }
            | MappingError::Mapper { code, .. } => Some(*code),
            MappingError::AlreadyOpen { .. }
            | MappingError::InvalidRange { .. }
            | MappingError::ShortMapping { .. } => None,
        }
    }
}

/// Errors from register reads and writes.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("{op} at offset 0x{offset:x} on a closed mapping")]
    NotOpen { op: Op, offset: usize },

    #[error("{op} out of bounds: offset=0x{offset:x} len={len} size=0x{size:x}")]
    OutOfBounds {
        op: Op,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error(
        "{op} failed: offset=0x{offset:x} len={len} size=0x{size:x} [{code}, {outcome}]: {source}"
    )]
    Io {
        op: Op,
        offset: usize,
        len: usize,
        size: usize,
        outcome: IoOutcome,
        code: MapperErrorCode,
        source: io::Error,
    },
}

impl AccessError {
    pub(crate) fn from_mapper(
        op: Op,
        offset: usize,
        len: usize,
        size: usize,
        err: MapperError,
    ) -> Self {
        let MapperError { code, source } = err;
        let outcome = match code {
            MapperErrorCode::PartialAccess => IoOutcome::Partial,
            _ => IoOutcome::Failed,
        };
        AccessError::Io {
            op,
            offset,
            len,
            size,
            outcome,
            code,
            source,
        }
    }

    pub fn op(&self) -> Op {
        match self {
            AccessError::NotOpen { op, .. }
            | AccessError::OutOfBounds { op, .. }
            | AccessError::Io { op, .. } => *op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapper_codes_translate_one_to_one_on_open() {
        let cases = [
            (MapperErrorCode::InvalidArgument, "Rejected"),
            (MapperErrorCode::Open, "DeviceOpen"),
            (MapperErrorCode::Map, "Map"),
            (MapperErrorCode::Close, "Close"),
            (MapperErrorCode::Unmap, "Unmap"),
            (MapperErrorCode::Access, "Mapper"),
            (MapperErrorCode::PartialAccess, "Mapper"),
        ];
        for (code, expected) in cases {
            let err = MappingError::from_mapper(
                0x1000,
                0x10,
                MapperError::new(code, io::Error::other("boom")),
            );
            let kind = match &err {
                MappingError::Rejected { .. } => "Rejected",
                MappingError::DeviceOpen { .. } => "DeviceOpen",
                MappingError::Map { .. } => "Map",
                MappingError::Close { .. } => "Close",
                MappingError::Unmap { .. } => "Unmap",
                MappingError::Mapper { .. } => "Mapper",
                _ => "other",
            };
            assert_eq!(kind, expected, "code {code}");
            assert_eq!(err.mapper_code(), Some(code));
        }
    }

    #[test]
    fn partial_access_marks_outcome() {
        let err = AccessError::from_mapper(
            Op::Write,
            4,
            8,
            16,
            MapperError::new(MapperErrorCode::PartialAccess, io::Error::other("torn")),
        );
        assert!(matches!(
            err,
            AccessError::Io {
                outcome: IoOutcome::Partial,
                ..
            }
        ));
        assert_eq!(err.op(), Op::Write);
    }

    #[test]
    fn messages_carry_operation_offset_and_size() {
        let err = AccessError::OutOfBounds {
            op: Op::Read32,
            offset: 14,
            len: 4,
            size: 16,
        };
        assert_eq!(
            err.to_string(),
            "read32 out of bounds: offset=0xe len=4 size=0x10"
        );

        let err = MappingError::from_mapper(
            0x3f20_0000,
            0x1000,
            MapperError::new(
                MapperErrorCode::Open,
                io::Error::from(io::ErrorKind::PermissionDenied),
            ),
        );
        let msg = err.to_string();
        assert!(msg.contains("base=0x3f200000"), "{msg}");
        assert!(msg.contains("open (-2)"), "{msg}");
    }
}
