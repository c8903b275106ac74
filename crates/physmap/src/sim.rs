//! Heap-backed [`PhysicalMemoryMapper`] for tests.
//!
//! [`SimulatedPhysicalMemory`] models a window `[phys_base, phys_base + len)` of physical address
//! space. Clones share the same backing store and bookkeeping, so a test can keep one clone for
//! inspection while another is moved into a [`MappedRegister`](crate::MappedRegister).

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::mapper::{MapperError, MapperErrorCode, MapperResult, PhysicalMemoryMapper, Width};

/// Live mapping into a [`SimulatedPhysicalMemory`] window.
#[derive(Debug)]
pub struct SimMapping {
    id: u64,
    /// Offset of the mapping's first byte within the backing store.
    start: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct Faults {
    next_map: Option<MapperErrorCode>,
    next_unmap: bool,
    access_at: Option<u64>,
    tear_at: Option<u64>,
}

#[derive(Debug)]
struct State {
    phys_base: u64,
    bytes: Vec<u8>,
    live: HashSet<u64>,
    next_id: u64,
    maps: usize,
    unmaps: usize,
    accesses: usize,
    faults: Faults,
}

#[derive(Debug, Clone)]
pub struct SimulatedPhysicalMemory {
    state: Arc<Mutex<State>>,
}

impl SimulatedPhysicalMemory {
    /// Creates a zero-filled window of `len` bytes starting at physical address `phys_base`.
    pub fn new(phys_base: u64, len: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                phys_base,
                bytes: vec![0u8; len],
                live: HashSet::new(),
                next_id: 0,
                maps: 0,
                unmaps: 0,
                accesses: 0,
                faults: Faults::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge the other clones.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of mappings handed out and not yet unmapped.
    pub fn live_mappings(&self) -> usize {
        self.lock().live.len()
    }

    /// Number of successful `map` calls.
    pub fn map_count(&self) -> usize {
        self.lock().maps
    }

    /// Number of `unmap` calls, including failed ones.
    pub fn unmap_count(&self) -> usize {
        self.lock().unmaps
    }

    /// Number of read/write primitives that reached the backing store.
    pub fn access_count(&self) -> usize {
        self.lock().accesses
    }

    /// Makes the next `map` call fail with `code`.
    pub fn fail_next_map(&self, code: MapperErrorCode) {
        self.lock().faults.next_map = Some(code);
    }

    /// Makes the next `unmap` call fail. The mapping is still released.
    pub fn fail_next_unmap(&self) {
        self.lock().faults.next_unmap = true;
    }

    /// Fails every access that touches physical address `paddr` until [`Self::clear_faults`].
    pub fn fail_access_at(&self, paddr: u64) {
        self.lock().faults.access_at = Some(paddr);
    }

    /// Stops every write that covers `paddr` just before that byte, reporting a partial access.
    pub fn tear_writes_at(&self, paddr: u64) {
        self.lock().faults.tear_at = Some(paddr);
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    /// Copies `len` bytes of the backing store at `paddr`, bypassing any mapping.
    ///
    /// # Panics
    /// Panics if the range is outside the simulated window.
    pub fn peek(&self, paddr: u64, len: usize) -> Vec<u8> {
        let state = self.lock();
        let start = (paddr - state.phys_base) as usize;
        state.bytes[start..start + len].to_vec()
    }

    /// Overwrites backing bytes at `paddr`, bypassing any mapping (models hardware updating a
    /// register behind the driver's back).
    ///
    /// # Panics
    /// Panics if the range is outside the simulated window.
    pub fn poke(&self, paddr: u64, src: &[u8]) {
        let mut state = self.lock();
        let start = (paddr - state.phys_base) as usize;
        state.bytes[start..start + src.len()].copy_from_slice(src);
    }
}

impl State {
    fn range(&self, handle: &SimMapping, offset: usize, len: usize) -> MapperResult<usize> {
        if !self.live.contains(&handle.id) {
            return Err(MapperError::invalid_argument("mapping is not live"));
        }
        match offset.checked_add(len) {
            Some(end) if end <= handle.len => Ok(handle.start + offset),
            _ => Err(MapperError::invalid_argument("access outside mapping")),
        }
    }

    /// Whether `paddr` falls in the `len` backing bytes at `start`. Never overflows, so windows may
    /// end at the top of the address space.
    fn covers(&self, start: usize, len: usize, paddr: u64) -> bool {
        paddr
            .checked_sub(self.phys_base)
            .and_then(|off| usize::try_from(off).ok())
            .is_some_and(|off| off >= start && off - start < len)
    }

    fn check_fault(&self, start: usize, len: usize) -> MapperResult<()> {
        let Some(paddr) = self.faults.access_at else {
            return Ok(());
        };
        if self.covers(start, len, paddr) {
            return Err(MapperError::new(
                MapperErrorCode::Access,
                io::Error::other(format!("injected access fault at 0x{paddr:x}")),
            ));
        }
        Ok(())
    }

    fn store(&mut self, start: usize, src: &[u8]) -> MapperResult<()> {
        self.check_fault(start, src.len())?;
        self.accesses += 1;
        if let Some(paddr) = self.faults.tear_at {
            if self.covers(start, src.len(), paddr) {
                let done = (paddr - self.phys_base) as usize - start;
                self.bytes[start..start + done].copy_from_slice(&src[..done]);
                return Err(MapperError::new(
                    MapperErrorCode::PartialAccess,
                    io::Error::other(format!("write torn at 0x{paddr:x} after {done} bytes")),
                ));
            }
        }
        self.bytes[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn load(&mut self, start: usize, dst: &mut [u8]) -> MapperResult<()> {
        self.check_fault(start, dst.len())?;
        self.accesses += 1;
        dst.copy_from_slice(&self.bytes[start..start + dst.len()]);
        Ok(())
    }
}

impl PhysicalMemoryMapper for SimulatedPhysicalMemory {
    type Handle = SimMapping;

    fn map(&mut self, base: u64, size: usize) -> MapperResult<SimMapping> {
        let mut state = self.lock();
        if let Some(code) = state.faults.next_map.take() {
            let source = match code {
                MapperErrorCode::Open => io::Error::from(io::ErrorKind::PermissionDenied),
                _ => io::Error::other("injected map fault"),
            };
            return Err(MapperError::new(code, source));
        }

        let start = base
            .checked_sub(state.phys_base)
            .and_then(|off| usize::try_from(off).ok())
            .filter(|start| {
                start
                    .checked_add(size)
                    .is_some_and(|end| end <= state.bytes.len())
            })
            .ok_or_else(|| {
                MapperError::invalid_argument("physical range is not backed by the simulated window")
            })?;

        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(id);
        state.maps += 1;
        Ok(SimMapping {
            id,
            start,
            len: size,
        })
    }

    fn unmap(&mut self, handle: SimMapping) -> MapperResult<()> {
        let mut state = self.lock();
        state.unmaps += 1;
        let was_live = state.live.remove(&handle.id);
        if std::mem::take(&mut state.faults.next_unmap) {
            return Err(MapperError::new(
                MapperErrorCode::Unmap,
                io::Error::other("injected unmap fault"),
            ));
        }
        if !was_live {
            return Err(MapperError::invalid_argument("mapping is not live"));
        }
        Ok(())
    }

    fn mapped_len(&self, handle: &SimMapping) -> usize {
        handle.len
    }

    fn read(&mut self, handle: &SimMapping, offset: usize, width: Width) -> MapperResult<u64> {
        let mut state = self.lock();
        let start = state.range(handle, offset, width.bytes())?;
        let mut buf = [0u8; 8];
        state.load(start, &mut buf[..width.bytes()])?;
        let value = match width {
            Width::U8 => u64::from(buf[0]),
            Width::U16 => u64::from(u16::from_ne_bytes([buf[0], buf[1]])),
            Width::U32 => u64::from(u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]])),
            Width::U64 => u64::from_ne_bytes(buf),
        };
        Ok(value)
    }

    fn write(
        &mut self,
        handle: &SimMapping,
        offset: usize,
        width: Width,
        value: u64,
    ) -> MapperResult<()> {
        let mut state = self.lock();
        let start = state.range(handle, offset, width.bytes())?;
        let value = value & width.mask();
        match width {
            Width::U8 => state.store(start, &[value as u8]),
            Width::U16 => state.store(start, &(value as u16).to_ne_bytes()),
            Width::U32 => state.store(start, &(value as u32).to_ne_bytes()),
            Width::U64 => state.store(start, &value.to_ne_bytes()),
        }
    }

    fn read_bytes(
        &mut self,
        handle: &SimMapping,
        offset: usize,
        dst: &mut [u8],
    ) -> MapperResult<()> {
        let mut state = self.lock();
        let start = state.range(handle, offset, dst.len())?;
        state.load(start, dst)
    }

    fn write_bytes(
        &mut self,
        handle: &SimMapping,
        offset: usize,
        src: &[u8],
    ) -> MapperResult<()> {
        let mut state = self.lock();
        let start = state.range(handle, offset, src.len())?;
        state.store(start, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_outside_window_is_rejected() {
        let mut mem = SimulatedPhysicalMemory::new(0x1000, 0x100);
        let err = mem.map(0x0F00, 0x10).unwrap_err();
        assert_eq!(err.code, MapperErrorCode::InvalidArgument);
        let err = mem.map(0x10F8, 0x10).unwrap_err();
        assert_eq!(err.code, MapperErrorCode::InvalidArgument);
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn mappings_alias_the_same_backing_store() {
        let mut mem = SimulatedPhysicalMemory::new(0x1000, 0x100);
        let a = mem.map(0x1000, 0x20).unwrap();
        let b = mem.map(0x1010, 0x10).unwrap();

        mem.write(&a, 0x10, Width::U32, 0xCAFE_F00D).unwrap();
        assert_eq!(mem.read(&b, 0, Width::U32).unwrap(), 0xCAFE_F00D);

        mem.unmap(a).unwrap();
        mem.unmap(b).unwrap();
        assert_eq!(mem.live_mappings(), 0);
    }

    #[test]
    fn write_ignores_bits_above_width() {
        let mut mem = SimulatedPhysicalMemory::new(0, 8);
        let h = mem.map(0, 8).unwrap();
        mem.write(&h, 0, Width::U8, 0x1234).unwrap();
        assert_eq!(mem.peek(0, 2), vec![0x34, 0]);
        mem.unmap(h).unwrap();
    }

    #[test]
    fn access_through_released_handle_fails() {
        let mut mem = SimulatedPhysicalMemory::new(0, 8);
        let h = mem.map(0, 8).unwrap();
        let stale = SimMapping {
            id: h.id,
            start: h.start,
            len: h.len,
        };
        mem.unmap(h).unwrap();
        assert!(mem.read(&stale, 0, Width::U8).is_err());
    }

    #[test]
    fn unmap_fault_still_releases_mapping() {
        let mut mem = SimulatedPhysicalMemory::new(0, 8);
        let h = mem.map(0, 8).unwrap();
        mem.fail_next_unmap();
        let err = mem.unmap(h).unwrap_err();
        assert_eq!(err.code, MapperErrorCode::Unmap);
        assert_eq!(mem.live_mappings(), 0);
    }
}
