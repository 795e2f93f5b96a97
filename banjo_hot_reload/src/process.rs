//! Target process abstraction
//!
//! The reloader manipulates the running program through this interface.
//! Platform backends (debug-API process spawning, remote memory
//! allocation and read/write primitives) live outside this workspace; the
//! in-process implementation backs tests and single-process embeddings by
//! keeping the "remote" memory in local buffers.

use banjo_common::{BanjoError, BanjoResult};
use hashbrown::HashMap;

pub type Address = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryProtection {
    ReadWrite,
    ReadWriteExecute,
}

pub trait TargetProcess {
    fn is_running(&self) -> bool;

    /// Service process events; returns once something happened or the
    /// poll interval elapsed.
    fn poll(&mut self);

    /// The virtual address of a named section in the target's image.
    fn find_section(&self, name: &str) -> Option<Address>;

    fn read_memory(&self, address: Address, out: &mut [u8]) -> BanjoResult<()>;

    fn write_memory(&mut self, address: Address, data: &[u8]) -> BanjoResult<()>;

    fn allocate_memory(
        &mut self,
        size: usize,
        protection: MemoryProtection,
    ) -> BanjoResult<Address>;

    fn close(&mut self);
}

/// In-process implementation: sections and allocations are plain buffers
/// in this process, addressed by synthetic 64-bit handles.
pub struct LocalProcess {
    regions: HashMap<Address, Vec<u8>>,
    sections: HashMap<String, Address>,
    next_address: Address,
    running: bool,
}

const REGION_ALIGN: Address = 0x10000;

impl LocalProcess {
    pub fn new() -> Self {
        Self {
            regions: HashMap::new(),
            sections: HashMap::new(),
            next_address: 0x7000_0000_0000,
            running: true,
        }
    }

    /// Install a named section (e.g. the address table) as if the loader
    /// had mapped it.
    pub fn install_section(&mut self, name: &str, bytes: Vec<u8>) -> Address {
        let address = self.next_address;
        self.next_address += REGION_ALIGN;
        self.regions.insert(address, bytes);
        self.sections.insert(name.to_string(), address);
        address
    }

    fn region_containing(&self, address: Address) -> Option<(Address, &Vec<u8>)> {
        self.regions
            .iter()
            .find(|(base, bytes)| address >= **base && address < **base + bytes.len() as Address)
            .map(|(base, bytes)| (*base, bytes))
    }
}

impl Default for LocalProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetProcess for LocalProcess {
    fn is_running(&self) -> bool {
        self.running
    }

    fn poll(&mut self) {}

    fn find_section(&self, name: &str) -> Option<Address> {
        self.sections.get(name).copied()
    }

    fn read_memory(&self, address: Address, out: &mut [u8]) -> BanjoResult<()> {
        let (base, bytes) = self
            .region_containing(address)
            .ok_or_else(|| BanjoError::reload("read outside any mapped region"))?;

        let offset = (address - base) as usize;
        if offset + out.len() > bytes.len() {
            return Err(BanjoError::reload("read crosses the end of a region"));
        }

        out.copy_from_slice(&bytes[offset..offset + out.len()]);
        Ok(())
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> BanjoResult<()> {
        let (base, length) = self
            .region_containing(address)
            .map(|(base, bytes)| (base, bytes.len()))
            .ok_or_else(|| BanjoError::reload("write outside any mapped region"))?;

        let offset = (address - base) as usize;
        if offset + data.len() > length {
            return Err(BanjoError::reload("write crosses the end of a region"));
        }

        let bytes = self.regions.get_mut(&base).unwrap();
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn allocate_memory(
        &mut self,
        size: usize,
        _protection: MemoryProtection,
    ) -> BanjoResult<Address> {
        let address = self.next_address;
        self.next_address += ((size as Address / REGION_ALIGN) + 1) * REGION_ALIGN;
        self.regions.insert(address, vec![0; size]);
        Ok(address)
    }

    fn close(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_allocation() {
        let mut process = LocalProcess::new();
        let address = process
            .allocate_memory(64, MemoryProtection::ReadWriteExecute)
            .unwrap();

        process.write_memory(address + 8, &[1, 2, 3]).unwrap();

        let mut out = [0u8; 3];
        process.read_memory(address + 8, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_out_of_bounds_write_fails() {
        let mut process = LocalProcess::new();
        let address = process
            .allocate_memory(8, MemoryProtection::ReadWrite)
            .unwrap();
        assert!(process.write_memory(address + 4, &[0; 8]).is_err());
    }
}
