//! The memory-management contract. Address translation, protection, and
//! cache-parity modelling are explicitly out of scope (SPEC_FULL.md section 1);
//! the core only calls through this trait.

use crate::core::fault::Fault;

/// External collaborator providing fetch/load/store and page-table-register
/// maintenance. Implementations own the actual memory array and whatever
/// translation/protection scheme backs it.
pub trait Mmu {
    /// Fetches the 48-bit word at `addr` for instruction decode. May raise
    /// `InsnCheck` (data-tagged cell) or `InsnProt`.
    fn fetch(&mut self, addr: u16) -> Result<u64, Fault>;

    /// Loads the 48-bit word at `addr` as an operand. May raise
    /// `OperandProt`, `RamCheck`, `CacheCheck`, or `LoadAddrMatch`.
    fn load(&mut self, addr: u16) -> Result<u64, Fault>;

    /// Stores a 48-bit word at `addr`. May raise `OperandProt`, `RamCheck`,
    /// or `StoreAddrMatch`.
    fn store(&mut self, addr: u16, word: u64) -> Result<(), Fault>;

    /// Reloads one of the eight page-table-like registers (`mod` sub-address
    /// 020..027, SPEC_FULL.md section 4.5).
    fn set_rp(&mut self, index: u8, value: u64);

    /// Reloads one of the four protection registers (`mod` sub-address
    /// 030..033).
    fn set_protection(&mut self, index: u8, value: u64);
}
