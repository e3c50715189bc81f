//! Core CPU state: registers, modifier file, control flags.
//!
//! The reference header defining exact PSW/SPSW/RUU/GRP bit positions
//! (`svs_defs.h`) was not part of the retrieval pack this port was built
//! from, so the concrete bit numbers below are this implementation's own,
//! internally-consistent choice (see DESIGN.md). Field *names* and the
//! membership of the GRP wired-bit set are taken from the reference source.

use crate::core::word::ADDR_MASK;

/// Modifier-file index aliases (SPEC_FULL.md section 3).
pub mod modifier {
    pub const STACK: usize = 15;
    pub const MOD: usize = 20;
    pub const PSW: usize = 21;
    pub const SPSW: usize = 27;
    pub const ERET: usize = 32;
    pub const IRET: usize = 33;
    pub const IBP: usize = 34;
    pub const DWP: usize = 35;
}

/// PSW bit assignments.
pub mod psw {
    pub const INTR_DISABLE: u16 = 1 << 0;
    pub const MMAP_DISABLE: u16 = 1 << 1;
    pub const PROT_DISABLE: u16 = 1 << 2;
    pub const INTR_HALT: u16 = 1 << 3;
    pub const CHECK_HALT: u16 = 1 << 4;
    pub const WRITE_WATCH: u16 = 1 << 5;
    /// The three mask bits `vtm`/`utm` are permitted to poke directly.
    pub const MODIFIABLE_MASK: u16 = INTR_DISABLE | MMAP_DISABLE | PROT_DISABLE;
}

/// SPSW bit assignments (the saved-PSW snapshot taken on trap entry).
pub mod spsw {
    pub const INTR_DISABLE: u16 = 1 << 0;
    pub const MMAP_DISABLE: u16 = 1 << 1;
    pub const PROT_DISABLE: u16 = 1 << 2;
    pub const EXTRACODE: u16 = 1 << 3;
    pub const INTERRUPT: u16 = 1 << 4;
    pub const RIGHT_INSTR: u16 = 1 << 5;
    pub const MOD_RK: u16 = 1 << 6;
    pub const NEXT_RK: u16 = 1 << 7;
}

/// GRP (main interrupt register) bit assignments, including the wired bits
/// that a `mod`-opcode clear can never take down (SPEC_FULL.md section 4.5/4.7).
pub mod grp {
    pub const ILL_INSN: u32 = 1 << 0;
    pub const INSN_CHECK: u32 = 1 << 1;
    pub const INSN_PROT: u32 = 1 << 2;
    pub const OPRND_PROT: u32 = 1 << 3;
    pub const RAM_CHECK: u32 = 1 << 4;
    pub const CHECK: u32 = 1 << 5;
    pub const BREAKPOINT: u32 = 1 << 6;
    pub const WATCHPT_R: u32 = 1 << 7;
    pub const WATCHPT_W: u32 = 1 << 8;
    pub const OVERFLOW: u32 = 1 << 9;
    pub const DIVZERO: u32 = 1 << 10;
    pub const DRUM_FREE: u32 = 1 << 11;
    pub const CHANNEL_DONE: u32 = 1 << 12;
    pub const CHANNEL_FREE: u32 = 1 << 13;
    pub const PANEL_REQ: u32 = 1 << 14;
    pub const TIMER: u32 = 1 << 15;
    pub const SLOW_CLK: u32 = 1 << 16;

    /// Bits whose source is hardware/device state; software cannot clear
    /// them via the `mod` opcode's GRP-clear sub-address (037).
    pub const WIRED_BITS: u32 =
        DRUM_FREE | CHANNEL_DONE | CHANNEL_FREE | PANEL_REQ | TIMER | SLOW_CLK;
}

/// RUU (control-unit flag) bits not folded into `SupervisorFlavor`.
pub mod ruu {
    pub const RIGHT_INSTR: u16 = 1 << 0;
    pub const MOD_RK: u16 = 1 << 1;
    pub const AVOST_DISABLE: u16 = 1 << 2;
    pub const PARITY_LEFT: u16 = 1 << 3;
    pub const PARITY_RIGHT: u16 = 1 << 4;
}

/// Arithmetic-unit mode, tracked in RAU and used by `uza`/`u1a`'s
/// zero-test and by the operand-loading opcodes that reset it to `Logical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RauMode {
    #[default]
    Logical,
    Additive,
    Multiplicative,
}

/// Which kind of supervisor entry the core is currently inside, if any.
/// The reference source packs this into shared RUU/SPSW bits; kept as a
/// small tagged value here and serialized only at the three places that
/// cross into register-shaped storage (SPSW capture/restore, snapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorFlavor {
    #[default]
    User,
    Supervisor(SupervisorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorKind {
    Extracode,
    Interrupt,
}

impl SupervisorFlavor {
    pub fn is_supervisor(&self) -> bool {
        matches!(self, SupervisorFlavor::Supervisor(_))
    }

    /// Packs into the {EXTRACODE, INTERRUPT} bit pair of SPSW.
    pub fn to_spsw_bits(self) -> u16 {
        match self {
            SupervisorFlavor::User => 0,
            SupervisorFlavor::Supervisor(SupervisorKind::Extracode) => spsw::EXTRACODE,
            SupervisorFlavor::Supervisor(SupervisorKind::Interrupt) => spsw::INTERRUPT,
        }
    }

    /// Inverse of `to_spsw_bits`, used by `iret` to restore supervisor flavor.
    pub fn from_spsw_bits(bits: u16) -> Self {
        if bits & spsw::EXTRACODE != 0 {
            SupervisorFlavor::Supervisor(SupervisorKind::Extracode)
        } else if bits & spsw::INTERRUPT != 0 {
            SupervisorFlavor::Supervisor(SupervisorKind::Interrupt)
        } else {
            SupervisorFlavor::User
        }
    }
}

/// One CPU core's complete architectural state.
#[derive(Debug, Clone)]
pub struct Core {
    pub pc: u16,
    pub rk: u32,
    pub aex: u16,
    pub acc: u64,
    pub rmr: u64,
    pub rau: RauMode,
    /// Widened past 16 bits so IBP/DWP can carry the forced bit 16
    /// (SPEC_FULL.md section 3, invariant 2) alongside the 15-bit address.
    pub m: [u32; 32],
    pub right_instr: bool,
    /// Set by `utc`/`wtc`/`iret` to mean "the *next* instruction's address
    /// is modified by M[MOD]"; consumed (cleared) by the dispatcher at the
    /// start of the following instruction (SPEC_FULL.md section 4.2/4.5).
    pub mod_rk: bool,
    pub avost_disable: bool,
    pub parity_left: bool,
    pub parity_right: bool,
    pub supervisor: SupervisorFlavor,
    pub grp: u32,
    pub mgrp: u32,
    pub prp: u32,
    pub mprp: u32,
    pub rp: [u64; 8],
    pub rz: u32,
    pub pult: [u64; 8],
    pub pult_switch: u8,
    /// Signed correction applied to M[15] if a fault unwinds an
    /// already-applied autopop/autopush. Retained for API parity with the
    /// register snapshot and the rollback test (SPEC_FULL.md section 8.2);
    /// the commit-on-success ordering in `cpu::exec` makes its value
    /// redundant rather than load-bearing (see DESIGN.md).
    pub corr_stack: i8,
    /// Latched by the MMU on a protection/parity fault.
    pub bad_addr: u16,
    /// Set while handling a fault that has not yet retired a user
    /// instruction; a second fault in this state is DOUBLE_INTR.
    pub in_interrupt_recovery: bool,
    pub instruction_breakpoints: std::collections::HashSet<u16>,
    pub read_watchpoints: std::collections::HashSet<u16>,
    pub write_watchpoints: std::collections::HashSet<u16>,
}

impl Core {
    /// Boot state: supervisor/extracode mode, PSW fully masked, exactly as
    /// the reference `cpu_reset` leaves the machine (SPEC_FULL.md section 3).
    pub fn reset() -> Self {
        let mut core = Core {
            pc: 1,
            rk: 0,
            aex: 0,
            acc: 0,
            rmr: 0,
            rau: RauMode::Logical,
            m: [0; 32],
            right_instr: false,
            mod_rk: false,
            avost_disable: true,
            parity_left: false,
            parity_right: false,
            supervisor: SupervisorFlavor::Supervisor(SupervisorKind::Extracode),
            grp: 0,
            mgrp: 0,
            prp: 0,
            mprp: 0,
            rp: [0; 8],
            rz: 0,
            pult: [0; 8],
            pult_switch: 0,
            corr_stack: 0,
            bad_addr: 0,
            in_interrupt_recovery: false,
            instruction_breakpoints: Default::default(),
            read_watchpoints: Default::default(),
            write_watchpoints: Default::default(),
        };
        core.m[modifier::PSW] = (psw::MMAP_DISABLE
            | psw::PROT_DISABLE
            | psw::INTR_HALT
            | psw::CHECK_HALT
            | psw::INTR_DISABLE) as u32;
        core.m[modifier::SPSW] =
            (spsw::MMAP_DISABLE | spsw::PROT_DISABLE | spsw::EXTRACODE | spsw::INTR_DISABLE) as u32;
        core
    }

    pub fn psw(&self) -> u16 {
        self.m[modifier::PSW] as u16
    }

    pub fn set_psw(&mut self, value: u16) {
        self.m[modifier::PSW] = value as u32;
    }

    /// Writes a modifier register, applying the two invariants that hold
    /// after every write: M[0] stays zero, and IBP/DWP get bit 16 forced on
    /// while PSW.MMAP_DISABLE is set (SPEC_FULL.md section 3, invariant 2).
    pub fn write_modifier(&mut self, index: usize, value: u32) {
        let index = index & 0x1F;
        let mut value = value & ADDR_MASK as u32;
        if (index == modifier::IBP || index == modifier::DWP) && self.psw() & psw::MMAP_DISABLE != 0 {
            value |= 1 << 16;
        }
        self.m[index] = value;
        self.m[0] = 0;
    }

    pub fn clear_grp_preserving_wired(&mut self, mask: u32) {
        self.grp = (mask | grp::WIRED_BITS) & self.grp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_sets_documented_boot_mask() {
        let core = Core::reset();
        assert_eq!(
            core.psw(),
            psw::MMAP_DISABLE | psw::PROT_DISABLE | psw::INTR_HALT | psw::CHECK_HALT | psw::INTR_DISABLE
        );
        assert!(core.avost_disable);
        assert_eq!(core.supervisor, SupervisorFlavor::Supervisor(SupervisorKind::Extracode));
    }

    #[test]
    fn ibp_dwp_get_bit16_forced_on_under_mmap_disable() {
        let mut core = Core::reset();
        assert!(core.psw() & psw::MMAP_DISABLE != 0);
        core.write_modifier(modifier::IBP, 0x1234);
        assert_eq!(core.m[modifier::IBP] & (1 << 16), 1 << 16);
    }

    #[test]
    fn ibp_dwp_bit16_clear_without_mmap_disable() {
        let mut core = Core::reset();
        let psw = core.psw() & !psw::MMAP_DISABLE;
        core.set_psw(psw);
        core.write_modifier(modifier::DWP, 0x1234);
        assert_eq!(core.m[modifier::DWP] & (1 << 16), 0);
    }

    #[test]
    fn write_modifier_always_clears_m0() {
        let mut core = Core::reset();
        core.m[0] = 0o777;
        core.write_modifier(5, 3);
        assert_eq!(core.m[0], 0);
    }

    #[test]
    fn grp_clear_preserves_wired_bits() {
        let mut core = Core::reset();
        core.grp = grp::WIRED_BITS | grp::OVERFLOW;
        core.clear_grp_preserving_wired(0);
        assert_eq!(core.grp, grp::WIRED_BITS);
    }
}
