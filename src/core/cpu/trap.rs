//! Internal-interrupt, external-interrupt, extracode-entry, and
//! interrupt-return sequences (SPEC_FULL.md section 4.6), grounded in the
//! teacher crate's `Cop0::do_exception` pattern generalized from MIPS'
//! single exception vector to this machine's three distinct entry points.

use crate::core::fault::{Fault, FaultCategory};
use crate::core::state::{grp, modifier, psw, spsw, Core, SupervisorFlavor, SupervisorKind};
use crate::core::word::{addr_add, wrap_addr};

/// Disposition chosen by `dispatch_fault`: either the fault propagates to
/// the shell (simulation stops), or the internal-interrupt sequence ran and
/// execution resumes at the trap vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Halted(Fault),
    Trapped,
}

/// GRP bit posted for a given internal-interrupt-capable fault
/// (SPEC_FULL.md section 4.6 step 5). `ShellOnly` faults never reach this.
fn grp_bit(fault: &Fault) -> u32 {
    use Fault::*;
    match fault {
        BadCmd => grp::ILL_INSN,
        InsnCheck(_) => grp::INSN_CHECK | grp::CHECK,
        InsnProt(_) => grp::INSN_PROT,
        OperandProt(_) => grp::OPRND_PROT,
        RamCheck(_) => grp::RAM_CHECK | grp::CHECK,
        CacheCheck(_) => grp::CHECK,
        Breakpoint => grp::BREAKPOINT,
        InsnAddrMatch => grp::BREAKPOINT,
        Overflow => grp::OVERFLOW,
        DivZero => grp::DIVZERO,
        _ => 0,
    }
}

/// Captures SPSW from the current PSW/supervisor-flavor/RIGHT_INSTR/MOD_RK
/// state -- the common preamble of `op_int_1`/`op_int_2`/extracode entry.
fn capture_spsw(core: &mut Core) -> u16 {
    let mut bits = (core.psw() & psw::MODIFIABLE_MASK) as u16;
    bits |= core.supervisor.to_spsw_bits();
    if core.right_instr {
        bits |= spsw::RIGHT_INSTR;
    }
    if core.mod_rk {
        bits |= spsw::MOD_RK;
        core.mod_rk = false;
    }
    bits
}

/// `op_int_1`: internal-interrupt entry. Runs only after `dispatch_fault`
/// has decided the halt mask does not apply.
fn enter_internal_interrupt(core: &mut Core, fault: &Fault) {
    let spsw_bits = capture_spsw(core);
    core.m[modifier::SPSW] = spsw_bits as u32;
    core.m[modifier::IRET] = core.pc as u32;
    core.set_psw(core.psw() | psw::INTR_DISABLE | psw::MMAP_DISABLE | psw::PROT_DISABLE);
    core.pc = 0o500;
    core.right_instr = false;
    core.supervisor = SupervisorFlavor::Supervisor(SupervisorKind::Interrupt);

    core.grp |= grp_bit(fault);
    if let Some(addr) = fault.bad_addr() {
        core.bad_addr = addr;
    }

    // A protection/watchpoint/breakpoint fault discovered mid-pair must
    // resume, via `iret`, at the half *following* the faulting one.
    if matches!(fault, Fault::OperandProt(_) | Fault::Breakpoint | Fault::InsnAddrMatch) {
        core.m[modifier::SPSW] |= spsw::NEXT_RK as u32;
    }
}

/// `op_int_2`: external-interrupt entry. Unlike the internal path, RIGHT_INSTR
/// is not captured into SPSW and no GRP bit is posted (the hardware source
/// already set it).
fn enter_external_interrupt(core: &mut Core) {
    let mut bits = (core.psw() & psw::MODIFIABLE_MASK) as u16;
    bits |= core.supervisor.to_spsw_bits();
    if core.mod_rk {
        bits |= spsw::MOD_RK;
        core.mod_rk = false;
    }
    core.m[modifier::SPSW] = bits as u32;
    core.m[modifier::IRET] = core.pc as u32;
    core.set_psw(core.psw() | psw::INTR_DISABLE | psw::MMAP_DISABLE | psw::PROT_DISABLE);
    core.pc = 0o501;
    core.right_instr = false;
    core.supervisor = SupervisorFlavor::Supervisor(SupervisorKind::Interrupt);
}

/// Applies SPEC_FULL.md section 7's disposition policy to a fault raised by
/// `cpu::exec`. Rolls back `corr_stack` first (the autopop/-push
/// correction), then either halts (returning the fault to the shell) or
/// enters the internal interrupt and resumes.
pub fn dispatch_fault(core: &mut Core, fault: Fault) -> Disposition {
    if core.corr_stack != 0 {
        let stack = addr_add(core.m[modifier::STACK] as u16, wrap_addr(core.corr_stack as i32 as u32));
        core.m[modifier::STACK] = stack as u32;
        core.corr_stack = 0;
    }

    if core.in_interrupt_recovery {
        return Disposition::Halted(Fault::DoubleIntr);
    }

    let halts = match fault.category() {
        FaultCategory::Pop => core.psw() & psw::INTR_HALT != 0,
        FaultCategory::Pok => core.psw() & psw::CHECK_HALT != 0,
        FaultCategory::Au => core.avost_disable,
        FaultCategory::ShellOnly => true,
    };

    if halts {
        return Disposition::Halted(fault);
    }

    core.in_interrupt_recovery = true;
    enter_internal_interrupt(core, &fault);
    Disposition::Trapped
}

/// Samples GRP & MGRP and, if an external interrupt is pending and takeable
/// (RIGHT_INSTR clear, INTR_DISABLE clear), enters it (SPEC_FULL.md section 4.4
/// step 5).
pub fn maybe_take_external_interrupt(core: &mut Core) -> bool {
    if core.right_instr || core.psw() & psw::INTR_DISABLE != 0 {
        return false;
    }
    if core.grp & core.mgrp == 0 {
        return false;
    }
    enter_external_interrupt(core);
    true
}

/// Extracode entry (opcodes 050..077, 0200, 0210). `raw_opcode` is the
/// number carried by `Opcode::Extracode`.
pub fn enter_extracode(core: &mut Core, register: u8, address: u16, raw_opcode: u8, next_pc: u16) {
    let aex = addr_add(address, core.m[register as usize & 0xF] as u16);
    core.aex = aex;
    core.m[modifier::ERET] = next_pc as u32;
    let mut spsw_bits = (core.psw() & psw::MODIFIABLE_MASK) as u16;
    spsw_bits |= core.supervisor.to_spsw_bits();
    core.m[modifier::SPSW] = spsw_bits as u32;
    core.set_psw(psw::INTR_DISABLE | psw::MMAP_DISABLE | psw::PROT_DISABLE | psw::INTR_HALT);
    core.m[14] = aex as u32;
    core.supervisor = SupervisorFlavor::Supervisor(SupervisorKind::Extracode);
    core.pc = if raw_opcode <= 0o77 {
        0o500 + raw_opcode as u16
    } else {
        0o540 + (raw_opcode as u16 >> 3)
    };
    core.right_instr = false;
}

/// `iret` (opcode 0320, supervisor-only). Restores PC/PSW/RIGHT_INSTR/
/// supervisor flavor/MOD_RK from SPSW.
pub fn interrupt_return(core: &mut Core, register: u8) -> Result<(), Fault> {
    if !core.supervisor.is_supervisor() {
        return Err(Fault::BadCmd);
    }
    let spsw = core.m[modifier::SPSW] as u16;
    let restored_psw = (spsw & (spsw::INTR_DISABLE | spsw::MMAP_DISABLE | spsw::PROT_DISABLE))
        | (core.psw() & psw::WRITE_WATCH);
    core.set_psw(restored_psw);
    let eret_iret_index = 0o32 | (register as usize & 3);
    core.pc = core.m[eret_iret_index] as u16;
    core.right_instr = spsw & spsw::RIGHT_INSTR != 0;
    core.supervisor = SupervisorFlavor::from_spsw_bits(spsw);
    core.mod_rk = spsw & spsw::MOD_RK != 0;
    core.in_interrupt_recovery = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracode_050_matches_s3_scenario() {
        let mut core = Core::reset();
        core.supervisor = SupervisorFlavor::User;
        core.set_psw(0);
        core.pc = 0o101; // left half of 0100
        core.right_instr = true;
        core.m[14] = 0;
        enter_extracode(&mut core, 0, 7, 0o50, 0o101);
        assert_eq!(core.m[modifier::ERET], 0o101);
        assert_eq!(core.m[14], 7);
        assert_eq!(core.pc, 0o550);
        assert!(!core.right_instr);
        assert_eq!(core.supervisor, SupervisorFlavor::Supervisor(SupervisorKind::Extracode));
        assert_eq!(core.psw(), psw::INTR_DISABLE | psw::MMAP_DISABLE | psw::PROT_DISABLE | psw::INTR_HALT);
    }

    #[test]
    fn extracode_vector_for_long_format_opcode() {
        let mut core = Core::reset();
        enter_extracode(&mut core, 0, 0, 0o200, 0);
        assert_eq!(core.pc, 0o540);
        let mut core2 = Core::reset();
        enter_extracode(&mut core2, 0, 0, 0o210, 0);
        assert_eq!(core2.pc, 0o541);
    }

    #[test]
    fn internal_interrupt_then_iret_round_trips_s4() {
        let mut core = Core::reset();
        core.supervisor = SupervisorFlavor::User;
        core.set_psw(0);
        core.pc = 0o101;
        core.right_instr = true;
        enter_extracode(&mut core, 0, 7, 0o50, 0o101);
        let saved_eret = core.m[modifier::ERET];
        let disposition = interrupt_return(&mut core, 0);
        assert!(disposition.is_ok());
        assert_eq!(core.pc, saved_eret as u16);
        assert_eq!(core.supervisor, SupervisorFlavor::User);
        assert_eq!(core.psw(), 0);
    }

    #[test]
    fn iret_in_user_mode_is_badcmd() {
        let mut core = Core::reset();
        core.supervisor = SupervisorFlavor::User;
        assert_eq!(interrupt_return(&mut core, 0), Err(Fault::BadCmd));
    }

    #[test]
    fn badcmd_halts_after_reset_matches_s5() {
        let mut core = Core::reset();
        // reset() leaves PSW.INTR_HALT set, so BADCMD returns to the shell.
        let disposition = dispatch_fault(&mut core, Fault::BadCmd);
        assert_eq!(disposition, Disposition::Halted(Fault::BadCmd));
    }

    #[test]
    fn overflow_traps_when_avost_disable_clear() {
        let mut core = Core::reset();
        core.set_psw(0);
        core.avost_disable = false;
        let disposition = dispatch_fault(&mut core, Fault::Overflow);
        assert_eq!(disposition, Disposition::Trapped);
        assert_eq!(core.pc, 0o500);
        assert_eq!(core.grp & grp::OVERFLOW, grp::OVERFLOW);
    }

    #[test]
    fn second_fault_before_user_instruction_is_double_intr() {
        let mut core = Core::reset();
        core.set_psw(0);
        core.avost_disable = false;
        assert_eq!(dispatch_fault(&mut core, Fault::Overflow), Disposition::Trapped);
        assert_eq!(dispatch_fault(&mut core, Fault::DivZero), Disposition::Halted(Fault::DoubleIntr));
    }

    #[test]
    fn shell_only_faults_always_halt_even_unmasked() {
        let mut core = Core::reset();
        core.set_psw(0);
        assert_eq!(dispatch_fault(&mut core, Fault::ReadWatch), Disposition::Halted(Fault::ReadWatch));
    }

    #[test]
    fn clock_vs_external_interrupt_matches_s6() {
        let mut core = Core::reset();
        core.set_psw(0);
        core.right_instr = false;
        core.mgrp = grp::TIMER;
        core.grp = grp::TIMER;
        assert!(maybe_take_external_interrupt(&mut core));
        assert_eq!(core.pc, 0o501);
    }
}
