//! Fetch-decode-execute loop and opcode semantics (SPEC_FULL.md sections 4.3-4.5),
//! generalized from the teacher crate's `execute_next_instruction`/`op_functions`
//! dispatch: the non-local fault exit becomes `Result` propagation, and the
//! MIPS load-delay/branch-delay mechanics become this machine's RIGHT_INSTR
//! half-selector and single-instruction-delayed MOD_RK latch.

pub mod instruction;
pub mod trap;

use tracing::{debug, trace, warn};

use crate::core::arith::ArithmeticUnit;
use crate::core::clock::Clock;
use crate::core::cpu::instruction::{decode, Decoded, InstructionHalf, Opcode};
use crate::core::fault::Fault;
use crate::core::mmu::Mmu;
use crate::core::state::{grp, modifier, psw, Core, RauMode};
use crate::core::word::{addr_add, halves, wrap_addr};

const BIT41: u64 = 1 << 40;
const BIT48: u64 = 1 << 47;

/// A named snapshot of the register set (SPEC_FULL.md section 6), for the shell's
/// `examine`/diagnostic surface.
#[derive(Debug, Clone)]
pub struct RegisterSnapshot {
    pub pc: u16,
    pub acc: u64,
    pub rmr: u64,
    pub m: [u32; 32],
    pub grp: u32,
    pub mgrp: u32,
}

/// Owns one CPU core's architectural state and runs it against the external
/// MMU/arithmetic/clock collaborators.
pub struct Cpu {
    pub core: Core,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Cpu { core: Core::reset() }
    }

    /// Shell interface: `reset()` (SPEC_FULL.md section 6).
    pub fn reset(&mut self) {
        self.core = Core::reset();
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            pc: self.core.pc,
            acc: self.core.acc,
            rmr: self.core.rmr,
            m: self.core.m,
            grp: self.core.grp,
            mgrp: self.core.mgrp,
        }
    }

    /// Shell interface: `examine(addr)`. Addresses 0..7 read the front-panel
    /// switch bank (or a hardwired boot program) instead of main memory when
    /// `pult_switch != 0`.
    pub fn examine(&mut self, mmu: &mut dyn Mmu, addr: u16) -> Result<u64, Fault> {
        if addr < 8 && self.core.pult_switch != 0 {
            return Ok(self.core.pult[addr as usize]);
        }
        mmu.load(addr)
    }

    /// Shell interface: `deposit(addr, value)`.
    pub fn deposit(&mut self, mmu: &mut dyn Mmu, addr: u16, value: u64) -> Result<(), Fault> {
        if addr < 8 && self.core.pult_switch != 0 {
            self.core.pult[addr as usize] = value;
            return Ok(());
        }
        mmu.store(addr, value)
    }

    /// Shell interface: `request()`.
    pub fn request(&mut self) {
        self.core.grp |= grp::PANEL_REQ;
    }

    /// Shell interface: `set_pult(n)`, 0 <= n <= 10.
    pub fn set_pult(&mut self, n: u8) -> Result<(), &'static str> {
        if n > 10 {
            return Err("pult switch out of range 0..=10");
        }
        self.core.pult_switch = n;
        Ok(())
    }

    /// Shell interface: `run()`. Executes instructions until a fault halts
    /// the core (or `max_instructions` is exhausted), ticking `clock` each
    /// iteration. `trace` is the opaque per-instruction callback named in
    /// SPEC_FULL.md section 1's Non-goals; it is not the `tracing` logger.
    pub fn run(
        &mut self,
        mmu: &mut dyn Mmu,
        arith: &mut dyn ArithmeticUnit,
        clock: &mut Clock,
        mut trace: impl FnMut(&Core, &Decoded),
        max_instructions: u64,
    ) -> Fault {
        for _ in 0..max_instructions {
            for effect in clock.advance(1) {
                if effect.timer {
                    self.core.grp |= grp::TIMER;
                }
                if effect.slow_clk {
                    self.core.grp |= grp::SLOW_CLK;
                }
            }

            if self.core.pc as u32 >= crate::core::word::ADDR_SPACE && self.core.supervisor.is_supervisor() {
                return Fault::Runout;
            }

            if self.core.instruction_breakpoints.contains(&self.core.pc) {
                return Fault::Breakpoint;
            }

            if trap::maybe_take_external_interrupt(&mut self.core) {
                continue;
            }

            match self.step(mmu, arith, &mut trace) {
                Ok(()) => {
                    self.core.in_interrupt_recovery = false;
                }
                Err(fault) => {
                    if let trap::Disposition::Halted(f) = trap::dispatch_fault(&mut self.core, fault) {
                        return f;
                    }
                }
            }
        }
        Fault::Stop
    }

    fn fetch_half(&mut self, mmu: &mut dyn Mmu) -> Result<InstructionHalf, Fault> {
        let word = mmu.fetch(self.core.pc)?;
        let (left, right) = halves(word);
        let half = if self.core.right_instr { right } else { left };
        let next_pc = addr_add(self.core.pc, 1);
        if self.core.right_instr {
            self.core.pc = next_pc;
            self.core.right_instr = false;
        } else {
            self.core.right_instr = true;
        }
        Ok(InstructionHalf(half))
    }

    /// Executes exactly one instruction half.
    fn step(
        &mut self,
        mmu: &mut dyn Mmu,
        arith: &mut dyn ArithmeticUnit,
        trace: &mut impl FnMut(&Core, &Decoded),
    ) -> Result<(), Fault> {
        let half = self.fetch_half(mmu)?;
        self.core.rk = half.0;
        let mut decoded = decode(half);

        if self.core.mod_rk {
            self.core.mod_rk = false;
            decoded.address = addr_add(decoded.address, self.core.m[modifier::MOD] as u16);
        }
        self.core.corr_stack = 0;

        trace(&self.core, &decoded);
        trace!(pc = self.core.pc, opcode = ?decoded.opcode, "decoded instruction");

        self.execute(mmu, arith, decoded)
    }

    fn effective_address(&self, register: u8) -> u16 {
        addr_add(0, self.core.m[register as usize & 0xF] as u16)
    }

    fn aex_of(&self, register: u8, address: u16) -> u16 {
        addr_add(address, self.core.m[register as usize & 0xF] as u16)
    }

    /// Resolves the operand address for the "arithmetic with operand" group,
    /// applying the stack-autopop rule (SPEC_FULL.md section 4.5) without
    /// committing M[15] until the load has actually succeeded (the "cleaner
    /// strategy" adopted over the reference source's eager-decrement one;
    /// see DESIGN.md).
    fn resolve_operand(
        &mut self,
        mmu: &mut dyn Mmu,
        register: u8,
        address: u16,
    ) -> Result<(u16, u64), Fault> {
        let autopop = address == 0 && register == 0o17;
        let eff = if autopop {
            addr_add(self.core.m[0o17] as u16, wrap_addr((-1i32) as u32))
        } else {
            self.aex_of(register, address)
        };
        let word = mmu.load(eff)?;
        if autopop {
            self.core.m[0o17] = eff as u32;
            self.core.corr_stack = 1;
        }
        self.core.aex = eff;
        Ok((eff, word))
    }

    fn push_stack(&mut self, mmu: &mut dyn Mmu, value: u64) -> Result<(), Fault> {
        let new_sp = addr_add(self.core.m[0o17] as u16, 1);
        mmu.store(new_sp, value)?;
        self.core.m[0o17] = new_sp as u32;
        self.core.corr_stack = -1;
        Ok(())
    }

    /// Raw RAU bit pattern as the hardware register would carry it, needed
    /// by `rte`'s `(RAU & Aex) >> into-exponent` formula (`rau_is_zero` and
    /// the rest of the core only ever need the 3-way mode, not these bits).
    fn rau_bits(&self) -> u8 {
        match self.core.rau {
            RauMode::Logical => 0b001,
            RauMode::Additive => 0b010,
            RauMode::Multiplicative => 0b100,
        }
    }

    fn rau_is_zero(&self) -> bool {
        match self.core.rau {
            RauMode::Additive => self.core.acc & BIT41 == 0,
            RauMode::Multiplicative => self.core.acc & BIT48 != 0,
            RauMode::Logical => self.core.acc == 0,
        }
    }

    fn apply_vtm_utm_mask(&mut self, register: u8, mask_source: u16) {
        if self.core.supervisor.is_supervisor() && register == 0 {
            let bits = psw::INTR_DISABLE | psw::MMAP_DISABLE | psw::PROT_DISABLE;
            let psw = (self.core.psw() & !bits) | (mask_source & bits);
            self.core.set_psw(psw);
        }
    }

    fn require_supervisor(&self) -> Result<(), Fault> {
        if self.core.supervisor.is_supervisor() {
            Ok(())
        } else {
            Err(Fault::BadCmd)
        }
    }

    fn execute(&mut self, mmu: &mut dyn Mmu, arith: &mut dyn ArithmeticUnit, d: Decoded) -> Result<(), Fault> {
        use Opcode::*;
        let reg = d.register;
        let addr = d.address;
        match d.opcode {
            Atx => {
                let eff = self.aex_of(reg, addr);
                mmu.store(eff, self.core.acc)?;
                self.core.aex = eff;
                if addr == 0 && reg == 0o17 {
                    self.core.m[0o17] = addr_add(self.core.m[0o17] as u16, 1) as u32;
                }
                self.core.rau = RauMode::Logical;
            }
            Stx => {
                let eff = self.aex_of(reg, addr);
                mmu.store(eff, self.core.acc)?;
                self.core.aex = eff;
                let (_, popped) = self.resolve_operand(mmu, 0o17, 0)?;
                self.core.acc = popped;
                self.core.rau = RauMode::Logical;
            }
            Xts => {
                self.push_stack(mmu, self.core.acc)?;
                let eff = self.aex_of(reg, addr);
                self.core.acc = mmu.load(eff)?;
                self.core.aex = eff;
                self.core.rau = RauMode::Logical;
            }
            Xta => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.acc = w;
                self.core.rau = RauMode::Logical;
            }
            Aax => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.acc &= w;
                self.core.rmr = 0;
                self.core.rau = RauMode::Logical;
            }
            Aox => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.acc |= w;
                self.core.rmr = 0;
                self.core.rau = RauMode::Logical;
            }
            Aex => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.rmr = self.core.acc;
                self.core.acc ^= w;
                self.core.rau = RauMode::Logical;
            }
            APlusX => self.op_signed_add(mmu, arith, reg, addr, false, false)?,
            AMinusX => self.op_signed_add(mmu, arith, reg, addr, false, true)?,
            XMinusA => self.op_signed_add(mmu, arith, reg, addr, true, false)?,
            Amx => self.op_signed_add(mmu, arith, reg, addr, true, true)?,
            AMulX => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                let (acc, rmr) = arith.multiply(self.core.acc, w);
                self.core.acc = acc;
                self.core.rmr = rmr;
                self.core.rau = RauMode::Multiplicative;
            }
            ADivX => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                let (acc, rmr) = arith.divide(self.core.acc, self.core.rmr, w)?;
                self.core.acc = acc;
                self.core.rmr = rmr;
                self.core.rau = RauMode::Multiplicative;
            }
            Avx => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.acc = arith.change_sign(self.core.acc, w);
                self.core.rau = RauMode::Additive;
            }
            Arx => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.acc = arith.add_end_around(self.core.acc, w);
                self.core.rau = RauMode::Additive;
            }
            EPlusX => self.op_exponent_by_operand(mmu, arith, reg, addr, false)?,
            EMinusX => self.op_exponent_by_operand(mmu, arith, reg, addr, true)?,
            Asx => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                let shift = (((w >> 41) & 0x7F) as i8) - 64;
                let (acc, rmr) = arith.shift(self.core.acc, self.core.rmr, shift);
                self.core.acc = acc;
                self.core.rmr = rmr;
                self.core.rau = RauMode::Additive;
            }
            Xtr => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.rau = RauMode::Logical;
                self.core.acc = (w >> 41) & 0o77;
            }
            Acx => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                let n = arith.count_ones(self.core.acc);
                self.core.acc = arith.add_end_around(n as u64, w);
            }
            Anx => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                match arith.highest_bit(self.core.acc) {
                    Some(n) => {
                        self.core.rmr = self.core.acc;
                        self.core.acc = arith.add_end_around(n as u64, w);
                    }
                    None => {
                        self.core.rmr = 0;
                        self.core.acc = w;
                    }
                }
            }
            Apx => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.acc = arith.pack(self.core.acc, w);
                self.core.rmr = 0;
                self.core.rau = RauMode::Logical;
            }
            Aux => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.acc = arith.unpack(self.core.acc, w);
                self.core.rmr = 0;
                self.core.rau = RauMode::Logical;
            }
            EPlusN => self.op_exponent_by_immediate(arith, addr, false),
            EMinusN => self.op_exponent_by_immediate(arith, addr, true),
            Asn => {
                let shift = ((addr & 0x7F) as i8) - 64;
                let (acc, rmr) = arith.shift(self.core.acc, self.core.rmr, shift);
                self.core.acc = acc;
                self.core.rmr = rmr;
            }
            Ntr => {
                self.core.rau = RauMode::Logical;
                self.core.acc = (addr & 0o77) as u64;
            }
            Rte => {
                let eff = self.aex_of(reg, addr);
                self.core.aex = eff;
                self.core.acc = ((self.core.rau_bits() as u64) & (eff as u64) & 0o177) << 41;
                self.core.rau = RauMode::Logical;
            }
            Yta => {
                if self.core.rau == RauMode::Logical {
                    self.core.acc = self.core.rmr;
                } else {
                    let high = self.core.acc & !((1u64 << 41) - 1);
                    let new_acc = high | (self.core.rmr & ((1u64 << 41) - 1));
                    self.core.rmr = self.core.acc;
                    self.core.acc = new_acc;
                }
            }
            Zpp | Szp | Sop => {
                self.require_supervisor()?;
                return Err(Fault::Unimplemented);
            }
            Ati => {
                let eff = self.aex_of(reg, addr);
                let mask = if self.core.supervisor.is_supervisor() { 0x1F } else { 0xF };
                let index = eff & mask;
                self.core.write_modifier(index as usize, (self.core.acc & 0x7FFF) as u32);
            }
            Sti => {
                let eff = self.aex_of(reg, addr);
                let mask = if self.core.supervisor.is_supervisor() { 0x1F } else { 0xF };
                let index = eff & mask;
                self.core.write_modifier(index as usize, (self.core.acc & 0x7FFF) as u32);
                let (_, popped) = self.resolve_operand(mmu, 0o17, 0)?;
                self.core.acc = popped;
            }
            Ita => {
                let eff = self.aex_of(reg, addr);
                let mask = if self.core.supervisor.is_supervisor() { 0x1F } else { 0xF };
                let index = eff & mask;
                self.core.acc = self.core.m[index as usize] as u64;
            }
            Its => {
                self.push_stack(mmu, self.core.acc)?;
                let eff = self.aex_of(reg, addr);
                let mask = if self.core.supervisor.is_supervisor() { 0x1F } else { 0xF };
                let index = eff & mask;
                self.core.acc = self.core.m[index as usize] as u64;
            }
            Mtj => {
                let mask = if self.core.supervisor.is_supervisor() { 0x1F } else { 0xF };
                let index = addr & mask;
                self.core.write_modifier(index as usize, self.core.m[reg as usize & 0xF]);
            }
            JPlusM => {
                if addr & 0x10 != 0 && self.core.supervisor.is_supervisor() {
                    let index = addr & 0x1F;
                    self.core.write_modifier(index as usize, self.core.m[reg as usize & 0xF]);
                } else {
                    let index = (addr & 0xF) as usize;
                    let sum = addr_add(self.core.m[index] as u16, self.core.m[reg as usize & 0xF] as u16);
                    self.core.write_modifier(index, sum as u32);
                }
            }
            V47 => {
                self.require_supervisor()?;
                let index = (addr & 0xF) as usize;
                let sum = addr_add(self.core.m[index] as u16, addr);
                self.core.write_modifier(index, sum as u32);
            }
            Mod => {
                self.require_supervisor()?;
                self.op_mod(mmu, addr)?;
            }
            Extracode(raw) => {
                let next_pc = self.core.pc;
                trap::enter_extracode(&mut self.core, reg, addr, raw, next_pc);
            }
            Utc => {
                self.core.m[modifier::MOD] = self.aex_of(reg, addr) as u32;
                self.core.mod_rk = true;
            }
            Wtc => {
                let (_, w) = self.resolve_operand(mmu, reg, addr)?;
                self.core.m[modifier::MOD] = (w & 0x7FFF) as u32;
                self.core.mod_rk = true;
            }
            Vtm => {
                self.core.m[reg as usize & 0xF] = addr as u32;
                self.apply_vtm_utm_mask(reg, addr);
            }
            Utm => {
                let eff = self.aex_of(reg, addr);
                self.core.m[reg as usize & 0xF] = eff as u32;
                self.apply_vtm_utm_mask(reg, addr);
            }
            Uza => {
                self.core.rmr = self.core.acc;
                if !self.rau_is_zero() {
                    self.core.pc = self.aex_of(reg, addr);
                    self.core.right_instr = false;
                }
            }
            U1a => {
                self.core.rmr = self.core.acc;
                if self.rau_is_zero() {
                    self.core.pc = self.aex_of(reg, addr);
                    self.core.right_instr = false;
                }
            }
            Uj => {
                self.core.pc = self.aex_of(reg, addr);
                self.core.right_instr = false;
            }
            Vjm => {
                self.core.m[reg as usize & 0xF] = self.core.pc as u32;
                self.core.pc = addr;
                self.core.right_instr = false;
            }
            Iret => {
                trap::interrupt_return(&mut self.core, reg)?;
            }
            Stop => {
                if self.core.supervisor.is_supervisor() {
                    return Err(Fault::Stop);
                }
                if self.core.psw() & psw::CHECK_HALT == 0 {
                    let next_pc = self.core.pc;
                    trap::enter_extracode(&mut self.core, 0, 0, 0o63, next_pc);
                }
            }
            Vzm => {
                if self.core.m[reg as usize & 0xF] == 0 {
                    self.core.pc = addr;
                    self.core.right_instr = false;
                }
            }
            V1m => {
                if self.core.m[reg as usize & 0xF] != 0 {
                    self.core.pc = addr;
                    self.core.right_instr = false;
                }
            }
            Vlm => {
                let index = reg as usize & 0xF;
                if self.core.m[index] != 0 {
                    self.core.m[index] = addr_add(self.core.m[index] as u16, 1) as u32;
                    self.core.pc = addr;
                    self.core.right_instr = false;
                }
            }
        }
        Ok(())
    }

    fn op_signed_add(
        &mut self,
        mmu: &mut dyn Mmu,
        arith: &mut dyn ArithmeticUnit,
        reg: u8,
        addr: u16,
        sign_acc: bool,
        sign_operand: bool,
    ) -> Result<(), Fault> {
        let (_, w) = self.resolve_operand(mmu, reg, addr)?;
        self.core.acc = arith.add(self.core.acc, w, sign_acc, sign_operand)?;
        self.core.rau = RauMode::Additive;
        Ok(())
    }

    fn op_exponent_by_operand(
        &mut self,
        mmu: &mut dyn Mmu,
        arith: &mut dyn ArithmeticUnit,
        reg: u8,
        addr: u16,
        negate: bool,
    ) -> Result<(), Fault> {
        let (_, w) = self.resolve_operand(mmu, reg, addr)?;
        let delta = ((w >> 41) & 0x7F) as i8;
        let delta = if negate { -delta } else { delta };
        self.core.acc = arith.add_exponent(self.core.acc, delta);
        self.core.rau = RauMode::Additive;
        Ok(())
    }

    fn op_exponent_by_immediate(&mut self, arith: &mut dyn ArithmeticUnit, addr: u16, negate: bool) {
        let delta = (addr & 0x7F) as i8;
        let delta = if negate { -delta } else { delta };
        self.core.acc = arith.add_exponent(self.core.acc, delta);
    }

    /// `mod` (opcode 002, "рег"). Supervisor-only register-file poke; see
    /// SPEC_FULL.md section 4.5's sub-address contract for the full table.
    fn op_mod(&mut self, mmu: &mut dyn Mmu, addr: u16) -> Result<(), Fault> {
        let sub = addr & 0o377;
        match sub {
            0..=0o7 => {
                debug!(line = sub, "mod: cache/БРЗ write (no-op, no cache model)");
            }
            0o200..=0o207 => {
                self.core.acc = 0;
                self.core.rau = RauMode::Logical;
            }
            0o20..=0o27 => mmu.set_rp((sub & 7) as u8, self.core.acc),
            0o30..=0o33 => mmu.set_protection((sub & 3) as u8, self.core.acc),
            0o36 => self.core.mgrp = (self.core.acc & 0xFFFF_FFFF) as u32,
            0o37 => self.core.clear_grp_preserving_wired((self.core.acc & 0xFFFF_FFFF) as u32),
            0o237 => {
                self.core.acc = self.core.grp as u64;
                self.core.rau = RauMode::Logical;
            }
            0o100..=0o137 => {
                self.core.avost_disable = addr & 1 != 0;
                self.core.parity_right = addr & 2 != 0;
                self.core.parity_left = addr & 4 != 0;
            }
            _ => {
                warn!(sub_address = sub, "mod: undefined sub-address");
                return Err(Fault::Unimplemented);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::SupervisorFlavor;

    struct FlatMemory {
        cells: [u64; 1 << 15],
    }

    impl FlatMemory {
        fn new() -> Self {
            FlatMemory { cells: [0; 1 << 15] }
        }
    }

    impl Mmu for FlatMemory {
        fn fetch(&mut self, addr: u16) -> Result<u64, Fault> {
            Ok(self.cells[addr as usize])
        }
        fn load(&mut self, addr: u16) -> Result<u64, Fault> {
            Ok(self.cells[addr as usize])
        }
        fn store(&mut self, addr: u16, word: u64) -> Result<(), Fault> {
            self.cells[addr as usize] = word & crate::core::word::WORD_MASK;
            Ok(())
        }
        fn set_rp(&mut self, _index: u8, _value: u64) {}
        fn set_protection(&mut self, _index: u8, _value: u64) {}
    }

    struct SimpleArith;

    impl ArithmeticUnit for SimpleArith {
        fn add(&mut self, acc: u64, operand: u64, sign_acc: bool, sign_operand: bool) -> Result<u64, Fault> {
            let a = if sign_acc { acc.wrapping_neg() } else { acc };
            let b = if sign_operand { operand.wrapping_neg() } else { operand };
            Ok((a.wrapping_add(b)) & crate::core::word::WORD_MASK)
        }
        fn multiply(&mut self, acc: u64, operand: u64) -> (u64, u64) {
            (acc.wrapping_mul(operand) & crate::core::word::WORD_MASK, 0)
        }
        fn divide(&mut self, acc: u64, _rmr: u64, operand: u64) -> Result<(u64, u64), Fault> {
            if operand == 0 {
                return Err(Fault::DivZero);
            }
            Ok((acc / operand, acc % operand))
        }
        fn add_end_around(&mut self, acc: u64, operand: u64) -> u64 {
            (acc.wrapping_add(operand)) & crate::core::word::WORD_MASK
        }
        fn change_sign(&mut self, acc: u64, _operand: u64) -> u64 {
            acc
        }
        fn add_exponent(&mut self, acc: u64, _delta: i8) -> u64 {
            acc
        }
        fn shift(&mut self, acc: u64, rmr: u64, _n: i8) -> (u64, u64) {
            (acc, rmr)
        }
        fn count_ones(&mut self, acc: u64) -> u32 {
            acc.count_ones()
        }
        fn highest_bit(&mut self, acc: u64) -> Option<u32> {
            if acc == 0 {
                None
            } else {
                Some(63 - acc.leading_zeros())
            }
        }
        fn pack(&mut self, acc: u64, _operand: u64) -> u64 {
            acc
        }
        fn unpack(&mut self, acc: u64, _operand: u64) -> u64 {
            acc
        }
    }

    fn no_trace(_: &Core, _: &Decoded) {}

    #[test]
    fn s1_autopop_and_add() {
        let mut mem = FlatMemory::new();
        let mut arith = SimpleArith;
        let mut cpu = Cpu::new();
        cpu.core.supervisor = SupervisorFlavor::User;
        cpu.core.set_psw(0);
        cpu.core.acc = 0;
        cpu.core.m[0o17] = 0o100;
        mem.cells[0o77] = 5;
        // opcode 004 (a+x), register 017, address 0, left half.
        let instr = (0o04u32 << 12) | (0o17u32 << 20);
        mem.cells[0] = (instr as u64) << 24;

        let result = cpu.step(&mut mem, &mut arith, &mut no_trace);
        assert!(result.is_ok());
        assert_eq!(cpu.core.m[0o17], 0o77);
        assert_eq!(cpu.core.acc, 5);
        assert_eq!(cpu.core.rau, RauMode::Additive);
        assert_eq!(cpu.core.corr_stack, 1);
    }

    #[test]
    fn s2_uza_branch_on_zero() {
        let mut mem = FlatMemory::new();
        let mut arith = SimpleArith;
        let mut cpu = Cpu::new();
        cpu.core.acc = 0;
        cpu.core.rau = RauMode::Logical;
        // uza (long format, opcode 0260), address 0200.
        let instr = (1u32 << 20) | (0o260u32 << 12) | 0o200;
        mem.cells[0] = (instr as u64) << 24;

        cpu.step(&mut mem, &mut arith, &mut no_trace).unwrap();
        assert_eq!(cpu.core.pc, 0o200);
        assert!(!cpu.core.right_instr);
        assert_eq!(cpu.core.rmr, 0);
    }

    #[test]
    fn badcmd_on_supervisor_only_opcode_in_user_mode() {
        let mut mem = FlatMemory::new();
        let mut arith = SimpleArith;
        let mut cpu = Cpu::new();
        cpu.core.supervisor = SupervisorFlavor::User;
        // mod (opcode 002), left half.
        let instr = 0o02u32 << 12;
        mem.cells[0] = (instr as u64) << 24;

        let result = cpu.step(&mut mem, &mut arith, &mut no_trace);
        assert_eq!(result, Err(Fault::BadCmd));
    }

    #[test]
    fn atx_then_xta_restores_acc() {
        let mut mem = FlatMemory::new();
        let mut arith = SimpleArith;
        let mut cpu = Cpu::new();
        cpu.core.supervisor = SupervisorFlavor::Supervisor(crate::core::state::SupervisorKind::Extracode);
        cpu.core.acc = 0o1234_5670;
        let atx = 0o00u32 << 12;
        mem.cells[0] = (atx as u64) << 24;
        cpu.step(&mut mem, &mut arith, &mut no_trace).unwrap();
        let stored = mem.cells[0];
        cpu.core.acc = 0;
        let xta = 0o10u32 << 12;
        mem.cells[1] = (xta as u64) << 24;
        cpu.step(&mut mem, &mut arith, &mut no_trace).unwrap();
        assert_eq!(cpu.core.acc, stored);
        assert_eq!(cpu.core.acc, 0o1234_5670);
    }

    #[test]
    fn aex_twice_restores_acc() {
        let mut mem = FlatMemory::new();
        let mut arith = SimpleArith;
        let mut cpu = Cpu::new();
        cpu.core.acc = 0o5555_5555;
        mem.cells[0o10] = 0o3333_3333;
        let aex = (0o12u32 << 12) | 0o10;
        mem.cells[0] = (aex as u64) << 24;
        mem.cells[1] = (aex as u64) << 24;
        let original = cpu.core.acc;
        cpu.step(&mut mem, &mut arith, &mut no_trace).unwrap();
        cpu.step(&mut mem, &mut arith, &mut no_trace).unwrap();
        assert_eq!(cpu.core.acc, original);
    }

    #[test]
    fn uza_skips_iff_u1a_branches_exhaustive() {
        let modes = [RauMode::Logical, RauMode::Additive, RauMode::Multiplicative];
        let values: [u64; 3] = [0, BIT41, BIT48];
        for &mode in &modes {
            for &acc in &values {
                let mut mem = FlatMemory::new();
                let mut arith = SimpleArith;
                let mut cpu_a = Cpu::new();
                cpu_a.core.acc = acc;
                cpu_a.core.rau = mode;
                let instr = (1u32 << 20) | (0o260u32 << 12) | 0o1;
                mem.cells[0] = (instr as u64) << 24;
                cpu_a.step(&mut mem, &mut arith, &mut no_trace).unwrap();
                let uza_branched = cpu_a.core.pc == 1;

                let mut mem2 = FlatMemory::new();
                let mut cpu_b = Cpu::new();
                cpu_b.core.acc = acc;
                cpu_b.core.rau = mode;
                let instr2 = (1u32 << 20) | (0o270u32 << 12) | 0o1;
                mem2.cells[0] = (instr2 as u64) << 24;
                cpu_b.step(&mut mem2, &mut arith, &mut no_trace).unwrap();
                let u1a_branched = cpu_b.core.pc == 1;

                assert_eq!(!uza_branched, u1a_branched, "mode={:?} acc={:#x}", mode, acc);
            }
        }
    }

    #[test]
    fn mod_037_clears_grp_preserving_wired_bits() {
        let mut mem = FlatMemory::new();
        let mut arith = SimpleArith;
        let mut cpu = Cpu::new();
        cpu.core.supervisor = SupervisorFlavor::Supervisor(crate::core::state::SupervisorKind::Extracode);
        cpu.core.grp = grp::WIRED_BITS | grp::OVERFLOW;
        cpu.core.acc = 0;
        let instr = (0o02u32 << 12) | 0o37;
        mem.cells[0] = (instr as u64) << 24;
        cpu.step(&mut mem, &mut arith, &mut no_trace).unwrap();
        assert_eq!(cpu.core.grp, grp::WIRED_BITS);
    }

    #[test]
    fn mod_undefined_sub_address_is_unimplemented() {
        let mut mem = FlatMemory::new();
        let mut arith = SimpleArith;
        let mut cpu = Cpu::new();
        cpu.core.supervisor = SupervisorFlavor::Supervisor(crate::core::state::SupervisorKind::Extracode);
        let instr = (0o02u32 << 12) | 0o10; // no sub-range covers 010..017
        mem.cells[0] = (instr as u64) << 24;
        let result = cpu.step(&mut mem, &mut arith, &mut no_trace);
        assert_eq!(result, Err(Fault::Unimplemented));
    }
}
