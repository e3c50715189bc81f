//! The core's single non-local exit: every MMU/arithmetic call that can fail
//! returns `Result<_, Fault>`, propagated with `?` up to the dispatcher instead
//! of the reference simulator's setjmp/longjmp.

use std::fmt;

/// A recognised stop/interrupt cause. Mirrors the reference simulator's
/// `STOP_*` table; every variant has a fixed GRP posting and halt-mask rule
/// documented alongside the dispatcher in `cpu::trap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Stop,
    Breakpoint,
    ReadWatch,
    WriteWatch,
    Runout,
    BadCmd,
    /// Carries the faulting address, latched into `Core::bad_addr` by the
    /// dispatcher before the trap engine runs.
    InsnCheck(u16),
    InsnProt(u16),
    OperandProt(u16),
    RamCheck(u16),
    CacheCheck(u16),
    Overflow,
    DivZero,
    DoubleIntr,
    UnformattedDrum,
    UnformattedDisk,
    InsnAddrMatch,
    LoadAddrMatch,
    StoreAddrMatch,
    Unimplemented,
}

impl Fault {
    /// The English row of the stop-message table (see SPEC_FULL.md section 6/7;
    /// this port does not carry the bilingual message table).
    pub fn message(&self) -> &'static str {
        use Fault::*;
        match self {
            Stop => "stop",
            Breakpoint => "breakpoint",
            ReadWatch => "read watch",
            WriteWatch => "write watch",
            Runout => "run out of memory",
            BadCmd => "invalid instruction",
            InsnCheck(_) => "instruction check",
            InsnProt(_) => "instruction protection",
            OperandProt(_) => "operand protection",
            RamCheck(_) => "RAM parity",
            CacheCheck(_) => "cache parity",
            Overflow => "arithmetic overflow",
            DivZero => "divide by zero",
            DoubleIntr => "double internal interrupt",
            UnformattedDrum => "unformatted drum",
            UnformattedDisk => "unformatted disk",
            InsnAddrMatch => "hardware breakpoint",
            LoadAddrMatch => "load watch",
            StoreAddrMatch => "store watch",
            Unimplemented => "unimplemented",
        }
    }

    /// Category used by the trap engine to decide which halt mask applies
    /// (SPEC_FULL.md section 7). `None` faults (RWATCH/WWATCH) never take the
    /// internal-interrupt path at all; they always return to the shell.
    pub fn category(&self) -> FaultCategory {
        use Fault::*;
        match self {
            BadCmd | InsnProt(_) | OperandProt(_) | InsnAddrMatch | Breakpoint => FaultCategory::Pop,
            InsnCheck(_) | RamCheck(_) | CacheCheck(_) => FaultCategory::Pok,
            Overflow | DivZero => FaultCategory::Au,
            ReadWatch | WriteWatch | StoreAddrMatch | LoadAddrMatch => FaultCategory::ShellOnly,
            Stop | Runout | DoubleIntr | UnformattedDrum | UnformattedDisk | Unimplemented => {
                FaultCategory::ShellOnly
            }
        }
    }

    /// The faulting address carried by protection/parity faults, if any.
    pub fn bad_addr(&self) -> Option<u16> {
        use Fault::*;
        match *self {
            InsnCheck(a) | InsnProt(a) | OperandProt(a) | RamCheck(a) | CacheCheck(a) => Some(a),
            _ => None,
        }
    }
}

/// The three interrupt-halt categories of SPEC_FULL.md section 7, plus a fourth,
/// `ShellOnly`, for faults the reference source never routes through
/// `op_int_1` at all (RWATCH/WWATCH step back one instruction and return
/// directly; STOP/RUNOUT/DOUBLE_INTR are always fatal to the run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    /// "halt on internal interrupt" class, gated by PSW.INTR_HALT.
    Pop,
    /// "halt on check/parity" class, gated by PSW.CHECK_HALT.
    Pok,
    /// arithmetic-unit class, gated by RUU.AVOST_DISABLE (OVFL/DIVZERO only).
    Au,
    /// Always returned to the shell; never takes the internal interrupt.
    ShellOnly,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Fault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_only_faults_never_trap() {
        assert_eq!(Fault::ReadWatch.category(), FaultCategory::ShellOnly);
        assert_eq!(Fault::WriteWatch.category(), FaultCategory::ShellOnly);
    }

    #[test]
    fn message_matches_stop_table_row() {
        assert_eq!(Fault::BadCmd.message(), "invalid instruction");
        assert_eq!(Fault::DivZero.message(), "divide by zero");
    }
}
