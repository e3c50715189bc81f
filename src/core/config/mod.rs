//! Boot-time configuration (SPEC_FULL.md section 4.9), loaded the way the
//! teacher crate loads its GUI key bindings: a `serde`-derived struct with a
//! `Default` impl, deserializable from YAML via `serde_yaml`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceLevel {
    None,
    Extracodes,
    Instructions,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The Clock's tick rate. SPEC_FULL.md section 4.7 fixes this at 250 in
    /// the reference hardware.
    pub clock_hz: u32,
    /// Ticks per SLOW_CLK assertion.
    pub slow_clock_divisor: u32,
    /// Gates the opaque trace callback's verbosity; independent of the
    /// `tracing`/`EnvFilter` log level (SPEC_FULL.md section 4.8).
    pub trace_level: TraceLevel,
    /// Boot-program selector read back at console addresses 0..7
    /// (SPEC_FULL.md section 6). 0 selects the front-panel switches.
    pub pult_switch: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config { clock_hz: 250, slow_clock_divisor: 4, trace_level: TraceLevel::None, pult_switch: 0 }
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Mirrors the shell's `set_pult` contract: 0 <= n <= 10.
    pub fn set_pult(&mut self, n: u8) -> Result<(), &'static str> {
        if n > 10 {
            return Err("pult switch out of range 0..=10");
        }
        self.pult_switch = n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_literals() {
        let cfg = Config::default();
        assert_eq!(cfg.clock_hz, 250);
        assert_eq!(cfg.slow_clock_divisor, 4);
        assert_eq!(cfg.trace_level, TraceLevel::None);
    }

    #[test]
    fn loads_from_yaml() {
        let cfg = Config::from_yaml("clock_hz: 100\nslow_clock_divisor: 2\ntrace_level: All\npult_switch: 3\n").unwrap();
        assert_eq!(cfg.clock_hz, 100);
        assert_eq!(cfg.trace_level, TraceLevel::All);
    }

    #[test]
    fn set_pult_rejects_out_of_range() {
        let mut cfg = Config::default();
        assert!(cfg.set_pult(10).is_ok());
        assert!(cfg.set_pult(11).is_err());
    }
}
