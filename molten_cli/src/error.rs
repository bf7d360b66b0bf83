//! Error rendering and exit-code mapping.
//!
//! The guest's exit code passes through unchanged; launcher failures use
//! codes a shell script can tell apart: usage errors, load/translation
//! failures, and runtime traps are all distinct.

use molten_core::{EngineError, Trap};
use std::process::ExitCode;

// =============================================================================
// Exit Codes
// =============================================================================

/// Successful execution with guest exit code zero.
pub const EXIT_SUCCESS: u8 = 0;
/// Command-line usage error (bad flags, missing file).
pub const EXIT_USAGE_ERROR: u8 = 2;
/// The module failed to load, link or translate.
pub const EXIT_LOAD_ERROR: u8 = 65;
/// The guest trapped at run time.
pub const EXIT_TRAP: u8 = 70;

// =============================================================================
// Rendering
// =============================================================================

/// Report a load-time failure on stderr and return its exit code.
pub fn report_load_error(error: &EngineError, path: &str) -> ExitCode {
    eprintln!("molten: cannot load {path}: {error}");
    ExitCode::from(EXIT_LOAD_ERROR)
}

/// Report a runtime trap on stderr and return its exit code.
pub fn report_trap(trap: &Trap) -> ExitCode {
    eprint!("molten: {trap}");
    ExitCode::from(EXIT_TRAP)
}

/// Map a guest exit value to a process exit code.
pub fn guest_exit(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use molten_core::TrapFrame;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [EXIT_SUCCESS, EXIT_USAGE_ERROR, EXIT_LOAD_ERROR, EXIT_TRAP];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_guest_exit_passthrough() {
        assert_eq!(guest_exit(0), ExitCode::from(0));
        assert_eq!(guest_exit(42), ExitCode::from(42));
        // C truncates exit codes to a byte; so do we.
        assert_eq!(guest_exit(256), ExitCode::from(0));
    }

    #[test]
    fn test_trap_rendering_includes_frames() {
        let mut trap = Trap::new(EngineError::DivisionByZero);
        trap.push_frame(TrapFrame {
            function: "compute".into(),
            block: 2,
            node: Some(1),
        });
        let text = trap.to_string();
        assert!(text.contains("division by zero"));
        assert!(text.contains("compute"));
    }
}
