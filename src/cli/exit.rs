//! Exit codes of the `scene-verify` binary.
//!
//! A finished run exits with the number of failed tests. Shells reserve
//! 126-255, so that count is clamped to 125. Startup problems use the fixed
//! codes below and are distinguishable only by the absence of test output.

/// Exit code helpers.
pub struct ExitCode;

impl ExitCode {
    /// Every selected test passed.
    pub const SUCCESS: i32 = 0;

    /// Bad arguments, unreadable config file, invalid selection pattern.
    pub const USER_ERROR: i32 = 1;

    /// Largest code a run may report.
    pub const MAX_REPORTABLE: i32 = 125;

    /// Exit code for a run with `failed` failing tests.
    #[must_use]
    pub fn from_failed_tests(failed: usize) -> i32 {
        i32::try_from(failed).map_or(Self::MAX_REPORTABLE, |n| n.min(Self::MAX_REPORTABLE))
    }

    /// Get human-readable description of an exit code.
    #[must_use]
    pub const fn description(code: i32) -> &'static str {
        match code {
            0 => "success",
            1..=124 => "tests failed",
            125 => "tests failed (count clamped)",
            _ => "unknown",
        }
    }

    /// Check if an exit code indicates success (code 0).
    #[must_use]
    pub const fn is_success(code: i32) -> bool {
        code == Self::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_count_is_the_code() {
        assert_eq!(ExitCode::from_failed_tests(0), ExitCode::SUCCESS);
        assert_eq!(ExitCode::from_failed_tests(3), 3);
        assert_eq!(ExitCode::from_failed_tests(125), 125);
    }

    #[test]
    fn large_counts_are_clamped() {
        assert_eq!(ExitCode::from_failed_tests(126), ExitCode::MAX_REPORTABLE);
        assert_eq!(ExitCode::from_failed_tests(usize::MAX), ExitCode::MAX_REPORTABLE);
        assert_eq!(ExitCode::description(125), "tests failed (count clamped)");
    }

    #[test]
    fn unknown_code_description() {
        assert_eq!(ExitCode::description(-1), "unknown");
        assert_eq!(ExitCode::description(200), "unknown");
        assert!(ExitCode::is_success(0));
        assert!(!ExitCode::is_success(2));
    }
}
