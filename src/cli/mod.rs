//! Console surface of the `scene-verify` binary.
//!
//! Colors are enabled for terminals and respect:
//! - `NO_COLOR` environment variable (disables colors)
//! - `CLICOLOR_FORCE` environment variable (forces colors)

pub mod args;
pub mod exit;
pub mod output;

pub use args::{parse_color_choice, parse_intensity, verbosity_level};
pub use exit::ExitCode;
pub use output::{ColorChoice, Marker, Output, OutputFormat};
