//! Console output: pass/fail markers, colors, and the JSON summary.

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

/// Output format selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Markers and a summary line.
    #[default]
    Human,

    /// Markers, then the summary as one JSON object.
    Json,
}

impl OutputFormat {
    /// Check if this format produces JSON output.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Color choice for output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorChoice {
    /// Automatically detect based on terminal.
    #[default]
    Auto,

    /// Always use colors.
    Always,

    /// Never use colors.
    Never,
}

impl ColorChoice {
    /// Detect appropriate color setting based on environment.
    ///
    /// Respects:
    /// - `NO_COLOR` environment variable (<https://no-color.org/>)
    /// - `CLICOLOR_FORCE` environment variable
    /// - Terminal detection
    #[must_use]
    pub fn auto_detect() -> Self {
        if std::env::var_os("NO_COLOR").is_some() {
            return Self::Never;
        }
        if std::env::var_os("CLICOLOR_FORCE").is_some() {
            return Self::Always;
        }
        if io::stdout().is_terminal() {
            Self::Auto
        } else {
            Self::Never
        }
    }

    /// Check if colors should be used.
    #[must_use]
    pub fn should_colorize(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => io::stdout().is_terminal(),
        }
    }
}

/// Verdict markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// `[PASSED]`.
    Passed,
    /// `[FAILED]`.
    Failed,
}

impl Marker {
    /// Marker for a verdict.
    #[must_use]
    pub const fn from_passed(passed: bool) -> Self {
        if passed {
            Self::Passed
        } else {
            Self::Failed
        }
    }

    /// Bracketed text.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::Passed => "[PASSED]",
            Self::Failed => "[FAILED]",
        }
    }

    /// Single-character progress tick used inside groups.
    #[must_use]
    pub const fn tick(self) -> char {
        match self {
            Self::Passed => '+',
            Self::Failed => '-',
        }
    }

    const fn ansi(self) -> &'static str {
        match self {
            Self::Passed => "\x1b[32m",
            Self::Failed => "\x1b[31m",
        }
    }
}

/// Writer for test progress and the final summary.
pub struct Output {
    format: OutputFormat,
    color: ColorChoice,
    writer: Box<dyn Write>,
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("format", &self.format)
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

impl Output {
    /// Create a new output writer to stdout.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            color: ColorChoice::auto_detect(),
            writer: Box::new(io::stdout()),
        }
    }

    /// Create with a custom writer.
    #[must_use]
    pub fn with_writer<W: Write + 'static>(format: OutputFormat, writer: W) -> Self {
        Self {
            format,
            color: ColorChoice::Never,
            writer: Box::new(writer),
        }
    }

    /// Set the color choice.
    #[must_use]
    pub fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }

    /// Check if colors should be used.
    #[must_use]
    pub fn use_colors(&self) -> bool {
        self.color.should_colorize()
    }

    /// Get the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Writes a test or group name padded to a fixed column.
    pub fn label(&mut self, name: &str) -> io::Result<()> {
        write!(self.writer, "{name:>30} ...")?;
        self.writer.flush()
    }

    /// Writes a group progress tick.
    pub fn tick(&mut self, marker: Marker) -> io::Result<()> {
        write!(self.writer, "{}", marker.tick())?;
        self.writer.flush()
    }

    /// Writes a verdict marker and ends the line.
    pub fn marker(&mut self, marker: Marker) -> io::Result<()> {
        if self.use_colors() {
            writeln!(self.writer, " {}{}\x1b[0m", marker.ansi(), marker.text())
        } else {
            writeln!(self.writer, " {}", marker.text())
        }
    }

    /// Writes a plain line.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.writer, "{text}")
    }

    /// Writes `value` as one JSON line.
    pub fn json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")
    }

    /// Flush the output.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
