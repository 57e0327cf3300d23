//! Argument value parsers shared by the binary.

use super::ColorChoice;

/// Parse a color choice from a string.
pub fn parse_color_choice(s: &str) -> Result<ColorChoice, String> {
    match s.to_lowercase().as_str() {
        "auto" | "automatic" => Ok(ColorChoice::Auto),
        "always" | "on" | "yes" | "true" => Ok(ColorChoice::Always),
        "never" | "off" | "no" | "false" => Ok(ColorChoice::Never),
        other => Err(format!(
            "Unknown color choice '{other}'. Valid choices: auto, always, never"
        )),
    }
}

/// Parse an intensity factor: finite and non-negative.
pub fn parse_intensity(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a number"))?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(format!("intensity must be finite and non-negative, got {value}"))
    }
}

/// Log level for a `-v` repeat count.
#[must_use]
pub const fn verbosity_level(count: u8) -> tracing::Level {
    match count {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_color_choice_valid() {
        assert_eq!(parse_color_choice("auto").unwrap(), ColorChoice::Auto);
        assert_eq!(parse_color_choice("AUTO").unwrap(), ColorChoice::Auto);
        assert_eq!(parse_color_choice("on").unwrap(), ColorChoice::Always);
        assert_eq!(parse_color_choice("never").unwrap(), ColorChoice::Never);
    }

    #[test]
    fn parse_color_choice_invalid() {
        let err = parse_color_choice("sometimes").unwrap_err();
        assert!(err.contains("sometimes"));
    }

    #[test]
    fn intensity_bounds() {
        assert!((parse_intensity("0.5").unwrap() - 0.5).abs() < f64::EPSILON);
        assert!(parse_intensity("0").is_ok());
        assert!(parse_intensity("-1").is_err());
        assert!(parse_intensity("inf").is_err());
        assert!(parse_intensity("lots").is_err());
    }

    #[test]
    fn verbosity_ladder() {
        assert_eq!(verbosity_level(0), tracing::Level::WARN);
        assert_eq!(verbosity_level(1), tracing::Level::INFO);
        assert_eq!(verbosity_level(2), tracing::Level::DEBUG);
        assert_eq!(verbosity_level(9), tracing::Level::TRACE);
    }
}
