//! Colored terminal output
//!
//! Respects the `NO_COLOR` environment variable and the `--color` flag.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled stdout writer
pub struct StyledOutput {
    stdout: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
        }
    }

    fn write_styled(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    /// Green bold label followed by plain text
    pub fn success(&mut self, label: &str, text: &str) {
        self.write_styled(label, Some(Color::Green), true);
        let _ = writeln!(self.stdout, " {}", text);
    }

    /// Yellow bold label followed by plain text
    pub fn warning(&mut self, label: &str, text: &str) {
        self.write_styled(label, Some(Color::Yellow), true);
        let _ = writeln!(self.stdout, " {}", text);
    }

    /// Dimmed `key: value` line
    pub fn field(&mut self, key: &str, value: &str) {
        self.write_styled(&format!("  {:<18}", format!("{}:", key)), Some(Color::Cyan), false);
        let _ = writeln!(self.stdout, "{}", value);
    }
}
