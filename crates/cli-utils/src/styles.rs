//! Help output styles.

use clap::builder::{
    Styles,
    styling::{AnsiColor, Color, Style},
};

const fn ansi(color: AnsiColor) -> Option<Color> {
    Some(Color::Ansi(color))
}

/// Colors used by `evm-bench --help`.
#[derive(Debug, Clone, Copy)]
pub struct CliStyles;

impl CliStyles {
    /// The styles handed to `#[command(styles = ...)]`.
    pub const fn init() -> Styles {
        Styles::styled()
            .header(Style::new().bold().fg_color(ansi(AnsiColor::Cyan)))
            .usage(Style::new().bold().fg_color(ansi(AnsiColor::Cyan)))
            .literal(Style::new().fg_color(ansi(AnsiColor::Green)))
            .placeholder(Style::new().fg_color(ansi(AnsiColor::BrightBlack)))
            .error(Style::new().bold().fg_color(ansi(AnsiColor::Red)))
            .invalid(Style::new().bold().fg_color(ansi(AnsiColor::Red)))
            .valid(Style::new().fg_color(ansi(AnsiColor::Green)))
    }
}
