use ratatui::style::{Color, Modifier, Style as TermStyle};

/// Renderer independent style names used by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Green,
    Red,
    Cyan,
    Yellow,
    Magenta,
    Blue,
    White,
    Gray,
}

impl Style {
    pub const ALL: [Style; 8] = [
        Style::Green,
        Style::Red,
        Style::Cyan,
        Style::Yellow,
        Style::Magenta,
        Style::Blue,
        Style::White,
        Style::Gray,
    ];

    fn position(self) -> usize {
        self as usize
    }

    fn color(self) -> Color {
        match self {
            Style::Green => Color::Green,
            Style::Red => Color::Red,
            Style::Cyan => Color::Cyan,
            Style::Yellow => Color::Yellow,
            Style::Magenta => Color::Magenta,
            Style::Blue => Color::Blue,
            Style::White => Color::White,
            Style::Gray => Color::DarkGray,
        }
    }
}

// Caution and warning levels for reactive coloring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub caution: f64,
    pub warn: f64,
}

pub const TEMPERATURE: Thresholds = Thresholds { caution: 65.0, warn: 80.0 };
pub const LOAD: Thresholds = Thresholds { caution: 70.0, warn: 90.0 };

impl Thresholds {
    pub fn level(&self, value: f64) -> Style {
        if value >= self.warn {
            Style::Red
        } else if value > self.caution {
            Style::Yellow
        } else {
            Style::Green
        }
    }
}

/// Styles resolved once at start-up.
///
/// With colors disabled every variant maps to the terminal default.
#[derive(Debug, Clone)]
pub struct Palette {
    styles: [TermStyle; 8],
}

impl Palette {
    pub fn new(color_enabled: bool) -> Self {
        let styles = Style::ALL.map(|style| {
            if color_enabled {
                TermStyle::new().fg(style.color())
            } else {
                TermStyle::new()
            }
        });

        Self { styles }
    }

    pub fn get(&self, style: Style) -> TermStyle {
        self.styles[style.position()]
    }

    pub fn bold(&self, style: Style) -> TermStyle {
        self.get(style).add_modifier(Modifier::BOLD)
    }

    // Color a reading by level when reactive coloring is on
    pub fn level(
        &self,
        value: Option<f64>,
        thresholds: Thresholds,
        reactive: bool,
    ) -> TermStyle {
        match value {
            Some(value) if reactive => self.get(thresholds.level(value)),
            _ => self.get(Style::White),
        }
    }
}
