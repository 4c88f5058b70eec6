use std::fmt::Display;

use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::Style as TermStyle,
    text::{Line, Span},
    widgets::{Cell, Paragraph, Row, Table},
};

use crate::{
    config::AppContext,
    dashboard::{
        DashboardState, Readings, View,
        palette::{LOAD, Palette, Style, TEMPERATURE},
    },
    device::{FanPolicy, ProcessEntry, ProcessKind},
    profile_store::Slot,
    telemetry::TelemetrySnapshot,
};

const TITLE: &str = "Blissful Nvidia Tool";
const SEPARATOR: &str = "-------------------------------------------------------";
const UNKNOWN: &str = "Unknown";
const LABEL_WIDTH: usize = 18;

const MIB: f64 = 1024.0 * 1024.0;

pub fn draw(frame: &mut Frame, state: &DashboardState, readings: &Readings, ctx: &AppContext) {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Min(8),
        Constraint::Length(3),
    ])
    .areas(frame.area());

    draw_header(frame, header, &ctx.palette);

    match state.view() {
        View::Help => draw_help(frame, body, state, &ctx.palette),
        View::ProcessInfo => draw_processes(frame, body, readings, &ctx.palette),
        View::Monitor | View::ProfileInput(_) => {
            draw_monitor(frame, body, state, &readings.snapshot, ctx)
        }
    }

    draw_footer(frame, footer, state, &ctx.palette);
}

fn draw_header(frame: &mut Frame, area: Rect, palette: &Palette) {
    let lines = vec![
        Line::from(Span::styled(format!("{TITLE:^55}"), palette.bold(Style::Magenta))),
        Line::from(SEPARATOR),
    ];

    frame.render_widget(Paragraph::new(lines), area);
}

// Render a reading or the unknown placeholder
fn or_unknown<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| v.to_string())
}

fn watts(value: Option<f64>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| format!("{v:.2}"))
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| format!("{v:.0}%"))
}

fn offset(value: Option<i64>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| format!("{v:+}"))
}

fn mebibytes(value: Option<u64>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| format!("{:.2}", v as f64 / MIB))
}

fn fan_policy(policy: Option<FanPolicy>) -> &'static str {
    match policy {
        Some(FanPolicy::Auto) => "Auto",
        Some(FanPolicy::Manual) => "Manual",
        None => UNKNOWN,
    }
}

fn row(label: &str, value: String, style: TermStyle) -> Line<'static> {
    Line::from(vec![
        Span::raw(format!("{label:<LABEL_WIDTH$}")),
        Span::styled(value, style),
    ])
}

fn monitor_lines(
    state: &DashboardState,
    s: &TelemetrySnapshot,
    ctx: &AppContext,
) -> Vec<Line<'static>> {
    let palette = &ctx.palette;
    let reactive = state.reactive_color();

    let clock_style = palette.level(s.core_clock_percent, LOAD, reactive);
    let temp_style = palette.level(s.temperature.map(f64::from), TEMPERATURE, reactive);
    let power_style = palette.level(s.power_percent, LOAD, reactive);
    let util_style = palette.level(s.core_utilization.map(f64::from), LOAD, reactive);
    let vram_style = palette.level(s.memory_percent, LOAD, reactive);
    let plain = palette.get(Style::White);

    vec![
        row(
            "GPU:",
            format!("{} - {}", s.gpu_index, or_unknown(s.name.as_deref())),
            palette.get(Style::Green),
        ),
        row(
            "Clock Frequency:",
            format!(
                "{} MHz core ({}) / {} MHz mem",
                or_unknown(s.core_clock),
                percent(s.core_clock_percent),
                or_unknown(s.mem_clock),
            ),
            clock_style,
        ),
        row(
            "Clock Offsets:",
            format!(
                "{} MHz core / {} MHz mem",
                offset(s.core_offset),
                offset(s.mem_offset)
            ),
            plain,
        ),
        row(
            "Temp:",
            format!(
                "{}°C / Fan: {}% ({})",
                or_unknown(s.temperature),
                or_unknown(s.fan_speed),
                fan_policy(s.fan_policy),
            ),
            temp_style,
        ),
        row(
            "Power:",
            format!(
                "{} / {} W (Default Limit: {} W, Offset: {} W)",
                watts(s.power_usage),
                watts(s.power_limit),
                watts(s.default_power_limit),
                s.power_offset
                    .map_or_else(|| UNKNOWN.to_string(), |v| format!("{v:+.0}")),
            ),
            power_style,
        ),
        row(
            "Utilization:",
            format!(
                "Core: {}% / Memory Controller: {}%",
                or_unknown(s.core_utilization),
                or_unknown(s.memory_utilization),
            ),
            util_style,
        ),
        row(
            "VRAM Usage:",
            format!(
                "{} / {} MB ({})",
                mebibytes(s.memory_used),
                mebibytes(s.memory_total),
                percent(s.memory_percent),
            ),
            vram_style,
        ),
        Line::default(),
        profile_line(state, ctx),
    ]
}

// Slot indicators: active, saved or empty
fn profile_line(state: &DashboardState, ctx: &AppContext) -> Line<'static> {
    let palette = &ctx.palette;
    let mut spans = vec![Span::raw(format!("{:<LABEL_WIDTH$}", "Profiles:"))];

    for slot in Slot::ALL {
        let (text, style) = if state.active_profile() == Some(slot) {
            (format!("[{slot}*]"), palette.bold(Style::Green))
        } else if ctx.store.is_present(slot) {
            (format!("[{slot}]"), palette.get(Style::Cyan))
        } else {
            (format!("[{slot}]"), palette.get(Style::Gray))
        };

        spans.push(Span::styled(text, style));
        spans.push(Span::raw(" "));
    }

    if state.active_profile().is_none() {
        spans.push(Span::styled("(custom)", palette.get(Style::Gray)));
    }

    Line::from(spans)
}

fn draw_monitor(
    frame: &mut Frame,
    area: Rect,
    state: &DashboardState,
    snapshot: &TelemetrySnapshot,
    ctx: &AppContext,
) {
    let lines = monitor_lines(state, snapshot, ctx);

    frame.render_widget(Paragraph::new(lines), area);
}

fn draw_processes(frame: &mut Frame, area: Rect, readings: &Readings, palette: &Palette) {
    let processes: &[ProcessEntry] = match &readings.processes {
        Some(Ok(processes)) => processes,
        Some(Err(err)) => {
            let line = Line::from(Span::styled(
                format!("Failed to list processes: {err}"),
                palette.get(Style::Red),
            ));
            frame.render_widget(Paragraph::new(line), area);
            return;
        }
        None => &[],
    };

    if processes.is_empty() {
        let line = Line::from(Span::styled(
            "No processes running on this GPU",
            palette.get(Style::Gray),
        ));
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let header =
        Row::new(vec!["PID", "Type", "Name", "VRAM (MB)"]).style(palette.bold(Style::Cyan));

    let rows = processes.iter().map(|p| {
        let kind = match p.kind {
            ProcessKind::Compute => "Compute",
            ProcessKind::Graphics => "Graphics",
        };

        Row::new(vec![
            Cell::from(p.pid.to_string()),
            Cell::from(kind),
            Cell::from(p.name.clone()),
            Cell::from(mebibytes(p.used_memory_bytes)),
        ])
        .style(palette.get(Style::White))
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Min(16),
            Constraint::Length(12),
        ],
    )
    .header(header);

    frame.render_widget(table, area);
}

fn draw_help(frame: &mut Frame, area: Rect, state: &DashboardState, palette: &Palette) {
    let key = palette.get(Style::Yellow);
    let entry = |k: &'static str, what: &'static str| {
        Line::from(vec![Span::styled(format!("  {k:<10}"), key), Span::raw(what)])
    };

    let mut lines = vec![
        Line::from(Span::styled("Keys", palette.bold(Style::Cyan))),
        entry("q", "Quit"),
        entry("h", "Show this help"),
        entry("i", "Toggle the process list"),
    ];

    if state.interactive() {
        lines.extend([
            entry("c", "Set core clock offset"),
            entry("m", "Set memory clock offset"),
            entry("p", "Set power limit"),
            entry("f", "Set custom fan speed (30-100%)"),
            entry("a", "Restore automatic fan control"),
            entry("1-4", "Save current settings to profile 1-4"),
            entry("F1-F4", "Load profile 1-4"),
            entry("! @ # $", "Delete profile 1-4"),
        ]);
    } else {
        lines.push(Line::from(Span::styled(
            "  Start with --interactive to change clocks, power, fans and profiles",
            palette.get(Style::Gray),
        )));
    }

    lines.push(Line::default());
    lines.push(Line::from(Span::styled("Press any key to return", palette.get(Style::Gray))));

    frame.render_widget(Paragraph::new(lines), area);
}

fn draw_footer(frame: &mut Frame, area: Rect, state: &DashboardState, palette: &Palette) {
    let mut lines = Vec::new();

    if let View::ProfileInput(kind) = state.view() {
        lines.push(Line::from(vec![
            Span::styled(format!("{}: ", kind.label()), palette.get(Style::Yellow)),
            Span::raw(state.input().to_string()),
            Span::raw("_"),
        ]));
        lines.push(Line::from(Span::styled(
            "Enter to apply, Esc to cancel",
            palette.get(Style::Gray),
        )));
    } else if let Some(status) = state.status() {
        let style = if status.success { Style::Green } else { Style::Red };

        lines.push(Line::from(Span::styled(status.text.clone(), palette.get(style))));
        lines.push(Line::default());
    } else {
        lines.push(Line::default());
        lines.push(Line::default());
    }

    let hints = if state.interactive() {
        "q quit  h help  i processes  c/m/p/f set  a auto fan  1-4 save  F1-F4 load  !@#$ delete"
    } else {
        "q quit  h help  i processes"
    };
    lines.push(Line::from(Span::styled(hints, palette.get(Style::Blue))));

    frame.render_widget(Paragraph::new(lines), area);
}
