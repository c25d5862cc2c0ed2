//! Terminal rendering and key bindings.

use std::io::{Stdout, stdout};

use crossterm::{
    ExecutableCommand,
    event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use crate::dashboard::{Command, Dashboard};
use crate::history::LogKind;
use crate::mirror::DeviceState;

/// Map a key press to a command. With an alert open only the dismiss keys
/// do anything.
pub fn command_for_key(key: KeyEvent, alert_open: bool) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    if alert_open {
        return match key.code {
            KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') => Some(Command::DismissAlert),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char('c') | KeyCode::Char('C') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Command::ClearLog)
        }
        KeyCode::Char('1') | KeyCode::Char('o') | KeyCode::Char('O') => Some(Command::TurnOn),
        KeyCode::Char('0') | KeyCode::Char('f') | KeyCode::Char('F') => Some(Command::TurnOff),
        KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
        _ => None,
    }
}

fn state_color(state: Option<&DeviceState>) -> Color {
    match state {
        Some(DeviceState::On) => Color::Green,
        Some(DeviceState::Off) => Color::Red,
        Some(DeviceState::Other(_)) => Color::Yellow,
        None => Color::DarkGray,
    }
}

/// Terminal wrapper for cleanup on drop
pub struct Terminal {
    terminal: ratatui::Terminal<CrosstermBackend<Stdout>>,
}

impl Terminal {
    pub fn new() -> std::io::Result<Self> {
        enable_raw_mode()?;
        let terminal = or_restore(
            || {
                stdout().execute(EnterAlternateScreen)?;
                ratatui::Terminal::new(CrosstermBackend::new(stdout()))
            },
            restore_terminal,
        )?;

        // Release builds abort on panic, so Drop never runs there.
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore_terminal();
            previous(info);
        }));

        Ok(Self { terminal })
    }

    pub fn draw(&mut self, dashboard: &Dashboard) -> std::io::Result<()> {
        self.terminal.draw(|frame| render(frame, dashboard))?;
        Ok(())
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        restore_terminal();
    }
}

fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = stdout().execute(LeaveAlternateScreen);
}

/// Run the rest of the terminal setup, undoing what already succeeded if
/// any step fails.
fn or_restore<T>(
    setup: impl FnOnce() -> std::io::Result<T>,
    restore: impl FnOnce(),
) -> std::io::Result<T> {
    setup().inspect_err(|_| restore())
}

pub fn render(frame: &mut Frame, dashboard: &Dashboard) {
    let dim = Style::default().fg(Color::DarkGray);
    let vert = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(4),
        Constraint::Min(3),
        Constraint::Length(1),
    ])
    .split(frame.area());

    // Header
    let (status_text, status_color) = if dashboard.is_connected() {
        ("● Connected", Color::Green)
    } else {
        ("● Disconnected", Color::Red)
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled("ESP8266 LED Control Dashboard", Style::default().bold()),
        Span::styled(format!("  Project: {}  ", dashboard.project()), dim),
        Span::styled(status_text, Style::default().fg(status_color)),
    ]))
    .block(
        Block::default().borders(Borders::ALL).title_bottom(Line::styled(
            format!(" {} | Key: {} ", dashboard.backend(), dashboard.key()),
            dim,
        )),
    );
    frame.render_widget(header, vert[0]);

    // Status row
    let state = dashboard.state();
    // Nothing echoed yet reads as OFF, dimmed until the first value lands.
    let badge = state.map_or("OFF", DeviceState::as_str);
    let cols = Layout::horizontal([Constraint::Ratio(1, 4); 4]).split(vert[1]);
    let cells = [
        ("LED State", badge.to_string(), state_color(state)),
        ("Toggles", dashboard.toggle_count().to_string(), Color::White),
        ("Uptime", dashboard.uptime(), Color::White),
        ("Last Update", dashboard.last_update(), Color::White),
    ];
    for ((title, value, color), area) in cells.into_iter().zip(cols.iter()) {
        let cell = Paragraph::new(Span::styled(value, Style::default().fg(color).bold()))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(cell, *area);
    }

    // Activity log
    let items: Vec<ListItem> = dashboard
        .entries()
        .iter()
        .map(|entry| {
            let color = match entry.kind {
                LogKind::On => Color::Green,
                LogKind::Off => Color::Red,
            };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:>11}  ", entry.time), dim),
                Span::styled(entry.message.clone(), Style::default().fg(color)),
            ]))
        })
        .collect();
    let log = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Activity Log ({}) ", dashboard.entries().len())),
    );
    frame.render_widget(log, vert[2]);

    // Controls
    let controls = Line::from(vec![
        Span::styled("[1/o]", Style::default().fg(Color::Green)),
        " Turn ON  ".into(),
        Span::styled("[0/f]", Style::default().fg(Color::Red)),
        " Turn OFF  ".into(),
        Span::styled("[Ctrl+C]", Style::default().fg(Color::Yellow)),
        " Clear Log  ".into(),
        Span::styled("[q]", dim),
        " Quit".into(),
    ]);
    frame.render_widget(Paragraph::new(controls), vert[3]);

    if let Some(message) = dashboard.alert() {
        let area = centered(frame.area(), 60, 7);
        frame.render_widget(Clear, area);
        let popup = Paragraph::new(vec![
            Line::from(message.to_string()),
            Line::from(""),
            Line::from(Span::styled("[Enter] OK", dim)),
        ])
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title(" Error "),
        );
        frame.render_widget(popup, area);
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
