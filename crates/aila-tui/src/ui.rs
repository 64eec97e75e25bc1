//! UI rendering.

use crate::app::{App, Mode};
use aila_core::{Digest, report};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, BorderType, Borders, Clear, Padding, Paragraph, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Wrap,
    },
};

// ─── Colors ──────────────────────────────────────────────────────────

const ACCENT: Color = Color::Rgb(88, 101, 242);
const IMPORTANT: Color = Color::Yellow;
const DIM: Color = Color::DarkGray;

// ─── Main draw ───────────────────────────────────────────────────────

pub fn draw(f: &mut Frame<'_>, app: &App) {
    let [body, status] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(f.area());

    draw_digest(f, app, body);
    draw_status_bar(f, app, status);

    if matches!(app.mode, Mode::Help) {
        draw_help(f);
    }
}

// ─── Digest panel ────────────────────────────────────────────────────

fn draw_digest(f: &mut Frame<'_>, app: &App, area: Rect) {
    let block = Block::default()
        .title(" aila: AI for Aula ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(ACCENT))
        .padding(Padding::horizontal(1));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(ref digest) = app.digest else {
        let text = if app.refreshing {
            "  Getting data from Aula and running the model... (this might take a while)"
        } else {
            "  No digest yet. Press r to refresh."
        };
        f.render_widget(Paragraph::new(text).style(Style::default().fg(DIM)), inner);
        return;
    };

    let lines = digest_lines(digest, app.show_originals);
    let total_lines = lines.len();
    let visible = inner.height as usize;
    let max_scroll = total_lines.saturating_sub(visible);
    let scroll = app.scroll.min(max_scroll);

    let para = Paragraph::new(lines)
        .scroll((u16::try_from(scroll).unwrap_or(u16::MAX), 0))
        .wrap(Wrap { trim: false });
    f.render_widget(para, inner);

    if total_lines > visible {
        let mut scrollbar_state = ScrollbarState::new(total_lines).position(scroll);
        f.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight).style(Style::default().fg(DIM)),
            inner,
            &mut scrollbar_state,
        );
    }
}

fn digest_lines(digest: &Digest, show_originals: bool) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = report::header_lines(digest)
        .into_iter()
        .map(|text| {
            if text == report::IMPORTANT_BANNER {
                Line::from(Span::styled(
                    text,
                    Style::default().fg(IMPORTANT).add_modifier(Modifier::BOLD),
                ))
            } else {
                Line::from(text)
            }
        })
        .collect();
    lines.push(Line::from(""));

    if digest.items.is_empty() {
        lines.push(Line::from(Span::styled("No new messages.", Style::default().fg(DIM))));
    }
    for item in &digest.items {
        let style = if item.important {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(report::summary_line(item), style)));
        lines.push(Line::from(""));
    }

    if show_originals && !digest.items.is_empty() {
        lines.push(Line::from(Span::styled(
            report::ORIGINALS_HEADING,
            Style::default().fg(ACCENT),
        )));
        lines.push(Line::from(""));
        for item in &digest.items {
            lines.push(Line::from(report::original_line(item)));
            lines.push(Line::from(""));
        }
    }
    lines
}

// ─── Status bar ──────────────────────────────────────────────────────

fn draw_status_bar(f: &mut Frame<'_>, app: &App, area: Rect) {
    let mode_span = match app.mode {
        Mode::Normal => Span::styled(" DIGEST ", Style::default().fg(Color::Black).bg(ACCENT).bold()),
        Mode::Help => Span::styled(" HELP ", Style::default().fg(Color::Black).bg(Color::Yellow).bold()),
    };

    let refresh_span = if app.refreshing {
        Span::styled(" refreshing... ", Style::default().fg(Color::Yellow))
    } else {
        let left = app.schedule.remaining(app.last_run, std::time::Instant::now());
        Span::styled(format!(" next in {} ", format_remaining(left.as_secs())), Style::default().fg(DIM))
    };

    let status = Span::styled(format!(" {} ", app.status_msg), Style::default().fg(DIM));
    let keys_hint = Span::styled(" ? help  r refresh  o originals  q quit ", Style::default().fg(DIM));

    let line = Line::from(vec![
        mode_span,
        Span::raw(" "),
        refresh_span,
        Span::raw("│"),
        status,
        Span::raw(" "),
        keys_hint,
    ]);

    f.render_widget(Paragraph::new(line).alignment(Alignment::Left), area);
}

// ─── Help overlay ────────────────────────────────────────────────────

/// Key bindings grouped by section, in display order.
const KEYMAP: &[(&str, &[(&str, &str)])] = &[
    ("navigation", &[("j / k", "scroll down / up"), ("g", "back to top")]),
    ("digest", &[("r", "refresh now"), ("o", "toggle original messages")]),
    ("general", &[("?", "toggle this help"), ("q", "quit")]),
];

fn draw_help(f: &mut Frame<'_>) {
    let area = centered(f.area(), 50, 50);
    f.render_widget(Clear, area);

    let mut help = vec![Line::from("")];
    for (name, keys) in KEYMAP {
        help.push(Line::from(Span::styled(
            format!("  {name}"),
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )));
        help.extend(keys.iter().map(|(keys, desc)| {
            Line::from(vec![
                Span::styled(format!("  {keys:<16}"), Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(*desc, Style::default().fg(Color::Gray)),
            ])
        }));
        help.push(Line::from(""));
    }
    help.push(Line::from(Span::styled(
        "  press ? or Esc to close",
        Style::default().fg(DIM),
    )));

    let block = Block::default()
        .title(" keys ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .style(Style::default().bg(Color::Rgb(25, 25, 35)));
    f.render_widget(Paragraph::new(help).block(block), area);
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn format_remaining(secs: u64) -> String {
    match secs {
        0 => "now".to_string(),
        s if s < 3600 => format!("{}m", s.div_ceil(60)),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

/// A box of the given percentages centered in `area`.
fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let [row] = Layout::vertical([Constraint::Percentage(percent_y)])
        .flex(Flex::Center)
        .areas(area);
    let [cell] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(row);
    cell
}
