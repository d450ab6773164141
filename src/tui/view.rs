use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Sparkline},
    Frame,
};

use super::model::{format_time, App};
use crate::audio::SinkState;

/// 幅度 1.0 对应的柱高
const BAR_SCALE: f32 = 1000.0;

pub fn draw(f: &mut Frame, app: &App) {
    // 垂直布局：Header, 每声道一个频谱, Footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(4),    // Spectrum
            Constraint::Length(1), // Footer
        ])
        .split(f.size());

    draw_header(f, app, chunks[0]);
    draw_spectrum(f, app, chunks[1]);
    draw_footer(f, chunks[2]);
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![Span::styled(
        app.title.as_str(),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];

    if let Some(frame) = &app.frame {
        let (state_str, state_color) = match frame.state {
            SinkState::Running => ("[RUNNING]", Color::Green),
            SinkState::Prepared | SinkState::Uninitialized => ("[PREPARED]", Color::White),
            SinkState::Underrun => ("[UNDERRUN]", Color::Yellow),
            SinkState::Fatal => ("[FATAL]", Color::Red),
            SinkState::Closed => ("[CLOSED]", Color::DarkGray),
        };
        let underrun_color = if frame.underruns > 0 {
            Color::Yellow
        } else {
            Color::DarkGray
        };

        spans.push(Span::raw(format!(
            "  {} / {}  ",
            format_time(frame.position_secs()),
            format_time(frame.duration_secs())
        )));
        spans.push(Span::styled(
            format!("{} Hz | {}  ", frame.rate, app.device),
            Style::default().fg(Color::White),
        ));
        spans.push(Span::styled(
            format!("Underruns: {}  ", frame.underruns),
            Style::default().fg(underrun_color),
        ));
        spans.push(Span::styled(state_str, Style::default().fg(state_color)));
    }

    let paragraph = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(paragraph, area);
}

fn draw_spectrum(f: &mut Frame, app: &App, area: Rect) {
    let nchannel = app.bars.nchannel().max(1);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, nchannel as u32); nchannel])
        .split(area);

    for (ch, &chunk) in chunks.iter().enumerate() {
        let data: Vec<u64> = app
            .bars
            .channel(ch)
            .iter()
            .map(|&v| (v * BAR_SCALE).clamp(0.0, BAR_SCALE) as u64)
            .collect();

        let sparkline = Sparkline::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" Channel {} ", ch + 1)),
            )
            .data(&data)
            .max(BAR_SCALE as u64)
            .style(Style::default().fg(Color::Cyan));
        f.render_widget(sparkline, chunk);
    }
}

fn draw_footer(f: &mut Frame, area: Rect) {
    let footer = Paragraph::new("q/Esc: quit").style(Style::default().fg(Color::DarkGray));
    f.render_widget(footer, area);
}

/// 频谱区域内可显示的频带数
pub fn band_count(width: u16) -> usize {
    width.saturating_sub(2).max(1) as usize
}
