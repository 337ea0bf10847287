use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};
use tinker_core::Origin;

use crate::app::{App, InputMode, MAX_INPUT_CHARS};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let (status, status_color) = if app.is_connected() {
        ("● Connected", Color::Green)
    } else {
        ("● Disconnected", Color::Red)
    };

    let title = Line::from(vec![
        Span::styled(" Tinker Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(status, Style::default().fg(status_color).bold()),
        Span::raw(" "),
        Span::styled(app.endpoint().to_string(), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::Black));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area for mouse hit-testing and sizes for scroll calculations (inner size minus borders)
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Chat ");

    let chat_text = if app.history.is_empty() {
        Text::from(Span::styled(
            "Press i to type a message, r to run, s to stop...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for entry in app.history.entries() {
            let label = match entry.origin {
                Origin::User => Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ),
                Origin::Remote => Span::styled(
                    "Pi:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                ),
            };
            lines.push(Line::from(label));
            for line in entry.text.lines() {
                lines.push(Line::from(line.to_string()));
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(
            " Message (i to type) {}/{} ",
            app.input.chars().count(),
            MAX_INPUT_CHARS
        ));

    // Horizontal scroll keeps the cursor visible; inner width excludes borders
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 {
        0
    } else if app.cursor >= inner_width {
        app.cursor - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input.chars().skip(scroll_offset).take(inner_width).collect();

    // Cyan text to match the "You:" label
    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    if editing {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" CHAT ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let keys: &[(&str, &str)] = match app.input_mode {
        InputMode::Normal => &[
            (" i ", " type "),
            (" r ", " run "),
            (" s ", " stop "),
            (" j/k ", " scroll "),
            (" g/G ", " top/bottom "),
            (" q ", " quit "),
        ],
        InputMode::Editing => &[(" Enter ", " send "), (" Esc ", " done "), (" Ctrl-C ", " quit ")],
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in keys {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
