use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, InputMode, MAX_INPUT_CHARS};
use crate::tui::AppEvent;

/// Lines moved per scroll step.
const SCROLL_STEP: u16 = 3;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices().nth(char_idx).map(|(i, _)| i).unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.refresh_status(),
        AppEvent::Remote(event) => app.on_remote(event),
        AppEvent::Outcome(outcome) => app.on_outcome(outcome),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Char('i') | KeyCode::Tab => app.input_mode = InputMode::Editing,

        // Device commands
        KeyCode::Char('r') => app.run_all(),
        KeyCode::Char('s') => app.stop(),

        // History scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::PageDown => app.scroll_down(app.chat_height.max(1)),
        KeyCode::PageUp => app.scroll_up(app.chat_height.max(1)),
        KeyCode::Char('g') => app.scroll_to_top(),
        KeyCode::Char('G') => app.scroll_to_bottom(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            if app.submit_input() {
                app.input_mode = InputMode::Normal;
            }
        }
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            if app.input.chars().count() >= MAX_INPUT_CHARS {
                return;
            }
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    // Scroll only when the pointer is over the chat pane (or before first render)
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(true);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(SCROLL_STEP),
        MouseEventKind::ScrollUp => app.scroll_up(SCROLL_STEP),
        _ => {}
    }
}
