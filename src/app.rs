use ratatui::layout::Rect;
use tinker_core::{ChatHistory, ConnectionState, Dispatcher, IncomingEvent, OutgoingCommand, Outcome};

/// Longest message the input line accepts, in chars.
pub const MAX_INPUT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Conversation
    pub history: ChatHistory,
    pub scroll: u16,
    pub chat_height: u16, // Inner height of the chat pane, set on render
    pub chat_width: u16,  // Inner width of the chat pane, set on render
    pub chat_area: Option<Rect>,

    // Input line
    pub input: String,
    pub cursor: usize, // cursor position in chars, not bytes

    // Last polled connection state
    pub connection: ConnectionState,

    dispatcher: Dispatcher,
}

impl App {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let connection = dispatcher.state();
        Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            history: ChatHistory::new(),
            scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,
            input: String::new(),
            cursor: 0,
            connection,
            dispatcher,
        }
    }

    /// Screen is up: open the connection without waiting for the first send.
    pub fn mount(&mut self) {
        self.dispatcher.connect();
        self.refresh_status();
    }

    /// Read the connection state for display. Never dials.
    pub fn refresh_status(&mut self) {
        self.connection = self.dispatcher.state();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    pub fn endpoint(&self) -> &str {
        self.dispatcher.endpoint()
    }

    /// Send the input line as a chat message. Blank input is ignored.
    ///
    /// Returns whether anything was sent.
    pub fn submit_input(&mut self) -> bool {
        if self.input.trim().is_empty() {
            return false;
        }

        let text = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.dispatcher.send(OutgoingCommand::user_message(text));
        true
    }

    pub fn run_all(&self) {
        self.dispatcher.send(OutgoingCommand::run_all());
    }

    pub fn stop(&self) {
        self.dispatcher.send(OutgoingCommand::stop());
    }

    /// Echo a command once it is on the wire. Failed sends are logged by the
    /// dispatcher and leave the history untouched.
    pub fn on_outcome(&mut self, outcome: Outcome) {
        if let Outcome::Delivered(command) = outcome {
            self.history.push_user(command.description());
            self.scroll_to_bottom();
        }
    }

    pub fn on_remote(&mut self, event: IncomingEvent) {
        self.history.push_remote(event.message);
        self.scroll_to_bottom();
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines).min(self.max_scroll());
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }

    fn max_scroll(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for entry in self.history.entries() {
            total_lines = total_lines.saturating_add(1); // "You:" or "Pi:"
            for line in entry.text.lines() {
                // Character count, not byte length, for UTF-8 text
                let char_count = line.chars().count();
                let wrapped = char_count.div_ceil(wrap_width).max(1);
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after entry
        }

        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };
        total_lines.saturating_sub(visible_height)
    }

    /// Close the connection and stop the dispatcher.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
    }
}
