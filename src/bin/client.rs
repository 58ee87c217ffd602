use std::collections::BTreeSet;
use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use roomchat::protocol::*;

/// Idle time after the last keystroke before a stopTyping is sent.
const TYPING_IDLE: Duration = Duration::from_secs(2);

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "client", about = "Room chat TUI client")]
struct Args {
    #[arg(long, default_value = "localhost:8080")]
    addr: String,
}

// ─── Screens ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Screen {
    Join,
    Chat,
}

// ─── Simple one-line text input ───────────────────────────────────────────────

#[derive(Default, Clone)]
struct Input {
    value: String,
    cursor: usize,
}

impl Input {
    fn insert(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn delete_back(&mut self) {
        if self.cursor == 0 {
            return;
        }
        // find previous char boundary
        let mut prev = self.cursor - 1;
        while prev > 0 && !self.value.is_char_boundary(prev) {
            prev -= 1;
        }
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    fn as_str(&self) -> &str {
        &self.value
    }
}

// ─── App state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ChatLine {
    username: String,
    text: String,
    timestamp: String,
    is_system: bool,
}

struct App {
    screen: Screen,

    // Join fields
    join_field: usize, // 0=username, 1=room
    join_username: Input,
    join_room: Input,
    join_error: String,

    // Chat
    room: String,
    messages: Vec<ChatLine>,
    chat_input: Input,
    users: Vec<String>,
    typing_users: BTreeSet<String>,
    scroll: usize, // how many lines from the bottom we are scrolled
    viewport_height: u16,

    // Local typing-indicator state
    is_typing: bool,
    last_keystroke: Instant,

    quit: bool,
}

impl App {
    fn new() -> Self {
        Self {
            screen: Screen::Join,
            join_field: 0,
            join_username: Input::default(),
            join_room: Input::default(),
            join_error: String::new(),

            room: DEFAULT_ROOM.to_string(),
            messages: Vec::new(),
            chat_input: Input::default(),
            users: Vec::new(),
            typing_users: BTreeSet::new(),
            scroll: 0,
            viewport_height: 20,

            is_typing: false,
            last_keystroke: Instant::now(),

            quit: false,
        }
    }

    fn push_message(&mut self, line: ChatLine) {
        self.messages.push(line);
    }

    fn scroll_up(&mut self) {
        let max = self
            .messages
            .len()
            .saturating_sub(self.viewport_height as usize);
        self.scroll = (self.scroll + 3).min(max);
    }

    fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(3);
    }
}

// ─── Network message types (from server → TUI) ───────────────────────────────

enum NetMsg {
    Packet(Packet),
    Disconnected,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Connect to server
    let stream = TcpStream::connect(&args.addr).await?;
    let (reader, writer) = stream.into_split();

    // Channel: server → UI
    let (net_tx, mut net_rx) = mpsc::channel::<NetMsg>(128);
    // Channel: UI → server writer
    let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(64);

    // Spawn reader task
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Ok(pkt) = serde_json::from_str::<Packet>(&line) {
                        if net_tx.send(NetMsg::Packet(pkt)).await.is_err() {
                            break;
                        }
                    }
                }
                _ => {
                    net_tx.send(NetMsg::Disconnected).await.ok();
                    break;
                }
            }
        }
    });

    // Spawn writer task
    tokio::spawn(async move {
        let mut w = writer;
        while let Some(data) = write_rx.recv().await {
            if w.write_all(&data).await.is_err() {
                break;
            }
        }
    });

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();
    let result = run_app(&mut terminal, &mut app, &mut net_rx, &write_tx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    net_rx: &mut mpsc::Receiver<NetMsg>,
    write_tx: &mpsc::Sender<Vec<u8>>,
) -> Result<()> {
    loop {
        // Draw
        let size = terminal.size()?;
        app.viewport_height = size.height.saturating_sub(6);
        terminal.draw(|f| draw(f, app))?;

        // Poll keyboard (non-blocking, 20ms)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(key) = event::read()? {
                handle_key(app, key, write_tx).await?;
            }
        }

        // Drain all pending network messages
        while let Ok(msg) = net_rx.try_recv() {
            handle_net(app, msg);
        }

        // Idle typists stop typing
        if app.is_typing && app.last_keystroke.elapsed() >= TYPING_IDLE {
            app.is_typing = false;
            send_packet(write_tx, EventType::StopTyping, TypingPayload { room: None }).await?;
        }

        if app.quit {
            break;
        }
    }
    Ok(())
}

// ─── Key handling ─────────────────────────────────────────────────────────────

async fn handle_key(
    app: &mut App,
    key: KeyEvent,
    write_tx: &mpsc::Sender<Vec<u8>>,
) -> Result<()> {
    match app.screen {
        Screen::Join => handle_join_key(app, key, write_tx).await,
        Screen::Chat => handle_chat_key(app, key, write_tx).await,
    }
}

async fn handle_join_key(
    app: &mut App,
    key: KeyEvent,
    write_tx: &mpsc::Sender<Vec<u8>>,
) -> Result<()> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.quit = true;
        }
        KeyCode::Char('q') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.quit = true;
        }
        KeyCode::Tab => {
            app.join_field = if app.join_field == 0 { 1 } else { 0 };
        }
        KeyCode::BackTab => {
            app.join_field = if app.join_field == 1 { 0 } else { 1 };
        }
        KeyCode::Enter => {
            let username = app.join_username.value.trim().to_string();
            if username.is_empty() {
                app.join_error = "Username is required".into();
                return Ok(());
            }
            let room = app.join_room.value.trim().to_string();
            app.room = if room.is_empty() {
                DEFAULT_ROOM.to_string()
            } else {
                room.clone()
            };
            let payload = JoinPayload {
                username,
                room: if room.is_empty() { None } else { Some(room) },
            };
            send_packet(write_tx, EventType::JoinRoom, payload).await?;
            app.screen = Screen::Chat;
            app.join_error.clear();
        }
        KeyCode::Backspace => {
            if app.join_field == 0 {
                app.join_username.delete_back();
            } else {
                app.join_room.delete_back();
            }
        }
        KeyCode::Char(c) => {
            if app.join_field == 0 {
                app.join_username.insert(c);
            } else {
                app.join_room.insert(c);
            }
        }
        _ => {}
    }
    Ok(())
}

async fn handle_chat_key(
    app: &mut App,
    key: KeyEvent,
    write_tx: &mpsc::Sender<Vec<u8>>,
) -> Result<()> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.quit = true;
        }
        KeyCode::Char('q') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.quit = true;
        }
        KeyCode::PageUp => app.scroll_up(),
        KeyCode::PageDown => app.scroll_down(),
        KeyCode::Enter => {
            let text = app.chat_input.value.trim().to_string();
            if text.is_empty() {
                return Ok(());
            }
            app.chat_input.clear();
            if app.is_typing {
                app.is_typing = false;
                send_packet(write_tx, EventType::StopTyping, TypingPayload { room: None })
                    .await?;
            }
            send_packet(write_tx, EventType::ChatMessage, ChatPayload { room: None, text })
                .await?;
        }
        KeyCode::Backspace => {
            app.chat_input.delete_back();
            note_keystroke(app, write_tx).await?;
        }
        KeyCode::Char(c) => {
            app.chat_input.insert(c);
            note_keystroke(app, write_tx).await?;
        }
        _ => {}
    }
    Ok(())
}

/// First keystroke announces typing; the idle check in the main loop
/// announces stopping.
async fn note_keystroke(app: &mut App, write_tx: &mpsc::Sender<Vec<u8>>) -> Result<()> {
    app.last_keystroke = Instant::now();
    if !app.is_typing {
        app.is_typing = true;
        send_packet(write_tx, EventType::Typing, TypingPayload { room: None }).await?;
    }
    Ok(())
}

// ─── Network message handling ─────────────────────────────────────────────────

fn handle_net(app: &mut App, msg: NetMsg) {
    match msg {
        NetMsg::Disconnected => {
            app.push_message(ChatLine {
                username: String::new(),
                text: "Disconnected from server.".into(),
                timestamp: String::new(),
                is_system: true,
            });
        }
        NetMsg::Packet(pkt) => match pkt.event {
            EventType::Message => {
                if let Ok(p) = serde_json::from_value::<MessagePayload>(pkt.payload) {
                    let is_system = p.username == SYSTEM_NAME;
                    if !is_system {
                        // A message ends any typing indicator for its sender.
                        app.typing_users.remove(&p.username);
                    }
                    let ts = p.timestamp.format("%H:%M:%S").to_string();
                    app.push_message(ChatLine {
                        username: p.username,
                        text: p.text,
                        timestamp: ts,
                        is_system,
                    });
                }
            }
            EventType::RoomUsers => {
                if let Ok(p) = serde_json::from_value::<RoomUsersPayload>(pkt.payload) {
                    app.room = p.room;
                    app.users = p.users;
                    app.typing_users.retain(|u| app.users.contains(u));
                }
            }
            EventType::Typing => {
                if let Ok(p) = serde_json::from_value::<TypingEventPayload>(pkt.payload) {
                    app.typing_users.insert(p.username);
                }
            }
            EventType::StopTyping => {
                if let Ok(p) = serde_json::from_value::<TypingEventPayload>(pkt.payload) {
                    app.typing_users.remove(&p.username);
                }
            }
            _ => {}
        },
    }
}

// ─── Drawing ─────────────────────────────────────────────────────────────────

fn draw(f: &mut Frame, app: &App) {
    match app.screen {
        Screen::Join => draw_join(f, app),
        Screen::Chat => draw_chat(f, app),
    }
}

fn draw_join(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .title(" RoomChat ")
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // title
            Constraint::Length(3), // username
            Constraint::Length(3), // room
            Constraint::Length(1), // hint
            Constraint::Length(1), // error
            Constraint::Min(0),
        ])
        .split(inner);

    let title = Paragraph::new("── Join a room ──")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_widget(title, chunks[0]);

    let u_style = if app.join_field == 0 {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    };
    let username_widget = Paragraph::new(app.join_username.as_str())
        .block(
            Block::default()
                .title(" Username ")
                .borders(Borders::ALL)
                .border_style(u_style),
        )
        .style(Style::default().fg(Color::White));
    f.render_widget(username_widget, chunks[1]);

    let r_style = if app.join_field == 1 {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    };
    let room_widget = Paragraph::new(app.join_room.as_str())
        .block(
            Block::default()
                .title(format!(" Room (blank for {}) ", DEFAULT_ROOM))
                .borders(Borders::ALL)
                .border_style(r_style),
        )
        .style(Style::default().fg(Color::White));
    f.render_widget(room_widget, chunks[2]);

    let hint_widget = Paragraph::new("Tab to switch fields | Enter to join | Ctrl+Q quit")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(hint_widget, chunks[3]);

    if !app.join_error.is_empty() {
        let err = Paragraph::new(app.join_error.as_str())
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Red));
        f.render_widget(err, chunks[4]);
    }

    // Place cursor
    if app.join_field == 0 {
        f.set_cursor_position((
            chunks[1].x + 1 + app.join_username.cursor as u16,
            chunks[1].y + 1,
        ));
    } else {
        f.set_cursor_position((
            chunks[2].x + 1 + app.join_room.cursor as u16,
            chunks[2].y + 1,
        ));
    }
}

fn draw_chat(f: &mut Frame, app: &App) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(3),    // messages + member panel
            Constraint::Length(1), // typing indicator
            Constraint::Length(3), // input
        ])
        .split(area);

    // Header
    let header = Paragraph::new(format!(
        " #{}  │  {} online  │  PgUp/PgDn scroll  │  Ctrl+Q quit ",
        app.room,
        app.users.len()
    ))
    .style(
        Style::default()
            .bg(Color::DarkGray)
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(header, chunks[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(20), Constraint::Length(22)])
        .split(chunks[1]);

    // Messages viewport
    let msg_block = Block::default()
        .borders(Borders::LEFT | Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let msg_inner = msg_block.inner(columns[0]);
    f.render_widget(msg_block, columns[0]);

    let height = msg_inner.height as usize;
    let total = app.messages.len();
    let start = if total > height + app.scroll {
        total - height - app.scroll
    } else {
        0
    };
    let visible = &app.messages[start..total.saturating_sub(app.scroll)];

    let items: Vec<ListItem> = visible
        .iter()
        .map(|line| {
            if line.is_system {
                ListItem::new(Line::from(vec![Span::styled(
                    format!("  ◆ {}", line.text),
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::ITALIC),
                )]))
            } else {
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("[{}] ", line.timestamp),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(
                        format!("{}: ", line.username),
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(line.text.clone()),
                ]))
            }
        })
        .collect();

    let list = List::new(items);
    f.render_widget(list, msg_inner);

    // Member panel
    let users_block = Block::default()
        .title(" Members ")
        .borders(Borders::LEFT | Borders::RIGHT | Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let users_inner = users_block.inner(columns[1]);
    f.render_widget(users_block, columns[1]);

    let user_items: Vec<ListItem> = app
        .users
        .iter()
        .map(|u| {
            let marker = if app.typing_users.contains(u) {
                "✎ "
            } else {
                "  "
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(Color::Yellow)),
                Span::styled(u.clone(), Style::default().fg(Color::Green)),
            ]))
        })
        .collect();
    f.render_widget(List::new(user_items), users_inner);

    // Typing indicator line
    let typing_text = match app.typing_users.len() {
        0 => String::new(),
        1 => format!(
            " {} is typing…",
            app.typing_users.iter().next().map(String::as_str).unwrap_or("")
        ),
        n => format!(" {n} people are typing…"),
    };
    let typing_widget = Paragraph::new(typing_text).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );
    f.render_widget(typing_widget, chunks[2]);

    // Input box
    let input_block = Block::default()
        .title(" Message (Enter to send) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let input_inner = input_block.inner(chunks[3]);
    f.render_widget(input_block, chunks[3]);

    let input_widget =
        Paragraph::new(app.chat_input.as_str()).style(Style::default().fg(Color::White));
    f.render_widget(input_widget, input_inner);

    // Cursor in input
    f.set_cursor_position((
        input_inner.x + app.chat_input.cursor as u16,
        input_inner.y,
    ));
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn send_packet(
    write_tx: &mpsc::Sender<Vec<u8>>,
    event: EventType,
    payload: impl serde::Serialize,
) -> Result<()> {
    let pkt = Packet::new(event, payload)?;
    write_tx.send(pkt.encode()?).await.ok();
    Ok(())
}
