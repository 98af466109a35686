use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use speaker_bus::{ClientConfig, Connection, ConnectionStatus, Discovery, Synchronizer};
use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

const VOLUME_STEP: f32 = 5.0;
const SEEK_STEP: f32 = 10.0;

#[derive(PartialEq)]
enum AppState {
    Devices,
    Device,
}

struct App {
    state: AppState,
    config: ClientConfig,
    connection: Arc<Connection>,
    discovery: Discovery,
    selected_device_index: usize,
    sync: Option<Synchronizer>,
    status_message: String,
}

impl App {
    fn new(config: ClientConfig, connection: Arc<Connection>) -> Self {
        let discovery = Discovery::new(connection.clone());
        Self {
            state: AppState::Devices,
            config,
            connection,
            discovery,
            selected_device_index: 0,
            sync: None,
            status_message: "Looking for devices...".to_string(),
        }
    }

    fn select_next(&mut self) {
        let count = self.discovery.device_count();
        if count > 0 {
            self.selected_device_index = (self.selected_device_index + 1) % count;
        }
    }

    fn select_previous(&mut self) {
        let count = self.discovery.device_count();
        if count > 0 {
            self.selected_device_index = (self.selected_device_index + count - 1) % count;
        }
    }

    fn open_selected_device(&mut self) {
        let devices = self.discovery.devices();
        let Some(device_id) = devices.get(self.selected_device_index) else {
            self.status_message = "No device to open".to_string();
            return;
        };

        match Synchronizer::start(self.connection.clone(), device_id.clone(), &self.config) {
            Ok(sync) => {
                self.sync = Some(sync);
                self.state = AppState::Device;
                self.status_message = "+/- volume, space pause, s stop, ←/→ seek, n next, \
                                       Esc back, q quit"
                    .to_string();
            }
            Err(e) => self.status_message = format!("Failed to open {}: {}", device_id, e),
        }
    }

    async fn go_back(&mut self) {
        if let Some(mut sync) = self.sync.take() {
            sync.stop().await;
        }
        self.state = AppState::Devices;
        self.status_message = format!(
            "Found {} device(s). Press Enter to open, r to refresh.",
            self.discovery.device_count()
        );
    }

    fn adjust_volume(&mut self, delta: f32) {
        if let Some(sync) = &self.sync {
            let volume = sync.state().volume + delta;
            sync.set_volume(volume);
            self.status_message = format!("Volume: {:.0}", sync.state().volume);
        }
    }

    fn seek_by(&mut self, delta: f32) {
        if let Some(sync) = &self.sync {
            let target = sync.state().seek + delta;
            sync.dispatcher().seek(target);
            self.status_message = format!("Seeking to {}", format_time(target.max(0.0)));
        }
    }

    fn refresh(&mut self) {
        if let Err(e) = self.discovery.refresh() {
            self.status_message = format!("Refresh failed: {}", e);
        }
    }
}

fn format_time(seconds: f32) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn ui(f: &mut Frame, app: &App) {
    let outer_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.size());

    match app.state {
        AppState::Devices => render_devices(f, app, outer_chunks[0]),
        AppState::Device => render_device(f, app, outer_chunks[0]),
    }

    render_status(f, app, outer_chunks[1]);
}

fn render_devices(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Devices (j/k to select, Enter to open, r refresh, q to quit) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let devices = app.discovery.devices();
    if devices.is_empty() {
        let text = Paragraph::new("Waiting for a device list on the bus...")
            .block(block)
            .wrap(Wrap { trim: true });
        f.render_widget(text, area);
        return;
    }

    let items: Vec<ListItem> = devices
        .iter()
        .map(|device_id| {
            ListItem::new(Line::from(vec![
                Span::styled("Device: ", Style::default().fg(Color::Yellow)),
                Span::raw(device_id.clone()),
            ]))
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(app.selected_device_index));

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, &mut state);
}

fn render_device(f: &mut Frame, app: &App, area: Rect) {
    let Some(sync) = &app.sync else {
        return;
    };
    let state = sync.state();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(area);

    let title = state
        .now_playing()
        .map(|song| song.title.clone())
        .unwrap_or_else(|| "Nothing playing".to_string());
    let playback = if state.now_playing().is_none() {
        Span::styled("IDLE", Style::default().fg(Color::Gray))
    } else if state.paused {
        Span::styled("PAUSED", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("PLAYING", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
    };

    let mut device = vec![
        Span::styled(
            "Device: ",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        Span::raw(state.device_id.clone()),
    ];
    if !app.discovery.is_known(&state.device_id) {
        device.push(Span::styled(" (not listed)", Style::default().fg(Color::Red)));
    }

    let lines = vec![
        Line::from(device),
        Line::from(vec![
            Span::styled("Now playing: ", Style::default().fg(Color::Yellow)),
            Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(vec![Span::styled("State: ", Style::default().fg(Color::Yellow)), playback]),
        Line::from(vec![
            Span::styled("Volume: ", Style::default().fg(Color::Yellow)),
            Span::styled(
                format!("{:.0}", state.volume),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
        ]),
    ];
    let info = Paragraph::new(lines)
        .block(
            Block::default()
                .title(" Speaker ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Green)),
        )
        .wrap(Wrap { trim: true });
    f.render_widget(info, chunks[0]);

    let ratio = if state.duration > 0.0 {
        (state.seek / state.duration).clamp(0.0, 1.0) as f64
    } else {
        0.0
    };
    let progress = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(ratio)
        .label(format!(
            "{} / {}",
            format_time(state.seek),
            format_time(state.duration)
        ));
    f.render_widget(progress, chunks[1]);

    let items: Vec<ListItem> = state
        .songs
        .iter()
        .enumerate()
        .map(|(i, song)| {
            let prefix = if i == 0 { "  ▶ " } else { "    " };
            let style = if i == 0 {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::raw(prefix),
                Span::styled(song.title.clone(), style),
                Span::styled(format!("  {}", song.url), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();
    let playlist = List::new(items).block(
        Block::default()
            .title(format!(" Playlist ({}) ", state.songs.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(playlist, chunks[2]);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let link = match app.connection.status() {
        ConnectionStatus::Connected => Span::styled("● ", Style::default().fg(Color::Green)),
        ConnectionStatus::Connecting => Span::styled("● ", Style::default().fg(Color::Yellow)),
        ConnectionStatus::Disconnected | ConnectionStatus::Closed => {
            Span::styled("● ", Style::default().fg(Color::Red))
        }
    };

    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let text = Paragraph::new(Line::from(vec![link, Span::raw(app.status_message.clone())]))
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(text, area);
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    // The terminal belongs to the UI, so logs go to a file
    let log_file = File::create("remote.log")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::from_file(&path)?,
        None => ClientConfig::default(),
    };
    let connection = Arc::new(Connection::open(&config)?);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, connection.clone());

    // Queued until the connection is up
    app.discovery.start()?;

    let res = run_app(&mut terminal, &mut app).await;

    if let Some(mut sync) = app.sync.take() {
        sync.stop().await;
    }
    app.discovery.stop().await;
    connection.shutdown().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        if app.state == AppState::Devices {
            let count = app.discovery.device_count();
            if count > 0 {
                app.selected_device_index = app.selected_device_index.min(count - 1);
                app.status_message =
                    format!("Found {} device(s). Press Enter to open, r to refresh.", count);
            }
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match app.state {
                        AppState::Devices => match key.code {
                            KeyCode::Char('q') => return Ok(()),
                            KeyCode::Char('j') | KeyCode::Down => app.select_next(),
                            KeyCode::Char('k') | KeyCode::Up => app.select_previous(),
                            KeyCode::Char('r') => app.refresh(),
                            KeyCode::Enter => app.open_selected_device(),
                            _ => {}
                        },
                        AppState::Device => match key.code {
                            KeyCode::Char('q') => return Ok(()),
                            KeyCode::Esc => app.go_back().await,
                            KeyCode::Char('+') | KeyCode::Char('=') => {
                                app.adjust_volume(VOLUME_STEP)
                            }
                            KeyCode::Char('-') | KeyCode::Char('_') => {
                                app.adjust_volume(-VOLUME_STEP)
                            }
                            KeyCode::Char(' ') => {
                                if let Some(sync) = &app.sync {
                                    sync.dispatcher().toggle_pause();
                                }
                            }
                            KeyCode::Char('s') => {
                                if let Some(sync) = &app.sync {
                                    sync.dispatcher().stop();
                                }
                            }
                            KeyCode::Char('n') => {
                                if let Some(sync) = &app.sync {
                                    sync.dispatcher().remove_song(0);
                                }
                            }
                            KeyCode::Left => app.seek_by(-SEEK_STEP),
                            KeyCode::Right => app.seek_by(SEEK_STEP),
                            _ => {}
                        },
                    }
                }
            }
        }
    }
}
