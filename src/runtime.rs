use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::app::{App, InputMode};
use crate::markers::MapSurface;
use crate::poll::{PollLoop, PollState, Trigger};
use crate::terminal_map::TerminalMap;
use crate::ui;

pub fn init_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

pub fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut app: App,
    mut poll: PollLoop<TerminalMap>,
) -> Result<()> {
    if let Some(seq) = poll.start(Instant::now()) {
        app.mark_fetching(seq, poll.query());
    }
    let result = event_loop(terminal, &mut app, &mut poll);
    poll.teardown();
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    poll: &mut PollLoop<TerminalMap>,
) -> Result<()> {
    let tick_rate = Duration::from_millis(100);
    loop {
        for event in poll.pump() {
            app.apply_event(event);
        }
        app.fetching = match poll.state() {
            PollState::Fetching { seq } => Some(seq),
            PollState::Idle => None,
        };
        if let Some(seq) = poll.poll_timer(Instant::now()) {
            app.mark_fetching(seq, poll.query());
        }

        terminal.draw(|f| ui::ui(f, app, poll.reconciler().surface()))?;

        if !poll.reconciler().surface().is_ready() {
            poll.reconciler_mut().surface_mut().mark_ready();
            if let Some(outcome) = poll.reconciler_mut().on_ready() {
                debug!("map ready, applied deferred markers +{}", outcome.added);
            }
        }

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_key(app, poll, key) {
                    info!("quit requested");
                    return Ok(());
                }
            }
        }
    }
}

// Returns true when the user asked to quit.
pub fn handle_key<S: MapSurface>(app: &mut App, poll: &mut PollLoop<S>, key: KeyEvent) -> bool {
    match app.input_mode {
        InputMode::Normal => match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Down => app.next_row(),
            KeyCode::Up => app.previous_row(),
            KeyCode::Enter => {
                let id = app.selected_station().map(|s| s.id.clone());
                if let Some(id) = id {
                    poll.reconciler_mut().focus(&id);
                }
            }
            KeyCode::Char('/') => app.start_search(),
            KeyCode::Char('r') => fire(app, poll, Trigger::Refresh),
            KeyCode::Char('g') => match app.home {
                Some(home) => {
                    app.set_status(format!("locating {home}"));
                    fire(app, poll, Trigger::Geolocate(home));
                }
                None => app.set_status("no location: set home_lat/home_lon".to_string()),
            },
            KeyCode::Char('t') => {
                let places = app.tracked.clone();
                if places.is_empty() {
                    app.set_status("no tracked places".to_string());
                } else {
                    fire(app, poll, Trigger::Places(places));
                }
            }
            KeyCode::Char('a') => {
                if app.track_last_search() {
                    app.save_tracked();
                }
            }
            KeyCode::Char('l') => {
                let layer = app.cycle_layer();
                poll.reconciler_mut().set_layer(layer);
            }
            KeyCode::Char('?') | KeyCode::Char('h') => app.open_help(),
            _ => {}
        },
        InputMode::Search => match key.code {
            KeyCode::Enter => {
                if let Some(place) = app.submit_search() {
                    fire(app, poll, Trigger::Search(place));
                }
            }
            KeyCode::Esc => app.cancel_search(),
            KeyCode::Backspace => app.backspace_search(),
            KeyCode::Char(ch) if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if ch == 'u' {
                    app.search_edit.clear();
                }
            }
            KeyCode::Char(ch) => app.push_search_char(ch),
            _ => {}
        },
        InputMode::Help => match key.code {
            KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('h') => app.close_help(),
            _ => {}
        },
    }
    false
}

fn fire<S: MapSurface>(app: &mut App, poll: &mut PollLoop<S>, trigger: Trigger) {
    if let Some(seq) = poll.trigger(trigger) {
        app.mark_fetching(seq, poll.query());
    }
}
