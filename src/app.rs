use chrono::{DateTime, Local};
use ratatui::widgets::TableState;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::model::{AqiStatus, Coordinate, Layer, Session, Station};
use crate::poll::{PollEvent, Query};
use crate::storage;

const STATUS_TTL: Duration = Duration::from_secs(6);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
    Help,
}

pub struct App {
    pub stations: Vec<Station>,
    pub table_state: TableState,
    pub input_mode: InputMode,
    pub search_edit: String,
    pub last_search: Option<String>,
    pub tracked: Vec<String>,
    pub session: Session,
    pub home: Option<Coordinate>,
    pub refresh: Duration,
    pub query_label: String,
    pub fetching: Option<u64>,
    pub last_update: Option<DateTime<Local>>,
    pub stale_discarded: u64,
    pub layer: Layer,
    config_path: PathBuf,
    status: Option<(String, SystemTime)>,
}

impl App {
    pub fn new(
        tracked: Vec<String>,
        session: Session,
        home: Option<Coordinate>,
        refresh: Duration,
        config_path: PathBuf,
    ) -> Self {
        let query_label = Query::Places(tracked.clone()).describe();
        Self {
            stations: Vec::new(),
            table_state: TableState::default(),
            input_mode: InputMode::Normal,
            search_edit: String::new(),
            last_search: None,
            tracked,
            session,
            home,
            refresh,
            query_label,
            fetching: None,
            last_update: None,
            stale_discarded: 0,
            layer: Layer::default(),
            config_path,
            status: None,
        }
    }

    pub fn mark_fetching(&mut self, seq: u64, query: &Query) {
        self.fetching = Some(seq);
        self.query_label = query.describe();
    }

    // Returns true when the station list changed.
    pub fn apply_event(&mut self, event: PollEvent) -> bool {
        match event {
            PollEvent::Applied {
                seq,
                mut stations,
                outcome,
            } => {
                if self.fetching == Some(seq) {
                    self.fetching = None;
                }
                let selected_id = self.selected_station().map(|s| s.id.clone());
                stations.sort_by(|a, b| b.aqi.cmp(&a.aqi).then_with(|| a.name.cmp(&b.name)));
                self.stations = stations;
                self.last_update = Some(Local::now());
                self.restore_selection(selected_id.as_deref());
                debug!(
                    "applied fetch {seq}: {} stations (+{} -{})",
                    self.stations.len(),
                    outcome.added,
                    outcome.removed
                );
                if self.has_synthetic() {
                    warn!("showing demo readings, live sources unavailable");
                }
                true
            }
            PollEvent::Stale { seq } => {
                self.stale_discarded += 1;
                debug!("ignored stale fetch {seq}");
                false
            }
            PollEvent::Dropped { seq } => {
                debug!("fetch {seq} finished after teardown");
                false
            }
        }
    }

    pub fn has_synthetic(&self) -> bool {
        self.stations.iter().any(|s| s.synthetic)
    }

    pub fn worst(&self) -> Option<&Station> {
        self.stations.iter().max_by_key(|s| s.aqi)
    }

    pub fn average_aqi(&self) -> Option<u32> {
        if self.stations.is_empty() {
            return None;
        }
        let total: u64 = self.stations.iter().map(|s| u64::from(s.aqi)).sum();
        Some((total / self.stations.len() as u64) as u32)
    }

    pub fn status_counts(&self) -> Vec<(AqiStatus, usize)> {
        let mut counts: Vec<(AqiStatus, usize)> = Vec::new();
        for station in &self.stations {
            let status = station.status();
            match counts.iter_mut().find(|(s, _)| *s == status) {
                Some((_, n)) => *n += 1,
                None => counts.push((status, 1)),
            }
        }
        counts.sort_by_key(|(s, _)| *s);
        counts
    }

    pub fn selected_station(&self) -> Option<&Station> {
        self.table_state
            .selected()
            .and_then(|row| self.stations.get(row))
    }

    pub fn next_row(&mut self) {
        let len = self.stations.len();
        if len == 0 {
            return;
        }
        let idx = self.table_state.selected().unwrap_or(0);
        let next = if idx + 1 >= len { 0 } else { idx + 1 };
        self.table_state.select(Some(next));
    }

    pub fn previous_row(&mut self) {
        let len = self.stations.len();
        if len == 0 {
            return;
        }
        let idx = self.table_state.selected().unwrap_or(0);
        let prev = if idx == 0 { len - 1 } else { idx - 1 };
        self.table_state.select(Some(prev));
    }

    fn restore_selection(&mut self, id: Option<&str>) {
        if self.stations.is_empty() {
            self.table_state.select(None);
            return;
        }
        let row = id
            .and_then(|id| self.stations.iter().position(|s| s.id == id))
            .or_else(|| {
                self.table_state
                    .selected()
                    .map(|row| row.min(self.stations.len() - 1))
            })
            .unwrap_or(0);
        self.table_state.select(Some(row));
    }

    pub fn start_search(&mut self) {
        self.search_edit.clear();
        self.input_mode = InputMode::Search;
        debug!("search edit start");
    }

    pub fn push_search_char(&mut self, ch: char) {
        self.search_edit.push(ch);
    }

    pub fn backspace_search(&mut self) {
        self.search_edit.pop();
    }

    pub fn submit_search(&mut self) -> Option<String> {
        self.input_mode = InputMode::Normal;
        let place = self.search_edit.trim().to_string();
        self.search_edit.clear();
        if place.is_empty() {
            return None;
        }
        self.last_search = Some(place.clone());
        self.set_status(format!("searching {place}"));
        Some(place)
    }

    pub fn cancel_search(&mut self) {
        self.search_edit.clear();
        self.input_mode = InputMode::Normal;
        debug!("search edit cancel");
    }

    pub fn cycle_layer(&mut self) -> Layer {
        self.layer = self.layer.next();
        self.set_status(format!("layer {}", self.layer.label()));
        self.layer
    }

    pub fn open_help(&mut self) {
        self.input_mode = InputMode::Help;
    }

    pub fn close_help(&mut self) {
        self.input_mode = InputMode::Normal;
    }

    pub fn track_last_search(&mut self) -> bool {
        let Some(place) = self.last_search.clone() else {
            self.set_status("search a place first".to_string());
            return false;
        };
        if self.tracked.iter().any(|p| p.eq_ignore_ascii_case(&place)) {
            self.set_status(format!("{place} already tracked"));
            return false;
        }
        self.tracked.push(place.clone());
        info!("tracking {place}");
        self.set_status(format!("tracking {place}"));
        true
    }

    pub fn save_tracked(&mut self) {
        match storage::save_places(&self.config_path, &self.tracked) {
            Ok(()) => {
                info!("tracked places saved {}", self.config_path.display());
            }
            Err(err) => {
                warn!("saving tracked places failed: {err:#}");
                self.set_status(format!("save failed: {err}"));
            }
        }
    }

    pub fn set_status(&mut self, message: String) {
        self.status = Some((message, SystemTime::now()));
    }

    pub fn status_message(&self, now: SystemTime) -> Option<&str> {
        let (message, at) = self.status.as_ref()?;
        let age = now.duration_since(*at).unwrap_or_default();
        (age <= STATUS_TTL).then_some(message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{App, InputMode};
    use crate::markers::{test_station, ReconcileOutcome};
    use crate::model::Session;
    use crate::poll::{PollEvent, Query};
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    fn app() -> App {
        App::new(
            vec!["Delhi".to_string(), "Pune".to_string()],
            Session::default(),
            None,
            Duration::from_secs(30),
            PathBuf::from("aqi-tui-test-unused.toml"),
        )
    }

    fn applied(seq: u64, stations: Vec<crate::model::Station>) -> PollEvent {
        PollEvent::Applied {
            seq,
            stations,
            outcome: ReconcileOutcome::default(),
        }
    }

    #[test]
    fn applied_event_sorts_worst_first_and_keeps_selection() {
        let mut app = app();
        app.mark_fetching(1, &Query::Places(app.tracked.clone()));
        assert!(app.apply_event(applied(
            1,
            vec![
                test_station("a", 40, 1.0, 1.0),
                test_station("b", 180, 2.0, 2.0),
                test_station("c", 90, 3.0, 3.0),
            ],
        )));
        let order: Vec<&str> = app.stations.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!(app.fetching, None);
        assert!(app.last_update.is_some());

        app.next_row();
        assert_eq!(app.selected_station().map(|s| s.id.as_str()), Some("c"));
        app.apply_event(applied(
            2,
            vec![test_station("c", 300, 3.0, 3.0), test_station("a", 41, 1.0, 1.0)],
        ));
        assert_eq!(app.selected_station().map(|s| s.id.as_str()), Some("c"));
        assert_eq!(app.average_aqi(), Some(170));
    }

    #[test]
    fn stale_and_dropped_events_leave_state_alone() {
        let mut app = app();
        assert!(!app.apply_event(PollEvent::Stale { seq: 1 }));
        assert!(!app.apply_event(PollEvent::Dropped { seq: 2 }));
        assert!(app.stations.is_empty());
        assert_eq!(app.stale_discarded, 1);
    }

    #[test]
    fn synthetic_readings_raise_the_advisory() {
        let mut app = app();
        let mut demo = test_station("demo:delhi@1", 120, 28.6, 77.2);
        demo.synthetic = true;
        app.apply_event(applied(1, vec![test_station("x", 10, 0.0, 0.0), demo]));
        assert!(app.has_synthetic());
        assert_eq!(app.worst().map(|s| s.aqi), Some(120));
    }

    #[test]
    fn blank_search_is_ignored() {
        let mut app = app();
        app.start_search();
        assert_eq!(app.input_mode, InputMode::Search);
        app.push_search_char(' ');
        assert_eq!(app.submit_search(), None);
        assert_eq!(app.input_mode, InputMode::Normal);

        app.start_search();
        for ch in "Agra x".chars() {
            app.push_search_char(ch);
        }
        app.backspace_search();
        assert_eq!(app.submit_search(), Some("Agra".to_string()));
    }

    #[test]
    fn tracking_requires_a_new_search() {
        let mut app = app();
        assert!(!app.track_last_search());
        app.last_search = Some("pune".to_string());
        assert!(!app.track_last_search());
        app.last_search = Some("Agra".to_string());
        assert!(app.track_last_search());
        assert_eq!(app.tracked.len(), 3);
        assert_eq!(app.status_message(SystemTime::now()), Some("tracking Agra"));
        let later = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(app.status_message(later), None);
    }

    #[test]
    fn selection_wraps() {
        let mut app = app();
        app.next_row();
        assert_eq!(app.selected_station(), None);
        app.apply_event(applied(
            1,
            vec![test_station("a", 1, 0.0, 0.0), test_station("b", 2, 0.0, 0.0)],
        ));
        app.previous_row();
        assert_eq!(app.selected_station().map(|s| s.id.as_str()), Some("a"));
        app.next_row();
        assert_eq!(app.selected_station().map(|s| s.id.as_str()), Some("b"));
    }
}
