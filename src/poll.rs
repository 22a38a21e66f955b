use std::collections::HashSet;
#[cfg(test)]
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::aqi::{AqiClient, Target};
use crate::markers::{MapSurface, MarkerReconciler, ReconcileOutcome};
use crate::model::{Coordinate, Station};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    Places(Vec<String>),
    Point(Coordinate),
}

impl Query {
    pub fn describe(&self) -> String {
        match self {
            Query::Places(names) if names.len() == 1 => names[0].clone(),
            Query::Places(names) => format!("{} tracked places", names.len()),
            Query::Point(coord) => format!("near {coord}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Trigger {
    Tick,
    Refresh,
    Search(String),
    Geolocate(Coordinate),
    Places(Vec<String>),
}

// Produces a full station list for one query. Runs on worker threads.
pub trait StationSource: Send + Sync {
    fn stations(&self, query: &Query) -> Vec<Station>;
}

impl StationSource for AqiClient {
    fn stations(&self, query: &Query) -> Vec<Station> {
        match query {
            Query::Places(names) => {
                let mut seen = HashSet::new();
                names
                    .iter()
                    .map(|name| self.fetch(&Target::Place(name.clone())))
                    .filter(|station| {
                        let fresh = seen.insert(station.id.clone());
                        if !fresh {
                            debug!("{} already listed, skipping repeat", station.id);
                        }
                        fresh
                    })
                    .collect()
            }
            Query::Point(coord) => vec![self.fetch(&Target::Point(*coord))],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching { seq: u64 },
}

#[derive(Debug)]
pub enum PollEvent {
    Applied {
        seq: u64,
        stations: Vec<Station>,
        outcome: ReconcileOutcome,
    },
    // Superseded by a newer request.
    Stale { seq: u64 },
    // Arrived after teardown.
    Dropped { seq: u64 },
}

struct Completed {
    seq: u64,
    stations: Vec<Station>,
}

pub struct PollLoop<S: MapSurface> {
    reconciler: MarkerReconciler<S>,
    source: Arc<dyn StationSource>,
    tx: Sender<Completed>,
    rx: Receiver<Completed>,
    query: Query,
    latest_seq: u64,
    state: PollState,
    period: Duration,
    next_tick: Option<Instant>,
    torn_down: bool,
}

impl<S: MapSurface> PollLoop<S> {
    pub fn new(
        reconciler: MarkerReconciler<S>,
        source: Arc<dyn StationSource>,
        query: Query,
        period: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            reconciler,
            source,
            tx,
            rx,
            query,
            latest_seq: 0,
            state: PollState::Idle,
            period,
            next_tick: None,
            torn_down: false,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    #[cfg(test)]
    pub fn latest_seq(&self) -> u64 {
        self.latest_seq
    }

    pub fn reconciler(&self) -> &MarkerReconciler<S> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut MarkerReconciler<S> {
        &mut self.reconciler
    }

    pub fn start(&mut self, now: Instant) -> Option<u64> {
        self.next_tick = Some(now + self.period);
        self.trigger(Trigger::Refresh)
    }

    pub fn trigger(&mut self, trigger: Trigger) -> Option<u64> {
        if self.torn_down {
            return None;
        }
        match trigger {
            Trigger::Tick => {
                if let PollState::Fetching { seq } = self.state {
                    debug!("tick skipped, fetch {seq} still in flight");
                    return None;
                }
            }
            Trigger::Refresh => {}
            Trigger::Search(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return None;
                }
                self.query = Query::Places(vec![name]);
            }
            Trigger::Geolocate(coord) => self.query = Query::Point(coord),
            Trigger::Places(names) => self.query = Query::Places(names),
        }
        Some(self.dispatch())
    }

    pub fn poll_timer(&mut self, now: Instant) -> Option<u64> {
        let due = self.next_tick.is_some_and(|at| now >= at);
        if !due {
            return None;
        }
        self.next_tick = Some(now + self.period);
        self.trigger(Trigger::Tick)
    }

    pub fn pump(&mut self) -> Vec<PollEvent> {
        let mut events = Vec::new();
        while let Ok(done) = self.rx.try_recv() {
            events.push(self.complete(done));
        }
        events
    }

    #[cfg(test)]
    pub fn wait(&mut self, timeout: Duration) -> Option<PollEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(done) => Some(self.complete(done)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.next_tick = None;
        self.state = PollState::Idle;
        self.reconciler.teardown();
        info!("poll loop torn down at seq {}", self.latest_seq);
    }

    fn dispatch(&mut self) -> u64 {
        self.latest_seq += 1;
        let seq = self.latest_seq;
        self.state = PollState::Fetching { seq };
        let query = self.query.clone();
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        debug!("fetch {seq} started for {}", query.describe());
        thread::spawn(move || {
            let stations = source.stations(&query);
            if tx.send(Completed { seq, stations }).is_err() {
                trace!("poll loop gone, dropping fetch {seq}");
            }
        });
        seq
    }

    fn complete(&mut self, done: Completed) -> PollEvent {
        let Completed { seq, stations } = done;
        if self.torn_down {
            return PollEvent::Dropped { seq };
        }
        if seq != self.latest_seq {
            debug!("discarding stale fetch {seq} (latest {})", self.latest_seq);
            return PollEvent::Stale { seq };
        }
        self.state = PollState::Idle;
        let outcome = self.reconciler.reconcile(&stations);
        debug!(
            "fetch {seq} applied: +{} -{}{}",
            outcome.added,
            outcome.removed,
            if outcome.deferred { " (deferred)" } else { "" }
        );
        PollEvent::Applied {
            seq,
            stations,
            outcome,
        }
    }
}
