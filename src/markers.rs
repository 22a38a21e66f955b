use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::model::{Coordinate, Layer, Station};

pub const DEFAULT_SINGLE_ZOOM: u8 = 10;

pub trait MapSurface {
    type Handle;

    fn is_ready(&self) -> bool;
    fn create_marker(&mut self, coord: Coordinate, color: &str, popup_html: &str) -> Self::Handle;
    fn remove_marker(&mut self, handle: Self::Handle);
    fn fit_bounds(&mut self, handles: &[&Self::Handle]);
    fn set_view(&mut self, coord: Coordinate, zoom: u8);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: usize,
    pub removed: usize,
    pub deferred: bool,
}

struct Placed<H> {
    handle: H,
    station: Station,
}

// Sole owner of the map surface and of every marker handle on it.
pub struct MarkerReconciler<S: MapSurface> {
    surface: S,
    markers: HashMap<String, Placed<S::Handle>>,
    pending: Option<Vec<Station>>,
    single_zoom: u8,
    layer: Layer,
}

impl<S: MapSurface> MarkerReconciler<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            markers: HashMap::new(),
            pending: None,
            single_zoom: DEFAULT_SINGLE_ZOOM,
            layer: Layer::default(),
        }
    }

    pub fn with_single_zoom(mut self, zoom: u8) -> Self {
        self.single_zoom = zoom;
        self
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    #[cfg(test)]
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.markers.contains_key(id)
    }

    pub fn reconcile(&mut self, stations: &[Station]) -> ReconcileOutcome {
        if !self.surface.is_ready() {
            debug!("map not ready, deferring {} stations", stations.len());
            self.pending = Some(stations.to_vec());
            return ReconcileOutcome {
                deferred: true,
                ..ReconcileOutcome::default()
            };
        }
        self.pending = None;
        self.apply(stations)
    }

    pub fn on_ready(&mut self) -> Option<ReconcileOutcome> {
        if !self.surface.is_ready() {
            return None;
        }
        let pending = self.pending.take()?;
        Some(self.apply(&pending))
    }

    // Recolours every placed marker; the viewport stays where it is.
    pub fn set_layer(&mut self, layer: Layer) -> usize {
        if self.layer == layer {
            return 0;
        }
        self.layer = layer;
        let mut recoloured = 0;
        for placed in self.markers.values_mut() {
            let handle = create(&mut self.surface, &placed.station, layer);
            let old = std::mem::replace(&mut placed.handle, handle);
            self.surface.remove_marker(old);
            recoloured += 1;
        }
        debug!("layer {} applied to {recoloured} markers", layer.label());
        recoloured
    }

    pub fn focus(&mut self, id: &str) -> bool {
        match self.markers.get(id) {
            Some(placed) => {
                let coord = placed.station.coordinate();
                self.surface.set_view(coord, self.single_zoom);
                true
            }
            None => false,
        }
    }

    pub fn teardown(&mut self) {
        self.pending = None;
        let count = self.markers.len();
        for (_, placed) in self.markers.drain() {
            self.surface.remove_marker(placed.handle);
        }
        debug!("reconciler torn down, removed {count} markers");
    }

    fn apply(&mut self, stations: &[Station]) -> ReconcileOutcome {
        let mut seen = HashSet::new();
        let incoming: Vec<&Station> = stations
            .iter()
            .filter(|s| seen.insert(s.id.as_str()))
            .collect();

        let stale: Vec<String> = self
            .markers
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();

        let mut outcome = ReconcileOutcome::default();
        for id in stale {
            if let Some(placed) = self.markers.remove(&id) {
                trace!("removing marker {id}");
                self.surface.remove_marker(placed.handle);
                outcome.removed += 1;
            }
        }

        for station in incoming {
            if self.markers.contains_key(&station.id) {
                continue;
            }
            trace!("adding marker {}", station.id);
            let handle = create(&mut self.surface, station, self.layer);
            self.markers.insert(
                station.id.clone(),
                Placed {
                    handle,
                    station: station.clone(),
                },
            );
            outcome.added += 1;
        }

        if outcome.added > 0 || outcome.removed > 0 {
            self.fit_view();
        }
        outcome
    }

    fn fit_view(&mut self) {
        match self.markers.len() {
            0 => {}
            1 => {
                if let Some(placed) = self.markers.values().next() {
                    let coord = placed.station.coordinate();
                    self.surface.set_view(coord, self.single_zoom);
                }
            }
            _ => {
                let handles: Vec<&S::Handle> = self.markers.values().map(|p| &p.handle).collect();
                self.surface.fit_bounds(&handles);
            }
        }
    }
}

fn create<S: MapSurface>(surface: &mut S, station: &Station, layer: Layer) -> S::Handle {
    surface.create_marker(
        station.coordinate(),
        station.marker_color(layer),
        &popup_html(station),
    )
}

pub fn popup_html(station: &Station) -> String {
    let mut html = format!(
        "<strong>{}</strong><br/>AQI {} ({})",
        escape_html(&station.name),
        station.aqi,
        station.status().label()
    );
    for (pollutant, value) in &station.pollutants {
        html.push_str(&format!("<br/>{}: {:.1}", pollutant.label(), value));
    }
    html.push_str(&format!(
        "<br/><small>Updated {}</small>",
        station.observed_at.format("%Y-%m-%d %H:%M UTC")
    ));
    if station.synthetic {
        html.push_str("<br/><em>Demo data: live sources unavailable</em>");
    }
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}


#[cfg(test)]
pub(crate) fn test_station(id: &str, aqi: u32, lat: f64, lng: f64) -> Station {
    Station {
        id: id.to_string(),
        name: format!("{id} station"),
        lat,
        lng,
        aqi,
        pollutants: Default::default(),
        observed_at: chrono::Utc::now(),
        synthetic: false,
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{Op, RecordingMap};
    use super::{popup_html, test_station, MarkerReconciler, DEFAULT_SINGLE_ZOOM};
    use crate::model::{Coordinate, Layer, Pollutant, NO_READING_COLOR};

    #[test]
    fn diff_removes_old_and_adds_new_only() {
        let map = RecordingMap::ready();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);
        let a = test_station("A", 20, 10.0, 10.0);
        let b = test_station("B", 120, 11.0, 11.0);
        let c = test_station("C", 250, 12.0, 12.0);

        let first = rec.reconcile(&[a, b.clone()]);
        assert_eq!((first.added, first.removed), (2, 0));
        let creates = probe.creates();
        let handle_a = creates.iter().find(|c| c.1.lat == 10.0).unwrap().0;
        let handle_b = creates.iter().find(|c| c.1.lat == 11.0).unwrap().0;
        probe.ops.borrow_mut().clear();

        let second = rec.reconcile(&[b, c]);
        assert_eq!((second.added, second.removed), (1, 1));
        assert_eq!(probe.removes(), vec![handle_a]);
        let creates = probe.creates();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].1, Coordinate::new(12.0, 12.0));
        assert_eq!(creates[0].2, "#7c2d12");
        assert_ne!(creates[0].0, handle_b);
        assert!(rec.contains("B"));
        assert!(!rec.contains("A"));
        let mut expected = vec![handle_b, creates[0].0];
        expected.sort_unstable();
        assert_eq!(probe.ops.borrow().last(), Some(&Op::FitBounds(expected)));
    }

    #[test]
    fn identical_input_is_idempotent() {
        let map = RecordingMap::ready();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);
        let stations = vec![
            test_station("A", 20, 10.0, 10.0),
            test_station("B", 60, 11.0, 11.0),
        ];
        rec.reconcile(&stations);
        let before = probe.ops.borrow().len();
        let outcome = rec.reconcile(&stations);
        assert_eq!((outcome.added, outcome.removed), (0, 0));
        assert_eq!(probe.ops.borrow().len(), before);
    }

    #[test]
    fn single_marker_centers_view() {
        let map = RecordingMap::ready();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);
        rec.reconcile(&[test_station("A", 20, 10.0, 20.0)]);
        assert_eq!(
            probe.ops.borrow().last(),
            Some(&Op::SetView(Coordinate::new(10.0, 20.0), DEFAULT_SINGLE_ZOOM))
        );
    }

    #[test]
    fn duplicate_ids_create_one_marker() {
        let map = RecordingMap::ready();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);
        rec.reconcile(&[
            test_station("A", 20, 10.0, 20.0),
            test_station("A", 90, 30.0, 40.0),
        ]);
        assert_eq!(probe.creates().len(), 1);
        assert_eq!(probe.creates()[0].1, Coordinate::new(10.0, 20.0));
    }

    #[test]
    fn not_ready_defers_until_ready_exactly_once() {
        let map = RecordingMap::default();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);

        let outcome = rec.reconcile(&[test_station("A", 20, 1.0, 1.0)]);
        assert!(outcome.deferred);
        let outcome = rec.reconcile(&[test_station("B", 20, 2.0, 2.0)]);
        assert!(outcome.deferred);
        assert!(probe.ops.borrow().is_empty());
        assert_eq!(rec.on_ready(), None);

        *probe.ready.borrow_mut() = true;
        let applied = rec.on_ready().unwrap();
        assert_eq!(applied.added, 1);
        assert!(rec.contains("B"));
        assert!(!rec.contains("A"));
        assert_eq!(rec.on_ready(), None);
        assert_eq!(probe.creates().len(), 1);
    }

    #[test]
    fn ready_reconcile_replaces_pending() {
        let map = RecordingMap::default();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);
        rec.reconcile(&[test_station("A", 20, 1.0, 1.0)]);
        *probe.ready.borrow_mut() = true;
        rec.reconcile(&[test_station("B", 20, 2.0, 2.0)]);
        assert!(!rec.has_pending());
        assert_eq!(rec.on_ready(), None);
        assert_eq!(probe.creates().len(), 1);
    }

    #[test]
    fn teardown_removes_every_marker() {
        let map = RecordingMap::ready();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);
        rec.reconcile(&[
            test_station("A", 20, 1.0, 1.0),
            test_station("B", 20, 2.0, 2.0),
        ]);
        rec.teardown();
        assert_eq!(rec.marker_count(), 0);
        let mut removed = probe.removes();
        removed.sort_unstable();
        assert_eq!(removed, vec![1, 2]);
    }

    #[test]
    fn focus_centers_known_marker() {
        let map = RecordingMap::ready();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map).with_single_zoom(7);
        rec.reconcile(&[
            test_station("A", 20, 1.0, 1.0),
            test_station("B", 20, 2.0, 3.0),
        ]);
        assert!(rec.focus("B"));
        assert_eq!(
            probe.ops.borrow().last(),
            Some(&Op::SetView(Coordinate::new(2.0, 3.0), 7))
        );
        assert!(!rec.focus("missing"));
    }

    #[test]
    fn popup_escapes_and_flags_demo() {
        let mut station = test_station("A", 42, 1.0, 1.0);
        station.name = "<Delhi & Co>".to_string();
        station.synthetic = true;
        let html = popup_html(&station);
        assert!(html.contains("&lt;Delhi &amp; Co&gt;"));
        assert!(html.contains("AQI 42 (Good)"));
        assert!(html.contains("Demo data"));
    }

    #[test]
    fn layer_switch_recolours_without_moving_the_view() {
        let map = RecordingMap::ready();
        let probe = map.clone();
        let mut rec = MarkerReconciler::new(map);
        let mut a = test_station("A", 180, 1.0, 1.0);
        a.pollutants.insert(Pollutant::Pm25, 30.0);
        let b = test_station("B", 20, 2.0, 2.0);
        rec.reconcile(&[a.clone(), b.clone()]);
        probe.ops.borrow_mut().clear();

        assert_eq!(rec.set_layer(Layer::Pm25), 2);
        assert_eq!(rec.layer(), Layer::Pm25);
        let mut colours: Vec<String> = probe.creates().into_iter().map(|c| c.2).collect();
        colours.sort();
        assert_eq!(colours, vec!["#10b981".to_string(), NO_READING_COLOR.to_string()]);
        assert_eq!(probe.removes().len(), 2);
        assert!(!probe
            .ops
            .borrow()
            .iter()
            .any(|op| matches!(op, Op::FitBounds(_) | Op::SetView(..))));

        probe.ops.borrow_mut().clear();
        assert_eq!(rec.set_layer(Layer::Pm25), 0);
        let outcome = rec.reconcile(&[a, b]);
        assert_eq!((outcome.added, outcome.removed), (0, 0));
        assert!(probe.ops.borrow().is_empty());
        assert_eq!(rec.marker_count(), 2);
    }
}
