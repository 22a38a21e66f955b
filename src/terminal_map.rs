use std::collections::BTreeMap;

use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line as TextLine, Span};
use ratatui::widgets::canvas::{Canvas, Map, MapResolution, Points};
use ratatui::widgets::{Block, BorderType, Borders};
use ratatui::Frame;

use crate::markers::MapSurface;
use crate::model::Coordinate;

const MIN_SPAN_DEG: f64 = 0.5;
const FIT_PADDING: f64 = 0.15;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl Viewport {
    pub const WORLD: Viewport = Viewport {
        west: -180.0,
        east: 180.0,
        south: -90.0,
        north: 90.0,
    };

    fn centered(center: Coordinate, lng_span: f64, lat_span: f64) -> Self {
        let lng_span = lng_span.clamp(MIN_SPAN_DEG, 360.0);
        let lat_span = lat_span.clamp(MIN_SPAN_DEG, 180.0);
        Viewport {
            west: center.lng - lng_span / 2.0,
            east: center.lng + lng_span / 2.0,
            south: (center.lat - lat_span / 2.0).max(-90.0),
            north: (center.lat + lat_span / 2.0).min(90.0),
        }
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        (self.south..=self.north).contains(&coord.lat) && (self.west..=self.east).contains(&coord.lng)
    }
}

#[derive(Clone, Debug)]
pub struct PlottedMarker {
    pub coord: Coordinate,
    pub color: Color,
    pub popup: String,
}

impl PlottedMarker {
    pub fn label(&self) -> String {
        popup_lines(&self.popup).into_iter().next().unwrap_or_default()
    }
}

// Becomes ready after the first frame.
pub struct TerminalMap {
    ready: bool,
    next_handle: u64,
    markers: BTreeMap<u64, PlottedMarker>,
    viewport: Viewport,
}

impl Default for TerminalMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalMap {
    pub fn new() -> Self {
        Self {
            ready: false,
            next_handle: 1,
            markers: BTreeMap::new(),
            viewport: Viewport::WORLD,
        }
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn markers(&self) -> impl Iterator<Item = &PlottedMarker> {
        self.markers.values()
    }

    pub fn render(&self, f: &mut Frame, area: Rect, title: &str, highlight: Option<Coordinate>) {
        let view = self.viewport();
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Plain)
            .title(title.to_string());
        let show_labels = self.markers.len() <= 12;
        let canvas = Canvas::default()
            .block(block)
            .x_bounds([view.west, view.east])
            .y_bounds([view.south, view.north])
            .marker(Marker::Braille)
            .paint(|ctx| {
                ctx.draw(&Map {
                    color: Color::DarkGray,
                    resolution: MapResolution::High,
                });
                ctx.layer();
                for marker in self.markers.values() {
                    let coords = [(marker.coord.lng, marker.coord.lat)];
                    ctx.draw(&Points {
                        coords: &coords,
                        color: marker.color,
                    });
                }
                if let Some(focus) = highlight {
                    ctx.print(
                        focus.lng,
                        focus.lat,
                        Span::styled("◎", Style::default().fg(Color::White)),
                    );
                }
                if show_labels {
                    for marker in self.markers.values().filter(|m| view.contains(m.coord)) {
                        let label = short_label(&marker.label());
                        ctx.print(
                            marker.coord.lng,
                            marker.coord.lat,
                            TextLine::from(Span::styled(
                                format!(" {label}"),
                                Style::default()
                                    .fg(marker.color)
                                    .add_modifier(Modifier::BOLD),
                            )),
                        );
                    }
                }
            });
        f.render_widget(canvas, area);
    }
}

impl MapSurface for TerminalMap {
    type Handle = u64;

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn create_marker(&mut self, coord: Coordinate, color: &str, popup_html: &str) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.markers.insert(
            handle,
            PlottedMarker {
                coord,
                color: parse_color(color),
                popup: popup_html.to_string(),
            },
        );
        handle
    }

    fn remove_marker(&mut self, handle: u64) {
        self.markers.remove(&handle);
    }

    fn fit_bounds(&mut self, handles: &[&u64]) {
        let coords: Vec<Coordinate> = handles
            .iter()
            .filter_map(|h| self.markers.get(*h).map(|m| m.coord))
            .collect();
        let Some(first) = coords.first() else {
            return;
        };
        let (mut west, mut east, mut south, mut north) = (first.lng, first.lng, first.lat, first.lat);
        for c in &coords[1..] {
            west = west.min(c.lng);
            east = east.max(c.lng);
            south = south.min(c.lat);
            north = north.max(c.lat);
        }
        let center = Coordinate::new((south + north) / 2.0, (west + east) / 2.0);
        let lng_span = (east - west) * (1.0 + 2.0 * FIT_PADDING);
        let lat_span = (north - south) * (1.0 + 2.0 * FIT_PADDING);
        self.viewport = Viewport::centered(center, lng_span, lat_span);
    }

    fn set_view(&mut self, coord: Coordinate, zoom: u8) {
        let scale = 2f64.powi(i32::from(zoom.min(18)));
        self.viewport = Viewport::centered(coord, 360.0 / scale, 180.0 / scale);
    }
}

fn parse_color(hex: &str) -> Color {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 {
        return Color::White;
    }
    match u32::from_str_radix(digits, 16) {
        Ok(rgb) => Color::Rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8),
        Err(_) => Color::White,
    }
}

// Plain-text lines of a popup: `<br/>` breaks lines, other tags are dropped.
pub fn popup_lines(html: &str) -> Vec<String> {
    html.split("<br/>")
        .map(|segment| {
            let mut text = String::with_capacity(segment.len());
            let mut in_tag = false;
            for ch in segment.chars() {
                match ch {
                    '<' => in_tag = true,
                    '>' => in_tag = false,
                    c if !in_tag => text.push(c),
                    _ => {}
                }
            }
            text.replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&#39;", "'")
                .replace("&amp;", "&")
        })
        .filter(|line| !line.trim().is_empty())
        .collect()
}

fn short_label(label: &str) -> String {
    let trimmed = label.trim_end_matches(" AQI Station");
    if trimmed.chars().count() > 18 {
        let mut out: String = trimmed.chars().take(17).collect();
        out.push('…');
        out
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_color, popup_lines, short_label, TerminalMap, Viewport};
    use crate::markers::MapSurface;
    use crate::model::Coordinate;
    use ratatui::style::Color;

    #[test]
    fn ready_only_after_first_frame() {
        let mut map = TerminalMap::new();
        assert!(!map.is_ready());
        map.mark_ready();
        assert!(map.is_ready());
    }

    #[test]
    fn markers_come_and_go_by_handle() {
        let mut map = TerminalMap::new();
        let a = map.create_marker(Coordinate::new(1.0, 2.0), "#10b981", "<strong>A</strong>");
        let b = map.create_marker(Coordinate::new(3.0, 4.0), "#ef4444", "<strong>B</strong>");
        assert_ne!(a, b);
        map.remove_marker(a);
        let left: Vec<String> = map.markers().map(|m| m.label()).collect();
        assert_eq!(left, vec!["B".to_string()]);
        map.remove_marker(a);
        assert_eq!(map.markers().count(), 1);
    }

    #[test]
    fn fit_bounds_covers_every_marker() {
        let mut map = TerminalMap::new();
        let delhi = Coordinate::new(28.6139, 77.2090);
        let chennai = Coordinate::new(13.0827, 80.2707);
        let a = map.create_marker(delhi, "#f59e0b", "");
        let b = map.create_marker(chennai, "#f59e0b", "");
        map.fit_bounds(&[&a, &b]);
        let view = map.viewport();
        assert!(view.contains(delhi));
        assert!(view.contains(chennai));
        assert!(view.east - view.west < 360.0);
    }

    #[test]
    fn set_view_narrows_with_zoom() {
        let mut map = TerminalMap::new();
        map.set_view(Coordinate::new(28.6139, 77.2090), 2);
        let wide = map.viewport();
        map.set_view(Coordinate::new(28.6139, 77.2090), 6);
        let narrow = map.viewport();
        assert!(narrow.east - narrow.west < wide.east - wide.west);
        assert!(narrow.contains(Coordinate::new(28.6139, 77.2090)));
        assert_ne!(narrow, Viewport::WORLD);
    }

    #[test]
    fn colors_and_popup_text() {
        assert_eq!(parse_color("#10b981"), Color::Rgb(0x10, 0xb9, 0x81));
        assert_eq!(parse_color("teal"), Color::White);
        let lines = popup_lines("<strong>A &amp; B</strong><br/>AQI 42 (Good)<br/><small>x</small>");
        assert_eq!(lines, vec!["A & B", "AQI 42 (Good)", "x"]);
        assert_eq!(short_label("Delhi AQI Station"), "Delhi");
    }
}
