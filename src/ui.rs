use chrono::Local;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};
use ratatui::Frame;
use std::time::SystemTime;

use crate::app::{App, InputMode};
use crate::model::{AqiStatus, Station};
use crate::terminal_map::TerminalMap;

const ACCENT: Color = Color::Cyan;
const DIM: Color = Color::DarkGray;
const WARN: Color = Color::Yellow;
const HIGHLIGHT_FG: Color = Color::Black;
const HIGHLIGHT_BG: Color = Color::Cyan;

pub fn ui(f: &mut Frame, app: &mut App, map: &TerminalMap) {
    let size = f.area();
    let banner_height = if app.has_synthetic() { 1 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(banner_height),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(size);

    render_header(f, chunks[0], app);
    if banner_height > 0 {
        render_advisory(f, chunks[1]);
    }
    render_body(f, chunks[2], app, map);
    render_footer(f, chunks[3], app);

    if app.input_mode == InputMode::Help {
        render_help_menu(f, size);
    }
}

fn render_body(f: &mut Frame, area: Rect, app: &mut App, map: &TerminalMap) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(area);
    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(12)])
        .split(columns[1]);

    let focus = app.selected_station().map(Station::coordinate);
    let title = format!("MAP {} markers", map.markers().count());
    map.render(f, columns[0], &title, focus);
    render_table(f, side[0], app);
    render_details(f, side[1], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let user = app.session.display_name().unwrap_or("guest");
    let update_time = app
        .last_update
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--".to_string());
    let state = match app.fetching {
        Some(seq) => Span::styled(format!("FETCHING #{seq}"), Style::default().fg(WARN)),
        None => Span::styled("IDLE", Style::default().fg(Color::Green)),
    };
    let avg = app
        .average_aqi()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "--".to_string());

    let worst = app
        .worst()
        .map(|s| format!("{} {}", s.name.trim_end_matches(" AQI Station"), s.aqi))
        .unwrap_or_else(|| "--".to_string());

    let line_top = Line::from(vec![
        Span::styled(
            "AQI MAP",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("STATIONS {}", app.stations.len()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        Span::raw(format!("AVG {avg}")),
        Span::raw(" | "),
        Span::raw(format!("WORST {worst}")),
        Span::raw(" | "),
        Span::raw(format!("QUERY {}", app.query_label)),
        Span::raw(" | "),
        Span::styled(format!("USER {user}"), Style::default().fg(DIM)),
    ]);

    let mut bottom = vec![
        Span::raw(format!("LAST {update_time}")),
        Span::raw(" | "),
        Span::raw(format!("REF {}s", app.refresh.as_secs())),
        Span::raw(" | "),
        Span::styled(
            format!("LAYER {}", app.layer.label()),
            Style::default().fg(ACCENT),
        ),
        Span::raw(" | "),
        state,
    ];
    if app.stale_discarded > 0 {
        bottom.push(Span::raw(" | "));
        bottom.push(Span::styled(
            format!("STALE {}", app.stale_discarded),
            Style::default().fg(DIM),
        ));
    }
    for (status, count) in app.status_counts() {
        bottom.push(Span::raw(" | "));
        bottom.push(Span::styled(
            format!("{} {count}", status.label().to_ascii_uppercase()),
            Style::default().fg(status_color(status)),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .title("AIR QUALITY");
    let paragraph = Paragraph::new(vec![line_top, Line::from(bottom)]).block(block);
    f.render_widget(paragraph, area);
}

fn render_advisory(f: &mut Frame, area: Rect) {
    let line = Line::from(Span::styled(
        " Live air-quality sources are unavailable. Showing demo readings.",
        Style::default()
            .fg(Color::Black)
            .bg(WARN)
            .add_modifier(Modifier::BOLD),
    ));
    f.render_widget(Paragraph::new(line).style(Style::default().bg(WARN)), area);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header = Row::new(vec![
        Cell::from("STATION"),
        Cell::from("AQI"),
        Cell::from("STATUS"),
    ])
    .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD));

    let rows = app.stations.iter().map(|station| {
        let status = station.status();
        let mut name = station.name.trim_end_matches(" AQI Station").to_string();
        if station.synthetic {
            name.push_str(" DEMO");
        }
        Row::new(vec![
            Cell::from(name),
            Cell::from(format!("{:>3}", station.aqi))
                .style(Style::default().fg(status_color(status))),
            Cell::from(status.label()).style(Style::default().fg(status_color(status))),
        ])
    });

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .title("STATIONS");
    let table = Table::new(
        rows,
        [
            Constraint::Min(10),
            Constraint::Length(4),
            Constraint::Length(23),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(1)
    .row_highlight_style(
        Style::default()
            .fg(HIGHLIGHT_FG)
            .bg(HIGHLIGHT_BG)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_details(f: &mut Frame, area: Rect, app: &App) {
    let lines = match app.selected_station() {
        Some(station) => detail_lines(station),
        None => vec![Line::from(Span::styled(
            "No station selected",
            Style::default().fg(DIM),
        ))],
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .title("DETAILS");
    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn detail_lines(station: &Station) -> Vec<Line<'static>> {
    let status = station.status();
    let mut lines = vec![
        Line::from(Span::styled(
            station.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::raw("AQI "),
            Span::styled(
                format!("{} ({})", station.aqi, status.label()),
                Style::default()
                    .fg(status_color(status))
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(format!("AT  {}", station.coordinate())),
    ];
    if station.pollutants.is_empty() {
        lines.push(Line::from(Span::styled(
            "No pollutant breakdown",
            Style::default().fg(DIM),
        )));
    } else {
        let parts: Vec<String> = station
            .pollutants
            .iter()
            .map(|(p, v)| format!("{} {v:.1}", p.label()))
            .collect();
        lines.push(Line::from(parts.join("  ")));
    }
    lines.push(Line::from(format!(
        "UPD {}",
        station
            .observed_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
    )));
    if station.synthetic {
        lines.push(Line::from(Span::styled(
            "Demo reading",
            Style::default().fg(WARN),
        )));
    }
    lines
}

fn render_footer(f: &mut Frame, area: Rect, app: &App) {
    let line = if app.input_mode == InputMode::Search {
        Line::from(vec![
            Span::styled("SEARCH ", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
            Span::raw(format!("{}_", app.search_edit)),
            Span::styled("  Enter go • Esc cancel", Style::default().fg(DIM)),
        ])
    } else {
        let mut spans = vec![Span::styled(
            "q quit  / search  r refresh  g my location  t tracked  a track  l layer  ↑/↓ select  enter focus  ? help",
            Style::default().fg(DIM),
        )];
        if let Some(message) = app.status_message(SystemTime::now()) {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                message.to_string(),
                Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
            ));
        }
        Line::from(spans)
    };
    f.render_widget(Paragraph::new(line), area);
}

fn render_help_menu(f: &mut Frame, area: Rect) {
    let popup = centered_rect(60, 24, area);
    f.render_widget(Clear, popup);

    let section = |title: &'static str| {
        Line::from(Span::styled(
            title,
            Style::default().fg(DIM).add_modifier(Modifier::BOLD),
        ))
    };
    let mut lines = vec![
        section("Places"),
        Line::from("  /          Search a place (name or \"lat, lng\")"),
        Line::from("  g          Air quality at my configured location"),
        Line::from("  t          Show tracked places"),
        Line::from("  a          Track the last searched place (saved to config)"),
        Line::from("  r          Refresh now"),
        Line::from("  l          Colour markers by AQI or PM2.5"),
        Line::from(""),
        section("Navigation"),
        Line::from("  ↑/↓        Move selection"),
        Line::from("  Enter      Center the map on the selection"),
        Line::from(""),
        section("Legend"),
    ];
    let legend = [
        AqiStatus::Good,
        AqiStatus::Moderate,
        AqiStatus::UnhealthySensitive,
        AqiStatus::Unhealthy,
        AqiStatus::VeryUnhealthy,
        AqiStatus::Hazardous,
    ];
    for status in legend {
        lines.push(Line::from(vec![
            Span::styled("  ● ", Style::default().fg(status_color(status))),
            Span::raw(status.label()),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled("  ● ", Style::default().fg(Color::Gray)),
        Span::raw("No PM2.5 reading"),
    ]));
    lines.push(Line::from(Span::styled(
        "Press Esc to close",
        Style::default().fg(DIM),
    )));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .title("HELP");
    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, popup);
}

fn status_color(status: AqiStatus) -> Color {
    match status {
        AqiStatus::Good => Color::Green,
        AqiStatus::Moderate => Color::Yellow,
        AqiStatus::UnhealthySensitive => Color::LightRed,
        AqiStatus::Unhealthy => Color::Red,
        AqiStatus::VeryUnhealthy => Color::Magenta,
        AqiStatus::Hazardous => Color::Rgb(0x9f, 0x12, 0x39),
    }
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let height = height.min(area.height.saturating_sub(2)).max(3);
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(height),
            Constraint::Min(1),
        ])
        .split(area);
    let vertical = popup_layout[1];
    let width = (vertical.width * percent_x / 100).max(20);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(width),
            Constraint::Min(1),
        ])
        .split(vertical);
    horizontal[1]
}

#[cfg(test)]
mod tests {
    use super::{detail_lines, ui};
    use crate::app::App;
    use crate::markers::{test_station, MapSurface};
    use crate::model::Session;
    use crate::terminal_map::TerminalMap;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn details_flag_demo_readings() {
        let mut station = test_station("demo:delhi@1", 160, 28.6139, 77.2090);
        station.synthetic = true;
        let text: Vec<String> = detail_lines(&station)
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.to_string()).collect())
            .collect();
        assert!(text.iter().any(|l| l.contains("160 (Unhealthy)")));
        assert!(text.iter().any(|l| l == "Demo reading"));
    }

    #[test]
    fn draws_on_a_test_backend() {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        let mut app = App::new(
            vec!["Delhi".to_string()],
            Session::default(),
            None,
            Duration::from_secs(30),
            PathBuf::from("unused.toml"),
        );
        let mut map = TerminalMap::new();
        map.mark_ready();
        map.create_marker(
            crate::model::Coordinate::new(28.6139, 77.2090),
            "#ef4444",
            "<strong>Delhi AQI Station</strong>",
        );
        terminal.draw(|f| ui(f, &mut app, &map)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let rendered: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(rendered.contains("AIR QUALITY"));
        assert!(rendered.contains("STATIONS"));
        assert!(rendered.contains("LAYER AQI"));
    }
}
