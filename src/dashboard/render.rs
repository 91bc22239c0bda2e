//! Server-side HTML for the dashboard page.
//!
//! Plain string building: metric cards, an inline SVG chart per sensor, the
//! alert list and the control forms. The page reloads itself on the tick
//! interval while ticking is active.

use super::state::{DisplayState, HistoryBuffer, KindState};
use crate::broker::ConnectionStatus;
use crate::core::{SensorKind, Thresholds};
use std::fmt::Write;

const CHART_WIDTH: f64 = 640.0;
const CHART_HEIGHT: f64 = 160.0;

/// Escapes HTML special characters.
#[must_use]
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Value and delta text for a metric card, `("--", None)` before any reading.
#[must_use]
pub fn metric_text(panel: &KindState) -> (String, Option<String>) {
    let unit = panel.kind.unit();
    panel.metric.map_or_else(
        || ("--".to_string(), None),
        |m| {
            (
                format!("{:.1} {unit}", m.value),
                Some(format!("{:+.1} {unit}", m.delta)),
            )
        },
    )
}

/// SVG polyline `points` attribute scaled into the chart box.
#[must_use]
pub fn polyline_points(history: &HistoryBuffer) -> String {
    let values: Vec<f64> = history.iter().map(|p| p.value).collect();
    if values.is_empty() {
        return String::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if (max - min).abs() < f64::EPSILON {
        1.0
    } else {
        max - min
    };
    #[allow(clippy::cast_precision_loss)] // at most a few hundred points
    let step = if values.len() > 1 {
        CHART_WIDTH / (values.len() - 1) as f64
    } else {
        0.0
    };

    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let x = step * i as f64;
        let y = CHART_HEIGHT - ((value - min) / span) * CHART_HEIGHT;
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{x:.1},{y:.1}");
    }
    out
}

fn connection_text(connection: Option<&ConnectionStatus>) -> String {
    match connection {
        None => "store only".to_string(),
        Some(ConnectionStatus::Idle) => "idle".to_string(),
        Some(ConnectionStatus::Connecting) => "connecting...".to_string(),
        Some(ConnectionStatus::Connected) => "online".to_string(),
        Some(ConnectionStatus::Failed { reason }) => format!("offline ({reason})"),
        Some(ConnectionStatus::Closed) => "closed".to_string(),
    }
}

fn render_panel(out: &mut String, panel: &KindState) {
    let (value, delta) = metric_text(panel);
    let color = match panel.kind {
        SensorKind::Temperature => "#ff4b4b",
        SensorKind::Humidity => "#00cc96",
    };
    let time = panel
        .metric
        .map_or_else(|| "waiting...".to_string(), |m| m.at.format("%H:%M:%S").to_string());

    let _ = write!(
        out,
        r#"<section class="panel">
<h2>{kind}</h2>
<div class="metric">{value}</div>
<div class="delta">{delta}</div>
<div class="time">last reading: {time}</div>
<svg viewBox="0 0 {w} {h}" preserveAspectRatio="none"><polyline fill="none" stroke="{color}" stroke-width="2" points="{points}"/></svg>
<div class="links"><a href="/export/{slug}.csv">CSV</a> <a href="/export/{slug}.json">JSON</a> ({count}/{capacity} points)</div>
</section>"#,
        kind = panel.kind,
        delta = delta.unwrap_or_default(),
        w = CHART_WIDTH,
        h = CHART_HEIGHT,
        points = polyline_points(&panel.history),
        slug = panel.kind.slug(),
        count = panel.history.len(),
        capacity = panel.history.capacity(),
    );
}

fn render_threshold_form(out: &mut String, action: &str, title: &str, t: &Thresholds) {
    let _ = write!(
        out,
        r#"<form method="post" action="{action}"><h3>{title}</h3>
<label>Temp max <input name="temp_max" type="number" step="0.1" value="{:.1}"></label>
<label>Temp min <input name="temp_min" type="number" step="0.1" value="{:.1}"></label>
<label>Humid max <input name="umid_max" type="number" step="0.1" value="{:.1}"></label>
<label>Humid min <input name="umid_min" type="number" step="0.1" value="{:.1}"></label>
<button type="submit">Save</button></form>"#,
        t.temp_max, t.temp_min, t.humid_max, t.humid_min
    );
}

/// Renders the full dashboard page.
#[must_use]
pub fn page(state: &DisplayState, source_label: &str) -> String {
    let mut out = String::with_capacity(8 * 1024);
    let refresh = if state.paused {
        String::new()
    } else {
        format!(r#"<meta http-equiv="refresh" content="{}">"#, state.refresh_secs)
    };

    let _ = write!(
        out,
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>EcoSense IoT</title>{refresh}
<style>
body {{ font-family: system-ui; background: #1a1a2e; color: #eee; padding: 1.5rem; }}
.panel {{ background: #16213e; border-radius: 8px; padding: 1rem; margin-bottom: 1rem; }}
.metric {{ font-size: 2.5rem; }}
.delta, .time, .links {{ color: #999; }}
svg {{ width: 100%; height: 160px; }}
.error {{ color: #ff6b6b; }} .notice {{ color: #7bd389; }}
form {{ display: inline-block; margin: 0.5rem 1rem 0.5rem 0; vertical-align: top; }}
a {{ color: #8ab4f8; }}
</style></head>
<body>
<h1>EcoSense IoT</h1>
<p>Source: {source} | Broker: {connection} | Refresh: {secs}s {status} | Last tick: {tick} | Last history load: {history}</p>
"#,
        source = html_escape(source_label),
        connection = html_escape(&connection_text(state.connection.as_ref())),
        secs = state.refresh_secs,
        status = if state.paused { "(paused)" } else { "" },
        tick = state
            .last_tick
            .map_or_else(|| "never".to_string(), |t| t.format("%H:%M:%S").to_string()),
        history = state
            .last_history_load
            .map_or_else(|| "never".to_string(), |t| t.format("%H:%M:%S").to_string()),
    );

    if let Some(error) = &state.last_error {
        let _ = write!(out, r#"<p class="error">{}</p>"#, html_escape(error));
    }
    if let Some(notice) = &state.notice {
        let _ = write!(out, r#"<p class="notice">{}</p>"#, html_escape(notice));
    }

    render_panel(&mut out, &state.temperature);
    render_panel(&mut out, &state.humidity);

    out.push_str(r#"<section class="panel"><h2>Alerts</h2>"#);
    if state.alerts.is_empty() {
        out.push_str("<p>No threshold breaches.</p>");
    } else {
        out.push_str("<ul>");
        for alert in state.alerts.iter().rev() {
            let _ = write!(
                out,
                "<li>{} {}</li>",
                alert.at.format("%H:%M:%S"),
                html_escape(&alert.describe())
            );
        }
        out.push_str("</ul>");
    }
    out.push_str("</section>");

    out.push_str(r#"<section class="panel"><h2>Controls</h2>"#);
    render_threshold_form(&mut out, "/thresholds", "Send thresholds to device", &state.limits);
    render_threshold_form(&mut out, "/limits", "Local alert limits", &state.limits);
    let _ = write!(
        out,
        r#"<form method="post" action="/interval"><h3>Refresh</h3>
<input name="secs" type="number" min="1" max="60" value="{}"><button type="submit">Set</button></form>
<form method="post" action="/toggle"><button type="submit">{}</button></form>
<form method="post" action="/refresh"><button type="submit">Refresh now</button></form>
<form method="post" action="/history"><button type="submit">Reload history (expensive)</button></form>
<form method="post" action="/limits/load"><button type="submit">Load stored thresholds</button></form>
<form method="post" action="/reset"><button type="submit">Reset connection</button></form>
</section></body></html>"#,
        state.refresh_secs,
        if state.paused { "Resume" } else { "Pause" },
    );

    out
}
