//! Dashboard display state.
//!
//! Process-local and rebuilt from scratch on restart: current value and delta
//! per sensor kind, a capped history ring buffer per kind, the alert list and
//! connection flags. Alerts are evaluated against limits held locally by this
//! dashboard, not against whatever the device last received.

use crate::{
    broker::ConnectionStatus,
    core::{Breach, SensorKind, Thresholds, history::HistoryPoint},
    entities::reading,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// One point of a history chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    /// When the value was measured
    pub timestamp: DateTime<Utc>,
    /// Measured value
    pub value: f64,
}

/// Fixed-capacity ring buffer; the oldest point is evicted first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryBuffer {
    capacity: usize,
    points: VecDeque<ChartPoint>,
}

impl HistoryBuffer {
    /// Creates an empty buffer holding at most `capacity` points (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a point, evicting the oldest when full.
    pub fn push(&mut self, point: ChartPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// Replaces the contents with `points` (oldest first), keeping only the newest
    /// `capacity` of them.
    pub fn replace(&mut self, points: impl IntoIterator<Item = ChartPoint>) {
        self.points.clear();
        for point in points {
            self.push(point);
        }
    }

    /// Number of points held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// `true` when no point is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Maximum number of points.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Points, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChartPoint> {
        self.points.iter()
    }
}

/// Current value of one sensor kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metric {
    /// Latest value
    pub value: f64,
    /// Latest value minus the one before it (0 when there is no previous value)
    pub delta: f64,
    /// When the latest value was measured
    pub at: DateTime<Utc>,
}

/// Everything shown for one sensor kind.
#[derive(Debug, Clone, Serialize)]
pub struct KindState {
    /// Which sensor this is
    pub kind: SensorKind,
    /// Latest value and trend, `None` until a reading arrives
    pub metric: Option<Metric>,
    /// Recent points for the chart
    pub history: HistoryBuffer,
    #[serde(skip)]
    last_reading_id: Option<i64>,
}

impl KindState {
    fn new(kind: SensorKind, capacity: usize) -> Self {
        Self {
            kind,
            metric: None,
            history: HistoryBuffer::new(capacity),
            last_reading_id: None,
        }
    }
}

/// A threshold breach seen by this dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    /// When the breaching value was measured
    pub at: DateTime<Utc>,
    /// Which sensor breached
    pub kind: SensorKind,
    /// The breaching value
    pub value: f64,
    /// Which limit was crossed
    pub breach: Breach,
}

impl AlertMessage {
    /// Human-readable one-liner.
    #[must_use]
    pub fn describe(&self) -> String {
        let unit = self.kind.unit();
        match self.breach {
            Breach::Above { limit } => format!(
                "{} {:.1}{unit} above maximum {:.1}{unit}",
                self.kind, self.value, limit
            ),
            Breach::Below { limit } => format!(
                "{} {:.1}{unit} below minimum {:.1}{unit}",
                self.kind, self.value, limit
            ),
        }
    }
}

/// Whole dashboard state.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayState {
    /// Temperature panel
    pub temperature: KindState,
    /// Humidity panel
    pub humidity: KindState,
    /// Newest alerts last, capped
    pub alerts: VecDeque<AlertMessage>,
    /// Locally held alert limits
    pub limits: Thresholds,
    /// Broker link, `None` when the dashboard reads only from the store
    pub connection: Option<ConnectionStatus>,
    /// Error from the most recent tick or action, cleared by the next success
    pub last_error: Option<String>,
    /// Informational message from the most recent action
    pub notice: Option<String>,
    /// When the last tick completed
    pub last_tick: Option<DateTime<Utc>>,
    /// When history was last loaded on request
    pub last_history_load: Option<DateTime<Utc>>,
    /// Ticking suspended by the user
    pub paused: bool,
    /// Seconds between ticks
    pub refresh_secs: u64,
    #[serde(skip)]
    alert_capacity: usize,
}

impl DisplayState {
    /// Fresh state with empty buffers of `history_capacity` points.
    #[must_use]
    pub fn new(history_capacity: usize, alert_capacity: usize, refresh_secs: u64) -> Self {
        Self {
            temperature: KindState::new(SensorKind::Temperature, history_capacity),
            humidity: KindState::new(SensorKind::Humidity, history_capacity),
            alerts: VecDeque::new(),
            limits: Thresholds::default(),
            connection: None,
            last_error: None,
            notice: None,
            last_tick: None,
            last_history_load: None,
            paused: false,
            refresh_secs,
            alert_capacity: alert_capacity.max(1),
        }
    }

    /// Panel for `kind`.
    #[must_use]
    pub const fn kind(&self, kind: SensorKind) -> &KindState {
        match kind {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Humidity => &self.humidity,
        }
    }

    fn kind_mut(&mut self, kind: SensorKind) -> &mut KindState {
        match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Humidity => &mut self.humidity,
        }
    }

    /// Records a value arriving in order (live feed). The delta is taken against
    /// the previously recorded value of the same kind.
    pub fn record(&mut self, kind: SensorKind, value: f64, at: DateTime<Utc>) {
        let previous = self.kind(kind).metric.map(|m| m.value);
        self.apply(kind, value, previous, at);
    }

    /// Applies the newest readings of one kind as returned by the store (newest
    /// first). Does nothing when the newest reading was already applied.
    pub fn apply_latest(&mut self, kind: SensorKind, newest_first: &[reading::Model]) {
        let Some(current) = newest_first.first() else {
            return;
        };
        if self.kind(kind).last_reading_id == Some(current.id) {
            return;
        }
        self.kind_mut(kind).last_reading_id = Some(current.id);
        let previous = newest_first.get(1).map(|r| r.value);
        self.apply(kind, current.value, previous, current.timestamp);
    }

    fn apply(&mut self, kind: SensorKind, value: f64, previous: Option<f64>, at: DateTime<Utc>) {
        let delta = previous.map_or(0.0, |p| value - p);
        let panel = self.kind_mut(kind);
        panel.metric = Some(Metric { value, delta, at });
        panel.history.push(ChartPoint {
            timestamp: at,
            value,
        });

        if let Some(breach) = self.limits.evaluate(kind, value) {
            self.push_alert(AlertMessage {
                at,
                kind,
                value,
                breach,
            });
        }
    }

    fn push_alert(&mut self, alert: AlertMessage) {
        while self.alerts.len() >= self.alert_capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// Replaces the chart of `kind` with a loaded history window (oldest first).
    pub fn load_history(&mut self, kind: SensorKind, window: &[HistoryPoint]) {
        self.kind_mut(kind)
            .history
            .replace(window.iter().map(|p| ChartPoint {
                timestamp: p.timestamp,
                value: p.value,
            }));
    }

    /// History of `kind` in export form.
    #[must_use]
    pub fn export_points(&self, kind: SensorKind) -> Vec<HistoryPoint> {
        self.kind(kind)
            .history
            .iter()
            .map(|p| HistoryPoint {
                timestamp: p.timestamp,
                kind: kind.storage_label().to_string(),
                value: p.value,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use chrono::Duration;

    fn point(value: f64) -> ChartPoint {
        ChartPoint {
            timestamp: Utc::now(),
            value,
        }
    }

    fn model(id: i64, value: f64) -> reading::Model {
        reading::Model {
            id,
            collection: "c".to_string(),
            kind: "temperatura".to_string(),
            value,
            timestamp: Utc::now() + Duration::seconds(id),
        }
    }

    #[test]
    fn test_history_never_exceeds_capacity() {
        let mut buffer = HistoryBuffer::new(100);
        for i in 0..1_000 {
            buffer.push(point(f64::from(i)));
            assert!(buffer.len() <= 100);
        }
        assert_eq!(buffer.len(), 100);
        // oldest evicted first
        assert_eq!(buffer.iter().next().map(|p| p.value), Some(900.0));
        assert_eq!(buffer.iter().last().map(|p| p.value), Some(999.0));
    }

    #[test]
    fn test_history_replace_keeps_newest() {
        let mut buffer = HistoryBuffer::new(3);
        buffer.replace((0..200).map(|i| point(f64::from(i))));
        let values: Vec<f64> = buffer.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![197.0, 198.0, 199.0]);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut buffer = HistoryBuffer::new(0);
        buffer.push(point(1.0));
        buffer.push(point(2.0));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_delta_for_consecutive_readings() {
        let mut state = DisplayState::new(100, 10, 15);
        state.record(SensorKind::Temperature, 21.0, Utc::now());
        assert_eq!(state.temperature.metric.unwrap().delta, 0.0);

        state.record(SensorKind::Temperature, 23.5, Utc::now());
        let metric = state.temperature.metric.unwrap();
        assert_eq!(metric.value, 23.5);
        assert_eq!(metric.delta, 2.5);

        // other kind unaffected
        assert!(state.humidity.metric.is_none());
    }

    #[test]
    fn test_apply_latest_from_store() {
        let mut state = DisplayState::new(100, 10, 15);

        state.apply_latest(SensorKind::Temperature, &[model(1, 20.0)]);
        assert_eq!(state.temperature.metric.unwrap().delta, 0.0);

        state.apply_latest(SensorKind::Temperature, &[model(2, 19.0), model(1, 20.0)]);
        assert_eq!(state.temperature.metric.unwrap().delta, -1.0);
        assert_eq!(state.temperature.history.len(), 2);

        // same newest reading again: no duplicate history point
        state.apply_latest(SensorKind::Temperature, &[model(2, 19.0), model(1, 20.0)]);
        assert_eq!(state.temperature.history.len(), 2);

        state.apply_latest(SensorKind::Temperature, &[]);
        assert_eq!(state.temperature.metric.unwrap().value, 19.0);
    }

    #[test]
    fn test_breaches_raise_alerts_against_local_limits() {
        let mut state = DisplayState::new(100, 2, 15);
        state.limits.temp_max = 25.0;

        state.record(SensorKind::Temperature, 24.0, Utc::now());
        assert!(state.alerts.is_empty());

        state.record(SensorKind::Temperature, 26.0, Utc::now());
        state.record(SensorKind::Humidity, 10.0, Utc::now());
        state.record(SensorKind::Humidity, 95.0, Utc::now());

        // capped at two, oldest dropped
        assert_eq!(state.alerts.len(), 2);
        assert_eq!(state.alerts[0].kind, SensorKind::Humidity);
        assert_eq!(state.alerts[0].breach, Breach::Below { limit: 30.0 });
        assert!(state.alerts[1].describe().contains("above maximum"));
    }

    #[test]
    fn test_export_points_use_storage_labels() {
        let mut state = DisplayState::new(5, 5, 15);
        state.record(SensorKind::Humidity, 61.0, Utc::now());
        let points = state.export_points(SensorKind::Humidity);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].kind, "umidade");
    }
}
