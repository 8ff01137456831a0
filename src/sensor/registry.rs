use crate::sensor::observable::{Observable, ObserverId, Observers};
use crate::sensor::series::BoundedSeries;
use crate::sensor::types::{Reading, SensorType};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::debug;

/// Shared state for one sensor: the most recent accepted reading and its
/// bounded history.
pub struct SensorEntry {
    latest: Observable<Reading>,
    history: Mutex<BoundedSeries>,
    history_watchers: Observers<Vec<Reading>>,
}

impl SensorEntry {
    fn new(sensor: SensorType, capacity: usize, now: OffsetDateTime) -> Self {
        Self {
            latest: Observable::new(Reading::placeholder(sensor, now)),
            history: Mutex::new(BoundedSeries::new(capacity)),
            history_watchers: Observers::default(),
        }
    }

    /// Mutates the series; watchers share one snapshot taken under the lock,
    /// and none is taken while nobody watches.
    fn update_history<R>(&self, mutate: impl FnOnce(&mut BoundedSeries) -> R) -> R {
        let (result, snapshot) = {
            let mut series = self.history.lock();
            let result = mutate(&mut series);
            let snapshot = (!self.history_watchers.is_empty()).then(|| series.snapshot());
            (result, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.history_watchers.notify(&snapshot);
        }
        result
    }

    fn publish_history(&self) {
        if self.history_watchers.is_empty() {
            return;
        }
        let snapshot = self.history.lock().snapshot();
        self.history_watchers.notify(&snapshot);
    }
}

/// A seed written to the registry whose watchers have not been told yet.
/// Hand it back to [`SensorRegistry::publish`] once the writer's own locks are
/// released.
#[must_use]
pub(crate) struct PendingSeed {
    sensor: SensorType,
    latest_changed: bool,
}

/// Process-wide sensor state. Readers get copies and change notifications;
/// writes are crate-private and only the reconciler performs them.
pub struct SensorRegistry {
    entries: [SensorEntry; 2],
}

impl SensorRegistry {
    pub fn new(history_capacity: usize) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            entries: SensorType::ALL.map(|sensor| SensorEntry::new(sensor, history_capacity, now)),
        }
    }

    fn entry(&self, sensor: SensorType) -> &SensorEntry {
        &self.entries[sensor.index()]
    }

    pub fn latest(&self, sensor: SensorType) -> Reading {
        self.entry(sensor).latest.get()
    }

    pub fn history(&self, sensor: SensorType) -> Vec<Reading> {
        self.entry(sensor).history.lock().snapshot()
    }

    pub fn history_len(&self, sensor: SensorType) -> usize {
        self.entry(sensor).history.lock().len()
    }

    pub fn history_capacity(&self, sensor: SensorType) -> usize {
        self.entry(sensor).history.lock().capacity()
    }

    pub fn watch_latest(
        &self,
        sensor: SensorType,
        callback: impl Fn(&Reading) + Send + Sync + 'static,
    ) -> ObserverId {
        self.entry(sensor).latest.subscribe(callback)
    }

    /// The callback receives an oldest-first copy of the history after each change.
    pub fn watch_history(
        &self,
        sensor: SensorType,
        callback: impl Fn(&[Reading]) + Send + Sync + 'static,
    ) -> ObserverId {
        self.entry(sensor)
            .history_watchers
            .subscribe(move |history: &Vec<Reading>| callback(history))
    }

    pub fn unwatch_latest(&self, sensor: SensorType, id: ObserverId) -> bool {
        self.entry(sensor).latest.unsubscribe(id)
    }

    pub fn unwatch_history(&self, sensor: SensorType, id: ObserverId) -> bool {
        self.entry(sensor).history_watchers.unsubscribe(id)
    }

    /// Appends a live reading and makes it the latest.
    pub(crate) fn record_live(&self, sensor: SensorType, reading: Reading) {
        let entry = self.entry(sensor);
        let previous = entry.update_history(|series| {
            let previous = series.last().map(|last| last.timestamp);
            series.append(reading.clone());
            previous
        });
        if let Some(previous) = previous.filter(|previous| reading.timestamp < *previous) {
            debug!(
                sensor = %sensor,
                previous = %previous,
                received = %reading.timestamp,
                "accepted out-of-order live reading at tail"
            );
        }
        entry.latest.set(reading);
    }

    /// Replaces the history (oldest-first) and optionally the latest reading
    /// without notifying anyone.
    pub(crate) fn seed_quietly(
        &self,
        sensor: SensorType,
        readings: Vec<Reading>,
        latest: Option<Reading>,
    ) -> PendingSeed {
        let entry = self.entry(sensor);
        entry.history.lock().replace(readings);
        let latest_changed = latest.is_some();
        if let Some(latest) = latest {
            entry.latest.set_quietly(latest);
        }
        PendingSeed {
            sensor,
            latest_changed,
        }
    }

    pub(crate) fn publish(&self, pending: PendingSeed) {
        let entry = self.entry(pending.sensor);
        entry.publish_history();
        if pending.latest_changed {
            entry.latest.publish();
        }
    }

    pub(crate) fn set_latest(&self, sensor: SensorType, reading: Reading) {
        self.entry(sensor).latest.set(reading);
    }
}
