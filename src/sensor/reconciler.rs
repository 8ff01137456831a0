use crate::error::AppError;
use crate::sensor::api::SensorSource;
use crate::sensor::observable::{ObserverId, Observers};
use crate::sensor::registry::{PendingSeed, SensorRegistry};
use crate::sensor::subscription::{EventHandler, SubscriptionHandle, SubscriptionManager};
use crate::sensor::transport::PushEvent;
use crate::sensor::types::{HistoryPointWire, Reading, ReadingWire, ReconcilerPhase, SensorType};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Identifies one logical consumer (a chart, a table, the CLI session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConsumerHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActivationOutcome {
    /// History was seeded from `points` fetched readings.
    Seeded { points: usize },
    /// The fetch returned nothing usable; one synthetic reading was seeded.
    Synthetic,
    /// The sensor was already seeding or live for other consumers.
    Joined,
    /// This consumer was already active for the sensor.
    AlreadyActive,
    /// The activation was cancelled before its fetch resolved.
    Superseded,
}

#[derive(Debug, Serialize)]
pub struct SensorFailure {
    pub sensor: SensorType,
    pub error: AppError,
}

#[derive(Default)]
struct SensorSlot {
    phase: SlotPhase,
    epoch: u64,
    consumers: HashSet<ConsumerHandle>,
    live_handler: Option<EventHandler>,
    subscription: Option<SubscriptionHandle>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum SlotPhase {
    #[default]
    Idle,
    Seeding,
    Live,
}

impl From<SlotPhase> for ReconcilerPhase {
    fn from(phase: SlotPhase) -> Self {
        match phase {
            SlotPhase::Idle => ReconcilerPhase::Idle,
            SlotPhase::Seeding => ReconcilerPhase::Seeding,
            SlotPhase::Live => ReconcilerPhase::Live,
        }
    }
}

/// Seeds each sensor's history once, then keeps it current from push events.
///
/// Every activation that leaves `Idle` bumps the sensor's epoch; a seed result
/// is applied only if the epoch it was fetched under is still current, checked
/// under the same lock that writes the seed.
pub struct StreamReconciler {
    registry: Arc<SensorRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    source: Arc<dyn SensorSource>,
    failures: Arc<Observers<SensorFailure>>,
    slots: Mutex<[SensorSlot; 2]>,
    next_consumer: AtomicU64,
}

impl StreamReconciler {
    pub fn new(
        registry: Arc<SensorRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        source: Arc<dyn SensorSource>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            source,
            failures: Arc::new(Observers::default()),
            slots: Mutex::new(Default::default()),
            next_consumer: AtomicU64::new(0),
        }
    }

    pub fn new_consumer(&self) -> ConsumerHandle {
        ConsumerHandle(self.next_consumer.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn phase(&self, sensor: SensorType) -> ReconcilerPhase {
        self.slots.lock()[sensor.index()].phase.into()
    }

    pub fn consumer_count(&self, sensor: SensorType) -> usize {
        self.slots.lock()[sensor.index()].consumers.len()
    }

    pub fn watch_failures(
        &self,
        callback: impl Fn(&SensorFailure) + Send + Sync + 'static,
    ) -> ObserverId {
        self.failures.subscribe(callback)
    }

    pub fn unwatch_failures(&self, id: ObserverId) -> bool {
        self.failures.unsubscribe(id)
    }

    /// Adds `consumer` to the sensor's consumers, seeding and going live if it
    /// is the first one.
    ///
    /// A failed seed fetch leaves the history empty and still goes live; the
    /// `FetchFailed` error is returned after the live handler is registered.
    pub async fn activate(
        &self,
        sensor: SensorType,
        consumer: ConsumerHandle,
    ) -> Result<ActivationOutcome, AppError> {
        let epoch = {
            let mut slots = self.slots.lock();
            let slot = &mut slots[sensor.index()];
            let joined = slot.consumers.insert(consumer);
            if slot.phase != SlotPhase::Idle {
                return Ok(if joined {
                    ActivationOutcome::Joined
                } else {
                    ActivationOutcome::AlreadyActive
                });
            }
            slot.epoch += 1;
            slot.phase = SlotPhase::Seeding;
            slot.epoch
        };
        info!(sensor = %sensor, epoch, "seeding sensor history");

        let fetched = self.source.recent_history(sensor).await;

        if !self.is_seeding(sensor, epoch) {
            debug!(sensor = %sensor, epoch, "discarding seed from superseded activation");
            return Ok(ActivationOutcome::Superseded);
        }

        let prepared = match fetched {
            Ok(points) => Ok(self.prepare_seed(sensor, points)),
            Err(AppError::FetchFailed { sensor, reason }) => {
                Err(AppError::FetchFailed { sensor, reason })
            }
            Err(other) => Err(AppError::fetch_failed(sensor, other)),
        };

        // The epoch check, the registry write and going live share one critical
        // section; watchers are told only after it ends.
        let (seeded, pending) = {
            let mut slots = self.slots.lock();
            let slot = &mut slots[sensor.index()];
            if slot.epoch != epoch || slot.phase != SlotPhase::Seeding {
                debug!(sensor = %sensor, epoch, "activation cancelled while preparing seed");
                return Ok(ActivationOutcome::Superseded);
            }
            let (seeded, pending) = match prepared {
                Ok(readings) => {
                    let (outcome, pending) = self.commit_seed(sensor, readings);
                    (Ok(outcome), pending)
                }
                Err(error) => (
                    Err(error),
                    self.registry.seed_quietly(sensor, Vec::new(), None),
                ),
            };
            let handler = self.live_handler(sensor);
            slot.subscription = Some(self.subscriptions.register_handler(sensor.channel(), &handler));
            slot.live_handler = Some(handler);
            slot.phase = SlotPhase::Live;
            (seeded, pending)
        };
        self.registry.publish(pending);
        info!(sensor = %sensor, epoch, channel = sensor.channel(), "sensor live");

        seeded.map_err(|error| self.report(sensor, error))
    }

    /// Removes `consumer`; the last consumer out releases the live handler.
    /// Returns false if the consumer was not active for this sensor.
    pub fn deactivate(&self, sensor: SensorType, consumer: ConsumerHandle) -> bool {
        let mut slots = self.slots.lock();
        let slot = &mut slots[sensor.index()];
        if !slot.consumers.remove(&consumer) {
            return false;
        }
        if slot.consumers.is_empty() {
            if let Some(subscription) = slot.subscription.take() {
                self.subscriptions.release(&subscription);
            }
            slot.live_handler = None;
            slot.phase = SlotPhase::Idle;
            info!(sensor = %sensor, epoch = slot.epoch, "sensor idle");
        }
        true
    }

    /// Re-registers the live handler of every live sensor, e.g. after the
    /// subscription manager dropped its registrations on disconnect.
    pub fn reattach_live(&self) -> usize {
        let mut slots = self.slots.lock();
        let mut reattached = 0;
        for (sensor, slot) in SensorType::ALL.into_iter().zip(slots.iter_mut()) {
            let Some(handler) = slot.live_handler.as_ref() else {
                continue;
            };
            slot.subscription = Some(self.subscriptions.register_handler(sensor.channel(), handler));
            reattached += 1;
        }
        if reattached > 0 {
            debug!(reattached, "live handlers reattached");
        }
        reattached
    }

    /// Pulls the server's latest reading into the registry without touching
    /// history.
    pub async fn refresh_latest(&self, sensor: SensorType) -> Result<Reading, AppError> {
        let refreshed = match self.source.latest(sensor).await {
            Ok(wire) => wire.into_reading(sensor),
            Err(error) => Err(AppError::fetch_failed(sensor, error)),
        };
        match refreshed {
            Ok(reading) => {
                self.registry.set_latest(sensor, reading.clone());
                Ok(reading)
            }
            Err(error) => Err(self.report(sensor, error)),
        }
    }

    fn is_seeding(&self, sensor: SensorType, epoch: u64) -> bool {
        let slots = self.slots.lock();
        let slot = &slots[sensor.index()];
        slot.epoch == epoch && slot.phase == SlotPhase::Seeding
    }

    /// Converts fetched points into oldest-first readings, reporting and
    /// dropping the invalid ones.
    fn prepare_seed(&self, sensor: SensorType, points: Vec<HistoryPointWire>) -> Vec<Reading> {
        let mut readings: Vec<Reading> = points
            .into_iter()
            .filter_map(|point| match point.into_reading(sensor) {
                Ok(reading) => Some(reading),
                Err(error) => {
                    self.report(sensor, error);
                    None
                }
            })
            .collect();
        readings.sort_by_key(|reading| reading.timestamp);
        readings
    }

    /// Must run with the slot lock held.
    fn commit_seed(
        &self,
        sensor: SensorType,
        readings: Vec<Reading>,
    ) -> (ActivationOutcome, PendingSeed) {
        let Some(newest) = readings.last().cloned() else {
            let prior = self.registry.latest(sensor);
            let synthetic = Reading::new(prior.value, prior.unit, OffsetDateTime::now_utc());
            debug!(sensor = %sensor, value = synthetic.value, "seeding synthetic reading");
            let pending = self.registry.seed_quietly(sensor, vec![synthetic], None);
            return (ActivationOutcome::Synthetic, pending);
        };

        let points = readings.len();
        debug!(sensor = %sensor, points, "history seeded");
        let pending = self.registry.seed_quietly(sensor, readings, Some(newest));
        (ActivationOutcome::Seeded { points }, pending)
    }

    fn live_handler(&self, sensor: SensorType) -> EventHandler {
        let registry = Arc::clone(&self.registry);
        let failures = Arc::clone(&self.failures);
        EventHandler::new(move |event: &PushEvent| match decode_live_reading(sensor, event) {
            Ok(reading) => registry.record_live(sensor, reading),
            Err(error) => {
                warn!(sensor = %sensor, %error, "dropping live reading");
                failures.notify(&SensorFailure { sensor, error });
            }
        })
    }

    fn report(&self, sensor: SensorType, error: AppError) -> AppError {
        warn!(sensor = %sensor, %error, "sensor failure");
        let failure = SensorFailure { sensor, error };
        self.failures.notify(&failure);
        failure.error
    }
}

fn decode_live_reading(sensor: SensorType, event: &PushEvent) -> Result<Reading, AppError> {
    let wire: ReadingWire = simd_json::serde::from_owned_value(event.payload.clone())?;
    wire.into_reading(sensor)
}
