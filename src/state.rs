use crate::error::AppError;
use crate::sensor::api::{RestSensorApi, SensorSource};
use crate::sensor::reconciler::{ConsumerHandle, StreamReconciler};
use crate::sensor::registry::SensorRegistry;
use crate::sensor::subscription::SubscriptionManager;
use crate::sensor::transport::{PushTransport, SocketIoTransport};
use crate::sensor::types::SensorStreamConfig;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub started_at: Instant,
    pub config: SensorStreamConfig,
    pub registry: Arc<SensorRegistry>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub reconciler: Arc<StreamReconciler>,
    /// Consumer used by the stream commands themselves.
    pub session_consumer: ConsumerHandle,
}

impl AppState {
    pub fn new(config: SensorStreamConfig) -> Result<Self, AppError> {
        let source = Arc::new(RestSensorApi::new(config.api_url.clone())?);
        Ok(Self::with_parts(
            config,
            source,
            Arc::new(SocketIoTransport),
        ))
    }

    pub fn with_parts(
        config: SensorStreamConfig,
        source: Arc<dyn SensorSource>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let registry = Arc::new(SensorRegistry::new(config.history_capacity));
        let subscriptions = Arc::new(SubscriptionManager::new(transport));
        let reconciler = Arc::new(StreamReconciler::new(
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            source,
        ));
        let session_consumer = reconciler.new_consumer();

        Self {
            started_at: Instant::now(),
            config,
            registry,
            subscriptions,
            reconciler,
            session_consumer,
        }
    }
}
