use crate::error::AppError;
use crate::sensor::api::SensorSource;
use crate::sensor::transport::{PushEvent, PushStream, PushTransport};
use crate::sensor::types::{HistoryPointWire, ReadingWire, SensorType};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};

pub fn history_point(value: f64, timestamp: &str) -> HistoryPointWire {
    HistoryPointWire {
        value,
        timestamp: timestamp.to_string(),
    }
}

fn scripted_error(reason: &str) -> AppError {
    AppError::Io(io::Error::other(reason.to_string()))
}

/// Push transport backed by an unbounded channel. Each `open` replaces the
/// previous sender; `close` ends the current stream.
#[derive(Default)]
pub struct ChannelTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<Result<PushEvent, AppError>>>>,
    open_gate: Mutex<Option<oneshot::Receiver<()>>>,
    fail_next: AtomicBool,
    opens: AtomicUsize,
}

impl ChannelTransport {
    pub fn push(&self, event: PushEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Ok(event));
        }
    }

    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// The next `open` waits until the returned sender fires or is dropped.
    pub fn hold_next_open(&self) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        *self.open_gate.lock() = Some(receiver);
        sender
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PushTransport for ChannelTransport {
    fn open<'a>(&'a self, _endpoint: &'a str) -> BoxFuture<'a, Result<PushStream, AppError>> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let gate = self.open_gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(AppError::TransportUnavailable(
                    "scripted connect failure".to_string(),
                ));
            }

            let (sender, receiver) = mpsc::unbounded_channel();
            *self.sender.lock() = Some(sender);
            let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|item| (item, receiver))
            });
            Ok(stream.boxed())
        })
    }
}

enum HistoryReply {
    Ready(Result<Vec<HistoryPointWire>, AppError>),
    Pending(oneshot::Receiver<Vec<HistoryPointWire>>),
}

/// REST stand-in answering from queued replies. An unscripted history call
/// returns an empty list; an unscripted latest call fails.
#[derive(Default)]
pub struct ScriptedSource {
    history: Mutex<VecDeque<HistoryReply>>,
    latest: Mutex<VecDeque<ReadingWire>>,
    history_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn reply_history(&self, points: Vec<HistoryPointWire>) {
        self.history.lock().push_back(HistoryReply::Ready(Ok(points)));
    }

    pub fn fail_history(&self, reason: &str) {
        self.history
            .lock()
            .push_back(HistoryReply::Ready(Err(scripted_error(reason))));
    }

    /// Queues a reply resolved later through the returned sender.
    pub fn defer_history(&self) -> oneshot::Sender<Vec<HistoryPointWire>> {
        let (sender, receiver) = oneshot::channel();
        self.history.lock().push_back(HistoryReply::Pending(receiver));
        sender
    }

    pub fn reply_latest(&self, reading: ReadingWire) {
        self.latest.lock().push_back(reading);
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

impl SensorSource for ScriptedSource {
    fn recent_history(
        &self,
        _sensor: SensorType,
    ) -> BoxFuture<'_, Result<Vec<HistoryPointWire>, AppError>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.history.lock().pop_front();
        Box::pin(async move {
            match reply {
                Some(HistoryReply::Ready(result)) => result,
                Some(HistoryReply::Pending(receiver)) => receiver
                    .await
                    .map_err(|_| scripted_error("deferred history reply dropped")),
                None => Ok(Vec::new()),
            }
        })
    }

    fn latest(&self, sensor: SensorType) -> BoxFuture<'_, Result<ReadingWire, AppError>> {
        let reply = self.latest.lock().pop_front();
        Box::pin(async move {
            reply.ok_or_else(|| scripted_error(&format!("no latest {sensor} reading scripted")))
        })
    }
}
