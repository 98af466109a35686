use crate::codec;
use crate::dispatcher::query_speaker_list;
use crate::error::Result;
use crate::protocol::Content;
use crate::topics::Topic;
use crate::transport::SharedTransport;
use crate::types::DeviceId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Set of device ids reported by the last device-list event
///
/// Each event replaces the whole set; nothing is merged across events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownDevices {
    ids: Vec<DeviceId>,
}

impl KnownDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set with `ids`, keeping first-seen order and dropping
    /// repeats. Returns whether the set changed.
    pub fn replace<I>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = DeviceId>,
    {
        let mut seen = HashSet::new();
        let next: Vec<DeviceId> = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        if next == self.ids {
            return false;
        }
        self.ids = next;
        true
    }

    pub fn ids(&self) -> &[DeviceId] {
        &self.ids
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.ids.iter().any(|id| id == device_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Discovery of the devices reachable on the bus
///
/// Listens on `speaker.event` for device-list events and keeps the last one.
/// The query is sent once on [`Discovery::start`]; call
/// [`Discovery::refresh`] to ask again.
///
/// # Example
///
/// ```no_run
/// use speaker_bus::{ClientConfig, Connection, Discovery};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let connection = Arc::new(Connection::connect(&ClientConfig::default()).await?);
///     let mut discovery = Discovery::new(connection.clone());
///     discovery.start()?;
///
///     let mut updates = discovery.subscribe_updates();
///     let devices = updates.recv().await?;
///     for device in devices {
///         println!("Found device: {}", device);
///     }
///
///     discovery.stop().await;
///     connection.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Discovery {
    transport: SharedTransport,
    devices: Arc<Mutex<KnownDevices>>,
    update_tx: broadcast::Sender<Vec<DeviceId>>,
    task_handle: Option<JoinHandle<()>>,
}

impl Discovery {
    pub fn new(transport: SharedTransport) -> Self {
        let (update_tx, _) = broadcast::channel(16);
        Self {
            transport,
            devices: Arc::new(Mutex::new(KnownDevices::new())),
            update_tx,
            task_handle: None,
        }
    }

    /// Receive the full device list every time a device-list event arrives
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Vec<DeviceId>> {
        self.update_tx.subscribe()
    }

    /// Snapshot of the known devices
    pub fn devices(&self) -> Vec<DeviceId> {
        lock(&self.devices).ids().to_vec()
    }

    pub fn device_count(&self) -> usize {
        lock(&self.devices).len()
    }

    /// Whether the last device-list event named `device_id`
    pub fn is_known(&self, device_id: &str) -> bool {
        lock(&self.devices).contains(device_id)
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Start listening and send the device-list query
    ///
    /// If discovery is already running it is restarted. The known set is
    /// kept until the next event replaces it.
    pub fn start(&mut self) -> Result<()> {
        self.abort();

        // Listen first so the reply cannot slip past
        let subscription = self.transport.subscribe(Topic::SpeakerEvent.as_str())?;
        let devices = self.devices.clone();
        let update_tx = self.update_tx.clone();
        self.task_handle = Some(subscription.spawn_handler(move |payload| {
            let envelope = match codec::decode(payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("Dropping malformed speaker event: {}", e);
                    return;
                }
            };
            if let Content::SpeakerListEvent(event) = envelope.content {
                let snapshot = {
                    let mut known = lock(&devices);
                    if known.replace(event.device_ids) {
                        tracing::info!("Known devices: {:?}", known.ids());
                    }
                    known.ids().to_vec()
                };
                let _ = update_tx.send(snapshot);
            }
        }));

        self.refresh()
    }

    /// Send the device-list query again
    pub fn refresh(&self) -> Result<()> {
        tracing::debug!("Querying device list");
        query_speaker_list(self.transport.as_ref())
    }

    /// Stop listening. The device list stays readable.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
            tracing::info!("Discovery stopped");
        }
    }

    fn abort(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.abort();
    }
}

fn lock(devices: &Mutex<KnownDevices>) -> MutexGuard<'_, KnownDevices> {
    devices.lock().unwrap_or_else(PoisonError::into_inner)
}
