use crate::config::ClientConfig;
use crate::error::{Result, SpeakerBusError};
use crate::subscription::Subscription;
use crate::transport::Transport;
use async_nats::{Client, ConnectOptions, Event};
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const FLUSH_GRACE: Duration = Duration::from_millis(250);

/// Link state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Dialing or waiting for the handshake to complete
    Connecting,
    Connected,
    /// Lost the server; a reconnect is scheduled
    Disconnected,
    /// Shut down for good
    Closed,
}

enum Outbound {
    Publish {
        subject: String,
        payload: Bytes,
    },
    Subscribe {
        subject: String,
        tx: mpsc::UnboundedSender<Bytes>,
    },
}

/// NATS transport over WebSocket
///
/// One connection serves the whole session. A background driver owns the
/// NATS client and feeds it the operations issued through [`Transport`].
/// The client buffers anything issued before its first handshake, replays
/// subscriptions after every reconnect and answers server PINGs.
pub struct Connection {
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start the driver without waiting for the link
    pub fn open(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let status_tx = Arc::new(watch::Sender::new(ConnectionStatus::Connecting));

        let options = connect_options(config, status_tx.clone());
        let task = tokio::spawn(drive(
            options,
            config.server_url.clone(),
            status_tx.clone(),
            out_rx,
            stop_rx,
        ));

        Ok(Self {
            status_tx,
            out_tx,
            stop_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Open a connection and wait for the first handshake
    ///
    /// Fails with [`SpeakerBusError::TransportUnavailable`] if the server is
    /// not reachable within the configured connect timeout.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let connection = Self::open(config)?;
        if let Err(e) = connection.wait_connected(config.connect_timeout()).await {
            connection.shutdown().await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Wait until the link is up
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut status_rx = self.status_tx.subscribe();
        let settled = |s: &ConnectionStatus| {
            matches!(s, ConnectionStatus::Connected | ConnectionStatus::Closed)
        };
        let outcome = match timeout(limit, status_rx.wait_for(settled)).await {
            Ok(Ok(status)) if *status == ConnectionStatus::Connected => Ok(()),
            Ok(_) => Err(SpeakerBusError::ConnectionClosed),
            Err(_) => Err(SpeakerBusError::TransportUnavailable),
        };
        outcome
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Follow link state changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Stop the driver and release every subscription
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("Bus driver did not stop in time");
            }
        }
        self.status_tx.send_replace(ConnectionStatus::Closed);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status() == ConnectionStatus::Closed {
            return Err(SpeakerBusError::ConnectionClosed);
        }
        Ok(())
    }
}

impl Transport for Connection {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        validate_subject(topic)?;
        self.out_tx
            .send(Outbound::Publish {
                subject: topic.to_string(),
                payload,
            })
            .map_err(|_| SpeakerBusError::ConnectionClosed)
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription> {
        self.ensure_open()?;
        validate_subject(topic)?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.out_tx
            .send(Outbound::Subscribe {
                subject: topic.to_string(),
                tx,
            })
            .map_err(|_| SpeakerBusError::ConnectionClosed)?;
        tracing::debug!("Subscribing to {}", topic);

        // Releasing closes the receiver, which ends the forwarder and with
        // it the NATS subscription
        Ok(Subscription::new(topic, rx, || {}))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().ok().and_then(|mut task| task.take()) {
            handle.abort();
        }
    }
}

/// Subjects are dot-separated tokens without whitespace
fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty()
        || subject.chars().any(char::is_whitespace)
        || subject.split('.').any(str::is_empty)
    {
        return Err(SpeakerBusError::Protocol(format!(
            "invalid subject {:?}",
            subject
        )));
    }
    Ok(())
}

/// Delay before the n-th connect attempt: none for the first, then 1s
/// doubling up to `max`
fn reconnect_delay(attempts: usize, max: Duration) -> Duration {
    if attempts <= 1 {
        return Duration::ZERO;
    }
    let exponent = (attempts - 2).min(16) as u32;
    Duration::from_secs(1u64 << exponent).min(max)
}

fn connect_options(
    config: &ClientConfig,
    status: Arc<watch::Sender<ConnectionStatus>>,
) -> ConnectOptions {
    let max_backoff = config.max_reconnect_backoff();

    ConnectOptions::new()
        .name(config.client_name.clone())
        .connection_timeout(config.connect_timeout())
        .ping_interval(config.ping_interval())
        .retry_on_initial_connect()
        .max_reconnects(None::<usize>)
        .reconnect_delay_callback(move |attempts| reconnect_delay(attempts, max_backoff))
        .event_callback(move |event| {
            let status = status.clone();
            async move { on_event(&status, event) }
        })
}

fn on_event(status: &watch::Sender<ConnectionStatus>, event: Event) {
    let next = match event {
        Event::Connected => ConnectionStatus::Connected,
        Event::Disconnected => ConnectionStatus::Disconnected,
        other => {
            tracing::warn!("Bus event: {}", other);
            return;
        }
    };
    tracing::info!("Bus link {:?}", next);
    set_status(status, next);
}

/// Closed is final
fn set_status(status: &watch::Sender<ConnectionStatus>, next: ConnectionStatus) {
    status.send_if_modified(|current| {
        if *current == ConnectionStatus::Closed || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Driver: owns the client and applies queued operations until stopped or
/// every handle is gone
async fn drive(
    options: ConnectOptions,
    url: String,
    status: Arc<watch::Sender<ConnectionStatus>>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    mut stop_rx: watch::Receiver<bool>,
) {
    tracing::info!("Connecting to {}", url);
    let connected = tokio::select! {
        _ = stop_rx.changed() => None,
        connected = options.connect(url.as_str()) => Some(connected),
    };
    let client = match connected {
        Some(Ok(client)) => client,
        Some(Err(e)) => {
            tracing::error!("Bus client for {} failed: {}", url, SpeakerBusError::from(e));
            set_status(&status, ConnectionStatus::Closed);
            return;
        }
        None => {
            set_status(&status, ConnectionStatus::Closed);
            return;
        }
    };

    let mut forwarders = JoinSet::new();
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            op = out_rx.recv() => {
                let Some(op) = op else {
                    tracing::info!("All bus handles dropped, stopping driver");
                    break;
                };
                if let Err(e) = apply(&client, op, &mut forwarders).await {
                    tracing::warn!("Bus operation failed: {}", e);
                }
            }
            Some(_) = forwarders.join_next(), if !forwarders.is_empty() => {}
        }
    }

    // Dropping the forwarders drops their subscribers, which unsubscribes
    forwarders.abort_all();
    while forwarders.join_next().await.is_some() {}
    if *status.borrow() == ConnectionStatus::Connected
        && timeout(FLUSH_GRACE, client.flush()).await.is_err()
    {
        tracing::warn!("Bus flush did not finish before shutdown");
    }
    set_status(&status, ConnectionStatus::Closed);
    tracing::debug!("Bus driver stopped");
}

async fn apply(client: &Client, op: Outbound, forwarders: &mut JoinSet<()>) -> Result<()> {
    match op {
        Outbound::Publish { subject, payload } => {
            let max = client.server_info().max_payload;
            if max > 0 && payload.len() > max {
                tracing::warn!(
                    "Dropping {} byte publish on {}: server limit is {}",
                    payload.len(),
                    subject,
                    max
                );
                return Ok(());
            }
            tracing::debug!("Publishing {} bytes on {}", payload.len(), subject);
            client.publish(subject, payload).await?;
        }
        Outbound::Subscribe { subject, tx } => {
            if tx.is_closed() {
                tracing::debug!("Subscription to {} released before it was sent", subject);
                return Ok(());
            }
            let subscriber = client.subscribe(subject.clone()).await?;
            forwarders.spawn(forward(subject, subscriber, tx));
        }
    }
    Ok(())
}

/// Copy payloads from a NATS subscriber into a [`Subscription`] channel
async fn forward(
    subject: String,
    mut subscriber: async_nats::Subscriber,
    tx: mpsc::UnboundedSender<Bytes>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            message = subscriber.next() => match message {
                Some(message) => {
                    if tx.send(message.payload).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    tracing::debug!("Unsubscribed from {}", subject);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_up_to_the_cap() {
        let max = Duration::from_secs(60);
        let seen: Vec<u64> = (1..=9).map(|n| reconnect_delay(n, max).as_secs()).collect();
        assert_eq!(seen, vec![0, 1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(reconnect_delay(usize::MAX, max), max);
        assert_eq!(
            reconnect_delay(2, Duration::from_millis(300)),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn subjects_are_validated() {
        assert!(validate_subject("speaker.event").is_ok());
        assert!(validate_subject("echo").is_ok());
        for bad in ["", "bad subject", "speaker..event", ".echo", "echo\r\n"] {
            assert!(
                matches!(validate_subject(bad), Err(SpeakerBusError::Protocol(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn closed_status_is_final() {
        let status = watch::Sender::new(ConnectionStatus::Connecting);
        on_event(&status, Event::Connected);
        assert_eq!(*status.borrow(), ConnectionStatus::Connected);
        on_event(&status, Event::Disconnected);
        assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);

        set_status(&status, ConnectionStatus::Closed);
        on_event(&status, Event::Connected);
        assert_eq!(*status.borrow(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn operations_before_connect_are_accepted_until_shutdown() {
        let config = ClientConfig {
            connect_timeout_ms: 50,
            ..ClientConfig::new("ws://127.0.0.1:9")
        };
        let connection = Connection::open(&config).unwrap();
        let _sub = connection.subscribe("speaker.event").unwrap();
        connection
            .publish("speaker.query", Bytes::from_static(b"q"))
            .unwrap();
        assert!(connection.publish("bad subject", Bytes::new()).is_err());
        assert_ne!(connection.status(), ConnectionStatus::Connected);

        connection.shutdown().await;
        assert_eq!(connection.status(), ConnectionStatus::Closed);
        assert!(matches!(
            connection.publish("speaker.query", Bytes::new()),
            Err(SpeakerBusError::ConnectionClosed)
        ));
        assert!(matches!(
            connection.subscribe("speaker.event"),
            Err(SpeakerBusError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn connect_times_out_when_server_is_absent() {
        let config = ClientConfig {
            connect_timeout_ms: 100,
            ..ClientConfig::new("ws://127.0.0.1:9")
        };
        assert!(matches!(
            Connection::connect(&config).await,
            Err(SpeakerBusError::TransportUnavailable)
        ));
    }
}
