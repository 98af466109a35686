//! State Synchronizer: keeps one device's playlist and playback state in step
//! with what the device reports.
//!
//! On start the synchronizer subscribes to `playlist.event` and
//! `speaker.event`, then asks for the playlist and volume. While the playlist
//! is non-empty it polls the seek position; the poll stops as soon as the
//! playlist empties or the synchronizer is stopped.

use crate::codec;
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::protocol::{Content, PlaylistEventKind, SpeakerEventKind};
use crate::subscription::Subscription;
use crate::topics::Topic;
use crate::transport::SharedTransport;
use crate::types::{clamp_volume, DeviceId, Song, Volume};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Local view of one device
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceState {
    pub device_id: DeviceId,
    /// Index 0 is the active track
    pub songs: Vec<Song>,
    pub volume: Volume,
    /// Playback position in seconds
    pub seek: f32,
    /// Length of the active track in seconds
    pub duration: f32,
    pub paused: bool,
}

impl DeviceState {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn now_playing(&self) -> Option<&Song> {
        self.songs.first()
    }

    /// Fold one message into the state. Returns whether anything changed.
    ///
    /// Messages for other devices and kinds this state does not track are
    /// ignored. A playlist event replaces `songs` wholesale; a speaker event
    /// touches only the field it names.
    pub fn apply(&mut self, content: &Content) -> bool {
        match content {
            Content::PlaylistEvent(event) if event.device_id == self.device_id => {
                match &event.event {
                    PlaylistEventKind::PlaylistStateChanged { songs } => {
                        set(&mut self.songs, songs.clone())
                    }
                    PlaylistEventKind::Unknown(_) => false,
                }
            }
            Content::SpeakerEvent(event) if event.device_id == self.device_id => {
                match &event.event {
                    SpeakerEventKind::MusicVolumeChanged { volume } => {
                        set(&mut self.volume, clamp_volume(*volume))
                    }
                    SpeakerEventKind::SeekChanged { seek } => set(&mut self.seek, *seek),
                    SpeakerEventKind::DurationChanged { duration } => {
                        set(&mut self.duration, *duration)
                    }
                    SpeakerEventKind::PauseChanged { paused } => set(&mut self.paused, *paused),
                    SpeakerEventKind::PlayStopped => {
                        let seek = set(&mut self.seek, 0.0);
                        let paused = set(&mut self.paused, false);
                        seek || paused
                    }
                    // The playlist service follows up with a new playlist
                    SpeakerEventKind::FileEnded | SpeakerEventKind::Unknown(_) => false,
                }
            }
            _ => false,
        }
    }
}

fn set<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Live synchronization session for one device
///
/// Dropping the synchronizer cancels the poll and releases both
/// subscriptions. Switching devices means stopping one synchronizer and
/// starting another; no state carries over.
pub struct Synchronizer {
    dispatcher: Dispatcher,
    state_tx: Arc<watch::Sender<DeviceState>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl Synchronizer {
    pub fn start(
        transport: SharedTransport,
        device_id: impl Into<DeviceId>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let device_id = device_id.into();
        tracing::info!("Synchronizing with device {}", device_id);

        let playlist_events = transport.subscribe(Topic::PlaylistEvent.as_str())?;
        let speaker_events = transport.subscribe(Topic::SpeakerEvent.as_str())?;

        let dispatcher = Dispatcher::new(transport, device_id.clone());
        dispatcher.query_playlist();
        dispatcher.query_volume();

        let (state_tx, _) = watch::channel(DeviceState::new(device_id));
        let state_tx = Arc::new(state_tx);
        let (stop_tx, stop_rx) = oneshot::channel();

        let session = Session {
            dispatcher: dispatcher.clone(),
            state_tx: state_tx.clone(),
            poll_period: config.poll_interval(),
            seek_poll: None,
        };
        let handle = tokio::spawn(session.run(playlist_events, speaker_events, stop_rx));

        Ok(Self {
            dispatcher,
            state_tx,
            stop_tx: Some(stop_tx),
            task_handle: Some(handle),
        })
    }

    pub fn device_id(&self) -> &str {
        self.dispatcher.device_id()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> DeviceState {
        self.state_tx.borrow().clone()
    }

    /// Follow state changes
    pub fn watch(&self) -> watch::Receiver<DeviceState> {
        self.state_tx.subscribe()
    }

    /// Commands and queries addressed to this device
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Show `volume` right away and ask the device to apply it.
    ///
    /// The device's next volume event overwrites the local value, even if
    /// that event predates this write.
    pub fn set_volume(&self, volume: Volume) {
        let volume = clamp_volume(volume);
        self.state_tx
            .send_if_modified(|state| set(&mut state.volume, volume));
        self.dispatcher.set_volume(volume);
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop polling and release both subscriptions
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            if tokio::time::timeout(Duration::from_millis(500), handle)
                .await
                .is_err()
            {
                tracing::warn!("Synchronizer for {} did not stop in time", self.device_id());
            }
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

struct Session {
    dispatcher: Dispatcher,
    state_tx: Arc<watch::Sender<DeviceState>>,
    poll_period: Duration,
    /// Present only while the playlist is non-empty
    seek_poll: Option<Interval>,
}

impl Session {
    async fn run(
        mut self,
        mut playlist_events: Subscription,
        mut speaker_events: Subscription,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                payload = playlist_events.recv() => match payload {
                    Some(payload) => self.handle(payload),
                    None => break,
                },
                payload = speaker_events.recv() => match payload {
                    Some(payload) => self.handle(payload),
                    None => break,
                },
                _ = next_tick(&mut self.seek_poll) => self.dispatcher.query_seek(),
            }
        }
        tracing::debug!("Synchronizer for {} stopped", self.dispatcher.device_id());
    }

    fn handle(&mut self, payload: Bytes) {
        let envelope = match codec::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping malformed message: {}", e);
                return;
            }
        };

        let head_before = self.head_url();
        if !self
            .state_tx
            .send_if_modified(|state| state.apply(&envelope.content))
        {
            return;
        }
        tracing::debug!("Applied {:?}", envelope.content);

        let head_after = self.head_url();
        self.on_head_change(head_before, head_after);
    }

    fn head_url(&self) -> Option<String> {
        self.state_tx.borrow().now_playing().map(|song| song.key().to_string())
    }

    fn on_head_change(&mut self, before: Option<String>, after: Option<String>) {
        match (before, after) {
            (Some(_), None) => {
                tracing::debug!("Playlist emptied, stopping seek poll");
                self.seek_poll = None;
            }
            (None, Some(_)) => {
                tracing::debug!("Playlist filled, polling seek every {:?}", self.poll_period);
                self.dispatcher.query_duration();
                let mut poll = interval_at(Instant::now() + self.poll_period, self.poll_period);
                poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.seek_poll = Some(poll);
            }
            (Some(before), Some(after)) if before != after => {
                self.dispatcher.query_duration();
            }
            _ => {}
        }
    }
}

/// Next poll tick, or never while no poll is running
async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
