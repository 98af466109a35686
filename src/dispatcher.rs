//! Command Dispatcher: user intents to outbound envelopes.
//!
//! Every intent becomes exactly one message addressed to the selected
//! device. Nothing here waits for a reply; effects show up later as events.

use crate::codec;
use crate::error::{Result, SpeakerBusError};
use crate::protocol::{
    Command, Content, Echo, PlaylistCommand, PlaylistEdit, PlaylistQuery, PlaylistQueryKind,
    Print, SpeakerCommand, SpeakerQuery, SpeakerQueryKind,
};
use crate::topics::Topic;
use crate::transport::{SharedTransport, Transport};
use crate::types::{clamp_volume, DeviceId, Song, Volume};

/// Encode `content` and publish it on its topic
pub fn publish_content(transport: &dyn Transport, content: &Content) -> Result<()> {
    let topic = Topic::for_content(content).ok_or_else(|| {
        SpeakerBusError::Protocol(format!("no topic for content tag {}", content.tag()))
    })?;
    tracing::debug!("Dispatching {:?} on {}", content.content_type(), topic);
    transport.publish(topic.as_str(), codec::encode(content))
}

/// Ask every aggregator for the current device list
pub fn query_speaker_list(transport: &dyn Transport) -> Result<()> {
    publish_content(transport, &Content::SpeakerListQuery)
}

/// Sends commands and queries to one device
#[derive(Clone)]
pub struct Dispatcher {
    transport: SharedTransport,
    device_id: DeviceId,
}

impl Dispatcher {
    pub fn new(transport: SharedTransport, device_id: impl Into<DeviceId>) -> Self {
        Self {
            transport,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Publish arbitrary content, reporting failures to the caller
    pub fn send(&self, content: Content) -> Result<()> {
        publish_content(self.transport.as_ref(), &content)
    }

    /// Publish and swallow failures; intents never fail toward the UI
    fn dispatch(&self, content: Content) {
        if let Err(e) = self.send(content) {
            tracing::warn!("Dispatch to {} failed: {}", self.device_id, e);
        }
    }

    fn command(&self, command: Command) {
        self.dispatch(Content::SpeakerCommand(SpeakerCommand {
            device_id: self.device_id.clone(),
            command,
        }));
    }

    fn edit(&self, command: PlaylistEdit) {
        self.dispatch(Content::PlaylistCommand(PlaylistCommand {
            device_id: self.device_id.clone(),
            command,
        }));
    }

    fn query(&self, query: SpeakerQueryKind) {
        self.dispatch(Content::SpeakerQuery(SpeakerQuery {
            device_id: self.device_id.clone(),
            query,
        }));
    }

    // ========== Playback ==========

    pub fn play(&self, url: impl Into<String>) {
        self.command(Command::Play { url: url.into() });
    }

    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    pub fn toggle_pause(&self) {
        self.command(Command::TogglePause);
    }

    /// Seek to an absolute position; negative positions become 0
    pub fn seek(&self, position_seconds: f32) {
        let position_seconds = if position_seconds.is_finite() {
            position_seconds.max(0.0)
        } else {
            0.0
        };
        self.command(Command::Seek { position_seconds });
    }

    pub fn set_volume(&self, volume: Volume) {
        self.command(Command::SetMusicVolume {
            volume: clamp_volume(volume),
        });
    }

    // ========== Playlist ==========

    /// Append to the end of the playlist
    pub fn add_song(&self, song: Song) {
        self.edit(PlaylistEdit::AddSong { song });
    }

    pub fn insert_song(&self, song: Song, index: u32) {
        self.edit(PlaylistEdit::InsertSong { song, index });
    }

    pub fn replace_song(&self, song: Song, index: u32) {
        self.edit(PlaylistEdit::ReplaceSong { song, index });
    }

    pub fn remove_song(&self, index: u32) {
        self.edit(PlaylistEdit::RemoveSong { index });
    }

    // ========== Queries ==========

    pub fn query_playlist(&self) {
        self.dispatch(Content::PlaylistQuery(PlaylistQuery {
            device_id: self.device_id.clone(),
            query: PlaylistQueryKind::PlaylistState,
        }));
    }

    pub fn query_volume(&self) {
        self.query(SpeakerQueryKind::MusicVolume);
    }

    pub fn query_seek(&self) {
        self.query(SpeakerQueryKind::Seek);
    }

    pub fn query_duration(&self) {
        self.query(SpeakerQueryKind::Duration);
    }

    /// Diagnostic round trip through the bus
    pub fn echo(&self, message: impl Into<String>) {
        self.dispatch(Content::Echo(Echo {
            message: message.into(),
        }));
    }

    /// Free text for the echo service to answer on `echo`
    pub fn print(&self, message: impl Into<String>) {
        self.dispatch(Content::Print(Print {
            message: message.into(),
        }));
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("device_id", &self.device_id)
            .finish()
    }
}
