//! Message schema carried on the bus.
//!
//! Every message is an [`Envelope`]: a timestamp plus exactly one [`Content`]
//! variant. Each discriminated enum has an `Unknown(u8)` case so that newer
//! peers can add commands, queries or events without breaking older readers.

use crate::types::{DeviceId, Song, Volume};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wire discriminants. `0` is NONE everywhere.
pub(crate) mod tag {
    pub const SPEAKER_COMMAND: u8 = 1;
    pub const SPEAKER_QUERY: u8 = 2;
    pub const SPEAKER_EVENT: u8 = 3;
    pub const PLAYLIST_COMMAND: u8 = 4;
    pub const PLAYLIST_QUERY: u8 = 5;
    pub const PLAYLIST_EVENT: u8 = 6;
    pub const SPEAKER_LIST_QUERY: u8 = 7;
    pub const SPEAKER_LIST_EVENT: u8 = 8;
    pub const ECHO: u8 = 9;
    pub const ERROR: u8 = 10;
    pub const PRINT: u8 = 11;

    pub const PLAY: u8 = 1;
    pub const STOP: u8 = 2;
    pub const TOGGLE_PAUSE: u8 = 3;
    pub const SEEK: u8 = 4;
    pub const SET_MUSIC_VOLUME: u8 = 5;

    pub const QUERY_MUSIC_VOLUME: u8 = 1;
    pub const QUERY_SEEK: u8 = 2;
    pub const QUERY_DURATION: u8 = 3;

    pub const MUSIC_VOLUME_CHANGED: u8 = 1;
    pub const SEEK_CHANGED: u8 = 2;
    pub const DURATION_CHANGED: u8 = 3;
    pub const PAUSE_CHANGED: u8 = 4;
    pub const PLAY_STOPPED: u8 = 5;
    pub const FILE_ENDED: u8 = 6;

    pub const REPLACE_SONG: u8 = 1;
    pub const ADD_SONG: u8 = 2;
    pub const REMOVE_SONG: u8 = 3;
    pub const INSERT_SONG: u8 = 4;

    pub const QUERY_PLAYLIST_STATE: u8 = 1;

    pub const PLAYLIST_STATE_CHANGED: u8 = 1;

    pub const PLAY_YOUTUBE: u8 = 1;
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Outer message wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Advisory send time in ms since epoch; the bus decides delivery order
    pub timestamp: u64,
    pub content: Content,
}

impl Envelope {
    /// Wrap content stamped with the current wall-clock time
    pub fn new(content: Content) -> Self {
        Self {
            timestamp: now_millis(),
            content,
        }
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content.content_type()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.content.device_id()
    }
}

/// Closed set of content categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    SpeakerCommand,
    SpeakerQuery,
    SpeakerEvent,
    PlaylistCommand,
    PlaylistQuery,
    PlaylistEvent,
    SpeakerListQuery,
    SpeakerListEvent,
    Echo,
    Error,
    Print,
}

impl ContentType {
    pub fn tag(self) -> u8 {
        match self {
            ContentType::SpeakerCommand => tag::SPEAKER_COMMAND,
            ContentType::SpeakerQuery => tag::SPEAKER_QUERY,
            ContentType::SpeakerEvent => tag::SPEAKER_EVENT,
            ContentType::PlaylistCommand => tag::PLAYLIST_COMMAND,
            ContentType::PlaylistQuery => tag::PLAYLIST_QUERY,
            ContentType::PlaylistEvent => tag::PLAYLIST_EVENT,
            ContentType::SpeakerListQuery => tag::SPEAKER_LIST_QUERY,
            ContentType::SpeakerListEvent => tag::SPEAKER_LIST_EVENT,
            ContentType::Echo => tag::ECHO,
            ContentType::Error => tag::ERROR,
            ContentType::Print => tag::PRINT,
        }
    }

    pub fn from_tag(value: u8) -> Option<Self> {
        Some(match value {
            tag::SPEAKER_COMMAND => ContentType::SpeakerCommand,
            tag::SPEAKER_QUERY => ContentType::SpeakerQuery,
            tag::SPEAKER_EVENT => ContentType::SpeakerEvent,
            tag::PLAYLIST_COMMAND => ContentType::PlaylistCommand,
            tag::PLAYLIST_QUERY => ContentType::PlaylistQuery,
            tag::PLAYLIST_EVENT => ContentType::PlaylistEvent,
            tag::SPEAKER_LIST_QUERY => ContentType::SpeakerListQuery,
            tag::SPEAKER_LIST_EVENT => ContentType::SpeakerListEvent,
            tag::ECHO => ContentType::Echo,
            tag::ERROR => ContentType::Error,
            tag::PRINT => ContentType::Print,
            _ => return None,
        })
    }
}

/// Message content, one case per [`ContentType`]
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    SpeakerCommand(SpeakerCommand),
    SpeakerQuery(SpeakerQuery),
    SpeakerEvent(SpeakerEvent),
    PlaylistCommand(PlaylistCommand),
    PlaylistQuery(PlaylistQuery),
    PlaylistEvent(PlaylistEvent),
    SpeakerListQuery,
    SpeakerListEvent(SpeakerListEvent),
    Echo(Echo),
    Error(ErrorReport),
    Print(Print),
    /// Content type this build does not know; ignored by consumers
    Unknown(u8),
}

impl Content {
    pub fn content_type(&self) -> Option<ContentType> {
        Some(match self {
            Content::SpeakerCommand(_) => ContentType::SpeakerCommand,
            Content::SpeakerQuery(_) => ContentType::SpeakerQuery,
            Content::SpeakerEvent(_) => ContentType::SpeakerEvent,
            Content::PlaylistCommand(_) => ContentType::PlaylistCommand,
            Content::PlaylistQuery(_) => ContentType::PlaylistQuery,
            Content::PlaylistEvent(_) => ContentType::PlaylistEvent,
            Content::SpeakerListQuery => ContentType::SpeakerListQuery,
            Content::SpeakerListEvent(_) => ContentType::SpeakerListEvent,
            Content::Echo(_) => ContentType::Echo,
            Content::Error(_) => ContentType::Error,
            Content::Print(_) => ContentType::Print,
            Content::Unknown(_) => return None,
        })
    }

    /// Wire discriminant, including the raw value of `Unknown`
    pub fn tag(&self) -> u8 {
        match self {
            Content::Unknown(raw) => *raw,
            known => known.content_type().map(ContentType::tag).unwrap_or_default(),
        }
    }

    /// Addressed device for per-device categories
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Content::SpeakerCommand(c) => Some(&c.device_id),
            Content::SpeakerQuery(q) => Some(&q.device_id),
            Content::SpeakerEvent(e) => Some(&e.device_id),
            Content::PlaylistCommand(c) => Some(&c.device_id),
            Content::PlaylistQuery(q) => Some(&q.device_id),
            Content::PlaylistEvent(e) => Some(&e.device_id),
            Content::SpeakerListQuery
            | Content::SpeakerListEvent(_)
            | Content::Echo(_)
            | Content::Error(_)
            | Content::Print(_)
            | Content::Unknown(_) => None,
        }
    }
}

// ========== Speaker ==========

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerCommand {
    pub device_id: DeviceId,
    pub command: Command,
}

/// Playback command for a speaker
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play { url: String },
    Stop,
    TogglePause,
    Seek { position_seconds: f32 },
    SetMusicVolume { volume: Volume },
    Unknown(u8),
}

impl Command {
    pub fn tag(&self) -> u8 {
        match self {
            Command::Play { .. } => tag::PLAY,
            Command::Stop => tag::STOP,
            Command::TogglePause => tag::TOGGLE_PAUSE,
            Command::Seek { .. } => tag::SEEK,
            Command::SetMusicVolume { .. } => tag::SET_MUSIC_VOLUME,
            Command::Unknown(raw) => *raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerQuery {
    pub device_id: DeviceId,
    pub query: SpeakerQueryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerQueryKind {
    MusicVolume,
    Seek,
    Duration,
    Unknown(u8),
}

impl SpeakerQueryKind {
    pub fn tag(self) -> u8 {
        match self {
            SpeakerQueryKind::MusicVolume => tag::QUERY_MUSIC_VOLUME,
            SpeakerQueryKind::Seek => tag::QUERY_SEEK,
            SpeakerQueryKind::Duration => tag::QUERY_DURATION,
            SpeakerQueryKind::Unknown(raw) => raw,
        }
    }

    pub fn from_tag(value: u8) -> Self {
        match value {
            tag::QUERY_MUSIC_VOLUME => SpeakerQueryKind::MusicVolume,
            tag::QUERY_SEEK => SpeakerQueryKind::Seek,
            tag::QUERY_DURATION => SpeakerQueryKind::Duration,
            other => SpeakerQueryKind::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEvent {
    pub device_id: DeviceId,
    pub event: SpeakerEventKind,
}

/// State change reported by a speaker
#[derive(Debug, Clone, PartialEq)]
pub enum SpeakerEventKind {
    MusicVolumeChanged { volume: Volume },
    SeekChanged { seek: f32 },
    DurationChanged { duration: f32 },
    PauseChanged { paused: bool },
    PlayStopped,
    FileEnded,
    Unknown(u8),
}

impl SpeakerEventKind {
    pub fn tag(&self) -> u8 {
        match self {
            SpeakerEventKind::MusicVolumeChanged { .. } => tag::MUSIC_VOLUME_CHANGED,
            SpeakerEventKind::SeekChanged { .. } => tag::SEEK_CHANGED,
            SpeakerEventKind::DurationChanged { .. } => tag::DURATION_CHANGED,
            SpeakerEventKind::PauseChanged { .. } => tag::PAUSE_CHANGED,
            SpeakerEventKind::PlayStopped => tag::PLAY_STOPPED,
            SpeakerEventKind::FileEnded => tag::FILE_ENDED,
            SpeakerEventKind::Unknown(raw) => *raw,
        }
    }
}

// ========== Playlist ==========

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistCommand {
    pub device_id: DeviceId,
    pub command: PlaylistEdit,
}

/// Edit applied to a device's playlist. Index 0 is the playing track.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEdit {
    ReplaceSong { song: Song, index: u32 },
    AddSong { song: Song },
    RemoveSong { index: u32 },
    InsertSong { song: Song, index: u32 },
    Unknown(u8),
}

impl PlaylistEdit {
    pub fn tag(&self) -> u8 {
        match self {
            PlaylistEdit::ReplaceSong { .. } => tag::REPLACE_SONG,
            PlaylistEdit::AddSong { .. } => tag::ADD_SONG,
            PlaylistEdit::RemoveSong { .. } => tag::REMOVE_SONG,
            PlaylistEdit::InsertSong { .. } => tag::INSERT_SONG,
            PlaylistEdit::Unknown(raw) => *raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistQuery {
    pub device_id: DeviceId,
    pub query: PlaylistQueryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistQueryKind {
    PlaylistState,
    Unknown(u8),
}

impl PlaylistQueryKind {
    pub fn tag(self) -> u8 {
        match self {
            PlaylistQueryKind::PlaylistState => tag::QUERY_PLAYLIST_STATE,
            PlaylistQueryKind::Unknown(raw) => raw,
        }
    }

    pub fn from_tag(value: u8) -> Self {
        match value {
            tag::QUERY_PLAYLIST_STATE => PlaylistQueryKind::PlaylistState,
            other => PlaylistQueryKind::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEvent {
    pub device_id: DeviceId,
    pub event: PlaylistEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEventKind {
    /// Full playlist, never a diff
    PlaylistStateChanged { songs: Vec<Song> },
    Unknown(u8),
}

impl PlaylistEventKind {
    pub fn tag(&self) -> u8 {
        match self {
            PlaylistEventKind::PlaylistStateChanged { .. } => tag::PLAYLIST_STATE_CHANGED,
            PlaylistEventKind::Unknown(raw) => *raw,
        }
    }
}

// ========== Broadcast / diagnostic ==========

/// Full list of devices known to an aggregator
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpeakerListEvent {
    pub device_ids: Vec<DeviceId>,
}

/// Text answered by the echo service
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Echo {
    pub message: String,
}

/// Text a client asks the echo service to repeat
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Print {
    pub message: String,
}

/// Error published by a service on the `error` topic
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorReport {
    pub from: String,
    pub message: String,
}
