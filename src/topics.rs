//! Topic names on the bus.
//!
//! Topics partition traffic by role (command / query / event), never by
//! device. Device filtering happens on the `device_id` inside the payload.

use crate::protocol::Content;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SpeakerCommand,
    SpeakerQuery,
    SpeakerEvent,
    PlaylistCommand,
    PlaylistQuery,
    PlaylistEvent,
    Echo,
    Print,
    Error,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::SpeakerCommand,
        Topic::SpeakerQuery,
        Topic::SpeakerEvent,
        Topic::PlaylistCommand,
        Topic::PlaylistQuery,
        Topic::PlaylistEvent,
        Topic::Echo,
        Topic::Print,
        Topic::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::SpeakerCommand => "speaker.command",
            Topic::SpeakerQuery => "speaker.query",
            Topic::SpeakerEvent => "speaker.event",
            Topic::PlaylistCommand => "playlist.command",
            Topic::PlaylistQuery => "playlist.query",
            Topic::PlaylistEvent => "playlist.event",
            Topic::Echo => "echo",
            Topic::Print => "print",
            Topic::Error => "error",
        }
    }

    /// Topic a message of this content belongs on.
    ///
    /// The device list query/event share the speaker query/event topics and
    /// are told apart by content type. Unknown content has no topic.
    pub fn for_content(content: &Content) -> Option<Self> {
        Some(match content {
            Content::SpeakerCommand(_) => Topic::SpeakerCommand,
            Content::SpeakerQuery(_) | Content::SpeakerListQuery => Topic::SpeakerQuery,
            Content::SpeakerEvent(_) | Content::SpeakerListEvent(_) => Topic::SpeakerEvent,
            Content::PlaylistCommand(_) => Topic::PlaylistCommand,
            Content::PlaylistQuery(_) => Topic::PlaylistQuery,
            Content::PlaylistEvent(_) => Topic::PlaylistEvent,
            Content::Echo(_) => Topic::Echo,
            Content::Print(_) => Topic::Print,
            Content::Error(_) => Topic::Error,
            Content::Unknown(_) => return None,
        })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
