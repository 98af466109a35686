//! FlatBuffers envelope codec.
//!
//! The wire layout is `schema/message.fbs`: a `Message` root table holding a
//! timestamp and a `MessageContent` union, with one more union level for
//! speaker and playlist payloads. Decoding runs the flatbuffers verifier over
//! the whole buffer before any field is read, so truncated or corrupt input
//! is rejected as `MalformedEnvelope` instead of being followed.
//!
//! Absent fields read as zero values. A union tag this build does not know
//! is not followed and decodes to the matching `Unknown` variant.

use crate::error::Result;
use crate::fbs::{self, field, Node, TableOffset};
use crate::protocol::{
    now_millis, tag, Command, Content, ContentType, Echo, Envelope, ErrorReport, PlaylistCommand,
    PlaylistEdit, PlaylistEvent, PlaylistEventKind, PlaylistQuery, PlaylistQueryKind, Print,
    SpeakerCommand, SpeakerEvent, SpeakerEventKind, SpeakerListEvent, SpeakerQuery,
    SpeakerQueryKind,
};
use crate::types::{clamp_volume, Song};
use bytes::Bytes;
use flatbuffers::{FlatBufferBuilder, WIPOffset};

/// Encode content into a fresh envelope stamped with the current time
pub fn encode(content: &Content) -> Bytes {
    write_envelope(now_millis(), content)
}

/// Encode an envelope as-is (timestamp included)
pub fn encode_envelope(envelope: &Envelope) -> Bytes {
    write_envelope(envelope.timestamp, &envelope.content)
}

fn write_envelope(timestamp: u64, content: &Content) -> Bytes {
    let mut fbb = FlatBufferBuilder::new();
    let body = write_content(&mut fbb, content);

    let start = fbb.start_table();
    fbb.push_slot::<u64>(field::TIMESTAMP, timestamp, 0);
    fbb.push_slot::<u8>(field::CONTENT_TYPE, content.tag(), 0);
    if let Some(body) = body {
        fbb.push_slot_always::<TableOffset>(field::CONTENT, body);
    }
    let root = fbb.end_table(start);
    fbb.finish(root, None);

    Bytes::copy_from_slice(fbb.finished_data())
}

/// Decode an envelope. Input that fails verification is `MalformedEnvelope`;
/// unknown discriminants decode to `Unknown` variants.
pub fn decode(buf: Bytes) -> Result<Envelope> {
    let message = fbs::root(&buf)?;
    let content = read_content(message.u8(field::CONTENT_TYPE), message);

    Ok(Envelope {
        timestamp: message.u64(field::TIMESTAMP),
        content,
    })
}

// ========== Writing ==========
//
// Children are finished before their parent table is started.

fn empty(fbb: &mut FlatBufferBuilder) -> TableOffset {
    let start = fbb.start_table();
    fbb.end_table(start)
}

fn f32_value(fbb: &mut FlatBufferBuilder, value: f32) -> TableOffset {
    let start = fbb.start_table();
    fbb.push_slot::<f32>(field::VALUE, value, 0.0);
    fbb.end_table(start)
}

fn bool_value(fbb: &mut FlatBufferBuilder, value: bool) -> TableOffset {
    let start = fbb.start_table();
    fbb.push_slot::<bool>(field::VALUE, value, false);
    fbb.end_table(start)
}

fn text(fbb: &mut FlatBufferBuilder, value: &str) -> TableOffset {
    let value = fbb.create_string(value);
    let start = fbb.start_table();
    fbb.push_slot_always::<WIPOffset<_>>(field::VALUE, value);
    fbb.end_table(start)
}

fn play(fbb: &mut FlatBufferBuilder, url: &str) -> TableOffset {
    let youtube = text(fbb, url);
    let start = fbb.start_table();
    fbb.push_slot::<u8>(field::PLAY_TYPE, tag::PLAY_YOUTUBE, 0);
    fbb.push_slot_always::<TableOffset>(field::PLAY_BODY, youtube);
    fbb.end_table(start)
}

fn write_song(fbb: &mut FlatBufferBuilder, song: &Song) -> TableOffset {
    let url = fbb.create_string(&song.url);
    let thumbnail = fbb.create_string(&song.thumbnail);
    let title = fbb.create_string(&song.title);

    let start = fbb.start_table();
    fbb.push_slot_always::<WIPOffset<_>>(field::SONG_URL, url);
    fbb.push_slot_always::<WIPOffset<_>>(field::SONG_THUMBNAIL, thumbnail);
    fbb.push_slot_always::<WIPOffset<_>>(field::SONG_TITLE, title);
    fbb.end_table(start)
}

fn song_edit(fbb: &mut FlatBufferBuilder, song: &Song, index: Option<u32>) -> TableOffset {
    let song = write_song(fbb, song);
    let start = fbb.start_table();
    fbb.push_slot_always::<TableOffset>(field::EDIT_SONG, song);
    if let Some(index) = index {
        fbb.push_slot::<u32>(field::EDIT_INDEX, index, 0);
    }
    fbb.end_table(start)
}

fn remove_song(fbb: &mut FlatBufferBuilder, index: u32) -> TableOffset {
    let start = fbb.start_table();
    fbb.push_slot::<u32>(field::REMOVE_INDEX, index, 0);
    fbb.end_table(start)
}

/// A union value must be present exactly when its tag is non-zero, so
/// unknown kinds carry an empty table
fn unknown_body(fbb: &mut FlatBufferBuilder, kind: u8) -> Option<TableOffset> {
    (kind != 0).then(|| empty(fbb))
}

/// `{ device_id, kind, body }`
fn addressed(
    fbb: &mut FlatBufferBuilder,
    device_id: &str,
    kind: u8,
    body: Option<TableOffset>,
) -> TableOffset {
    let device_id = fbb.create_string(device_id);
    let start = fbb.start_table();
    fbb.push_slot_always::<WIPOffset<_>>(field::DEVICE_ID, device_id);
    fbb.push_slot::<u8>(field::KIND, kind, 0);
    if let Some(body) = body {
        fbb.push_slot_always::<TableOffset>(field::BODY, body);
    }
    fbb.end_table(start)
}

fn write_content(fbb: &mut FlatBufferBuilder, content: &Content) -> Option<TableOffset> {
    Some(match content {
        Content::SpeakerCommand(c) => {
            let body = match &c.command {
                Command::Play { url } => Some(play(fbb, url)),
                Command::Stop | Command::TogglePause => Some(empty(fbb)),
                Command::Seek { position_seconds } => Some(f32_value(fbb, *position_seconds)),
                Command::SetMusicVolume { volume } => Some(f32_value(fbb, clamp_volume(*volume))),
                Command::Unknown(kind) => unknown_body(fbb, *kind),
            };
            addressed(fbb, &c.device_id, c.command.tag(), body)
        }
        Content::SpeakerQuery(q) => {
            let body = match q.query {
                SpeakerQueryKind::Unknown(kind) => unknown_body(fbb, kind),
                _ => Some(empty(fbb)),
            };
            addressed(fbb, &q.device_id, q.query.tag(), body)
        }
        Content::SpeakerEvent(e) => {
            let body = match &e.event {
                SpeakerEventKind::MusicVolumeChanged { volume } => {
                    Some(f32_value(fbb, clamp_volume(*volume)))
                }
                SpeakerEventKind::SeekChanged { seek } => Some(f32_value(fbb, *seek)),
                SpeakerEventKind::DurationChanged { duration } => Some(f32_value(fbb, *duration)),
                SpeakerEventKind::PauseChanged { paused } => Some(bool_value(fbb, *paused)),
                SpeakerEventKind::PlayStopped | SpeakerEventKind::FileEnded => Some(empty(fbb)),
                SpeakerEventKind::Unknown(kind) => unknown_body(fbb, *kind),
            };
            addressed(fbb, &e.device_id, e.event.tag(), body)
        }
        Content::PlaylistCommand(c) => {
            let body = match &c.command {
                PlaylistEdit::ReplaceSong { song, index }
                | PlaylistEdit::InsertSong { song, index } => {
                    Some(song_edit(fbb, song, Some(*index)))
                }
                PlaylistEdit::AddSong { song } => Some(song_edit(fbb, song, None)),
                PlaylistEdit::RemoveSong { index } => Some(remove_song(fbb, *index)),
                PlaylistEdit::Unknown(kind) => unknown_body(fbb, *kind),
            };
            addressed(fbb, &c.device_id, c.command.tag(), body)
        }
        Content::PlaylistQuery(q) => {
            let body = match q.query {
                PlaylistQueryKind::Unknown(kind) => unknown_body(fbb, kind),
                PlaylistQueryKind::PlaylistState => Some(empty(fbb)),
            };
            addressed(fbb, &q.device_id, q.query.tag(), body)
        }
        Content::PlaylistEvent(e) => {
            let body = match &e.event {
                PlaylistEventKind::PlaylistStateChanged { songs } => {
                    let songs: Vec<TableOffset> =
                        songs.iter().map(|song| write_song(fbb, song)).collect();
                    let songs = fbb.create_vector(&songs);
                    let start = fbb.start_table();
                    fbb.push_slot_always::<WIPOffset<_>>(field::VALUE, songs);
                    Some(fbb.end_table(start))
                }
                PlaylistEventKind::Unknown(kind) => unknown_body(fbb, *kind),
            };
            addressed(fbb, &e.device_id, e.event.tag(), body)
        }
        Content::SpeakerListQuery => empty(fbb),
        Content::SpeakerListEvent(e) => {
            let ids: Vec<_> = e.device_ids.iter().map(|id| fbb.create_string(id)).collect();
            let ids = fbb.create_vector(&ids);
            let start = fbb.start_table();
            fbb.push_slot_always::<WIPOffset<_>>(field::VALUE, ids);
            fbb.end_table(start)
        }
        Content::Echo(e) => text(fbb, &e.message),
        Content::Print(p) => text(fbb, &p.message),
        Content::Error(e) => {
            let from = fbb.create_string(&e.from);
            let message = fbb.create_string(&e.message);
            let start = fbb.start_table();
            fbb.push_slot_always::<WIPOffset<_>>(field::ERROR_FROM, from);
            fbb.push_slot_always::<WIPOffset<_>>(field::ERROR_MESSAGE, message);
            fbb.end_table(start)
        }
        Content::Unknown(other) => return unknown_body(fbb, *other),
    })
}

// ========== Reading ==========

fn read_song(t: Node<'_>) -> Song {
    Song::new(
        t.str(field::SONG_URL),
        t.str(field::SONG_TITLE),
        t.str(field::SONG_THUMBNAIL),
    )
}

fn read_play_url(play: Node<'_>) -> String {
    match play.u8(field::PLAY_TYPE) {
        tag::PLAY_YOUTUBE => play.table(field::PLAY_BODY).str(field::VALUE).to_string(),
        other => {
            tracing::debug!("Play content type {} has no url", other);
            String::new()
        }
    }
}

/// Slots are read only once their tag is known; unknown bodies were never
/// verified
fn read_content(content_type: u8, message: Node<'_>) -> Content {
    let Some(kind) = ContentType::from_tag(content_type) else {
        return Content::Unknown(content_type);
    };
    let t = message.table(field::CONTENT);

    // Only per-device tables have these slots
    let device_id = || t.str(field::DEVICE_ID).to_string();
    let body = || t.table(field::BODY);

    match kind {
        ContentType::SpeakerCommand => {
            let command = match t.u8(field::KIND) {
                tag::PLAY => Command::Play {
                    url: read_play_url(body()),
                },
                tag::STOP => Command::Stop,
                tag::TOGGLE_PAUSE => Command::TogglePause,
                tag::SEEK => Command::Seek {
                    position_seconds: body().f32(field::VALUE),
                },
                tag::SET_MUSIC_VOLUME => Command::SetMusicVolume {
                    volume: body().f32(field::VALUE),
                },
                other => Command::Unknown(other),
            };
            Content::SpeakerCommand(SpeakerCommand {
                device_id: device_id(),
                command,
            })
        }
        ContentType::SpeakerQuery => Content::SpeakerQuery(SpeakerQuery {
            device_id: device_id(),
            query: SpeakerQueryKind::from_tag(t.u8(field::KIND)),
        }),
        ContentType::SpeakerEvent => {
            let event = match t.u8(field::KIND) {
                tag::MUSIC_VOLUME_CHANGED => SpeakerEventKind::MusicVolumeChanged {
                    volume: body().f32(field::VALUE),
                },
                tag::SEEK_CHANGED => SpeakerEventKind::SeekChanged {
                    seek: body().f32(field::VALUE),
                },
                tag::DURATION_CHANGED => SpeakerEventKind::DurationChanged {
                    duration: body().f32(field::VALUE),
                },
                tag::PAUSE_CHANGED => SpeakerEventKind::PauseChanged {
                    paused: body().bool(field::VALUE),
                },
                tag::PLAY_STOPPED => SpeakerEventKind::PlayStopped,
                tag::FILE_ENDED => SpeakerEventKind::FileEnded,
                other => SpeakerEventKind::Unknown(other),
            };
            Content::SpeakerEvent(SpeakerEvent {
                device_id: device_id(),
                event,
            })
        }
        ContentType::PlaylistCommand => {
            let command = match t.u8(field::KIND) {
                tag::REPLACE_SONG => PlaylistEdit::ReplaceSong {
                    song: read_song(body().table(field::EDIT_SONG)),
                    index: body().u32(field::EDIT_INDEX),
                },
                tag::ADD_SONG => PlaylistEdit::AddSong {
                    song: read_song(body().table(field::EDIT_SONG)),
                },
                tag::REMOVE_SONG => PlaylistEdit::RemoveSong {
                    index: body().u32(field::REMOVE_INDEX),
                },
                tag::INSERT_SONG => PlaylistEdit::InsertSong {
                    song: read_song(body().table(field::EDIT_SONG)),
                    index: body().u32(field::EDIT_INDEX),
                },
                other => PlaylistEdit::Unknown(other),
            };
            Content::PlaylistCommand(PlaylistCommand {
                device_id: device_id(),
                command,
            })
        }
        ContentType::PlaylistQuery => Content::PlaylistQuery(PlaylistQuery {
            device_id: device_id(),
            query: PlaylistQueryKind::from_tag(t.u8(field::KIND)),
        }),
        ContentType::PlaylistEvent => {
            let event = match t.u8(field::KIND) {
                tag::PLAYLIST_STATE_CHANGED => PlaylistEventKind::PlaylistStateChanged {
                    songs: body().tables(field::VALUE).into_iter().map(read_song).collect(),
                },
                other => PlaylistEventKind::Unknown(other),
            };
            Content::PlaylistEvent(PlaylistEvent {
                device_id: device_id(),
                event,
            })
        }
        ContentType::SpeakerListQuery => Content::SpeakerListQuery,
        ContentType::SpeakerListEvent => Content::SpeakerListEvent(SpeakerListEvent {
            device_ids: t.strs(field::VALUE).into_iter().map(str::to_string).collect(),
        }),
        ContentType::Echo => Content::Echo(Echo {
            message: t.str(field::VALUE).to_string(),
        }),
        ContentType::Print => Content::Print(Print {
            message: t.str(field::VALUE).to_string(),
        }),
        ContentType::Error => Content::Error(ErrorReport {
            from: t.str(field::ERROR_FROM).to_string(),
            message: t.str(field::ERROR_MESSAGE).to_string(),
        }),
    }
}
