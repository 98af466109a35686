//! FlatBuffers layout of `schema/message.fbs`.
//!
//! Reads go through [`Node`], an untyped view of one table. Its accessors
//! trust the slot types, so every buffer must pass [`root`] first: the
//! verifiers below walk each nested table, vector and union by tag.

use crate::protocol::tag;
use flatbuffers::{
    Follow, ForwardsUOffset, InvalidFlatbuffer, Table, TableFinishedWIPOffset, VOffsetT,
    Verifiable, Verifier, Vector, WIPOffset,
};

/// Offset of a finished table inside a builder
pub(crate) type TableOffset = WIPOffset<TableFinishedWIPOffset>;

/// vtable entry of the n-th field
const fn slot(n: VOffsetT) -> VOffsetT {
    4 + 2 * n
}

/// Field slots per table. A union field takes two: its tag, then its value.
pub(crate) mod field {
    use super::slot;
    use flatbuffers::VOffsetT;

    pub const TIMESTAMP: VOffsetT = slot(0);
    pub const CONTENT_TYPE: VOffsetT = slot(1);
    pub const CONTENT: VOffsetT = slot(2);

    /// Speaker and playlist commands, queries and events
    pub const DEVICE_ID: VOffsetT = slot(0);
    pub const KIND: VOffsetT = slot(1);
    pub const BODY: VOffsetT = slot(2);

    pub const PLAY_TYPE: VOffsetT = slot(0);
    pub const PLAY_BODY: VOffsetT = slot(1);

    pub const SONG_URL: VOffsetT = slot(0);
    pub const SONG_THUMBNAIL: VOffsetT = slot(1);
    pub const SONG_TITLE: VOffsetT = slot(2);

    pub const EDIT_SONG: VOffsetT = slot(0);
    pub const EDIT_INDEX: VOffsetT = slot(1);
    pub const REMOVE_INDEX: VOffsetT = slot(0);

    /// Only field of single-value tables (volume, seek, url, message, lists)
    pub const VALUE: VOffsetT = slot(0);

    pub const ERROR_FROM: VOffsetT = slot(0);
    pub const ERROR_MESSAGE: VOffsetT = slot(1);
}

/// Read view of one table. A missing table reads as all defaults.
#[derive(Clone, Copy, Default)]
pub(crate) struct Node<'a> {
    tab: Option<Table<'a>>,
}

impl<'a> Follow<'a> for Node<'a> {
    type Inner = Node<'a>;

    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Node {
            tab: Some(Table::new(buf, loc)),
        }
    }
}

impl<'a> Node<'a> {
    fn get<T: Follow<'a> + 'a>(&self, slot: VOffsetT) -> Option<T::Inner> {
        // SAFETY: nodes only come out of `root`, which verified every slot
        // read here against the type the codec reads it as
        self.tab.and_then(|tab| unsafe { tab.get::<T>(slot, None) })
    }

    pub fn u8(&self, slot: VOffsetT) -> u8 {
        self.get::<u8>(slot).unwrap_or(0)
    }

    pub fn u32(&self, slot: VOffsetT) -> u32 {
        self.get::<u32>(slot).unwrap_or(0)
    }

    pub fn u64(&self, slot: VOffsetT) -> u64 {
        self.get::<u64>(slot).unwrap_or(0)
    }

    pub fn f32(&self, slot: VOffsetT) -> f32 {
        self.get::<f32>(slot).unwrap_or(0.0)
    }

    pub fn bool(&self, slot: VOffsetT) -> bool {
        self.get::<bool>(slot).unwrap_or(false)
    }

    pub fn str(&self, slot: VOffsetT) -> &'a str {
        self.get::<ForwardsUOffset<&'a str>>(slot).unwrap_or("")
    }

    pub fn table(&self, slot: VOffsetT) -> Node<'a> {
        self.get::<ForwardsUOffset<Node<'a>>>(slot).unwrap_or_default()
    }

    pub fn tables(&self, slot: VOffsetT) -> Vec<Node<'a>> {
        self.get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Node<'a>>>>>(slot)
            .map(|items| items.iter().collect())
            .unwrap_or_default()
    }

    pub fn strs(&self, slot: VOffsetT) -> Vec<&'a str> {
        self.get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<&'a str>>>>(slot)
            .map(|items| items.iter().collect())
            .unwrap_or_default()
    }
}

/// Verify `buf` and return its `Message` table
pub(crate) fn root(buf: &[u8]) -> Result<Node<'_>, InvalidFlatbuffer> {
    flatbuffers::root::<MessageRoot>(buf).map(|message| message.0)
}

struct MessageRoot<'a>(Node<'a>);

impl<'a> Follow<'a> for MessageRoot<'a> {
    type Inner = MessageRoot<'a>;

    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        MessageRoot(Node::follow(buf, loc))
    }
}

impl Verifiable for MessageRoot<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u64>("timestamp", field::TIMESTAMP, false)?
            .visit_union::<u8, _>(
                "content_type",
                field::CONTENT_TYPE,
                "content",
                field::CONTENT,
                false,
                content_body,
            )?
            .finish();
        Ok(())
    }
}

// ========== Verifiers ==========

/// Checks the table a union tag points at; unknown tags are not followed
type BodyVerifier = fn(u8, &mut Verifier, usize) -> Result<(), InvalidFlatbuffer>;

fn content_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::SPEAKER_COMMAND => v.verify_union_variant::<ForwardsUOffset<SpeakerCommandTable>>(
            "MessageContent::SpeakerCommand",
            pos,
        ),
        tag::SPEAKER_QUERY => v.verify_union_variant::<ForwardsUOffset<SpeakerQueryTable>>(
            "MessageContent::SpeakerQuery",
            pos,
        ),
        tag::SPEAKER_EVENT => v.verify_union_variant::<ForwardsUOffset<SpeakerEventTable>>(
            "MessageContent::SpeakerEvent",
            pos,
        ),
        tag::PLAYLIST_COMMAND => v.verify_union_variant::<ForwardsUOffset<PlaylistCommandTable>>(
            "MessageContent::PlaylistCommand",
            pos,
        ),
        tag::PLAYLIST_QUERY => v.verify_union_variant::<ForwardsUOffset<PlaylistQueryTable>>(
            "MessageContent::PlaylistQuery",
            pos,
        ),
        tag::PLAYLIST_EVENT => v.verify_union_variant::<ForwardsUOffset<PlaylistEventTable>>(
            "MessageContent::PlaylistEvent",
            pos,
        ),
        tag::SPEAKER_LIST_QUERY => v.verify_union_variant::<ForwardsUOffset<EmptyTable>>(
            "MessageContent::SpeakerListQuery",
            pos,
        ),
        tag::SPEAKER_LIST_EVENT => v.verify_union_variant::<ForwardsUOffset<StringListTable>>(
            "MessageContent::SpeakerListEvent",
            pos,
        ),
        tag::ECHO | tag::PRINT => {
            v.verify_union_variant::<ForwardsUOffset<TextTable>>("MessageContent::Text", pos)
        }
        tag::ERROR => {
            v.verify_union_variant::<ForwardsUOffset<ErrorTable>>("MessageContent::Error", pos)
        }
        _ => Ok(()),
    }
}

fn speaker_command_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::PLAY => v.verify_union_variant::<ForwardsUOffset<PlayTable>>("Play", pos),
        tag::STOP | tag::TOGGLE_PAUSE => {
            v.verify_union_variant::<ForwardsUOffset<EmptyTable>>("Stop", pos)
        }
        tag::SEEK | tag::SET_MUSIC_VOLUME => {
            v.verify_union_variant::<ForwardsUOffset<F32Table>>("Seek", pos)
        }
        _ => Ok(()),
    }
}

fn speaker_query_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::QUERY_MUSIC_VOLUME | tag::QUERY_SEEK | tag::QUERY_DURATION => {
            v.verify_union_variant::<ForwardsUOffset<EmptyTable>>("SpeakerQuery", pos)
        }
        _ => Ok(()),
    }
}

fn speaker_event_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::MUSIC_VOLUME_CHANGED | tag::SEEK_CHANGED | tag::DURATION_CHANGED => {
            v.verify_union_variant::<ForwardsUOffset<F32Table>>("SeekChanged", pos)
        }
        tag::PAUSE_CHANGED => {
            v.verify_union_variant::<ForwardsUOffset<BoolTable>>("PauseChanged", pos)
        }
        tag::PLAY_STOPPED | tag::FILE_ENDED => {
            v.verify_union_variant::<ForwardsUOffset<EmptyTable>>("PlayStopped", pos)
        }
        _ => Ok(()),
    }
}

fn playlist_command_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::REPLACE_SONG | tag::ADD_SONG | tag::INSERT_SONG => {
            v.verify_union_variant::<ForwardsUOffset<SongEditTable>>("InsertSong", pos)
        }
        tag::REMOVE_SONG => {
            v.verify_union_variant::<ForwardsUOffset<RemoveSongTable>>("RemoveSong", pos)
        }
        _ => Ok(()),
    }
}

fn playlist_query_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::QUERY_PLAYLIST_STATE => {
            v.verify_union_variant::<ForwardsUOffset<EmptyTable>>("QueryPlaylistState", pos)
        }
        _ => Ok(()),
    }
}

fn playlist_event_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::PLAYLIST_STATE_CHANGED => v.verify_union_variant::<ForwardsUOffset<SongListTable>>(
            "PlaylistStateChanged",
            pos,
        ),
        _ => Ok(()),
    }
}

fn play_body(kind: u8, v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
    match kind {
        tag::PLAY_YOUTUBE => {
            v.verify_union_variant::<ForwardsUOffset<TextTable>>("PlayYoutube", pos)
        }
        _ => Ok(()),
    }
}

/// `{ device_id, kind, body }`, the shape of every per-device message
fn verify_addressed(
    v: &mut Verifier,
    pos: usize,
    body: BodyVerifier,
) -> Result<(), InvalidFlatbuffer> {
    v.visit_table(pos)?
        .visit_field::<ForwardsUOffset<&str>>("device_id", field::DEVICE_ID, false)?
        .visit_union::<u8, _>("kind", field::KIND, "body", field::BODY, false, body)?
        .finish();
    Ok(())
}

enum SpeakerCommandTable {}
enum SpeakerQueryTable {}
enum SpeakerEventTable {}
enum PlaylistCommandTable {}
enum PlaylistQueryTable {}
enum PlaylistEventTable {}

impl Verifiable for SpeakerCommandTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        verify_addressed(v, pos, speaker_command_body)
    }
}

impl Verifiable for SpeakerQueryTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        verify_addressed(v, pos, speaker_query_body)
    }
}

impl Verifiable for SpeakerEventTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        verify_addressed(v, pos, speaker_event_body)
    }
}

impl Verifiable for PlaylistCommandTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        verify_addressed(v, pos, playlist_command_body)
    }
}

impl Verifiable for PlaylistQueryTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        verify_addressed(v, pos, playlist_query_body)
    }
}

impl Verifiable for PlaylistEventTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        verify_addressed(v, pos, playlist_event_body)
    }
}

/// Tables without fields (`Stop`, queries, `PlayStopped`, ...)
enum EmptyTable {}

impl Verifiable for EmptyTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?.finish();
        Ok(())
    }
}

enum F32Table {}

impl Verifiable for F32Table {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<f32>("value", field::VALUE, false)?
            .finish();
        Ok(())
    }
}

enum BoolTable {}

impl Verifiable for BoolTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<bool>("paused", field::VALUE, false)?
            .finish();
        Ok(())
    }
}

/// `PlayYoutube`, `Echo` and `Print`
enum TextTable {}

impl Verifiable for TextTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("message", field::VALUE, false)?
            .finish();
        Ok(())
    }
}

enum PlayTable {}

impl Verifiable for PlayTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_union::<u8, _>(
                "content_type",
                field::PLAY_TYPE,
                "content",
                field::PLAY_BODY,
                false,
                play_body,
            )?
            .finish();
        Ok(())
    }
}

enum SongTable {}

impl Verifiable for SongTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("url", field::SONG_URL, false)?
            .visit_field::<ForwardsUOffset<&str>>("thumbnail_b64", field::SONG_THUMBNAIL, false)?
            .visit_field::<ForwardsUOffset<&str>>("title", field::SONG_TITLE, false)?
            .finish();
        Ok(())
    }
}

/// `AddSong`, `InsertSong` and `ReplaceSong`; `AddSong` leaves the index out
enum SongEditTable {}

impl Verifiable for SongEditTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<SongTable>>("song", field::EDIT_SONG, false)?
            .visit_field::<u32>("index", field::EDIT_INDEX, false)?
            .finish();
        Ok(())
    }
}

enum RemoveSongTable {}

impl Verifiable for RemoveSongTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u32>("index", field::REMOVE_INDEX, false)?
            .finish();
        Ok(())
    }
}

enum SongListTable {}

impl Verifiable for SongListTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<SongTable>>>>(
                "songs",
                field::VALUE,
                false,
            )?
            .finish();
        Ok(())
    }
}

enum StringListTable {}

impl Verifiable for StringListTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<&str>>>>(
                "device_ids",
                field::VALUE,
                false,
            )?
            .finish();
        Ok(())
    }
}

enum ErrorTable {}

impl Verifiable for ErrorTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("from", field::ERROR_FROM, false)?
            .visit_field::<ForwardsUOffset<&str>>("message", field::ERROR_MESSAGE, false)?
            .finish();
        Ok(())
    }
}
