use bytes::Bytes;
use speaker_bus::codec;
use speaker_bus::protocol::{
    Command, PlaylistEvent, PlaylistEventKind, PlaylistQuery, PlaylistQueryKind, SpeakerCommand,
    SpeakerEvent, SpeakerEventKind, SpeakerQuery, SpeakerQueryKind,
};
use speaker_bus::{
    publish_content, ClientConfig, Content, DeviceState, MemoryBus, Song, Subscription,
    Synchronizer, Transport,
};
use std::sync::Arc;
use std::time::Duration;

fn start(bus: &MemoryBus, device_id: &str) -> Synchronizer {
    Synchronizer::start(Arc::new(bus.clone()), device_id, &ClientConfig::default()).unwrap()
}

fn publish(bus: &MemoryBus, content: Content) {
    publish_content(bus, &content).unwrap();
}

fn drain(sub: &mut Subscription) -> Vec<Content> {
    let mut out = Vec::new();
    while let Some(payload) = sub.try_recv().unwrap() {
        out.push(codec::decode(payload).unwrap().content);
    }
    out
}

async fn settle(sync: &Synchronizer, ready: impl FnMut(&DeviceState) -> bool) {
    let mut state = sync.watch();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(ready))
        .await
        .expect("state never settled")
        .unwrap();
}

fn playlist(device_id: &str, urls: &[&str]) -> Content {
    Content::PlaylistEvent(PlaylistEvent {
        device_id: device_id.into(),
        event: PlaylistEventKind::PlaylistStateChanged {
            songs: urls
                .iter()
                .map(|url| Song::new(*url, format!("title {}", url), ""))
                .collect(),
        },
    })
}

fn speaker(device_id: &str, event: SpeakerEventKind) -> Content {
    Content::SpeakerEvent(SpeakerEvent {
        device_id: device_id.into(),
        event,
    })
}

fn query(device_id: &str, query: SpeakerQueryKind) -> Content {
    Content::SpeakerQuery(SpeakerQuery {
        device_id: device_id.into(),
        query,
    })
}

fn urls(state: &DeviceState) -> Vec<String> {
    state.songs.iter().map(|song| song.url.clone()).collect()
}

#[tokio::test]
async fn start_queries_playlist_and_volume() {
    let bus = MemoryBus::new();
    let mut speaker_queries = bus.subscribe("speaker.query").unwrap();
    let mut playlist_queries = bus.subscribe("playlist.query").unwrap();

    let sync = start(&bus, "d1");

    assert_eq!(
        drain(&mut playlist_queries),
        vec![Content::PlaylistQuery(PlaylistQuery {
            device_id: "d1".into(),
            query: PlaylistQueryKind::PlaylistState,
        })]
    );
    assert_eq!(
        drain(&mut speaker_queries),
        vec![query("d1", SpeakerQueryKind::MusicVolume)]
    );
    assert_eq!(sync.state(), DeviceState::new("d1"));
}

#[tokio::test(start_paused = true)]
async fn seek_poll_runs_only_while_playlist_is_non_empty() {
    let bus = MemoryBus::new();
    let mut queries = bus.subscribe("speaker.query").unwrap();
    let sync = start(&bus, "d1");
    drain(&mut queries);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(drain(&mut queries).is_empty());

    publish(&bus, playlist("d1", &["a"]));
    settle(&sync, |s| !s.songs.is_empty()).await;
    assert_eq!(
        drain(&mut queries),
        vec![query("d1", SpeakerQueryKind::Duration)]
    );

    tokio::time::sleep(Duration::from_millis(1_250)).await;
    assert_eq!(
        drain(&mut queries),
        vec![
            query("d1", SpeakerQueryKind::Seek),
            query("d1", SpeakerQueryKind::Seek),
        ]
    );

    publish(&bus, playlist("d1", &[]));
    settle(&sync, |s| s.songs.is_empty()).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(drain(&mut queries).is_empty());

    publish(&bus, playlist("d1", &["b"]));
    settle(&sync, |s| !s.songs.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        drain(&mut queries),
        vec![
            query("d1", SpeakerQueryKind::Duration),
            query("d1", SpeakerQueryKind::Seek),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn duration_is_queried_again_when_the_head_changes() {
    let bus = MemoryBus::new();
    let mut queries = bus.subscribe("speaker.query").unwrap();
    let sync = start(&bus, "d1");
    drain(&mut queries);

    publish(&bus, playlist("d1", &["a", "b"]));
    settle(&sync, |s| s.songs.len() == 2).await;
    publish(&bus, playlist("d1", &["a", "c"]));
    settle(&sync, |s| urls(s) == ["a", "c"]).await;
    publish(&bus, playlist("d1", &["c"]));
    settle(&sync, |s| urls(s) == ["c"]).await;

    let durations = drain(&mut queries)
        .into_iter()
        .filter(|c| *c == query("d1", SpeakerQueryKind::Duration))
        .count();
    assert_eq!(durations, 2);
}

#[tokio::test]
async fn events_for_other_devices_change_nothing() {
    let bus = MemoryBus::new();
    let sync = start(&bus, "d1");

    publish(&bus, speaker("d2", SpeakerEventKind::MusicVolumeChanged { volume: 80.0 }));
    publish(&bus, speaker("d2", SpeakerEventKind::SeekChanged { seek: 9.0 }));
    publish(&bus, playlist("d2", &["x"]));
    // Marker for d1 proves the d2 events were already handled
    publish(&bus, speaker("d1", SpeakerEventKind::DurationChanged { duration: 1.0 }));
    settle(&sync, |s| s.duration == 1.0).await;

    let state = sync.state();
    assert_eq!(state.volume, 0.0);
    assert_eq!(state.seek, 0.0);
    assert!(state.songs.is_empty());
}

#[tokio::test]
async fn playlist_events_replace_songs_wholesale() {
    let bus = MemoryBus::new();
    let sync = start(&bus, "d1");

    publish(&bus, playlist("d1", &["a", "b", "c"]));
    settle(&sync, |s| s.songs.len() == 3).await;
    publish(&bus, playlist("d1", &["d", "e"]));
    settle(&sync, |s| urls(s) == ["d", "e"]).await;

    assert_eq!(urls(&sync.state()), ["d", "e"]);
    assert_eq!(
        sync.state().now_playing().map(|song| song.title.as_str()),
        Some("title d")
    );
}

#[tokio::test]
async fn speaker_events_update_only_their_field() {
    let bus = MemoryBus::new();
    let sync = start(&bus, "d1");

    publish(&bus, speaker("d1", SpeakerEventKind::MusicVolumeChanged { volume: 35.0 }));
    publish(&bus, speaker("d1", SpeakerEventKind::DurationChanged { duration: 240.0 }));
    settle(&sync, |s| s.duration == 240.0).await;

    publish(&bus, speaker("d1", SpeakerEventKind::SeekChanged { seek: 61.5 }));
    settle(&sync, |s| s.seek == 61.5).await;

    let state = sync.state();
    assert_eq!(state.volume, 35.0);
    assert_eq!(state.duration, 240.0);
    assert!(!state.paused);
}

#[tokio::test]
async fn malformed_and_unknown_messages_are_dropped() {
    let bus = MemoryBus::new();
    let sync = start(&bus, "d1");

    bus.publish("speaker.event", Bytes::from_static(b"\x01\xff")).unwrap();
    bus.publish("speaker.event", codec::encode(&Content::Unknown(42)))
        .unwrap();
    publish(&bus, speaker("d1", SpeakerEventKind::Unknown(200)));
    publish(&bus, speaker("d1", SpeakerEventKind::SeekChanged { seek: 2.0 }));
    settle(&sync, |s| s.seek == 2.0).await;

    assert!(sync.is_running());
}

#[tokio::test]
async fn optimistic_volume_then_device_confirms() {
    let bus = MemoryBus::new();
    let mut commands = bus.subscribe("speaker.command").unwrap();
    let sync = start(&bus, "d1");

    sync.set_volume(42.0);
    assert_eq!(sync.state().volume, 42.0);
    assert_eq!(
        drain(&mut commands),
        vec![Content::SpeakerCommand(SpeakerCommand {
            device_id: "d1".into(),
            command: Command::SetMusicVolume { volume: 42.0 },
        })]
    );

    publish(&bus, speaker("d2", SpeakerEventKind::MusicVolumeChanged { volume: 7.0 }));
    publish(&bus, speaker("d1", SpeakerEventKind::SeekChanged { seek: 3.0 }));
    settle(&sync, |s| s.seek == 3.0).await;
    assert_eq!(sync.state().volume, 42.0);

    publish(&bus, speaker("d1", SpeakerEventKind::MusicVolumeChanged { volume: 42.0 }));
    publish(&bus, speaker("d1", SpeakerEventKind::SeekChanged { seek: 4.0 }));
    settle(&sync, |s| s.seek == 4.0).await;
    assert_eq!(sync.state().volume, 42.0);
}

#[tokio::test]
async fn stale_device_volume_overwrites_optimistic_write() {
    let bus = MemoryBus::new();
    let sync = start(&bus, "d1");

    sync.set_volume(60.0);
    publish(&bus, speaker("d1", SpeakerEventKind::MusicVolumeChanged { volume: 20.0 }));
    settle(&sync, |s| s.volume == 20.0).await;
}

#[tokio::test(start_paused = true)]
async fn stop_releases_subscriptions_and_poll() {
    let bus = MemoryBus::new();
    let mut queries = bus.subscribe("speaker.query").unwrap();
    let mut sync = start(&bus, "d1");
    assert_eq!(bus.subscriber_count("speaker.event"), 1);
    assert_eq!(bus.subscriber_count("playlist.event"), 1);

    publish(&bus, playlist("d1", &["a"]));
    settle(&sync, |s| !s.songs.is_empty()).await;

    sync.stop().await;
    assert!(!sync.is_running());
    assert_eq!(bus.subscriber_count("speaker.event"), 0);
    assert_eq!(bus.subscriber_count("playlist.event"), 0);

    drain(&mut queries);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut queries).is_empty());
}

#[tokio::test]
async fn switching_devices_starts_fresh() {
    let bus = MemoryBus::new();
    let mut first = start(&bus, "d1");
    publish(&bus, speaker("d1", SpeakerEventKind::MusicVolumeChanged { volume: 50.0 }));
    settle(&first, |s| s.volume == 50.0).await;
    first.stop().await;

    let second = start(&bus, "d2");
    assert_eq!(second.state(), DeviceState::new("d2"));
    assert_eq!(bus.subscriber_count("speaker.event"), 1);
}
