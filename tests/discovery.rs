use speaker_bus::codec;
use speaker_bus::protocol::{Echo, SpeakerListEvent};
use speaker_bus::{publish_content, Content, Discovery, MemoryBus, Transport};
use std::sync::Arc;
use std::time::Duration;

fn list_event(ids: &[&str]) -> Content {
    Content::SpeakerListEvent(SpeakerListEvent {
        device_ids: ids.iter().map(|id| id.to_string()).collect(),
    })
}

#[tokio::test]
async fn start_listens_before_querying() {
    let bus = MemoryBus::new();
    let mut queries = bus.subscribe("speaker.query").unwrap();
    let mut discovery = Discovery::new(Arc::new(bus.clone()));

    discovery.start().unwrap();
    assert_eq!(bus.subscriber_count("speaker.event"), 1);

    let payload = queries.try_recv().unwrap().expect("query published");
    assert_eq!(codec::decode(payload).unwrap().content, Content::SpeakerListQuery);

    discovery.refresh().unwrap();
    assert!(queries.try_recv().unwrap().is_some());

    discovery.stop().await;
    assert!(!discovery.is_running());
    assert_eq!(bus.subscriber_count("speaker.event"), 0);
}

#[tokio::test]
async fn each_event_replaces_the_known_set() {
    let bus = MemoryBus::new();
    let mut discovery = Discovery::new(Arc::new(bus.clone()));
    let mut updates = discovery.subscribe_updates();
    discovery.start().unwrap();

    publish_content(&bus, &list_event(&["a"])).unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, vec!["a".to_string()]);

    publish_content(&bus, &list_event(&["b", "c"])).unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(discovery.devices(), vec!["b".to_string(), "c".to_string()]);
    assert_eq!(discovery.device_count(), 2);
    assert!(discovery.is_known("c"));
    assert!(!discovery.is_known("a"));
}

#[tokio::test]
async fn other_speaker_traffic_is_ignored() {
    let bus = MemoryBus::new();
    let mut discovery = Discovery::new(Arc::new(bus.clone()));
    let mut updates = discovery.subscribe_updates();
    discovery.start().unwrap();

    bus.publish("speaker.event", bytes::Bytes::from_static(b"garbage"))
        .unwrap();
    bus.publish(
        "speaker.event",
        codec::encode(&Content::Echo(Echo {
            message: "not a list".into(),
        })),
    )
    .unwrap();
    publish_content(&bus, &list_event(&[])).unwrap();

    let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(update.is_empty());
    assert_eq!(discovery.device_count(), 0);
}

#[tokio::test]
async fn list_survives_stop() {
    let bus = MemoryBus::new();
    let mut discovery = Discovery::new(Arc::new(bus.clone()));
    let mut updates = discovery.subscribe_updates();
    discovery.start().unwrap();

    publish_content(&bus, &list_event(&["a", "a", "b"])).unwrap();
    updates.recv().await.unwrap();
    discovery.stop().await;

    publish_content(&bus, &list_event(&["z"])).unwrap();
    assert_eq!(discovery.devices(), vec!["a".to_string(), "b".to_string()]);
}
