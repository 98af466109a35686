//! Rust client for networked speakers and their playlists
//!
//! Speakers and playlist services share a NATS publish/subscribe bus. Every
//! message is a binary envelope carrying one typed content variant; commands,
//! queries and events travel on fixed topics and are matched to a device by
//! the `device_id` inside the payload. There is no request/response pairing:
//! a query is answered by a later event.
//!
//! This library provides:
//!
//! - The message schema and its FlatBuffers codec
//! - A shared NATS connection over WebSocket with reconnect and replay
//! - Device discovery
//! - A per-device state synchronizer with seek polling
//! - A command dispatcher for playback, volume and playlist edits
//! - The echo service and a listener for its answers
//!
//! # Quick Start
//!
//! ```no_run
//! use speaker_bus::{ClientConfig, Connection, Discovery, Synchronizer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("ws://127.0.0.1:8080");
//!     let connection = Arc::new(Connection::connect(&config).await?);
//!
//!     // Find devices
//!     let mut discovery = Discovery::new(connection.clone());
//!     let mut updates = discovery.subscribe_updates();
//!     discovery.start()?;
//!     let devices = updates.recv().await?;
//!
//!     if let Some(device) = devices.first() {
//!         // Follow one device and change its volume
//!         let sync = Synchronizer::start(connection.clone(), device.clone(), &config)?;
//!         sync.set_volume(40.0);
//!
//!         let mut state = sync.watch();
//!         state.changed().await?;
//!         println!("Now playing: {:?}", state.borrow().now_playing());
//!     }
//!
//!     discovery.stop().await;
//!     connection.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Protocol / Codec**: message types and their binary encoding
//! - **Topics**: the fixed topic for every message category
//! - **Transport**: `publish` / `subscribe` over [`Connection`] or the in-process [`MemoryBus`]
//! - **Discovery**: known device ids, replaced by each device-list event
//! - **Synchronizer**: local view of one device, kept current by events and polling
//! - **Dispatcher**: user intents turned into outbound messages
//! - **Echo**: every message described back on the `echo` topic

pub mod codec;
mod config;
mod connection;
mod discovery;
mod dispatcher;
mod echo;
mod error;
mod fbs;
pub mod protocol;
mod subscription;
mod synchronizer;
mod topics;
mod transport;
mod types;

// Public exports
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionStatus};
pub use discovery::{Discovery, KnownDevices};
pub use dispatcher::{publish_content, query_speaker_list, Dispatcher};
pub use echo::{EchoListener, EchoResponder};
pub use error::{Result, SpeakerBusError};
pub use protocol::{Content, ContentType, Envelope};
pub use subscription::Subscription;
pub use synchronizer::{DeviceState, Synchronizer};
pub use topics::Topic;
pub use transport::{MemoryBus, SharedTransport, Transport};
pub use types::{clamp_volume, DeviceId, Song, Volume, MAX_VOLUME, MIN_VOLUME};
