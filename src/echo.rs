//! Echo service and its listener.
//!
//! The responder answers every message seen on the bus with a one-line
//! description published on `echo`; the listener decodes those lines.

use crate::codec;
use crate::error::Result;
use crate::protocol::{Content, Echo, Envelope};
use crate::subscription::Subscription;
use crate::topics::Topic;
use crate::transport::{SharedTransport, Transport};
use bytes::Bytes;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Receives the lines published on `echo`
pub struct EchoListener {
    sub: Subscription,
}

impl EchoListener {
    pub fn start(transport: &dyn Transport) -> Result<Self> {
        Ok(Self {
            sub: transport.subscribe(Topic::Echo.as_str())?,
        })
    }

    /// Next echo line. Payloads that are not `Echo` content are skipped.
    ///
    /// Returns `None` once the subscription ends.
    pub async fn next(&mut self) -> Option<Echo> {
        while let Some(payload) = self.sub.recv().await {
            match codec::decode(payload) {
                Ok(Envelope {
                    content: Content::Echo(echo),
                    ..
                }) => return Some(echo),
                Ok(other) => tracing::debug!("Ignoring {:?} on echo", other.content_type()),
                Err(e) => tracing::warn!("Dropping malformed echo: {}", e),
            }
        }
        None
    }
}

/// Answers traffic on every topic except `echo` itself
pub struct EchoResponder {
    handles: Vec<JoinHandle<()>>,
}

impl EchoResponder {
    pub fn start(transport: SharedTransport) -> Result<Self> {
        let mut handles = Vec::new();
        for topic in Topic::ALL.into_iter().filter(|t| *t != Topic::Echo) {
            let subscription = transport.subscribe(topic.as_str())?;
            let transport = transport.clone();
            handles.push(subscription.spawn_handler(move |payload| {
                respond(transport.as_ref(), topic, payload)
            }));
        }
        tracing::info!("Echo responder listening on {} topics", handles.len());
        Ok(Self { handles })
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|handle| !handle.is_finished())
    }

    pub async fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
        tracing::info!("Echo responder stopped");
    }
}

impl Drop for EchoResponder {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn respond(transport: &dyn Transport, topic: Topic, payload: Bytes) {
    let envelope = match codec::decode(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("Not echoing malformed message on {}: {}", topic, e);
            return;
        }
    };
    let line = describe(topic, &envelope.content);
    tracing::info!("{}", line);

    // The echo keeps the timestamp of the message it answers
    let echo = Envelope {
        timestamp: envelope.timestamp,
        content: Content::Echo(Echo { message: line }),
    };
    if let Err(e) = transport.publish(Topic::Echo.as_str(), codec::encode_envelope(&echo)) {
        tracing::warn!("Echo publish failed: {}", e);
    }
}

/// `[topic] Type: text`
fn describe(topic: Topic, content: &Content) -> String {
    let (kind, text) = match content {
        Content::Print(print) => ("Print", print.message.as_str()),
        Content::Echo(echo) => ("Echo", echo.message.as_str()),
        Content::Unknown(0) => ("NONE", "NONE"),
        _ => ("UNKNOWN", "UNKNOWN"),
    };
    format!("[{}] {}: {}", topic, kind, text)
}
