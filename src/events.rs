// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport change notifications.
//!
//! The session engine announces changes of shared transport state through a
//! [`Notifier`]. Notifications are fire-and-forget.

use bitflags::bitflags;
use tokio::sync::mpsc;
use tracing::debug;

bitflags! {
    /// Aspects of a transport that changed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransportUpdate: u8 {
        const BATTERY = 1 << 0;
        const VOLUME = 1 << 1;
        const SAMPLING = 1 << 2;
        const CODEC = 1 << 3;
    }
}

/// Event delivered to external clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Some aspects of the transport changed.
    Updated {
        transport: String,
        update: TransportUpdate,
    },
    /// The RFCOMM session of the transport ended.
    SessionClosed { transport: String },
}

/// Receiver of transport change notifications.
pub trait Notifier: Send + Sync {
    /// Announce that `update` aspects of `transport` changed.
    fn transport_updated(&self, transport: &str, update: TransportUpdate);

    /// Announce that the RFCOMM session of `transport` ended.
    fn session_closed(&self, transport: &str) {
        debug!("Session closed: {}", transport);
    }
}

/// Notifier forwarding events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelNotifier {
    /// Create a notifier together with the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }

    fn emit(&self, event: TransportEvent) {
        // Nobody listening is not an error.
        let _ = self.event_tx.send(event);
    }
}

impl Notifier for ChannelNotifier {
    fn transport_updated(&self, transport: &str, update: TransportUpdate) {
        debug!("Transport updated: {}: {:?}", transport, update);
        self.emit(TransportEvent::Updated {
            transport: transport.to_string(),
            update,
        });
    }

    fn session_closed(&self, transport: &str) {
        self.emit(TransportEvent::SessionClosed {
            transport: transport.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier() {
        let (notifier, mut event_rx) = ChannelNotifier::new();
        notifier.transport_updated("/dev0", TransportUpdate::SAMPLING | TransportUpdate::CODEC);
        notifier.session_closed("/dev0");

        assert_eq!(
            event_rx.try_recv().unwrap(),
            TransportEvent::Updated {
                transport: "/dev0".to_string(),
                update: TransportUpdate::SAMPLING | TransportUpdate::CODEC,
            }
        );
        assert_eq!(
            event_rx.try_recv().unwrap(),
            TransportEvent::SessionClosed {
                transport: "/dev0".to_string()
            }
        );
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (notifier, event_rx) = ChannelNotifier::new();
        drop(event_rx);
        notifier.transport_updated("/dev0", TransportUpdate::BATTERY);
    }
}
