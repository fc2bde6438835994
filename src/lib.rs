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

//! Hands-Free Profile RFCOMM session engine.
//!
//! Runs either side of the HFP service level connection (Hands-Free or Audio
//! Gateway) over an already-connected RFCOMM socket, one task per session.

pub mod config;
pub mod events;
pub mod hfp;
pub mod rfcomm;
pub mod transport;

pub use config::Config;
pub use events::{ChannelNotifier, Notifier, TransportEvent, TransportUpdate};
pub use hfp::{Codec, HfpState, Indicator, Role};
pub use rfcomm::{RfcommError, RfcommSession, SessionHandle};
pub use transport::{socket_from_fd, AtChannel, Device, Transport, TransportSignal};
