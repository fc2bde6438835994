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

//! Shared transport and device state.
//!
//! A [`Transport`] is shared between the RFCOMM session worker and the rest
//! of the system (audio path, client API). Every field is reached through
//! accessor methods so that locking stays inside this module.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::{Notifier, TransportUpdate};
use crate::hfp::{Codec, Indicator, Role, INDICATOR_COUNT};

/// Maximum speaker/microphone gain.
pub const GAIN_MAX: u8 = 15;

/// Byte stream carrying AT messages (RFCOMM socket or external handler).
pub trait AtChannel: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AtChannel for T {}

/// Wrap an already-connected stream socket descriptor.
///
/// Must be called from within a tokio runtime.
pub fn socket_from_fd(fd: OwnedFd) -> io::Result<Box<dyn AtChannel>> {
    let socket = std::os::unix::net::UnixStream::from(fd);
    socket.set_nonblocking(true)?;
    Ok(Box::new(tokio::net::UnixStream::from_std(socket)?))
}

/// Signals exchanged between transport workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    /// Liveness ping for the audio path.
    Ping,
    /// Gain values were changed by a client.
    SetVolume,
}

/// Apple accessory information (`AT+XAPL`, `AT+IPHONEACCEV`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u16,
    pub features: u8,
    pub docked: u8,
}

/// Remote Bluetooth device.
#[derive(Debug)]
pub struct Device {
    address: String,
    battery_level: RwLock<Option<u8>>,
    accessory: RwLock<AccessoryInfo>,
}

impl Device {
    pub fn new(address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            battery_level: RwLock::new(None),
            accessory: RwLock::new(AccessoryInfo::default()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Battery level in percent, if reported.
    pub fn battery_level(&self) -> Option<u8> {
        *self.battery_level.read()
    }

    pub fn set_battery_level(&self, level: u8) {
        *self.battery_level.write() = Some(level.min(100));
    }

    pub fn accessory(&self) -> AccessoryInfo {
        *self.accessory.read()
    }

    /// Update accessory information in place.
    pub fn update_accessory(&self, f: impl FnOnce(&mut AccessoryInfo)) {
        f(&mut *self.accessory.write());
    }
}

#[derive(Debug, Clone, Copy)]
struct ScoState {
    codec: Option<Codec>,
    mic_gain: u8,
    spk_gain: u8,
}

/// HFP transport shared by the RFCOMM session and the audio path.
pub struct Transport {
    id: String,
    role: Role,
    device: Arc<Device>,
    sco: RwLock<ScoState>,
    /// Features advertised by the remote side.
    hfp_features: RwLock<u32>,
    indicators: RwLock<[u8; INDICATOR_COUNT]>,
    notifier: Arc<dyn Notifier>,
    signal_tx: mpsc::UnboundedSender<TransportSignal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportSignal>>>,
    sco_signal_tx: Mutex<Option<mpsc::UnboundedSender<TransportSignal>>>,
    at_handler: Mutex<Option<Box<dyn AtChannel>>>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("device", &self.device.address())
            .field("sco", &*self.sco.read())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a new transport.
    pub fn new(
        id: impl Into<String>,
        role: Role,
        device: Arc<Device>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: id.into(),
            role,
            device,
            sco: RwLock::new(ScoState {
                codec: None,
                mic_gain: GAIN_MAX,
                spk_gain: GAIN_MAX,
            }),
            hfp_features: RwLock::new(0),
            indicators: RwLock::new([0; INDICATOR_COUNT]),
            notifier,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            sco_signal_tx: Mutex::new(None),
            at_handler: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Codec selected for the audio link, if known.
    pub fn codec(&self) -> Option<Codec> {
        self.sco.read().codec
    }

    pub fn set_codec(&self, codec: Codec) {
        self.sco.write().codec = Some(codec);
    }

    pub fn mic_gain(&self) -> u8 {
        self.sco.read().mic_gain
    }

    pub fn set_mic_gain(&self, gain: u8) {
        self.sco.write().mic_gain = gain.min(GAIN_MAX);
    }

    pub fn spk_gain(&self) -> u8 {
        self.sco.read().spk_gain
    }

    pub fn set_spk_gain(&self, gain: u8) {
        self.sco.write().spk_gain = gain.min(GAIN_MAX);
    }

    /// Raw feature bits advertised by the remote side.
    pub fn hfp_features(&self) -> u32 {
        *self.hfp_features.read()
    }

    pub fn set_hfp_features(&self, features: u32) {
        *self.hfp_features.write() = features;
    }

    pub fn indicator(&self, indicator: Indicator) -> u8 {
        self.indicators.read()[indicator.index()]
    }

    pub fn set_indicator(&self, indicator: Indicator, value: u8) {
        self.indicators.write()[indicator.index()] = value;
    }

    /// Current values of all indicators, in advertisement order.
    pub fn indicators(&self) -> [u8; INDICATOR_COUNT] {
        *self.indicators.read()
    }

    /// Announce a change of this transport.
    pub fn notify(&self, update: TransportUpdate) {
        self.notifier.transport_updated(&self.id, update);
    }

    pub(crate) fn notify_session_closed(&self) {
        self.notifier.session_closed(&self.id);
    }

    /// Send a signal to the RFCOMM session worker.
    pub fn send_signal(&self, signal: TransportSignal) {
        if self.signal_tx.send(signal).is_err() {
            debug!("RFCOMM signal dropped: {:?}", signal);
        }
    }

    /// Change gains on behalf of a client and ask the session to report them.
    pub fn request_volume(&self, mic_gain: u8, spk_gain: u8) {
        {
            let mut sco = self.sco.write();
            sco.mic_gain = mic_gain.min(GAIN_MAX);
            sco.spk_gain = spk_gain.min(GAIN_MAX);
        }
        self.send_signal(TransportSignal::SetVolume);
    }

    /// Take the receiving end of the session signal channel.
    ///
    /// Only one session may own it.
    pub(crate) fn take_signal_receiver(&self) -> Option<mpsc::UnboundedReceiver<TransportSignal>> {
        self.signal_rx.lock().take()
    }

    /// Give the signal receiver back after a session ended.
    pub(crate) fn restore_signal_receiver(&self, signal_rx: mpsc::UnboundedReceiver<TransportSignal>) {
        *self.signal_rx.lock() = Some(signal_rx);
    }

    /// Subscribe the audio path to liveness pings.
    pub fn subscribe_sco(&self) -> mpsc::UnboundedReceiver<TransportSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sco_signal_tx.lock() = Some(tx);
        rx
    }

    /// Ping the audio path, if one is subscribed.
    pub fn ping_sco(&self) {
        let mut sco_signal_tx = self.sco_signal_tx.lock();
        if let Some(tx) = sco_signal_tx.as_ref() {
            if tx.send(TransportSignal::Ping).is_err() {
                warn!("Audio path gone, dropping ping subscription");
                *sco_signal_tx = None;
            }
        }
    }

    /// Attach an external AT handler. Replaces a previously attached one
    /// that was not yet picked up by the session.
    pub fn attach_at_handler(&self, handler: Box<dyn AtChannel>) {
        *self.at_handler.lock() = Some(handler);
    }

    /// Hand the pending external AT handler over to the session.
    pub(crate) fn take_at_handler(&self) -> Option<Box<dyn AtChannel>> {
        self.at_handler.lock().take()
    }
}
