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

//! Service level connection state machine.
//!
//! [`Connection`] is the per-session record. [`Connection::slc_step`] runs
//! once per event loop iteration until the session is connected: it sends
//! the command belonging to the current state, installs the handler expected
//! to answer it and tells the loop how long to wait for that answer.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{Result, RfcommError};
use super::handlers::{self, Handler};
use super::protocol::{build, AtMessage, AtType};
use crate::config::Config;
use crate::events::TransportUpdate;
use crate::hfp::{AgFeatures, Codec, HfFeatures, HfpState, Indicator, Role};
use crate::transport::Transport;

/// Handler the next matching message is routed to, installed by the state
/// machine after sending a command.
#[derive(Debug, Clone, Copy)]
pub struct Expectation {
    pub handler: &'static Handler,
    /// State reached when the peer answers `OK`.
    pub ack: Option<HfpState>,
}

/// State of a single RFCOMM session.
pub struct Connection {
    state: HfpState,
    state_prev: HfpState,
    retries: u32,
    expected: Option<Expectation>,
    /// Acknowledgement target of the expectation being handled.
    pub(crate) ack: Option<HfpState>,
    /// Gains last reported to or by the peer.
    pub(crate) mic_gain: u8,
    pub(crate) spk_gain: u8,
    /// The HF listed mSBC in `AT+BAC`.
    pub(crate) msbc: bool,
    /// Indicator at each `+CIND` position (0-based).
    pub(crate) indicator_map: Vec<Option<Indicator>>,
    transport: Arc<Transport>,
    config: Arc<Config>,
    outgoing: Vec<u8>,
}

impl Connection {
    /// Create the record for a new session on `transport`.
    pub fn new(transport: Arc<Transport>, config: Arc<Config>) -> Self {
        Self {
            state: HfpState::Disconnected,
            state_prev: HfpState::Disconnected,
            retries: 0,
            expected: None,
            ack: None,
            mic_gain: transport.mic_gain(),
            spk_gain: transport.spk_gain(),
            msbc: false,
            indicator_map: Vec::new(),
            transport,
            config,
            outgoing: Vec::new(),
        }
    }

    pub fn state(&self) -> HfpState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_connected(&self) -> bool {
        self.state == HfpState::Connected
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn set_state(&mut self, state: HfpState) {
        debug!("HFP state transition: {} -> {}", self.state, state);
        self.state = state;
    }

    /// Move forward to `target` unless that point was already passed.
    ///
    /// Entering [`HfpState::Connected`] announces the negotiated codec.
    pub fn advance_to(&mut self, target: HfpState) {
        if self.state >= target {
            return;
        }
        self.set_state(target);
        if target == HfpState::Connected {
            self.transport
                .notify(TransportUpdate::SAMPLING | TransportUpdate::CODEC);
        }
    }

    /// Queue an AT message for the peer.
    pub fn send(&mut self, kind: AtType, command: &str, value: Option<&str>) {
        debug!(
            "Sending AT message: {}: command:{}, value:{}",
            kind.as_str(),
            command,
            value.unwrap_or("")
        );
        self.outgoing.extend_from_slice(&build(kind, command, value));
    }

    /// Queue a result code (`OK`, `ERROR`, ...).
    pub fn send_result(&mut self, code: &str) {
        self.send(AtType::Response, "", Some(code));
    }

    /// Queue bytes for the peer as they are.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        debug!("Sending raw AT data: {} bytes", bytes.len());
        self.outgoing.extend_from_slice(bytes);
    }

    /// Take everything queued for the peer.
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }

    /// Route the next message matching `handler` to it.
    ///
    /// Replaces an expectation that is still pending.
    pub fn expect(&mut self, handler: &'static Handler, ack: Option<HfpState>) {
        self.expected = Some(Expectation { handler, ack });
    }

    /// Expect a bare `OK` that moves the session to `target`.
    pub fn expect_ok(&mut self, target: HfpState) {
        self.expect(&handlers::RESP_OK, Some(target));
    }

    pub fn expected(&self) -> Option<&Expectation> {
        self.expected.as_ref()
    }

    /// Consume the expectation if `message` is what it waits for.
    pub fn take_expected(&mut self, message: &AtMessage) -> Option<&'static Handler> {
        match self.expected {
            Some(expectation) if expectation.handler.matches(message) => {
                self.expected = None;
                self.ack = expectation.ack;
                Some(expectation.handler)
            }
            _ => None,
        }
    }

    /// Whether both sides advertised codec negotiation.
    pub fn codec_negotiation(&self) -> bool {
        let remote = self.transport.hfp_features();
        match self.transport.role() {
            Role::HandsFree => {
                self.config.hfp.hf_features().contains(HfFeatures::CODEC)
                    && AgFeatures::from_bits_truncate(remote).contains(AgFeatures::CODEC)
            }
            Role::AudioGateway => {
                self.config.hfp.ag_features().contains(AgFeatures::CODEC)
                    && HfFeatures::from_bits_truncate(remote).contains(HfFeatures::CODEC)
            }
        }
    }

    /// Confirm the codec selected by the AG (HF).
    pub(crate) fn confirm_codec(&mut self, codec: Codec) {
        self.send(AtType::Set, "+BCS", Some(&codec.id().to_string()));
        self.expect(&handlers::RESP_BCS_OK, Some(HfpState::CodecSelectOk));
    }

    /// Run one step of the SLC procedure.
    ///
    /// Returns how long to wait for the peer before the step is repeated, or
    /// `None` to wait indefinitely.
    pub fn slc_step(&mut self) -> Result<Option<Duration>> {
        if self.is_connected() {
            return Ok(None);
        }

        if self.state != self.state_prev {
            self.state_prev = self.state;
            self.retries = 0;
        }

        if self.retries > self.config.rfcomm.slc_retries {
            warn!("SLC stuck in {} after {} retries", self.state, self.retries);
            return Err(RfcommError::Timeout);
        }

        match self.transport.role() {
            Role::HandsFree => self.hf_step(),
            Role::AudioGateway => self.ag_step(),
        }

        if self.expected.is_some() && !self.is_connected() {
            self.retries += 1;
            return Ok(Some(self.config.rfcomm.slc_timeout()));
        }

        Ok(None)
    }

    fn hf_step(&mut self) {
        match self.state {
            HfpState::Disconnected => {
                let features = self.config.hfp.features_hf.to_string();
                self.send(AtType::Set, "+BRSF", Some(&features));
                self.expect(&handlers::BRSF_RESP, None);
            }
            HfpState::FeaturesSet => self.expect_ok(HfpState::FeaturesSetOk),
            HfpState::FeaturesSetOk if self.codec_negotiation() => {
                let codecs = if self.config.hfp.msbc { "1,2" } else { "1" };
                self.send(AtType::Set, "+BAC", Some(codecs));
                self.expect_ok(HfpState::CodecListSetOk);
            }
            HfpState::FeaturesSetOk | HfpState::CodecListSetOk => {
                self.send(AtType::Test, "+CIND", None);
                self.expect(&handlers::CIND_RESP_TEST, None);
            }
            HfpState::IndicatorCapsTest => self.expect_ok(HfpState::IndicatorCapsTestOk),
            HfpState::IndicatorCapsTestOk => {
                self.send(AtType::Get, "+CIND", None);
                self.expect(&handlers::CIND_RESP_GET, None);
            }
            HfpState::IndicatorCapsGet => self.expect_ok(HfpState::IndicatorCapsGetOk),
            HfpState::IndicatorCapsGetOk => {
                // AT+CMER=<mode>,<keyp>,<disp>,<ind>,<bfr>
                self.send(AtType::Set, "+CMER", Some("3,0,0,1,0"));
                self.expect_ok(HfpState::EventReportingSetOk);
            }
            HfpState::EventReportingSetOk | HfpState::SlcConnected => {
                self.advance_to(HfpState::SlcConnected);
                // With codec negotiation the AG selects a codec next.
                if !self.codec_negotiation() {
                    self.advance_to(HfpState::Connected);
                }
            }
            HfpState::CodecSelect => match self.transport.codec() {
                Some(codec) => self.confirm_codec(codec),
                None => self.advance_to(HfpState::Connected),
            },
            HfpState::CodecSelectOk | HfpState::CodecConnected => {
                self.advance_to(HfpState::Connected)
            }
            HfpState::Connected => {}
        }
    }

    fn ag_step(&mut self) {
        match self.state {
            // Driven by the HF.
            state if state < HfpState::EventReportingSetOk => {}
            HfpState::EventReportingSetOk | HfpState::SlcConnected => {
                self.advance_to(HfpState::SlcConnected);
                if self.codec_negotiation() {
                    let codec = if self.msbc && self.config.hfp.msbc {
                        Codec::Msbc
                    } else {
                        Codec::Cvsd
                    };
                    self.send(AtType::Response, "+BCS", Some(&codec.id().to_string()));
                    self.transport.set_codec(codec);
                    self.expect(&handlers::BCS_SET, None);
                } else {
                    self.advance_to(HfpState::Connected);
                }
            }
            HfpState::CodecSelect | HfpState::CodecSelectOk | HfpState::CodecConnected => {
                self.advance_to(HfpState::Connected)
            }
            _ => {}
        }
    }
}
