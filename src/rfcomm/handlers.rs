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

//! AT message handlers.
//!
//! Handlers are plain records keyed by message kind and command name. The
//! static table covers everything the engine answers on its own; a few more
//! are only ever installed by the SLC state machine as the expected reply to
//! a command it just sent.

use tracing::{debug, warn};

use super::error::{Result, RfcommError};
use super::protocol::{parse_cind, AtMessage, AtType};
use super::slc::Connection;
use crate::events::TransportUpdate;
use crate::hfp::{battchg_to_level, Codec, HfpState, Indicator, Role, AG_INDICATORS};
use crate::transport::GAIN_MAX;

/// Handler callback. Replies are queued on the connection.
pub type Callback = fn(&mut Connection, &AtMessage) -> Result<()>;

/// Callback bound to a message kind and command.
#[derive(Debug)]
pub struct Handler {
    pub kind: AtType,
    pub command: &'static str,
    pub callback: Callback,
}

impl Handler {
    pub fn matches(&self, message: &AtMessage) -> bool {
        self.kind == message.kind && self.command == message.command
    }
}

/// Outcome of [`dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Consumed by the handler the state machine was waiting for.
    Expected,
    /// Handled by the static table.
    Handled,
    /// No handler knows this message.
    Unhandled,
}

/// Route a message to its handler.
///
/// The expected handler takes precedence over the static table. A handler
/// error is fatal for the session.
pub fn dispatch(conn: &mut Connection, message: &AtMessage) -> Result<Dispatch> {
    if let Some(handler) = conn.take_expected(message) {
        (handler.callback)(conn, message)?;
        return Ok(Dispatch::Expected);
    }

    match lookup(message) {
        Some(handler) => {
            (handler.callback)(conn, message)?;
            Ok(Dispatch::Handled)
        }
        None => Ok(Dispatch::Unhandled),
    }
}

/// Find the static handler for a message.
pub fn lookup(message: &AtMessage) -> Option<&'static Handler> {
    HANDLERS.iter().copied().find(|h| h.matches(message))
}

pub static RESP_OK: Handler = Handler {
    kind: AtType::Response,
    command: "",
    callback: resp_ok,
};

pub static RESP_BCS_OK: Handler = Handler {
    kind: AtType::Response,
    command: "",
    callback: resp_bcs_ok,
};

pub static CIND_RESP_TEST: Handler = Handler {
    kind: AtType::Response,
    command: "+CIND",
    callback: cind_resp_test,
};

pub static CIND_RESP_GET: Handler = Handler {
    kind: AtType::Response,
    command: "+CIND",
    callback: cind_resp_get,
};

pub static BRSF_RESP: Handler = Handler {
    kind: AtType::Response,
    command: "+BRSF",
    callback: brsf_resp,
};

pub static BCS_SET: Handler = Handler {
    kind: AtType::Set,
    command: "+BCS",
    callback: bcs_set,
};

static HANDLERS: [&Handler; 16] = [
    &Handler {
        kind: AtType::Test,
        command: "+CIND",
        callback: cind_test,
    },
    &Handler {
        kind: AtType::Get,
        command: "+CIND",
        callback: cind_get,
    },
    &Handler {
        kind: AtType::Set,
        command: "+CMER",
        callback: cmer_set,
    },
    &Handler {
        kind: AtType::Response,
        command: "+CIEV",
        callback: ciev_resp,
    },
    &Handler {
        kind: AtType::Set,
        command: "+BIA",
        callback: ack,
    },
    &Handler {
        kind: AtType::Set,
        command: "+BRSF",
        callback: brsf_set,
    },
    &Handler {
        kind: AtType::Set,
        command: "+VGM",
        callback: vgm_set,
    },
    &Handler {
        kind: AtType::Set,
        command: "+VGS",
        callback: vgs_set,
    },
    &Handler {
        kind: AtType::Response,
        command: "+VGM",
        callback: vgm_resp,
    },
    &Handler {
        kind: AtType::Response,
        command: "+VGS",
        callback: vgs_resp,
    },
    &Handler {
        kind: AtType::Get,
        command: "+BTRH",
        callback: ack,
    },
    &BCS_SET,
    &Handler {
        kind: AtType::Response,
        command: "+BCS",
        callback: bcs_resp,
    },
    &Handler {
        kind: AtType::Set,
        command: "+BAC",
        callback: bac_set,
    },
    &Handler {
        kind: AtType::Set,
        command: "+IPHONEACCEV",
        callback: iphoneaccev_set,
    },
    &Handler {
        kind: AtType::Set,
        command: "+XAPL",
        callback: xapl_set,
    },
];

/// Bare result code answering a command we sent.
fn resp_ok(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let ack = conn.ack.take();
    match message.value() {
        "OK" => {
            if let Some(target) = ack {
                conn.advance_to(target);
            }
            Ok(())
        }
        "ERROR" => Err(RfcommError::NotSupported),
        _ => Ok(()),
    }
}

/// Acknowledgement of `AT+BCS=`.
fn resp_bcs_ok(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    // Entering CONNECTED announces the codec, re-selection has to do it here.
    let reselection = conn.is_connected();
    resp_ok(conn, message)?;
    if reselection && message.value() == "OK" {
        conn.transport()
            .notify(TransportUpdate::SAMPLING | TransportUpdate::CODEC);
    }
    Ok(())
}

/// Commands we accept without acting on them (`AT+BIA=`, `AT+BTRH?`).
fn ack(conn: &mut Connection, _message: &AtMessage) -> Result<()> {
    conn.send_result("OK");
    Ok(())
}

/// TEST: indicators supported by the AG.
fn cind_test(conn: &mut Connection, _message: &AtMessage) -> Result<()> {
    conn.send(AtType::Response, "+CIND", Some(AG_INDICATORS));
    conn.send_result("OK");
    conn.advance_to(HfpState::IndicatorCapsTestOk);
    Ok(())
}

/// GET: current indicator values.
fn cind_get(conn: &mut Connection, _message: &AtMessage) -> Result<()> {
    let values = conn
        .transport()
        .indicators()
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",");
    conn.send(AtType::Response, "+CIND", Some(&values));
    conn.send_result("OK");
    conn.advance_to(HfpState::IndicatorCapsGetOk);
    Ok(())
}

fn cind_resp_test(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    match parse_cind(message.value()) {
        Ok(map) => conn.indicator_map = map,
        Err(_) => warn!("Couldn't parse AG indicators: {}", message.value()),
    }
    conn.advance_to(HfpState::IndicatorCapsTest);
    Ok(())
}

fn cind_resp_get(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let transport = conn.transport().clone();
    for (indicator, value) in conn.indicator_map.iter().zip(message.value().split(',')) {
        let Some(indicator) = *indicator else {
            continue;
        };
        let value = parse_number(value);
        update_indicator(conn, indicator, value);
    }
    conn.advance_to(HfpState::IndicatorCapsGet);
    debug!("AG indicators: {:?}", transport.indicators());
    Ok(())
}

/// SET: event reporting activation.
fn cmer_set(conn: &mut Connection, _message: &AtMessage) -> Result<()> {
    conn.send_result("OK");
    conn.advance_to(HfpState::EventReportingSetOk);
    Ok(())
}

/// RESP: unsolicited indicator event.
fn ciev_resp(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let Some((index, value)) = message.value().split_once(',') else {
        warn!("Invalid CIEV value: {}", message.value());
        return Ok(());
    };
    let (Ok(index), Ok(value)) = (index.trim().parse::<usize>(), value.trim().parse::<u32>()) else {
        warn!("Invalid CIEV value: {}", message.value());
        return Ok(());
    };

    // Wire indices are 1-based.
    match index
        .checked_sub(1)
        .and_then(|i| conn.indicator_map.get(i).copied().flatten())
    {
        Some(indicator) => {
            update_indicator(conn, indicator, value);
            if matches!(indicator, Indicator::Call | Indicator::CallSetup) {
                conn.transport().ping_sco();
            }
        }
        None => debug!("Ignoring event of unknown indicator: {}", index),
    }
    Ok(())
}

fn update_indicator(conn: &Connection, indicator: Indicator, value: u32) {
    let transport = conn.transport();
    transport.set_indicator(indicator, u8::try_from(value).unwrap_or(u8::MAX));
    if indicator == Indicator::BattChg {
        transport.device().set_battery_level(battchg_to_level(value));
        transport.notify(TransportUpdate::BATTERY);
    }
}

/// SET: supported features of the HF.
fn brsf_set(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    conn.transport().set_hfp_features(parse_number(message.value()));
    if !conn.codec_negotiation() {
        // No AT+BAC will follow, so no wideband speech.
        conn.transport().set_codec(Codec::Cvsd);
    }

    let features = conn.config().hfp.features_ag.to_string();
    conn.send(AtType::Response, "+BRSF", Some(&features));
    conn.send_result("OK");
    conn.advance_to(HfpState::FeaturesSetOk);
    Ok(())
}

/// RESP: supported features of the AG.
fn brsf_resp(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    conn.transport().set_hfp_features(parse_number(message.value()));
    if !conn.codec_negotiation() {
        conn.transport().set_codec(Codec::Cvsd);
    }
    conn.advance_to(HfpState::FeaturesSet);
    Ok(())
}

fn parse_gain(value: &str) -> Option<u8> {
    value.trim().parse::<u8>().ok().filter(|&gain| gain <= GAIN_MAX)
}

fn vgm_set(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let Some(gain) = parse_gain(message.value()) else {
        warn!("Invalid microphone gain: {}", message.value());
        conn.send_result("ERROR");
        return Ok(());
    };
    conn.mic_gain = gain;
    conn.transport().set_mic_gain(gain);
    conn.send_result("OK");
    conn.transport().notify(TransportUpdate::VOLUME);
    Ok(())
}

fn vgs_set(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let Some(gain) = parse_gain(message.value()) else {
        warn!("Invalid speaker gain: {}", message.value());
        conn.send_result("ERROR");
        return Ok(());
    };
    conn.spk_gain = gain;
    conn.transport().set_spk_gain(gain);
    conn.send_result("OK");
    conn.transport().notify(TransportUpdate::VOLUME);
    Ok(())
}

/// RESP: gain changed on the AG.
fn vgm_resp(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    match parse_gain(message.value()) {
        Some(gain) => {
            conn.mic_gain = gain;
            conn.transport().set_mic_gain(gain);
            conn.transport().notify(TransportUpdate::VOLUME);
        }
        None => warn!("Invalid microphone gain: {}", message.value()),
    }
    Ok(())
}

fn vgs_resp(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    match parse_gain(message.value()) {
        Some(gain) => {
            conn.spk_gain = gain;
            conn.transport().set_spk_gain(gain);
            conn.transport().notify(TransportUpdate::VOLUME);
        }
        None => warn!("Invalid speaker gain: {}", message.value()),
    }
    Ok(())
}

/// SET: codec confirmation from the HF.
fn bcs_set(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let selected = conn.transport().codec();
    let confirmed = parse_codec(message.value());

    if selected.is_none() || selected != confirmed {
        warn!(
            "Codec not acknowledged: {:?} != {}",
            selected,
            message.value()
        );
        // The next offer falls back to the mandatory codec.
        if selected == Some(Codec::Msbc) {
            conn.msbc = false;
        }
        conn.send_result("ERROR");
        return Ok(());
    }

    conn.send_result("OK");
    conn.advance_to(HfpState::CodecSelectOk);
    Ok(())
}

/// RESP: codec selected by the AG.
fn bcs_resp(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let Some(codec) = parse_codec(message.value()) else {
        warn!("Unsupported codec selected: {}", message.value());
        let codecs = if conn.config().hfp.msbc { "1,2" } else { "1" };
        conn.send(AtType::Set, "+BAC", Some(codecs));
        conn.expect(&RESP_OK, None);
        return Ok(());
    };

    conn.transport().set_codec(codec);
    if conn.state() < HfpState::Connected {
        // Confirmed by the next SLC step.
        conn.advance_to(HfpState::CodecSelect);
    } else {
        conn.confirm_codec(codec);
    }
    Ok(())
}

/// SET: codecs available on the HF.
fn bac_set(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    conn.msbc = message
        .value()
        .split(',')
        .any(|id| parse_number(id) == u32::from(Codec::Msbc.id()));
    conn.send_result("OK");
    conn.advance_to(HfpState::CodecListSetOk);
    Ok(())
}

/// SET: Apple accessory state change (`count,key,value,...`).
fn iphoneaccev_set(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let transport = conn.transport().clone();
    let mut fields = message.value().split(',');
    let count = fields.next().map(parse_number).unwrap_or(0);

    for _ in 0..count {
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            break;
        };
        match key.trim() {
            "1" => {
                // Reported as 0..=9.
                let level = parse_number(value).min(9) * 100 / 9;
                transport.device().set_battery_level(level as u8);
                transport.notify(TransportUpdate::BATTERY);
            }
            "2" => {
                let docked = u8::try_from(parse_number(value)).unwrap_or(u8::MAX);
                transport.device().update_accessory(|info| info.docked = docked);
            }
            other => warn!("Unsupported IPHONEACCEV key: {}", other),
        }
    }

    conn.send_result("OK");
    Ok(())
}

/// SET: Apple accessory identification (`vendor-product-version,features`).
fn xapl_set(conn: &mut Connection, message: &AtMessage) -> Result<()> {
    let Some((vendor_id, product_id, version, features)) = parse_xapl(message.value()) else {
        warn!("Invalid XAPL value: {}", message.value());
        conn.send_result("ERROR");
        return Ok(());
    };

    conn.transport().device().update_accessory(|info| {
        info.vendor_id = vendor_id;
        info.product_id = product_id;
        info.version = version;
        info.features = features;
    });

    let reply = format!("+XAPL={},0", conn.config().hfp.xapl_product_name);
    conn.send_result(&reply);
    Ok(())
}

fn parse_xapl(value: &str) -> Option<(u16, u16, u16, u8)> {
    let (ids, features) = value.split_once(',')?;
    let mut ids = ids.splitn(3, '-');
    let vendor_id = u16::from_str_radix(ids.next()?.trim(), 16).ok()?;
    let product_id = u16::from_str_radix(ids.next()?.trim(), 16).ok()?;
    let version = ids.next()?.trim().parse().ok()?;
    let features = features.trim().parse().ok()?;
    Some((vendor_id, product_id, version, features))
}

fn parse_codec(value: &str) -> Option<Codec> {
    u8::try_from(parse_number(value)).ok().and_then(Codec::from_id)
}

/// Leading decimal number of a field, 0 if there is none.
fn parse_number(value: &str) -> u32 {
    let value = value.trim();
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().unwrap_or(0)
}

/// Report gains changed by a client to the peer.
pub fn report_gains(conn: &mut Connection) {
    let transport = conn.transport().clone();
    let role = transport.role();

    let mic_gain = transport.mic_gain();
    if conn.mic_gain != mic_gain {
        conn.mic_gain = mic_gain;
        debug!("Setting microphone gain: {}", mic_gain);
        send_gain(conn, role, "+VGM", mic_gain);
    }

    let spk_gain = transport.spk_gain();
    if conn.spk_gain != spk_gain {
        conn.spk_gain = spk_gain;
        debug!("Setting speaker gain: {}", spk_gain);
        send_gain(conn, role, "+VGS", spk_gain);
    }
}

fn send_gain(conn: &mut Connection, role: Role, command: &str, gain: u8) {
    let gain = gain.to_string();
    match role {
        Role::AudioGateway => conn.send(AtType::Response, command, Some(&gain)),
        Role::HandsFree => conn.send(AtType::Set, command, Some(&gain)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::{ChannelNotifier, TransportEvent};
    use crate::hfp::{AgFeatures, HfFeatures};
    use crate::transport::{Device, Transport, TransportSignal};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn connection(role: Role) -> (Connection, mpsc::UnboundedReceiver<TransportEvent>) {
        let (notifier, event_rx) = ChannelNotifier::new();
        let transport = Transport::new(
            "/hci0/dev/hfp",
            role,
            Device::new("00:11:22:33:44:55"),
            Arc::new(notifier),
        );
        (Connection::new(transport, Arc::new(Config::default())), event_rx)
    }

    fn msg(kind: AtType, command: &str, value: Option<&str>) -> AtMessage {
        AtMessage::new(kind, command, value)
    }

    fn ok() -> AtMessage {
        msg(AtType::Response, "", Some("OK"))
    }

    fn take_text(conn: &mut Connection) -> String {
        String::from_utf8(conn.take_outgoing()).unwrap()
    }

    fn updates(event_rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            if let TransportEvent::Updated { update, .. } = event {
                updates.push(update);
            }
        }
        updates
    }

    #[test]
    fn test_lookup() {
        assert!(lookup(&msg(AtType::Test, "+CIND", None)).is_some());
        assert!(lookup(&msg(AtType::Set, "+BCS", Some("1"))).is_some());
        assert!(lookup(&msg(AtType::Set, "+CIND", Some("1"))).is_none());
        assert!(lookup(&msg(AtType::Set, "+CHLD", Some("1"))).is_none());
        // Bare result codes are only handled when expected.
        assert!(lookup(&ok()).is_none());
    }

    #[test]
    fn test_expected_handler_wins() {
        let (mut conn, _) = connection(Role::HandsFree);
        conn.expect(&CIND_RESP_TEST, None);

        let message = msg(AtType::Response, "+CIND", Some("(\"call\",(0,1))"));
        assert_eq!(dispatch(&mut conn, &message).unwrap(), Dispatch::Expected);
        assert_eq!(conn.state(), HfpState::IndicatorCapsTest);
        assert_eq!(conn.indicator_map, vec![Some(Indicator::Call)]);
        assert!(conn.expected().is_none());

        // Without the expectation the response is unknown.
        assert_eq!(dispatch(&mut conn, &message).unwrap(), Dispatch::Unhandled);
    }

    #[test]
    fn test_indicator_mapping() {
        let (mut conn, mut event_rx) = connection(Role::HandsFree);
        conn.expect(&CIND_RESP_TEST, None);
        let caps = msg(AtType::Response, "+CIND", Some("(\"call\",(0,1)),(\"battchg\",(0,5))"));
        dispatch(&mut conn, &caps).unwrap();

        conn.expect(&CIND_RESP_GET, None);
        dispatch(&mut conn, &msg(AtType::Response, "+CIND", Some("0,3"))).unwrap();

        let transport = conn.transport();
        assert_eq!(transport.indicator(Indicator::Call), 0);
        assert_eq!(transport.indicator(Indicator::BattChg), 3);
        assert_eq!(transport.device().battery_level(), Some(60));
        assert_eq!(updates(&mut event_rx), vec![TransportUpdate::BATTERY]);
    }

    #[test]
    fn test_ciev_updates_indicators() {
        let (mut conn, mut event_rx) = connection(Role::HandsFree);
        conn.indicator_map = vec![Some(Indicator::Call), None, Some(Indicator::BattChg)];
        let mut sco_rx = conn.transport().subscribe_sco();

        dispatch(&mut conn, &msg(AtType::Response, "+CIEV", Some("1,1"))).unwrap();
        assert_eq!(conn.transport().indicator(Indicator::Call), 1);
        assert_eq!(sco_rx.try_recv().unwrap(), TransportSignal::Ping);

        dispatch(&mut conn, &msg(AtType::Response, "+CIEV", Some("3,5"))).unwrap();
        assert_eq!(conn.transport().device().battery_level(), Some(100));
        assert_eq!(updates(&mut event_rx), vec![TransportUpdate::BATTERY]);

        // Out of range and unmapped indices are ignored.
        dispatch(&mut conn, &msg(AtType::Response, "+CIEV", Some("0,1"))).unwrap();
        dispatch(&mut conn, &msg(AtType::Response, "+CIEV", Some("2,1"))).unwrap();
        dispatch(&mut conn, &msg(AtType::Response, "+CIEV", Some("9,1"))).unwrap();
        assert!(sco_rx.try_recv().is_err());
    }

    #[test]
    fn test_double_cmer_ok() {
        let (mut conn, mut event_rx) = connection(Role::HandsFree);
        conn.advance_to(HfpState::IndicatorCapsGetOk);
        conn.slc_step().unwrap();
        assert_eq!(take_text(&mut conn), "AT+CMER=3,0,0,1,0\r");

        dispatch(&mut conn, &ok()).unwrap();
        assert_eq!(conn.state(), HfpState::EventReportingSetOk);
        conn.slc_step().unwrap();
        assert!(conn.is_connected());

        // Replayed acknowledgement.
        assert_eq!(dispatch(&mut conn, &ok()).unwrap(), Dispatch::Unhandled);
        conn.expect_ok(HfpState::EventReportingSetOk);
        dispatch(&mut conn, &ok()).unwrap();
        assert_eq!(conn.state(), HfpState::Connected);

        assert_eq!(
            updates(&mut event_rx),
            vec![TransportUpdate::SAMPLING | TransportUpdate::CODEC]
        );
    }

    #[test]
    fn test_error_reply_is_fatal() {
        let (mut conn, _) = connection(Role::HandsFree);
        conn.expect_ok(HfpState::FeaturesSetOk);
        let result = dispatch(&mut conn, &msg(AtType::Response, "", Some("ERROR")));
        assert!(matches!(result, Err(RfcommError::NotSupported)));
    }

    #[test]
    fn test_brsf_set_replies_features() {
        let (mut conn, _) = connection(Role::AudioGateway);
        let features = HfFeatures::CODEC | HfFeatures::VOLUME;
        let value = features.bits().to_string();

        dispatch(&mut conn, &msg(AtType::Set, "+BRSF", Some(&value))).unwrap();
        assert_eq!(conn.transport().hfp_features(), features.bits());
        assert_eq!(conn.transport().codec(), None);
        assert_eq!(conn.state(), HfpState::FeaturesSetOk);
        assert_eq!(
            take_text(&mut conn),
            format!("\r\n+BRSF: {}\r\n\r\nOK\r\n", conn.config().hfp.features_ag)
        );

        // HF without codec negotiation gets CVSD.
        let (mut conn, _) = connection(Role::AudioGateway);
        dispatch(&mut conn, &msg(AtType::Set, "+BRSF", Some("16"))).unwrap();
        assert_eq!(conn.transport().codec(), Some(Codec::Cvsd));
    }

    #[test]
    fn test_ag_indicator_replies() {
        let (mut conn, _) = connection(Role::AudioGateway);
        conn.transport().set_indicator(Indicator::Service, 1);

        dispatch(&mut conn, &msg(AtType::Test, "+CIND", None)).unwrap();
        assert_eq!(
            take_text(&mut conn),
            format!("\r\n+CIND: {}\r\n\r\nOK\r\n", AG_INDICATORS)
        );
        assert_eq!(conn.state(), HfpState::IndicatorCapsTestOk);

        dispatch(&mut conn, &msg(AtType::Get, "+CIND", None)).unwrap();
        assert_eq!(take_text(&mut conn), "\r\n+CIND: 0,0,1,0,0,0,0\r\n\r\nOK\r\n");
        assert_eq!(conn.state(), HfpState::IndicatorCapsGetOk);
    }

    #[test]
    fn test_gain_set() {
        let (mut conn, mut event_rx) = connection(Role::AudioGateway);

        dispatch(&mut conn, &msg(AtType::Set, "+VGS", Some("7"))).unwrap();
        assert_eq!(take_text(&mut conn), "\r\nOK\r\n");
        assert_eq!(conn.transport().spk_gain(), 7);
        assert_eq!(conn.spk_gain, 7);
        assert_eq!(updates(&mut event_rx), vec![TransportUpdate::VOLUME]);

        dispatch(&mut conn, &msg(AtType::Set, "+VGM", Some("16"))).unwrap();
        assert_eq!(take_text(&mut conn), "\r\nERROR\r\n");
        assert_eq!(conn.transport().mic_gain(), GAIN_MAX);
        assert!(updates(&mut event_rx).is_empty());
    }

    #[test]
    fn test_gain_report_from_ag() {
        let (mut conn, mut event_rx) = connection(Role::HandsFree);
        dispatch(&mut conn, &msg(AtType::Response, "+VGM", Some("4"))).unwrap();
        assert!(conn.take_outgoing().is_empty());
        assert_eq!(conn.transport().mic_gain(), 4);
        assert_eq!(updates(&mut event_rx), vec![TransportUpdate::VOLUME]);
    }

    #[test]
    fn test_bcs_mismatch_is_rejected() {
        let (mut conn, _) = connection(Role::AudioGateway);
        conn.transport().set_codec(Codec::Msbc);
        conn.msbc = true;
        conn.advance_to(HfpState::SlcConnected);

        dispatch(&mut conn, &msg(AtType::Set, "+BCS", Some("1"))).unwrap();
        assert_eq!(take_text(&mut conn), "\r\nERROR\r\n");
        assert_eq!(conn.state(), HfpState::SlcConnected);
        assert!(!conn.msbc);

        conn.transport().set_codec(Codec::Cvsd);
        dispatch(&mut conn, &msg(AtType::Set, "+BCS", Some("1"))).unwrap();
        assert_eq!(take_text(&mut conn), "\r\nOK\r\n");
        assert_eq!(conn.state(), HfpState::CodecSelectOk);
    }

    #[test]
    fn test_bcs_selection_hf() {
        let (mut conn, mut event_rx) = connection(Role::HandsFree);
        conn.transport().set_hfp_features(AgFeatures::CODEC.bits());
        conn.advance_to(HfpState::SlcConnected);

        dispatch(&mut conn, &msg(AtType::Response, "+BCS", Some("2"))).unwrap();
        assert_eq!(conn.transport().codec(), Some(Codec::Msbc));
        assert_eq!(conn.state(), HfpState::CodecSelect);

        conn.slc_step().unwrap();
        assert_eq!(take_text(&mut conn), "AT+BCS=2\r");
        dispatch(&mut conn, &ok()).unwrap();
        assert_eq!(conn.state(), HfpState::CodecSelectOk);
        conn.slc_step().unwrap();
        assert!(conn.is_connected());
        assert_eq!(updates(&mut event_rx).len(), 1);

        // Re-selection on a connected session.
        dispatch(&mut conn, &msg(AtType::Response, "+BCS", Some("1"))).unwrap();
        assert_eq!(take_text(&mut conn), "AT+BCS=1\r");
        dispatch(&mut conn, &ok()).unwrap();
        assert_eq!(conn.transport().codec(), Some(Codec::Cvsd));
        assert_eq!(
            updates(&mut event_rx),
            vec![TransportUpdate::SAMPLING | TransportUpdate::CODEC]
        );
    }

    #[test]
    fn test_bcs_unknown_codec_hf() {
        let (mut conn, mut event_rx) = connection(Role::HandsFree);
        conn.transport().set_hfp_features(AgFeatures::CODEC.bits());
        conn.advance_to(HfpState::SlcConnected);

        dispatch(&mut conn, &msg(AtType::Response, "+BCS", Some("7"))).unwrap();
        assert_eq!(take_text(&mut conn), "AT+BAC=1,2\r");
        assert_eq!(conn.transport().codec(), None);
        assert!(conn.expected().is_some());

        // The AG's acknowledgement is consumed without moving the SLC.
        assert_eq!(dispatch(&mut conn, &ok()).unwrap(), Dispatch::Expected);
        assert!(conn.expected().is_none());
        assert_eq!(conn.state(), HfpState::SlcConnected);
        assert!(updates(&mut event_rx).is_empty());
    }

    #[test]
    fn test_bac_set() {
        let (mut conn, _) = connection(Role::AudioGateway);
        conn.advance_to(HfpState::FeaturesSetOk);
        dispatch(&mut conn, &msg(AtType::Set, "+BAC", Some("1,2"))).unwrap();
        assert!(conn.msbc);
        assert_eq!(conn.state(), HfpState::CodecListSetOk);
        assert_eq!(take_text(&mut conn), "\r\nOK\r\n");
    }

    #[test]
    fn test_iphoneaccev() {
        let (mut conn, mut event_rx) = connection(Role::AudioGateway);
        dispatch(&mut conn, &msg(AtType::Set, "+IPHONEACCEV", Some("2,1,6,2,1"))).unwrap();

        let device = conn.transport().device();
        assert_eq!(device.battery_level(), Some(66));
        assert_eq!(device.accessory().docked, 1);
        assert_eq!(updates(&mut event_rx), vec![TransportUpdate::BATTERY]);
        assert_eq!(take_text(&mut conn), "\r\nOK\r\n");
    }

    #[test]
    fn test_iphoneaccev_battery_out_of_range() {
        let (mut conn, mut event_rx) = connection(Role::AudioGateway);
        dispatch(&mut conn, &msg(AtType::Set, "+IPHONEACCEV", Some("1,1,50000000"))).unwrap();
        assert_eq!(conn.transport().device().battery_level(), Some(100));
        assert_eq!(updates(&mut event_rx), vec![TransportUpdate::BATTERY]);
        assert_eq!(take_text(&mut conn), "\r\nOK\r\n");

        dispatch(&mut conn, &msg(AtType::Set, "+IPHONEACCEV", Some("1,1,4294967295"))).unwrap();
        assert_eq!(conn.transport().device().battery_level(), Some(100));
    }

    #[test]
    fn test_xapl() {
        let (mut conn, _) = connection(Role::AudioGateway);
        dispatch(&mut conn, &msg(AtType::Set, "+XAPL", Some("ABCD-1234-0100,10"))).unwrap();

        let info = conn.transport().device().accessory();
        assert_eq!(info.vendor_id, 0xABCD);
        assert_eq!(info.product_id, 0x1234);
        assert_eq!(info.version, 100);
        assert_eq!(info.features, 10);
        assert_eq!(take_text(&mut conn), "\r\n+XAPL=hfp-rfcomm,0\r\n");

        dispatch(&mut conn, &msg(AtType::Set, "+XAPL", Some("garbage"))).unwrap();
        assert_eq!(take_text(&mut conn), "\r\nERROR\r\n");
    }

    #[test]
    fn test_report_gains() {
        let (mut conn, _) = connection(Role::AudioGateway);
        conn.transport().set_spk_gain(3);
        report_gains(&mut conn);
        assert_eq!(take_text(&mut conn), "\r\n+VGS: 3\r\n");

        // Nothing changed since.
        report_gains(&mut conn);
        assert!(conn.take_outgoing().is_empty());

        let (mut conn, _) = connection(Role::HandsFree);
        conn.transport().set_mic_gain(9);
        report_gains(&mut conn);
        assert_eq!(take_text(&mut conn), "AT+VGM=9\r");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("756"), 756);
        assert_eq!(parse_number(" 12abc"), 12);
        assert_eq!(parse_number("x"), 0);
    }
}
