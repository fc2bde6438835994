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

//! Hands-Free Profile definitions.
//!
//! Feature bits, codec identifiers, AG indicators and the ordered states of
//! the service level connection procedure.

use bitflags::bitflags;
use std::fmt;

/// Local role of the RFCOMM session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Hands-Free unit (headset side), initiates the SLC procedure.
    HandsFree,
    /// Audio Gateway (phone side), answers the SLC procedure.
    AudioGateway,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::HandsFree => "HFP-HF",
            Role::AudioGateway => "HFP-AG",
        }
    }
}

bitflags! {
    /// Supported features of the Hands-Free unit (`AT+BRSF=`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HfFeatures: u32 {
        const ECNR = 1 << 0;
        const THREE_WAY = 1 << 1;
        const CLI = 1 << 2;
        const VOICE_RECOGNITION = 1 << 3;
        const VOLUME = 1 << 4;
        const ECS = 1 << 5;
        const ECC = 1 << 6;
        const CODEC = 1 << 7;
        const HF_INDICATORS = 1 << 8;
        const ESCO_S4 = 1 << 9;
    }
}

bitflags! {
    /// Supported features of the Audio Gateway (`+BRSF:`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AgFeatures: u32 {
        const THREE_WAY = 1 << 0;
        const ECNR = 1 << 1;
        const VOICE_RECOGNITION = 1 << 2;
        const INBAND_RING = 1 << 3;
        const VOICE_TAG = 1 << 4;
        const REJECT = 1 << 5;
        const ECS = 1 << 6;
        const ECC = 1 << 7;
        const EERC = 1 << 8;
        const CODEC = 1 << 9;
        const HF_INDICATORS = 1 << 10;
        const ESCO_S4 = 1 << 11;
    }
}

/// Audio codec identifiers used by codec negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Mandatory narrowband codec.
    Cvsd,
    /// Wideband speech codec.
    Msbc,
}

impl Codec {
    /// Codec ID as used on the wire.
    pub fn id(&self) -> u8 {
        match self {
            Codec::Cvsd => 1,
            Codec::Msbc => 2,
        }
    }

    /// Look up a codec by its wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Codec::Cvsd),
            2 => Some(Codec::Msbc),
            _ => None,
        }
    }

    /// Audio sampling rate implied by the codec.
    pub fn sampling_rate(&self) -> u32 {
        match self {
            Codec::Cvsd => 8000,
            Codec::Msbc => 16000,
        }
    }
}

/// Indicators reported by the AG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    Call,
    CallSetup,
    Service,
    Signal,
    Roam,
    BattChg,
    CallHeld,
}

/// Number of known indicators.
pub const INDICATOR_COUNT: usize = 7;

/// Maximum number of indicators accepted from a `+CIND` test response.
pub const INDICATOR_MAP_MAX: usize = 20;

/// Maximum value of the `battchg` indicator.
pub const BATTCHG_MAX: u32 = 5;

/// Indicator list advertised by the AG in reply to `AT+CIND=?`.
pub const AG_INDICATORS: &str = "(\"call\",(0,1))\
,(\"callsetup\",(0-3))\
,(\"service\",(0-1))\
,(\"signal\",(0-5))\
,(\"roam\",(0-1))\
,(\"battchg\",(0-5))\
,(\"callheld\",(0-2))";

impl Indicator {
    /// All indicators in the order the AG advertises them.
    pub const ALL: [Indicator; INDICATOR_COUNT] = [
        Indicator::Call,
        Indicator::CallSetup,
        Indicator::Service,
        Indicator::Signal,
        Indicator::Roam,
        Indicator::BattChg,
        Indicator::CallHeld,
    ];

    /// Parse an indicator name as found in a `+CIND` test response.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "call" => Some(Self::Call),
            "callsetup" | "call_setup" => Some(Self::CallSetup),
            "service" => Some(Self::Service),
            "signal" => Some(Self::Signal),
            "roam" => Some(Self::Roam),
            "battchg" => Some(Self::BattChg),
            "callheld" => Some(Self::CallHeld),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::CallSetup => "callsetup",
            Self::Service => "service",
            Self::Signal => "signal",
            Self::Roam => "roam",
            Self::BattChg => "battchg",
            Self::CallHeld => "callheld",
        }
    }

    /// Position of the indicator in [`Indicator::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Convert a `battchg` indicator value into a battery percentage.
pub fn battchg_to_level(value: u32) -> u8 {
    (value.min(BATTCHG_MAX) * 100 / BATTCHG_MAX) as u8
}

/// Service level connection state.
///
/// States are strictly ordered; the derived ordering is used to advance only
/// when a step has not been completed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HfpState {
    Disconnected,
    /// `+BRSF` received (HF).
    FeaturesSet,
    /// `AT+BRSF` acknowledged.
    FeaturesSetOk,
    /// `AT+BAC` acknowledged.
    CodecListSetOk,
    /// `+CIND` test response received (HF).
    IndicatorCapsTest,
    IndicatorCapsTestOk,
    /// `+CIND` read response received (HF).
    IndicatorCapsGet,
    IndicatorCapsGetOk,
    /// `AT+CMER` acknowledged.
    EventReportingSetOk,
    SlcConnected,
    /// Codec selected by the AG (`+BCS`).
    CodecSelect,
    /// Codec selection confirmed.
    CodecSelectOk,
    CodecConnected,
    Connected,
}

impl HfpState {
    /// The state directly following this one.
    pub fn next(&self) -> Self {
        match self {
            Self::Disconnected => Self::FeaturesSet,
            Self::FeaturesSet => Self::FeaturesSetOk,
            Self::FeaturesSetOk => Self::CodecListSetOk,
            Self::CodecListSetOk => Self::IndicatorCapsTest,
            Self::IndicatorCapsTest => Self::IndicatorCapsTestOk,
            Self::IndicatorCapsTestOk => Self::IndicatorCapsGet,
            Self::IndicatorCapsGet => Self::IndicatorCapsGetOk,
            Self::IndicatorCapsGetOk => Self::EventReportingSetOk,
            Self::EventReportingSetOk => Self::SlcConnected,
            Self::SlcConnected => Self::CodecSelect,
            Self::CodecSelect => Self::CodecSelectOk,
            Self::CodecSelectOk => Self::CodecConnected,
            Self::CodecConnected | Self::Connected => Self::Connected,
        }
    }
}

impl fmt::Display for HfpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
