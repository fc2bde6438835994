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

//! RFCOMM session engine.
//!
//! Drives the HFP service level connection over an RFCOMM socket and keeps
//! indicator, gain and codec state in sync once it is established.

mod connection;
mod error;
pub mod handlers;
pub mod protocol;
mod reassembler;
mod slc;

pub use connection::{RfcommSession, SessionHandle};
pub use error::{Result, RfcommError};
pub use handlers::{dispatch, Dispatch, Handler};
pub use protocol::{AtMessage, AtType, ParseError};
pub use reassembler::{MessageReassembler, AT_BUFFER_SIZE};
pub use slc::{Connection, Expectation};
