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

//! RFCOMM session worker.
//!
//! One task per session. Each iteration runs a step of the SLC procedure,
//! drains buffered messages and otherwise waits on the cancellation token,
//! the transport signal channel, the RFCOMM socket, the external AT handler
//! and the SLC retry timer.

use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{Result, RfcommError};
use super::handlers::{self, Dispatch};
use super::protocol::{AtMessage, AtType};
use super::reassembler::MessageReassembler;
use super::slc::Connection;
use crate::config::Config;
use crate::transport::{AtChannel, Transport, TransportSignal};

/// Maximum number of bytes relayed from the external handler at once.
const HANDLER_BUFFER_SIZE: usize = 256;

/// RFCOMM session of a single HFP transport.
pub struct RfcommSession {
    conn: Connection,
    socket: Box<dyn AtChannel>,
    signal_rx: mpsc::UnboundedReceiver<TransportSignal>,
    cancel: CancellationToken,
}

impl RfcommSession {
    /// Create a session on an already-connected RFCOMM socket.
    ///
    /// Fails if another session owns the transport's signal channel.
    pub fn new(
        transport: Arc<Transport>,
        socket: Box<dyn AtChannel>,
        config: Arc<Config>,
    ) -> Result<Self> {
        let signal_rx = transport
            .take_signal_receiver()
            .ok_or(RfcommError::SignalChannelTaken)?;

        Ok(Self {
            conn: Connection::new(transport, config),
            socket,
            signal_rx,
            cancel: CancellationToken::new(),
        })
    }

    /// Token stopping the session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session on a new task.
    pub fn spawn(self) -> SessionHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        SessionHandle { cancel, task }
    }

    /// Run the session until it is cancelled or the connection ends.
    ///
    /// Returns `Ok` when cancelled, otherwise the error that ended the
    /// session. The socket is closed either way.
    pub async fn run(self) -> Result<()> {
        let Self {
            conn,
            socket,
            signal_rx,
            cancel,
        } = self;

        info!(
            "Starting RFCOMM loop: {} ({})",
            conn.transport().id(),
            conn.transport().role().as_str()
        );

        let (rd, wr) = tokio::io::split(socket);
        let mut worker = Worker {
            conn,
            reader: MessageReassembler::new(),
            rd,
            wr,
            handler: None,
            handler_buf: [0; HANDLER_BUFFER_SIZE],
            signal_rx,
            cancel,
        };

        let result = worker.run().await;
        worker.cleanup().await;
        result
    }
}

/// Handle of a spawned session.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SessionHandle {
    /// Ask the session to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn join(self) -> Result<()> {
        self.task.await?
    }

    /// Stop the session and wait for its cleanup.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel();
        self.join().await
    }
}

enum Event {
    Signal(TransportSignal),
    Message(Result<Option<AtMessage>>),
    Handler(io::Result<usize>),
    Timeout,
}

struct Worker {
    conn: Connection,
    reader: MessageReassembler,
    rd: ReadHalf<Box<dyn AtChannel>>,
    wr: WriteHalf<Box<dyn AtChannel>>,
    handler: Option<Box<dyn AtChannel>>,
    handler_buf: [u8; HANDLER_BUFFER_SIZE],
    signal_rx: mpsc::UnboundedReceiver<TransportSignal>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(&mut self) -> Result<()> {
        loop {
            match self.iterate().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("RFCOMM session cancelled");
                    return Ok(());
                }
                Err(e) if e.is_disconnect() => {
                    debug!("RFCOMM disconnected in {}: {}", self.conn.state(), e);
                    return Err(e);
                }
                Err(e) => error!("RFCOMM IO error: {}", e),
            }
        }
    }

    /// Run one loop iteration. Returns `false` once cancelled.
    async fn iterate(&mut self) -> Result<bool> {
        let timeout = self.conn.slc_step()?;
        self.flush().await?;

        if let Some(handler) = self.conn.transport().take_at_handler() {
            debug!("External AT handler attached");
            self.handler = Some(handler);
        }

        if self.reader.has_pending() {
            let message = self.reader.parse_next();
            self.process_message(message).await?;
            return Ok(true);
        }

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(false),
            Some(signal) = self.signal_rx.recv() => Event::Signal(signal),
            message = self.reader.read_message(&mut self.rd) => Event::Message(message),
            read = read_handler(&mut self.handler, &mut self.handler_buf) => Event::Handler(read),
            _ = sleep(timeout.unwrap_or_default()), if timeout.is_some() => Event::Timeout,
        };

        match event {
            Event::Signal(signal) => self.process_signal(signal).await?,
            Event::Message(message) => self.process_message(message).await?,
            Event::Handler(read) => self.process_handler_read(read).await?,
            Event::Timeout => debug!("RFCOMM poll timeout"),
        }

        Ok(true)
    }

    async fn process_signal(&mut self, signal: TransportSignal) -> Result<()> {
        match signal {
            TransportSignal::SetVolume => {
                handlers::report_gains(&mut self.conn);
                self.flush().await
            }
            TransportSignal::Ping => Ok(()),
        }
    }

    async fn process_message(&mut self, message: Result<Option<AtMessage>>) -> Result<()> {
        let message = match message {
            Ok(Some(message)) => message,
            // Partial message, wait for the rest.
            Ok(None) => return Ok(()),
            Err(RfcommError::Malformed(text)) => {
                warn!("Invalid AT message: {:?}", text);
                return Ok(());
            }
            Err(e @ RfcommError::MessageTooLong(_)) => {
                warn!("Dropping AT message: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        debug!("Received AT message: {}", message);

        if handlers::dispatch(&mut self.conn, &message)? == Dispatch::Unhandled {
            match self.handler.as_mut() {
                Some(handler) => {
                    if let Err(e) = handler.write_all(&message.raw).await {
                        warn!("Couldn't forward AT: {}", e);
                    }
                }
                None => {
                    warn!("Unsupported AT message: {}", message);
                    if message.kind != AtType::Response {
                        self.conn.send_result("ERROR");
                    }
                }
            }
        }

        self.flush().await
    }

    async fn process_handler_read(&mut self, read: io::Result<usize>) -> Result<()> {
        match read {
            Ok(0) => {
                debug!("External AT handler closed");
                self.handler = None;
                Ok(())
            }
            Ok(n) => {
                let data = self.handler_buf[..n].to_vec();
                self.conn.send_raw(&data);
                self.flush().await
            }
            Err(e) => {
                error!("AT handler IO error: {}", e);
                self.handler = None;
                Ok(())
            }
        }
    }

    /// Write queued output to the socket.
    async fn flush(&mut self) -> Result<()> {
        let outgoing = self.conn.take_outgoing();
        if !outgoing.is_empty() {
            self.wr.write_all(&outgoing).await?;
            self.wr.flush().await?;
        }
        Ok(())
    }

    async fn cleanup(self) {
        let Worker {
            conn,
            rd,
            mut wr,
            handler,
            signal_rx,
            ..
        } = self;

        if let Err(e) = wr.shutdown().await {
            debug!("Couldn't shut down RFCOMM socket: {}", e);
        }
        drop(rd);
        drop(wr);

        if let Some(mut handler) = handler {
            if let Err(e) = handler.shutdown().await {
                debug!("Couldn't shut down AT handler: {}", e);
            }
        }

        let transport = conn.transport();
        transport.restore_signal_receiver(signal_rx);
        transport.notify_session_closed();
        info!("RFCOMM session closed: {}", transport.id());
    }
}

async fn read_handler(
    handler: &mut Option<Box<dyn AtChannel>>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match handler {
        Some(handler) => loop {
            match handler.read(buf).await {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => break result,
            }
        },
        None => std::future::pending().await,
    }
}
