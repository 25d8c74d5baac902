//! One physical connection and the sessions multiplexed over it.
//!
//! [`Connection`] sends framed [`Command`]s, answers keepalive probes and
//! turns inbound packets into [`ServerMessage`]s. It does not interpret the
//! messages; the quote and chart readers do that through [`Connection::drain`].

use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{ReadState, SessionAuth, Transport};
use crate::Result;
use crate::codec::{self, Frame};
use crate::error::TvError;
use crate::models::{Command, ServerMessage};
use crate::session::SessionRegistry;

/// A framed, session-multiplexed connection.
///
/// Sending takes `&mut self`, so a connection has exactly one writer at a
/// time. Share it between tasks only behind a lock.
pub struct Connection<T> {
    transport: T,
    inbox: VecDeque<ServerMessage>,
    sessions: SessionRegistry,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            inbox: VecDeque::new(),
            sessions: SessionRegistry::new(),
        }
    }

    /// Sessions currently open on this connection.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionRegistry {
        &mut self.sessions
    }

    /// Encodes and writes one command.
    ///
    /// # Errors
    ///
    /// Returns a [`TvError`] if encoding or writing fails.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let frame = command.to_frame()?;
        debug!(command = command.name(), "Sending command");
        trace!(%frame, "Outbound frame");
        self.transport.send_text(frame).await
    }

    /// Sends the token and, when configured, the data quality. Every
    /// command sequence that creates a session starts with this.
    ///
    /// # Errors
    ///
    /// Returns a [`TvError`] if writing fails.
    pub async fn authenticate(&mut self, auth: &SessionAuth) -> Result<()> {
        self.send(&Command::SetAuthToken {
            token: auth.token.clone(),
        })
        .await?;

        if let Some(quality) = &auth.data_quality {
            self.send(&Command::SetDataQuality {
                quality: quality.clone(),
            })
            .await?;
        }
        Ok(())
    }

    /// Returns the next inbound message, reading from the socket as needed.
    ///
    /// Keepalive probes are echoed back and never returned.
    ///
    /// # Errors
    ///
    /// - [`TvError::Protocol`] if the remote sent an error message
    /// - [`TvError::ConnectionClosed`] if the remote closed the socket
    /// - [`TvError::WebSocket`] on transport failure
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        loop {
            if let Some(message) = self.inbox.pop_front() {
                return Ok(message);
            }

            let Some(packet) = self.transport.recv_text().await? else {
                return Err(TvError::ConnectionClosed);
            };

            for frame in codec::decode(&packet)? {
                match frame {
                    Frame::Heartbeat(probe) => {
                        trace!(%probe, "Echoing keepalive probe");
                        self.transport.send_text(codec::frame(&probe)).await?;
                    }
                    Frame::Message(message) => self.inbox.push_back(message),
                }
            }
        }
    }

    /// Feeds inbound messages to `on_message` until it returns a terminal
    /// state, the connection fails, or `deadline` passes.
    ///
    /// Never returns [`ReadState::AwaitingData`]. Without a deadline the
    /// loop only ends through `on_message` or a failure.
    pub async fn drain<F>(&mut self, deadline: Option<Instant>, mut on_message: F) -> ReadState
    where
        F: FnMut(&mut SessionRegistry, ServerMessage) -> ReadState,
    {
        let mut state = ReadState::AwaitingData;

        while !state.is_terminal() {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        state = ReadState::TimedOut;
                        continue;
                    }
                },
                None => self.recv().await,
            };

            state = match next {
                Ok(message) => on_message(&mut self.sessions, message),
                Err(e) => ReadState::Failed(e),
            };
        }

        state
    }

    /// Closes the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns a [`TvError`] if the close handshake fails.
    pub async fn close(mut self) -> Result<()> {
        if !self.sessions.is_empty() {
            warn!(
                sessions = self.sessions.len(),
                "Closing connection with open sessions"
            );
        }
        self.transport.close().await
    }
}
