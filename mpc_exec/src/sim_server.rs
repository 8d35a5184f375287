//! # Simulator Server Module
//!
//! This module abstracts over the networking side of the controller. The server accepts
//! connections from the simulator bridge, receiving one event frame at a time and replying to
//! each one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over one simulator connection.
///
/// The underlying socket is a REP socket, so every frame returned by [`SimServer::recv_frame`]
/// must be answered by exactly one call to [`SimServer::send_frame`] before the next frame can be
/// received.
pub struct SimServer {

    /// REP socket which receives frames from the simulator
    socket: MonitoredSocket,

    /// Endpoint the socket is bound to
    endpoint: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`SimServer`]
#[derive(thiserror::Error, Debug)]
pub enum SimServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not receive a frame from the simulator: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send a frame to the simulator: {0}")]
    SendError(zmq::Error),

    #[error("No socket is bound to the endpoint")]
    NotBound,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimServer {

    /// Create a new server bound to `endpoint`.
    ///
    /// The socket is always bound and never waits for a connection, whatever `socket_options`
    /// says.
    pub fn new(
        ctx: &zmq::Context,
        endpoint: &str,
        socket_options: &SocketOptions
    ) -> Result<Self, SimServerError> {

        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            ..socket_options.clone()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REP, &socket_options, endpoint)?;

        Ok(Self {
            socket,
            endpoint: endpoint.into()
        })
    }

    /// The endpoint this server is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns true if the simulator is connected.
    pub fn connected(&self) -> bool {
        self.socket.connected()
    }

    /// Receive a frame from the simulator.
    ///
    /// `Ok(None)` is returned if nothing arrived before the receive timeout. Frames which aren't
    /// valid UTF-8 are converted lossily, they will then fail to decode as an event.
    pub fn recv_frame(&mut self) -> Result<Option<String>, SimServerError> {
        match self.socket.recv_msg(0) {
            Ok(msg) => Ok(Some(String::from_utf8_lossy(&msg).into_owned())),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(SimServerError::RecvError(e))
        }
    }

    /// Send the reply to the last received frame.
    pub fn send_frame(&mut self, frame: &str) -> Result<(), SimServerError> {
        self.socket.send(frame, 0).map_err(SimServerError::SendError)
    }
}

impl From<MonitoredSocketError> for SimServerError {
    fn from(e: MonitoredSocketError) -> Self {
        SimServerError::SocketError(e)
    }
}
