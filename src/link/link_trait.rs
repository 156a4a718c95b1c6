//! Trait abstraction for the MAVLink connection to enable testing

use mavlink::common::MavMessage;
use mavlink::{MavConnection, MavHeader};
use thiserror::Error;

/// Errors surfaced by the link layer
#[derive(Debug, Error)]
pub enum LinkError {
    /// The connection could not be opened
    #[error("failed to open {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be received or decoded
    #[error("receive failed: {0}")]
    Recv(String),

    /// An outbound message could not be written
    #[error("send failed: {0}")]
    Send(String),
}

/// Bidirectional message transport to the autopilot
///
/// `recv` blocks until the next inbound frame decodes; `send` is safe to call
/// concurrently with a blocked `recv`.
pub trait Link: Send + Sync {
    /// Block for the next decoded message
    fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError>;

    /// Encode and write one message
    fn send(&self, message: &MavMessage) -> Result<(), LinkError>;
}

/// Production link over a codec-managed connection (serial, UDP or TCP)
pub struct MavlinkLink {
    connection: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    header: MavHeader,
}

impl MavlinkLink {
    /// Open a connection to `address` (`serial:/dev/ttyUSB0:57600`,
    /// `udpin:0.0.0.0:14550`, ...), stamping outbound messages with our own
    /// system and component ids
    pub fn connect(address: &str, system_id: u8, component_id: u8) -> Result<Self, LinkError> {
        let connection =
            mavlink::connect::<MavMessage>(address).map_err(|source| LinkError::Connect {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            connection,
            header: MavHeader {
                system_id,
                component_id,
                sequence: 0,
            },
        })
    }
}

impl Link for MavlinkLink {
    fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError> {
        self.connection
            .recv()
            .map_err(|e| LinkError::Recv(e.to_string()))
    }

    fn send(&self, message: &MavMessage) -> Result<(), LinkError> {
        self.connection
            .send(&self.header, message)
            .map(|_| ())
            .map_err(|e| LinkError::Send(e.to_string()))
    }
}
