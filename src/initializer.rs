//! Connection handshake seam.
//!
//! After the stream is dialed the connection runs an initializer: an
//! external collaborator that drives the protocol handshake using the
//! connection's own send/receive operations (permitted in the
//! initializing state) and reports what the server said. The core adopts
//! the server-assigned connection number from the returned description;
//! everything else in it is carried opaquely for upper layers.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::Result;

/// What the handshake learned about the connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionDescription {
    /// Connection number assigned by the server, if the handshake
    /// yielded one.
    pub server_connection_id: Option<i64>,
    /// Free-form protocol parameters reported by the server.
    pub parameters: HashMap<String, String>,
}

/// Performs the handshake on a freshly dialed connection.
#[async_trait]
pub trait ConnectionInitializer: Send + Sync {
    /// Run the handshake. Failures propagate and fail the open.
    async fn initialize(
        &self,
        connection: &Connection,
        cancel: &CancellationToken,
    ) -> Result<ConnectionDescription>;
}

/// Initializer that performs no handshake.
///
/// Useful for tests and for protocols whose handshake happens above the
/// connection layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityInitializer;

#[async_trait]
impl ConnectionInitializer for IdentityInitializer {
    async fn initialize(
        &self,
        _connection: &Connection,
        _cancel: &CancellationToken,
    ) -> Result<ConnectionDescription> {
        Ok(ConnectionDescription::default())
    }
}
