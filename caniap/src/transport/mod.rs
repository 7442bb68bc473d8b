//! Request/response channel to the target.
//!
//! The transfer state machine only ever calls the four operations of
//! [`Transport`]. How frames reach the bus (SLCAN adapter, socketcan, a test
//! double) is up to the implementation.

pub mod reconnect;
pub mod slcan;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use crate::error::Result;
use crate::protocol::iap::{Channel, ProtocolMessage};

pub use reconnect::{ReconnectPolicy, Reconnecting};
pub use slcan::{CanBitrate, SlcanTransport};

/// Abstract CAN request/response channel.
pub trait Transport {
    /// Open connection state.
    type Handle;

    /// Acquire the channel.
    fn connect(&mut self) -> Result<Self::Handle>;

    /// Release the channel.
    fn close(&mut self, handle: Self::Handle) -> Result<()>;

    /// Send a message without waiting for a reply.
    fn send(&mut self, handle: &mut Self::Handle, message: &ProtocolMessage) -> Result<()>;

    /// Send a message and wait for the first reply on `response_channel`.
    ///
    /// Returns the reply's data bytes. Fails with `TransportTimeout` when no
    /// reply arrives within `timeout`.
    fn request(
        &mut self,
        handle: &mut Self::Handle,
        message: &ProtocolMessage,
        timeout: Duration,
        response_channel: Channel,
    ) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Handle = T::Handle;

    fn connect(&mut self) -> Result<Self::Handle> {
        (**self).connect()
    }

    fn close(&mut self, handle: Self::Handle) -> Result<()> {
        (**self).close(handle)
    }

    fn send(&mut self, handle: &mut Self::Handle, message: &ProtocolMessage) -> Result<()> {
        (**self).send(handle, message)
    }

    fn request(
        &mut self,
        handle: &mut Self::Handle,
        message: &ProtocolMessage,
        timeout: Duration,
        response_channel: Channel,
    ) -> Result<Vec<u8>> {
        (**self).request(handle, message, timeout, response_channel)
    }
}
