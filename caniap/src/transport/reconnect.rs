//! Periodic reconnection around a transport.
//!
//! Some USB-CAN adapters lock up after a few dozen back-to-back frames unless
//! the connection is cycled. [`Reconnecting`] closes and reopens the inner
//! handle every N operations, invisibly to the caller.

use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::iap::{Channel, ProtocolMessage};
use crate::transport::Transport;

/// When to cycle the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect after this many send/request operations (`None` = never).
    pub every: Option<usize>,
    /// Pause between closing and reopening.
    pub settle: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            every: Some(25),
            settle: Duration::from_millis(100),
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect.
    #[must_use]
    pub fn never() -> Self {
        Self {
            every: None,
            settle: Duration::ZERO,
        }
    }

    /// Reconnect every `every` operations.
    #[must_use]
    pub fn every(every: usize) -> Self {
        Self {
            every: Some(every),
            ..Self::default()
        }
    }

    /// Set the settle pause.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// Handle of a [`Reconnecting`] transport.
pub struct ReconnectingHandle<H> {
    inner: Option<H>,
    operations: usize,
}

/// Transport wrapper applying a [`ReconnectPolicy`].
pub struct Reconnecting<T> {
    inner: T,
    policy: ReconnectPolicy,
    reconnects: usize,
}

impl<T: Transport> Reconnecting<T> {
    /// Wrap a transport.
    pub fn new(inner: T, policy: ReconnectPolicy) -> Self {
        Self {
            inner,
            policy,
            reconnects: 0,
        }
    }

    /// Number of reconnections performed so far.
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }

    /// Get a reference to the wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Consume the wrapper and return the wrapped transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Cycle the connection if the policy says so, then hand out the live handle.
    fn live<'h>(&mut self, handle: &'h mut ReconnectingHandle<T::Handle>) -> Result<&'h mut T::Handle> {
        let due = self
            .policy
            .every
            .is_some_and(|every| every > 0 && handle.operations >= every);

        if due {
            debug!(
                "Cycling transport after {} operations",
                handle.operations
            );
            if let Some(old) = handle.inner.take() {
                if let Err(e) = self.inner.close(old) {
                    warn!("Close before reconnect failed: {e}");
                }
            }
            if !self.policy.settle.is_zero() {
                thread::sleep(self.policy.settle);
            }
            handle.operations = 0;
            self.reconnects += 1;
        }

        if handle.inner.is_none() {
            handle.inner = Some(self.inner.connect()?);
        }
        handle.operations += 1;

        handle
            .inner
            .as_mut()
            .ok_or_else(|| Error::Protocol("transport handle unavailable".into()))
    }
}

impl<T: Transport> Transport for Reconnecting<T> {
    type Handle = ReconnectingHandle<T::Handle>;

    fn connect(&mut self) -> Result<Self::Handle> {
        Ok(ReconnectingHandle {
            inner: Some(self.inner.connect()?),
            operations: 0,
        })
    }

    fn close(&mut self, handle: Self::Handle) -> Result<()> {
        match handle.inner {
            Some(inner) => self.inner.close(inner),
            None => Ok(()),
        }
    }

    fn send(&mut self, handle: &mut Self::Handle, message: &ProtocolMessage) -> Result<()> {
        let live = self.live(handle)?;
        self.inner.send(live, message)
    }

    fn request(
        &mut self,
        handle: &mut Self::Handle,
        message: &ProtocolMessage,
        timeout: Duration,
        response_channel: Channel,
    ) -> Result<Vec<u8>> {
        let live = self.live(handle)?;
        self.inner
            .request(live, message, timeout, response_channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Event, MockTransport};

    #[test]
    fn test_reconnects_every_n_operations() {
        let mut transport = Reconnecting::new(
            MockTransport::new(),
            ReconnectPolicy::every(2).with_settle(Duration::ZERO),
        );
        let mut handle = transport.connect().unwrap();
        for _ in 0..5 {
            transport
                .send(&mut handle, &ProtocolMessage::crc_succeeded())
                .unwrap();
        }
        transport.close(handle).unwrap();

        assert_eq!(transport.reconnects(), 2);
        let mock = transport.into_inner();
        let connects = mock
            .events
            .iter()
            .filter(|e| matches!(e, Event::Connect(_)))
            .count();
        assert_eq!(connects, 3);
        assert_eq!(mock.count_closes(), 3);
        assert_eq!(mock.open_handles(), 0);
        assert_eq!(mock.count_sends(crate::protocol::iap::CRC_SUCCEEDED), 5);
    }

    #[test]
    fn test_never_policy_keeps_handle() {
        let mut transport = Reconnecting::new(MockTransport::new(), ReconnectPolicy::never());
        let mut handle = transport.connect().unwrap();
        for _ in 0..100 {
            transport
                .send(&mut handle, &ProtocolMessage::last_frame())
                .unwrap();
        }
        transport.close(handle).unwrap();
        assert_eq!(transport.reconnects(), 0);
        assert_eq!(transport.inner().count_closes(), 1);
    }

    #[test]
    fn test_requests_pass_through_after_reconnect() {
        let mut transport = Reconnecting::new(
            MockTransport::new(),
            ReconnectPolicy::every(1).with_settle(Duration::ZERO),
        );
        let mut handle = transport.connect().unwrap();
        let reply = transport
            .request(
                &mut handle,
                &ProtocolMessage::program_start(),
                Duration::from_millis(10),
                Channel::Update,
            )
            .unwrap();
        assert_eq!(reply, vec![0xAA; 3]);
        let reply = transport
            .request(
                &mut handle,
                &ProtocolMessage::send_status(),
                Duration::from_millis(10),
                Channel::Update,
            )
            .unwrap();
        assert_eq!(reply, vec![0x00]);
        transport.close(handle).unwrap();
        assert_eq!(transport.reconnects(), 1);
        assert_eq!(transport.inner().open_handles(), 0);
    }
}
