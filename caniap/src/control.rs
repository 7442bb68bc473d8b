//! One-shot device requests outside of a transfer.

use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::iap::{Channel, DeviceStatus, ERASE_FAILED, ProtocolMessage};
use crate::transport::Transport;

/// Connect, run `exchange`, and release the transport whatever the outcome.
fn with_connection<T, R, F>(transport: &mut T, exchange: F) -> Result<R>
where
    T: Transport,
    F: FnOnce(&mut T, &mut T::Handle) -> Result<R>,
{
    let mut handle = transport.connect()?;
    let outcome = exchange(transport, &mut handle);
    let released = transport.close(handle);
    let value = outcome?;
    released?;
    Ok(value)
}

/// Ask the device for its status byte.
pub fn query_status<T: Transport>(transport: &mut T, timeout: Duration) -> Result<DeviceStatus> {
    let status = with_connection(transport, |t, handle| {
        let reply = t.request(handle, &ProtocolMessage::send_status(), timeout, Channel::Update)?;
        DeviceStatus::decode(&reply)
    })?;
    debug!("Device status: {status}");
    Ok(status)
}

/// Clear the bootloader's update markers.
///
/// The device re-erases its marker sector and answers like a program start.
pub fn reset_markers<T: Transport>(transport: &mut T, timeout: Duration) -> Result<()> {
    with_connection(transport, |t, handle| {
        let reply = t.request(handle, &ProtocolMessage::reset_markers(), timeout, Channel::Update)?;
        match reply.first() {
            Some(&ERASE_FAILED) => Err(Error::EraseFailed {
                status: ERASE_FAILED,
            }),
            Some(_) => Ok(()),
            None => Err(Error::MalformedResponse(
                "empty reply to marker reset".into(),
            )),
        }
    })?;
    info!("Update markers reset");
    Ok(())
}

/// Make the device jump to its ROM bootloader. No reply is expected.
pub fn enter_system_bootloader<T: Transport>(transport: &mut T) -> Result<()> {
    with_connection(transport, |t, handle| {
        t.send(handle, &ProtocolMessage::system_bootloader())
    })?;
    info!("Requested jump to system bootloader");
    Ok(())
}
