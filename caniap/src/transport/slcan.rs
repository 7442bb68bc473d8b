//! SLCAN (Lawicel ASCII) transport over a serial port.
//!
//! ## Line Format
//!
//! ```text
//! host -> adapter:   C\r            close channel
//!                    S6\r           500 kbit/s
//!                    O\r            open channel
//!                    t6008<16 hex>\r  standard frame, id 0x600, DLC 8
//! adapter -> host:   \r | z\r       command accepted / frame queued
//!                    \x07           command rejected
//!                    t6012ABCD\r    received frame, id 0x601, DLC 2
//! ```

use std::fmt;
use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::iap::{Channel, MAX_PAYLOAD, ProtocolMessage};
use crate::transport::Transport;

/// Line terminator.
const CR: u8 = b'\r';
/// Error reply.
const BEL: u8 = 0x07;
/// Pause after the setup commands before stale replies are discarded.
const SETUP_SETTLE: Duration = Duration::from_millis(20);

/// CAN bus bitrates selectable with the `S` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanBitrate {
    /// 10 kbit/s.
    K10,
    /// 20 kbit/s.
    K20,
    /// 50 kbit/s.
    K50,
    /// 100 kbit/s.
    K100,
    /// 125 kbit/s.
    K125,
    /// 250 kbit/s.
    K250,
    /// 500 kbit/s.
    #[default]
    K500,
    /// 800 kbit/s.
    K800,
    /// 1 Mbit/s.
    M1,
}

impl CanBitrate {
    /// Map a bitrate in bits per second.
    pub fn from_bps(bps: u32) -> Result<Self> {
        match bps {
            10_000 => Ok(Self::K10),
            20_000 => Ok(Self::K20),
            50_000 => Ok(Self::K50),
            100_000 => Ok(Self::K100),
            125_000 => Ok(Self::K125),
            250_000 => Ok(Self::K250),
            500_000 => Ok(Self::K500),
            800_000 => Ok(Self::K800),
            1_000_000 => Ok(Self::M1),
            other => Err(Error::Config(format!(
                "unsupported CAN bitrate {other} bit/s"
            ))),
        }
    }

    /// Digit of the `S` setup command.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::K10 => 0,
            Self::K20 => 1,
            Self::K50 => 2,
            Self::K100 => 3,
            Self::K125 => 4,
            Self::K250 => 5,
            Self::K500 => 6,
            Self::K800 => 7,
            Self::M1 => 8,
        }
    }
}

impl fmt::Display for CanBitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kbps = match self {
            Self::K10 => 10,
            Self::K20 => 20,
            Self::K50 => 50,
            Self::K100 => 100,
            Self::K125 => 125,
            Self::K250 => 250,
            Self::K500 => 500,
            Self::K800 => 800,
            Self::M1 => 1000,
        };
        write!(f, "{kbps} kbit/s")
    }
}

/// A received standard CAN data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// 11-bit identifier.
    pub id: u16,
    /// Data bytes (at most 8).
    pub data: Vec<u8>,
}

/// Encode a standard data frame as an SLCAN `t` line.
pub fn encode_frame(id: u16, data: &[u8]) -> Result<Vec<u8>> {
    if id > 0x7FF {
        return Err(Error::Protocol(format!("identifier {id:#x} is not 11-bit")));
    }
    if data.len() > MAX_PAYLOAD {
        return Err(Error::Protocol(format!(
            "{} data bytes exceed a CAN frame",
            data.len()
        )));
    }

    let mut line = format!("t{id:03X}{:X}", data.len());
    for byte in data {
        line.push_str(&format!("{byte:02X}"));
    }
    let mut bytes = line.into_bytes();
    bytes.push(CR);
    Ok(bytes)
}

fn hex_value(digits: &[u8]) -> Option<u16> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| u16::from_str_radix(s, 16).ok())
}

/// Parse one adapter line (without its terminator).
///
/// Returns `None` for acknowledgements, blank lines and frames this
/// transport does not handle (extended or remote frames).
pub fn parse_line(line: &[u8]) -> Result<Option<CanFrame>> {
    let Some((&kind, rest)) = line.split_first() else {
        return Ok(None);
    };

    match kind {
        b't' => {},
        BEL => return Err(Error::Protocol("adapter rejected a command".into())),
        b'z' | b'Z' | b'T' | b'r' | b'R' => return Ok(None),
        other => {
            trace!("Ignoring SLCAN line starting with 0x{other:02X}");
            return Ok(None);
        },
    }

    let malformed = || {
        Error::MalformedResponse(format!(
            "bad SLCAN frame {:?}",
            String::from_utf8_lossy(line)
        ))
    };

    if rest.len() < 4 {
        return Err(malformed());
    }
    let id = hex_value(&rest[..3]).ok_or_else(malformed)?;
    let dlc = usize::from(hex_value(&rest[3..4]).ok_or_else(malformed)?);
    if dlc > MAX_PAYLOAD || rest.len() < 4 + dlc * 2 {
        return Err(malformed());
    }

    let data = rest[4..4 + dlc * 2]
        .chunks(2)
        .map(|pair| {
            hex_value(pair)
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(malformed)
        })
        .collect::<Result<Vec<u8>>>()?;

    Ok(Some(CanFrame { id, data }))
}

/// Open SLCAN session.
pub struct SlcanHandle<P> {
    port: P,
    rx: Vec<u8>,
}

impl<P: Port> SlcanHandle<P> {
    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Take the next complete line out of the receive buffer.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self
            .rx
            .iter()
            .position(|&b| b == CR || b == BEL)?;

        // BEL is unterminated and forms a line of its own
        if self.rx[end] == BEL {
            let take = end.max(1);
            return Some(self.rx.drain(..take).collect());
        }

        let line: Vec<u8> = self.rx.drain(..end).collect();
        self.rx.remove(0);
        Some(line)
    }
}

type PortOpener<P> = Box<dyn FnMut() -> Result<P> + Send>;

/// SLCAN transport over any [`Port`].
pub struct SlcanTransport<P: Port> {
    opener: PortOpener<P>,
    bitrate: CanBitrate,
}

impl<P: Port> SlcanTransport<P> {
    /// Create a transport that opens its port with `opener` on every connect.
    pub fn new<F>(opener: F, bitrate: CanBitrate) -> Self
    where
        F: FnMut() -> Result<P> + Send + 'static,
    {
        Self {
            opener: Box::new(opener),
            bitrate,
        }
    }

    /// Configured bus bitrate.
    pub fn bitrate(&self) -> CanBitrate {
        self.bitrate
    }

    fn command(port: &mut P, command: &str) -> Result<()> {
        trace!("SLCAN > {command}");
        let mut bytes = command.as_bytes().to_vec();
        bytes.push(CR);
        port.write_all_bytes(&bytes)
    }
}

#[cfg(feature = "native")]
impl SlcanTransport<crate::port::NativePort> {
    /// SLCAN over a native serial port.
    pub fn native(config: crate::port::SerialConfig, bitrate: CanBitrate) -> Self {
        Self::new(move || crate::port::NativePort::open(&config), bitrate)
    }
}

impl<P: Port> Transport for SlcanTransport<P> {
    type Handle = SlcanHandle<P>;

    fn connect(&mut self) -> Result<Self::Handle> {
        let mut port = (self.opener)()?;
        debug!("Opening SLCAN channel on {} at {}", port.name(), self.bitrate);

        Self::command(&mut port, "C")?;
        Self::command(&mut port, &format!("S{}", self.bitrate.code()))?;
        Self::command(&mut port, "O")?;
        thread::sleep(SETUP_SETTLE);
        port.clear_buffers()?;

        Ok(SlcanHandle {
            port,
            rx: Vec::new(),
        })
    }

    fn close(&mut self, mut handle: Self::Handle) -> Result<()> {
        debug!("Closing SLCAN channel on {}", handle.port.name());
        let result = Self::command(&mut handle.port, "C");
        handle.port.close()?;
        result
    }

    fn send(&mut self, handle: &mut Self::Handle, message: &ProtocolMessage) -> Result<()> {
        let line = encode_frame(message.channel().id(), &message.wire_data()?)?;
        trace!("SLCAN > {}", String::from_utf8_lossy(&line).trim_end());
        handle.port.write_all_bytes(&line)
    }

    fn request(
        &mut self,
        handle: &mut Self::Handle,
        message: &ProtocolMessage,
        timeout: Duration,
        response_channel: Channel,
    ) -> Result<Vec<u8>> {
        self.send(handle, message)?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];
        loop {
            while let Some(line) = handle.next_line() {
                trace!("SLCAN < {}", String::from_utf8_lossy(&line));
                match parse_line(&line)? {
                    Some(frame) if frame.id == response_channel.id() => return Ok(frame.data),
                    Some(frame) => {
                        warn!("Dropping unexpected frame on 0x{:03X}", frame.id);
                    },
                    None => {},
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::TransportTimeout {
                    channel: response_channel,
                    timeout,
                });
            }

            match handle.port.read(&mut buf) {
                Ok(n) => handle.rx.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}
