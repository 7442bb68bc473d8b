//! In-memory transport that records traffic and emulates the IAP target.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_extend;
use crate::protocol::iap::{
    CRC_FAILED, CRC_SUCCEEDED, Channel, ERASE_FAILED, LOAD_NEW_PROGRAM, PROGRAM_START, READY,
    ProtocolMessage, SEND_STATUS, WRITE_TO_FLASH,
};
use crate::transport::Transport;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Connect(usize),
    Close(usize),
    Send(ProtocolMessage),
    Request(ProtocolMessage, Channel),
}

#[derive(Debug)]
pub(crate) struct MockHandle {
    pub(crate) id: usize,
}

/// Transport double with a small simulation of the target firmware.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    pub(crate) events: Vec<Event>,
    /// Replies consumed before the simulation answers.
    pub(crate) scripted: VecDeque<Result<Vec<u8>>>,
    pub(crate) erase_fails: bool,
    /// Number of upcoming CRC challenges to answer with a wrong CRC.
    pub(crate) corrupt_crcs: usize,
    pub(crate) status: u8,
    pub(crate) fail_connect: bool,
    connections: usize,
    open_handles: usize,
    page_crc: u16,
    /// Page CRCs the device reported, in order.
    pub(crate) reported: Vec<u16>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sends(&self) -> impl Iterator<Item = &ProtocolMessage> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Send(m) => Some(m),
                _ => None,
            })
    }

    pub(crate) fn count_sends(&self, code: u8) -> usize {
        self.sends()
            .filter(|m| m.code() == code)
            .count()
    }

    pub(crate) fn count_closes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Close(_)))
            .count()
    }

    pub(crate) fn open_handles(&self) -> usize {
        self.open_handles
    }

    fn simulate(&mut self, message: &ProtocolMessage) -> Vec<u8> {
        match message.code() {
            PROGRAM_START => {
                self.page_crc = 0;
                let status = if self.erase_fails { ERASE_FAILED } else { READY };
                vec![status; 3]
            },
            WRITE_TO_FLASH => {
                let crc = crc16_extend(self.page_crc, message.payload());
                self.page_crc = 0;
                let reported = if self.corrupt_crcs > 0 {
                    self.corrupt_crcs -= 1;
                    crc ^ 0xFFFF
                } else {
                    crc
                };
                self.reported.push(reported);
                reported.to_be_bytes().to_vec()
            },
            SEND_STATUS => vec![self.status],
            LOAD_NEW_PROGRAM => vec![READY; 3],
            _ => Vec::new(),
        }
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn connect(&mut self) -> Result<MockHandle> {
        if self.fail_connect {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no adapter",
            )));
        }
        self.connections += 1;
        self.open_handles += 1;
        self.events
            .push(Event::Connect(self.connections));
        Ok(MockHandle {
            id: self.connections,
        })
    }

    fn close(&mut self, handle: MockHandle) -> Result<()> {
        self.open_handles -= 1;
        self.events
            .push(Event::Close(handle.id));
        Ok(())
    }

    fn send(&mut self, _handle: &mut MockHandle, message: &ProtocolMessage) -> Result<()> {
        self.events
            .push(Event::Send(message.clone()));
        match message.code() {
            WRITE_TO_FLASH => {
                self.page_crc = crc16_extend(self.page_crc, message.payload());
            },
            CRC_SUCCEEDED | CRC_FAILED => self.page_crc = 0,
            _ => {},
        }
        Ok(())
    }

    fn request(
        &mut self,
        _handle: &mut MockHandle,
        message: &ProtocolMessage,
        _timeout: Duration,
        response_channel: Channel,
    ) -> Result<Vec<u8>> {
        self.events
            .push(Event::Request(message.clone(), response_channel));
        if let Some(reply) = self.scripted.pop_front() {
            return reply;
        }
        Ok(self.simulate(message))
    }
}
