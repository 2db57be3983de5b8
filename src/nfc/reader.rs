//! Reader side of the NFC Forum Type 4 Tag handover, as a sans-IO state machine.
//!
//! The driver produces command APDUs and consumes response APDUs; it never touches the tag
//! itself. Whether the holder uses static or negotiated handover is read from the NDEF
//! write-access byte of the capability container.
use std::collections::VecDeque;

use thiserror::Error;
use tracing::debug;

use crate::definitions::{ConnectionMethod, HandoverKind};
use crate::nfc::{
    apdu::{self, Command, FileId, SHORT_APDU_MAX_DATA},
    codec::{DecodedHandover, HandoverCodec},
    util::{DisplayBytesAsHex, IntoRaw},
};

pub const CC_FILE_LEN: usize = 15;
const NDEF_FILE_CONTROL_TLV: u8 = 0x04;
const NDEF_WRITE_ACCESS_GRANTED: u8 = 0x00;
const NLEN_SIZE: usize = 2;
/// READ/UPDATE BINARY offsets at or above this set the short EF identifier bit of P1.
const MAX_FILE_OFFSET: usize = 0x8000;

#[derive(Debug, Error)]
pub enum ReaderApduError {
    #[error("CC File is of invalid length: {0} instead of {1}")]
    CCFileInvalidLength(usize, usize),
    #[error("CC File has invalid NDEF file control TLV tag: {0:#04X}")]
    CCFileInvalidTlv(u8),
    #[error("CC File has invalid file ID: {0:#06X} instead of {1:#06X}")]
    CCFileInvalidFileId(u16, u16),
    #[error("CC File advertises an unusable maximum APDU data size: {0}")]
    CCFileInvalidApduSize(u16),
    #[error("Handover is done")]
    Done,
    #[error("Invalid APDU response: {0}")]
    InvalidApduResponse(#[from] apdu::ApduError),
    #[error("APDU response indicates a failure: {0:#06X}")]
    NegativeApduResponse(u16),
    #[error("NDEF length must be two bytes, got {0}")]
    InvalidNdefLength(usize),
    #[error("NDEF file is empty")]
    EmptyNdefFile,
    #[error("Holder returned {0} bytes when 1 to {1} were requested")]
    UnexpectedReadLength(usize, usize),
    #[error("NDEF message of {0} bytes does not fit the holder's NDEF file")]
    NdefTooLarge(usize),
    #[error("NDEF decoding failure: {0}")]
    NdefMessageError(#[from] anyhow::Error),
}

/// What the capability container tells the reader about the holder's NDEF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub kind: HandoverKind,
    /// Largest READ BINARY response data, capped to a short APDU.
    pub max_read: usize,
    /// Largest UPDATE BINARY command data, capped to a short APDU.
    pub max_write: usize,
    /// Size of the NDEF file, including the two NLEN bytes.
    pub max_ndef_file_size: usize,
}

impl Capabilities {
    pub fn parse(cc: &[u8]) -> Result<Self, ReaderApduError> {
        let cc: &[u8; CC_FILE_LEN] = cc
            .try_into()
            .map_err(|_| ReaderApduError::CCFileInvalidLength(cc.len(), CC_FILE_LEN))?;
        let max_read = u16::from_be_bytes([cc[3], cc[4]]);
        let max_write = u16::from_be_bytes([cc[5], cc[6]]);
        if cc[7] != NDEF_FILE_CONTROL_TLV {
            return Err(ReaderApduError::CCFileInvalidTlv(cc[7]));
        }
        let file_id = u16::from_be_bytes([cc[9], cc[10]]);
        if file_id != FileId::NdefFile.into_raw() {
            return Err(ReaderApduError::CCFileInvalidFileId(
                file_id,
                FileId::NdefFile.into_raw(),
            ));
        }
        for size in [max_read, max_write] {
            if size == 0 {
                return Err(ReaderApduError::CCFileInvalidApduSize(size));
            }
        }
        let kind = match cc[14] {
            NDEF_WRITE_ACCESS_GRANTED => HandoverKind::Negotiated,
            _ => HandoverKind::Static,
        };
        Ok(Self {
            kind,
            max_read: (max_read as usize).min(SHORT_APDU_MAX_DATA),
            max_write: (max_write as usize).min(SHORT_APDU_MAX_DATA),
            max_ndef_file_size: u16::from_be_bytes([cc[11], cc[12]]) as usize,
        })
    }
}

/// The NDEF messages the reader reads from the holder, in exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Incoming {
    /// Handover Select (static) or TNEP service parameter (negotiated).
    Initial,
    ServiceStatus,
    HandoverSelect,
}

#[derive(Debug, Clone)]
enum ReaderHandoverState {
    WaitingForAidResponse,
    WaitingForCapabilitiesFileResponse,
    WaitingForCapabilitiesReadResponse,
    WaitingForNdefFileResponse,
    WaitingForNdefLengthResponse(Incoming),
    WaitingForNdefReadResponse {
        message: Incoming,
        expected: usize,
        received: Vec<u8>,
        requested: usize,
    },
    WaitingForNdefUpdateResponse {
        next: Incoming,
        pending: VecDeque<Vec<u8>>,
    },
    Done,
}

/// The handover as read off the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderHandover {
    pub kind: HandoverKind,
    pub decoded: DecodedHandover,
    pub handover_select: Vec<u8>,
    pub handover_request: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub enum ReaderApduProgress {
    InProgress(Vec<u8>),
    Done(Box<ReaderHandover>),
}

pub struct ReaderApduHandoverDriver<'c> {
    codec: &'c dyn HandoverCodec,
    offered: Vec<ConnectionMethod>,
    state: ReaderHandoverState,
    capabilities: Option<Capabilities>,
    handover_request: Option<Vec<u8>>,
}

impl<'c> ReaderApduHandoverDriver<'c> {
    /// Create a new driver, returning it with the first command APDU to send.
    ///
    /// * `offered`: the methods put in the Handover Request if the holder negotiates.
    pub fn new(codec: &'c dyn HandoverCodec, offered: Vec<ConnectionMethod>) -> (Self, Vec<u8>) {
        let self_ = Self {
            codec,
            offered,
            state: ReaderHandoverState::WaitingForAidResponse,
            capabilities: None,
            handover_request: None,
        };
        (self_, Command::select_ndef_application().to_bytes())
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities
    }

    /// Feed the response to the last command. Any error leaves the driver in its final state;
    /// start a new driver to try again.
    pub fn process_rapdu(&mut self, rapdu: &[u8]) -> Result<ReaderApduProgress, ReaderApduError> {
        let rapdu = apdu::Response::try_from(rapdu)?;
        debug!("Received response APDU: {:?}", rapdu.status);
        if !rapdu.is_ok() {
            self.state = ReaderHandoverState::Done;
            return Err(ReaderApduError::NegativeApduResponse(
                rapdu.status.into_raw(),
            ));
        }

        use ReaderHandoverState::*;
        match std::mem::replace(&mut self.state, Done) {
            WaitingForAidResponse => {
                self.state = WaitingForCapabilitiesFileResponse;
                Ok(ReaderApduProgress::InProgress(
                    Command::select_file(FileId::CapabilityContainer).to_bytes(),
                ))
            }
            WaitingForCapabilitiesFileResponse => {
                self.state = WaitingForCapabilitiesReadResponse;
                Ok(ReaderApduProgress::InProgress(
                    Command::ReadBinary {
                        slice: 0..CC_FILE_LEN,
                    }
                    .to_bytes(),
                ))
            }
            WaitingForCapabilitiesReadResponse => {
                let capabilities = Capabilities::parse(&rapdu.payload)?;
                debug!("Capability container: {capabilities:?}");
                self.capabilities = Some(capabilities);
                self.state = WaitingForNdefFileResponse;
                Ok(ReaderApduProgress::InProgress(
                    Command::select_file(FileId::NdefFile).to_bytes(),
                ))
            }
            WaitingForNdefFileResponse => Ok(self.read_message(Incoming::Initial)),
            WaitingForNdefLengthResponse(message) => {
                let nlen: [u8; NLEN_SIZE] = rapdu
                    .payload
                    .as_slice()
                    .try_into()
                    .map_err(|_| ReaderApduError::InvalidNdefLength(rapdu.payload.len()))?;
                let expected = u16::from_be_bytes(nlen) as usize;
                if expected == 0 {
                    return Err(ReaderApduError::EmptyNdefFile);
                }
                if expected + NLEN_SIZE > MAX_FILE_OFFSET {
                    return Err(ReaderApduError::NdefTooLarge(expected));
                }
                Ok(self.read_chunk(message, expected, Vec::with_capacity(expected)))
            }
            WaitingForNdefReadResponse {
                message,
                expected,
                mut received,
                requested,
            } => {
                if rapdu.payload.is_empty() || rapdu.payload.len() > requested {
                    return Err(ReaderApduError::UnexpectedReadLength(
                        rapdu.payload.len(),
                        requested,
                    ));
                }
                received.extend_from_slice(&rapdu.payload);
                if received.len() < expected {
                    Ok(self.read_chunk(message, expected, received))
                } else {
                    debug!(
                        "recv NDEF ({message:?}): {:?}",
                        DisplayBytesAsHex::from(received.as_slice())
                    );
                    self.on_message(message, received)
                }
            }
            WaitingForNdefUpdateResponse { next, mut pending } => match pending.pop_front() {
                Some(command) => {
                    self.state = WaitingForNdefUpdateResponse { next, pending };
                    Ok(ReaderApduProgress::InProgress(command))
                }
                None => Ok(self.read_message(next)),
            },
            Done => Err(ReaderApduError::Done),
        }
    }

    fn read_message(&mut self, message: Incoming) -> ReaderApduProgress {
        self.state = ReaderHandoverState::WaitingForNdefLengthResponse(message);
        ReaderApduProgress::InProgress(Command::ReadBinary { slice: 0..NLEN_SIZE }.to_bytes())
    }

    fn read_chunk(
        &mut self,
        message: Incoming,
        expected: usize,
        received: Vec<u8>,
    ) -> ReaderApduProgress {
        let max_read = self
            .capabilities
            .map_or(SHORT_APDU_MAX_DATA, |c| c.max_read);
        let offset = NLEN_SIZE + received.len();
        let requested = (expected - received.len()).min(max_read);
        self.state = ReaderHandoverState::WaitingForNdefReadResponse {
            message,
            expected,
            received,
            requested,
        };
        ReaderApduProgress::InProgress(
            Command::ReadBinary {
                slice: offset..offset + requested,
            }
            .to_bytes(),
        )
    }

    /// Queue the UPDATE BINARY commands writing `message` to the NDEF file, then read `next`.
    /// Messages that don't fit one command use the NLEN=0, data, NLEN sequence.
    fn write_message(
        &mut self,
        message: &[u8],
        next: Incoming,
    ) -> Result<ReaderApduProgress, ReaderApduError> {
        let Some(capabilities) = self.capabilities else {
            return Err(ReaderApduError::Done);
        };
        let file_len = message.len() + NLEN_SIZE;
        if file_len > capabilities.max_ndef_file_size || file_len > MAX_FILE_OFFSET {
            return Err(ReaderApduError::NdefTooLarge(message.len()));
        }
        debug!(
            "send NDEF (raw): {:?}",
            DisplayBytesAsHex::from(message)
        );
        let nlen = (message.len() as u16).to_be_bytes();
        let mut pending = VecDeque::new();
        if message.len() + NLEN_SIZE <= capabilities.max_write {
            pending.push_back(
                Command::UpdateBinary {
                    offset: 0,
                    data: &[nlen.as_slice(), message].concat(),
                }
                .to_bytes(),
            );
        } else {
            pending.push_back(
                Command::UpdateBinary {
                    offset: 0,
                    data: &[0x00, 0x00],
                }
                .to_bytes(),
            );
            for (i, chunk) in message.chunks(capabilities.max_write).enumerate() {
                pending.push_back(
                    Command::UpdateBinary {
                        offset: NLEN_SIZE + i * capabilities.max_write,
                        data: chunk,
                    }
                    .to_bytes(),
                );
            }
            pending.push_back(
                Command::UpdateBinary {
                    offset: 0,
                    data: &nlen,
                }
                .to_bytes(),
            );
        }
        match pending.pop_front() {
            Some(first) => {
                self.state = ReaderHandoverState::WaitingForNdefUpdateResponse { next, pending };
                Ok(ReaderApduProgress::InProgress(first))
            }
            None => Ok(self.read_message(next)),
        }
    }

    fn on_message(
        &mut self,
        message: Incoming,
        bytes: Vec<u8>,
    ) -> Result<ReaderApduProgress, ReaderApduError> {
        let kind = self
            .capabilities
            .map_or(HandoverKind::Static, |c| c.kind);
        match (message, kind) {
            (Incoming::Initial, HandoverKind::Static) => {
                let decoded = self.codec.decode_static_handover_select(&bytes)?;
                Ok(self.finish(HandoverKind::Static, decoded, bytes, None))
            }
            (Incoming::Initial, HandoverKind::Negotiated) => {
                let service_select = self.codec.service_select(&bytes)?;
                self.write_message(&service_select, Incoming::ServiceStatus)
            }
            (Incoming::ServiceStatus, _) => {
                self.codec.check_service_status(&bytes)?;
                let offered = ConnectionMethod::combine(self.offered.iter().cloned());
                let request = self.codec.handover_request(&offered)?;
                let progress = self.write_message(&request, Incoming::HandoverSelect)?;
                self.handover_request = Some(request);
                Ok(progress)
            }
            (Incoming::HandoverSelect, _) => {
                let request = self.handover_request.take().unwrap_or_default();
                let decoded = self
                    .codec
                    .decode_negotiated_handover_select(&bytes, &request)?;
                Ok(self.finish(HandoverKind::Negotiated, decoded, bytes, Some(request)))
            }
        }
    }

    fn finish(
        &mut self,
        kind: HandoverKind,
        decoded: DecodedHandover,
        handover_select: Vec<u8>,
        handover_request: Option<Vec<u8>>,
    ) -> ReaderApduProgress {
        self.state = ReaderHandoverState::Done;
        ReaderApduProgress::Done(Box::new(ReaderHandover {
            kind,
            decoded,
            handover_select,
            handover_request,
        }))
    }
}
