use std::ops::Range;

use strum_macros::EnumIter;
use thiserror::Error;
use tracing::warn;

// This has been written according to ISO 7816-4 (2005).
// This only implements what an NFC Forum Type 4 Tag handover needs.

use crate::nfc::util::{impl_partial_enum, IntoRaw, KnownOrRaw};

pub const AID_NDEF_APPLICATION: &[u8] = &[0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Largest data field a short APDU can carry in either direction.
pub const SHORT_APDU_MAX_DATA: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApduError {
    #[error("response APDU is {0} bytes long, too short for a status word")]
    ResponseTooShort(usize),
    #[error("malformed command APDU: {0}")]
    MalformedCommand(&'static str),
    #[error("instruction {0:#04X} is not supported")]
    UnsupportedInstruction(u8),
}

#[repr(u16)]
#[derive(Debug, EnumIter, Clone, Copy, PartialEq, Eq)]
pub enum StatusWord {
    Ok = 0x9000,
    IncorrectLength = 0x6700,
    ConditionsNotSatisfied = 0x6985,
    FileOrApplicationNotFound = 0x6A82,
    IncorrectP1OrP2 = 0x6B00,
    InstructionNotSupported = 0x6D00,
    Unspecified = 0x6F00,
}
impl_partial_enum!(StatusWord, u16);

pub type Status = KnownOrRaw<u16, StatusWord>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: KnownOrRaw::Known(StatusWord::Ok),
            payload,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == KnownOrRaw::Known(StatusWord::Ok)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 2);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.status.into_raw().to_be_bytes());
        bytes
    }
}

impl From<StatusWord> for Response {
    fn from(status: StatusWord) -> Self {
        Response {
            status: KnownOrRaw::Known(status),
            payload: Vec::new(),
        }
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = ApduError;

    fn try_from(response: &[u8]) -> Result<Self, Self::Error> {
        let Some((payload, sw)) = response.split_last_chunk::<2>() else {
            return Err(ApduError::ResponseTooShort(response.len()));
        };
        Ok(Self {
            status: u16::from_be_bytes(*sw).into(),
            payload: payload.to_vec(),
        })
    }
}

#[repr(u16)]
#[derive(Debug, EnumIter, Clone, Copy, PartialEq, Eq)]
pub enum FileId {
    CapabilityContainer = 0xE103,
    NdefFile = 0xE104,
}
impl_partial_enum!(FileId, u16);

/// The P2 "file control information" bits of SELECT, §7.1.1.
#[repr(u8)]
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInfo {
    FciTemplate = 0b0000,
    FcpTemplate = 0b0100,
    FmdTemplate = 0b1000,
    NoResponse  = 0b1100,
}

impl ControlInfo {
    fn from_p2(p2: u8) -> Self {
        match p2 & 0b1100 {
            0b0000 => ControlInfo::FciTemplate,
            0b0100 => ControlInfo::FcpTemplate,
            0b1000 => ControlInfo::FmdTemplate,
            _ => ControlInfo::NoResponse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    SelectFile {
        control_info: ControlInfo,
        file_id: KnownOrRaw<u16, FileId>,
    },
    SelectAid {
        control_info: ControlInfo,
        aid: &'a [u8],
    },
    ReadBinary {
        slice: Range<usize>,
    },
    UpdateBinary {
        offset: usize,
        data: &'a [u8],
    },
}

fn serialize_l_c(len: usize) -> Vec<u8> {
    if len <= SHORT_APDU_MAX_DATA {
        vec![len as u8]
    } else {
        [&[0x00], (len as u16).to_be_bytes().as_slice()].concat()
    }
}

/// Split a command body into its data field and the expected response length, following the
/// four cases of §5.1.
fn split_body(body: &[u8]) -> Result<(&[u8], Option<usize>), ApduError> {
    let short_le = |b: u8| if b == 0 { 256 } else { b as usize };
    let extended_le = |b: [u8; 2]| match u16::from_be_bytes(b) {
        0 => 65536,
        n => n as usize,
    };
    match body {
        [] => Ok((&[], None)),
        [le] => Ok((&[], Some(short_le(*le)))),
        [0x00, hi, lo] => Ok((&[], Some(extended_le([*hi, *lo])))),
        [0x00, hi, lo, rest @ ..] => {
            let lc = u16::from_be_bytes([*hi, *lo]) as usize;
            match rest.len().checked_sub(lc) {
                Some(0) => Ok((rest, None)),
                Some(2) => Ok((&rest[..lc], Some(extended_le([rest[lc], rest[lc + 1]])))),
                _ => Err(ApduError::MalformedCommand("extended Lc does not match body")),
            }
        }
        [lc, rest @ ..] => {
            let lc = *lc as usize;
            match rest.len().checked_sub(lc) {
                Some(0) => Ok((rest, None)),
                Some(1) => Ok((&rest[..lc], Some(short_le(rest[lc])))),
                _ => Err(ApduError::MalformedCommand("Lc does not match body")),
            }
        }
    }
}

impl<'a> Command<'a> {
    pub fn select_ndef_application() -> Self {
        Command::SelectAid {
            control_info: ControlInfo::FciTemplate,
            aid: AID_NDEF_APPLICATION,
        }
    }

    pub fn select_file(file_id: FileId) -> Self {
        Command::SelectFile {
            control_info: ControlInfo::NoResponse,
            file_id: KnownOrRaw::Known(file_id),
        }
    }

    pub fn parse(command_bytes: &'a [u8]) -> Result<Self, ApduError> {
        let [_cla, ins, p1, p2, body @ ..] = command_bytes else {
            return Err(ApduError::MalformedCommand("shorter than the header"));
        };
        let (data, le) = split_body(body)?;
        // b8 of P1 set means P1 carries a short EF identifier, §7.2.2, which we don't support.
        let offset = u16::from_be_bytes([*p1, *p2]) as usize;
        match (*ins, *p1) {
            (0xA4, 0x00) => {
                let file_id: [u8; 2] = data
                    .try_into()
                    .map_err(|_| ApduError::MalformedCommand("file id must be two bytes"))?;
                Ok(Command::SelectFile {
                    control_info: ControlInfo::from_p2(*p2),
                    file_id: u16::from_be_bytes(file_id).into(),
                })
            }
            (0xA4, 0x04) => Ok(Command::SelectAid {
                control_info: ControlInfo::from_p2(*p2),
                aid: data,
            }),
            (0xA4, _) => Err(ApduError::MalformedCommand("unsupported SELECT P1")),
            (0xB0 | 0xD6, p1) if p1 & 0x80 != 0 => {
                Err(ApduError::MalformedCommand("short EF identifier in P1"))
            }
            (0xB0, _) => Ok(Command::ReadBinary {
                slice: offset..offset + le.unwrap_or(0),
            }),
            (0xD6, _) => Ok(Command::UpdateBinary { offset, data }),
            (ins, _) => Err(ApduError::UnsupportedInstruction(ins)),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let cla = 0x00;

        let (ins, p1, p2, remainder) = match self {
            Command::SelectFile {
                control_info,
                file_id,
            } => {
                let payload = file_id.into_raw().to_be_bytes();
                // no Le: no restrictions on the response length
                let remainder = [serialize_l_c(payload.len()), payload.to_vec()].concat();
                (0xA4, 0x00, *control_info as u8, remainder)
            }
            Command::SelectAid { control_info, aid } => {
                // a short response is enough
                let remainder = [serialize_l_c(aid.len()), aid.to_vec(), vec![0x00]].concat();
                (0xA4, 0x04, *control_info as u8, remainder)
            }
            Command::ReadBinary { slice } => {
                let [p1, p2] = (slice.start as u16).to_be_bytes();
                if p1 > 127 {
                    warn!("P1 has b8 set, the holder may read it as a short EF identifier");
                }
                // Le of 0 encodes 256
                (0xB0, p1, p2, vec![slice.len() as u8])
            }
            Command::UpdateBinary { offset, data } => {
                let [p1, p2] = (*offset as u16).to_be_bytes();
                if p1 > 127 {
                    warn!("P1 has b8 set, the holder may read it as a short EF identifier");
                }
                let remainder = [serialize_l_c(data.len()), data.to_vec()].concat();
                (0xD6, p1, p2, remainder)
            }
        };
        [vec![cla, ins, p1, p2], remainder].concat()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_apdus(apdus: &[&str]) {
        for apdu in apdus {
            let bytes = hex::decode(apdu).unwrap();
            let parsed = Command::parse(&bytes).expect("Failed to parse APDU");
            assert_eq!(bytes, parsed.to_bytes(), "{parsed:?}");
        }
    }

    #[test]
    /// real APDUs from the GET verifier app
    fn get_apdus() {
        test_apdus(&[
            "00a4040007a000000248040000",
            "00a4040007d276000085010100",
            "00a4000c02e103",
            "00b000000f",
            "00a4000c02e104",
            "00b0000002",
            "00b00002cc",
        ]);
    }

    #[test]
    /// test APDUs from multipaz, static and negotiated handover
    fn multipaz_apdus() {
        test_apdus(&[
            "00a4040007d276000085010100",
            "00a4000c02e103",
            "00b000000f",
            "00a4000c02e104",
            "00b0000002",
            "00b00002fe",
            "00b000021f",
            "00d600001b0019d1021454731375726e3a6e66633a736e3a68616e646f766572",
            "00b0000206",
            "00b00002ba",
        ]);
    }

    #[test]
    fn reader_commands_encode_as_expected() {
        assert_eq!(
            Command::select_ndef_application().to_bytes(),
            hex::decode("00a4040007d276000085010100").unwrap()
        );
        assert_eq!(
            Command::select_file(FileId::CapabilityContainer).to_bytes(),
            hex::decode("00a4000c02e103").unwrap()
        );
        assert_eq!(
            Command::ReadBinary { slice: 2..206 }.to_bytes(),
            hex::decode("00b00002cc").unwrap()
        );
    }

    #[test]
    fn extended_length_update_binary() {
        let data = vec![0xAB; 300];
        let bytes = Command::UpdateBinary {
            offset: 2,
            data: &data,
        }
        .to_bytes();
        assert_eq!(&bytes[..7], &[0x00, 0xD6, 0x00, 0x02, 0x00, 0x01, 0x2C]);
        assert_eq!(
            Command::parse(&bytes).unwrap(),
            Command::UpdateBinary {
                offset: 2,
                data: &data
            }
        );
    }

    #[test]
    fn response_status_words() {
        let ok = Response::try_from([0x01, 0x02, 0x90, 0x00].as_slice()).unwrap();
        assert!(ok.is_ok());
        assert_eq!(ok.payload, vec![0x01, 0x02]);

        let unknown = Response::try_from([0x6A, 0x86].as_slice()).unwrap();
        assert!(!unknown.is_ok());
        assert_eq!(unknown.status, KnownOrRaw::Unknown(0x6A86));
        assert_eq!(unknown.to_bytes(), vec![0x6A, 0x86]);

        assert_eq!(
            Response::try_from([0x90].as_slice()).unwrap_err(),
            ApduError::ResponseTooShort(1)
        );
    }

    #[test]
    fn rejects_unsupported_instruction() {
        assert_eq!(
            Command::parse(&[0x00, 0xCA, 0x00, 0x00]).unwrap_err(),
            ApduError::UnsupportedInstruction(0xCA)
        );
    }
}
