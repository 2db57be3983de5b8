//! This module contains the [ConnectionMethod] type and its option structs.
//!
//! A [ConnectionMethod] describes one candidate data-transfer channel between the reader and the
//! holder. Methods come either from the reader's static configuration (before a tag is seen) or
//! from the decoded handover payload (after the tag interaction), and two methods name the same
//! channel exactly when they are structurally equal.
//!
//! The module also provides conversions between [ConnectionMethod] and the ISO 18013-5
//! `DeviceRetrievalMethod` CBOR array, and the list utilities used during warm-up and selection.
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TRANSPORT_TYPE_NFC: u64 = 1;
pub const TRANSPORT_TYPE_BLE: u64 = 2;
pub const TRANSPORT_TYPE_WIFI_AWARE: u64 = 3;
pub const RETRIEVAL_METHOD_VERSION: u64 = 1;

/// Errors that can occur when converting a [ConnectionMethod] to or from CBOR.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Unsupported device retrieval method: {0}")]
    UnsupportedDRM(u64),
    #[error("Unsupported device retrieval method version: {0}")]
    UnsupportedVersion(u64),
    #[error("Malformed object not recognised")]
    Malformed,
    #[error("Invalid BleOptions found")]
    InvalidBleOptions,
    #[error("Invalid WifiAwareOptions found")]
    InvalidWifiAwareOptions,
    #[error("Invalid NfcOptions found")]
    InvalidNfcOptions,
    #[error("Could not serialize to cbor: {0}")]
    CborEncoding(String),
    #[error("Could not deserialize from cbor: {0}")]
    CborDecoding(String),
}

/// A candidate channel for the data-transfer phase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionMethod {
    /// Data keeps flowing over the NFC field used for engagement.
    Nfc(NfcOptions),

    /// Bluetooth Low Energy, in central client and/or peripheral server mode.
    Ble(BleOptions),

    /// Wi-Fi Aware (NAN).
    WifiAware(WifiAwareOptions),
}

/// Represents the options for `Bluetooth Low Energy` (BLE) data retrieval.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BleOptions {
    /// The peripheral server mode for `BLE` data retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peripheral_server_mode: Option<PeripheralServerMode>,

    /// The central client mode for `BLE` data retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_client_mode: Option<CentralClientMode>,
}

/// Represents a peripheral server mode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralServerMode {
    /// The 'UUID' of the peripheral server.
    pub uuid: Uuid,

    /// The 'BLE' device address of the peripheral server, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ble_device_address: Option<Vec<u8>>,
}

/// Represents the central client mode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CentralClientMode {
    pub uuid: Uuid,
}

/// Represents the options for a `Wi-Fi Aware` connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WifiAwareOptions {
    /// The passphrase for the connection. If [None], no passphrase is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_phrase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_info_operating_class: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_info_channel_number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band_info: Option<Vec<u8>>,
}

/// The maximum command and response data field lengths for NFC data retrieval,
/// ISO_18013-5 2021 Section 8.3.3.1.2.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NfcOptions {
    pub max_len_command_data_field: u64,
    pub max_len_response_data_field: u64,
}

impl NfcOptions {
    pub const MIN_COMMAND_DATA_LENGTH: u64 = 255;
    pub const MAX_COMMAND_DATA_LENGTH: u64 = 65535;
    pub const MIN_RESPONSE_DATA_LENGTH: u64 = 256;
    pub const MAX_RESPONSE_DATA_LENGTH: u64 = 65536;

    fn is_valid(&self) -> bool {
        (Self::MIN_COMMAND_DATA_LENGTH..=Self::MAX_COMMAND_DATA_LENGTH)
            .contains(&self.max_len_command_data_field)
            && (Self::MIN_RESPONSE_DATA_LENGTH..=Self::MAX_RESPONSE_DATA_LENGTH)
                .contains(&self.max_len_response_data_field)
    }
}

/// ISO_18013-5 2021 does not specify defaults, so we assume the minimum values.
impl Default for NfcOptions {
    fn default() -> Self {
        Self {
            max_len_command_data_field: Self::MIN_COMMAND_DATA_LENGTH,
            max_len_response_data_field: Self::MIN_RESPONSE_DATA_LENGTH,
        }
    }
}

impl ConnectionMethod {
    pub fn ble_central_client(uuid: Uuid) -> Self {
        ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: None,
            central_client_mode: Some(CentralClientMode { uuid }),
        })
    }

    pub fn ble_peripheral_server(uuid: Uuid) -> Self {
        ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid,
                ble_device_address: None,
            }),
            central_client_mode: None,
        })
    }

    pub fn version(&self) -> u64 {
        RETRIEVAL_METHOD_VERSION
    }

    pub fn transport_type(&self) -> u64 {
        match self {
            ConnectionMethod::Nfc(_) => TRANSPORT_TYPE_NFC,
            ConnectionMethod::Ble(_) => TRANSPORT_TYPE_BLE,
            ConnectionMethod::WifiAware(_) => TRANSPORT_TYPE_WIFI_AWARE,
        }
    }

    /// Encode as an ISO 18013-5 `DeviceRetrievalMethod`.
    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        ciborium::into_writer(&ciborium::Value::from(self.clone()), &mut buf)
            .map_err(|e| Error::CborEncoding(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, Error> {
        let value: ciborium::Value =
            ciborium::from_reader(bytes).map_err(|e| Error::CborDecoding(e.to_string()))?;
        Self::try_from(value)
    }

    /// Remove structural duplicates, keeping the first occurrence of each method.
    pub fn dedup(methods: impl IntoIterator<Item = ConnectionMethod>) -> Vec<ConnectionMethod> {
        let mut seen = HashSet::new();
        methods
            .into_iter()
            .filter(|method| seen.insert(method.clone()))
            .collect()
    }

    /// Split every BLE method that supports both modes into one method per mode, so that each
    /// entry names exactly one channel. The result is deduplicated.
    pub fn disambiguate(methods: impl IntoIterator<Item = ConnectionMethod>) -> Vec<ConnectionMethod> {
        let split = methods.into_iter().flat_map(|method| match method {
            ConnectionMethod::Ble(BleOptions {
                peripheral_server_mode: Some(peripheral),
                central_client_mode: Some(central),
            }) => vec![
                ConnectionMethod::Ble(BleOptions {
                    peripheral_server_mode: None,
                    central_client_mode: Some(central),
                }),
                ConnectionMethod::Ble(BleOptions {
                    peripheral_server_mode: Some(peripheral),
                    central_client_mode: None,
                }),
            ],
            other => vec![other],
        });
        Self::dedup(split)
    }

    /// Merge all BLE methods into a single method advertising every mode seen (the first method
    /// offering a mode wins). The merged method takes the position of the first BLE method.
    pub fn combine(methods: impl IntoIterator<Item = ConnectionMethod>) -> Vec<ConnectionMethod> {
        let mut combined: Vec<ConnectionMethod> = Vec::new();
        let mut ble_index: Option<usize> = None;
        for method in Self::dedup(methods) {
            match method {
                ConnectionMethod::Ble(options) => match ble_index {
                    Some(index) => {
                        if let ConnectionMethod::Ble(merged) = &mut combined[index] {
                            if merged.central_client_mode.is_none() {
                                merged.central_client_mode = options.central_client_mode;
                            }
                            if merged.peripheral_server_mode.is_none() {
                                merged.peripheral_server_mode = options.peripheral_server_mode;
                            }
                        }
                    }
                    None => {
                        ble_index = Some(combined.len());
                        combined.push(ConnectionMethod::Ble(options));
                    }
                },
                other => combined.push(other),
            }
        }
        combined
    }
}

impl fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMethod::Nfc(options) => write!(
                f,
                "NFC (command {} / response {})",
                options.max_len_command_data_field, options.max_len_response_data_field
            ),
            ConnectionMethod::Ble(options) => {
                write!(f, "BLE")?;
                if let Some(central) = &options.central_client_mode {
                    write!(f, " central client mode {}", central.uuid)?;
                }
                if let Some(peripheral) = &options.peripheral_server_mode {
                    write!(f, " peripheral server mode {}", peripheral.uuid)?;
                }
                Ok(())
            }
            ConnectionMethod::WifiAware(options) => match options.channel_info_channel_number {
                Some(channel) => write!(f, "Wi-Fi Aware (channel {channel})"),
                None => write!(f, "Wi-Fi Aware"),
            },
        }
    }
}

fn integer_map(v: ciborium::Value, err: Error) -> Result<BTreeMap<i128, ciborium::Value>, Error> {
    let ciborium::Value::Map(map) = v else {
        return Err(err);
    };
    map.into_iter()
        .map(|(k, v)| {
            let k: i128 = k.into_integer().map_err(|_| err.clone())?.into();
            Ok((k, v))
        })
        .collect()
}

fn key(k: i64) -> ciborium::Value {
    ciborium::Value::Integer(k.into())
}

fn as_u64(v: &ciborium::Value) -> Option<u64> {
    v.as_integer().and_then(|i| u64::try_from(i).ok())
}

fn uuid_from(v: ciborium::Value, err: Error) -> Result<Uuid, Error> {
    match v {
        ciborium::Value::Bytes(bytes) => {
            let bytes: [u8; 16] = bytes.try_into().map_err(|_| err)?;
            Ok(Uuid::from_bytes(bytes))
        }
        _ => Err(err),
    }
}

impl TryFrom<ciborium::Value> for ConnectionMethod {
    type Error = Error;

    fn try_from(value: ciborium::Value) -> Result<Self, Self::Error> {
        let ciborium::Value::Array(list) = value else {
            return Err(Error::Malformed);
        };
        let [transport_type, version, options]: [ciborium::Value; 3] =
            list.try_into().map_err(|_| Error::Malformed)?;
        let transport_type = as_u64(&transport_type).ok_or(Error::Malformed)?;
        let version = as_u64(&version).ok_or(Error::Malformed)?;
        if version != RETRIEVAL_METHOD_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        match transport_type {
            TRANSPORT_TYPE_NFC => Ok(ConnectionMethod::Nfc(NfcOptions::try_from(options)?)),
            TRANSPORT_TYPE_BLE => Ok(ConnectionMethod::Ble(BleOptions::try_from(options)?)),
            TRANSPORT_TYPE_WIFI_AWARE => Ok(ConnectionMethod::WifiAware(
                WifiAwareOptions::try_from(options)?,
            )),
            other => Err(Error::UnsupportedDRM(other)),
        }
    }
}

impl From<ConnectionMethod> for ciborium::Value {
    fn from(method: ConnectionMethod) -> Self {
        let transport_type = method.transport_type().into();
        let version = method.version().into();
        let options = match method {
            ConnectionMethod::Nfc(opts) => opts.into(),
            ConnectionMethod::Ble(opts) => opts.into(),
            ConnectionMethod::WifiAware(opts) => opts.into(),
        };
        ciborium::Value::Array(vec![transport_type, version, options])
    }
}

impl TryFrom<ciborium::Value> for BleOptions {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Self, Error> {
        let mut map = integer_map(v, Error::InvalidBleOptions)?;

        let central_client_mode = match (map.remove(&1), map.remove(&11)) {
            (Some(ciborium::Value::Bool(true)), Some(uuid)) => Some(CentralClientMode {
                uuid: uuid_from(uuid, Error::InvalidBleOptions)?,
            }),
            (Some(ciborium::Value::Bool(false)), _) => None,
            _ => return Err(Error::InvalidBleOptions),
        };

        let peripheral_server_mode = match (map.remove(&0), map.remove(&10)) {
            (Some(ciborium::Value::Bool(true)), Some(uuid)) => {
                let ble_device_address = match map.remove(&20) {
                    Some(ciborium::Value::Bytes(address)) => Some(address),
                    Some(_) => return Err(Error::InvalidBleOptions),
                    None => None,
                };
                Some(PeripheralServerMode {
                    uuid: uuid_from(uuid, Error::InvalidBleOptions)?,
                    ble_device_address,
                })
            }
            (Some(ciborium::Value::Bool(false)), _) => None,
            _ => return Err(Error::InvalidBleOptions),
        };

        Ok(BleOptions {
            peripheral_server_mode,
            central_client_mode,
        })
    }
}

impl From<BleOptions> for ciborium::Value {
    fn from(o: BleOptions) -> ciborium::Value {
        let mut map = vec![];

        match o.peripheral_server_mode {
            Some(PeripheralServerMode {
                uuid,
                ble_device_address,
            }) => {
                map.push((key(0), ciborium::Value::Bool(true)));
                map.push((key(10), ciborium::Value::Bytes(uuid.as_bytes().to_vec())));
                if let Some(address) = ble_device_address {
                    map.push((key(20), ciborium::Value::Bytes(address)));
                }
            }
            None => map.push((key(0), ciborium::Value::Bool(false))),
        }

        match o.central_client_mode {
            Some(CentralClientMode { uuid }) => {
                map.push((key(1), ciborium::Value::Bool(true)));
                map.push((key(11), ciborium::Value::Bytes(uuid.as_bytes().to_vec())));
            }
            None => map.push((key(1), ciborium::Value::Bool(false))),
        }

        ciborium::Value::Map(map)
    }
}

impl TryFrom<ciborium::Value> for WifiAwareOptions {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Self, Error> {
        let mut map = integer_map(v, Error::InvalidWifiAwareOptions)?;

        let pass_phrase = match map.remove(&0) {
            Some(ciborium::Value::Text(s)) => Some(s),
            Some(_) => return Err(Error::InvalidWifiAwareOptions),
            None => None,
        };
        let lookup_u64 = |value: Option<ciborium::Value>| match value {
            Some(v) => as_u64(&v).map(Some).ok_or(Error::InvalidWifiAwareOptions),
            None => Ok(None),
        };
        let channel_info_operating_class = lookup_u64(map.remove(&1))?;
        let channel_info_channel_number = lookup_u64(map.remove(&2))?;
        let band_info = match map.remove(&3) {
            Some(ciborium::Value::Bytes(b)) => Some(b),
            Some(_) => return Err(Error::InvalidWifiAwareOptions),
            None => None,
        };

        Ok(WifiAwareOptions {
            pass_phrase,
            channel_info_operating_class,
            channel_info_channel_number,
            band_info,
        })
    }
}

impl From<WifiAwareOptions> for ciborium::Value {
    fn from(o: WifiAwareOptions) -> ciborium::Value {
        let mut map = vec![];
        if let Some(v) = o.pass_phrase {
            map.push((key(0), ciborium::Value::Text(v)));
        }
        if let Some(v) = o.channel_info_operating_class {
            map.push((key(1), v.into()));
        }
        if let Some(v) = o.channel_info_channel_number {
            map.push((key(2), v.into()));
        }
        if let Some(v) = o.band_info {
            map.push((key(3), ciborium::Value::Bytes(v)));
        }
        ciborium::Value::Map(map)
    }
}

impl TryFrom<ciborium::Value> for NfcOptions {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Self, Error> {
        let map = integer_map(v, Error::InvalidNfcOptions)?;
        let field = |key: i128| {
            map.get(&key)
                .and_then(as_u64)
                .ok_or(Error::InvalidNfcOptions)
        };
        let options = NfcOptions {
            max_len_command_data_field: field(0)?,
            max_len_response_data_field: field(1)?,
        };
        if !options.is_valid() {
            return Err(Error::InvalidNfcOptions);
        }
        Ok(options)
    }
}

impl From<NfcOptions> for ciborium::Value {
    fn from(o: NfcOptions) -> ciborium::Value {
        ciborium::Value::Map(vec![
            (key(0), o.max_len_command_data_field.into()),
            (key(1), o.max_len_response_data_field.into()),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn central() -> ConnectionMethod {
        ConnectionMethod::ble_central_client(Uuid::from_u128(0x43bc2a67_bf79_7ab0_404d_a09e0e2e81e0))
    }

    fn peripheral() -> ConnectionMethod {
        ConnectionMethod::ble_peripheral_server(Uuid::from_u128(
            0x7d918ae0_046d_4573_aeca_ce8949d23c3c,
        ))
    }

    fn wifi() -> ConnectionMethod {
        ConnectionMethod::WifiAware(WifiAwareOptions {
            pass_phrase: Some(String::from("secret")),
            channel_info_operating_class: Some(81),
            channel_info_channel_number: Some(6),
            band_info: Some(vec![0x01, 0x02]),
        })
    }

    #[test]
    fn structural_equality_names_the_same_channel() {
        assert_eq!(central(), central());
        assert_ne!(central(), peripheral());
        assert_ne!(
            ConnectionMethod::ble_central_client(Uuid::nil()),
            ConnectionMethod::ble_peripheral_server(Uuid::nil())
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let methods = vec![central(), wifi(), central(), peripheral(), wifi()];
        assert_eq!(
            ConnectionMethod::dedup(methods),
            vec![central(), wifi(), peripheral()]
        );
    }

    #[test]
    fn disambiguate_splits_dual_mode_ble() {
        let ConnectionMethod::Ble(c) = central() else {
            unreachable!()
        };
        let ConnectionMethod::Ble(p) = peripheral() else {
            unreachable!()
        };
        let dual = ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: p.peripheral_server_mode,
            central_client_mode: c.central_client_mode,
        });
        assert_eq!(
            ConnectionMethod::disambiguate(vec![dual, wifi(), central()]),
            vec![central(), peripheral(), wifi()]
        );
    }

    #[test]
    fn combine_merges_ble_modes() {
        let combined = ConnectionMethod::combine(vec![wifi(), central(), peripheral()]);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0], wifi());
        let ConnectionMethod::Ble(options) = &combined[1] else {
            panic!("expected a BLE method, got {}", combined[1]);
        };
        assert!(options.central_client_mode.is_some());
        assert!(options.peripheral_server_mode.is_some());
        assert_eq!(ConnectionMethod::disambiguate(combined), vec![wifi(), central(), peripheral()]);
    }

    #[test]
    fn device_retrieval_method_cbor() {
        for method in [central(), peripheral(), wifi(), ConnectionMethod::Nfc(NfcOptions::default())] {
            let bytes = method.to_cbor().unwrap();
            assert_eq!(ConnectionMethod::from_cbor(&bytes).unwrap(), method);
        }
    }

    #[test]
    fn central_client_mode_wire_layout() {
        // [2, 1, {0: false, 1: true, 11: h'43bc...'}]
        let bytes = central().to_cbor().unwrap();
        assert_eq!(&bytes[..8], &[0x83, 0x02, 0x01, 0xa3, 0x00, 0xf4, 0x01, 0xf5]);
    }

    #[test]
    fn rejects_unknown_transport_type() {
        let value = ciborium::Value::Array(vec![
            key(9),
            key(1),
            ciborium::Value::Map(vec![]),
        ]);
        assert_eq!(
            ConnectionMethod::try_from(value).unwrap_err(),
            Error::UnsupportedDRM(9)
        );
    }

    #[test]
    fn rejects_out_of_range_nfc_options() {
        let value = ciborium::Value::Map(vec![(key(0), key(10)), (key(1), key(256))]);
        assert_eq!(
            NfcOptions::try_from(value).unwrap_err(),
            Error::InvalidNfcOptions
        );
    }

    #[test]
    fn json_configuration_form() {
        let json = r#"{"type":"ble","central_client_mode":{"uuid":"43bc2a67-bf79-7ab0-404d-a09e0e2e81e0"}}"#;
        let method: ConnectionMethod = serde_json::from_str(json).unwrap();
        assert_eq!(method, central());
    }
}
