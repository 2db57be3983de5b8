use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use ciborium::Value;

use isomdl_engagement::definitions::ConnectionMethod;
use isomdl_engagement::engagement::{
    ConnectionMethodSelector, EngagementObserver, EngagementState,
};
use isomdl_engagement::nfc::apdu::{
    Command, FileId, Response, StatusWord, AID_NDEF_APPLICATION,
};
use isomdl_engagement::nfc::{DecodedHandover, HandoverCodec, KnownOrRaw};
use isomdl_engagement::tag::{
    ExecutionContext, ScanError, TagError, TagHandle, TagInteraction, TagScanner,
};
use isomdl_engagement::transport::TransportError;

#[allow(dead_code)]
fn main() {}

pub const SERVICE_PARAMETER: &[u8] = b"Tp";
pub const SERVICE_SELECT: &[u8] = b"Ts";
pub const SERVICE_STATUS_OK: &[u8] = b"Te\x00";

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Test NDEF layer: handover messages are `[device engagement, [methods...]]` in CBOR.
pub fn encode_handover(
    encoded_device_engagement: &[u8],
    methods: &[ConnectionMethod],
) -> Result<Vec<u8>> {
    encode(&Value::Array(vec![
        Value::Bytes(encoded_device_engagement.to_vec()),
        Value::Array(methods.iter().cloned().map(Value::from).collect()),
    ]))
}

pub fn decode_handover(message: &[u8]) -> Result<DecodedHandover> {
    let value: Value = ciborium::from_reader(message).context("handover is not CBOR")?;
    let Value::Array(mut items) = value else {
        bail!("handover is not an array")
    };
    ensure!(items.len() == 2, "handover has {} items", items.len());
    let (Value::Bytes(encoded_device_engagement), Value::Array(methods)) =
        (items.remove(0), items.remove(0))
    else {
        bail!("unexpected handover layout")
    };
    let connection_methods = methods
        .into_iter()
        .map(ConnectionMethod::try_from)
        .collect::<Result<_, _>>()?;
    Ok(DecodedHandover {
        encoded_device_engagement,
        connection_methods,
    })
}

#[derive(Debug, Default)]
pub struct CborHandoverCodec;

impl HandoverCodec for CborHandoverCodec {
    fn decode_static_handover_select(&self, message: &[u8]) -> Result<DecodedHandover> {
        decode_handover(message)
    }

    fn service_select(&self, service_parameter: &[u8]) -> Result<Vec<u8>> {
        ensure!(service_parameter == SERVICE_PARAMETER, "unknown service");
        Ok(SERVICE_SELECT.to_vec())
    }

    fn check_service_status(&self, status: &[u8]) -> Result<()> {
        ensure!(status == SERVICE_STATUS_OK, "service selection failed");
        Ok(())
    }

    fn handover_request(&self, offered: &[ConnectionMethod]) -> Result<Vec<u8>> {
        encode_handover(&[], offered)
    }

    fn decode_negotiated_handover_select(
        &self,
        message: &[u8],
        _handover_request: &[u8],
    ) -> Result<DecodedHandover> {
        decode_handover(message)
    }
}

type Responder = Box<dyn Fn(&[ConnectionMethod]) -> Vec<ConnectionMethod> + Send + Sync>;

#[derive(Default)]
struct TagState {
    selected: Option<FileId>,
    file: Vec<u8>,
    completed_writes: usize,
    transceived: usize,
}

/// The holder's side of the exchange: an NFC Forum Type 4 Tag carrying the handover.
pub struct EmulatedTag {
    capability_container: Vec<u8>,
    encoded_device_engagement: Vec<u8>,
    responder: Option<Responder>,
    lose_after: Option<usize>,
    state: Mutex<TagState>,
    offered: Mutex<Option<Vec<ConnectionMethod>>>,
    released: AtomicUsize,
}

fn capability_container(write_access: u8) -> Vec<u8> {
    let mut cc = hex::decode("000f207fff7fff0406e1047fff00").unwrap();
    cc.push(write_access);
    cc
}

fn ndef_file(message: &[u8]) -> Vec<u8> {
    [&(message.len() as u16).to_be_bytes(), message].concat()
}

#[allow(dead_code)]
impl EmulatedTag {
    /// A tag with a fixed Handover Select listing `methods`.
    pub fn static_handover(encoded_device_engagement: &[u8], methods: &[ConnectionMethod]) -> Self {
        let hs = encode_handover(encoded_device_engagement, methods).unwrap();
        Self::new(capability_container(0xFF), encoded_device_engagement, None, ndef_file(&hs))
    }

    /// A tag running TNEP; `responder` picks the methods of the Handover Select out of those
    /// offered in the Handover Request.
    pub fn negotiated_handover(
        encoded_device_engagement: &[u8],
        responder: impl Fn(&[ConnectionMethod]) -> Vec<ConnectionMethod> + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            capability_container(0x00),
            encoded_device_engagement,
            Some(Box::new(responder)),
            ndef_file(SERVICE_PARAMETER),
        )
    }

    fn new(
        capability_container: Vec<u8>,
        encoded_device_engagement: &[u8],
        responder: Option<Responder>,
        file: Vec<u8>,
    ) -> Self {
        Self {
            capability_container,
            encoded_device_engagement: encoded_device_engagement.to_vec(),
            responder,
            lose_after: None,
            state: Mutex::new(TagState {
                file,
                ..Default::default()
            }),
            offered: Mutex::new(None),
            released: AtomicUsize::new(0),
        }
    }

    /// The tag leaves the field after `commands` commands.
    pub fn lost_after(mut self, commands: usize) -> Self {
        self.lose_after = Some(commands);
        self
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn transceived(&self) -> usize {
        self.state.lock().unwrap().transceived
    }

    /// Methods the reader offered in its Handover Request.
    pub fn offered(&self) -> Option<Vec<ConnectionMethod>> {
        self.offered.lock().unwrap().clone()
    }

    fn process(&self, state: &mut TagState, command: &[u8]) -> Response {
        let Ok(command) = Command::parse(command) else {
            return StatusWord::InstructionNotSupported.into();
        };
        match command {
            Command::SelectAid { aid, .. } if aid == AID_NDEF_APPLICATION => Response::ok(vec![]),
            Command::SelectAid { .. } => StatusWord::FileOrApplicationNotFound.into(),
            Command::SelectFile {
                file_id: KnownOrRaw::Known(file_id),
                ..
            } => {
                state.selected = Some(file_id);
                Response::ok(vec![])
            }
            Command::SelectFile { .. } => StatusWord::FileOrApplicationNotFound.into(),
            Command::ReadBinary { slice } => {
                let file = match state.selected {
                    Some(FileId::CapabilityContainer) => &self.capability_container,
                    Some(FileId::NdefFile) => &state.file,
                    None => return StatusWord::ConditionsNotSatisfied.into(),
                };
                match file.get(slice) {
                    Some(bytes) => Response::ok(bytes.to_vec()),
                    None => StatusWord::IncorrectLength.into(),
                }
            }
            Command::UpdateBinary { offset, data } => {
                if state.selected != Some(FileId::NdefFile) || self.responder.is_none() {
                    return StatusWord::ConditionsNotSatisfied.into();
                }
                let end = offset + data.len();
                if state.file.len() < end {
                    state.file.resize(end, 0);
                }
                state.file[offset..end].copy_from_slice(data);
                let nlen = u16::from_be_bytes([state.file[0], state.file[1]]) as usize;
                if offset == 0 && nlen != 0 {
                    let message = state.file[2..2 + nlen].to_vec();
                    self.on_message(state, &message);
                }
                Response::ok(vec![])
            }
        }
    }

    fn on_message(&self, state: &mut TagState, message: &[u8]) {
        state.completed_writes += 1;
        let reply = match state.completed_writes {
            1 if message == SERVICE_SELECT => SERVICE_STATUS_OK.to_vec(),
            2 => {
                let offered = decode_handover(message).unwrap().connection_methods;
                let selected = self.responder.as_ref().map(|r| r(&offered)).unwrap_or_default();
                *self.offered.lock().unwrap() = Some(offered);
                encode_handover(&self.encoded_device_engagement, &selected).unwrap()
            }
            _ => b"Te\x01".to_vec(),
        };
        state.file = ndef_file(&reply);
    }
}

impl fmt::Debug for EmulatedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedTag")
            .field("negotiated", &self.responder.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TagHandle for EmulatedTag {
    async fn transceive(&self, command: Vec<u8>) -> Result<Vec<u8>, TagError> {
        let mut state = self.state.lock().unwrap();
        state.transceived += 1;
        if self.lose_after.is_some_and(|n| state.transceived > n) {
            return Err(TagError::TagLost);
        }
        Ok(self.process(&mut state, &command).to_bytes())
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
pub enum Presentment {
    Tag(Arc<EmulatedTag>),
    Dismiss,
    Fail(TagError),
}

/// Presents tags in order; running out of presentments counts as a dismissal.
#[derive(Default)]
pub struct ScriptedScanner {
    presentments: Mutex<VecDeque<Presentment>>,
    prompts: Mutex<Vec<String>>,
    interactions: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedScanner {
    pub fn new(presentments: impl IntoIterator<Item = Presentment>) -> Self {
        Self {
            presentments: Mutex::new(presentments.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn interactions(&self) -> usize {
        self.interactions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagScanner for ScriptedScanner {
    async fn scan<T: Send + 'static>(
        &self,
        prompt: &str,
        interaction: &dyn TagInteraction<T>,
        _context: &ExecutionContext,
    ) -> Result<T, ScanError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        loop {
            // the user needs a moment to bring the devices together
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            let next = self.presentments.lock().unwrap().pop_front();
            match next {
                Some(Presentment::Tag(tag)) => {
                    self.interactions.fetch_add(1, Ordering::SeqCst);
                    if let Some(value) = interaction.on_tag(tag).await? {
                        return Ok(value);
                    }
                }
                Some(Presentment::Fail(e)) => return Err(e.into()),
                Some(Presentment::Dismiss) | None => return Err(ScanError::Dismissed),
            }
        }
    }
}

/// Keeps the prompt up forever.
#[allow(dead_code)]
pub struct HangingScanner;

#[async_trait]
impl TagScanner for HangingScanner {
    async fn scan<T: Send + 'static>(
        &self,
        _prompt: &str,
        _interaction: &dyn TagInteraction<T>,
        _context: &ExecutionContext,
    ) -> Result<T, ScanError> {
        std::future::pending().await
    }
}

type Pick = Box<dyn Fn(&[ConnectionMethod]) -> Option<ConnectionMethod> + Send + Sync>;

pub struct RecordingSelector {
    pick: Pick,
    calls: Mutex<Vec<Vec<ConnectionMethod>>>,
}

#[allow(dead_code)]
impl RecordingSelector {
    pub fn new(
        pick: impl Fn(&[ConnectionMethod]) -> Option<ConnectionMethod> + Send + Sync + 'static,
    ) -> Self {
        Self {
            pick: Box::new(pick),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<ConnectionMethod>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionMethodSelector for RecordingSelector {
    async fn select(&self, methods: &[ConnectionMethod]) -> Option<ConnectionMethod> {
        self.calls.lock().unwrap().push(methods.to_vec());
        (self.pick)(methods)
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<EngagementState>>,
    pub dropped: Mutex<Vec<ConnectionMethod>>,
    pub closed: Mutex<Vec<ConnectionMethod>>,
    pub adopted: Mutex<Vec<(ConnectionMethod, bool)>>,
}

impl EngagementObserver for RecordingObserver {
    fn state_changed(&self, _from: EngagementState, to: EngagementState) {
        self.states.lock().unwrap().push(to);
    }

    fn candidate_dropped(&self, method: &ConnectionMethod, _error: &TransportError) {
        self.dropped.lock().unwrap().push(method.clone());
    }

    fn transport_adopted(&self, method: &ConnectionMethod, fresh: bool) {
        self.adopted.lock().unwrap().push((method.clone(), fresh));
    }

    fn transport_closed(&self, method: &ConnectionMethod) {
        self.closed.lock().unwrap().push(method.clone());
    }
}
