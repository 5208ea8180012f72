// Shared scripted transport and native row builders for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tokio_stream::StreamExt;
use tonic::Status;

use kvgate::api::{
    BatchPolicy, BatchRecord, CallKind, ClientConfig, Command, Error, Framer, Key, ProxyClient,
    ProxyTransport, Value,
};
use kvgate::core::cursor::ResponseStream;
use kvgate::core::decoder::{
    FIELD_DIGEST, FIELD_KEY, FIELD_NAMESPACE, FIELD_SET, INFO3_LAST, INFO3_PARTITION_DONE,
    MSG_HEADER_LEN,
};
use kvgate::core::envelope::{AuthRequest, AuthResponse, ProxyRequest, ProxyResponse};
use kvgate::core::frame::{MSG_TYPE_MESSAGE, ProtoHeader};

pub enum Reply {
    Respond(Result<ProxyResponse, Status>),
    Hang,
}

pub enum StreamReply {
    Open(Vec<Result<ProxyResponse, Status>>),
    /// Delivers the frames, then never yields again.
    Stall(Vec<Result<ProxyResponse, Status>>),
    Refuse(Status),
}

#[derive(Clone, Debug)]
pub struct Recorded {
    pub kind: CallKind,
    pub message: ProxyRequest,
    pub authorization: Option<String>,
    pub client_version: Option<String>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    unary: Mutex<VecDeque<Reply>>,
    streams: Mutex<VecDeque<StreamReply>>,
    tokens: Mutex<VecDeque<Result<String, Status>>>,
    requests: Mutex<Vec<Recorded>>,
    auth_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, response: ProxyResponse) {
        self.push_unary(Reply::Respond(Ok(response)));
    }

    pub fn fail(&self, status: Status) {
        self.push_unary(Reply::Respond(Err(status)));
    }

    pub fn hang(&self) {
        self.push_unary(Reply::Hang);
    }

    pub fn push_unary(&self, reply: Reply) {
        self.unary.lock().expect("unary lock").push_back(reply);
    }

    pub fn push_stream(&self, reply: StreamReply) {
        self.streams.lock().expect("stream lock").push_back(reply);
    }

    pub fn push_token(&self, token: Result<String, Status>) {
        self.tokens.lock().expect("token lock").push_back(token);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("request lock").clone()
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    fn record(&self, kind: CallKind, request: tonic::Request<ProxyRequest>) {
        let header = |name: &str| {
            request
                .metadata()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let recorded = Recorded {
            kind,
            authorization: header("authorization"),
            client_version: header(kvgate::api::CLIENT_VERSION_HEADER),
            message: request.get_ref().clone(),
        };
        self.requests.lock().expect("request lock").push(recorded);
    }
}

#[async_trait]
impl ProxyTransport for ScriptedTransport {
    async fn unary(
        &self,
        kind: CallKind,
        request: tonic::Request<ProxyRequest>,
    ) -> Result<ProxyResponse, Status> {
        self.record(kind, request);
        let reply = self.unary.lock().expect("unary lock").pop_front();
        match reply {
            Some(Reply::Respond(result)) => result,
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(Status::internal("no scripted unary reply")),
        }
    }

    async fn server_stream(
        &self,
        kind: CallKind,
        request: tonic::Request<ProxyRequest>,
    ) -> Result<ResponseStream, Status> {
        self.record(kind, request);
        let reply = self.streams.lock().expect("stream lock").pop_front();
        match reply {
            Some(StreamReply::Open(frames)) => Ok(Box::pin(tokio_stream::iter(frames))),
            Some(StreamReply::Stall(frames)) => Ok(Box::pin(
                tokio_stream::iter(frames).chain(tokio_stream::pending()),
            )),
            Some(StreamReply::Refuse(status)) => Err(status),
            None => Err(Status::internal("no scripted stream")),
        }
    }

    async fn authenticate(
        &self,
        _request: tonic::Request<AuthRequest>,
    ) -> Result<AuthResponse, Status> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        let token = self.tokens.lock().expect("token lock").pop_front();
        match token {
            Some(result) => result.map(|token| AuthResponse { token }),
            None => Err(Status::unavailable("no scripted token")),
        }
    }
}

/// Framer stand-in; request bytes are opaque to everything under test.
pub struct StubFramer;

impl Framer for StubFramer {
    fn encode_command(&self, _command: &Command<'_>) -> Result<Vec<u8>, Error> {
        Ok(b"command".to_vec())
    }

    fn encode_batch(&self, _policy: &BatchPolicy, records: &[BatchRecord]) -> Result<Vec<u8>, Error> {
        Ok(vec![0; records.len()])
    }

    fn pack_value(&self, value: &Value) -> Result<Vec<u8>, Error> {
        Ok(match value {
            Value::Int(value) => value.to_be_bytes().to_vec(),
            Value::String(value) => value.as_bytes().to_vec(),
            _ => Vec::new(),
        })
    }
}

pub fn client(transport: &Arc<ScriptedTransport>) -> ProxyClient {
    client_with(transport, ClientConfig::default())
}

pub fn client_with(transport: &Arc<ScriptedTransport>, config: ClientConfig) -> ProxyClient {
    ProxyClient::new(transport.clone(), Arc::new(StubFramer), config).expect("client")
}

pub fn key(user_key: i64) -> Key {
    Key::new("test", "demo", user_key)
}

/// Unsigned token whose claims span `iat..exp`.
pub fn token(iat: i64, exp: i64) -> String {
    let claims = format!(r#"{{"iat":{iat},"exp":{exp}}}"#);
    format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(claims))
}

pub type Particle = (u8, Vec<u8>);

pub fn int(value: i64) -> Particle {
    (1, value.to_be_bytes().to_vec())
}

pub fn string(value: &str) -> Particle {
    (3, value.as_bytes().to_vec())
}

#[derive(Clone, Debug, Default)]
pub struct Row {
    info3: u8,
    result_code: u8,
    generation: u32,
    expiration: u32,
    batch_index: u32,
    fields: Vec<(u8, Vec<u8>)>,
    ops: Vec<(String, Particle)>,
}

impl Row {
    pub fn ok(generation: u32, expiration: u32) -> Self {
        Self {
            generation,
            expiration,
            ..Self::default()
        }
    }

    pub fn code(result_code: i32) -> Self {
        Self {
            result_code: result_code as u8,
            ..Self::default()
        }
    }

    pub fn last() -> Self {
        Self {
            info3: INFO3_LAST,
            ..Self::default()
        }
    }

    pub fn partition_done(partition: u32, result_code: i32) -> Self {
        Self {
            info3: INFO3_PARTITION_DONE,
            result_code: result_code as u8,
            generation: partition,
            ..Self::default()
        }
    }

    pub fn index(mut self, index: u32) -> Self {
        self.batch_index = index;
        self
    }

    pub fn namespace(self, namespace: &str) -> Self {
        self.field(FIELD_NAMESPACE, namespace.as_bytes().to_vec())
    }

    pub fn set(self, set_name: &str) -> Self {
        self.field(FIELD_SET, set_name.as_bytes().to_vec())
    }

    /// Digest whose partition id is `partition`.
    pub fn partition(self, partition: u16) -> Self {
        let mut digest = [0u8; 20];
        digest[..2].copy_from_slice(&partition.to_le_bytes());
        self.field(FIELD_DIGEST, digest.to_vec())
    }

    pub fn user_key(self, (particle, bytes): Particle) -> Self {
        let mut data = vec![particle];
        data.extend_from_slice(&bytes);
        self.field(FIELD_KEY, data)
    }

    fn field(mut self, field_type: u8, data: Vec<u8>) -> Self {
        self.fields.push((field_type, data));
        self
    }

    pub fn bin(mut self, name: &str, value: Particle) -> Self {
        self.ops.push((name.to_string(), value));
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![MSG_HEADER_LEN as u8, 0, 0, self.info3, 0, self.result_code];
        out.extend_from_slice(&self.generation.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.batch_index.to_be_bytes());
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.ops.len() as u16).to_be_bytes());
        for (field_type, data) in &self.fields {
            out.extend_from_slice(&(data.len() as u32 + 1).to_be_bytes());
            out.push(*field_type);
            out.extend_from_slice(data);
        }
        for (name, (particle, value)) in &self.ops {
            let size = 4 + name.len() + value.len();
            out.extend_from_slice(&(size as u32).to_be_bytes());
            out.extend_from_slice(&[1, *particle, 0, name.len() as u8]);
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(value);
        }
        out
    }
}

/// One message group holding every row.
pub fn group(rows: &[Row]) -> Vec<u8> {
    let body: Vec<u8> = rows.iter().flat_map(Row::encode).collect();
    let mut out = ProtoHeader::new(MSG_TYPE_MESSAGE, body.len() as u64)
        .encode()
        .to_vec();
    out.extend_from_slice(&body);
    out
}

pub fn message(row: Row) -> Vec<u8> {
    group(&[row])
}
