// Frame reader: exact reads over a unary payload or a stream of proxy response frames.
use bytes::{Bytes, BytesMut};
use std::pin::Pin;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::classify::Classifier;
use crate::core::envelope::ProxyResponse;
use crate::core::error::Error;
use crate::core::frame::{self, PROTO_HEADER_LEN, ProtoHeader};

pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<ProxyResponse, tonic::Status>> + Send + 'static>>;

/// Result of pulling one frame: either more bytes were buffered, or the
/// terminal frame was already consumed and the logical response is complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameOutcome {
    Frame,
    EndOfStream,
}

/// Per-call limits observed before every suspension point.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
    pub is_write: bool,
}

impl CallContext {
    pub fn new(deadline: Option<Instant>, is_write: bool) -> Self {
        Self {
            deadline,
            cancel: None,
            is_write,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn check_cancelled(&self, classifier: &Classifier) -> Result<(), Error> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(classifier.cancelled()),
            _ => Ok(()),
        }
    }
}

pub struct FrameReader<S> {
    stream: S,
    buffer: BytesMut,
    offset: u64,
    frames: u64,
    terminal_seen: bool,
    context: CallContext,
    classifier: Classifier,
}

impl<S> FrameReader<S>
where
    S: Stream<Item = Result<ProxyResponse, tonic::Status>> + Unpin,
{
    pub fn new(stream: S, context: CallContext, classifier: Classifier) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            offset: 0,
            frames: 0,
            terminal_seen: false,
            context,
            classifier,
        }
    }

    /// Logical bytes consumed so far across all frames.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_seen
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Buffers the next frame's payload.
    ///
    /// Returns `EndOfStream` once the terminal frame has been consumed. A
    /// transport error, a non-zero embedded status, or a stream that closes
    /// before its terminal frame are all errors.
    pub async fn next_frame(&mut self) -> Result<FrameOutcome, Error> {
        if self.terminal_seen {
            return Ok(FrameOutcome::EndOfStream);
        }
        let is_write = self.context.is_write;
        match self.fetch().await? {
            None => Err(Error::parse(format!(
                "stream closed after {} frames without a terminal frame",
                self.frames
            ))),
            Some(Err(status)) => Err(self.classifier.classify_status(&status, is_write)),
            Some(Ok(response)) => {
                self.frames += 1;
                if !response.has_next {
                    self.terminal_seen = true;
                }
                if response.status != 0 {
                    return Err(self.classifier.classify_envelope(
                        response.status,
                        response.in_doubt,
                        is_write,
                    ));
                }
                self.buffer.extend_from_slice(&response.payload);
                Ok(FrameOutcome::Frame)
            }
        }
    }

    /// Reads exactly `n` bytes, pulling frames as needed. Never returns short.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes, Error> {
        while self.buffer.len() < n {
            if self.next_frame().await? == FrameOutcome::EndOfStream {
                return Err(Error::parse(format!(
                    "stream ended {} bytes short of a {n} byte read at offset {}",
                    n - self.buffer.len(),
                    self.offset
                )));
            }
        }
        self.offset += n as u64;
        Ok(self.buffer.split_to(n).freeze())
    }

    /// True when no buffered bytes remain and the terminal frame is consumed.
    pub async fn at_end(&mut self) -> Result<bool, Error> {
        while self.buffer.is_empty() {
            if self.next_frame().await? == FrameOutcome::EndOfStream {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reads the next native message group body, decompressed.
    pub async fn read_group(&mut self) -> Result<Option<Bytes>, Error> {
        if self.at_end().await? {
            return Ok(None);
        }
        let header = ProtoHeader::decode(&self.read_exact(PROTO_HEADER_LEN).await?)?;
        let body = self.read_exact(header.size as usize).await?;
        frame::unwrap_group(header, body).map(Some)
    }

    /// Consumes remaining frames up to the terminal one, discarding payloads.
    pub async fn drain(&mut self) -> Result<(), Error> {
        loop {
            self.offset += self.buffer.len() as u64;
            self.buffer.clear();
            if self.next_frame().await? == FrameOutcome::EndOfStream {
                return Ok(());
            }
        }
    }

    async fn fetch(&mut self) -> Result<Option<Result<ProxyResponse, tonic::Status>>, Error> {
        bounded(&self.context, &self.classifier, self.stream.next()).await
    }
}

/// Awaits `future` under the call's deadline and cancellation token.
pub async fn bounded<F>(
    context: &CallContext,
    classifier: &Classifier,
    future: F,
) -> Result<F::Output, Error>
where
    F: Future,
{
    context.check_cancelled(classifier)?;
    let limited = async {
        match context.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, future)
                .await
                .map_err(|_| classifier.timeout(context.is_write)),
            None => Ok(future.await),
        }
    };
    match &context.cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(classifier.cancelled()),
            item = limited => item,
        },
        None => limited.await,
    }
}

/// Reader over a single unary response.
pub fn unary_reader(
    response: ProxyResponse,
    context: CallContext,
    classifier: Classifier,
) -> FrameReader<tokio_stream::Once<Result<ProxyResponse, tonic::Status>>> {
    let mut response = response;
    response.has_next = false;
    FrameReader::new(tokio_stream::once(Ok(response)), context, classifier)
}
