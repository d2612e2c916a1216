//! Protocol state machines behind a `Request`
//!
//! Every request owns exactly one `Handler`. The variants cover the ways a transfer can map onto
//! transport operations:
//!
//! - `Trivial`: one native token, fixed-size data.
//! - `SizedSend` / `SizedReceive`: a size announcement followed by the payload. The receiver only
//!   arms the payload receive once the announcement has arrived.
//! - `Probe`: no token at all until a matching message shows up; then a matched receive.
//! - `Batch`: several independent tokens completed together.
//!
//! A handler that finished, failed or was dropped becomes `Null`.

use std::fmt;
use std::mem;

use conv::ConvUtil;
use log::trace;
use smallvec::SmallVec;

use crate::datatype::Equivalence;
use crate::error::{Error, ErrorKind, Result, Routine};
use crate::point_to_point::Status;
use crate::topology::{payload_tag, Rank};
use crate::transport::{Completion, RawMessage, RawRequest, RawStatus, Transport, PROC_NULL, SUCCESS};
use crate::{Count, Tag};

/// Stores the bytes of a finished receive in the destination and returns the element count.
pub(crate) type Decoder<'a> = Box<dyn FnOnce(&[u8]) -> Result<Count> + 'a>;

fn kind_of(code: i32) -> ErrorKind {
    ErrorKind::from_code(code).unwrap_or(ErrorKind::Unknown)
}

/// The error class to report for a batch that failed as a whole: the first sub-operation that
/// neither succeeded nor is still pending.
pub(crate) fn first_failure(completions: &[Completion]) -> ErrorKind {
    completions
        .iter()
        .map(|completion| completion.status.error)
        .find(|&code| code != SUCCESS && code != ErrorKind::Pending.code())
        .map_or(ErrorKind::InStatus, kind_of)
}

fn batch_error(routine: &'static str, kind: ErrorKind, completions: &[Completion]) -> Error {
    match kind {
        ErrorKind::InStatus => Error::transport(routine, first_failure(completions)),
        kind => Error::transport(routine, kind),
    }
}

/// Where the result of a finished transfer goes
enum Sink<'a> {
    Sent(Count),
    Receive(Decoder<'a>),
    Spent,
}

impl<'a> Sink<'a> {
    fn complete(&mut self, routine: &'static str, completion: Completion) -> Result<Status> {
        let raw = completion.status;
        if raw.cancelled {
            return Ok(Status::from_raw(raw, 0));
        }
        if raw.error != SUCCESS {
            return Err(Error::transport(routine, kind_of(raw.error)));
        }
        match mem::replace(self, Sink::Spent) {
            Sink::Sent(count) => Ok(Status::from_raw(raw, count)),
            Sink::Receive(_) if raw.source == PROC_NULL => Ok(Status::from_raw(raw, 0)),
            Sink::Receive(decode) => {
                let count = decode(completion.buffer.as_deref().unwrap_or_default())?;
                Ok(Status::from_raw(raw, count))
            }
            Sink::Spent => {
                debug_assert!(false, "transfer completed twice");
                Ok(Status::from_raw(raw, 0))
            }
        }
    }
}

/// Announcement preceding the payload of a two-phase transfer: the payload length and the
/// sequence number selecting the payload tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SizeHeader {
    pub(crate) len: usize,
    pub(crate) sequence: u64,
}

impl SizeHeader {
    pub(crate) const LEN: usize = 16;

    pub(crate) fn to_bytes(self) -> Vec<u8> {
        let mut out = vec![0; SizeHeader::LEN];
        (self.len as u64).encode(&mut out);
        self.sequence.encode(&mut out[8..]);
        out
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<SizeHeader> {
        if bytes.len() != SizeHeader::LEN {
            return Err(Error::Layout {
                len: bytes.len(),
                size: SizeHeader::LEN,
            });
        }
        let len = u64::decode(bytes)?
            .value_as::<usize>()
            .map_err(|_| Error::transport("irecv", ErrorKind::Count))?;
        Ok(SizeHeader {
            len,
            sequence: u64::decode(&bytes[8..])?,
        })
    }

    pub(crate) fn payload_tag(self) -> Tag {
        payload_tag(self.sequence)
    }
}

pub(crate) struct Trivial<'a> {
    token: RawRequest,
    sink: Sink<'a>,
}

impl<'a> Trivial<'a> {
    fn test(&mut self, transport: &dyn Transport) -> Result<Option<Status>> {
        match transport.test(&mut self.token).routine("test")? {
            Some(completion) => self.sink.complete("test", completion).map(Some),
            None => Ok(None),
        }
    }

    fn wait(&mut self, transport: &dyn Transport) -> Result<Status> {
        let completion = transport.wait(&mut self.token).routine("wait")?;
        self.sink.complete("wait", completion)
    }
}

pub(crate) struct SizedSend {
    tokens: [RawRequest; 2],
    count: Count,
    /// Status of the announcement if a cancel attempt already completed it.
    announced: Option<RawStatus>,
}

impl SizedSend {
    fn status(&self, completions: &[Completion]) -> Status {
        let announcement = self
            .announced
            .or_else(|| completions.first().map(|c| c.status))
            .unwrap_or(RawStatus::EMPTY);
        let cancelled = announcement.cancelled
            || completions.iter().any(|completion| completion.status.cancelled);
        let len = completions.get(1).map_or(0, |c| c.status.len);
        let count = if cancelled { 0 } else { self.count };
        Status::from_raw(
            RawStatus {
                len,
                cancelled,
                ..announcement
            },
            count,
        )
    }

    fn test(&mut self, transport: &dyn Transport) -> Result<Option<Status>> {
        let mut completions = Vec::with_capacity(2);
        match transport.test_all(&mut self.tokens, &mut completions) {
            Ok(true) => Ok(Some(self.status(&completions))),
            Ok(false) => Ok(None),
            Err(kind) => Err(batch_error("test_all", kind, &completions)),
        }
    }

    fn wait(&mut self, transport: &dyn Transport) -> Result<Status> {
        let mut completions = Vec::with_capacity(2);
        match transport.wait_all(&mut self.tokens, &mut completions) {
            Ok(()) => Ok(self.status(&completions)),
            Err(kind) => Err(batch_error("wait_all", kind, &completions)),
        }
    }

    /// The payload is withdrawn only together with an announcement nobody has seen. Once the
    /// receiver got the size it will arm a payload receive, so the send has to go through.
    fn cancel(&mut self, transport: &dyn Transport) -> Result<()> {
        let [announcement, payload] = self.tokens;
        if transport.is_complete(announcement).routine("cancel")? {
            trace!("size announcement already delivered, cancel ignored");
            return Ok(());
        }
        transport.cancel(announcement).routine("cancel")?;
        match transport.test(&mut self.tokens[0]).routine("cancel")? {
            Some(completion) => {
                self.announced = Some(completion.status);
                if completion.status.cancelled {
                    transport.cancel(payload).routine("cancel")
                } else {
                    trace!("size announcement matched during cancel, cancel ignored");
                    Ok(())
                }
            }
            None => {
                trace!("size announcement claimed by a probe, cancel ignored");
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
enum Stage {
    /// Waiting for the size announcement.
    Size(RawRequest),
    /// Payload receive armed; `tag` is the tag the announcement arrived with.
    Payload { token: RawRequest, tag: Tag },
}

pub(crate) struct SizedReceive<'a> {
    stage: Stage,
    sink: Sink<'a>,
}

impl<'a> SizedReceive<'a> {
    /// Arms the payload receive for a finished announcement. Returns the final status instead if
    /// there is no payload to wait for.
    fn arm(&mut self, transport: &dyn Transport, announcement: Completion) -> Result<Option<Status>> {
        let raw = announcement.status;
        if raw.cancelled || raw.source == PROC_NULL {
            return Ok(Some(Status::from_raw(raw, 0)));
        }
        if raw.error != SUCCESS {
            return Err(Error::transport("irecv", kind_of(raw.error)));
        }
        let header = SizeHeader::from_bytes(announcement.buffer.as_deref().unwrap_or_default())?;
        trace!(
            "rank {} expects {} bytes from rank {} (tag {}) on tag {}",
            transport.rank(),
            header.len,
            raw.source,
            raw.tag,
            header.payload_tag()
        );
        let token = transport
            .irecv(raw.source, header.payload_tag(), vec![0; header.len])
            .routine("irecv")?;
        self.stage = Stage::Payload {
            token,
            tag: raw.tag,
        };
        Ok(None)
    }

    fn finish(&mut self, routine: &'static str, tag: Tag, payload: Completion) -> Result<Status> {
        self.sink
            .complete(routine, payload)
            .map(|status| status.with_tag(tag))
    }

    fn test(&mut self, transport: &dyn Transport) -> Result<Option<Status>> {
        match self.stage {
            Stage::Size(ref mut token) => match transport.test(token).routine("test")? {
                Some(announcement) => self.arm(transport, announcement),
                None => Ok(None),
            },
            Stage::Payload { ref mut token, tag } => {
                match transport.test(token).routine("test")? {
                    Some(payload) => self.finish("test", tag, payload).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    fn wait(&mut self, transport: &dyn Transport) -> Result<Status> {
        loop {
            match self.stage {
                Stage::Size(ref mut token) => {
                    let announcement = transport.wait(token).routine("wait")?;
                    if let Some(status) = self.arm(transport, announcement)? {
                        return Ok(status);
                    }
                }
                Stage::Payload { ref mut token, tag } => {
                    let payload = transport.wait(token).routine("wait")?;
                    return self.finish("wait", tag, payload);
                }
            }
        }
    }

    fn cancel(&mut self, transport: &dyn Transport) -> Result<()> {
        match self.stage {
            Stage::Size(token) => transport.cancel(token).routine("cancel"),
            Stage::Payload { .. } => {
                trace!("payload already committed, cancel ignored");
                Ok(())
            }
        }
    }

    fn free(&mut self, transport: &dyn Transport) {
        match self.stage {
            Stage::Size(ref mut token) | Stage::Payload { ref mut token, .. } => {
                transport.free(token)
            }
        }
    }
}

pub(crate) struct ProbeReceive<'a> {
    source: Rank,
    tag: Tag,
    sink: Sink<'a>,
}

impl<'a> ProbeReceive<'a> {
    fn receive(
        &mut self,
        transport: &dyn Transport,
        mut message: RawMessage,
        len: usize,
    ) -> Result<Status> {
        let completion = transport.mrecv(&mut message, vec![0; len]).routine("mrecv")?;
        self.sink.complete("mrecv", completion)
    }

    fn test(&mut self, transport: &dyn Transport) -> Result<Option<Status>> {
        match transport.improbe(self.source, self.tag).routine("improbe")? {
            Some((message, probed)) => self.receive(transport, message, probed.len).map(Some),
            None => Ok(None),
        }
    }

    fn wait(&mut self, transport: &dyn Transport) -> Result<Status> {
        let (message, probed) = transport.mprobe(self.source, self.tag).routine("mprobe")?;
        self.receive(transport, message, probed.len)
    }
}

pub(crate) struct Batch {
    tokens: SmallVec<[RawRequest; 4]>,
}

impl Batch {
    fn test(&mut self, transport: &dyn Transport) -> Result<Option<Status>> {
        let mut completions = Vec::with_capacity(self.tokens.len());
        match transport.test_all(&mut self.tokens, &mut completions) {
            Ok(true) => Ok(Some(Status::empty())),
            Ok(false) => Ok(None),
            Err(kind) => Err(batch_error("test_all", kind, &completions)),
        }
    }

    fn wait(&mut self, transport: &dyn Transport) -> Result<Status> {
        let mut completions = Vec::with_capacity(self.tokens.len());
        match transport.wait_all(&mut self.tokens, &mut completions) {
            Ok(()) => Ok(Status::empty()),
            Err(kind) => Err(batch_error("wait_all", kind, &completions)),
        }
    }
}

/// The protocol state of one request
#[derive(Default)]
pub(crate) enum Handler<'a> {
    #[default]
    Null,
    Trivial(Trivial<'a>),
    SizedSend(SizedSend),
    SizedReceive(SizedReceive<'a>),
    Probe(ProbeReceive<'a>),
    Batch(Batch),
}

impl<'a> Handler<'a> {
    pub(crate) fn send(token: RawRequest, count: Count) -> Handler<'a> {
        Handler::Trivial(Trivial {
            token,
            sink: Sink::Sent(count),
        })
    }

    pub(crate) fn receive(token: RawRequest, decode: Decoder<'a>) -> Handler<'a> {
        Handler::Trivial(Trivial {
            token,
            sink: Sink::Receive(decode),
        })
    }

    pub(crate) fn sized_send(tokens: [RawRequest; 2], count: Count) -> Handler<'a> {
        Handler::SizedSend(SizedSend {
            tokens,
            count,
            announced: None,
        })
    }

    pub(crate) fn sized_receive(token: RawRequest, decode: Decoder<'a>) -> Handler<'a> {
        Handler::SizedReceive(SizedReceive {
            stage: Stage::Size(token),
            sink: Sink::Receive(decode),
        })
    }

    pub(crate) fn probe(source: Rank, tag: Tag, decode: Decoder<'a>) -> Handler<'a> {
        Handler::Probe(ProbeReceive {
            source,
            tag,
            sink: Sink::Receive(decode),
        })
    }

    pub(crate) fn batch(tokens: SmallVec<[RawRequest; 4]>) -> Handler<'a> {
        Handler::Batch(Batch { tokens })
    }

    pub(crate) fn active(&self) -> bool {
        !matches!(self, Handler::Null)
    }

    /// The native token, if the whole transfer is a single transport operation.
    pub(crate) fn trivial_token(&self) -> Option<RawRequest> {
        match self {
            Handler::Trivial(op) => Some(op.token),
            _ => None,
        }
    }

    pub(crate) fn set_trivial_token(&mut self, token: RawRequest) {
        if let Handler::Trivial(op) = self {
            op.token = token;
        }
    }

    /// Finish a trivial transfer whose token was completed by a batch call.
    pub(crate) fn complete_trivial(
        &mut self,
        transport: &dyn Transport,
        routine: &'static str,
        completion: Completion,
    ) -> Result<Status> {
        let result = match self {
            Handler::Trivial(op) => {
                op.token = RawRequest::NULL;
                op.sink.complete(routine, completion)
            }
            _ => {
                debug_assert!(false, "{} completed a non-trivial request", routine);
                Ok(Status::empty())
            }
        };
        self.retire(transport);
        result
    }

    pub(crate) fn test(&mut self, transport: &dyn Transport) -> Result<Option<Status>> {
        let result = match self {
            Handler::Null => return Ok(Some(Status::empty())),
            Handler::Trivial(op) => op.test(transport),
            Handler::SizedSend(op) => op.test(transport),
            Handler::SizedReceive(op) => op.test(transport),
            Handler::Probe(op) => op.test(transport),
            Handler::Batch(op) => op.test(transport),
        };
        if !matches!(result, Ok(None)) {
            self.retire(transport);
        }
        result
    }

    pub(crate) fn wait(&mut self, transport: &dyn Transport) -> Result<Status> {
        let result = match self {
            Handler::Null => return Ok(Status::empty()),
            Handler::Trivial(op) => op.wait(transport),
            Handler::SizedSend(op) => op.wait(transport),
            Handler::SizedReceive(op) => op.wait(transport),
            Handler::Probe(op) => op.wait(transport),
            Handler::Batch(op) => op.wait(transport),
        };
        self.retire(transport);
        result
    }

    pub(crate) fn cancel(&mut self, transport: &dyn Transport) -> Result<()> {
        match self {
            Handler::Null => Ok(()),
            Handler::Trivial(op) => transport.cancel(op.token).routine("cancel"),
            Handler::SizedSend(op) => op.cancel(transport),
            Handler::SizedReceive(op) => op.cancel(transport),
            Handler::Probe(_) => {
                trace!("probe cancelled before a match");
                *self = Handler::Null;
                Ok(())
            }
            Handler::Batch(op) => op
                .tokens
                .iter()
                .try_for_each(|&token| transport.cancel(token).routine("cancel")),
        }
    }

    /// Release whatever is still outstanding and become `Null`.
    pub(crate) fn retire(&mut self, transport: &dyn Transport) {
        match self {
            Handler::Trivial(op) => transport.free(&mut op.token),
            Handler::SizedSend(op) => op.tokens.iter_mut().for_each(|token| transport.free(token)),
            Handler::SizedReceive(op) => op.free(transport),
            Handler::Batch(op) => op.tokens.iter_mut().for_each(|token| transport.free(token)),
            Handler::Null | Handler::Probe(_) => {}
        }
        *self = Handler::Null;
    }
}

impl fmt::Debug for Handler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Null => f.write_str("Null"),
            Handler::Trivial(op) => f.debug_tuple("Trivial").field(&op.token).finish(),
            Handler::SizedSend(op) => f.debug_tuple("SizedSend").field(&op.tokens).finish(),
            Handler::SizedReceive(op) => f.debug_tuple("SizedReceive").field(&op.stage).finish(),
            Handler::Probe(op) => f
                .debug_struct("Probe")
                .field("source", &op.source)
                .field("tag", &op.tag)
                .finish(),
            Handler::Batch(op) => f.debug_tuple("Batch").field(&op.tokens).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Config;
    use crate::transport::local::LocalUniverse;

    #[test]
    fn size_header_is_sixteen_bytes() {
        let header = SizeHeader {
            len: 10_000,
            sequence: 42,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), SizeHeader::LEN);
        assert_eq!(SizeHeader::from_bytes(&bytes).unwrap(), header);
        assert!(matches!(
            SizeHeader::from_bytes(&bytes[..8]),
            Err(Error::Layout { len: 8, size: 16 })
        ));
    }

    #[test]
    fn batch_failures_skip_pending_entries() {
        let completions = [
            Completion::pending(),
            Completion::failed(ErrorKind::Truncate),
        ];
        assert_eq!(first_failure(&completions), ErrorKind::Truncate);

        let completions = [Completion::empty(), Completion::failed(ErrorKind::Rank)];
        assert_eq!(first_failure(&completions), ErrorKind::Rank);

        let completions = [Completion::failed(ErrorKind::Tag), Completion::pending()];
        assert_eq!(first_failure(&completions), ErrorKind::Tag);
    }

    #[test]
    fn sized_receive_advances_one_step_per_test() {
        let universe = LocalUniverse::with_config(2, Config::default());
        let (a, b) = (universe.endpoint(0), universe.endpoint(1));
        let payload = vec![1u8, 2, 3, 4, 5];
        let header = SizeHeader {
            len: payload.len(),
            sequence: 7,
        };

        let mut received = Vec::new();
        let token = b.irecv(0, 3, vec![0; SizeHeader::LEN]).unwrap();
        let mut handler = Handler::sized_receive(
            token,
            Box::new(|bytes: &[u8]| -> Result<Count> {
                received = bytes.to_vec();
                Ok(1)
            }),
        );

        assert!(handler.test(&b).unwrap().is_none());
        a.isend(1, 3, header.to_bytes()).unwrap();
        assert!(handler.test(&b).unwrap().is_none());
        assert!(matches!(
            handler,
            Handler::SizedReceive(SizedReceive {
                stage: Stage::Payload { tag: 3, .. },
                ..
            })
        ));
        assert!(handler.test(&b).unwrap().is_none());

        a.isend(1, header.payload_tag(), payload.clone()).unwrap();
        let status = handler.test(&b).unwrap().unwrap();
        assert_eq!(status.tag(), 3);
        assert_eq!(status.source_rank(), 0);
        assert_eq!(status.count(), 1);
        assert!(!handler.active());
        drop(handler);
        assert_eq!(received, payload);
    }

    #[test]
    fn cancelled_probe_becomes_inactive() {
        let universe = LocalUniverse::with_config(1, Config::default());
        let endpoint = universe.endpoint(0);
        let mut handler = Handler::probe(0, 1, Box::new(|_: &[u8]| -> Result<Count> { Ok(1) }));
        assert!(handler.test(&endpoint).unwrap().is_none());
        handler.cancel(&endpoint).unwrap();
        assert!(!handler.active());
        assert_eq!(handler.wait(&endpoint).unwrap(), Status::empty());
    }
}
