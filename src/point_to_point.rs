//! Point to point communication
//!
//! Endpoints of communication are mostly described by types that implement the `Source` and
//! `Destination` trait. Communication operations are implemented as default methods on those
//! traits.
//!
//! Values come in three shapes:
//!
//! - fixed-size data implementing `Equivalence` (single values and slices), transferred in one
//!   message whose size both sides know,
//! - `Vec`s of `Equivalence` data whose length only the sender knows,
//! - anything implementing `serde::Serialize`, packed with `archive`.
//!
//! The last two use the dynamic protocol chosen in the communicator's `Config`: either the
//! receiver probes for the incoming message and sizes its buffer from the probe, or the sender
//! announces the length in a separate size message first.
//!
//! Receiving a value (as opposed to receiving into a buffer) from the null process fails with
//! `ErrorKind::Rank`, since there is nothing to return.

use std::fmt;
use std::sync::Arc;

use conv::ConvUtil;
use log::{trace, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use smallvec::{smallvec, SmallVec};

use crate::archive;
use crate::datatype::traits::*;
use crate::datatype::{count_of, decode_elements, encode_elements};
use crate::environment::DynamicProtocol;
use crate::error::{Error, ErrorKind, Result, Routine};
use crate::request::handler::{Decoder, Handler, SizeHeader};
use crate::request::{Request, WaitGuard};
use crate::topology::traits::*;
use crate::topology::{AnyProcess, Communicator, Process, Rank};
use crate::transport::{
    Completion, RawMessage, RawRequest, RawStatus, Transport, ANY_SOURCE, ANY_TAG, PROC_NULL,
};
use crate::{Count, Tag};

/// Point to point communication traits
pub mod traits {
    pub use super::{Destination, Source};
}

/// Describes the result of a point to point receive operation.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Status {
    source: Rank,
    tag: Tag,
    error: i32,
    len: usize,
    count: Count,
    cancelled: bool,
}

impl Status {
    /// The status reported for inactive requests: any source, any tag, no data.
    pub fn empty() -> Status {
        Status::from_raw(RawStatus::EMPTY, 0)
    }

    pub(crate) fn from_raw(raw: RawStatus, count: Count) -> Status {
        Status {
            source: raw.source,
            tag: raw.tag,
            error: raw.error,
            len: raw.len,
            count,
            cancelled: raw.cancelled,
        }
    }

    /// Status of a probed message; its count is the message length in bytes.
    pub(crate) fn probed(raw: RawStatus) -> Status {
        Status::from_raw(raw, raw.len.value_as::<Count>().unwrap_or(Count::MAX))
    }

    pub(crate) fn with_tag(self, tag: Tag) -> Status {
        Status { tag, ..self }
    }

    /// The rank of the message source
    pub fn source_rank(&self) -> Rank {
        self.source
    }

    /// The message tag
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Error code of the operation, `0` on success
    pub fn error(&self) -> i32 {
        self.error
    }

    /// The error class, `None` on success
    pub fn error_kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.error)
    }

    /// Number of elements transferred
    ///
    /// For probes this is the length of the message in bytes.
    pub fn count(&self) -> Count {
        self.count
    }

    /// Length of the transferred message in bytes
    pub fn byte_len(&self) -> usize {
        self.len
    }

    /// True if the operation was cancelled before it transferred any data
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status {{ source_rank: {}, tag: {}, count: {}",
            self.source, self.tag, self.count
        )?;
        if self.error != 0 {
            write!(f, ", error: {}", self.error)?;
        }
        if self.cancelled {
            f.write_str(", cancelled")?;
        }
        f.write_str(" }")
    }
}

fn decode_single<Msg: Equivalence>(bytes: &[u8]) -> Result<Msg> {
    if bytes.len() != Msg::SIZE {
        return Err(Error::Layout {
            len: bytes.len(),
            size: Msg::SIZE,
        });
    }
    Msg::decode(bytes)
}

fn no_value(routine: &'static str) -> Error {
    Error::transport(routine, ErrorKind::Rank)
}

pub(crate) fn post_send(
    comm: &Communicator,
    destination: Rank,
    tag: Tag,
    payload: Vec<u8>,
    count: Count,
) -> Result<Request<'static>> {
    let token = comm
        .transport()
        .isend(destination, tag, payload)
        .routine("isend")?;
    Ok(comm.request(Handler::send(token, count)))
}

pub(crate) fn post_receive<'b>(
    comm: &Communicator,
    source: Rank,
    tag: Tag,
    capacity: usize,
    decode: Decoder<'b>,
) -> Result<Request<'b>> {
    let token = comm
        .transport()
        .irecv(source, tag, vec![0; capacity])
        .routine("irecv")?;
    Ok(comm.request(Handler::receive(token, decode)))
}

/// Native sends carrying `payload` to `destination` under the configured dynamic protocol
pub(crate) fn dynamic_send_tokens(
    comm: &Communicator,
    destination: Rank,
    tag: Tag,
    payload: Vec<u8>,
) -> Result<SmallVec<[RawRequest; 2]>> {
    let transport = comm.transport();
    match comm.config().dynamic_protocol() {
        DynamicProtocol::Probe => Ok(smallvec![transport
            .isend(destination, tag, payload)
            .routine("isend")?]),
        DynamicProtocol::SizePrefix => {
            let header = SizeHeader {
                len: payload.len(),
                sequence: comm.tags().next_sequence(),
            };
            trace!(
                "announcing {} bytes to rank {} (tag {}) on tag {}",
                header.len,
                destination,
                tag,
                header.payload_tag()
            );
            let mut announcement = transport
                .isend(destination, tag, header.to_bytes())
                .routine("isend")?;
            match transport.isend(destination, header.payload_tag(), payload) {
                Ok(data) => Ok(smallvec![announcement, data]),
                Err(kind) => {
                    transport.free(&mut announcement);
                    Err(Error::transport("isend", kind))
                }
            }
        }
    }
}

pub(crate) fn post_dynamic_send(
    comm: &Communicator,
    destination: Rank,
    tag: Tag,
    payload: Vec<u8>,
    count: Count,
) -> Result<Request<'static>> {
    let tokens = dynamic_send_tokens(comm, destination, tag, payload)?;
    let handler = match tokens[..] {
        [announcement, data] => Handler::sized_send([announcement, data], count),
        [token] => Handler::send(token, count),
        _ => Handler::batch(tokens.iter().copied().collect()),
    };
    Ok(comm.request(handler))
}

pub(crate) fn post_dynamic_receive<'b>(
    comm: &Communicator,
    source: Rank,
    tag: Tag,
    decode: Decoder<'b>,
) -> Result<Request<'b>> {
    let handler = match comm.config().dynamic_protocol() {
        DynamicProtocol::Probe => Handler::probe(source, tag, decode),
        DynamicProtocol::SizePrefix => {
            let token = comm
                .transport()
                .irecv(source, tag, vec![0; SizeHeader::LEN])
                .routine("irecv")?;
            Handler::sized_receive(token, decode)
        }
    };
    Ok(comm.request(handler))
}

/// Blocking receive of a message of unknown length, returning its bytes
pub(crate) fn receive_bytes(
    comm: &Communicator,
    source: Rank,
    tag: Tag,
) -> Result<(Option<Vec<u8>>, Status)> {
    let mut bytes = None;
    let status = post_dynamic_receive(
        comm,
        source,
        tag,
        Box::new(|received: &[u8]| -> Result<Count> {
            bytes = Some(received.to_vec());
            Ok(1)
        }),
    )?
    .wait()?;
    Ok((bytes, status))
}

/// Blocking send of a message the receiver gets through `receive_bytes`
pub(crate) fn send_bytes(
    comm: &Communicator,
    destination: Rank,
    tag: Tag,
    payload: Vec<u8>,
) -> Result<()> {
    post_dynamic_send(comm, destination, tag, payload, 1)?
        .wait()
        .map(drop)
}

/// Something that can be used as the source in a point to point receive operation
///
/// # Examples
///
/// - A `Process` used as a source for a receive operation will receive data only from the
/// identified process.
/// - A communicator can also be used as a source via the `AnyProcess` identifier.
pub trait Source: AsCommunicator {
    /// `Rank` that identifies the source
    fn source_rank(&self) -> Rank;

    /// Probe a source for incoming messages.
    ///
    /// Probe `Source` `&self` for incoming messages with a certain tag.
    ///
    /// An ordinary `probe()` returns a `Status` which allows inspection of the properties of the
    /// incoming message, but does not guarantee reception by a subsequent `receive()` (especially
    /// in a multi-threaded set-up). For a probe operation with stronger guarantees, see
    /// `matched_probe()`.
    fn probe_with_tag(&self, tag: Tag) -> Result<Status> {
        self.as_communicator()
            .transport()
            .probe(self.source_rank(), tag)
            .routine("probe")
            .map(Status::probed)
    }

    /// Probe a source for incoming messages with any tag.
    fn probe(&self) -> Result<Status> {
        self.probe_with_tag(ANY_TAG)
    }

    /// Asynchronously probe a source for incoming messages.
    ///
    /// Like `probe_with_tag()`, but returns `None` instead of blocking if no matching message is
    /// available.
    fn immediate_probe_with_tag(&self, tag: Tag) -> Result<Option<Status>> {
        self.as_communicator()
            .transport()
            .iprobe(self.source_rank(), tag)
            .routine("iprobe")
            .map(|probed| probed.map(Status::probed))
    }

    /// Asynchronously probe a source for incoming messages with any tag.
    fn immediate_probe(&self) -> Result<Option<Status>> {
        self.immediate_probe_with_tag(ANY_TAG)
    }

    /// Probe a source for incoming messages with guaranteed reception.
    ///
    /// A `matched_probe()` returns both a `Status` that describes the properties of a pending
    /// incoming message and a `Message` which can and *should* subsequently be used in a
    /// `matched_receive()` to receive the probed message.
    fn matched_probe_with_tag(&self, tag: Tag) -> Result<(Message, Status)> {
        let transport = self.as_communicator().transport();
        let (raw, probed) = transport
            .mprobe(self.source_rank(), tag)
            .routine("mprobe")?;
        Ok((
            Message::new(Arc::clone(transport), raw, probed),
            Status::probed(probed),
        ))
    }

    /// Probe a source for incoming messages with any tag with guaranteed reception.
    fn matched_probe(&self) -> Result<(Message, Status)> {
        self.matched_probe_with_tag(ANY_TAG)
    }

    /// Asynchronously probe a source for incoming messages with guaranteed reception.
    ///
    /// Returns `None` if no matching message is available.
    fn immediate_matched_probe_with_tag(&self, tag: Tag) -> Result<Option<(Message, Status)>> {
        let transport = self.as_communicator().transport();
        let found = transport
            .improbe(self.source_rank(), tag)
            .routine("improbe")?;
        Ok(found.map(|(raw, probed)| {
            (
                Message::new(Arc::clone(transport), raw, probed),
                Status::probed(probed),
            )
        }))
    }

    /// Asynchronously probe a source for incoming messages with any tag with guaranteed
    /// reception.
    fn immediate_matched_probe(&self) -> Result<Option<(Message, Status)>> {
        self.immediate_matched_probe_with_tag(ANY_TAG)
    }

    /// Receive a message containing a single instance of type `Msg`.
    ///
    /// Receive a message from `Source` `&self` tagged `tag` containing a single instance of type
    /// `Msg`.
    fn receive_with_tag<Msg>(&self, tag: Tag) -> Result<(Msg, Status)>
    where
        Msg: Equivalence,
    {
        let mut value = None;
        let status = post_receive(
            self.as_communicator(),
            self.source_rank(),
            tag,
            Msg::SIZE,
            Box::new(|bytes: &[u8]| -> Result<Count> {
                value = Some(decode_single::<Msg>(bytes)?);
                Ok(1)
            }),
        )?
        .wait()?;
        let value = value.ok_or_else(|| no_value("receive"))?;
        Ok((value, status))
    }

    /// Receive a message containing a single instance of type `Msg` with any tag.
    ///
    /// # Examples
    ///
    /// See `demos/immediate.rs`
    fn receive<Msg>(&self) -> Result<(Msg, Status)>
    where
        Msg: Equivalence,
    {
        self.receive_with_tag(ANY_TAG)
    }

    /// Receive a message into a `Buffer`.
    ///
    /// Receive a message from `Source` `&self` tagged `tag` into `Buffer` `buf`.
    fn receive_into_with_tag<Buf: ?Sized>(&self, buf: &mut Buf, tag: Tag) -> Result<Status>
    where
        Buf: BufferMut,
    {
        self.immediate_receive_into_with_tag(buf, tag)?.wait()
    }

    /// Receive a message with any tag into a `Buffer`.
    fn receive_into<Buf: ?Sized>(&self, buf: &mut Buf) -> Result<Status>
    where
        Buf: BufferMut,
    {
        self.receive_into_with_tag(buf, ANY_TAG)
    }

    /// Receive a message containing multiple instances of type `Msg` into a `Vec`.
    ///
    /// The length of the message does not need to be known in advance.
    fn receive_vec_with_tag<Msg>(&self, tag: Tag) -> Result<(Vec<Msg>, Status)>
    where
        Msg: Equivalence,
    {
        let mut values = Vec::new();
        let status = self.immediate_receive_vec_with_tag(&mut values, tag)?.wait()?;
        Ok((values, status))
    }

    /// Receive a message with any tag containing multiple instances of type `Msg` into a `Vec`.
    fn receive_vec<Msg>(&self) -> Result<(Vec<Msg>, Status)>
    where
        Msg: Equivalence,
    {
        self.receive_vec_with_tag(ANY_TAG)
    }

    /// Receive a serialized value.
    fn receive_serialized_with_tag<T>(&self, tag: Tag) -> Result<(T, Status)>
    where
        T: DeserializeOwned,
    {
        let mut value = None;
        let status = post_dynamic_receive(
            self.as_communicator(),
            self.source_rank(),
            tag,
            Box::new(|bytes: &[u8]| -> Result<Count> {
                value = Some(archive::unpack(bytes)?);
                Ok(1)
            }),
        )?
        .wait()?;
        let value = value.ok_or_else(|| no_value("receive_serialized"))?;
        Ok((value, status))
    }

    /// Receive a serialized value with any tag.
    fn receive_serialized<T>(&self) -> Result<(T, Status)>
    where
        T: DeserializeOwned,
    {
        self.receive_serialized_with_tag(ANY_TAG)
    }

    /// Receive a serialized array into `out`.
    ///
    /// If the sender transmitted more elements than `out` holds, the first `out.len()` are
    /// stored and an `Error::Overflow` is returned.
    fn receive_serialized_array_into_with_tag<T>(&self, out: &mut [T], tag: Tag) -> Result<Status>
    where
        T: DeserializeOwned,
    {
        self.immediate_receive_serialized_array_with_tag(out, tag)?
            .wait()
    }

    /// Initiate an immediate (non-blocking) receive operation.
    ///
    /// Initiate receiving a message matching `tag` into `buf`.
    fn immediate_receive_into_with_tag<'b, Buf: ?Sized>(
        &self,
        buf: &'b mut Buf,
        tag: Tag,
    ) -> Result<Request<'b>>
    where
        Buf: 'b + BufferMut,
    {
        let capacity = buf.capacity() * <Buf::Item as Equivalence>::SIZE;
        post_receive(
            self.as_communicator(),
            self.source_rank(),
            tag,
            capacity,
            Box::new(move |bytes: &[u8]| -> Result<Count> {
                count_of(buf.decode_from(bytes)?)
            }),
        )
    }

    /// Initiate a non-blocking receive operation for messages with any tag.
    ///
    /// # Examples
    ///
    /// See `demos/immediate.rs`
    fn immediate_receive_into<'b, Buf: ?Sized>(&self, buf: &'b mut Buf) -> Result<Request<'b>>
    where
        Buf: 'b + BufferMut,
    {
        self.immediate_receive_into_with_tag(buf, ANY_TAG)
    }

    /// Initiate a non-blocking receive of a message of unknown length into `out`.
    ///
    /// `out` is replaced by the received elements on completion.
    fn immediate_receive_vec_with_tag<'b, Msg>(
        &self,
        out: &'b mut Vec<Msg>,
        tag: Tag,
    ) -> Result<Request<'b>>
    where
        Msg: 'b + Equivalence,
    {
        post_dynamic_receive(
            self.as_communicator(),
            self.source_rank(),
            tag,
            Box::new(move |bytes: &[u8]| -> Result<Count> {
                let values = decode_elements::<Msg>(bytes)?;
                let count = count_of(values.len())?;
                *out = values;
                Ok(count)
            }),
        )
    }

    /// Initiate a non-blocking receive of a serialized value into `value`.
    fn immediate_receive_serialized_with_tag<'b, T>(
        &self,
        value: &'b mut T,
        tag: Tag,
    ) -> Result<Request<'b>>
    where
        T: 'b + DeserializeOwned,
    {
        post_dynamic_receive(
            self.as_communicator(),
            self.source_rank(),
            tag,
            Box::new(move |bytes: &[u8]| -> Result<Count> {
                *value = archive::unpack(bytes)?;
                Ok(1)
            }),
        )
    }

    /// Initiate a non-blocking receive of a serialized value with any tag into `value`.
    fn immediate_receive_serialized<'b, T>(&self, value: &'b mut T) -> Result<Request<'b>>
    where
        T: 'b + DeserializeOwned,
    {
        self.immediate_receive_serialized_with_tag(value, ANY_TAG)
    }

    /// Initiate a non-blocking receive of a serialized array into `out`.
    ///
    /// Completing the request fails with `Error::Overflow` if the sender transmitted more than
    /// `out.len()` elements; the first `out.len()` are stored regardless.
    fn immediate_receive_serialized_array_with_tag<'b, T>(
        &self,
        out: &'b mut [T],
        tag: Tag,
    ) -> Result<Request<'b>>
    where
        T: 'b + DeserializeOwned,
    {
        post_dynamic_receive(
            self.as_communicator(),
            self.source_rank(),
            tag,
            Box::new(move |bytes: &[u8]| -> Result<Count> {
                count_of(archive::unpack_array_into(bytes, out)?)
            }),
        )
    }
}

impl<'a> Source for AnyProcess<'a> {
    fn source_rank(&self) -> Rank {
        ANY_SOURCE
    }
}

impl Source for Communicator {
    fn source_rank(&self) -> Rank {
        ANY_SOURCE
    }
}

impl<'a> Source for Process<'a> {
    fn source_rank(&self) -> Rank {
        self.rank()
    }
}

/// Something that can be used as the destination in a point to point send operation
///
/// # Examples
/// - Using a `Process` as the destination will send data to that specific process.
pub trait Destination: AsCommunicator {
    /// `Rank` that identifies the destination
    fn destination_rank(&self) -> Rank;

    /// Blocking standard mode send operation
    ///
    /// Send the contents of a `Buffer` to the `Destination` `&self` and tag it.
    fn send_with_tag<Buf: ?Sized>(&self, buf: &Buf, tag: Tag) -> Result<()>
    where
        Buf: Buffer,
    {
        self.immediate_send_with_tag(buf, tag)?.wait().map(drop)
    }

    /// Blocking standard mode send operation with tag `0`
    ///
    /// # Examples
    ///
    /// See `demos/immediate.rs`
    fn send<Buf: ?Sized>(&self, buf: &Buf) -> Result<()>
    where
        Buf: Buffer,
    {
        self.send_with_tag(buf, Tag::default())
    }

    /// Send a run of elements whose length the receiver does not know.
    fn send_vec_with_tag<Msg>(&self, values: &[Msg], tag: Tag) -> Result<()>
    where
        Msg: Equivalence,
    {
        self.immediate_send_vec_with_tag(values, tag)?
            .wait()
            .map(drop)
    }

    /// Send a run of elements whose length the receiver does not know, with tag `0`.
    fn send_vec<Msg>(&self, values: &[Msg]) -> Result<()>
    where
        Msg: Equivalence,
    {
        self.send_vec_with_tag(values, Tag::default())
    }

    /// Send a serialized value.
    fn send_serialized_with_tag<T: ?Sized>(&self, value: &T, tag: Tag) -> Result<()>
    where
        T: Serialize,
    {
        self.immediate_send_serialized_with_tag(value, tag)?
            .wait()
            .map(drop)
    }

    /// Send a serialized value with tag `0`.
    fn send_serialized<T: ?Sized>(&self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.send_serialized_with_tag(value, Tag::default())
    }

    /// Send a serialized array, received with `receive_serialized_array_into_with_tag`.
    fn send_serialized_array_with_tag<T>(&self, values: &[T], tag: Tag) -> Result<()>
    where
        T: Serialize,
    {
        self.immediate_send_serialized_array_with_tag(values, tag)?
            .wait()
            .map(drop)
    }

    /// Initiate an immediate (non-blocking) standard mode send operation.
    ///
    /// The contents of `buf` are copied, so the request does not borrow it.
    fn immediate_send_with_tag<Buf: ?Sized>(&self, buf: &Buf, tag: Tag) -> Result<Request<'static>>
    where
        Buf: Buffer,
    {
        post_send(
            self.as_communicator(),
            self.destination_rank(),
            tag,
            buf.to_bytes(),
            count_of(buf.count())?,
        )
    }

    /// Initiate a non-blocking standard mode send operation with tag `0`.
    ///
    /// # Examples
    ///
    /// See `demos/immediate.rs`
    fn immediate_send<Buf: ?Sized>(&self, buf: &Buf) -> Result<Request<'static>>
    where
        Buf: Buffer,
    {
        self.immediate_send_with_tag(buf, Tag::default())
    }

    /// Initiate a non-blocking send of a run of elements whose length the receiver does not
    /// know.
    fn immediate_send_vec_with_tag<Msg>(&self, values: &[Msg], tag: Tag) -> Result<Request<'static>>
    where
        Msg: Equivalence,
    {
        post_dynamic_send(
            self.as_communicator(),
            self.destination_rank(),
            tag,
            encode_elements(values),
            count_of(values.len())?,
        )
    }

    /// Initiate a non-blocking send of a serialized value.
    fn immediate_send_serialized_with_tag<T: ?Sized>(
        &self,
        value: &T,
        tag: Tag,
    ) -> Result<Request<'static>>
    where
        T: Serialize,
    {
        post_dynamic_send(
            self.as_communicator(),
            self.destination_rank(),
            tag,
            archive::pack(value)?,
            1,
        )
    }

    /// Initiate a non-blocking send of a serialized value with tag `0`.
    fn immediate_send_serialized<T: ?Sized>(&self, value: &T) -> Result<Request<'static>>
    where
        T: Serialize,
    {
        self.immediate_send_serialized_with_tag(value, Tag::default())
    }

    /// Initiate a non-blocking send of a serialized array.
    fn immediate_send_serialized_array_with_tag<T>(
        &self,
        values: &[T],
        tag: Tag,
    ) -> Result<Request<'static>>
    where
        T: Serialize,
    {
        post_dynamic_send(
            self.as_communicator(),
            self.destination_rank(),
            tag,
            archive::pack_array(values)?,
            count_of(values.len())?,
        )
    }
}

impl<'a> Destination for Process<'a> {
    fn destination_rank(&self) -> Rank {
        self.rank()
    }
}

/// Represents a matched message.
///
/// A message claimed by a matched probe can only be received through this object. Dropping it
/// without receiving discards the message.
#[must_use]
pub struct Message {
    transport: Arc<dyn Transport>,
    raw: RawMessage,
    len: usize,
}

impl Message {
    fn new(transport: Arc<dyn Transport>, raw: RawMessage, probed: RawStatus) -> Message {
        Message {
            transport,
            raw,
            len: probed.len,
        }
    }

    /// True if the `source_rank()` of the probe was `PROC_NULL`.
    pub fn is_no_proc(&self) -> bool {
        self.raw == RawMessage::NO_PROC
    }

    fn take(&mut self) -> Result<Completion> {
        let buffer = vec![0; self.len];
        let completion = self
            .transport
            .mrecv(&mut self.raw, buffer)
            .routine("mrecv")?;
        match completion.status.error_kind() {
            Some(kind) => Err(Error::transport("mrecv", kind)),
            None => Ok(completion),
        }
    }

    /// Receive a previously probed message containing a single instance of type `Msg`.
    pub fn matched_receive<Msg>(mut self) -> Result<(Msg, Status)>
    where
        Msg: Equivalence,
    {
        let completion = self.take()?;
        if completion.status.source == PROC_NULL {
            return Err(no_value("matched_receive"));
        }
        let value = decode_single::<Msg>(completion.buffer.as_deref().unwrap_or_default())?;
        Ok((value, Status::from_raw(completion.status, 1)))
    }

    /// Receive a previously probed message into a `Buffer`.
    pub fn matched_receive_into<Buf: ?Sized>(mut self, buf: &mut Buf) -> Result<Status>
    where
        Buf: BufferMut,
    {
        let completion = self.take()?;
        if completion.status.source == PROC_NULL {
            return Ok(Status::from_raw(completion.status, 0));
        }
        let count = buf.decode_from(completion.buffer.as_deref().unwrap_or_default())?;
        Ok(Status::from_raw(completion.status, count_of(count)?))
    }

    /// Receive a previously probed message containing multiple instances of type `Msg` into a
    /// `Vec`.
    pub fn matched_receive_vec<Msg>(mut self) -> Result<(Vec<Msg>, Status)>
    where
        Msg: Equivalence,
    {
        let completion = self.take()?;
        let values = decode_elements::<Msg>(completion.buffer.as_deref().unwrap_or_default())?;
        let count = count_of(values.len())?;
        Ok((values, Status::from_raw(completion.status, count)))
    }

    /// Receive a previously probed message holding a serialized value.
    pub fn matched_receive_serialized<T>(mut self) -> Result<(T, Status)>
    where
        T: DeserializeOwned,
    {
        let completion = self.take()?;
        if completion.status.source == PROC_NULL {
            return Err(no_value("matched_receive_serialized"));
        }
        let value = archive::unpack(completion.buffer.as_deref().unwrap_or_default())?;
        Ok((value, Status::from_raw(completion.status, 1)))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("raw", &self.raw)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if self.raw != RawMessage::NULL && self.raw != RawMessage::NO_PROC {
            warn!("matched message of {} bytes dropped without receiving", self.len);
            let buffer = vec![0; self.len];
            if let Err(kind) = self.transport.mrecv(&mut self.raw, buffer) {
                warn!("discarding matched message failed: {}", kind);
            }
        }
    }
}

/// Sends `msg` to `destination` tagging it `sendtag` and simultaneously receives an
/// instance of `R` tagged `receivetag` from `source`.
pub fn send_receive_with_tags<M, D, R, S>(
    msg: &M,
    destination: &D,
    sendtag: Tag,
    source: &S,
    receivetag: Tag,
) -> Result<(R, Status)>
where
    M: Equivalence,
    D: Destination,
    R: Equivalence,
    S: Source,
{
    let send = WaitGuard::from(destination.immediate_send_with_tag(msg, sendtag)?);
    let received = source.receive_with_tag(receivetag)?;
    Request::from(send).wait()?;
    Ok(received)
}

/// Sends `msg` to `destination` and simultaneously receives an instance of `R` from
/// `source`.
pub fn send_receive<R, M, D, S>(msg: &M, destination: &D, source: &S) -> Result<(R, Status)>
where
    M: Equivalence,
    D: Destination,
    R: Equivalence,
    S: Source,
{
    send_receive_with_tags(msg, destination, Tag::default(), source, ANY_TAG)
}

/// Sends a serialized `msg` to `destination` and simultaneously receives a serialized `R` from
/// `source`, both with tag `tag`.
pub fn send_receive_serialized<R, M: ?Sized, D, S>(
    msg: &M,
    destination: &D,
    source: &S,
    tag: Tag,
) -> Result<(R, Status)>
where
    M: Serialize,
    D: Destination,
    R: DeserializeOwned,
    S: Source,
{
    let send = WaitGuard::from(destination.immediate_send_serialized_with_tag(msg, tag)?);
    let received = source.receive_serialized_with_tag(tag)?;
    Request::from(send).wait()?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Config;
    use crate::transport::local::LocalUniverse;

    #[test]
    fn empty_status_matches_anything() {
        let status = Status::empty();
        assert_eq!(status.source_rank(), ANY_SOURCE);
        assert_eq!(status.tag(), ANY_TAG);
        assert_eq!(status.count(), 0);
        assert!(!status.cancelled());
        assert_eq!(status.error_kind(), None);
    }

    #[test]
    fn single_values_need_exact_length() {
        assert_eq!(decode_single::<u16>(&[1, 0]).unwrap(), 1);
        assert!(matches!(
            decode_single::<u16>(&[1, 0, 0]),
            Err(Error::Layout { len: 3, size: 2 })
        ));
    }

    #[test]
    fn probe_reports_bytes() {
        let universe = LocalUniverse::with_config(2, Config::default());
        let comms = universe.communicators();
        comms[0]
            .process_at_rank(1)
            .send_with_tag(&[1u32, 2, 3][..], 4)
            .unwrap();
        let status = comms[1].process_at_rank(0).probe().unwrap();
        assert_eq!(status.tag(), 4);
        assert_eq!(status.byte_len(), 12);
        assert_eq!(status.count(), 12);
    }

    #[test]
    fn dropped_message_is_discarded() {
        let universe = LocalUniverse::with_config(2, Config::default());
        let comms = universe.communicators();
        let to_one = comms[0].process_at_rank(1);
        to_one.send_with_tag(&1u8, 1).unwrap();
        to_one.send_with_tag(&2u8, 1).unwrap();

        let from_zero = comms[1].process_at_rank(0);
        let (message, _) = from_zero.matched_probe_with_tag(1).unwrap();
        drop(message);
        let (value, _) = from_zero.receive_with_tag::<u8>(1).unwrap();
        assert_eq!(value, 2);
    }

    #[test]
    fn null_process_leaves_buffers_alone() {
        let universe = LocalUniverse::with_config(1, Config::default());
        let world = universe.world(0);
        let mut buf = [7i32; 2];
        let status = world.null_process().receive_into(&mut buf[..]).unwrap();
        assert_eq!(status.source_rank(), PROC_NULL);
        assert_eq!(status.count(), 0);
        assert_eq!(buf, [7, 7]);
        assert!(matches!(
            world.null_process().receive::<i32>(),
            Err(Error::Transport {
                kind: ErrorKind::Rank,
                ..
            })
        ));
    }
}
