//! Raw transport primitives
//!
//! A `Transport` moves byte buffers between the ranks of a fixed group. It knows nothing about
//! element types or serialization: every operation takes or returns whole buffers, and
//! non-blocking operations hand out a `RawRequest` token that is later completed through `test`,
//! `wait` or one of the batch calls.
//!
//! Buffers are owned by the transport while an operation is in flight. A receive hands its
//! staging buffer over on `irecv` and gets the filled buffer back in the `Completion`.
//!
//! [`local`](local/index.html) provides an in-process implementation with one endpoint per rank.

use std::fmt;
use std::thread;

use crate::error::ErrorKind;
use crate::topology::Rank;
use crate::Tag;

pub mod local;

/// Wildcard source for receives and probes
pub const ANY_SOURCE: Rank = -1;
/// Wildcard tag for receives and probes; it only matches tags in `0..=TAG_UB`
pub const ANY_TAG: Tag = -1;
/// The null process; sends to it and receives from it complete immediately
pub const PROC_NULL: Rank = -2;
/// Largest tag available to users
pub const TAG_UB: Tag = (1 << 28) - 1;
/// Error code of a successful operation
pub const SUCCESS: i32 = 0;

/// First tag of the range used by collective operations
pub(crate) const COLLECTIVE_TAG_BASE: Tag = 1 << 28;
/// Number of tags in the collective range
pub(crate) const COLLECTIVE_TAG_SPAN: u32 = 1 << 28;
/// First tag of the range used by payloads of two-phase transfers
pub(crate) const PAYLOAD_TAG_BASE: Tag = 1 << 29;
/// Number of tags in the payload range
pub(crate) const PAYLOAD_TAG_SPAN: u64 = 1 << 29;

/// Result of a raw transport call
pub type RawResult<T> = Result<T, ErrorKind>;

/// Token for an outstanding non-blocking operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawRequest(u64);

impl RawRequest {
    /// The null token; completing it yields an empty status immediately.
    pub const NULL: RawRequest = RawRequest(0);

    /// Wrap a transport specific identifier. `0` is reserved for `NULL`.
    pub fn from_raw(id: u64) -> RawRequest {
        RawRequest(id)
    }

    /// The transport specific identifier
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// True for the null token
    pub fn is_null(self) -> bool {
        self == RawRequest::NULL
    }
}

/// Token for a message claimed by a matched probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawMessage(u64);

impl RawMessage {
    /// No message
    pub const NULL: RawMessage = RawMessage(0);
    /// Message "received" from the null process
    pub const NO_PROC: RawMessage = RawMessage(u64::MAX);

    /// Wrap a transport specific identifier.
    pub fn from_raw(id: u64) -> RawMessage {
        RawMessage(id)
    }

    /// The transport specific identifier
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Description of a finished (or probed) operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatus {
    /// Rank of the sender, or the destination for sends
    pub source: Rank,
    /// Tag of the message
    pub tag: Tag,
    /// `SUCCESS` or an `ErrorKind` code
    pub error: i32,
    /// Length of the message in bytes
    pub len: usize,
    /// True if the operation was cancelled
    pub cancelled: bool,
}

impl RawStatus {
    /// Status of an operation on an inactive request
    pub const EMPTY: RawStatus = RawStatus {
        source: ANY_SOURCE,
        tag: ANY_TAG,
        error: SUCCESS,
        len: 0,
        cancelled: false,
    };

    /// Status of an operation involving the null process
    pub const PROC_NULL: RawStatus = RawStatus {
        source: PROC_NULL,
        tag: ANY_TAG,
        error: SUCCESS,
        len: 0,
        cancelled: false,
    };

    /// The error class, `None` on success
    pub fn error_kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.error)
    }
}

/// A completed operation: its status and, for receives, the filled buffer
#[derive(Debug)]
pub struct Completion {
    /// Final status of the operation
    pub status: RawStatus,
    /// Received bytes, truncated to the message length
    pub buffer: Option<Vec<u8>>,
}

impl Completion {
    /// Completion of the null request
    pub fn empty() -> Completion {
        Completion {
            status: RawStatus::EMPTY,
            buffer: None,
        }
    }

    /// Completion of an operation involving the null process
    pub fn proc_null() -> Completion {
        Completion {
            status: RawStatus::PROC_NULL,
            buffer: Some(Vec::new()),
        }
    }

    /// Completion of a cancelled operation
    pub fn cancelled(tag: Tag) -> Completion {
        Completion {
            status: RawStatus {
                tag,
                cancelled: true,
                ..RawStatus::EMPTY
            },
            buffer: None,
        }
    }

    /// Placeholder for an operation a batch call left outstanding
    pub fn pending() -> Completion {
        Completion::failed(ErrorKind::Pending)
    }

    /// Placeholder for an operation that failed inside a batch call
    pub fn failed(kind: ErrorKind) -> Completion {
        Completion {
            status: RawStatus {
                error: kind.code(),
                ..RawStatus::EMPTY
            },
            buffer: None,
        }
    }
}

/// Point to point primitives of a group of ranks, seen from one rank.
///
/// Completing a token through `test`, `wait` or a batch call sets it to `RawRequest::NULL`.
/// Completing a null token succeeds immediately with `Completion::empty()`.
///
/// Batch calls that fail report `ErrorKind::InStatus` and leave one completion per token in
/// `completions`, whose status error is `SUCCESS`, the code of the failure, or `Pending` for
/// tokens the call did not complete.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Rank of this endpoint
    fn rank(&self) -> Rank;

    /// Number of ranks in the group
    fn size(&self) -> Rank;

    /// Start sending `payload` to `destination`.
    fn isend(&self, destination: Rank, tag: Tag, payload: Vec<u8>) -> RawResult<RawRequest>;

    /// Start receiving a message of at most `buffer.len()` bytes.
    fn irecv(&self, source: Rank, tag: Tag, buffer: Vec<u8>) -> RawResult<RawRequest>;

    /// Complete `request` if it has finished.
    fn test(&self, request: &mut RawRequest) -> RawResult<Option<Completion>>;

    /// Block until `request` has finished and complete it.
    fn wait(&self, request: &mut RawRequest) -> RawResult<Completion>;

    /// True if `request` has finished, without completing it.
    fn is_complete(&self, request: RawRequest) -> RawResult<bool>;

    /// Ask for cancellation of `request`.
    ///
    /// The request stays outstanding; it is completed as usual and its status tells whether the
    /// cancellation took effect. Cancelling a finished operation has no effect.
    fn cancel(&self, request: RawRequest) -> RawResult<()>;

    /// Release `request` without completing it and set it to `NULL`.
    fn free(&self, request: &mut RawRequest);

    /// Look for a matching message without receiving it.
    fn iprobe(&self, source: Rank, tag: Tag) -> RawResult<Option<RawStatus>>;

    /// Block until a matching message is available, without receiving it.
    fn probe(&self, source: Rank, tag: Tag) -> RawResult<RawStatus>;

    /// Look for a matching message and claim it for `mrecv`.
    fn improbe(&self, source: Rank, tag: Tag) -> RawResult<Option<(RawMessage, RawStatus)>>;

    /// Block until a matching message is available and claim it for `mrecv`.
    fn mprobe(&self, source: Rank, tag: Tag) -> RawResult<(RawMessage, RawStatus)>;

    /// Receive a message claimed by a matched probe and set `message` to `NULL`.
    fn mrecv(&self, message: &mut RawMessage, buffer: Vec<u8>) -> RawResult<Completion>;

    /// Block until every request has finished and complete them.
    fn wait_all(
        &self,
        requests: &mut [RawRequest],
        completions: &mut Vec<Completion>,
    ) -> RawResult<()> {
        completions.clear();
        let mut failed = false;
        for request in requests.iter_mut() {
            if failed {
                completions.push(Completion::pending());
                continue;
            }
            match self.wait(request) {
                Ok(completion) => {
                    failed = completion.status.error != SUCCESS;
                    completions.push(completion);
                }
                Err(kind) => {
                    failed = true;
                    completions.push(Completion::failed(kind));
                }
            }
        }
        if failed {
            Err(ErrorKind::InStatus)
        } else {
            Ok(())
        }
    }

    /// Complete every request if all of them have finished, otherwise leave them untouched.
    fn test_all(
        &self,
        requests: &mut [RawRequest],
        completions: &mut Vec<Completion>,
    ) -> RawResult<bool> {
        for request in requests.iter() {
            if !self.is_complete(*request)? {
                return Ok(false);
            }
        }
        self.wait_all(requests, completions).map(|()| true)
    }

    /// Block until one of the non-null requests has finished and complete it.
    ///
    /// Returns its index, or `None` if all requests are null.
    fn wait_any(&self, requests: &mut [RawRequest]) -> RawResult<Option<(usize, Completion)>> {
        loop {
            if requests.iter().all(|request| request.is_null()) {
                return Ok(None);
            }
            for (index, request) in requests.iter_mut().enumerate() {
                if request.is_null() {
                    continue;
                }
                if let Some(completion) = self.test(request)? {
                    return Ok(Some((index, completion)));
                }
            }
            thread::yield_now();
        }
    }
}
