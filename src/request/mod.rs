//! Request objects for non-blocking operations
//!
//! Non-blocking operations such as `immediate_send()` return request objects that borrow any
//! buffers involved in the operation so as to ensure proper access restrictions. In order to
//! release the borrowed buffers from the request objects, a completion operation such as
//! [`wait()`](struct.Request.html#method.wait) or [`test()`](struct.Request.html#method.test)
//! must be used on the request object.
//!
//! A request that finished, failed or was cancelled and completed becomes inactive. Completing an
//! inactive request again succeeds at once with `Status::empty()`. The exception is a request
//! finished by a multi-request call that then failed on another request: it keeps its status and
//! the next completion call reports it.
//!
//! Requests dropped while still active release their operations without completing them and log
//! a warning. To complete or cancel a request on scope exit, wrap it in a
//! [`WaitGuard`](struct.WaitGuard.html) or [`CancelGuard`](struct.CancelGuard.html).
//!
//! Several requests are completed together with the free functions [`wait_any`](fn.wait_any.html),
//! [`test_any`](fn.test_any.html), [`wait_all`](fn.wait_all.html), [`wait_some`](fn.wait_some.html)
//! and [`test_some`](fn.test_some.html), or through a
//! [`RequestCollection`](struct.RequestCollection.html).

use std::iter::FromIterator;
use std::mem;
use std::sync::Arc;

use log::{error, warn};

use crate::environment::Polling;
use crate::error::Result;
use crate::point_to_point::Status;
use crate::transport::{Completion, RawRequest, Transport};

use self::handler::Handler;

mod backoff;
pub(crate) mod handler;
mod multiple;

pub use self::multiple::{test_any, test_some, wait_all, wait_any, wait_some};

/// Request traits
pub mod traits {
    pub use super::CollectRequests;
}

/// A request object for a non-blocking operation, borrowing the buffers of the operation for `'a`
///
/// # Examples
///
/// See `demos/immediate.rs`
#[must_use]
#[derive(Debug, Default)]
pub struct Request<'a> {
    transport: Option<Arc<dyn Transport>>,
    polling: Polling,
    handler: Handler<'a>,
    // Status of a completion that a failing multi-request call could not return.
    unreported: Option<Status>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        polling: Polling,
        handler: Handler<'a>,
    ) -> Request<'a> {
        Request {
            transport: Some(transport),
            polling,
            handler,
            unreported: None,
        }
    }

    /// An inactive request
    pub fn null() -> Request<'a> {
        Request::default()
    }

    /// Wait for the operation to finish.
    ///
    /// Blocks the calling thread until the operation has finished. The request is inactive
    /// afterwards, also if an error is returned.
    ///
    /// # Examples
    ///
    /// See `demos/immediate.rs`
    pub fn wait(&mut self) -> Result<Status> {
        if let Some(status) = self.unreported.take() {
            return Ok(status);
        }
        match &self.transport {
            Some(transport) => self.handler.wait(transport.as_ref()),
            None => Ok(Status::empty()),
        }
    }

    /// Test whether the operation has finished.
    ///
    /// Returns `Some(status)` and deactivates the request if it has. A single call advances a
    /// multi-stage operation by at most one stage.
    pub fn test(&mut self) -> Result<Option<Status>> {
        if let Some(status) = self.unreported.take() {
            return Ok(Some(status));
        }
        match &self.transport {
            Some(transport) => self.handler.test(transport.as_ref()),
            None => Ok(Some(Status::empty())),
        }
    }

    /// Initiate cancellation of the request.
    ///
    /// The request must still be completed with `wait` or `test`; the status tells whether the
    /// cancellation took effect. Operations that already committed to a message, such as the
    /// payload stage of a size-prefixed receive, are not cancelled.
    ///
    /// # Examples
    ///
    /// See `demos/immediate.rs`
    pub fn cancel(&mut self) -> Result<()> {
        match &self.transport {
            Some(transport) => self.handler.cancel(transport.as_ref()),
            None => Ok(()),
        }
    }

    /// True until the operation has been completed
    pub fn active(&self) -> bool {
        self.handler.active()
    }

    /// True if the operation is a single transport operation that batch completions can hand to
    /// the transport directly
    pub fn is_trivial(&self) -> bool {
        self.handler.trivial_token().is_some()
    }

    pub(crate) fn has_unreported(&self) -> bool {
        self.unreported.is_some()
    }

    pub(crate) fn take_unreported(&mut self) -> Option<Status> {
        self.unreported.take()
    }

    pub(crate) fn keep_unreported(&mut self, status: Status) {
        debug_assert!(!self.active(), "kept the status of an active request");
        self.unreported = Some(status);
    }

    pub(crate) fn polling(&self) -> Polling {
        self.polling
    }

    pub(crate) fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    pub(crate) fn trivial_token(&self) -> Option<RawRequest> {
        self.handler.trivial_token()
    }

    pub(crate) fn set_trivial_token(&mut self, token: RawRequest) {
        self.handler.set_trivial_token(token)
    }

    /// Finish a trivial request whose token a batch call completed.
    pub(crate) fn complete_trivial(
        &mut self,
        routine: &'static str,
        completion: Completion,
    ) -> Result<Status> {
        match &self.transport {
            Some(transport) => {
                self.handler
                    .complete_trivial(transport.as_ref(), routine, completion)
            }
            None => Ok(Status::empty()),
        }
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if self.handler.active() {
            warn!(
                "request dropped while active, releasing {:?}",
                self.handler
            );
            if let Some(transport) = &self.transport {
                self.handler.retire(transport.as_ref());
            }
        }
    }
}

/// Guard object that waits for the completion of an operation when it is dropped
///
/// The guard can be constructed or deconstructed using the `From` and `Into` traits.
///
/// # Examples
///
/// See `demos/immediate.rs`
#[derive(Debug)]
pub struct WaitGuard<'a>(Request<'a>);

impl<'a> Drop for WaitGuard<'a> {
    fn drop(&mut self) {
        if let Err(err) = self.0.wait() {
            error!("waiting on a guarded request failed: {}", err);
        }
    }
}

impl<'a> From<WaitGuard<'a>> for Request<'a> {
    fn from(mut guard: WaitGuard<'a>) -> Self {
        mem::take(&mut guard.0)
    }
}

impl<'a> From<Request<'a>> for WaitGuard<'a> {
    fn from(req: Request<'a>) -> Self {
        WaitGuard(req)
    }
}

/// Guard object that tries to cancel and waits for the completion of an operation when it is
/// dropped
///
/// The guard can be constructed or deconstructed using the `From` and `Into` traits.
///
/// # Examples
///
/// See `demos/immediate.rs`
#[derive(Debug)]
pub struct CancelGuard<'a>(Request<'a>);

impl<'a> Drop for CancelGuard<'a> {
    fn drop(&mut self) {
        let outcome = self.0.cancel().and_then(|()| self.0.wait());
        if let Err(err) = outcome {
            error!("cancelling a guarded request failed: {}", err);
        }
    }
}

impl<'a> From<CancelGuard<'a>> for Request<'a> {
    fn from(mut guard: CancelGuard<'a>) -> Self {
        mem::take(&mut guard.0)
    }
}

impl<'a> From<Request<'a>> for CancelGuard<'a> {
    fn from(req: Request<'a>) -> Self {
        CancelGuard(req)
    }
}

/// Result type for `RequestCollection::test_any`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestAny {
    /// Indicates that there are no active requests in the collection.
    NoneActive,
    /// Indicates that, while there are active requests in the collection, none of them were
    /// completed.
    NoneComplete,
    /// Indicates which request in the collection was completed.
    Completed(usize, Status),
}

/// A collection of request objects for non-blocking operations, borrowing their buffers for `'a`
///
/// Completed requests keep their slot, so indices reported by the completion methods always
/// refer to the order in which requests were pushed.
///
/// # Examples
///
/// See `demos/wait_any.rs`
#[must_use]
#[derive(Debug, Default)]
pub struct RequestCollection<'a> {
    requests: Vec<Request<'a>>,
    // Statuses of requests completed by a `test_all` that did not yet see every request finish.
    finished: Vec<Option<Status>>,
}

impl<'a> RequestCollection<'a> {
    /// Constructs a new, empty `RequestCollection` object.
    pub fn new() -> Self {
        RequestCollection::default()
    }

    /// Constructs a new, empty `RequestCollection` with reserved space for `capacity` requests.
    pub fn with_capacity(capacity: usize) -> Self {
        RequestCollection {
            requests: Vec::with_capacity(capacity),
            finished: Vec::with_capacity(capacity),
        }
    }

    /// Pushes a new request into the collection.
    pub fn push(&mut self, request: Request<'a>) {
        self.requests.push(request);
        self.finished.push(None);
    }

    /// Returns the number of request slots in the collection.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True if the collection has no slots
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Number of requests in the collection that have not been completed
    pub fn outstanding(&self) -> usize {
        self.requests.iter().filter(|request| request.active()).count()
    }

    fn anything_to_report(&self) -> bool {
        self.requests
            .iter()
            .any(|request| request.active() || request.has_unreported())
    }

    /// The request slots
    pub fn requests(&self) -> &[Request<'a>] {
        &self.requests
    }

    /// Blocks until any active request in the collection completes.
    ///
    /// Returns `Some((index, status))` for the completed request, or `None` if no request in the
    /// collection is active.
    pub fn wait_any(&mut self) -> Result<Option<(usize, Status)>> {
        let (status, index) = wait_any(&mut self.requests)?;
        Ok((index < self.requests.len()).then_some((index, status)))
    }

    /// Completes one finished request, if any.
    pub fn test_any(&mut self) -> Result<TestAny> {
        Ok(match test_any(&mut self.requests)? {
            None => TestAny::NoneComplete,
            Some((_, index)) if index == self.requests.len() => TestAny::NoneActive,
            Some((status, index)) => TestAny::Completed(index, status),
        })
    }

    /// Blocks until every request in the collection completes and returns their statuses in
    /// slot order. Slots that were already inactive report `Status::empty()`.
    pub fn wait_all(&mut self) -> Result<Vec<Status>> {
        let mut statuses = wait_all(&mut self.requests)?;
        for (status, finished) in statuses.iter_mut().zip(self.finished.iter_mut()) {
            if let Some(finished) = finished.take() {
                *status = finished;
            }
        }
        Ok(statuses)
    }

    /// Returns the statuses of all requests if every request has completed, `None` otherwise.
    ///
    /// Requests that finish during an unsuccessful call are completed right away; their statuses
    /// are kept until a later call reports the whole collection.
    pub fn test_all(&mut self) -> Result<Option<Vec<Status>>> {
        let mut done = true;
        for (request, finished) in self.requests.iter_mut().zip(self.finished.iter_mut()) {
            if let Some(status) = request.take_unreported() {
                *finished = Some(status);
                continue;
            }
            if !request.active() {
                continue;
            }
            match request.test()? {
                Some(status) => *finished = Some(status),
                None => done = false,
            }
        }
        if !done {
            return Ok(None);
        }
        Ok(Some(
            self.finished
                .iter_mut()
                .map(|finished| finished.take().unwrap_or_else(Status::empty))
                .collect(),
        ))
    }

    /// Blocks until at least one active request completes.
    ///
    /// Returns the slot indices and statuses of every request completed by the call, or `None`
    /// if no request in the collection is active.
    pub fn wait_some(&mut self) -> Result<Option<(Vec<usize>, Vec<Status>)>> {
        if !self.anything_to_report() {
            return Ok(None);
        }
        let completed = multiple::wait_some_indexed(&mut self.requests)?;
        Ok(Some(completed.into_iter().unzip()))
    }

    /// Completes every request that has finished, without blocking.
    ///
    /// Returns `None` if no request in the collection is active.
    pub fn test_some(&mut self) -> Result<Option<(Vec<usize>, Vec<Status>)>> {
        if !self.anything_to_report() {
            return Ok(None);
        }
        let completed = multiple::test_some_indexed(&mut self.requests)?;
        Ok(Some(completed.into_iter().unzip()))
    }
}

impl<'a> FromIterator<Request<'a>> for RequestCollection<'a> {
    fn from_iter<T: IntoIterator<Item = Request<'a>>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let mut collection = RequestCollection::with_capacity(iter.size_hint().0);
        for request in iter {
            collection.push(request);
        }
        collection
    }
}

impl<'a> Extend<Request<'a>> for RequestCollection<'a> {
    fn extend<T: IntoIterator<Item = Request<'a>>>(&mut self, iter: T) {
        for request in iter {
            self.push(request);
        }
    }
}

/// Collects an iterator of `Request` objects into a `RequestCollection` object
pub trait CollectRequests<'a>: IntoIterator<Item = Request<'a>> {
    /// Consumes and converts an iterator of `Request` objects into a `RequestCollection` object.
    fn collect_requests(self) -> RequestCollection<'a>;
}

impl<'a, T> CollectRequests<'a> for T
where
    T: IntoIterator<Item = Request<'a>>,
{
    fn collect_requests(self) -> RequestCollection<'a> {
        self.into_iter().collect()
    }
}
