//! In-process transport
//!
//! `LocalUniverse` connects a fixed number of ranks living in the same process, usually one
//! thread per rank. All endpoints share one matching engine guarded by a mutex; a condition
//! variable wakes blocked callers whenever an operation makes progress.
//!
//! Matching follows the usual message passing rules: messages between a pair of ranks are
//! non-overtaking, receives are matched in the order they were posted, and a message claimed by a
//! matched probe is invisible to everyone but the matching `mrecv`. Sends up to the configured
//! eager limit complete as soon as they are queued; larger sends complete when they are matched.
//!
//! # Examples
//!
//! ```
//! use rankwire::traits::*;
//! use rankwire::transport::local::LocalUniverse;
//!
//! let sums = LocalUniverse::run(3, |world| {
//!     let next = (world.rank() + 1) % world.size();
//!     let previous = (world.rank() + world.size() - 1) % world.size();
//!     world.process_at_rank(next).send(&world.rank()).unwrap();
//!     let (received, _) = world.process_at_rank(previous).receive::<i32>().unwrap();
//!     received
//! });
//! assert_eq!(sums, vec![2, 0, 1]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, trace};

use super::{
    Completion, RawMessage, RawRequest, RawResult, RawStatus, Transport, ANY_SOURCE, ANY_TAG,
    PROC_NULL, SUCCESS, TAG_UB,
};
use crate::environment::Config;
use crate::error::ErrorKind;
use crate::topology::{Communicator, Rank};
use crate::Tag;

/// A group of ranks connected in memory
#[derive(Debug, Clone)]
pub struct LocalUniverse {
    shared: Arc<Shared>,
    config: Config,
}

#[derive(Debug)]
struct Shared {
    size: Rank,
    state: Mutex<State>,
    progress: Condvar,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    mailboxes: Vec<Mailbox>,
    operations: HashMap<u64, Operation>,
}

/// Messages and receives addressed to one rank
#[derive(Debug, Default)]
struct Mailbox {
    unexpected: VecDeque<Envelope>,
    posted: VecDeque<PostedReceive>,
}

#[derive(Debug)]
struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Vec<u8>,
    // Rendezvous send waiting for this envelope to be matched.
    send: Option<u64>,
    // Matched probe that claimed this envelope.
    claim: Option<u64>,
}

#[derive(Debug)]
struct PostedReceive {
    id: u64,
    source: Rank,
    tag: Tag,
    capacity: usize,
}

#[derive(Debug)]
struct Operation {
    owner: Rank,
    outcome: Outcome,
}

#[derive(Debug)]
enum Outcome {
    Pending,
    // Freed while pending; dropped once it finishes.
    Detached,
    Complete(Completion),
}

fn matches(source: Rank, tag: Tag, envelope: &Envelope) -> bool {
    (source == ANY_SOURCE || source == envelope.source)
        && (tag == envelope.tag || (tag == ANY_TAG && (0..=TAG_UB).contains(&envelope.tag)))
}

fn received(source: Rank, tag: Tag, mut payload: Vec<u8>, capacity: usize) -> Completion {
    let error = if payload.len() > capacity {
        payload.truncate(capacity);
        ErrorKind::Truncate.code()
    } else {
        SUCCESS
    };
    Completion {
        status: RawStatus {
            source,
            tag,
            error,
            len: payload.len(),
            cancelled: false,
        },
        buffer: Some(payload),
    }
}

fn sent(destination: Rank, tag: Tag, len: usize) -> Completion {
    Completion {
        status: RawStatus {
            source: destination,
            tag,
            error: SUCCESS,
            len,
            cancelled: false,
        },
        buffer: None,
    }
}

impl State {
    fn allocate(&mut self, owner: Rank, outcome: Outcome) -> u64 {
        self.next_id += 1;
        self.operations
            .insert(self.next_id, Operation { owner, outcome });
        self.next_id
    }

    fn finish(&mut self, id: u64, completion: Completion) {
        let detached = match self.operations.get_mut(&id) {
            Some(operation) => match operation.outcome {
                Outcome::Detached => true,
                _ => {
                    operation.outcome = Outcome::Complete(completion);
                    false
                }
            },
            None => false,
        };
        if detached {
            self.operations.remove(&id);
        }
    }

    /// Hand a matched envelope to a receive and finish the sender's rendezvous.
    fn deliver(&mut self, destination: Rank, envelope: Envelope, receive: u64, capacity: usize) {
        trace!(
            "rank {} matched {} bytes from rank {} (tag {})",
            destination,
            envelope.payload.len(),
            envelope.source,
            envelope.tag
        );
        if let Some(send) = envelope.send {
            self.finish(send, sent(destination, envelope.tag, envelope.payload.len()));
        }
        self.finish(
            receive,
            received(envelope.source, envelope.tag, envelope.payload, capacity),
        );
    }

    fn find_unclaimed(&self, rank: Rank, source: Rank, tag: Tag) -> Option<usize> {
        self.mailboxes[rank as usize]
            .unexpected
            .iter()
            .position(|envelope| envelope.claim.is_none() && matches(source, tag, envelope))
    }
}

impl LocalUniverse {
    /// A universe of `size` ranks configured from the environment.
    pub fn new(size: Rank) -> LocalUniverse {
        LocalUniverse::with_config(size, Config::global().clone())
    }

    /// A universe of `size` ranks using `config`.
    pub fn with_config(size: Rank, config: Config) -> LocalUniverse {
        assert!(size > 0, "a universe needs at least one rank");
        let state = State {
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            ..State::default()
        };
        LocalUniverse {
            shared: Arc::new(Shared {
                size,
                state: Mutex::new(state),
                progress: Condvar::new(),
            }),
            config,
        }
    }

    /// Number of ranks
    pub fn size(&self) -> Rank {
        self.shared.size
    }

    /// The endpoint of `rank`
    pub fn endpoint(&self, rank: Rank) -> LocalEndpoint {
        assert!(
            (0..self.size()).contains(&rank),
            "rank {} is outside of a universe of size {}",
            rank,
            self.size()
        );
        LocalEndpoint {
            rank,
            eager_limit: self.config.eager_limit(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// The world communicator as seen from `rank`
    pub fn world(&self, rank: Rank) -> Communicator {
        Communicator::new(Arc::new(self.endpoint(rank)), self.config.clone())
    }

    /// One world communicator per rank, in rank order
    pub fn communicators(&self) -> Vec<Communicator> {
        (0..self.size()).map(|rank| self.world(rank)).collect()
    }

    /// Run `f` once per rank, each on its own thread, and collect the results in rank order.
    ///
    /// Panics in any rank are propagated to the caller.
    pub fn run<F, R>(size: Rank, f: F) -> Vec<R>
    where
        F: Fn(Communicator) -> R + Sync,
        R: Send,
    {
        LocalUniverse::new(size).spawn(f)
    }

    /// Like `run`, with an explicit configuration.
    pub fn run_with<F, R>(config: Config, size: Rank, f: F) -> Vec<R>
    where
        F: Fn(Communicator) -> R + Sync,
        R: Send,
    {
        LocalUniverse::with_config(size, config).spawn(f)
    }

    fn spawn<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(Communicator) -> R + Sync,
        R: Send,
    {
        debug!("starting {} local ranks", self.size());
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .communicators()
                .into_iter()
                .map(|world| scope.spawn(move || f(world)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }
}

/// One rank's view of a `LocalUniverse`
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    rank: Rank,
    eager_limit: usize,
    shared: Arc<Shared>,
}

impl LocalEndpoint {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn block<'g>(&self, guard: MutexGuard<'g, State>) -> MutexGuard<'g, State> {
        self.shared
            .progress
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.shared.progress.notify_all();
    }

    fn check_rank(&self, rank: Rank) -> RawResult<()> {
        if (0..self.shared.size).contains(&rank) {
            Ok(())
        } else {
            Err(ErrorKind::Rank)
        }
    }

    fn check_source(&self, source: Rank) -> RawResult<()> {
        if source == ANY_SOURCE {
            Ok(())
        } else {
            self.check_rank(source)
        }
    }

    fn check_tag(tag: Tag) -> RawResult<()> {
        if tag >= 0 {
            Ok(())
        } else {
            Err(ErrorKind::Tag)
        }
    }

    /// Take the completion of `request` out of `state` if it is there.
    fn reap(&self, state: &mut State, request: &mut RawRequest) -> RawResult<Option<Completion>> {
        let id = request.as_raw();
        let complete = match state.operations.get(&id) {
            Some(operation) if operation.owner == self.rank => {
                matches!(operation.outcome, Outcome::Complete(_))
            }
            _ => return Err(ErrorKind::Request),
        };
        if !complete {
            return Ok(None);
        }
        match state.operations.remove(&id) {
            Some(Operation {
                outcome: Outcome::Complete(completion),
                ..
            }) => {
                *request = RawRequest::NULL;
                Ok(Some(completion))
            }
            _ => Ok(None),
        }
    }

    fn find_claimed(&self, state: &State, message: RawMessage) -> Option<usize> {
        state.mailboxes[self.rank as usize]
            .unexpected
            .iter()
            .position(|envelope| envelope.claim == Some(message.as_raw()))
    }

    fn probe_status(envelope: &Envelope) -> RawStatus {
        RawStatus {
            source: envelope.source,
            tag: envelope.tag,
            error: SUCCESS,
            len: envelope.payload.len(),
            cancelled: false,
        }
    }

    fn try_claim(&self, state: &mut State, source: Rank, tag: Tag) -> Option<(RawMessage, RawStatus)> {
        let position = state.find_unclaimed(self.rank, source, tag)?;
        state.next_id += 1;
        let id = state.next_id;
        let envelope = &mut state.mailboxes[self.rank as usize].unexpected[position];
        envelope.claim = Some(id);
        Some((RawMessage::from_raw(id), LocalEndpoint::probe_status(envelope)))
    }
}

impl Transport for LocalEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> Rank {
        self.shared.size
    }

    fn isend(&self, destination: Rank, tag: Tag, payload: Vec<u8>) -> RawResult<RawRequest> {
        LocalEndpoint::check_tag(tag)?;
        let mut state = self.lock();
        if destination == PROC_NULL {
            let id = state.allocate(self.rank, Outcome::Complete(Completion::proc_null()));
            return Ok(RawRequest::from_raw(id));
        }
        self.check_rank(destination)?;

        let len = payload.len();
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload,
            send: None,
            claim: None,
        };
        let mailbox = &mut state.mailboxes[destination as usize];
        let posted = mailbox
            .posted
            .iter()
            .position(|receive| matches(receive.source, receive.tag, &envelope))
            .and_then(|position| mailbox.posted.remove(position));

        let id = match posted {
            Some(receive) => {
                let id = state.allocate(self.rank, Outcome::Complete(sent(destination, tag, len)));
                state.deliver(destination, envelope, receive.id, receive.capacity);
                self.notify();
                id
            }
            None if len <= self.eager_limit => {
                let id = state.allocate(self.rank, Outcome::Complete(sent(destination, tag, len)));
                state.mailboxes[destination as usize]
                    .unexpected
                    .push_back(envelope);
                self.notify();
                id
            }
            None => {
                let id = state.allocate(self.rank, Outcome::Pending);
                state.mailboxes[destination as usize]
                    .unexpected
                    .push_back(Envelope {
                        send: Some(id),
                        ..envelope
                    });
                self.notify();
                id
            }
        };
        Ok(RawRequest::from_raw(id))
    }

    fn irecv(&self, source: Rank, tag: Tag, buffer: Vec<u8>) -> RawResult<RawRequest> {
        let mut state = self.lock();
        if source == PROC_NULL {
            let id = state.allocate(self.rank, Outcome::Complete(Completion::proc_null()));
            return Ok(RawRequest::from_raw(id));
        }
        self.check_source(source)?;

        let capacity = buffer.len();
        let id = state.allocate(self.rank, Outcome::Pending);
        match state.find_unclaimed(self.rank, source, tag) {
            Some(position) => {
                let envelope = state.mailboxes[self.rank as usize]
                    .unexpected
                    .remove(position)
                    .ok_or(ErrorKind::Intern)?;
                state.deliver(self.rank, envelope, id, capacity);
                self.notify();
            }
            None => state.mailboxes[self.rank as usize]
                .posted
                .push_back(PostedReceive {
                    id,
                    source,
                    tag,
                    capacity,
                }),
        }
        Ok(RawRequest::from_raw(id))
    }

    fn test(&self, request: &mut RawRequest) -> RawResult<Option<Completion>> {
        if request.is_null() {
            return Ok(Some(Completion::empty()));
        }
        let mut state = self.lock();
        self.reap(&mut state, request)
    }

    fn wait(&self, request: &mut RawRequest) -> RawResult<Completion> {
        if request.is_null() {
            return Ok(Completion::empty());
        }
        let mut state = self.lock();
        loop {
            if let Some(completion) = self.reap(&mut state, request)? {
                return Ok(completion);
            }
            state = self.block(state);
        }
    }

    fn is_complete(&self, request: RawRequest) -> RawResult<bool> {
        if request.is_null() {
            return Ok(true);
        }
        let state = self.lock();
        match state.operations.get(&request.as_raw()) {
            Some(operation) if operation.owner == self.rank => {
                Ok(matches!(operation.outcome, Outcome::Complete(_)))
            }
            _ => Err(ErrorKind::Request),
        }
    }

    fn wait_any(&self, requests: &mut [RawRequest]) -> RawResult<Option<(usize, Completion)>> {
        let mut state = self.lock();
        loop {
            let mut any_active = false;
            for (index, request) in requests.iter_mut().enumerate() {
                if request.is_null() {
                    continue;
                }
                any_active = true;
                if let Some(completion) = self.reap(&mut state, request)? {
                    return Ok(Some((index, completion)));
                }
            }
            if !any_active {
                return Ok(None);
            }
            state = self.block(state);
        }
    }

    fn cancel(&self, request: RawRequest) -> RawResult<()> {
        if request.is_null() {
            return Ok(());
        }
        let id = request.as_raw();
        let mut state = self.lock();
        match state.operations.get(&id) {
            Some(operation) if operation.owner == self.rank => {
                if !matches!(operation.outcome, Outcome::Pending) {
                    return Ok(());
                }
            }
            _ => return Err(ErrorKind::Request),
        }

        let mailbox = &mut state.mailboxes[self.rank as usize];
        if let Some(position) = mailbox.posted.iter().position(|receive| receive.id == id) {
            let tag = mailbox.posted.remove(position).map_or(ANY_TAG, |receive| receive.tag);
            debug!("rank {} cancelled receive {}", self.rank, id);
            state.finish(id, Completion::cancelled(tag));
            self.notify();
            return Ok(());
        }

        let queued = state.mailboxes.iter_mut().find_map(|mailbox| {
            let position = mailbox
                .unexpected
                .iter()
                .position(|envelope| envelope.send == Some(id) && envelope.claim.is_none())?;
            mailbox.unexpected.remove(position)
        });
        if let Some(envelope) = queued {
            debug!("rank {} cancelled send {}", self.rank, id);
            state.finish(id, Completion::cancelled(envelope.tag));
            self.notify();
        }
        Ok(())
    }

    fn free(&self, request: &mut RawRequest) {
        if request.is_null() {
            return;
        }
        let id = request.as_raw();
        *request = RawRequest::NULL;
        let mut state = self.lock();
        let pending = match state.operations.get(&id) {
            Some(operation) if operation.owner == self.rank => {
                matches!(operation.outcome, Outcome::Pending)
            }
            _ => return,
        };
        if !pending {
            state.operations.remove(&id);
            return;
        }
        let mailbox = &mut state.mailboxes[self.rank as usize];
        match mailbox.posted.iter().position(|receive| receive.id == id) {
            Some(position) => {
                mailbox.posted.remove(position);
                state.operations.remove(&id);
            }
            None => {
                if let Some(operation) = state.operations.get_mut(&id) {
                    operation.outcome = Outcome::Detached;
                }
            }
        }
    }

    fn iprobe(&self, source: Rank, tag: Tag) -> RawResult<Option<RawStatus>> {
        if source == PROC_NULL {
            return Ok(Some(RawStatus::PROC_NULL));
        }
        self.check_source(source)?;
        let state = self.lock();
        Ok(state.find_unclaimed(self.rank, source, tag).map(|position| {
            LocalEndpoint::probe_status(&state.mailboxes[self.rank as usize].unexpected[position])
        }))
    }

    fn probe(&self, source: Rank, tag: Tag) -> RawResult<RawStatus> {
        if source == PROC_NULL {
            return Ok(RawStatus::PROC_NULL);
        }
        self.check_source(source)?;
        let mut state = self.lock();
        loop {
            if let Some(position) = state.find_unclaimed(self.rank, source, tag) {
                let envelope = &state.mailboxes[self.rank as usize].unexpected[position];
                return Ok(LocalEndpoint::probe_status(envelope));
            }
            state = self.block(state);
        }
    }

    fn improbe(&self, source: Rank, tag: Tag) -> RawResult<Option<(RawMessage, RawStatus)>> {
        if source == PROC_NULL {
            return Ok(Some((RawMessage::NO_PROC, RawStatus::PROC_NULL)));
        }
        self.check_source(source)?;
        let mut state = self.lock();
        Ok(self.try_claim(&mut state, source, tag))
    }

    fn mprobe(&self, source: Rank, tag: Tag) -> RawResult<(RawMessage, RawStatus)> {
        if source == PROC_NULL {
            return Ok((RawMessage::NO_PROC, RawStatus::PROC_NULL));
        }
        self.check_source(source)?;
        let mut state = self.lock();
        loop {
            if let Some(claimed) = self.try_claim(&mut state, source, tag) {
                return Ok(claimed);
            }
            state = self.block(state);
        }
    }

    fn mrecv(&self, message: &mut RawMessage, buffer: Vec<u8>) -> RawResult<Completion> {
        if *message == RawMessage::NO_PROC {
            *message = RawMessage::NULL;
            return Ok(Completion::proc_null());
        }
        let mut state = self.lock();
        let position = self
            .find_claimed(&state, *message)
            .ok_or(ErrorKind::Request)?;
        let envelope = state.mailboxes[self.rank as usize]
            .unexpected
            .remove(position)
            .ok_or(ErrorKind::Intern)?;
        *message = RawMessage::NULL;
        if let Some(send) = envelope.send {
            state.finish(send, sent(self.rank, envelope.tag, envelope.payload.len()));
            self.notify();
        }
        Ok(received(
            envelope.source,
            envelope.tag,
            envelope.payload,
            buffer.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(eager_limit: usize) -> (LocalEndpoint, LocalEndpoint) {
        let universe = LocalUniverse::with_config(2, Config::default().with_eager_limit(eager_limit));
        (universe.endpoint(0), universe.endpoint(1))
    }

    #[test]
    fn eager_send_completes_before_matching() {
        let (a, b) = pair(1024);
        let mut send = a.isend(1, 3, vec![1, 2, 3]).unwrap();
        assert!(a.test(&mut send).unwrap().is_some());
        assert!(send.is_null());

        let mut recv = b.irecv(0, 3, vec![0; 8]).unwrap();
        let completion = b.wait(&mut recv).unwrap();
        assert_eq!(completion.status.source, 0);
        assert_eq!(completion.status.tag, 3);
        assert_eq!(completion.status.len, 3);
        assert_eq!(completion.buffer.unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn rendezvous_send_completes_on_match() {
        let (a, b) = pair(4);
        let mut send = a.isend(1, 0, vec![9; 16]).unwrap();
        assert!(a.test(&mut send).unwrap().is_none());
        assert!(!a.is_complete(send).unwrap());

        let mut recv = b.irecv(ANY_SOURCE, ANY_TAG, vec![0; 16]).unwrap();
        assert!(a.is_complete(send).unwrap());
        assert_eq!(a.wait(&mut send).unwrap().status.len, 16);
        assert_eq!(b.wait(&mut recv).unwrap().buffer.unwrap(), vec![9; 16]);
    }

    #[test]
    fn posted_receives_match_in_order() {
        let (a, b) = pair(1024);
        let mut first = b.irecv(0, 1, vec![0; 1]).unwrap();
        let mut second = b.irecv(0, 1, vec![0; 1]).unwrap();
        a.isend(1, 1, vec![10]).unwrap();
        a.isend(1, 1, vec![20]).unwrap();
        assert_eq!(b.wait(&mut second).unwrap().buffer.unwrap(), vec![20]);
        assert_eq!(b.wait(&mut first).unwrap().buffer.unwrap(), vec![10]);
    }

    #[test]
    fn oversized_messages_are_truncated() {
        let (a, b) = pair(1024);
        a.isend(1, 0, vec![1, 2, 3, 4]).unwrap();
        let mut recv = b.irecv(0, 0, vec![0; 2]).unwrap();
        let completion = b.wait(&mut recv).unwrap();
        assert_eq!(completion.status.error_kind(), Some(ErrorKind::Truncate));
        assert_eq!(completion.buffer.unwrap(), vec![1, 2]);
    }

    #[test]
    fn wildcard_tag_skips_reserved_tags() {
        let (a, b) = pair(1024);
        a.isend(1, TAG_UB + 1, vec![1]).unwrap();
        assert!(b.iprobe(0, ANY_TAG).unwrap().is_none());
        assert_eq!(b.iprobe(0, TAG_UB + 1).unwrap().unwrap().len, 1);
    }

    #[test]
    fn matched_probe_hides_the_message() {
        let (a, b) = pair(1024);
        a.isend(1, 5, vec![7; 5]).unwrap();
        let (mut message, status) = b.improbe(0, 5).unwrap().unwrap();
        assert_eq!(status.len, 5);
        assert!(b.iprobe(0, 5).unwrap().is_none());
        assert!(b.improbe(ANY_SOURCE, ANY_TAG).unwrap().is_none());

        let completion = b.mrecv(&mut message, vec![0; status.len]).unwrap();
        assert_eq!(completion.buffer.unwrap(), vec![7; 5]);
        assert_eq!(message, RawMessage::NULL);
        assert_eq!(b.mrecv(&mut message, Vec::new()).unwrap_err(), ErrorKind::Request);
    }

    #[test]
    fn cancelled_receive_reports_cancellation() {
        let (_, b) = pair(1024);
        let mut recv = b.irecv(0, 2, vec![0; 4]).unwrap();
        b.cancel(recv).unwrap();
        let completion = b.wait(&mut recv).unwrap();
        assert!(completion.status.cancelled);
        assert!(completion.buffer.is_none());
    }

    #[test]
    fn cancel_after_match_has_no_effect() {
        let (a, b) = pair(1024);
        a.isend(1, 2, vec![4]).unwrap();
        let mut recv = b.irecv(0, 2, vec![0; 4]).unwrap();
        b.cancel(recv).unwrap();
        let completion = b.wait(&mut recv).unwrap();
        assert!(!completion.status.cancelled);
        assert_eq!(completion.buffer.unwrap(), vec![4]);
    }

    #[test]
    fn null_process_completes_immediately() {
        let (a, _) = pair(1024);
        let mut send = a.isend(PROC_NULL, 0, vec![1]).unwrap();
        let mut recv = a.irecv(PROC_NULL, 0, vec![0; 1]).unwrap();
        assert_eq!(a.wait(&mut send).unwrap().status.source, PROC_NULL);
        assert_eq!(a.wait(&mut recv).unwrap().status.len, 0);
        assert_eq!(a.probe(PROC_NULL, ANY_TAG).unwrap(), RawStatus::PROC_NULL);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        let (a, _) = pair(1024);
        assert_eq!(a.isend(2, 0, Vec::new()).unwrap_err(), ErrorKind::Rank);
        assert_eq!(a.isend(1, ANY_TAG, Vec::new()).unwrap_err(), ErrorKind::Tag);
        assert_eq!(
            a.test(&mut RawRequest::from_raw(999)).unwrap_err(),
            ErrorKind::Request
        );
    }

    #[test]
    fn wait_all_reports_failures_in_status() {
        let (a, b) = pair(1024);
        a.isend(1, 0, vec![1, 2, 3]).unwrap();
        let mut requests = [
            b.irecv(0, 0, vec![0; 1]).unwrap(),
            b.irecv(0, 9, vec![0; 1]).unwrap(),
        ];
        let mut completions = Vec::new();
        assert_eq!(
            b.wait_all(&mut requests, &mut completions).unwrap_err(),
            ErrorKind::InStatus
        );
        assert_eq!(completions[0].status.error_kind(), Some(ErrorKind::Truncate));
        assert_eq!(completions[1].status.error_kind(), Some(ErrorKind::Pending));
        assert!(requests[0].is_null());
        assert!(!requests[1].is_null());
        b.free(&mut requests[1]);
    }

    #[test]
    fn wait_any_picks_a_finished_request() {
        let (a, b) = pair(1024);
        let mut requests = [
            RawRequest::NULL,
            b.irecv(0, 1, vec![0; 1]).unwrap(),
            b.irecv(0, 2, vec![0; 1]).unwrap(),
        ];
        a.isend(1, 2, vec![5]).unwrap();
        let (index, completion) = b.wait_any(&mut requests).unwrap().unwrap();
        assert_eq!(index, 2);
        assert_eq!(completion.status.tag, 2);
        b.free(&mut requests[1]);
        assert!(b.wait_any(&mut requests).unwrap().is_none());
    }
}
