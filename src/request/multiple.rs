//! Completion of several requests at once
//!
//! Requests of any protocol can be mixed. The generic path tests every active request in turn and
//! backs off between passes. When every request still outstanding is a single transport
//! operation on one transport, the native batch call of that transport is used instead.

use std::mem;
use std::sync::Arc;

use log::{debug, trace};

use super::backoff::Poller;
use super::Request;
use crate::environment::Polling;
use crate::error::{Error, ErrorKind, Result, Routine};
use crate::point_to_point::Status;
use crate::transport::{RawRequest, Transport};

/// Where `wait_some` and `test_some` place a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Pending,
    Completed,
    Inactive,
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// The transport shared by the active requests among `requests`, provided all of them are
/// trivial.
fn trivial_transport<'r, 'a: 'r>(
    requests: impl Iterator<Item = &'r Request<'a>>,
) -> Option<Arc<dyn Transport>> {
    let mut shared: Option<&Arc<dyn Transport>> = None;
    for request in requests.filter(|request| request.active()) {
        if !request.is_trivial() {
            return None;
        }
        let transport = request.transport()?;
        match shared {
            Some(shared) if !same_transport(shared, transport) => return None,
            Some(_) => {}
            None => shared = Some(transport),
        }
    }
    shared.cloned()
}

fn polling_of(requests: &[Request<'_>]) -> Polling {
    requests
        .iter()
        .find(|request| request.active())
        .map_or_else(Polling::default, Request::polling)
}

/// Slot indices and native tokens of the trivial requests selected by `select`
fn trivial_tokens(
    requests: &[Request<'_>],
    select: impl Fn(usize) -> bool,
) -> (Vec<usize>, Vec<RawRequest>) {
    requests
        .iter()
        .enumerate()
        .filter(|&(index, _)| select(index))
        .filter_map(|(index, request)| request.trivial_token().map(|token| (index, token)))
        .unzip()
}

/// Hand the selected trivial requests to the transport's `wait_any`.
fn wait_any_native(
    transport: &dyn Transport,
    requests: &mut [Request<'_>],
    select: impl Fn(usize) -> bool,
) -> Result<(Status, usize)> {
    let (indices, mut tokens) = trivial_tokens(requests, select);
    debug!("waiting natively on {} requests", tokens.len());
    match transport.wait_any(&mut tokens).routine("wait_any")? {
        Some((slot, completion)) => {
            let index = indices[slot];
            let status = requests[index].complete_trivial("wait_any", completion)?;
            Ok((status, index))
        }
        None => Err(Error::transport("wait_any", ErrorKind::Request)),
    }
}

/// Wait for one of the requests to finish.
///
/// Returns the status of the completed request and its index. If none of the requests is active,
/// returns `Status::empty()` and `requests.len()`.
///
/// # Examples
///
/// See `demos/wait_any.rs`
pub fn wait_any(requests: &mut [Request<'_>]) -> Result<(Status, usize)> {
    let mut poller = Poller::new(polling_of(requests));
    loop {
        if let Some(found) = test_any(requests)? {
            return Ok(found);
        }
        if let Some(transport) = trivial_transport(requests.iter()) {
            return wait_any_native(transport.as_ref(), requests, |_| true);
        }
        poller.pause();
    }
}

/// Complete one of the requests if any has finished.
///
/// Returns `None` if active requests remain but none has finished. Otherwise behaves like
/// `wait_any`: `Some((status, index))` for the completed request, or
/// `Some((Status::empty(), requests.len()))` if none of the requests is active.
pub fn test_any(requests: &mut [Request<'_>]) -> Result<Option<(Status, usize)>> {
    let mut any_active = false;
    for (index, request) in requests.iter_mut().enumerate() {
        if let Some(status) = request.take_unreported() {
            return Ok(Some((status, index)));
        }
        if !request.active() {
            continue;
        }
        any_active = true;
        if let Some(status) = request.test()? {
            return Ok(Some((status, index)));
        }
    }
    if any_active {
        Ok(None)
    } else {
        Ok(Some((Status::empty(), requests.len())))
    }
}

/// Wait for all requests to finish.
///
/// Returns the statuses in input order; inactive requests report `Status::empty()`. If a request
/// fails, the first failure is returned and requests that are still outstanding stay active.
/// Requests that did finish keep their statuses for the next completion call.
///
/// # Examples
///
/// See `demos/immediate.rs`
pub fn wait_all(requests: &mut [Request<'_>]) -> Result<Vec<Status>> {
    let mut statuses: Vec<Option<Status>> =
        requests.iter_mut().map(Request::take_unreported).collect();
    match wait_all_into(requests, &mut statuses) {
        Ok(()) => Ok(statuses
            .into_iter()
            .map(|status| status.unwrap_or_else(Status::empty))
            .collect()),
        Err(err) => {
            let completed = statuses
                .into_iter()
                .enumerate()
                .filter_map(|(index, status)| status.map(|status| (index, status)));
            keep_completed(requests, completed);
            Err(err)
        }
    }
}

/// Park the statuses of requests completed by a call that is about to fail.
fn keep_completed(
    requests: &mut [Request<'_>],
    completed: impl IntoIterator<Item = (usize, Status)>,
) {
    let mut kept = 0;
    for (index, status) in completed {
        requests[index].keep_unreported(status);
        kept += 1;
    }
    if kept > 0 {
        debug!("keeping {} statuses for the next completion call", kept);
    }
}

fn wait_all_into(requests: &mut [Request<'_>], statuses: &mut [Option<Status>]) -> Result<()> {
    let mut poller = Poller::new(polling_of(requests));
    loop {
        let mut pending = false;
        for (request, status) in requests.iter_mut().zip(statuses.iter_mut()) {
            if !request.active() {
                continue;
            }
            match request.test()? {
                Some(done) => *status = Some(done),
                None => pending = true,
            }
        }
        if !pending {
            return Ok(());
        }
        if let Some(transport) = trivial_transport(requests.iter()) {
            return wait_all_native(transport.as_ref(), requests, statuses);
        }
        poller.pause();
    }
}

fn wait_all_native(
    transport: &dyn Transport,
    requests: &mut [Request<'_>],
    statuses: &mut [Option<Status>],
) -> Result<()> {
    let (indices, mut tokens) = trivial_tokens(requests, |_| true);
    debug!("waiting natively on all of {} requests", tokens.len());
    let mut completions = Vec::with_capacity(tokens.len());
    let outcome = transport.wait_all(&mut tokens, &mut completions);

    let mut first_error = None;
    for ((index, token), completion) in indices.into_iter().zip(tokens).zip(completions) {
        if completion.status.error_kind() == Some(ErrorKind::Pending) {
            requests[index].set_trivial_token(token);
            continue;
        }
        match requests[index].complete_trivial("wait_all", completion) {
            Ok(status) => statuses[index] = Some(status),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    match (outcome, first_error) {
        (_, Some(err)) => Err(err),
        (Ok(()), None) => Ok(()),
        (Err(kind), None) => Err(Error::transport("wait_all", kind)),
    }
}

/// Test each active request once and sort it into its bucket.
fn sweep(
    requests: &mut [Request<'_>],
    buckets: &mut Vec<Bucket>,
    completed: &mut Vec<(usize, Status)>,
) -> Result<()> {
    buckets.clear();
    for (index, request) in requests.iter_mut().enumerate() {
        let bucket = if let Some(status) = request.take_unreported() {
            completed.push((index, status));
            Bucket::Completed
        } else if !request.active() {
            Bucket::Inactive
        } else if let Some(status) = request.test()? {
            completed.push((index, status));
            Bucket::Completed
        } else {
            Bucket::Pending
        };
        buckets.push(bucket);
    }
    Ok(())
}

/// Test the requests still pending once more.
fn retest(
    requests: &mut [Request<'_>],
    buckets: &mut [Bucket],
    completed: &mut Vec<(usize, Status)>,
) -> Result<()> {
    for (index, (request, bucket)) in requests.iter_mut().zip(buckets.iter_mut()).enumerate() {
        if *bucket != Bucket::Pending {
            continue;
        }
        if let Some(status) = request.test()? {
            completed.push((index, status));
            *bucket = Bucket::Completed;
        }
    }
    Ok(())
}

/// Run `fill` and hand back its buckets. If it fails, whatever it completed stays reportable.
fn with_buckets(
    requests: &mut [Request<'_>],
    fill: impl FnOnce(&mut [Request<'_>], &mut Vec<Bucket>, &mut Vec<(usize, Status)>) -> Result<()>,
) -> Result<(Vec<Bucket>, Vec<(usize, Status)>)> {
    let mut buckets = Vec::with_capacity(requests.len());
    let mut completed = Vec::new();
    match fill(requests, &mut buckets, &mut completed) {
        Ok(()) => Ok((buckets, completed)),
        Err(err) => {
            keep_completed(requests, completed);
            Err(err)
        }
    }
}

fn wait_some_buckets(
    requests: &mut [Request<'_>],
) -> Result<(Vec<Bucket>, Vec<(usize, Status)>)> {
    with_buckets(requests, wait_some_into)
}

fn test_some_buckets(
    requests: &mut [Request<'_>],
) -> Result<(Vec<Bucket>, Vec<(usize, Status)>)> {
    with_buckets(requests, sweep)
}

fn wait_some_into(
    requests: &mut [Request<'_>],
    buckets: &mut Vec<Bucket>,
    completed: &mut Vec<(usize, Status)>,
) -> Result<()> {
    sweep(requests, buckets, completed)?;

    let mut poller = Poller::new(polling_of(requests));
    while completed.is_empty() && buckets.contains(&Bucket::Pending) {
        let pending = requests
            .iter()
            .zip(buckets.iter())
            .filter(|&(_, &bucket)| bucket == Bucket::Pending)
            .map(|(request, _)| request);
        if let Some(transport) = trivial_transport(pending) {
            let (status, index) = wait_any_native(transport.as_ref(), requests, |index| {
                buckets[index] == Bucket::Pending
            })?;
            buckets[index] = Bucket::Completed;
            completed.push((index, status));
            return retest(requests, buckets, completed);
        }
        poller.pause();
        retest(requests, buckets, completed)?;
    }
    Ok(())
}

/// Reorder `requests` into `[pending][completed][inactive]` and return the number of pending
/// requests. Pending and inactive requests keep their relative order; completed requests follow
/// the order in which they were discovered.
fn partition(
    requests: &mut [Request<'_>],
    buckets: &[Bucket],
    completed: &[(usize, Status)],
) -> usize {
    let in_bucket = |wanted: Bucket| {
        buckets
            .iter()
            .enumerate()
            .filter(move |&(_, &bucket)| bucket == wanted)
            .map(|(index, _)| index)
    };
    let pending = in_bucket(Bucket::Pending).count();
    let order: Vec<usize> = in_bucket(Bucket::Pending)
        .chain(completed.iter().map(|&(index, _)| index))
        .chain(in_bucket(Bucket::Inactive))
        .collect();
    debug_assert_eq!(order.len(), requests.len());

    let mut taken: Vec<_> = requests.iter_mut().map(mem::take).collect();
    for (slot, index) in requests.iter_mut().zip(order) {
        *slot = mem::take(&mut taken[index]);
    }
    trace!(
        "partitioned {} requests, {} still pending",
        requests.len(),
        pending
    );
    pending
}

/// Wait for at least one of the requests to finish and complete every request that has.
///
/// Reorders `requests` into `[still pending][completed][inactive]` and returns the index of the
/// first completed slot together with the statuses of the completed requests, in the order they
/// were discovered. Pending and inactive requests keep their relative order; completed requests
/// are placed in discovery order. If none of the requests is active, the call returns at once
/// with boundary `0` and no statuses.
pub fn wait_some(requests: &mut [Request<'_>]) -> Result<(usize, Vec<Status>)> {
    let (buckets, completed) = wait_some_buckets(requests)?;
    let boundary = partition(requests, &buckets, &completed);
    Ok((boundary, completed.into_iter().map(|(_, status)| status).collect()))
}

/// Complete every request that has finished, without blocking.
///
/// Reorders `requests` like `wait_some`. The returned statuses may be empty if nothing has
/// finished yet.
pub fn test_some(requests: &mut [Request<'_>]) -> Result<(usize, Vec<Status>)> {
    let (buckets, completed) = test_some_buckets(requests)?;
    let boundary = partition(requests, &buckets, &completed);
    Ok((boundary, completed.into_iter().map(|(_, status)| status).collect()))
}

/// Like `wait_some`, reporting slot indices instead of reordering.
pub(crate) fn wait_some_indexed(requests: &mut [Request<'_>]) -> Result<Vec<(usize, Status)>> {
    wait_some_buckets(requests).map(|(_, completed)| completed)
}

/// Like `test_some`, reporting slot indices instead of reordering.
pub(crate) fn test_some_indexed(requests: &mut [Request<'_>]) -> Result<Vec<(usize, Status)>> {
    test_some_buckets(requests).map(|(_, completed)| completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_requests_report_the_length() {
        let mut requests = vec![Request::null(), Request::null()];
        let (status, index) = wait_any(&mut requests).unwrap();
        assert_eq!(index, 2);
        assert_eq!(status, Status::empty());
        assert_eq!(
            test_any(&mut requests).unwrap(),
            Some((Status::empty(), 2))
        );
        assert_eq!(wait_all(&mut requests).unwrap(), vec![Status::empty(); 2]);
        let (boundary, statuses) = wait_some(&mut requests).unwrap();
        assert_eq!(boundary, 0);
        assert!(statuses.is_empty());
    }
}
