//! Collective communication
//!
//! Collectives are built from point to point messages on reserved tags. Every rank of a
//! communicator has to enter the same collective operations in the same order; each operation
//! draws the next tag from the communicator's `TagAllocator`, so matching ranks agree on the tag
//! without exchanging it.
//!
//! Broadcast and reduce run along a binomial tree rooted at the root process, taking
//! `ceil(log2(size))` rounds. Values travel serialized through `archive`, using the dynamic
//! protocol of the communicator.

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use smallvec::SmallVec;

use crate::archive;
use crate::datatype::traits::*;
use crate::error::{Error, ErrorKind, Result};
use crate::point_to_point::{
    dynamic_send_tokens, post_dynamic_receive, post_dynamic_send, receive_bytes, send_bytes,
};
use crate::request::handler::Handler;
use crate::request::{self, Request};
use crate::topology::traits::*;
use crate::topology::{Communicator, Process, Rank};
use crate::transport::RawRequest;
use crate::{Count, Tag};

/// Collective communication traits
pub mod traits {
    pub use super::{CommunicatorCollectives, Root};
}

/// Number of rounds of a binomial tree over `size` ranks: 8 -> 3, 9 -> 4.
fn ceil_log2(size: Rank) -> u32 {
    let mut n = 0;
    while (1 << n) < size {
        n += 1;
    }
    n
}

/// One rank's position in a binomial tree rooted at `root`
struct Tree<'c> {
    comm: &'c Communicator,
    root: Rank,
    size: Rank,
    relative: Rank,
    tag: Tag,
}

impl<'c> Tree<'c> {
    fn new(comm: &'c Communicator, root: Rank, routine: &'static str) -> Tree<'c> {
        let size = comm.size();
        let tag = comm.tags().next_collective_tag();
        debug!(
            "rank {} enters {} rooted at {} on tag {}",
            comm.rank(),
            routine,
            root,
            tag
        );
        Tree {
            comm,
            root,
            size,
            relative: (comm.rank() - root + size) % size,
            tag,
        }
    }

    fn absolute(&self, relative: Rank) -> Rank {
        (relative + self.root) % self.size
    }

    fn receive(&self, relative: Rank) -> Result<Vec<u8>> {
        let (bytes, _) = receive_bytes(self.comm, self.absolute(relative), self.tag)?;
        bytes.ok_or_else(|| Error::transport("collective", ErrorKind::Rank))
    }

    /// Pass `payload` down the tree. Only the root supplies it; everyone returns it.
    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let payload = match payload {
            Some(payload) => payload,
            None => self.receive(self.relative & (self.relative - 1))?,
        };
        let mut sends = Vec::new();
        for level in (0..ceil_log2(self.size)).rev() {
            let one = 1 << level;
            let two = one << 1;
            if self.relative % two == 0 && self.relative + one < self.size {
                sends.push(post_dynamic_send(
                    self.comm,
                    self.absolute(self.relative + one),
                    self.tag,
                    payload.clone(),
                    1,
                )?);
            }
        }
        request::wait_all(&mut sends)?;
        Ok(payload)
    }

    /// Combine the values up the tree. Returns the result at the root, `None` elsewhere.
    fn reduce<T, F>(&self, value: T, op: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        let mut value = value;
        for level in 0..ceil_log2(self.size) {
            let one = 1 << level;
            let two = one << 1;
            if self.relative % two != 0 {
                let parent = self.absolute(self.relative - one);
                send_bytes(self.comm, parent, self.tag, archive::pack(&value)?)?;
                return Ok(None);
            }
            if self.relative + one < self.size {
                let other = archive::unpack(&self.receive(self.relative + one)?)?;
                value = op(value, other);
            }
        }
        Ok(Some(value))
    }
}

/// Fails with `ErrorKind::Root` unless the calling rank is (`root == true`) or is not the root.
fn expect_root<R: Root + ?Sized>(process: &R, routine: &'static str, root: bool) -> Result<()> {
    let is_root = process.as_communicator().rank() == process.root_rank();
    if is_root == root {
        Ok(())
    } else {
        Err(Error::transport(routine, ErrorKind::Root))
    }
}

/// Collective communication patterns defined on `Communicator`s
pub trait CommunicatorCollectives: AsCommunicator {
    /// Barrier synchronization among all processes in a `Communicator`
    ///
    /// Calling processes will block until all processes in the `Communicator` `&self` have
    /// entered the barrier.
    fn barrier(&self) -> Result<()> {
        self.all_reduce((), |(), ()| ())
    }

    /// Non-blocking barrier synchronization
    ///
    /// Every rank exchanges an empty message with every other rank, so the request completes
    /// once all processes in the `Communicator` have entered the barrier.
    fn immediate_barrier(&self) -> Result<Request<'static>> {
        let comm = self.as_communicator();
        let tag = comm.tags().next_collective_tag();
        debug!("rank {} enters immediate_barrier on tag {}", comm.rank(), tag);
        let transport = comm.transport();
        let mut tokens: SmallVec<[RawRequest; 4]> = SmallVec::new();
        for rank in (0..comm.size()).filter(|&rank| rank != comm.rank()) {
            let posted = transport
                .isend(rank, tag, Vec::new())
                .and_then(|send| {
                    tokens.push(send);
                    transport.irecv(rank, tag, Vec::new())
                });
            match posted {
                Ok(receive) => tokens.push(receive),
                Err(kind) => {
                    tokens.iter_mut().for_each(|token| transport.free(token));
                    return Err(Error::transport("immediate_barrier", kind));
                }
            }
        }
        Ok(comm.request(Handler::batch(tokens)))
    }

    /// Gather a value from every rank on every rank, in rank order.
    fn all_gather<T>(&self, value: &T) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let comm = self.as_communicator();
        let root = comm.process_at_rank(0);
        let mut values = if comm.rank() == 0 {
            root.gather_root(value)?
        } else {
            root.gather(value)?;
            Vec::new()
        };
        root.broadcast(&mut values)?;
        Ok(values)
    }

    /// Combine the values of all ranks with `op` and return the result on every rank.
    ///
    /// `op` must be associative; values are combined in rank order.
    fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        let root = self.as_communicator().process_at_rank(0);
        let reduced = root.reduce(value, op)?;
        let payload = reduced.as_ref().map(archive::pack).transpose()?;
        let bytes = Tree::new(self.as_communicator(), 0, "all_reduce").broadcast(payload)?;
        archive::unpack(&bytes)
    }
}

impl CommunicatorCollectives for Communicator {}

/// Something that can take the role of 'root' in a collective operation.
///
/// Many collective operations define a 'root' process that takes a special role in the
/// communication. These collective operations are implemented as default methods of this trait.
pub trait Root: AsCommunicator {
    /// Rank of the root process
    fn root_rank(&self) -> Rank;

    /// Broadcast the contents of a buffer from the root to every rank.
    ///
    /// The buffer of every rank must have room for the root's elements.
    fn broadcast_into<Buf: ?Sized>(&self, buffer: &mut Buf) -> Result<()>
    where
        Buf: BufferMut,
    {
        let comm = self.as_communicator();
        let tree = Tree::new(comm, self.root_rank(), "broadcast_into");
        if comm.rank() == self.root_rank() {
            tree.broadcast(Some(buffer.to_bytes())).map(drop)
        } else {
            let bytes = tree.broadcast(None)?;
            buffer.decode_from(&bytes).map(drop)
        }
    }

    /// Broadcast a serialized value from the root to every rank.
    ///
    /// On the root `value` is sent, everywhere else it is overwritten.
    ///
    /// # Examples
    ///
    /// See `demos/broadcast.rs`
    fn broadcast<T>(&self, value: &mut T) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let comm = self.as_communicator();
        let tree = Tree::new(comm, self.root_rank(), "broadcast");
        if comm.rank() == self.root_rank() {
            tree.broadcast(Some(archive::pack(value)?)).map(drop)
        } else {
            *value = archive::unpack(&tree.broadcast(None)?)?;
            Ok(())
        }
    }

    /// Initiate a non-blocking broadcast of a serialized value from the root.
    ///
    /// The root sends to every other rank directly; the request completes on the root once all
    /// sends have completed and elsewhere once `value` has been overwritten.
    ///
    /// # Examples
    ///
    /// See `demos/broadcast.rs`
    fn immediate_broadcast<'b, T>(&self, value: &'b mut T) -> Result<Request<'b>>
    where
        T: 'b + Serialize + DeserializeOwned,
    {
        let comm = self.as_communicator();
        let root = self.root_rank();
        let tag = comm.tags().next_collective_tag();
        debug!(
            "rank {} enters immediate_broadcast rooted at {} on tag {}",
            comm.rank(),
            root,
            tag
        );
        if comm.rank() != root {
            return post_dynamic_receive(
                comm,
                root,
                tag,
                Box::new(move |bytes: &[u8]| -> Result<Count> {
                    *value = archive::unpack(bytes)?;
                    Ok(1)
                }),
            );
        }
        let payload = archive::pack(value)?;
        let mut tokens = SmallVec::new();
        for rank in (0..comm.size()).filter(|&rank| rank != root) {
            tokens.extend(dynamic_send_tokens(comm, rank, tag, payload.clone())?);
        }
        Ok(comm.request(Handler::batch(tokens)))
    }

    /// Send a value to the root as part of a gather. Must not be called on the root.
    fn gather<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let comm = self.as_communicator();
        let tag = comm.tags().next_collective_tag();
        expect_root(self, "gather", false)?;
        send_bytes(comm, self.root_rank(), tag, archive::pack(value)?)
    }

    /// Collect the values of all ranks on the root, in rank order. Must be called on the root.
    fn gather_root<T>(&self, value: &T) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let comm = self.as_communicator();
        let tag = comm.tags().next_collective_tag();
        expect_root(self, "gather_root", true)?;
        (0..comm.size())
            .map(|rank| {
                if rank == self.root_rank() {
                    return Ok(value.clone());
                }
                let (bytes, _) = receive_bytes(comm, rank, tag)?;
                let bytes = bytes.ok_or_else(|| Error::transport("gather_root", ErrorKind::Rank))?;
                archive::unpack(&bytes)
            })
            .collect()
    }

    /// Receive this rank's share of a scatter. Must not be called on the root.
    fn scatter<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let comm = self.as_communicator();
        let tag = comm.tags().next_collective_tag();
        expect_root(self, "scatter", false)?;
        let (bytes, _) = receive_bytes(comm, self.root_rank(), tag)?;
        let bytes = bytes.ok_or_else(|| Error::transport("scatter", ErrorKind::Rank))?;
        archive::unpack(&bytes)
    }

    /// Send `values[r]` to rank `r` and return the root's own share. Must be called on the root
    /// with one value per rank.
    fn scatter_root<T>(&self, values: &[T]) -> Result<T>
    where
        T: Serialize + Clone,
    {
        let comm = self.as_communicator();
        let tag = comm.tags().next_collective_tag();
        expect_root(self, "scatter_root", true)?;
        if values.len() != comm.size() as usize {
            return Err(Error::transport("scatter_root", ErrorKind::Count));
        }
        let mut sends = Vec::with_capacity(values.len());
        for (rank, value) in (0..comm.size()).zip(values) {
            if rank != self.root_rank() {
                sends.push(post_dynamic_send(comm, rank, tag, archive::pack(value)?, 1)?);
            }
        }
        request::wait_all(&mut sends)?;
        Ok(values[self.root_rank() as usize].clone())
    }

    /// Combine the values of all ranks with `op` on the root.
    ///
    /// Returns the result on the root and `None` elsewhere. `op` must be associative; values are
    /// combined in order of rank relative to the root.
    fn reduce<T, F>(&self, value: T, op: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        Tree::new(self.as_communicator(), self.root_rank(), "reduce").reduce(value, op)
    }
}

impl<'a> Root for Process<'a> {
    fn root_rank(&self) -> Rank {
        self.rank()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_cover_the_group() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }
}
