//! Organizing ranks in communicators
//!
//! All ranks partaking in a computation are reachable through a `Communicator`, which bundles the
//! transport endpoint of the calling rank with its configuration and the tag sequences shared by
//! collective operations. Ranks are addressed through a `Process`; `AnyProcess` matches messages
//! from any rank of the communicator.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::environment::Config;
use crate::request::handler::Handler;
use crate::request::Request;
use crate::transport::{
    Transport, COLLECTIVE_TAG_BASE, COLLECTIVE_TAG_SPAN, PAYLOAD_TAG_BASE, PAYLOAD_TAG_SPAN,
    PROC_NULL,
};
use crate::Tag;

/// Topology traits
pub mod traits {
    pub use super::AsCommunicator;
}

/// Identifies a certain rank within a communicator.
pub type Rank = i32;

/// Something that has a communicator associated with it
pub trait AsCommunicator {
    /// Returns the associated communicator.
    fn as_communicator(&self) -> &Communicator;
}

/// Hands out the reserved tags a communicator needs for its own traffic.
///
/// Collective operations must be entered in the same order on every rank, so drawing their tag
/// from a per-rank counter yields the same tag everywhere. Two-phase transfers number their
/// payloads per sender; the receiver learns the number from the size announcement.
#[derive(Debug, Default)]
pub struct TagAllocator {
    collective: AtomicU32,
    sequence: AtomicU64,
}

impl TagAllocator {
    /// Tag for the next collective operation
    pub fn next_collective_tag(&self) -> Tag {
        let n = self.collective.fetch_add(1, Ordering::Relaxed) % COLLECTIVE_TAG_SPAN;
        COLLECTIVE_TAG_BASE + n as Tag
    }

    /// Sequence number for the next two-phase payload
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

/// Reserved tag carrying the payload announced with sequence number `sequence`
pub(crate) fn payload_tag(sequence: u64) -> Tag {
    PAYLOAD_TAG_BASE + (sequence % PAYLOAD_TAG_SPAN) as Tag
}

/// A group of ranks seen from one of its members
///
/// Cloning a communicator is cheap; clones share the transport endpoint and the tag sequences.
///
/// # Examples
///
/// See `demos/immediate.rs`
#[derive(Clone)]
pub struct Communicator {
    transport: Arc<dyn Transport>,
    config: Config,
    tags: Arc<TagAllocator>,
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("config", &self.config)
            .finish()
    }
}

impl Communicator {
    /// A communicator on top of `transport`
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Communicator {
        Communicator {
            transport,
            config,
            tags: Arc::default(),
        }
    }

    /// Number of ranks in this communicator
    pub fn size(&self) -> Rank {
        self.transport.size()
    }

    /// The `Rank` that identifies the calling rank within this communicator
    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    /// Bundles a reference to this communicator with a specific `Rank` into a `Process`.
    ///
    /// # Panics
    ///
    /// Panics if `r` is not a rank of this communicator.
    pub fn process_at_rank(&self, r: Rank) -> Process<'_> {
        assert!(0 <= r && r < self.size(), "rank {} out of range", r);
        Process { comm: self, rank: r }
    }

    /// Returns an `AnyProcess` identifier that can be used as a `Source` in point to point
    /// communication.
    pub fn any_process(&self) -> AnyProcess<'_> {
        AnyProcess(self)
    }

    /// A `Process` for the calling rank
    pub fn this_process(&self) -> Process<'_> {
        Process {
            comm: self,
            rank: self.rank(),
        }
    }

    /// The null process: sends to it and receives from it complete at once without moving data.
    pub fn null_process(&self) -> Process<'_> {
        Process {
            comm: self,
            rank: PROC_NULL,
        }
    }

    /// Configuration of this communicator
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The transport endpoint of the calling rank
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Tag sequences of this communicator
    pub fn tags(&self) -> &TagAllocator {
        &self.tags
    }

    pub(crate) fn request<'a>(&self, handler: Handler<'a>) -> Request<'a> {
        Request::new(Arc::clone(&self.transport), self.config.polling(), handler)
    }
}

impl AsCommunicator for Communicator {
    fn as_communicator(&self) -> &Communicator {
        self
    }
}

/// Identifies a rank within a certain communicator.
#[derive(Copy, Clone, Debug)]
pub struct Process<'a> {
    comm: &'a Communicator,
    rank: Rank,
}

impl<'a> Process<'a> {
    /// The process rank
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// True for the null process
    pub fn is_null(&self) -> bool {
        self.rank == PROC_NULL
    }
}

impl<'a> AsCommunicator for Process<'a> {
    fn as_communicator(&self) -> &Communicator {
        self.comm
    }
}

/// Identifies an arbitrary rank of a certain communicator, e.g. for use as a `Source` in point to
/// point communication.
#[derive(Copy, Clone, Debug)]
pub struct AnyProcess<'a>(&'a Communicator);

impl<'a> AsCommunicator for AnyProcess<'a> {
    fn as_communicator(&self) -> &Communicator {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TAG_UB;

    #[test]
    fn reserved_tags_stay_out_of_the_user_range() {
        let tags = TagAllocator::default();
        let first = tags.next_collective_tag();
        assert!(first > TAG_UB);
        assert_eq!(tags.next_collective_tag(), first + 1);
        assert!(payload_tag(0) > tags.next_collective_tag());
        assert_eq!(payload_tag(PAYLOAD_TAG_SPAN), payload_tag(0));
        assert!(payload_tag(PAYLOAD_TAG_SPAN - 1) > 0);
    }

    #[test]
    fn sequences_count_up() {
        let tags = TagAllocator::default();
        assert_eq!(tags.next_sequence(), 0);
        assert_eq!(tags.next_sequence(), 1);
    }
}
