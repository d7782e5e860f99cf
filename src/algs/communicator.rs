//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: callers post every receive
//! of an exchange, then every send, and only trust a buffer after `.wait()`.
//!
//! The collective helpers (`allgather`, reductions, scans) are provided
//! methods built on `isend`/`irecv`, so a backend only has to implement the
//! point-to-point pair plus `rank`/`size`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::numbering_error::NumberingError;

/// Message tag wrapper so tag arithmetic stays in one place.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` steps after this one (wrapping).
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

/// Tags for a two-phase exchange: counts first, payload second.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process in the group.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// `true` for the serial stand-in that never moves bytes.
    fn is_no_comm(&self) -> bool {
        false
    }

    /// `isend` with the peer checked against the group size.
    fn isend_result(
        &self,
        peer: usize,
        tag: u16,
        buf: &[u8],
    ) -> Result<Self::SendHandle, NumberingError> {
        check_peer(peer, self.size())?;
        Ok(self.isend(peer, tag, buf))
    }

    /// `irecv` with the peer checked against the group size.
    fn irecv_result(
        &self,
        peer: usize,
        tag: u16,
        buf: &mut [u8],
    ) -> Result<Self::RecvHandle, NumberingError> {
        check_peer(peer, self.size())?;
        Ok(self.irecv(peer, tag, buf))
    }

    /// Gather `send` from every rank into `recv`, rank-major.
    ///
    /// `recv.len()` must be `size() * send.len()`.
    fn allgather(&self, tag: CommTag, send: &[u8], recv: &mut [u8]) -> Result<(), NumberingError> {
        let n_ranks = self.size();
        let me = self.rank();
        let chunk = send.len();
        if recv.len() != n_ranks * chunk {
            return Err(NumberingError::LengthMismatch {
                what: "allgather receive buffer",
                expected: n_ranks * chunk,
                got: recv.len(),
            });
        }
        recv[me * chunk..(me + 1) * chunk].copy_from_slice(send);
        if n_ranks == 1 {
            return Ok(());
        }

        let mut pending_recvs = Vec::with_capacity(n_ranks - 1);
        for peer in (0..n_ranks).filter(|&p| p != me) {
            let h = self.irecv_result(peer, tag.as_u16(), &mut recv[peer * chunk..(peer + 1) * chunk])?;
            pending_recvs.push((peer, h));
        }
        let mut pending_sends = Vec::with_capacity(n_ranks - 1);
        for peer in (0..n_ranks).filter(|&p| p != me) {
            pending_sends.push(self.isend_result(peer, tag.as_u16(), send)?);
        }

        let mut maybe_err = None;
        for (peer, h) in pending_recvs {
            match h.wait() {
                Some(data) if data.len() == chunk => {
                    recv[peer * chunk..(peer + 1) * chunk].copy_from_slice(&data);
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(NumberingError::BufferSizeMismatch {
                        neighbor: peer,
                        expected: chunk,
                        got: data.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(NumberingError::CommError {
                        neighbor: peer,
                        reason: "allgather contribution not received".into(),
                    });
                }
                _ => {}
            }
        }
        for send in pending_sends {
            let _ = send.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// One `u64` from every rank, indexed by rank.
    fn allgather_u64(&self, tag: CommTag, value: u64) -> Result<Vec<u64>, NumberingError> {
        let mut recvbuf = vec![0u8; self.size() * std::mem::size_of::<u64>()];
        self.allgather(tag, &value.to_le_bytes(), &mut recvbuf)?;
        Ok(recvbuf
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect())
    }

    fn allreduce_max_u64(&self, tag: CommTag, value: u64) -> Result<u64, NumberingError> {
        Ok(self
            .allgather_u64(tag, value)?
            .into_iter()
            .max()
            .unwrap_or(value))
    }

    fn allreduce_sum_u64(&self, tag: CommTag, value: u64) -> Result<u64, NumberingError> {
        Ok(self.allgather_u64(tag, value)?.into_iter().sum())
    }

    /// Sum of `value` over all lower ranks.
    fn exclusive_scan_u64(&self, tag: CommTag, value: u64) -> Result<u64, NumberingError> {
        let totals = self.allgather_u64(tag, value)?;
        Ok(totals.iter().take(self.rank()).sum())
    }
}

fn check_peer(peer: usize, size: usize) -> Result<(), NumberingError> {
    if peer < size {
        Ok(())
    } else {
        Err(NumberingError::InvalidPeer { rank: peer, size })
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) -> Self::SendHandle {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: intra-process ranks on threads ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Message store for one universe of in-process ranks.
///
/// Every `(src, dst, tag)` channel numbers its sends and its receives
/// independently, so the n-th receive posted on a channel always gets the
/// n-th message sent on it, whatever the order of the `wait` calls.
#[derive(Default)]
struct Mailbox {
    messages: DashMap<(Key, u64), Bytes>,
    send_seq: DashMap<Key, u64>,
    recv_seq: DashMap<Key, u64>,
}

impl Mailbox {
    fn ticket(counters: &DashMap<Key, u64>, key: Key) -> u64 {
        let mut entry = counters.entry(key).or_insert(0);
        let seq = *entry;
        *entry += 1;
        seq
    }
}

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(Mailbox::default()));

/// Pending receive on a [`LocalComm`].
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    slot: (Key, u64),
    len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some((_, bytes)) = self.mailbox.messages.remove(&self.slot) {
                let n = bytes.len().min(self.len);
                return Some(bytes[..n].to_vec());
            }
            std::thread::yield_now();
        }
    }
}

/// In-process communicator: each rank runs on its own thread.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Rank `rank` of `size` in the process-wide default universe.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: Arc::clone(&MAILBOX),
        }
    }

    /// All ranks of a fresh universe isolated from every other one.
    pub fn group(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        let seq = Mailbox::ticket(&self.mailbox.send_seq, key);
        self.mailbox
            .messages
            .insert((key, seq), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        let seq = Mailbox::ticket(&self.mailbox.recv_seq, key);
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            slot: (key, seq),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, Destination, Equivalence, Source};
    use std::sync::Arc;

    /// MPI world communicator; owns the universe so MPI stays initialised.
    #[derive(Clone)]
    pub struct MpiComm {
        universe: Arc<Universe>,
        rank: usize,
        size: usize,
    }

    // MPI is initialised at the single-threaded level: one control thread per
    // process issues every call.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialise MPI; `None` if it was already initialised.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                universe: Arc::new(universe),
                rank,
                size,
            })
        }

        fn world(&self) -> SimpleCommunicator {
            self.universe.world()
        }
    }

    /// Send request; owns a copy of the payload until completion.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        data: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `data` came from `Box::leak` in `isend` and the request
            // referencing it has completed.
            drop(unsafe { Box::from_raw(self.data) });
            None
        }
    }

    /// Receive request; owns the landing buffer until completion.
    pub struct MpiRecvHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        data: *mut [u8],
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            let status = self.req.take().map(|req| req.wait());
            // SAFETY: `data` came from `Box::leak` in `irecv` and the request
            // writing into it has completed.
            let buf = unsafe { Box::from_raw(self.data) };
            let n = status
                .map(|s| s.count(u8::equivalent_datatype()) as usize)
                .unwrap_or(0)
                .min(buf.len());
            Some(buf[..n].to_vec())
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let data: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = data;
            // SAFETY: the leaked buffer lives until `wait` reclaims it.
            let shared: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world()
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, shared, tag as i32);
            MpiSendHandle {
                req: Some(req),
                data: ptr,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            let data: &'static mut [u8] = Box::leak(vec![0u8; buf.len()].into_boxed_slice());
            let ptr: *mut [u8] = data;
            // SAFETY: as in `isend`; only the request touches the buffer until `wait`.
            let landing: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .world()
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, landing, tag as i32);
            MpiRecvHandle {
                req: Some(req),
                data: ptr,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
