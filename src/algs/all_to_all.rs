//! Two-phase sparse all-to-all exchange of fixed-width records.
//!
//! Phase 1 exchanges one [`WireCount`] with every other rank so each side
//! knows exactly how many records to expect; phase 2 moves the payload,
//! skipping peers with nothing to say. In both phases every receive is posted
//! before any send, and every handle is waited on before returning, even if
//! an error occurs (the first error is reported).
//!
//! Records addressed to the calling rank are moved locally and never touch
//! the transport.

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::numbering_error::NumberingError;

/// Exchange one count with every other rank; returns counts indexed by source rank.
pub fn exchange_counts<C>(
    comm: &C,
    tag: CommTag,
    send_counts: &[usize],
) -> Result<Vec<usize>, NumberingError>
where
    C: Communicator,
{
    let n_ranks = comm.size();
    let me = comm.rank();
    if send_counts.len() != n_ranks {
        return Err(NumberingError::LengthMismatch {
            what: "per-rank send counts",
            expected: n_ranks,
            got: send_counts.len(),
        });
    }

    let mut counts_in = vec![0usize; n_ranks];
    counts_in[me] = send_counts[me];

    // 1) post all receives
    let mut recv_size = Vec::with_capacity(n_ranks.saturating_sub(1));
    for nbr in (0..n_ranks).filter(|&r| r != me) {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv_result(
            nbr,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        )?;
        recv_size.push((nbr, h, cnt));
    }

    // 2) post all sends and keep buffers alive until completion
    let mut pending_sends = Vec::with_capacity(recv_size.len());
    let mut send_bufs = Vec::with_capacity(recv_size.len());
    for nbr in (0..n_ranks).filter(|&r| r != me) {
        let count = WireCount::new(send_counts[nbr]);
        pending_sends.push(comm.isend_result(
            nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        )?);
        send_bufs.push(count);
    }

    // 3) wait for all recvs (no early return)
    let mut maybe_err = None;
    for (nbr, h, mut cnt) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                if maybe_err.is_none() {
                    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                    counts_in[nbr] = cnt.get();
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(NumberingError::CommError {
                    neighbor: nbr,
                    reason: format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireCount>(),
                        data.len()
                    ),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(NumberingError::CommError {
                    neighbor: nbr,
                    reason: format!("failed to receive size from rank {nbr}"),
                });
            }
            _ => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(counts_in),
    }
}

/// Send `send[r]` to rank `r` for every rank; returns what each rank sent us,
/// indexed by source rank.
pub fn exchange_records<C, T>(
    comm: &C,
    tags: ExchangeTags,
    mut send: Vec<Vec<T>>,
) -> Result<Vec<Vec<T>>, NumberingError>
where
    C: Communicator,
    T: Pod,
{
    let n_ranks = comm.size();
    let me = comm.rank();
    if send.len() != n_ranks {
        return Err(NumberingError::LengthMismatch {
            what: "per-rank send buffers",
            expected: n_ranks,
            got: send.len(),
        });
    }

    let send_counts: Vec<usize> = send.iter().map(Vec::len).collect();
    let recv_counts = exchange_counts(comm, tags.sizes, &send_counts)?;

    let mut received: Vec<Vec<T>> = (0..n_ranks).map(|_| Vec::new()).collect();
    received[me] = std::mem::take(&mut send[me]);

    // 1) post receives for every peer announcing data
    let mut recv_data = Vec::new();
    for nbr in (0..n_ranks).filter(|&r| r != me && recv_counts[r] > 0) {
        let mut buffer = vec![T::zeroed(); recv_counts[nbr]];
        let h = comm.irecv_result(nbr, tags.data.as_u16(), cast_slice_mut(&mut buffer))?;
        recv_data.push((nbr, h, buffer));
    }

    // 2) post sends; `send` stays alive until the handles are drained
    let mut pending_sends = Vec::new();
    for nbr in (0..n_ranks).filter(|&r| r != me && !send[r].is_empty()) {
        pending_sends.push(comm.isend_result(nbr, tags.data.as_u16(), cast_slice(&send[nbr]))?);
    }

    // 3) wait for every payload
    let mut maybe_err = None;
    for (nbr, h, mut buffer) in recv_data {
        let expected = std::mem::size_of_val(buffer.as_slice());
        match h.wait() {
            Some(raw) if raw.len() == expected => {
                cast_slice_mut(&mut buffer).copy_from_slice(&raw);
                received[nbr] = buffer;
            }
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(NumberingError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected,
                    got: raw.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(NumberingError::CommError {
                    neighbor: nbr,
                    reason: "No data received (wait returned None)".into(),
                });
            }
            _ => {}
        }
    }

    for h in pending_sends {
        let _ = h.wait();
    }
    drop(send);

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

/// Make a locally detected failure collective.
///
/// Every rank learns whether any rank failed before the next exchange is
/// posted. The failing rank keeps its own error; the others report which
/// rank failed.
pub fn agree<C, T>(
    comm: &C,
    tag: CommTag,
    local: Result<T, NumberingError>,
) -> Result<T, NumberingError>
where
    C: Communicator,
{
    let flags = comm.allgather_u64(tag, u64::from(local.is_err()))?;
    let value = local?;
    match flags.iter().position(|&f| f != 0) {
        Some(rank) => Err(NumberingError::CommError {
            neighbor: rank,
            reason: format!("rank {rank} aborted the exchange"),
        }),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, LocalComm};

    #[test]
    fn single_rank_moves_locally() {
        let comm = NoComm;
        let tags = ExchangeTags::from_base(CommTag::new(0x10));
        let out = exchange_records(&comm, tags, vec![vec![1u64, 2, 3]]).unwrap();
        assert_eq!(out, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn wrong_number_of_buffers_is_rejected() {
        let comm = NoComm;
        let tags = ExchangeTags::from_base(CommTag::new(0x10));
        let err = exchange_records::<_, u64>(&comm, tags, vec![vec![], vec![]]).unwrap_err();
        assert!(matches!(err, NumberingError::LengthMismatch { expected: 1, got: 2, .. }));
    }

    #[test]
    fn three_ranks_sparse_pattern() {
        let comms = LocalComm::group(3);
        let tags = ExchangeTags::from_base(CommTag::new(0x20));
        let out: Vec<Vec<Vec<u64>>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let me = c.rank() as u64;
                        // rank r sends [r*10 + d] to every d > r
                        let send = (0..3u64)
                            .map(|d| if d > me { vec![me * 10 + d] } else { vec![] })
                            .collect();
                        exchange_records(c, tags, send).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let none = Vec::<u64>::new();
        assert_eq!(out[0], vec![none.clone(); 3]);
        assert_eq!(out[1], vec![vec![1u64], none.clone(), none.clone()]);
        assert_eq!(out[2], vec![vec![2u64], vec![12u64], none]);
    }

    #[test]
    fn agree_spreads_a_local_failure() {
        let comms = LocalComm::group(2);
        let out: Vec<Result<u32, NumberingError>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let local = if c.rank() == 1 {
                            Err(NumberingError::UnsupportedExclusion)
                        } else {
                            Ok(5)
                        };
                        agree(c, CommTag::new(0x30), local)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(matches!(out[0], Err(NumberingError::CommError { neighbor: 1, .. })));
        assert_eq!(out[1], Err(NumberingError::UnsupportedExclusion));
    }
}
