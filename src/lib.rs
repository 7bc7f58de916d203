//! A Go-Back-N ARQ transport: sender and receiver entities that provide reliable,
//!  in-order, exactly-once delivery of application messages across an unreliable
//!  channel that may delay, corrupt, drop, duplicate or reorder packets.
//!
//! ## Design goals
//!
//! * The protocol entities are pure state machines, driven entirely by three
//!   callbacks - `output` (new application message), `input` (packet arrival)
//!   and `timer_interrupt` (retransmission timer expiry)
//!   * every callback runs to completion; there is no blocking and no internal
//!     concurrency, so entity state is single-owner and lock-free
//!   * all effects go through the [`entity::Environment`] seam, which makes the
//!     entities deterministic and independently testable
//! * Sequencing is byte-indexed: a packet's sequence number is the stream offset
//!   of its first payload byte, and acknowledgments carry the next expected byte
//! * Acknowledgments are cumulative (Go-Back-N)
//!   * a corrupted or out-of-order packet is answered by repeating the current
//!     cumulative ACK rather than by a dedicated negative acknowledgment
//!   * timeout retransmits the whole in-flight window in sequence order; this is
//!     the sole recovery path for packet loss, which produces no signal of its own
//! * Corruption is detected exclusively through the per-packet checksum - no
//!   header field is trusted before verification passes
//! * The sender never drops application data: messages that do not fit into the
//!   window are queued and transmitted as acknowledgments open it
//!
//! ## Packet format
//!
//! All numbers in network byte order (BE):
//! ```ascii
//! 0:  seqnum (u64) - stream offset of the first payload byte
//! 8:  acknum (u64) - next expected stream offset (cumulative); 0 on data packets
//! 16: checksum (u32) - CRC-32 over seqnum, acknum and payload
//! 20: payload length (varint)
//! *:  payload - non-empty for data packets, empty for ACK packets
//! ```
//!
//! The [`sim`] module contains a deterministic discrete-event simulation of the
//!  environment the entities run in: a fault-injecting channel, a per-entity
//!  single-shot timer and a global time-ordered event queue. It exists to
//!  exercise the protocol; the entities themselves have no dependency on it
//!  beyond the [`entity::Environment`] trait.

pub mod config;
pub mod entity;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod sim;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
