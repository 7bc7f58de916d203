use anyhow::bail;
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::entity::{Entity, Environment};
use crate::packet::Packet;

/// Go-Back-N receiver: delivers verified in-order payloads to the application
///  exactly once and answers every arrival with the current cumulative ACK.
///
/// The only state between packets is the next expected stream offset - under
///  Go-Back-N, out-of-order data is discarded rather than buffered, and the
///  repeated cumulative ACK tells the sender where to resume.
pub struct GbnReceiver {
    /// next stream offset the receiver will accept and deliver
    expected_seq: u64,
}

impl GbnReceiver {
    pub fn new() -> GbnReceiver {
        GbnReceiver { expected_seq: 0 }
    }

    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    /// Every reply is a freshly constructed packet - inbound packets are never
    ///  mutated or echoed back.
    fn send_cumulative_ack(&self, env: &mut dyn Environment) {
        trace!("acknowledging up to offset {}", self.expected_seq);
        env.to_layer3(Packet::ack(self.expected_seq));
    }
}

impl Default for GbnReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Entity for GbnReceiver {
    fn output(&mut self, _message: Bytes, _env: &mut dyn Environment) -> anyhow::Result<()> {
        bail!("the receiving side does not accept application messages - bidirectional transfer is not supported");
    }

    fn input(&mut self, packet: Packet, env: &mut dyn Environment) {
        if !packet.verify() {
            // a corrupted packet's fields cannot be trusted, not even seqnum:
            //  repeat the cumulative ACK and let the sender time out / resend
            warn!("received corrupted packet - repeating ACK for offset {}", self.expected_seq);
            self.send_cumulative_ack(env);
            return;
        }

        if packet.is_ack() {
            debug!("received stray ACK for offset {} - ignoring", packet.acknum);
            return;
        }

        if packet.seqnum == self.expected_seq {
            trace!(
                "delivering packet #{}..{} to the application",
                packet.seqnum,
                packet.end_seqnum()
            );
            env.to_layer5(packet.payload.clone());
            self.expected_seq = packet.end_seqnum();
        }
        else {
            // duplicate or out-of-order: discard, the repeated ACK below tells
            //  the sender where to resume
            debug!(
                "packet #{} does not match expected offset {} - discarding payload",
                packet.seqnum, self.expected_seq
            );
        }

        self.send_cumulative_ack(env);
    }

    fn timer_interrupt(&mut self, _env: &mut dyn Environment) {
        // the receiver never owns a retransmission timer
        warn!("timer interrupt on the receiving side - ignoring");
    }
}
