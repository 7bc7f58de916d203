use std::collections::VecDeque;

use anyhow::bail;
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::ArqConfig;
use crate::entity::{Entity, Environment};
use crate::packet::Packet;

/// Go-Back-N sender: frames application messages as packets, keeps a bounded
///  window of unacknowledged packets, and drives retransmission on timeout.
///
/// ```ascii
///  send_base             next_seq
///      |                     |
///  ----+---------------------+------------------> stream offset
///      | <--- in flight ---> | <- not yet sent
/// ```
///
/// All window and sequence state is per-instance, so independent connections
///  can be simulated side by side.
pub struct GbnSender {
    config: ArqConfig,

    /// lowest unacknowledged stream offset
    send_base: u64,

    /// stream offset for the next new packet
    next_seq: u64,

    /// packets sent but not yet acknowledged, in sequence order, at most
    ///  `config.window_size` of them
    in_flight: VecDeque<Packet>,

    /// messages accepted from the application while the window was full.
    ///  Application data is never dropped - this queue drains into the window
    ///  as acknowledgments open it.
    pending: VecDeque<Bytes>,

    timer_running: bool,
}

impl GbnSender {
    pub fn new(config: ArqConfig) -> GbnSender {
        GbnSender {
            config,
            send_base: 0,
            next_seq: 0,
            in_flight: VecDeque::new(),
            pending: VecDeque::new(),
            timer_running: false,
        }
    }

    pub fn send_base(&self) -> u64 {
        self.send_base
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer_running
    }

    fn has_window_capacity(&self) -> bool {
        self.in_flight.len() < self.config.window_size as usize
    }

    /// frame a message at `next_seq`, hand it to the channel and add it to the
    ///  in-flight window. Caller must check window capacity first.
    fn transmit_new(&mut self, message: Bytes, env: &mut dyn Environment) {
        debug_assert!(self.has_window_capacity());

        let packet = Packet::data(self.next_seq, message);
        self.next_seq = packet.end_seqnum();

        trace!(
            "sending packet #{}..{} ({} in flight)",
            packet.seqnum,
            packet.end_seqnum(),
            self.in_flight.len() + 1
        );
        env.to_layer3(packet.clone());
        self.in_flight.push_back(packet);

        if !self.timer_running {
            env.start_timer(self.config.retransmission_timeout);
            self.timer_running = true;
        }
    }
}

impl Entity for GbnSender {
    fn output(&mut self, message: Bytes, env: &mut dyn Environment) -> anyhow::Result<()> {
        if message.is_empty() {
            bail!("message payload must not be empty");
        }
        if message.len() > self.config.max_payload_len {
            bail!(
                "message payload of {} bytes exceeds the maximum of {}",
                message.len(),
                self.config.max_payload_len
            );
        }

        if self.has_window_capacity() {
            self.transmit_new(message, env);
        }
        else {
            debug!(
                "window is full ({} packets in flight) - queueing message of {} bytes",
                self.in_flight.len(),
                message.len()
            );
            self.pending.push_back(message);
        }
        Ok(())
    }

    fn input(&mut self, packet: Packet, env: &mut dyn Environment) {
        if !packet.verify() {
            warn!("received corrupted ACK - discarding");
            return;
        }

        let acknum = packet.acknum;
        if acknum <= self.send_base {
            debug!(
                "stale or duplicate ACK for offset {} (send base is {}) - no state change",
                acknum, self.send_base
            );
            return;
        }
        if acknum > self.next_seq {
            warn!(
                "ACK for offset {} beyond anything sent ({}) - discarding",
                acknum, self.next_seq
            );
            return;
        }

        // cumulative ACK: retire every packet whose payload ends at or before acknum
        while let Some(front) = self.in_flight.front() {
            if front.end_seqnum() > acknum {
                break;
            }
            self.send_base = front.end_seqnum();
            self.in_flight.pop_front();
        }
        trace!("ACK for offset {} advanced send base to {}", acknum, self.send_base);

        // freed window slots go to queued messages
        while self.has_window_capacity() {
            match self.pending.pop_front() {
                Some(message) => self.transmit_new(message, env),
                None => break,
            }
        }

        env.stop_timer();
        if self.in_flight.is_empty() {
            self.timer_running = false;
        }
        else {
            // restart for the now-oldest unacknowledged packet
            env.start_timer(self.config.retransmission_timeout);
            self.timer_running = true;
        }
    }

    fn timer_interrupt(&mut self, env: &mut dyn Environment) {
        if self.in_flight.is_empty() {
            warn!("timer interrupt with nothing in flight - ignoring");
            self.timer_running = false;
            return;
        }

        debug!(
            "retransmission timeout - resending {} packets from offset {}",
            self.in_flight.len(),
            self.send_base
        );
        for packet in &self.in_flight {
            env.to_layer3(packet.clone());
        }

        env.start_timer(self.config.retransmission_timeout);
        self.timer_running = true;
    }
}
