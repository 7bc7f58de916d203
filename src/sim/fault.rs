use anyhow::bail;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Packet;

/// Which field of a packet the channel damages. The checksum field itself is
///  left alone so that verification fails - damaging the checksum instead
///  would be an equivalent, symmetric case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corruption {
    PayloadByte,
    Seqnum,
    Acknum,
}

impl Corruption {
    /// build a damaged *copy* - the original packet is never touched
    pub fn apply(&self, packet: &Packet) -> Packet {
        let mut seqnum = packet.seqnum;
        let mut acknum = packet.acknum;
        let mut payload = packet.payload.to_vec();

        match self {
            Corruption::PayloadByte if !payload.is_empty() => payload[0] ^= 0x01,
            // no payload to damage (an ACK): fall back to the ack number
            Corruption::PayloadByte => acknum ^= 0x01,
            Corruption::Seqnum => seqnum ^= 0x01,
            Corruption::Acknum => acknum ^= 0x01,
        }

        Packet {
            seqnum,
            acknum,
            checksum: packet.checksum,
            payload: payload.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Corrupt(Corruption),
    /// deliver the packet twice
    Duplicate,
    /// drop the packet silently - the peer sees nothing at all
    Drop,
}

/// the channel's decision for one transit of one packet
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transit {
    pub verdict: Verdict,
    /// propagation delay in simulated time units
    pub delay: f64,
}

impl Transit {
    pub fn deliver(delay: f64) -> Transit {
        Transit {
            verdict: Verdict::Deliver,
            delay,
        }
    }
}

/// This is an abstraction for the channel's failure behavior, introduced so
///  tests can script exact fault sequences while regular runs use a seeded
///  random model.
pub trait FaultModel {
    fn on_transit(&mut self, packet: &Packet) -> Transit;
}

impl<F: FnMut(&Packet) -> Transit> FaultModel for F {
    fn on_transit(&mut self, packet: &Packet) -> Transit {
        self(packet)
    }
}

/// a channel that delivers every packet intact with a fixed delay
pub struct ReliableChannel {
    pub delay: f64,
}

impl FaultModel for ReliableChannel {
    fn on_transit(&mut self, _packet: &Packet) -> Transit {
        Transit::deliver(self.delay)
    }
}

pub struct FaultConfig {
    /// probability that any given transit is dropped silently
    pub loss_probability: f64,
    /// probability that a transit arrives with one damaged field
    pub corruption_probability: f64,
    /// probability that a transit is delivered twice
    pub duplication_probability: f64,

    /// minimum propagation delay
    pub base_delay: f64,
    /// additional uniformly distributed delay; reordering emerges naturally
    ///  once this exceeds the spacing between sends
    pub delay_jitter: f64,
}

impl Default for FaultConfig {
    fn default() -> FaultConfig {
        FaultConfig {
            loss_probability: 0.0,
            corruption_probability: 0.0,
            duplication_probability: 0.0,
            base_delay: 1.0,
            delay_jitter: 0.0,
        }
    }
}

impl FaultConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, p) in [
            ("loss", self.loss_probability),
            ("corruption", self.corruption_probability),
            ("duplication", self.duplication_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                bail!("{} probability must be in [0, 1], got {}", name, p);
            }
        }
        if self.loss_probability + self.corruption_probability + self.duplication_probability > 1.0 {
            bail!("fault probabilities must not add up to more than 1");
        }
        if !(self.base_delay > 0.0) {
            bail!("base delay must be positive");
        }
        if self.delay_jitter < 0.0 {
            bail!("delay jitter must not be negative");
        }

        Ok(())
    }
}

/// Randomized fault injection, deterministic for a given seed so that failing
///  runs are reproducible.
pub struct RandomFaults {
    config: FaultConfig,
    rng: StdRng,
}

impl RandomFaults {
    pub fn new(config: FaultConfig, seed: u64) -> RandomFaults {
        RandomFaults {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl FaultModel for RandomFaults {
    fn on_transit(&mut self, packet: &Packet) -> Transit {
        let delay = if self.config.delay_jitter > 0.0 {
            self.config.base_delay + self.rng.random_range(0.0..self.config.delay_jitter)
        }
        else {
            self.config.base_delay
        };

        let roll: f64 = self.rng.random();
        let verdict = if roll < self.config.loss_probability {
            Verdict::Drop
        }
        else if roll < self.config.loss_probability + self.config.corruption_probability {
            // pick a field to damage; ACK packets have no payload bytes
            let corruption = if packet.is_ack() {
                match self.rng.random_range(0..2) {
                    0 => Corruption::Seqnum,
                    _ => Corruption::Acknum,
                }
            }
            else {
                match self.rng.random_range(0..3) {
                    0 => Corruption::PayloadByte,
                    1 => Corruption::Seqnum,
                    _ => Corruption::Acknum,
                }
            };
            Verdict::Corrupt(corruption)
        }
        else if roll
            < self.config.loss_probability
                + self.config.corruption_probability
                + self.config.duplication_probability
        {
            Verdict::Duplicate
        }
        else {
            Verdict::Deliver
        };

        Transit { verdict, delay }
    }
}
