use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::packet::Packet;

/// This is an abstraction for everything an entity asks its environment to do,
///  introduced to make the entities deterministic and to facilitate mocking the
///  environment away for testing.
///
/// The environment guarantees that at most one timer is pending per entity, and
///  that `stop_timer` turns an already-scheduled expiry into a no-op.
#[cfg_attr(test, automock)]
pub trait Environment {
    /// schedule a single future `timer_interrupt` for this entity. Must not be
    ///  called while a timer is pending - stop it first.
    fn start_timer(&mut self, duration: f64);

    /// cancel the pending timer; no-op if there is none
    fn stop_timer(&mut self);

    /// hand a packet to the channel for delivery to the peer entity, subject to
    ///  delay, corruption, duplication and loss
    fn to_layer3(&mut self, packet: Packet);

    /// deliver a verified, in-order payload to the application layer
    fn to_layer5(&mut self, payload: Bytes);
}

/// The capability set the environment drives an entity through. All callbacks
///  run to completion, serialized by the environment's event loop - an entity
///  never sees two of them concurrently.
pub trait Entity {
    /// a new application message is ready to be sent reliably to the peer
    fn output(&mut self, message: Bytes, env: &mut dyn Environment) -> anyhow::Result<()>;

    /// a packet arrived from the channel - possibly corrupted, not yet filtered
    fn input(&mut self, packet: Packet, env: &mut dyn Environment);

    /// the previously started timer has expired
    fn timer_interrupt(&mut self, env: &mut dyn Environment);
}
