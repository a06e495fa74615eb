//! The application callback capability set (§6, §9).
//!
//! The source this design descends from expresses application hooks by subclassing the reactor
//! and overriding methods. §9 calls that out explicitly and asks for an injected capability
//! interface instead, so every hook here is a method on a trait the caller implements and hands to
//! [`crate::reactor::Reactor::new`] by composition — never by inheritance. This keeps the reactor
//! trivially embeddable and avoids the cyclic reactor/callback reference the source has.
//!
//! Every default method is a no-op, so callers only implement the hooks they care about.

use mqtt_core::{Connack, Puback, Publish, Suback, Unsuback};

use crate::error::ReactorError;

/// Application hooks the reactor invokes synchronously from `read`, `write`, or `poll` (§5).
///
/// None of these may call back into the reactor re-entrantly in a way that assumes the call
/// stack below them has unwound — the ordering guarantees of §5 hold, but the reactor is already
/// mid-transition while a hook runs.
#[allow(unused_variables)]
pub trait Callbacks {
    /// A `Connack` was received (accepted or not; see [`Callbacks::on_connect_fail`] for the
    /// refusal/failure path, which the reactor drives separately once it decides to terminate).
    fn on_connack(&mut self, connack: &Connack) {}

    /// A `Suback` matching an outstanding `Subscribe` arrived.
    fn on_suback(&mut self, suback: &Suback) {}

    /// A `Puback` matching an outstanding QoS 1 `Publish` arrived.
    fn on_puback(&mut self, puback: &Puback) {}

    /// An `Unsuback` matching an outstanding `Unsubscribe` arrived.
    fn on_unsuback(&mut self, unsuback: &Unsuback) {}

    /// An inbound `Publish` (any QoS) arrived from the broker.
    fn on_publish(&mut self, publish: &Publish) {}

    /// The session ended, gracefully or not, after having reached `Connack` or `Connected`.
    fn on_disconnect(&mut self, error: Option<&ReactorError>) {}

    /// The session failed before ever reaching `Connack`.
    fn on_connect_fail(&mut self, error: &ReactorError) {}
}

/// A [`Callbacks`] implementation that does nothing, for tests and for adapters that only care
/// about a subset of hooks wired up through closures elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallbacks;

impl Callbacks for NullCallbacks {}
