//! Ports: the set and handler API exposed to the network layer, and the
//! driver/network capabilities consumed from it.

pub mod inbound;
pub mod outbound;

pub use inbound::{AppHandler, GossipSet};
pub use outbound::{GossipNetwork, Gossiper, PushGossiper};
