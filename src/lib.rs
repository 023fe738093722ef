//! OpenFlow 1.0 controller that forwards each flow over alternating paths of a static
//! topology.

mod bits;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod registry;
pub mod rules;
pub mod selector;
pub mod switch;
pub mod topology;

pub use engine::{Decision, Dropped, ForwardingEngine, Stage};
pub use error::{CodecError, Error, Result};
