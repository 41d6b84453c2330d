//! Production adapters driving a local Open vSwitch instance through
//! its stable command-line interfaces. The OpenFlow and OVSDB wire
//! protocols stay inside the OVS tools; this crate renders flow specs
//! and bridge settings to their argument syntax and supervises the
//! per-bridge sessions.

mod backend;
mod controller;
mod ofctl;
mod vsctl;

pub use backend::OvsBackend;
pub use controller::{MonitorParser, spawn_session_supervisor};
pub use ofctl::OvsOfctl;
pub use vsctl::OvsdbDriver;
