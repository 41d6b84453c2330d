#![forbid(unsafe_code)]

pub mod bridge;
pub mod controller_id;
pub mod datapath_manager;
pub mod ip_learning;
