//! Core protocol and polling functionality

pub mod client;
pub mod device;
pub mod frame;
pub mod polling;
pub mod process;
pub mod traits;
pub mod values;
