//! MC Gateway Service (mcsrv)
//!
//! An async-first gateway exposing a Mitsubishi programmable controller's
//! memory over the MC-protocol 3E binary frame format, with a DataSet/Tag
//! polling engine that keeps a typed last-value cache current.
//!
//! # Features
//!
//! - **Persistent connection**: one TCP session per controller, with
//!   per-request timeout and transparent reconnect-on-demand
//! - **Structural serialization**: a request channel feeding a dedicated
//!   I/O task keeps exactly one frame in flight, FIFO
//! - **Typed tags**: int16/int32/real/string/bool decoded out of block
//!   reads, with per-tag error isolation
//! - **Process deployment**: function-call sequences packed into fixed-width
//!   word slots and written in one shot
//!
//! # Architecture
//!
//! - **`core`**: frame codec, transport client, value marshalling, polling
//!   engine, and step packer
//! - **`storage`**: the persisted-cache contract and the in-memory store
//! - **`config`**: YAML + environment configuration
//! - **`utils`**: error taxonomy and shared helpers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcsrv::core::client::{McClient, McClientConfig};
//! use mcsrv::core::device::DeviceCode;
//! use mcsrv::core::traits::Communication;
//! use mcsrv::utils::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = McClient::new(McClientConfig {
//!         host: "192.168.0.10".to_string(),
//!         ..Default::default()
//!     });
//!     client.connect().await?;
//!
//!     let words = client.read_words(DeviceCode::D, 1000, 10).await?;
//!     println!("D1000..D1009 = {:?}", words);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod storage;
pub mod utils;

pub use crate::config::McSrvConfig;
pub use crate::core::client::{McClient, McClientConfig};
pub use crate::core::device::DeviceCode;
pub use crate::core::polling::{DataSet, PollingMetrics, Tag, TagPoller};
pub use crate::core::process::{
    DeployOptions, DeployResult, FunctionArg, ProcessFunction, ProcessProgram, ProcessRuntime,
    ProcessStep,
};
pub use crate::core::traits::{Communication, StringEncoding};
pub use crate::core::values::{PlcValue, TagType};
pub use crate::storage::{CacheStore, DataSetCacheEntry, MemoryCacheStore, TagCacheEntry};
pub use crate::utils::error::{McSrvError, Result};
