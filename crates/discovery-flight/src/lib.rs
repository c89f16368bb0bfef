//! Arrow Flight catalog discovery
//!
//! This crate connects to an Apache Arrow Flight service and enumerates the
//! datasets ("flights") it advertises.
//!
//! # Features
//!
//! - **DiscoveryClient**: one channel per client, explicit `close`
//! - **Lazy listings**: descriptors are yielded as the server sends them
//! - **Bounded waits**: connect budget, per-request deadline, prompt cancellation
//! - **MockCatalogServer**: in-process Flight catalog for tests and demos
//!
//! # Example
//!
//! ```ignore
//! use discovery_core::{ConnectionOptions, Endpoint};
//! use discovery_flight::DiscoveryClient;
//! use futures::StreamExt;
//!
//! let endpoint: Endpoint = "grpc+tcp://[::1]:31010".parse()?;
//! let client = DiscoveryClient::connect(endpoint, ConnectionOptions::default()).await?;
//!
//! let mut datasets = client.list_datasets().await?;
//! while let Some(descriptor) = datasets.next().await {
//!     println!("{}", descriptor?);
//! }
//! client.close();
//! ```

pub mod client;
pub mod error;
pub mod listing;
pub mod mock;

pub use client::{ClientState, DiscoveryClient};
pub use error::{ConnectionError, DiscoveryError, ErrorKind, RequestError};
pub use listing::DatasetStream;
pub use mock::{MockCatalogServer, MockServerHandle};

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;
