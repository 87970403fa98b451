//! Kiln Clients
//!
//! Typed clients for the two external collaborators of the build worker:
//! - `BrokerClient`: AMQP connection used to consume build commands and
//!   publish status events and dead letters
//! - `StorageClient`: S3-compatible object store receiving build artifacts
//!
//! # Example
//!
//! ```no_run
//! use kiln_client::{BrokerClient, BrokerSettings, Topology};
//!
//! #[tokio::main]
//! async fn main() -> kiln_client::Result<()> {
//!     let settings = BrokerSettings {
//!         host: "localhost".to_string(),
//!         port: 5672,
//!         username: "guest".to_string(),
//!         password: "guest".to_string(),
//!         vhost: "/".to_string(),
//!     };
//!
//!     let broker = BrokerClient::connect(&settings).await?;
//!     broker
//!         .declare_topology(&Topology::new("build.commands", "build.results"))
//!         .await?;
//!     Ok(())
//! }
//! ```

mod broker;
pub mod error;
mod storage;

pub use broker::{BrokerClient, BrokerSettings, DeliveryStream, InboundDelivery, Publisher, Topology};
pub use error::{ClientError, Result};
pub use storage::{StorageClient, StorageSettings};
