//! # patrol-proc
//!
//! Supervisor for local scripts: register them in a catalog, start, stop and
//! restart them, and keep their recent output around for tailing.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use patrol_proc::{Registry, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::open("/tmp/patrol/services.json", SupervisorConfig::default())
//!     .unwrap();
//!
//! let record = registry
//!     .register("/srv/start_web.sh".as_ref(), None)
//!     .await
//!     .unwrap();
//! registry.start(record.id()).await;
//!
//! let mut tail = registry.subscribe_logs(record.id()).await.unwrap();
//! while let Some(line) = tail.receiver.recv().await {
//!     println!("{}", line);
//! }
//! # }
//! ```

pub mod decode;
pub mod error;
pub mod output;
pub mod process;
pub mod registry;
pub mod script;
pub mod types;

pub use error::RegistryError;
pub use output::{LogSubscription, OutputCapture, SubscriberId};
pub use process::ManagedProcess;
pub use registry::{Registry, SupervisorConfig};
pub use types::*;
