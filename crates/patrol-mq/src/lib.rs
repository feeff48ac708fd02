//! # patrol-mq
//!
//! A small durable event queue. Local tools publish messages; a human or a
//! scanner acknowledges and resolves them. Messages are never deleted.
//!
//! ```rust,no_run
//! use patrol_mq::{MessageStore, Query};
//!
//! let store = MessageStore::new("/tmp/patrol/mq.json");
//! let msg = store
//!     .publish("backup", "error", "disk full", Some("/dev/sda1 at 100%"), None)
//!     .unwrap();
//! store.ack(&msg.id).unwrap();
//!
//! let open = store
//!     .query(&Query { status: Some("new,ack".into()), ..Query::default() })
//!     .unwrap();
//! assert_eq!(open.total, 1);
//! ```

pub mod error;
pub mod message;
pub mod store;

pub use error::StoreError;
pub use message::{Message, MessageStatus, Meta};
pub use store::{MessageStore, Query, QueryPage, Stats};
