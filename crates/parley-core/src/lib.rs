//! Message lifecycle core: visibility and deletion, read/unread batches,
//! pins and stars, and the credential checks the gateway relies on.
//!
//! Every mutation returns an [`service::Outcome`] carrying the domain events
//! the caller hands to the fan-out dispatcher.

pub mod credentials;
pub mod deletion;
pub mod error;
pub mod events;
pub mod pins;
pub mod reads;
pub mod service;
pub mod visibility;

pub use error::{CoreError, Result};
pub use events::DomainEvent;
pub use service::{MessageService, Outcome};
