//! Persistence layer: record types, the `Store` trait, and the libSQL backend.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use self::libsql_backend::LibSqlBackend;
pub use self::model::{
    Contact, DeliveryStats, DeliveryStatus, Direction, EventTag, Lead, LeadEvent, LeadSource,
    MessageRecord, MessageStatus, NewLead, Template, TemplateKind,
};
pub use self::traits::Store;
