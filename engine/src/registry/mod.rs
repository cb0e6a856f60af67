//! Work Unit Registry
//!
//! Durable state machine tracking every unit of work: identity, status,
//! priority, payload, and an append-only transition history. Persistence is
//! one file per unit with the status encoded in the file name.

pub mod store;
pub mod unit;

pub use store::{UnitFilter, WorkUnitRegistry};
pub use unit::{
    parse_file_name, sanitize_slug, Finding, HistoryEntry, Payload, Priority, UnitKind,
    UnitStatus, WorkUnit,
};
