//! Normalized data model shared by both backends.
//!
//! Records are read-only snapshots rebuilt on every poll. Mutating actions act
//! on the backend's live item and callers re-fetch to observe the effect.

mod account;
mod due;
mod item;
mod pulse;

pub use account::{Account, BackendKind, CategoryColor, Contact, Folder, ItemReference};
pub use due::DueBucket;
pub use item::{
    FlagStatus, Importance, NewItemKind, NormalizedEvent, NormalizedMessage, NormalizedTask,
    OutgoingMail, ResponseStatus, local_naive,
};
pub use pulse::PulseStatus;
