//! Order persistence.
//!
//! [`OrderStore`] is the engine's single shared mutable resource. It sits
//! on an [`OrderJournal`] so every order survives a restart.

mod journal;
mod order_store;

pub use journal::{
    FileOrderJournal, JournalError, JournalRecord, JournalState, MemoryOrderJournal, OrderJournal,
};
pub use order_store::{OrderStore, StoreError, StoreUpdate};
