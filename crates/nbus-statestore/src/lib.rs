mod error;
mod memory;
mod store;

pub use error::StateStoreError;
pub use memory::InMemoryStateStore;
pub use store::{StateStore, StoredValue};
