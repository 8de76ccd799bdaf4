mod dedup;
mod emitter;
mod receiver;

pub use dedup::{DedupCache, DedupCacheConfig};
pub use emitter::CompositeEmitter;
pub use receiver::{CompositeReceiver, Entities, TypedEntities};
