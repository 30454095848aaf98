mod association;
mod records;
mod storage;

pub use association::AssociationStore;
pub use records::{ImageRecord, ImageSource};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
