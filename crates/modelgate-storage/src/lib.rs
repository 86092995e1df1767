pub mod entities;
pub mod memory;
pub mod seaorm;
pub mod snapshot;
pub mod storage;

pub use memory::MemoryStorage;
pub use seaorm::SeaOrmStorage;
pub use snapshot::{ChannelRow, ChannelStatus, ErrorLogRow, StorageSnapshot, TokenRow, UserRow};
pub use storage::{Storage, StorageError, StorageResult};
