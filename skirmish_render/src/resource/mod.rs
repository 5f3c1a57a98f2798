/// Buffer resources and their pool

pub mod buffer_resource;
pub mod buffer_pool;
pub mod texture_inbox;

pub use buffer_resource::{BufferResource, BufferResourceDesc, BufferUsage, StorageKind};
pub use buffer_pool::{BufferHandle, BufferPool, PoolStats};
pub use texture_inbox::{TextureInbox, TextureSender, TextureUpload};
