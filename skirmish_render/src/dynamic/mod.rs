/// Dynamic geometry: lock scopes, ring allocators and the dynamic vertex format

pub mod lock_scope;
pub mod ring_allocator;
pub mod dynamic_vertex;

pub use lock_scope::{LockMode, LockScope, LockedRange};
pub use ring_allocator::{RingAllocator, RingStats};
pub use dynamic_vertex::{pack_argb, DynamicVertex};
