pub mod hashing;

mod handle;
pub use handle::ElementId;
pub use handle::LoadHandle;

pub mod lru_cache;
pub use lru_cache::LruCache;

pub mod object_pool;
pub use object_pool::ObjectPool;
pub use object_pool::Pooled;

pub mod ring_buffer;
pub use ring_buffer::RingBuffer;
