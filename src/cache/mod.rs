// Layered cache for dashboard state.
// Memory, synchronous local and asynchronous persistent tiers plus the widget data view.

pub mod backend;
pub mod compress;
pub mod entry;
pub mod memory;
pub mod paths;
pub mod store;
pub mod tiered;
pub mod widget;

pub use backend::{AsyncBackend, MemoryAsyncBackend, MemorySyncBackend, SyncBackend};
pub use compress::{compress, decompress, is_compressed};
pub use entry::{CacheEntry, DEFAULT_TTL, Lookup};
pub use store::{FileAsyncBackend, FileSyncBackend};
pub use tiered::{CacheStats, DEFAULT_PREFIX, StoreOptions, TieredStore};
pub use widget::{CachedWidgetData, DataSource, FetchOptions, WidgetCache};
