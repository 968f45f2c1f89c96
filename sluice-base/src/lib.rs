pub mod hashing;
pub mod lru_cache;

mod streamer_types;
pub use streamer_types::*;

mod request_path;
pub use request_path::RequestPath;

pub mod allocator;
pub use allocator::{
    AllocationError, DefaultRequestMemoryAllocator, RequestBuffer, RequestMemoryAllocation,
    RequestMemoryAllocator,
};

pub mod statistics;
pub use statistics::{AverageWindow, Statistic, StatisticValue};
