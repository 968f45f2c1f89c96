mod streamer_error;
pub use streamer_error::*;

mod request_arena;
pub use request_arena::RequestId;

mod file_request;
pub use file_request::*;

mod streamer_context;
pub use streamer_context::{StreamerContext, StreamerContextLink};

mod stream_stack;
pub use stream_stack::*;

mod scheduler;
pub use scheduler::{prioritize_requests, Scheduler, SchedulerConfig, READ_ALIGNMENT};

mod streamer;
pub use streamer::*;

mod storage_drive;
pub use storage_drive::{StorageDrive, StorageDriveConfig};

mod read_splitter;
pub use read_splitter::{ReadSplitter, ReadSplitterConfig};

mod streamer_config;
pub use streamer_config::{StackEntryConfig, StreamerConfig};

mod asset_data_stream;
pub use asset_data_stream::AssetDataStream;

pub use sluice_base::{
    ClaimMemory, Deadline, DeadlineTime, Priority, ReportType, RequestPath, RequestStatus,
    Statistic, StatisticValue, NO_DEADLINE_TIME,
};
