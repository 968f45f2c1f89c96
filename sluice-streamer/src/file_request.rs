use crate::{RequestId, StreamerError, StreamerResult};
use sluice_base::{
    ClaimMemory, DeadlineTime, Priority, ReportType, RequestBuffer, RequestMemoryAllocator,
    RequestPath, RequestStatus, Statistic,
};
use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Called on the scheduler thread once a request and all its children reached a terminal status
pub type CompletionCallback = Box<dyn FnOnce(&FileRequest) + Send + 'static>;

/// Called on the scheduler thread with the handle of the request that completed
pub type ExternalCompletionCallback = Box<dyn FnOnce(FileRequestPtr) + Send + 'static>;

/// A read as requested by a user of the streamer. The output buffer either came from the caller
/// or is allocated by the scheduler before the request enters the stack.
pub struct ReadRequestData {
    pub path: RequestPath,
    pub offset: u64,
    pub size: u64,
    pub deadline: DeadlineTime,
    pub priority: Priority,
    pub output: Option<RequestBuffer>,
    pub allocator: Option<Arc<dyn RequestMemoryAllocator>>,
    pub bytes_read: u64,
}

/// Internal read of a (part of a) file. Data lands in the buffer of the external read `output`
/// starting at `output_offset`.
#[derive(Clone, Debug)]
pub struct ReadData {
    pub path: RequestPath,
    pub offset: u64,
    pub size: u64,
    pub output: RequestId,
    pub output_offset: u64,
}

#[derive(Clone, Debug)]
pub struct CancelData {
    pub target: FileRequestPtr,
}

#[derive(Clone, Debug)]
pub struct RescheduleData {
    pub target: FileRequestPtr,
    pub deadline: DeadlineTime,
    pub priority: Priority,
}

#[derive(Clone, Debug)]
pub struct FlushData {
    pub path: RequestPath,
}

#[derive(Clone, Debug)]
pub struct ReportData {
    pub report_type: ReportType,
    pub output: Vec<Statistic>,
}

pub struct CustomData {
    pub data: Box<dyn Any + Send>,
    // If no stack entry handles the request it completes as Failed instead of Completed
    pub fail_when_unhandled: bool,
}

pub enum Command {
    ReadRequest(ReadRequestData),
    Read(ReadData),
    Cancel(CancelData),
    Reschedule(RescheduleData),
    Flush(FlushData),
    FlushAll,
    Report(ReportData),
    Custom(CustomData),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReadRequest(_) => "ReadRequest",
            Command::Read(_) => "Read",
            Command::Cancel(_) => "Cancel",
            Command::Reschedule(_) => "Reschedule",
            Command::Flush(_) => "Flush",
            Command::FlushAll => "FlushAll",
            Command::Report(_) => "Report",
            Command::Custom(_) => "Custom",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Command::ReadRequest(_) | Command::Read(_))
    }

    // Higher classes are handed to the stack first
    pub(crate) fn order_class(&self) -> u8 {
        match self {
            Command::Cancel(_) => 3,
            Command::Reschedule(_) => 2,
            Command::Flush(_) | Command::FlushAll | Command::Report(_) | Command::Custom(_) => 1,
            Command::ReadRequest(_) | Command::Read(_) => 0,
        }
    }

    pub fn path(&self) -> Option<&RequestPath> {
        match self {
            Command::ReadRequest(data) => Some(&data.path),
            Command::Read(data) => Some(&data.path),
            Command::Flush(data) => Some(&data.path),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Command::ReadRequest(data) => f
                .debug_struct("ReadRequest")
                .field("path", &data.path)
                .field("offset", &data.offset)
                .field("size", &data.size)
                .field("priority", &data.priority)
                .field("deadline", &data.deadline)
                .finish(),
            Command::Read(data) => data.fmt(f),
            Command::Cancel(data) => data.fmt(f),
            Command::Reschedule(data) => data.fmt(f),
            Command::Flush(data) => data.fmt(f),
            Command::FlushAll => f.write_str("FlushAll"),
            Command::Report(data) => data.fmt(f),
            Command::Custom(data) => f
                .debug_struct("Custom")
                .field("fail_when_unhandled", &data.fail_when_unhandled)
                .finish(),
        }
    }
}

/// A unit of work owned by the scheduler. External requests are created through the `Streamer`,
/// internal requests are created by stack entries as children of another request.
pub struct FileRequest {
    command: Command,
    status: RequestStatus,
    parent: Option<RequestId>,
    // Number of children that haven't been finalized yet
    dependencies: u16,
    estimated_completion: Option<Instant>,
    on_completion: Option<CompletionCallback>,
    external: Option<FileRequestPtr>,
}

impl FileRequest {
    pub(crate) fn new(command: Command) -> Self {
        FileRequest {
            command,
            status: RequestStatus::Pending,
            parent: None,
            dependencies: 0,
            estimated_completion: None,
            on_completion: None,
            external: None,
        }
    }

    pub(crate) fn new_external(
        command: Command,
        handle: FileRequestPtr,
        callback: Option<ExternalCompletionCallback>,
    ) -> Self {
        let mut request = FileRequest::new(command);
        if let Some(callback) = callback {
            let callback_handle = handle.clone();
            request.on_completion = Some(Box::new(move |_| callback(callback_handle)));
        }
        request.external = Some(handle);
        request
    }

    pub(crate) fn new_child(
        command: Command,
        parent: RequestId,
    ) -> Self {
        let mut request = FileRequest::new(command);
        request.parent = Some(parent);
        request
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Statuses only move forward. Anything else is ignored.
    pub fn set_status(
        &mut self,
        status: RequestStatus,
    ) {
        if self.status.can_transition_to(status) {
            self.status = status;
        } else if self.status != status {
            log::trace!(
                "Ignoring status change of {} request from {:?} to {:?}",
                self.command.name(),
                self.status,
                status
            );
        }
    }

    pub fn parent(&self) -> Option<RequestId> {
        self.parent
    }

    pub fn dependencies(&self) -> u16 {
        self.dependencies
    }

    pub(crate) fn add_dependency(&mut self) {
        assert!(
            self.dependencies < u16::MAX,
            "Too many child requests for a single request"
        );
        self.dependencies += 1;
    }

    pub(crate) fn remove_dependency(&mut self) {
        debug_assert!(self.dependencies > 0);
        self.dependencies = self.dependencies.saturating_sub(1);
    }

    pub fn estimated_completion(&self) -> Option<Instant> {
        self.estimated_completion
    }

    pub fn set_estimated_completion(
        &mut self,
        estimated_completion: Instant,
    ) {
        self.estimated_completion = Some(estimated_completion);
    }

    pub fn set_completion_callback<F: FnOnce(&FileRequest) + Send + 'static>(
        &mut self,
        callback: F,
    ) {
        self.on_completion = Some(Box::new(callback));
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    pub(crate) fn external(&self) -> Option<&FileRequestPtr> {
        self.external.as_ref()
    }

    pub(crate) fn take_external(&mut self) -> Option<FileRequestPtr> {
        self.external.take()
    }

    pub(crate) fn take_completion_callback(&mut self) -> Option<CompletionCallback> {
        self.on_completion.take()
    }
}

impl std::fmt::Debug for FileRequest {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FileRequest")
            .field("command", &self.command)
            .field("status", &self.status)
            .field("parent", &self.parent)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

static NEXT_EXTERNAL_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A request taken out of its handle to be handed to the scheduler thread
pub(crate) struct QueuedRequest {
    pub handle: FileRequestPtr,
    pub command: Command,
    pub callback: Option<ExternalCompletionCallback>,
}

struct ExternalRequestState {
    // Present until the request is queued
    command: Option<Command>,
    callback: Option<ExternalCompletionCallback>,
    queued: bool,
    output: Option<Arc<RequestBuffer>>,
    bytes_read: u64,
    report: Option<Vec<Statistic>>,
}

struct ExternalRequest {
    id: u64,
    command_name: &'static str,
    is_read: bool,
    // Written after the results in `state` are published
    status: AtomicU8,
    state: Mutex<ExternalRequestState>,
    // Locked for as long as this request exists
    allocator: Option<Arc<dyn RequestMemoryAllocator>>,
}

impl ExternalRequest {
    fn lock_state(&self) -> MutexGuard<ExternalRequestState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ExternalRequest {
    fn drop(&mut self) {
        // Memory goes back to the allocator before it is unlocked
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.output = None;
        state.command = None;

        if let Some(allocator) = self.allocator.take() {
            allocator.unlock_allocator();
        }
    }
}

/// Handle to a request created through the `Streamer`. Cheap to clone, the request is released
/// once every handle is dropped and the scheduler is done with it.
#[derive(Clone)]
pub struct FileRequestPtr(Arc<ExternalRequest>);

impl FileRequestPtr {
    pub(crate) fn new(command: Command) -> Self {
        let allocator = match &command {
            Command::ReadRequest(data) => data.allocator.clone(),
            _ => None,
        };

        if let Some(allocator) = &allocator {
            allocator.lock_allocator();
        }

        FileRequestPtr(Arc::new(ExternalRequest {
            id: NEXT_EXTERNAL_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            command_name: command.name(),
            is_read: matches!(command, Command::ReadRequest(_)),
            status: AtomicU8::new(RequestStatus::Pending as u8),
            state: Mutex::new(ExternalRequestState {
                command: Some(command),
                callback: None,
                queued: false,
                output: None,
                bytes_read: 0,
                report: None,
            }),
            allocator,
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// `Scheduled` once any part of the request reached the stack
    pub fn status(&self) -> RequestStatus {
        RequestStatus::from_u8(self.0.status.load(Ordering::Acquire))
            .unwrap_or(RequestStatus::Failed)
    }

    pub fn has_completed(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_read(&self) -> bool {
        self.0.is_read
    }

    pub fn is_queued(&self) -> bool {
        self.0.lock_state().queued
    }

    pub(crate) fn set_completion_callback(
        &self,
        callback: ExternalCompletionCallback,
    ) -> StreamerResult<()> {
        let mut state = self.0.lock_state();
        if state.queued {
            return Err(StreamerError::AlreadyQueued);
        }
        state.callback = Some(callback);
        Ok(())
    }

    pub(crate) fn take_for_queue(&self) -> StreamerResult<QueuedRequest> {
        let mut state = self.0.lock_state();
        if state.queued {
            return Err(StreamerError::AlreadyQueued);
        }
        let command = state.command.take().ok_or(StreamerError::AlreadyQueued)?;
        state.queued = true;
        Ok(QueuedRequest {
            handle: self.clone(),
            command,
            callback: state.callback.take(),
        })
    }

    pub(crate) fn publish_read_result(
        &self,
        output: Option<RequestBuffer>,
        bytes_read: u64,
    ) {
        let mut state = self.0.lock_state();
        state.output = output.map(Arc::new);
        state.bytes_read = bytes_read;
    }

    pub(crate) fn publish_report(
        &self,
        report: Vec<Statistic>,
    ) {
        self.0.lock_state().report = Some(report);
    }

    pub(crate) fn publish_status(
        &self,
        status: RequestStatus,
    ) {
        self.0.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn read_result(
        &self,
        claim_memory: ClaimMemory,
    ) -> Option<ReadRequestResult> {
        if !self.is_read() || !self.has_completed() {
            return None;
        }

        let mut state = self.0.lock_state();
        let bytes_read = state.bytes_read;
        match claim_memory {
            ClaimMemory::No => {
                let output = state.output.clone()?;
                Some(ReadRequestResult {
                    buffer: ReadRequestBuffer::Shared(output),
                    bytes_read,
                })
            }
            ClaimMemory::Yes => {
                let output = state.output.take()?;
                match Arc::try_unwrap(output) {
                    Ok(buffer) => Some(ReadRequestResult {
                        buffer: ReadRequestBuffer::Claimed(buffer.claim()),
                        bytes_read,
                    }),
                    Err(output) => {
                        log::warn!(
                            "Memory of read request {} can't be claimed while other references to it exist",
                            self.id()
                        );
                        state.output = Some(output);
                        None
                    }
                }
            }
        }
    }

    pub(crate) fn report_result(&self) -> Option<Vec<Statistic>> {
        if !self.has_completed() {
            return None;
        }
        self.0.lock_state().report.clone()
    }
}

impl PartialEq for FileRequestPtr {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for FileRequestPtr {}

impl Hash for FileRequestPtr {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.0.id.hash(state);
    }
}

impl std::fmt::Debug for FileRequestPtr {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FileRequestPtr")
            .field("id", &self.0.id)
            .field("command", &self.0.command_name)
            .field("status", &self.status())
            .finish()
    }
}

#[derive(Debug)]
pub enum ReadRequestBuffer {
    // Still owned by the request, released with it
    Shared(Arc<RequestBuffer>),
    // Owned by the caller. If it came from an allocator the caller must release it.
    Claimed(Vec<u8>),
}

#[derive(Debug)]
pub struct ReadRequestResult {
    pub buffer: ReadRequestBuffer,
    pub bytes_read: u64,
}

impl ReadRequestResult {
    /// The bytes that were actually read, which may be fewer than requested
    pub fn data(&self) -> &[u8] {
        let buffer: &[u8] = match &self.buffer {
            ReadRequestBuffer::Shared(buffer) => buffer,
            ReadRequestBuffer::Claimed(buffer) => buffer,
        };
        let length = (self.bytes_read as usize).min(buffer.len());
        &buffer[..length]
    }

    pub fn into_claimed(self) -> Option<Vec<u8>> {
        match self.buffer {
            ReadRequestBuffer::Shared(_) => None,
            ReadRequestBuffer::Claimed(buffer) => Some(buffer),
        }
    }
}
