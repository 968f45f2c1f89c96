use crate::file_request::QueuedRequest;
use crate::streamer_context::StreamerContextShared;
use crate::{
    CancelData, Command, CustomData, FileRequestPtr, FlushData, ReadRequestData,
    ReadRequestResult, ReportData, RescheduleData, Scheduler, SchedulerConfig, StreamStackEntry,
    StreamerConfig, StreamerError, StreamerResult,
};
use sluice_base::{
    ClaimMemory, Deadline, Priority, ReportType, RequestBuffer, RequestMemoryAllocator,
    RequestPath, RequestStatus, Statistic,
};
use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Where the data of a read goes
pub enum ReadOutput {
    // Caller provided memory. Must be at least as large as the read.
    Buffer(Vec<u8>),
    // Memory is allocated right before the read is started
    Allocator(Arc<dyn RequestMemoryAllocator>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    pub offset: u64,
    pub deadline: Deadline,
    pub priority: Priority,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            offset: 0,
            deadline: Deadline::NO_DEADLINE,
            priority: Priority::MEDIUM,
        }
    }
}

/// Accepts requests from any thread and hands them to the scheduler thread, which runs them
/// through the stream stack.
///
/// Requests are created first and queued separately so that a completion callback can be set
/// in between.
pub struct Streamer {
    shared: Arc<StreamerContextShared>,
    thread: Option<JoinHandle<()>>,
}

impl Streamer {
    pub fn new(stack: Box<dyn StreamStackEntry>) -> StreamerResult<Self> {
        Self::with_scheduler_config(stack, SchedulerConfig::default())
    }

    pub fn with_scheduler_config(
        stack: Box<dyn StreamStackEntry>,
        config: SchedulerConfig,
    ) -> StreamerResult<Self> {
        let scheduler = Scheduler::new(stack, config);
        let shared = scheduler.shared();
        let thread = scheduler.start_thread()?;
        Ok(Streamer {
            shared,
            thread: Some(thread),
        })
    }

    pub fn from_config(config: &StreamerConfig) -> StreamerResult<Self> {
        let stack = config.build_stack()?;
        Self::with_scheduler_config(stack, config.scheduler.clone())
    }

    /// Creates a read of `size` bytes. The request does nothing until it is queued.
    pub fn read<T: Into<RequestPath>>(
        &self,
        path: T,
        output: ReadOutput,
        size: u64,
        options: ReadOptions,
    ) -> StreamerResult<FileRequestPtr> {
        let path = path.into();
        if path.is_empty() {
            return Err(StreamerError::EmptyPath);
        }

        if usize::try_from(size).is_err() {
            return Err(format!("Read of {} bytes from {} is too large", size, path).into());
        }

        let (output, allocator) = match output {
            ReadOutput::Buffer(buffer) => {
                if (buffer.len() as u64) < size {
                    return Err(StreamerError::BufferTooSmall {
                        buffer_size: buffer.len() as u64,
                        read_size: size,
                    });
                }
                (Some(RequestBuffer::from_vec(buffer)), None)
            }
            ReadOutput::Allocator(allocator) => {
                if size == 0 {
                    return Err(format!("Read from {} has no size to allocate", path).into());
                }
                (None, Some(allocator))
            }
        };

        Ok(FileRequestPtr::new(Command::ReadRequest(ReadRequestData {
            path,
            offset: options.offset,
            size,
            deadline: options.deadline.resolve(Instant::now()),
            priority: options.priority,
            output,
            allocator,
            bytes_read: 0,
        })))
    }

    pub fn queue_request(
        &self,
        request: &FileRequestPtr,
    ) -> StreamerResult<()> {
        let queued = request.take_for_queue()?;
        self.shared.submit(vec![queued]);
        Ok(())
    }

    /// Queues all requests at once. Requests that were already queued are skipped.
    pub fn queue_requests(
        &self,
        requests: &[FileRequestPtr],
    ) -> StreamerResult<()> {
        let mut queued: Vec<QueuedRequest> = Vec::with_capacity(requests.len());
        let mut result = Ok(());
        for request in requests {
            match request.take_for_queue() {
                Ok(request) => queued.push(request),
                Err(error) => {
                    log::warn!("Skipping {:?}: {}", request, error);
                    result = Err(error);
                }
            }
        }
        self.shared.submit(queued);
        result
    }

    /// Called on the scheduler thread once the request finished. Must be set before queueing.
    pub fn set_request_complete_callback<F: FnOnce(FileRequestPtr) + Send + 'static>(
        &self,
        request: &FileRequestPtr,
        callback: F,
    ) -> StreamerResult<()> {
        request.set_completion_callback(Box::new(callback))
    }

    pub fn create_cancel(
        &self,
        target: &FileRequestPtr,
    ) -> FileRequestPtr {
        FileRequestPtr::new(Command::Cancel(CancelData {
            target: target.clone(),
        }))
    }

    /// Cancels the target as far as possible. Parts of it that are already in flight may still
    /// complete. Canceling a completed request is a no-op.
    pub fn cancel(
        &self,
        target: &FileRequestPtr,
    ) -> StreamerResult<FileRequestPtr> {
        let cancel = self.create_cancel(target);
        self.queue_request(&cancel)?;
        Ok(cancel)
    }

    pub fn create_reschedule(
        &self,
        target: &FileRequestPtr,
        deadline: Deadline,
        priority: Priority,
    ) -> FileRequestPtr {
        FileRequestPtr::new(Command::Reschedule(RescheduleData {
            target: target.clone(),
            deadline: deadline.resolve(Instant::now()),
            priority,
        }))
    }

    pub fn reschedule_request(
        &self,
        target: &FileRequestPtr,
        deadline: Deadline,
        priority: Priority,
    ) -> StreamerResult<FileRequestPtr> {
        let reschedule = self.create_reschedule(target, deadline, priority);
        self.queue_request(&reschedule)?;
        Ok(reschedule)
    }

    /// Drops any cached data and file handles for the file
    pub fn flush_cache<T: Into<RequestPath>>(
        &self,
        path: T,
    ) -> StreamerResult<FileRequestPtr> {
        let flush = FileRequestPtr::new(Command::Flush(FlushData { path: path.into() }));
        self.queue_request(&flush)?;
        Ok(flush)
    }

    pub fn flush_caches(&self) -> StreamerResult<FileRequestPtr> {
        let flush = FileRequestPtr::new(Command::FlushAll);
        self.queue_request(&flush)?;
        Ok(flush)
    }

    /// Collects information from the stack entries, see `get_report_result`
    pub fn report(
        &self,
        report_type: ReportType,
    ) -> StreamerResult<FileRequestPtr> {
        let report = FileRequestPtr::new(Command::Report(ReportData {
            report_type,
            output: Vec::default(),
        }));
        self.queue_request(&report)?;
        Ok(report)
    }

    /// Creates a request carrying data only a custom stack entry understands
    pub fn custom<T: Any + Send>(
        &self,
        data: T,
        fail_when_unhandled: bool,
    ) -> FileRequestPtr {
        FileRequestPtr::new(Command::Custom(CustomData {
            data: Box::new(data),
            fail_when_unhandled,
        }))
    }

    /// Returns the output of a finished read. With `ClaimMemory::Yes` the caller takes ownership
    /// of the memory and becomes responsible for releasing it to the allocator it came from.
    pub fn get_read_request_result(
        &self,
        request: &FileRequestPtr,
        claim_memory: ClaimMemory,
    ) -> Option<ReadRequestResult> {
        request.read_result(claim_memory)
    }

    pub fn get_report_result(
        &self,
        request: &FileRequestPtr,
    ) -> Option<Vec<Statistic>> {
        request.report_result()
    }

    pub fn get_request_status(
        &self,
        request: &FileRequestPtr,
    ) -> RequestStatus {
        request.status()
    }

    pub fn has_request_completed(
        &self,
        request: &FileRequestPtr,
    ) -> bool {
        request.has_completed()
    }

    /// Stops requests from being handed to the stack. Requests can still be queued and cancel
    /// or reschedule requests still take effect.
    pub fn suspend_processing(&self) {
        log::debug!("Suspending streamer");
        self.shared.set_suspended(true);
    }

    pub fn resume_processing(&self) {
        log::debug!("Resuming streamer");
        self.shared.set_suspended(false);
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.is_suspended()
    }

    /// Snapshot published by the scheduler the last time it went idle
    pub fn statistics(&self) -> Vec<Statistic> {
        self.shared.statistics()
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if self.shared.is_suspended() {
            log::warn!("Streamer dropped while suspended, resuming so queued requests can finish");
            self.shared.set_suspended(false);
        }

        self.shared.request_shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Streamer scheduler thread panicked");
            }
        }
    }
}
