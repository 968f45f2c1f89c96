use crate::file_request::QueuedRequest;
use crate::request_arena::RequestArena;
use crate::{Command, FileRequest, FileRequestPtr, ReadData, RequestId};
use crossbeam_channel::{Receiver, Sender};
use sluice_base::hashing::HashMap;
use sluice_base::{DeadlineTime, Priority, RequestPath, RequestStatus, Statistic};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct Submissions {
    pub requests: Vec<QueuedRequest>,
    pub suspended: bool,
    pub shutdown: bool,
}

// State shared between the scheduler thread and the threads that submit requests
pub(crate) struct StreamerContextShared {
    submissions: Mutex<Submissions>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    statistics: Mutex<Vec<Statistic>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl StreamerContextShared {
    fn new() -> Self {
        // A single pending token is enough to wake the scheduler
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        StreamerContextShared {
            submissions: Mutex::new(Submissions::default()),
            wake_tx,
            wake_rx,
            statistics: Mutex::new(Vec::default()),
        }
    }

    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub fn wait_for_wake(
        &self,
        timeout: Option<Duration>,
    ) {
        profiling::scope!("StreamerContextShared::wait_for_wake");
        match timeout {
            Some(timeout) => {
                let _ = self.wake_rx.recv_timeout(timeout);
            }
            None => {
                let _ = self.wake_rx.recv();
            }
        }
    }

    pub fn submit(
        &self,
        requests: Vec<QueuedRequest>,
    ) {
        if requests.is_empty() {
            return;
        }

        lock(&self.submissions).requests.extend(requests);
        self.wake();
    }

    pub fn set_suspended(
        &self,
        suspended: bool,
    ) {
        lock(&self.submissions).suspended = suspended;
        self.wake();
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.submissions).suspended
    }

    pub fn request_shutdown(&self) {
        lock(&self.submissions).shutdown = true;
        self.wake();
    }

    // Takes all submitted requests, leaving the flags in place
    pub fn drain_submissions(&self) -> Submissions {
        let mut submissions = lock(&self.submissions);
        Submissions {
            requests: std::mem::take(&mut submissions.requests),
            suspended: submissions.suspended,
            shutdown: submissions.shutdown,
        }
    }

    pub fn set_statistics(
        &self,
        statistics: Vec<Statistic>,
    ) {
        *lock(&self.statistics) = statistics;
    }

    pub fn statistics(&self) -> Vec<Statistic> {
        lock(&self.statistics).clone()
    }
}

/// Lets stack entries and their worker threads wake up the scheduler thread, for example when
/// a read finished on another thread.
#[derive(Clone)]
pub struct StreamerContextLink {
    shared: Arc<StreamerContextShared>,
}

impl StreamerContextLink {
    pub fn wake_up_scheduling_thread(&self) {
        self.shared.wake();
    }
}

/// Owns every in-flight request. Only accessed from the scheduler thread, stack entries receive
/// it for every call that may create, complete or inspect requests.
pub struct StreamerContext {
    shared: Arc<StreamerContextShared>,
    arena: RequestArena,
    // Maps external handle ids to the request created for them
    external_lookup: HashMap<u64, RequestId>,
    // Waiting for the scheduler to hand them to the stack, in arrival order
    prepared: Vec<RequestId>,
    // Couldn't be prepared yet, retried on the next iteration
    delayed: VecDeque<RequestId>,
    completed: VecDeque<RequestId>,
}

impl StreamerContext {
    pub(crate) fn new() -> Self {
        StreamerContext {
            shared: Arc::new(StreamerContextShared::new()),
            arena: RequestArena::default(),
            external_lookup: HashMap::default(),
            prepared: Vec::default(),
            delayed: VecDeque::default(),
            completed: VecDeque::default(),
        }
    }

    pub fn link(&self) -> StreamerContextLink {
        StreamerContextLink {
            shared: self.shared.clone(),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<StreamerContextShared> {
        &self.shared
    }

    pub(crate) fn add_external_request(
        &mut self,
        queued: QueuedRequest,
    ) -> RequestId {
        let handle_id = queued.handle.id();
        let request = FileRequest::new_external(queued.command, queued.handle, queued.callback);
        let id = self.arena.insert(request);
        self.external_lookup.insert(handle_id, id);
        id
    }

    /// Creates a request owned by the scheduler. A parent won't be finalized before all of its
    /// children are.
    pub fn get_new_internal_request(
        &mut self,
        parent: Option<RequestId>,
        command: Command,
    ) -> RequestId {
        let request = match parent {
            Some(parent_id) => match self.arena.get_mut(parent_id) {
                Some(parent) => {
                    parent.add_dependency();
                    FileRequest::new_child(command, parent_id)
                }
                None => {
                    log::error!(
                        "Parent request {} of new {} request no longer exists",
                        parent_id,
                        command.name()
                    );
                    FileRequest::new(command)
                }
            },
            None => FileRequest::new(command),
        };

        self.arena.insert(request)
    }

    pub fn create_read(
        &mut self,
        parent: RequestId,
        path: RequestPath,
        offset: u64,
        size: u64,
        output: RequestId,
        output_offset: u64,
    ) -> RequestId {
        self.get_new_internal_request(
            Some(parent),
            Command::Read(ReadData {
                path,
                offset,
                size,
                output,
                output_offset,
            }),
        )
    }

    pub fn request(
        &self,
        id: RequestId,
    ) -> Option<&FileRequest> {
        self.arena.get(id)
    }

    pub fn request_mut(
        &mut self,
        id: RequestId,
    ) -> Option<&mut FileRequest> {
        self.arena.get_mut(id)
    }

    pub fn find_external_request(
        &self,
        handle: &FileRequestPtr,
    ) -> Option<RequestId> {
        self.external_lookup.get(&handle.id()).copied()
    }

    /// Queues a request for the scheduler to hand to the top of the stack
    pub fn push_prepared_request(
        &mut self,
        id: RequestId,
    ) {
        self.prepared.push(id);
    }

    pub fn prepared_requests(&self) -> &[RequestId] {
        &self.prepared
    }

    pub(crate) fn take_prepared_request(
        &mut self,
        index: usize,
    ) -> RequestId {
        self.prepared.remove(index)
    }

    /// Retry preparing the request on the next scheduler iteration
    pub fn delay_request(
        &mut self,
        id: RequestId,
    ) {
        self.delayed.push_back(id);
    }

    pub(crate) fn take_delayed_requests(&mut self) -> VecDeque<RequestId> {
        std::mem::take(&mut self.delayed)
    }

    pub fn num_delayed_requests(&self) -> usize {
        self.delayed.len()
    }

    /// The request must have a terminal status. It is finalized at the end of the current
    /// scheduler iteration.
    pub fn mark_request_as_completed(
        &mut self,
        id: RequestId,
    ) {
        self.completed.push_back(id);
    }

    /// Moves the request and its pending ancestors to `Scheduled`. Handles of external
    /// ancestors observe it right away.
    pub fn mark_request_as_scheduled(
        &mut self,
        id: RequestId,
    ) {
        let mut current = Some(id);
        while let Some(current_id) = current {
            let request = match self.arena.get_mut(current_id) {
                Some(request) => request,
                None => break,
            };
            if request.status() == RequestStatus::Pending {
                request.set_status(RequestStatus::Scheduled);
                if let Some(external) = request.external() {
                    external.publish_status(RequestStatus::Scheduled);
                }
            }
            current = request.parent();
        }
    }

    pub fn complete_request(
        &mut self,
        id: RequestId,
        status: RequestStatus,
    ) {
        debug_assert!(status.is_terminal());
        match self.arena.get_mut(id) {
            Some(request) => {
                request.set_status(status);
                self.completed.push_back(id);
            }
            None => log::error!("Tried to complete request {} which no longer exists", id),
        }
    }

    /// True if `ancestor` is the parent of `id`, or the parent of its parent and so on
    pub fn has_ancestor(
        &self,
        id: RequestId,
        ancestor: RequestId,
    ) -> bool {
        let mut current = self.arena.get(id).and_then(|request| request.parent());
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.arena.get(parent).and_then(|request| request.parent());
        }
        false
    }

    pub fn is_in_chain(
        &self,
        id: RequestId,
        root: RequestId,
    ) -> bool {
        id == root || self.has_ancestor(id, root)
    }

    /// Priority and deadline of the external read that a read is done for
    pub fn read_parameters(
        &self,
        id: RequestId,
    ) -> Option<(Priority, DeadlineTime)> {
        let root = match self.arena.get(id)?.command() {
            Command::ReadRequest(data) => return Some((data.priority, data.deadline)),
            Command::Read(data) => data.output,
            _ => return None,
        };

        match self.arena.get(root)?.command() {
            Command::ReadRequest(data) => Some((data.priority, data.deadline)),
            _ => None,
        }
    }

    /// Copies read data into the output of the external read. Returns how many bytes fit.
    pub fn write_read_output(
        &mut self,
        id: RequestId,
        data: &[u8],
    ) -> u64 {
        let (root, output_offset) = match self.arena.get(id).map(|request| request.command()) {
            Some(Command::Read(read)) => (read.output, read.output_offset),
            Some(Command::ReadRequest(_)) => (id, 0),
            _ => return 0,
        };

        let root_data = match self.arena.get_mut(root).map(|request| request.command_mut()) {
            Some(Command::ReadRequest(root_data)) => root_data,
            _ => {
                log::error!("Output of read {} is not an external read", id);
                return 0;
            }
        };

        let buffer = match root_data.output.as_mut() {
            Some(buffer) => buffer,
            None => {
                log::error!("External read {} has no output buffer", root);
                return 0;
            }
        };

        let start = (output_offset as usize).min(buffer.len());
        let end = start.saturating_add(data.len()).min(buffer.len());
        let copied = end - start;
        buffer[start..end].copy_from_slice(&data[..copied]);
        root_data.bytes_read += copied as u64;
        copied as u64
    }

    // Cancels every request of the chain rooted at `target` that hasn't been handed to the stack
    // yet. Returns true if part of the chain is scheduled in the stack.
    pub(crate) fn cancel_pending_requests(
        &mut self,
        target: RequestId,
    ) -> bool {
        let prepared = std::mem::take(&mut self.prepared);
        let (mut canceled, remaining): (Vec<_>, Vec<_>) = prepared
            .into_iter()
            .partition(|id| self.is_in_chain(*id, target));
        self.prepared = remaining;

        let delayed = std::mem::take(&mut self.delayed);
        let (canceled_delayed, remaining): (VecDeque<_>, VecDeque<_>) = delayed
            .into_iter()
            .partition(|id| self.is_in_chain(*id, target));
        self.delayed = remaining;
        canceled.extend(canceled_delayed);

        for id in canceled {
            log::trace!("Canceling pending request {}", id);
            self.complete_request(id, RequestStatus::Canceled);
        }

        self.arena.iter().any(|(id, request)| {
            request.status() == RequestStatus::Scheduled && self.is_in_chain(id, target)
        })
    }

    /// Runs completion callbacks and folds finished children into their parents. Children are
    /// always finalized before their parent. Returns true if anything was finalized.
    pub fn finalize_completed_requests(&mut self) -> bool {
        profiling::scope!("StreamerContext::finalize_completed_requests");
        let mut has_finalized = false;
        while let Some(id) = self.completed.pop_front() {
            let mut request = match self.arena.remove(id) {
                Some(request) => request,
                None => {
                    log::error!("Request {} was marked completed more than once", id);
                    continue;
                }
            };
            has_finalized = true;

            if request.dependencies() > 0 {
                log::error!(
                    "{} request {} completed while {} children are still in flight",
                    request.command().name(),
                    id,
                    request.dependencies()
                );
            }

            if !request.status().is_terminal() {
                log::error!(
                    "{} request {} was marked completed while {:?}",
                    request.command().name(),
                    id,
                    request.status()
                );
                request.set_status(RequestStatus::Failed);
            }

            let status = request.status();
            if let Some(handle) = request.take_external() {
                self.external_lookup.remove(&handle.id());
                match request.command_mut() {
                    Command::ReadRequest(data) => {
                        if status == RequestStatus::Completed && data.bytes_read < data.size {
                            log::warn!(
                                "Read of {} requested {} bytes at offset {} but only {} bytes were read",
                                data.path,
                                data.size,
                                data.offset,
                                data.bytes_read
                            );
                        }
                        handle.publish_read_result(data.output.take(), data.bytes_read);
                    }
                    Command::Report(data) => {
                        handle.publish_report(std::mem::take(&mut data.output));
                    }
                    _ => {}
                }
                handle.publish_status(status);
            }

            if let Some(callback) = request.take_completion_callback() {
                profiling::scope!("completion callback");
                callback(&request);
            }

            if let Some(parent_id) = request.parent() {
                match self.arena.get_mut(parent_id) {
                    Some(parent) => {
                        parent.remove_dependency();
                        if status == RequestStatus::Failed || status == RequestStatus::Canceled {
                            parent.set_status(status);
                        }

                        if parent.dependencies() == 0 {
                            if !parent.status().is_terminal() {
                                parent.set_status(RequestStatus::Completed);
                            }
                            self.completed.push_back(parent_id);
                        }
                    }
                    None => log::error!("Parent {} of request {} no longer exists", parent_id, id),
                }
            }
        }

        has_finalized
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.prepared.is_empty() && self.delayed.is_empty() && self.completed.is_empty()
    }

    pub fn num_live_requests(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ReadRequestData;
    use sluice_base::{RequestBuffer, NO_DEADLINE_TIME};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn add_read(
        context: &mut StreamerContext,
        size: u64,
    ) -> (FileRequestPtr, RequestId) {
        let handle = FileRequestPtr::new(Command::ReadRequest(ReadRequestData {
            path: RequestPath::new("file.bin"),
            offset: 0,
            size,
            deadline: NO_DEADLINE_TIME,
            priority: Priority::MEDIUM,
            output: Some(RequestBuffer::from_vec(vec![0; size as usize])),
            allocator: None,
            bytes_read: 0,
        }));
        let id = context.add_external_request(handle.take_for_queue().unwrap());
        (handle, id)
    }

    #[test]
    fn children_write_into_the_external_buffer() {
        let mut context = StreamerContext::new();
        let (handle, root) = add_read(&mut context, 8);
        let first = context.create_read(root, RequestPath::new("file.bin"), 0, 4, root, 0);
        let second = context.create_read(root, RequestPath::new("file.bin"), 4, 4, root, 4);
        assert_eq!(context.request(root).unwrap().dependencies(), 2);
        assert!(context.has_ancestor(second, root));
        assert!(!context.has_ancestor(root, second));

        assert_eq!(context.write_read_output(second, &[5, 6, 7, 8]), 4);
        assert_eq!(context.write_read_output(first, &[1, 2, 3, 4]), 4);
        context.complete_request(second, RequestStatus::Completed);
        context.complete_request(first, RequestStatus::Completed);
        assert!(context.finalize_completed_requests());

        assert_eq!(handle.status(), RequestStatus::Completed);
        let result = handle.read_result(sluice_base::ClaimMemory::No).unwrap();
        assert_eq!(result.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(context.num_live_requests(), 0);
        assert!(context.find_external_request(&handle).is_none());
    }

    #[test]
    fn output_is_clamped_to_the_buffer() {
        let mut context = StreamerContext::new();
        let (_handle, root) = add_read(&mut context, 4);
        let child = context.create_read(root, RequestPath::new("file.bin"), 2, 8, root, 2);
        assert_eq!(context.write_read_output(child, &[1; 8]), 2);
    }

    #[test]
    fn failed_child_fails_parent() {
        let mut context = StreamerContext::new();
        let (handle, root) = add_read(&mut context, 8);
        let first = context.create_read(root, RequestPath::new("file.bin"), 0, 4, root, 0);
        let second = context.create_read(root, RequestPath::new("file.bin"), 4, 4, root, 4);
        context.complete_request(first, RequestStatus::Failed);
        context.complete_request(second, RequestStatus::Completed);
        context.finalize_completed_requests();
        assert_eq!(handle.status(), RequestStatus::Failed);
    }

    #[test]
    fn children_finalize_before_parent() {
        let mut context = StreamerContext::new();
        let (_handle, root) = add_read(&mut context, 8);
        let order = Arc::new(AtomicUsize::new(0));

        let child = context.create_read(root, RequestPath::new("file.bin"), 0, 8, root, 0);
        let child_order = order.clone();
        context
            .request_mut(child)
            .unwrap()
            .set_completion_callback(move |_| {
                assert_eq!(child_order.fetch_add(1, Ordering::SeqCst), 0);
            });
        let parent_order = order.clone();
        context
            .request_mut(root)
            .unwrap()
            .set_completion_callback(move |request| {
                assert_eq!(request.status(), RequestStatus::Completed);
                assert_eq!(parent_order.fetch_add(1, Ordering::SeqCst), 1);
            });

        context.complete_request(child, RequestStatus::Completed);
        context.finalize_completed_requests();
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_pending_requests_only_touches_the_chain() {
        let mut context = StreamerContext::new();
        let (first_handle, first) = add_read(&mut context, 4);
        let (second_handle, second) = add_read(&mut context, 4);
        context.push_prepared_request(first);
        context.push_prepared_request(second);

        assert!(!context.cancel_pending_requests(first));
        assert_eq!(context.prepared_requests(), &[second]);
        context.finalize_completed_requests();
        assert_eq!(first_handle.status(), RequestStatus::Canceled);
        assert_eq!(second_handle.status(), RequestStatus::Pending);
    }

    #[test]
    fn cancel_pending_requests_reaches_delayed_requests() {
        let mut context = StreamerContext::new();
        let (first_handle, first) = add_read(&mut context, 4);
        let (_second_handle, second) = add_read(&mut context, 4);
        context.delay_request(first);
        context.delay_request(second);

        assert!(!context.cancel_pending_requests(first));
        assert_eq!(context.num_delayed_requests(), 1);
        assert_eq!(context.take_delayed_requests(), vec![second]);
        context.finalize_completed_requests();
        assert_eq!(first_handle.status(), RequestStatus::Canceled);
    }

    #[test]
    fn scheduling_a_child_shows_on_the_handle() {
        let mut context = StreamerContext::new();
        let (handle, root) = add_read(&mut context, 8);
        let child = context.create_read(root, RequestPath::new("file.bin"), 0, 8, root, 0);
        assert_eq!(handle.status(), RequestStatus::Pending);

        context.mark_request_as_scheduled(child);
        assert_eq!(handle.status(), RequestStatus::Scheduled);
        assert_eq!(context.request(root).unwrap().status(), RequestStatus::Scheduled);

        context.complete_request(child, RequestStatus::Completed);
        context.finalize_completed_requests();
        assert_eq!(handle.status(), RequestStatus::Completed);
    }
}
