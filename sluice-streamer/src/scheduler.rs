use crate::file_request::QueuedRequest;
use crate::streamer_context::StreamerContextShared;
use crate::{Command, RequestId, Status, StreamStackEntry, StreamerContext};
use serde::{Deserialize, Serialize};
use sluice_base::{AllocationError, RequestBuffer, RequestStatus, Statistic};
use std::cmp::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Alignment requested from allocators for read output
pub const READ_ALIGNMENT: usize = 16;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    // How long the scheduler sleeps while the stack is busy but nothing woke it up
    pub busy_wait_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            busy_wait_timeout_ms: 10,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Busy,
    Exit,
}

/// Decides which prepared request goes to the stack next. Returns `Less` if `first` should be
/// dispatched before `second`.
pub fn prioritize_requests(
    context: &StreamerContext,
    first: RequestId,
    second: RequestId,
    now: Instant,
) -> Ordering {
    if first == second {
        return Ordering::Equal;
    }

    let (first_request, second_request) = match (context.request(first), context.request(second))
    {
        (Some(first_request), Some(second_request)) => (first_request, second_request),
        _ => return Ordering::Equal,
    };

    // Control requests go first
    let class_order = second_request
        .command()
        .order_class()
        .cmp(&first_request.command().order_class());
    if class_order != Ordering::Equal {
        return class_order;
    }

    let (first_priority, first_deadline, second_priority, second_deadline) =
        match (context.read_parameters(first), context.read_parameters(second)) {
            (Some((first_priority, first_deadline)), Some((second_priority, second_deadline))) => {
                (first_priority, first_deadline, second_priority, second_deadline)
            }
            _ => return Ordering::Equal,
        };

    // Requests past their deadline are all equally urgent
    if first_deadline.has_passed(now) && second_deadline.has_passed(now) {
        return Ordering::Equal;
    }

    // Keep reads from the same file in arrival order
    if first_request.command().path() == second_request.command().path() {
        return Ordering::Equal;
    }

    second_priority
        .cmp(&first_priority)
        .then_with(|| first_deadline.cmp(&second_deadline))
        .then_with(|| {
            match (
                first_request.estimated_completion(),
                second_request.estimated_completion(),
            ) {
                (Some(first_estimate), Some(second_estimate)) => first_estimate.cmp(&second_estimate),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
}

enum PrepareResult {
    Ready,
    Delayed,
    Failed,
}

/// Runs on a dedicated thread and owns the request context and the stream stack
pub struct Scheduler {
    context: StreamerContext,
    stack: Box<dyn StreamStackEntry>,
    config: SchedulerConfig,
    processed_requests: u64,
}

impl Scheduler {
    pub fn new(
        mut stack: Box<dyn StreamStackEntry>,
        config: SchedulerConfig,
    ) -> Self {
        let context = StreamerContext::new();
        stack.set_context(&context);
        Scheduler {
            context,
            stack,
            config,
            processed_requests: 0,
        }
    }

    pub(crate) fn shared(&self) -> Arc<StreamerContextShared> {
        self.context.shared().clone()
    }

    pub(crate) fn start_thread(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("Streamer".into())
            .spawn(move || self.thread_main_loop())
    }

    fn thread_main_loop(mut self) {
        profiling::register_thread!("Streamer");
        log::info!("Streamer scheduler thread started");
        let busy_wait_timeout = Duration::from_millis(self.config.busy_wait_timeout_ms);
        loop {
            match self.thread_process_till_idle() {
                SchedulerState::Exit => break,
                SchedulerState::Idle => self.context.shared().wait_for_wake(None),
                SchedulerState::Busy => self
                    .context
                    .shared()
                    .wait_for_wake(Some(busy_wait_timeout)),
            }
        }
        log::info!(
            "Streamer scheduler thread finished after processing {} requests",
            self.processed_requests
        );
    }

    fn thread_process_till_idle(&mut self) -> SchedulerState {
        loop {
            profiling::scope!("Scheduler::thread_process_till_idle");
            let submissions = self.context.shared().drain_submissions();
            let mut has_worked = !submissions.requests.is_empty();
            for queued in submissions.requests {
                self.thread_process_new_request(queued);
            }

            has_worked |= self.thread_process_delayed_requests(submissions.shutdown);

            if !submissions.suspended {
                has_worked |= self.thread_dispatch_requests();
            }

            has_worked |= self.context.finalize_completed_requests();
            if has_worked {
                continue;
            }

            let mut status = Status::default();
            self.stack.update_status(&mut status);
            self.thread_publish_statistics(&status, submissions.suspended);

            if submissions.shutdown && status.is_idle && self.context.is_drained() {
                return SchedulerState::Exit;
            }

            if status.is_idle && self.context.num_delayed_requests() == 0 {
                return SchedulerState::Idle;
            }

            return SchedulerState::Busy;
        }
    }

    fn thread_process_new_request(
        &mut self,
        queued: QueuedRequest,
    ) {
        self.processed_requests += 1;
        log::trace!("New {:?}", queued.command);
        let id = self.context.add_external_request(queued);
        match self.context.request(id).map(|request| request.command()) {
            // Cancel and reschedule take effect immediately, even while suspended
            Some(Command::Cancel(_)) => self.thread_process_cancel(id),
            Some(Command::Reschedule(_)) => self.thread_process_reschedule(id),
            Some(_) => self.thread_prepare_request(id),
            None => {}
        }
    }

    fn thread_prepare_request(
        &mut self,
        id: RequestId,
    ) {
        match self.thread_allocate_output(id) {
            PrepareResult::Ready => self.stack.prepare_request(&mut self.context, id),
            PrepareResult::Delayed => self.context.delay_request(id),
            PrepareResult::Failed => self.context.complete_request(id, RequestStatus::Failed),
        }
    }

    // Reads that use an allocator get their output memory before entering the stack
    fn thread_allocate_output(
        &mut self,
        id: RequestId,
    ) -> PrepareResult {
        let data = match self
            .context
            .request_mut(id)
            .map(|request| request.command_mut())
        {
            Some(Command::ReadRequest(data)) => data,
            _ => return PrepareResult::Ready,
        };

        if data.output.is_some() {
            return PrepareResult::Ready;
        }

        let allocator = match &data.allocator {
            Some(allocator) => allocator.clone(),
            None => {
                log::error!("Read of {} has neither a buffer nor an allocator", data.path);
                return PrepareResult::Failed;
            }
        };

        match allocator.allocate(data.size, data.size, READ_ALIGNMENT) {
            Ok(allocation) => {
                if (allocation.buffer.len() as u64) < data.size {
                    log::error!(
                        "Allocator returned {} bytes for a read of {} bytes from {}",
                        allocation.buffer.len(),
                        data.size,
                        data.path
                    );
                    allocator.release(allocation.buffer);
                    return PrepareResult::Failed;
                }
                data.output = Some(RequestBuffer::from_allocation(allocation, allocator));
                PrepareResult::Ready
            }
            Err(AllocationError::Busy) => {
                log::trace!("Allocator busy, delaying read of {}", data.path);
                PrepareResult::Delayed
            }
            Err(AllocationError::OutOfMemory) => {
                log::error!(
                    "Unable to allocate {} bytes for reading {}",
                    data.size,
                    data.path
                );
                PrepareResult::Failed
            }
        }
    }

    fn thread_process_delayed_requests(
        &mut self,
        is_shutting_down: bool,
    ) -> bool {
        let delayed = self.context.take_delayed_requests();
        if delayed.is_empty() {
            return false;
        }

        let delayed_count = delayed.len();
        for id in delayed {
            self.thread_prepare_request(id);
        }

        let still_delayed = self.context.take_delayed_requests();
        if is_shutting_down {
            for id in &still_delayed {
                log::warn!("Failing delayed request {} because the streamer is shutting down", id);
                self.context.complete_request(*id, RequestStatus::Failed);
            }
            return true;
        }

        let has_progressed = still_delayed.len() < delayed_count;
        for id in still_delayed {
            self.context.delay_request(id);
        }
        has_progressed
    }

    fn thread_process_cancel(
        &mut self,
        cancel_id: RequestId,
    ) {
        let target = match self
            .context
            .request(cancel_id)
            .map(|request| request.command())
        {
            Some(Command::Cancel(data)) => data.target.clone(),
            _ => return,
        };

        let target_id = match self.context.find_external_request(&target) {
            Some(target_id) => target_id,
            None => {
                // Already finalized or never queued
                log::trace!("Nothing to cancel for {:?}", target);
                self.context
                    .complete_request(cancel_id, RequestStatus::Completed);
                return;
            }
        };

        let is_terminal = self
            .context
            .request(target_id)
            .map(|request| request.status().is_terminal())
            .unwrap_or(true);
        if is_terminal {
            self.context
                .complete_request(cancel_id, RequestStatus::Completed);
            return;
        }

        if self.context.cancel_pending_requests(target_id) {
            // Entries holding parts of the target cancel them when the cancel passes through.
            // Doesn't wait for a free slot, the stack may be saturated by the target itself.
            self.context.mark_request_as_scheduled(cancel_id);
            self.stack.queue_request(&mut self.context, cancel_id);
        } else {
            self.context
                .complete_request(cancel_id, RequestStatus::Completed);
        }
    }

    fn thread_process_reschedule(
        &mut self,
        reschedule_id: RequestId,
    ) {
        let (target, deadline, priority) = match self
            .context
            .request(reschedule_id)
            .map(|request| request.command())
        {
            Some(Command::Reschedule(data)) => (data.target.clone(), data.deadline, data.priority),
            _ => return,
        };

        if let Some(target_id) = self.context.find_external_request(&target) {
            if let Some(request) = self.context.request_mut(target_id) {
                if !request.status().is_terminal() {
                    if let Command::ReadRequest(data) = request.command_mut() {
                        log::trace!(
                            "Rescheduling read of {} to {:?} {:?}",
                            data.path,
                            priority,
                            deadline
                        );
                        data.deadline = deadline;
                        data.priority = priority;
                    }
                }
            }
        }

        self.context
            .complete_request(reschedule_id, RequestStatus::Completed);
    }

    fn thread_dispatch_requests(&mut self) -> bool {
        profiling::scope!("Scheduler::thread_dispatch_requests");
        let mut has_worked = false;
        let now = Instant::now();
        if !self.context.prepared_requests().is_empty() {
            self.thread_update_completion_estimates(now);
        }

        loop {
            let index = match self.thread_select_next_request(now) {
                Some(index) => index,
                None => break,
            };

            // Control requests don't occupy a slot. They are always selected before reads.
            let is_read = self
                .context
                .request(self.context.prepared_requests()[index])
                .map_or(false, |request| request.command().is_read());
            if is_read {
                let mut status = Status::default();
                self.stack.update_status(&mut status);
                if status.num_available_slots <= 0 {
                    break;
                }
            }

            let id = self.context.take_prepared_request(index);
            self.context.mark_request_as_scheduled(id);
            self.stack.queue_request(&mut self.context, id);
            has_worked = true;
        }

        has_worked |= self.stack.execute_requests(&mut self.context);
        has_worked
    }

    // Linear scan instead of a sort, the ordering isn't a total order. Earlier requests win ties.
    fn thread_select_next_request(
        &self,
        now: Instant,
    ) -> Option<usize> {
        let prepared = self.context.prepared_requests();
        if prepared.is_empty() {
            return None;
        }

        let mut best = 0;
        for index in 1..prepared.len() {
            if prioritize_requests(&self.context, prepared[best], prepared[index], now)
                == Ordering::Greater
            {
                best = index;
            }
        }
        Some(best)
    }

    fn thread_update_completion_estimates(
        &mut self,
        now: Instant,
    ) {
        profiling::scope!("Scheduler::thread_update_completion_estimates");
        let pending = self.context.prepared_requests().to_vec();
        let mut internal_pending = Vec::default();
        self.stack.update_completion_estimates(
            &mut self.context,
            now,
            &mut internal_pending,
            &pending,
        );

        // A parent can't complete before its last child does
        for id in pending.into_iter().chain(internal_pending) {
            let estimate = match self
                .context
                .request(id)
                .and_then(|request| request.estimated_completion())
            {
                Some(estimate) => estimate,
                None => continue,
            };

            let mut current = self.context.request(id).and_then(|request| request.parent());
            while let Some(parent_id) = current {
                let parent = match self.context.request_mut(parent_id) {
                    Some(parent) => parent,
                    None => break,
                };
                let later = parent
                    .estimated_completion()
                    .map_or(true, |parent_estimate| parent_estimate < estimate);
                if later {
                    parent.set_estimated_completion(estimate);
                }
                current = parent.parent();
            }
        }
    }

    fn thread_publish_statistics(
        &self,
        status: &Status,
        is_suspended: bool,
    ) {
        let mut statistics = vec![
            Statistic::integer(
                "Scheduler",
                "Live requests",
                self.context.num_live_requests() as i64,
            ),
            Statistic::integer(
                "Scheduler",
                "Prepared requests",
                self.context.prepared_requests().len() as i64,
            ),
            Statistic::integer(
                "Scheduler",
                "Delayed requests",
                self.context.num_delayed_requests() as i64,
            ),
            Statistic::integer(
                "Scheduler",
                "Processed requests",
                self.processed_requests as i64,
            ),
            Statistic::boolean("Scheduler", "Is idle", status.is_idle),
            Statistic::boolean("Scheduler", "Is suspended", is_suspended),
        ];
        self.stack.collect_statistics(&mut statistics);
        self.context.shared().set_statistics(statistics);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{FileRequestPtr, ReadRequestData};
    use sluice_base::{Deadline, Priority, RequestPath, NO_DEADLINE_TIME};

    fn add_read(
        context: &mut StreamerContext,
        path: &str,
        priority: Priority,
        deadline: sluice_base::DeadlineTime,
    ) -> RequestId {
        let handle = FileRequestPtr::new(Command::ReadRequest(ReadRequestData {
            path: RequestPath::new(path),
            offset: 0,
            size: 8,
            deadline,
            priority,
            output: Some(RequestBuffer::from_vec(vec![0; 8])),
            allocator: None,
            bytes_read: 0,
        }));
        context.add_external_request(handle.take_for_queue().unwrap())
    }

    #[test]
    fn same_request_is_equal() {
        let mut context = StreamerContext::new();
        let now = Instant::now();
        let read = add_read(&mut context, "a", Priority::HIGH, NO_DEADLINE_TIME);
        assert_eq!(
            prioritize_requests(&context, read, read, now),
            Ordering::Equal
        );
    }

    #[test]
    fn passed_deadlines_are_equal() {
        let mut context = StreamerContext::new();
        let past = Deadline::NOW.resolve(Instant::now());
        let now = Instant::now();
        let first = add_read(&mut context, "a", Priority::LOW, past);
        let second = add_read(&mut context, "b", Priority::HIGHEST, past);
        assert_eq!(
            prioritize_requests(&context, first, second, now),
            Ordering::Equal
        );
    }

    #[test]
    fn same_file_is_equal() {
        let mut context = StreamerContext::new();
        let now = Instant::now();
        let first = add_read(&mut context, "a", Priority::LOW, NO_DEADLINE_TIME);
        let second = add_read(&mut context, "./a", Priority::HIGHEST, NO_DEADLINE_TIME);
        assert_eq!(
            prioritize_requests(&context, first, second, now),
            Ordering::Equal
        );
    }

    #[test]
    fn higher_priority_goes_first() {
        let mut context = StreamerContext::new();
        let now = Instant::now();
        let low = add_read(&mut context, "a", Priority::LOW, NO_DEADLINE_TIME);
        let high = add_read(&mut context, "b", Priority::HIGH, NO_DEADLINE_TIME);
        assert_eq!(
            prioritize_requests(&context, high, low, now),
            Ordering::Less
        );
        assert_eq!(
            prioritize_requests(&context, low, high, now),
            Ordering::Greater
        );
    }

    #[test]
    fn earlier_deadline_goes_first() {
        let mut context = StreamerContext::new();
        let now = Instant::now();
        let soon = Deadline::from_duration(Duration::from_secs(10)).resolve(now);
        let later = Deadline::from_duration(Duration::from_secs(20)).resolve(now);
        let first = add_read(&mut context, "a", Priority::MEDIUM, later);
        let second = add_read(&mut context, "b", Priority::MEDIUM, soon);
        let third = add_read(&mut context, "c", Priority::MEDIUM, NO_DEADLINE_TIME);
        assert_eq!(
            prioritize_requests(&context, second, first, now),
            Ordering::Less
        );
        assert_eq!(
            prioritize_requests(&context, first, third, now),
            Ordering::Less
        );
    }

    #[test]
    fn control_requests_go_before_reads() {
        let mut context = StreamerContext::new();
        let now = Instant::now();
        let read = add_read(&mut context, "a", Priority::HIGHEST, NO_DEADLINE_TIME);
        let flush = context.get_new_internal_request(None, Command::FlushAll);
        assert_eq!(
            prioritize_requests(&context, flush, read, now),
            Ordering::Less
        );
        assert_eq!(
            prioritize_requests(&context, read, flush, now),
            Ordering::Greater
        );
    }
}
