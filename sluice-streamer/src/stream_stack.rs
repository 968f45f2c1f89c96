use crate::{Command, RequestId, StreamerContext};
use sluice_base::{RequestStatus, Statistic};
use std::time::Instant;

/// Aggregated state of the stack, each entry folds its own state into it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Status {
    // How many more requests the stack can accept right now
    pub num_available_slots: i32,
    pub is_idle: bool,
}

impl Default for Status {
    fn default() -> Self {
        Status {
            num_available_slots: i32::MAX,
            is_idle: true,
        }
    }
}

impl Status {
    pub fn add_slots(
        &mut self,
        num_available_slots: i32,
    ) {
        self.num_available_slots = self.num_available_slots.min(num_available_slots);
    }

    pub fn add_idle(
        &mut self,
        is_idle: bool,
    ) {
        self.is_idle = self.is_idle && is_idle;
    }
}

/// One stage of the stream stack. Every operation is called on the scheduler thread, top of the
/// stack first. Entries forward what they don't handle to the next entry. Requests that reach the
/// bottom of the stack unhandled are completed by `complete_unhandled_request`.
pub trait StreamStackEntry: Send {
    fn name(&self) -> &str;

    fn next(&self) -> Option<&(dyn StreamStackEntry + 'static)>;

    fn next_mut(&mut self) -> Option<&mut (dyn StreamStackEntry + 'static)>;

    fn set_next(
        &mut self,
        next: Option<Box<dyn StreamStackEntry>>,
    );

    // Called once before any request is handed to the stack
    fn set_context(
        &mut self,
        context: &StreamerContext,
    ) {
        if let Some(next) = self.next_mut() {
            next.set_context(context);
        }
    }

    // Gives entries a chance to convert a new request into the internal requests they need.
    // Whatever comes out of the bottom is queued for dispatch.
    fn prepare_request(
        &mut self,
        context: &mut StreamerContext,
        request: RequestId,
    ) {
        match self.next_mut() {
            Some(next) => next.prepare_request(context, request),
            None => context.push_prepared_request(request),
        }
    }

    fn queue_request(
        &mut self,
        context: &mut StreamerContext,
        request: RequestId,
    ) {
        match self.next_mut() {
            Some(next) => next.queue_request(context, request),
            None => complete_unhandled_request(context, request),
        }
    }

    // Returns true if any work was done
    fn execute_requests(
        &mut self,
        context: &mut StreamerContext,
    ) -> bool {
        match self.next_mut() {
            Some(next) => next.execute_requests(context),
            None => false,
        }
    }

    fn update_status(
        &self,
        status: &mut Status,
    ) {
        if let Some(next) = self.next() {
            next.update_status(status);
        }
    }

    // `internal_pending` holds requests queued inside entries above this one, `pending` the
    // requests still waiting in the scheduler
    fn update_completion_estimates(
        &mut self,
        context: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
        pending: &[RequestId],
    ) {
        if let Some(next) = self.next_mut() {
            next.update_completion_estimates(context, now, internal_pending, pending);
        }
    }

    fn collect_statistics(
        &self,
        statistics: &mut Vec<Statistic>,
    ) {
        if let Some(next) = self.next() {
            next.collect_statistics(statistics);
        }
    }
}

/// Completes a request nothing in the stack handled. Control requests succeed, reads fail.
pub fn complete_unhandled_request(
    context: &mut StreamerContext,
    request: RequestId,
) {
    let status = match context.request(request).map(|request| request.command()) {
        Some(Command::Cancel(_))
        | Some(Command::Reschedule(_))
        | Some(Command::Flush(_))
        | Some(Command::FlushAll)
        | Some(Command::Report(_)) => RequestStatus::Completed,
        Some(Command::Custom(custom)) => {
            if custom.fail_when_unhandled {
                log::warn!("Custom request {} wasn't handled by any stack entry", request);
                RequestStatus::Failed
            } else {
                RequestStatus::Completed
            }
        }
        Some(command @ Command::ReadRequest(_)) | Some(command @ Command::Read(_)) => {
            log::warn!(
                "No stack entry could service {:?}, failing request {}",
                command,
                request
            );
            RequestStatus::Failed
        }
        None => {
            log::error!("Unhandled request {} no longer exists", request);
            return;
        }
    };

    context.complete_request(request, status);
}

/// Links the entries so that each one forwards to the one after it. The first entry becomes the
/// top of the stack.
pub fn build_stack(entries: Vec<Box<dyn StreamStackEntry>>) -> Option<Box<dyn StreamStackEntry>> {
    let mut top: Option<Box<dyn StreamStackEntry>> = None;
    for mut entry in entries.into_iter().rev() {
        entry.set_next(top.take());
        top = Some(entry);
    }
    top
}
