use crate::{complete_unhandled_request, Command, RequestId, StreamStackEntry, StreamerContext};
use serde::{Deserialize, Serialize};
use sluice_base::{ReportType, RequestStatus, Statistic};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReadSplitterConfig {
    pub max_read_size: u64,
}

impl Default for ReadSplitterConfig {
    fn default() -> Self {
        ReadSplitterConfig {
            max_read_size: 1024 * 1024,
        }
    }
}

/// Breaks large reads into reads of at most `max_read_size` bytes so entries further down can
/// interleave them with other work
pub struct ReadSplitter {
    name: String,
    next: Option<Box<dyn StreamStackEntry>>,
    max_read_size: u64,
    split_reads: u64,
    created_reads: u64,
}

impl ReadSplitter {
    pub fn new(config: ReadSplitterConfig) -> Self {
        ReadSplitter {
            name: "Read splitter".to_string(),
            next: None,
            max_read_size: config.max_read_size.max(1),
            split_reads: 0,
            created_reads: 0,
        }
    }
}

impl StreamStackEntry for ReadSplitter {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Option<&(dyn StreamStackEntry + 'static)> {
        self.next.as_deref()
    }

    fn next_mut(&mut self) -> Option<&mut (dyn StreamStackEntry + 'static)> {
        self.next.as_deref_mut()
    }

    fn set_next(
        &mut self,
        next: Option<Box<dyn StreamStackEntry>>,
    ) {
        self.next = next;
    }

    fn queue_request(
        &mut self,
        context: &mut StreamerContext,
        request: RequestId,
    ) {
        let next = match self.next.as_deref_mut() {
            Some(next) => next,
            None => {
                complete_unhandled_request(context, request);
                return;
            }
        };

        let read = match context.request(request).map(|request| request.command()) {
            Some(Command::Read(read)) if read.size > self.max_read_size => read.clone(),
            Some(Command::Report(report)) if report.report_type == ReportType::Config => {
                let statistic =
                    Statistic::byte_size(&self.name, "Max read size", self.max_read_size);
                if let Some(Command::Report(report)) = context
                    .request_mut(request)
                    .map(|request| request.command_mut())
                {
                    report.output.push(statistic);
                }
                next.queue_request(context, request);
                return;
            }
            _ => {
                next.queue_request(context, request);
                return;
            }
        };

        log::trace!(
            "Splitting read of {} bytes from {} into parts of {} bytes",
            read.size,
            read.path,
            self.max_read_size
        );
        self.split_reads += 1;

        let mut offset = 0;
        while offset < read.size {
            let size = self.max_read_size.min(read.size - offset);
            let child = context.create_read(
                request,
                read.path.clone(),
                read.offset + offset,
                size,
                read.output,
                read.output_offset + offset,
            );
            if let Some(child) = context.request_mut(child) {
                child.set_status(RequestStatus::Scheduled);
            }
            self.created_reads += 1;
            next.queue_request(context, child);
            offset += size;
        }
    }

    fn collect_statistics(
        &self,
        statistics: &mut Vec<Statistic>,
    ) {
        statistics.push(Statistic::integer(
            &self.name,
            "Split reads",
            self.split_reads as i64,
        ));
        statistics.push(Statistic::integer(
            &self.name,
            "Created reads",
            self.created_reads as i64,
        ));
        if let Some(next) = self.next.as_deref() {
            next.collect_statistics(statistics);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{build_stack, ReadData};
    use sluice_base::RequestPath;
    use std::sync::{Arc, Mutex};

    // Records the reads that reach it
    struct RecordingEntry {
        reads: Arc<Mutex<Vec<(u64, u64, u64)>>>,
        next: Option<Box<dyn StreamStackEntry>>,
    }

    impl StreamStackEntry for RecordingEntry {
        fn name(&self) -> &str {
            "Recording"
        }

        fn next(&self) -> Option<&(dyn StreamStackEntry + 'static)> {
            self.next.as_deref()
        }

        fn next_mut(&mut self) -> Option<&mut (dyn StreamStackEntry + 'static)> {
            self.next.as_deref_mut()
        }

        fn set_next(
            &mut self,
            next: Option<Box<dyn StreamStackEntry>>,
        ) {
            self.next = next;
        }

        fn queue_request(
            &mut self,
            context: &mut StreamerContext,
            request: RequestId,
        ) {
            if let Some(Command::Read(read)) = context.request(request).map(|r| r.command()) {
                self.reads
                    .lock()
                    .unwrap()
                    .push((read.offset, read.size, read.output_offset));
            }
            context.complete_request(request, RequestStatus::Completed);
        }
    }

    #[test]
    fn large_reads_are_split() {
        let reads = Arc::new(Mutex::new(Vec::default()));
        let mut stack = build_stack(vec![
            Box::new(ReadSplitter::new(ReadSplitterConfig { max_read_size: 4 })),
            Box::new(RecordingEntry {
                reads: reads.clone(),
                next: None,
            }),
        ])
        .unwrap();

        let mut context = StreamerContext::new();
        let root = context.get_new_internal_request(None, Command::FlushAll);
        let read = context.get_new_internal_request(
            Some(root),
            Command::Read(ReadData {
                path: RequestPath::new("file.bin"),
                offset: 100,
                size: 10,
                output: root,
                output_offset: 2,
            }),
        );
        stack.queue_request(&mut context, read);

        assert_eq!(
            *reads.lock().unwrap(),
            vec![(100, 4, 2), (104, 4, 6), (108, 2, 10)]
        );
        assert_eq!(context.request(read).unwrap().dependencies(), 3);

        // The split read completes with its parts
        context.finalize_completed_requests();
        assert!(context.request(read).is_none());
        assert!(context.request(root).is_none());
    }

    #[test]
    fn small_reads_pass_through() {
        let reads = Arc::new(Mutex::new(Vec::default()));
        let mut stack = build_stack(vec![
            Box::new(ReadSplitter::new(ReadSplitterConfig { max_read_size: 16 })),
            Box::new(RecordingEntry {
                reads: reads.clone(),
                next: None,
            }),
        ])
        .unwrap();

        let mut context = StreamerContext::new();
        let root = context.get_new_internal_request(None, Command::FlushAll);
        let read = context.get_new_internal_request(
            Some(root),
            Command::Read(ReadData {
                path: RequestPath::new("file.bin"),
                offset: 0,
                size: 16,
                output: root,
                output_offset: 0,
            }),
        );
        stack.queue_request(&mut context, read);
        assert_eq!(*reads.lock().unwrap(), vec![(0, 16, 0)]);
    }
}
