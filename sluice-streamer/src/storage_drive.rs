use crate::{
    complete_unhandled_request, Command, RequestId, Status, StreamStackEntry, StreamerContext,
    StreamerContextLink,
};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use sluice_base::hashing::HashMap;
use sluice_base::lru_cache::LruCache;
use sluice_base::{AverageWindow, ReportType, RequestPath, RequestStatus, Statistic};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Used for estimates until the first reads finished
const DEFAULT_BYTES_PER_MICROSECOND: u64 = 100;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StorageDriveConfig {
    pub max_file_handles: u32,
    pub io_threads: usize,
    // Extra requests accepted beyond the number of threads so the next read is ready to go
    pub overcommit: i32,
    // Only files under these directories are read by this drive. Empty means every file.
    pub drive_paths: Vec<PathBuf>,
}

impl Default for StorageDriveConfig {
    fn default() -> Self {
        StorageDriveConfig {
            max_file_handles: 32,
            io_threads: 4,
            overcommit: 0,
            drive_paths: Vec::default(),
        }
    }
}

struct StorageDriveIORead {
    request: RequestId,
    path: RequestPath,
    file: Arc<Mutex<File>>,
    offset: u64,
    size: u64,
}

struct StorageDriveIOResult {
    request: RequestId,
    path: RequestPath,
    result: std::io::Result<Vec<u8>>,
    read_duration: Duration,
}

// Reads up to `size` bytes, fewer if the file ends first
fn read_file_range(
    file: &Mutex<File>,
    offset: u64,
    size: u64,
) -> std::io::Result<Vec<u8>> {
    let mut file = match file.lock() {
        Ok(file) => file,
        Err(poisoned) => poisoned.into_inner(),
    };
    file.seek(SeekFrom::Start(offset))?;
    let mut data = Vec::with_capacity(size as usize);
    {
        profiling::scope!("std::fs::File::read_to_end");
        (&mut *file).take(size).read_to_end(&mut data)?;
    }
    Ok(data)
}

// Thread that tries to take jobs out of the request channel and ends when the finish channel is signalled
struct StorageDriveWorkerThread {
    finish_tx: Sender<()>,
    join_handle: JoinHandle<()>,
}

impl StorageDriveWorkerThread {
    fn new(
        request_rx: Receiver<StorageDriveIORead>,
        result_tx: Sender<StorageDriveIOResult>,
        context_link: StreamerContextLink,
        active_request_count: Arc<AtomicUsize>,
        thread_index: usize,
    ) -> std::io::Result<Self> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let join_handle = std::thread::Builder::new()
            .name("IO Thread".into())
            .spawn(move || {
                profiling::register_thread!(&format!("StorageDriveWorkerThread {}", thread_index));
                loop {
                    crossbeam_channel::select! {
                        recv(request_rx) -> msg => {
                            let read = match msg {
                                Ok(read) => read,
                                Err(_) => return,
                            };

                            profiling::scope!("StorageDriveIORead");
                            log::trace!("Start read {} offset {} size {}", read.path, read.offset, read.size);
                            let start = Instant::now();
                            let result = read_file_range(&read.file, read.offset, read.size);
                            let _ = result_tx.send(StorageDriveIOResult {
                                request: read.request,
                                path: read.path,
                                result,
                                read_duration: start.elapsed(),
                            });
                            active_request_count.fetch_sub(1, Ordering::Release);
                            context_link.wake_up_scheduling_thread();
                        },
                        recv(finish_rx) -> _msg => {
                            return;
                        }
                    }
                }
            })?;

        Ok(StorageDriveWorkerThread {
            finish_tx,
            join_handle,
        })
    }
}

// Spans N threads, proxies messages to/from them, and kills the threads when finished
struct StorageDriveThreadPool {
    worker_threads: Vec<StorageDriveWorkerThread>,
    request_tx: Sender<StorageDriveIORead>,
    active_request_count: Arc<AtomicUsize>,
}

impl StorageDriveThreadPool {
    fn new(
        io_threads: usize,
        result_tx: Sender<StorageDriveIOResult>,
        context_link: StreamerContextLink,
    ) -> std::io::Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<StorageDriveIORead>();
        let active_request_count = Arc::new(AtomicUsize::new(0));

        let mut worker_threads = Vec::with_capacity(io_threads);
        for thread_index in 0..io_threads {
            let worker = StorageDriveWorkerThread::new(
                request_rx.clone(),
                result_tx.clone(),
                context_link.clone(),
                active_request_count.clone(),
                thread_index,
            )?;
            worker_threads.push(worker);
        }

        Ok(StorageDriveThreadPool {
            request_tx,
            worker_threads,
            active_request_count,
        })
    }

    fn add_request(
        &self,
        request: StorageDriveIORead,
    ) {
        self.active_request_count.fetch_add(1, Ordering::Release);
        if self.request_tx.send(request).is_err() {
            log::error!("Storage drive worker threads are gone");
        }
    }

    fn active_request_count(&self) -> usize {
        self.active_request_count.load(Ordering::Acquire)
    }

    fn finish(self) {
        for worker_thread in &self.worker_threads {
            let _ = worker_thread.finish_tx.send(());
        }

        for worker_thread in self.worker_threads {
            if worker_thread.join_handle.join().is_err() {
                log::error!("Storage drive worker thread panicked");
            }
        }
    }
}

struct ActiveRead {
    start: Instant,
    size: u64,
}

/// Bottom of a typical stack. Reads files with a pool of blocking I/O threads and keeps a
/// limited number of file handles open.
pub struct StorageDrive {
    name: String,
    next: Option<Box<dyn StreamStackEntry>>,
    config: StorageDriveConfig,
    thread_pool: Option<StorageDriveThreadPool>,
    result_tx: Sender<StorageDriveIOResult>,
    result_rx: Receiver<StorageDriveIOResult>,
    file_handles: LruCache<RequestPath, Arc<Mutex<File>>>,
    pending_reads: VecDeque<RequestId>,
    active_reads: HashMap<RequestId, ActiveRead>,
    read_size_average: AverageWindow<64>,
    read_time_average: AverageWindow<64>,
    file_open_time_average: AverageWindow<64>,
    completed_reads: u64,
    failed_reads: u64,
}

impl StorageDrive {
    pub fn new(mut config: StorageDriveConfig) -> Self {
        config.io_threads = config.io_threads.max(1);
        config.max_file_handles = config.max_file_handles.max(2);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        StorageDrive {
            name: "Storage drive".to_string(),
            next: None,
            file_handles: LruCache::new(config.max_file_handles),
            config,
            thread_pool: None,
            result_tx,
            result_rx,
            pending_reads: VecDeque::default(),
            active_reads: HashMap::default(),
            read_size_average: AverageWindow::default(),
            read_time_average: AverageWindow::default(),
            file_open_time_average: AverageWindow::default(),
            completed_reads: 0,
            failed_reads: 0,
        }
    }

    pub fn config(&self) -> &StorageDriveConfig {
        &self.config
    }

    fn is_serviced(
        &self,
        path: &RequestPath,
    ) -> bool {
        self.config.drive_paths.is_empty()
            || self
                .config
                .drive_paths
                .iter()
                .any(|drive_path| path.starts_with(drive_path))
    }

    fn open_file(
        &mut self,
        path: &RequestPath,
    ) -> std::io::Result<Arc<Mutex<File>>> {
        if let Some(file) = self.file_handles.get(path) {
            return Ok(file.clone());
        }

        profiling::scope!("StorageDrive::open_file");
        let start = Instant::now();
        let file = Arc::new(Mutex::new(File::open(path.path())?));
        self.file_open_time_average.push_duration(start.elapsed());

        // In-flight reads keep their own reference, the file closes once they are done
        if let Some((evicted, _)) = self.file_handles.insert(path.clone(), file.clone()) {
            log::trace!("Closing file handle for {}", evicted);
        }
        Ok(file)
    }

    fn start_read(
        &mut self,
        context: &mut StreamerContext,
        request: RequestId,
    ) {
        let (path, offset, size) = match context.request(request).map(|request| request.command()) {
            Some(Command::Read(read)) => (read.path.clone(), read.offset, read.size),
            _ => {
                log::error!("Storage drive can only start reads, got request {}", request);
                return;
            }
        };

        let file = match self.open_file(&path) {
            Ok(file) => file,
            Err(error) => {
                log::error!("Failed to open {}: {}", path, error);
                self.failed_reads += 1;
                context.complete_request(request, RequestStatus::Failed);
                return;
            }
        };

        let thread_pool = match &self.thread_pool {
            Some(thread_pool) => thread_pool,
            None => {
                log::error!("Storage drive received a read before it was given a context");
                context.complete_request(request, RequestStatus::Failed);
                return;
            }
        };

        self.active_reads.insert(
            request,
            ActiveRead {
                start: Instant::now(),
                size,
            },
        );
        thread_pool.add_request(StorageDriveIORead {
            request,
            path,
            file,
            offset,
            size,
        });
    }

    fn finalize_reads(
        &mut self,
        context: &mut StreamerContext,
    ) -> bool {
        let mut has_finalized = false;
        while let Ok(result) = self.result_rx.try_recv() {
            has_finalized = true;
            let active_read = self.active_reads.remove(&result.request);
            match result.result {
                Ok(data) => {
                    context.write_read_output(result.request, &data);
                    self.read_size_average.push_entry(data.len() as u64);
                    self.read_time_average.push_duration(result.read_duration);
                    if let Some(active_read) = active_read {
                        if (data.len() as u64) < active_read.size {
                            log::debug!(
                                "Only {} of {} bytes available in {}",
                                data.len(),
                                active_read.size,
                                result.path
                            );
                        }
                    }
                    self.completed_reads += 1;
                    context.complete_request(result.request, RequestStatus::Completed);
                }
                Err(error) => {
                    log::error!("Failed to read {}: {}", result.path, error);
                    self.failed_reads += 1;
                    context.complete_request(result.request, RequestStatus::Failed);
                }
            }
        }

        has_finalized
    }

    fn cancel_pending_reads(
        &mut self,
        context: &mut StreamerContext,
        target: RequestId,
    ) {
        let pending_reads = std::mem::take(&mut self.pending_reads);
        for request in pending_reads {
            if context.is_in_chain(request, target) {
                log::trace!("Canceling queued read {}", request);
                context.complete_request(request, RequestStatus::Canceled);
            } else {
                self.pending_reads.push_back(request);
            }
        }
    }

    fn flush_cache(
        &mut self,
        path: &RequestPath,
    ) {
        if self.file_handles.remove(path).is_some() {
            log::debug!("Closed file handle for {}", path);
        }
    }

    fn flush_entire_cache(&mut self) {
        let closed = self.file_handles.clear();
        log::debug!("Closed {} file handles", closed.len());
    }

    fn report(
        &self,
        report_type: ReportType,
    ) -> Vec<Statistic> {
        match report_type {
            ReportType::Config => {
                let drive_paths: Vec<String> = self
                    .config
                    .drive_paths
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect();
                vec![
                    Statistic::integer(
                        &self.name,
                        "Max file handles",
                        self.config.max_file_handles as i64,
                    ),
                    Statistic::integer(&self.name, "IO threads", self.config.io_threads as i64),
                    Statistic::integer(&self.name, "Overcommit", self.config.overcommit as i64),
                    Statistic::text(&self.name, "Drive paths", drive_paths.join(", ")),
                    Statistic::text(
                        &self.name,
                        "Next entry",
                        self.next
                            .as_ref()
                            .map_or_else(|| "<none>".to_string(), |next| next.name().to_string()),
                    ),
                ]
            }
            ReportType::FileLocks => self
                .file_handles
                .iter()
                .map(|(path, _)| Statistic::text(&self.name, "File lock", path.to_string()))
                .collect(),
        }
    }

    fn estimate_read_duration(
        &self,
        size: u64,
    ) -> Duration {
        let total_bytes = self.read_size_average.total();
        let total_micros = self.read_time_average.total();
        if total_bytes == 0 {
            return Duration::from_micros(size / DEFAULT_BYTES_PER_MICROSECOND);
        }

        let micros = size as u128 * total_micros as u128 / total_bytes as u128;
        Duration::from_micros(micros.min(u64::MAX as u128) as u64)
    }
}

impl StreamStackEntry for StorageDrive {
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

    fn set_context(
        &mut self,
        context: &StreamerContext,
    ) {
        match StorageDriveThreadPool::new(
            self.config.io_threads,
            self.result_tx.clone(),
            context.link(),
        ) {
            Ok(thread_pool) => self.thread_pool = Some(thread_pool),
            Err(error) => log::error!("Failed to start storage drive threads: {}", error),
        }

        if let Some(next) = self.next.as_deref_mut() {
            next.set_context(context);
        }
    }

    fn prepare_request(
        &mut self,
        context: &mut StreamerContext,
        request: RequestId,
    ) {
        let read = match context.request(request).map(|request| request.command()) {
            Some(Command::ReadRequest(data)) if self.is_serviced(&data.path) => {
                Some((data.path.clone(), data.offset, data.size))
            }
            _ => None,
        };

        match read {
            Some((path, offset, size)) => {
                let child = context.create_read(request, path, offset, size, request, 0);
                context.push_prepared_request(child);
            }
            None => match self.next.as_deref_mut() {
                Some(next) => next.prepare_request(context, request),
                None => context.push_prepared_request(request),
            },
        }
    }

    fn queue_request(
        &mut self,
        context: &mut StreamerContext,
        request: RequestId,
    ) {
        enum Action {
            Read,
            Cancel(RequestId),
            Flush(RequestPath),
            FlushAll,
            Report(ReportType),
            Forward,
        }

        let action = match context.request(request).map(|request| request.command()) {
            Some(Command::Read(read)) if self.is_serviced(&read.path) => Action::Read,
            Some(Command::Cancel(cancel)) => match context.find_external_request(&cancel.target) {
                Some(target) => Action::Cancel(target),
                None => Action::Forward,
            },
            Some(Command::Flush(flush)) => Action::Flush(flush.path.clone()),
            Some(Command::FlushAll) => Action::FlushAll,
            Some(Command::Report(report)) => Action::Report(report.report_type),
            _ => Action::Forward,
        };

        match action {
            Action::Read => {
                self.pending_reads.push_back(request);
                return;
            }
            Action::Cancel(target) => self.cancel_pending_reads(context, target),
            Action::Flush(path) => self.flush_cache(&path),
            Action::FlushAll => self.flush_entire_cache(),
            Action::Report(report_type) => {
                let statistics = self.report(report_type);
                if let Some(Command::Report(report)) = context
                    .request_mut(request)
                    .map(|request| request.command_mut())
                {
                    report.output.extend(statistics);
                }
            }
            Action::Forward => {}
        }

        match self.next.as_deref_mut() {
            Some(next) => next.queue_request(context, request),
            None => complete_unhandled_request(context, request),
        }
    }

    fn execute_requests(
        &mut self,
        context: &mut StreamerContext,
    ) -> bool {
        profiling::scope!("StorageDrive::execute_requests");
        let mut has_worked = self.finalize_reads(context);
        while self.active_reads.len() < self.config.io_threads {
            match self.pending_reads.pop_front() {
                Some(request) => {
                    self.start_read(context, request);
                    has_worked = true;
                }
                None => break,
            }
        }

        let next_has_worked = match self.next.as_deref_mut() {
            Some(next) => next.execute_requests(context),
            None => false,
        };
        has_worked || next_has_worked
    }

    fn update_status(
        &self,
        status: &mut Status,
    ) {
        let in_flight = (self.pending_reads.len() + self.active_reads.len()) as i32;
        status.add_slots(self.config.io_threads as i32 + self.config.overcommit - in_flight);
        status.add_idle(self.pending_reads.is_empty() && self.active_reads.is_empty());
        if let Some(next) = self.next.as_deref() {
            next.update_status(status);
        }
    }

    fn update_completion_estimates(
        &mut self,
        context: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
        pending: &[RequestId],
    ) {
        // Reads in flight finish based on when they started
        let mut available_at = now;
        for (request, active_read) in &self.active_reads {
            let completion = (active_read.start + self.estimate_read_duration(active_read.size))
                .max(now);
            if let Some(request) = context.request_mut(*request) {
                request.set_estimated_completion(completion);
            }
            available_at = available_at.max(completion);
        }

        // Everything queued after that is read back to back
        let queued: Vec<RequestId> = self
            .pending_reads
            .iter()
            .chain(internal_pending.iter())
            .chain(pending.iter())
            .copied()
            .collect();
        let mut completion = available_at;
        for id in queued {
            let (size, is_open) = match context.request(id).map(|request| request.command()) {
                Some(Command::Read(read)) if self.is_serviced(&read.path) => {
                    (read.size, self.file_handles.contains_key(&read.path))
                }
                _ => continue,
            };

            completion += self.estimate_read_duration(size);
            if !is_open {
                completion += self.file_open_time_average.average_duration();
            }
            if let Some(request) = context.request_mut(id) {
                request.set_estimated_completion(completion);
            }
        }

        internal_pending.extend(self.pending_reads.iter().copied());
        if let Some(next) = self.next.as_deref_mut() {
            next.update_completion_estimates(context, now, internal_pending, pending);
        }
    }

    fn collect_statistics(
        &self,
        statistics: &mut Vec<Statistic>,
    ) {
        let total_micros = self.read_time_average.total();
        let read_speed = if total_micros == 0 {
            0.0
        } else {
            self.read_size_average.total() as f64 / (total_micros as f64 / 1_000_000.0)
        };

        let thread_pool_active = self
            .thread_pool
            .as_ref()
            .map_or(0, |thread_pool| thread_pool.active_request_count());

        statistics.push(Statistic::bytes_per_second(&self.name, "Read speed", read_speed));
        statistics.push(Statistic::time(
            &self.name,
            "File open time",
            self.file_open_time_average.average_duration(),
        ));
        statistics.push(Statistic::integer(
            &self.name,
            "Pending reads",
            self.pending_reads.len() as i64,
        ));
        statistics.push(Statistic::integer(
            &self.name,
            "Active reads",
            thread_pool_active as i64,
        ));
        statistics.push(Statistic::integer(
            &self.name,
            "Open file handles",
            self.file_handles.len() as i64,
        ));
        statistics.push(Statistic::integer(
            &self.name,
            "Completed reads",
            self.completed_reads as i64,
        ));
        statistics.push(Statistic::integer(
            &self.name,
            "Failed reads",
            self.failed_reads as i64,
        ));

        if let Some(next) = self.next.as_deref() {
            next.collect_statistics(statistics);
        }
    }
}

impl Drop for StorageDrive {
    fn drop(&mut self) {
        if let Some(thread_pool) = self.thread_pool.take() {
            thread_pool.finish();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{FileRequestPtr, ReadRequestData};
    use sluice_base::{ClaimMemory, Priority, RequestBuffer, NO_DEADLINE_TIME};
    use std::io::Write;

    fn queue_read(
        context: &mut StreamerContext,
        path: &std::path::Path,
        size: u64,
    ) -> (FileRequestPtr, RequestId) {
        let handle = FileRequestPtr::new(Command::ReadRequest(ReadRequestData {
            path: RequestPath::new(path),
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

    fn run_until_complete(
        drive: &mut StorageDrive,
        context: &mut StreamerContext,
        handle: &FileRequestPtr,
    ) {
        let start = Instant::now();
        while !handle.has_completed() {
            assert!(start.elapsed() < Duration::from_secs(10));
            drive.execute_requests(context);
            context.finalize_completed_requests();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // Moves everything that was prepared into the drive, the way the scheduler would
    fn dispatch(
        drive: &mut StorageDrive,
        context: &mut StreamerContext,
    ) {
        while !context.prepared_requests().is_empty() {
            let id = context.take_prepared_request(0);
            context
                .request_mut(id)
                .unwrap()
                .set_status(RequestStatus::Scheduled);
            drive.queue_request(context, id);
        }
    }

    #[test]
    fn reads_file_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let contents: Vec<u8> = (0..64).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&contents)
            .unwrap();

        let mut context = StreamerContext::new();
        let mut drive = StorageDrive::new(StorageDriveConfig::default());
        drive.set_context(&context);

        let (handle, id) = queue_read(&mut context, &path, 64);
        drive.prepare_request(&mut context, id);
        assert_eq!(context.prepared_requests().len(), 1);
        assert_ne!(context.prepared_requests()[0], id);

        dispatch(&mut drive, &mut context);
        run_until_complete(&mut drive, &mut context, &handle);

        assert_eq!(handle.status(), RequestStatus::Completed);
        let result = handle.read_result(ClaimMemory::No).unwrap();
        assert_eq!(result.data(), &contents[..]);
        assert_eq!(context.num_live_requests(), 0);
    }

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = StreamerContext::new();
        let mut drive = StorageDrive::new(StorageDriveConfig::default());
        drive.set_context(&context);

        let (handle, id) = queue_read(&mut context, &dir.path().join("missing.bin"), 8);
        drive.prepare_request(&mut context, id);
        dispatch(&mut drive, &mut context);
        run_until_complete(&mut drive, &mut context, &handle);
        assert_eq!(handle.status(), RequestStatus::Failed);
    }

    #[test]
    fn paths_outside_the_drive_are_passed_down() {
        let mut context = StreamerContext::new();
        let mut drive = StorageDrive::new(StorageDriveConfig {
            drive_paths: vec![PathBuf::from("/drive")],
            ..Default::default()
        });
        drive.set_context(&context);

        let (handle, id) = queue_read(&mut context, std::path::Path::new("/other/file.bin"), 8);
        drive.prepare_request(&mut context, id);
        assert_eq!(context.prepared_requests(), &[id]);

        dispatch(&mut drive, &mut context);
        context.finalize_completed_requests();
        assert_eq!(handle.status(), RequestStatus::Failed);
    }

    #[test]
    fn open_handles_are_reported_and_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [7u8; 16]).unwrap();

        let mut context = StreamerContext::new();
        let mut drive = StorageDrive::new(StorageDriveConfig::default());
        drive.set_context(&context);

        let (handle, id) = queue_read(&mut context, &path, 16);
        drive.prepare_request(&mut context, id);
        dispatch(&mut drive, &mut context);
        run_until_complete(&mut drive, &mut context, &handle);

        let locks = drive.report(ReportType::FileLocks);
        assert_eq!(locks.len(), 1);
        assert_eq!(
            locks[0].value,
            sluice_base::StatisticValue::Text(RequestPath::new(&path).to_string())
        );

        drive.flush_cache(&RequestPath::new(&path));
        assert!(drive.report(ReportType::FileLocks).is_empty());
    }

    #[test]
    fn config_report() {
        let drive = StorageDrive::new(StorageDriveConfig {
            io_threads: 2,
            ..Default::default()
        });
        let report = drive.report(ReportType::Config);
        assert!(report.contains(&Statistic::integer("Storage drive", "IO threads", 2)));
        assert!(report.contains(&Statistic::text(
            "Storage drive",
            "Next entry",
            "<none>".to_string()
        )));
    }

    #[test]
    fn slots_shrink_with_queued_reads() {
        let drive = StorageDrive::new(StorageDriveConfig {
            io_threads: 2,
            overcommit: 1,
            ..Default::default()
        });
        let mut status = Status::default();
        drive.update_status(&mut status);
        assert_eq!(status.num_available_slots, 3);
        assert!(status.is_idle);
    }
}
