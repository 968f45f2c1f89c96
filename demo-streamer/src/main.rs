use sluice::base::DefaultRequestMemoryAllocator;
use sluice::streamer::{
    AssetDataStream, ClaimMemory, Deadline, Priority, ReadOptions, ReadOutput, ReportType,
    Streamer, StreamerConfig,
};
use std::error::Error;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub fn streamer_config_path() -> PathBuf {
    PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/data/streamer_config.json"
    ))
}

// Writes a few files of different sizes to stream from
fn create_demo_files() -> std::io::Result<Vec<PathBuf>> {
    let directory = std::env::temp_dir().join("sluice-demo");
    std::fs::create_dir_all(&directory)?;

    let mut paths = Vec::default();
    for (index, size) in [4 * 1024, 256 * 1024, 3 * 1024 * 1024].iter().enumerate() {
        let path = directory.join(format!("demo_file_{}.bin", index));
        let contents: Vec<u8> = (0..*size).map(|value: usize| (value % 251) as u8).collect();
        std::fs::write(&path, contents)?;
        paths.push(path);
    }

    Ok(paths)
}

fn main() -> Result<(), Box<dyn Error>> {
    // Setup logging
    env_logger::Builder::default()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(log::LevelFilter::Debug)
        .init();
    profiling::register_thread!("Main Thread");

    let config = StreamerConfig::load_from_file(&streamer_config_path())?;
    let streamer = Arc::new(Streamer::from_config(&config)?);
    // Files given on the command line, otherwise generated ones
    let mut paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        paths = create_demo_files()?;
    }
    let allocator = Arc::new(DefaultRequestMemoryAllocator::new());

    // Whole file reads with increasing urgency
    let (complete_tx, complete_rx) = crossbeam_channel::unbounded();
    let mut reads = Vec::default();
    for (index, path) in paths.iter().enumerate() {
        let size = std::fs::metadata(path)?.len().max(1);
        let read = streamer.read(
            path,
            ReadOutput::Allocator(allocator.clone()),
            size,
            ReadOptions {
                offset: 0,
                deadline: Deadline::from_duration(Duration::from_millis(100 * (3 - index as u64))),
                priority: Priority::MEDIUM,
            },
        )?;
        let complete_tx = complete_tx.clone();
        streamer.set_request_complete_callback(&read, move |request| {
            let _ = complete_tx.send(request);
        })?;
        reads.push(read);
    }
    streamer.queue_requests(&reads)?;

    // Make the largest file the most important one
    if let Some(largest) = reads.last() {
        streamer.reschedule_request(largest, Deadline::NOW, Priority::HIGHEST)?;
    }

    // Queue a read and immediately change our mind about it
    let canceled = streamer.read(
        &paths[0],
        ReadOutput::Buffer(vec![0; 1024]),
        1024,
        ReadOptions::default(),
    )?;
    streamer.queue_request(&canceled)?;
    streamer.cancel(&canceled)?;

    for _ in 0..reads.len() {
        let request = complete_rx.recv_timeout(Duration::from_secs(10))?;
        match streamer.get_read_request_result(&request, ClaimMemory::No) {
            Some(result) => log::info!(
                "Read {} finished as {:?} with {} bytes",
                request.id(),
                request.status(),
                result.bytes_read
            ),
            None => log::info!("Read {} finished as {:?}", request.id(), request.status()),
        }
    }
    log::info!("Extra read finished as {:?}", canceled.status());
    drop(reads);

    // Stream part of a file through the asset data stream
    let mut stream = AssetDataStream::new();
    stream.open_file(
        streamer.clone(),
        &paths[paths.len() / 2],
        1024,
        4096,
        Deadline::NO_DEADLINE,
        Priority::HIGH,
    )?;
    stream.block_until_load_complete();
    let mut header = [0u8; 16];
    stream.read_exact(&mut header)?;
    log::info!(
        "Asset stream loaded {} of {} bytes, header {:?}",
        stream.loaded_size(),
        stream.length(),
        header
    );
    stream.close();

    let report = streamer.report(ReportType::Config)?;
    let file_locks = streamer.report(ReportType::FileLocks)?;
    while !report.has_completed() || !file_locks.has_completed() {
        std::thread::sleep(Duration::from_millis(1));
    }

    for statistic in streamer
        .get_report_result(&report)
        .into_iter()
        .chain(streamer.get_report_result(&file_locks))
        .flatten()
    {
        println!("{}: {} = {:?}", statistic.owner, statistic.name, statistic.value);
    }

    streamer.flush_caches()?;
    std::thread::sleep(Duration::from_millis(15));
    for statistic in streamer.statistics() {
        println!("{}: {} = {:?}", statistic.owner, statistic.name, statistic.value);
    }

    log::info!(
        "{} allocations, {} released",
        allocator.allocation_count(),
        allocator.release_count()
    );
    Ok(())
}
