use crate::{FileRequestPtr, ReadOptions, ReadOutput, Streamer, StreamerResult};
use crossbeam_channel::Receiver;
use sluice_base::{ClaimMemory, Deadline, Priority, RequestPath};
use std::io::SeekFrom;
use std::sync::Arc;

/// Sequential, forward-only view of asset data. The data either comes from memory or is streamed
/// in from a file region through a `Streamer`.
#[derive(Default)]
pub struct AssetDataStream {
    streamer: Option<Arc<Streamer>>,
    request: Option<FileRequestPtr>,
    load_complete_rx: Option<Receiver<()>>,
    path: Option<RequestPath>,
    data: Vec<u8>,
    // Requested size, not necessarily what ends up loaded
    length: u64,
    loaded_size: u64,
    position: u64,
    is_open: bool,
}

impl AssetDataStream {
    pub fn new() -> Self {
        Default::default()
    }

    /// Copies the data. The stream is fully loaded immediately.
    pub fn open_buffer(
        &mut self,
        data: &[u8],
    ) {
        self.close();
        self.data = data.to_vec();
        self.length = data.len() as u64;
        self.loaded_size = self.length;
        self.is_open = true;
    }

    /// Starts streaming `size` bytes at `file_offset` of the file
    pub fn open_file<T: Into<RequestPath>>(
        &mut self,
        streamer: Arc<Streamer>,
        path: T,
        file_offset: u64,
        size: u64,
        deadline: Deadline,
        priority: Priority,
    ) -> StreamerResult<()> {
        self.close();
        let path = path.into();
        let buffer_size = usize::try_from(size)
            .map_err(|_| format!("Read of {} bytes from {} is too large", size, path))?;
        let mut buffer = Vec::default();
        buffer
            .try_reserve_exact(buffer_size)
            .map_err(|error| format!("Unable to allocate {} bytes for {}: {}", size, path, error))?;
        buffer.resize(buffer_size, 0);
        let request = streamer.read(
            path.clone(),
            ReadOutput::Buffer(buffer),
            size,
            ReadOptions {
                offset: file_offset,
                deadline,
                priority,
            },
        )?;

        let (load_complete_tx, load_complete_rx) = crossbeam_channel::bounded(1);
        streamer.set_request_complete_callback(&request, move |_| {
            let _ = load_complete_tx.send(());
        })?;
        streamer.queue_request(&request)?;

        self.streamer = Some(streamer);
        self.request = Some(request);
        self.load_complete_rx = Some(load_complete_rx);
        self.path = Some(path);
        self.length = size;
        self.is_open = true;
        Ok(())
    }

    /// Blocks until the streamed data arrived. Returns immediately for memory backed streams.
    pub fn block_until_load_complete(&mut self) {
        let load_complete_rx = match self.load_complete_rx.take() {
            Some(load_complete_rx) => load_complete_rx,
            None => return,
        };

        profiling::scope!("AssetDataStream::block_until_load_complete");
        let _ = load_complete_rx.recv();

        let (streamer, request) = match (&self.streamer, &self.request) {
            (Some(streamer), Some(request)) => (streamer, request),
            _ => return,
        };

        match streamer.get_read_request_result(request, ClaimMemory::Yes) {
            Some(result) => {
                self.loaded_size = result.bytes_read;
                let mut data = result.into_claimed().unwrap_or_default();
                data.truncate(self.loaded_size as usize);
                self.data = data;
            }
            None => {
                log::error!(
                    "Loading {:?} finished as {:?} without data",
                    self.path,
                    request.status()
                );
                self.loaded_size = 0;
                self.data.clear();
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_loading(&self) -> bool {
        self.load_complete_rx.is_some()
    }

    pub fn is_fully_loaded(&self) -> bool {
        !self.is_loading() && self.loaded_size == self.length
    }

    pub fn loaded_size(&self) -> u64 {
        self.loaded_size
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Only forward seeks are supported
    pub fn can_seek(
        &self,
        position: u64,
    ) -> bool {
        position >= self.position
    }

    pub fn can_write(&self) -> bool {
        false
    }

    pub fn write(
        &mut self,
        _data: &[u8],
    ) -> usize {
        panic!("AssetDataStream is read only");
    }

    /// Cancels a load that is still in flight
    pub fn request_cancel(&self) -> StreamerResult<()> {
        if let (Some(streamer), Some(request)) = (&self.streamer, &self.request) {
            if self.is_loading() {
                streamer.cancel(request)?;
            }
        }
        Ok(())
    }

    pub fn reschedule(
        &self,
        deadline: Deadline,
        priority: Priority,
    ) -> StreamerResult<()> {
        if let (Some(streamer), Some(request)) = (&self.streamer, &self.request) {
            if self.is_loading() {
                streamer.reschedule_request(request, deadline, priority)?;
            }
        }
        Ok(())
    }

    /// Waits for any load in flight and releases the data
    pub fn close(&mut self) {
        if self.is_loading() {
            self.block_until_load_complete();
        }

        self.streamer = None;
        self.request = None;
        self.path = None;
        self.data = Vec::default();
        self.length = 0;
        self.loaded_size = 0;
        self.position = 0;
        self.is_open = false;
    }
}

impl std::io::Read for AssetDataStream {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> std::io::Result<usize> {
        if self.is_loading() {
            self.block_until_load_complete();
        }

        let start = (self.position as usize).min(self.data.len());
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl std::io::Seek for AssetDataStream {
    fn seek(
        &mut self,
        pos: SeekFrom,
    ) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.position as i128 + offset as i128,
            SeekFrom::End(offset) => self.length as i128 + offset as i128,
        };

        if target < self.position as i128 {
            panic!(
                "AssetDataStream only seeks forward, tried to move from {} to {}",
                self.position, target
            );
        }

        self.position = target.min(u64::MAX as i128) as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Read, Seek};

    fn buffer_stream() -> (AssetDataStream, Vec<u8>) {
        let data: Vec<u8> = (0..100).collect();
        let mut stream = AssetDataStream::new();
        stream.open_buffer(&data);
        (stream, data)
    }

    #[test]
    fn buffer_is_copied() {
        let mut data: Vec<u8> = (0..100).collect();
        let mut stream = AssetDataStream::new();
        stream.open_buffer(&data);
        data[0] = 255;

        assert!(stream.is_open());
        assert!(stream.is_fully_loaded());
        assert_eq!(stream.length(), 100);
        assert_eq!(stream.loaded_size(), 100);

        let mut output = Vec::default();
        stream.read_to_end(&mut output).unwrap();
        assert_eq!(output[0], 0);
        assert_eq!(output.len(), 100);
    }

    #[test]
    fn block_is_a_no_op_for_buffers() {
        let (mut stream, _) = buffer_stream();
        stream.block_until_load_complete();
        assert!(stream.is_fully_loaded());
    }

    #[test]
    fn seeks_forward() {
        let (mut stream, data) = buffer_stream();
        assert_eq!(stream.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert!(!stream.can_seek(5));
        assert!(stream.can_seek(10));
        assert_eq!(stream.seek(SeekFrom::Current(5)).unwrap(), 15);
        let mut value = [0u8; 2];
        stream.read_exact(&mut value).unwrap();
        assert_eq!(value, [data[15], data[16]]);
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 100);
        assert_eq!(stream.read(&mut value).unwrap(), 0);
    }

    #[test]
    #[should_panic]
    fn backward_seek_panics() {
        let (mut stream, _) = buffer_stream();
        stream.seek(SeekFrom::Start(50)).unwrap();
        let _ = stream.seek(SeekFrom::Current(-1));
    }

    #[test]
    #[should_panic]
    fn write_panics() {
        let (mut stream, _) = buffer_stream();
        assert!(!stream.can_write());
        stream.write(&[1, 2, 3]);
    }

    #[test]
    fn oversized_file_region_is_rejected() {
        let stack = crate::build_stack(vec![Box::new(crate::StorageDrive::new(
            crate::StorageDriveConfig::default(),
        ))])
        .unwrap();
        let streamer = Arc::new(Streamer::new(stack).unwrap());

        let mut stream = AssetDataStream::new();
        let result = stream.open_file(
            streamer,
            "file.bin",
            0,
            u64::MAX,
            Deadline::NO_DEADLINE,
            Priority::MEDIUM,
        );
        assert!(result.is_err());
        assert!(!stream.is_open());
    }

    #[test]
    fn close_resets() {
        let (mut stream, _) = buffer_stream();
        stream.close();
        assert!(!stream.is_open());
        assert_eq!(stream.length(), 0);
    }
}
