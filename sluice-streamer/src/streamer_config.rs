use crate::{
    build_stack, ReadSplitter, ReadSplitterConfig, SchedulerConfig, StorageDrive,
    StorageDriveConfig, StreamStackEntry, StreamerError, StreamerResult,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum StackEntryConfig {
    ReadSplitter(ReadSplitterConfig),
    StorageDrive(StorageDriveConfig),
}

impl StackEntryConfig {
    pub fn create_stack_entry(&self) -> Box<dyn StreamStackEntry> {
        match self {
            StackEntryConfig::ReadSplitter(config) => Box::new(ReadSplitter::new(config.clone())),
            StackEntryConfig::StorageDrive(config) => Box::new(StorageDrive::new(config.clone())),
        }
    }
}

/// Describes the stream stack from top to bottom, plus scheduler settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub stack: Vec<StackEntryConfig>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        StreamerConfig {
            scheduler: SchedulerConfig::default(),
            stack: vec![
                StackEntryConfig::ReadSplitter(ReadSplitterConfig::default()),
                StackEntryConfig::StorageDrive(StorageDriveConfig::default()),
            ],
        }
    }
}

impl StreamerConfig {
    pub fn from_json_str(json: &str) -> StreamerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file(path: &Path) -> StreamerResult<Self> {
        log::debug!("Loading streamer config from {:?}", path);
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> StreamerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn build_stack(&self) -> StreamerResult<Box<dyn StreamStackEntry>> {
        let entries = self
            .stack
            .iter()
            .map(|entry| entry.create_stack_entry())
            .collect();
        build_stack(entries).ok_or(StreamerError::EmptyStack)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_stack() {
        let config = StreamerConfig::from_json_str(
            r#"{
                "scheduler": { "busy_wait_timeout_ms": 2 },
                "stack": [
                    { "type": "ReadSplitter", "max_read_size": 65536 },
                    { "type": "StorageDrive", "io_threads": 2, "drive_paths": ["/data"] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.busy_wait_timeout_ms, 2);
        assert_eq!(
            config.stack[0],
            StackEntryConfig::ReadSplitter(ReadSplitterConfig {
                max_read_size: 65536
            })
        );
        match &config.stack[1] {
            StackEntryConfig::StorageDrive(drive) => {
                assert_eq!(drive.io_threads, 2);
                assert_eq!(drive.max_file_handles, 32);
                assert_eq!(drive.drive_paths, vec![std::path::PathBuf::from("/data")]);
            }
            other => panic!("Unexpected stack entry {:?}", other),
        }

        let stack = config.build_stack().unwrap();
        assert_eq!(stack.name(), "Read splitter");
        assert_eq!(stack.next().unwrap().name(), "Storage drive");
    }

    #[test]
    fn empty_stack_is_an_error() {
        let config = StreamerConfig::from_json_str(r#"{ "stack": [] }"#).unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert!(matches!(config.build_stack(), Err(StreamerError::EmptyStack)));
    }

    #[test]
    fn unknown_entry_is_rejected() {
        let result = StreamerConfig::from_json_str(r#"{ "stack": [ { "type": "Tape" } ] }"#);
        assert!(matches!(result, Err(StreamerError::JsonError(_))));
    }

    #[test]
    fn default_round_trips_through_json() {
        let config = StreamerConfig::default();
        let json = config.to_json_string().unwrap();
        assert_eq!(StreamerConfig::from_json_str(&json).unwrap(), config);
    }
}
