use super::{
    queue::{write_lines, LineQueue},
    Error, EventData, EventSink,
};
use k8s_openapi::api::core::v1::Event;
use std::{fs::OpenOptions, path::Path};
use tokio::fs::File;

/// Appends JSON lines to a file from a background task
pub struct FileSink {
    queue: LineQueue,
}

impl FileSink {
    /// Open (or create) `path` for appending and start the writer
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened for appending.
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::OpenFile {
                path: path.to_path_buf(),
                source,
            })?;
        let file = File::from_std(file);
        Ok(Self {
            queue: LineQueue::spawn("file", buffer_size, move |rx| write_lines("file", file, rx)),
        })
    }

    /// Flush everything published so far and stop the writer
    pub async fn close(self) {
        self.queue.close().await;
    }
}

impl EventSink for FileSink {
    fn publish(&self, new: &Event, old: Option<&Event>) {
        self.queue.push(&EventData::new(new, old));
    }
}
