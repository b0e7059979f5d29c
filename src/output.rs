//! Hardware output: change suppression, CSV framing, and the serial writer.
//!
//! The tick loop never waits on the port. Frames go through a bounded channel
//! to a writer task; failed or backed-up writes are logged and dropped, and
//! the next tick naturally produces a fresh frame.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_HARDWARE_CHANNELS: usize = 16;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
const WRITER_QUEUE: usize = 8;

/// Last-sent memo in front of the hardware sink.
#[derive(Debug, Clone)]
pub struct OutputGate {
    channel_count: usize,
    last_sent: Option<Vec<u8>>,
}

impl OutputGate {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channel_count: channel_count.max(1),
            last_sent: None,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Pad with zeros or truncate to the hardware channel count.
    pub fn normalize(&self, frame: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; self.channel_count];
        let n = frame.len().min(self.channel_count);
        out[..n].copy_from_slice(&frame[..n]);
        out
    }

    /// Returns the frame to transmit, or None when it equals the last one sent.
    pub fn emit(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let normalized = self.normalize(frame);
        if self.last_sent.as_deref() == Some(normalized.as_slice()) {
            return None;
        }
        self.last_sent = Some(normalized.clone());
        Some(normalized)
    }

    /// All channels zero, under the same suppression.
    pub fn blackout(&mut self) -> Option<Vec<u8>> {
        self.emit(&[])
    }

    /// Forget the last frame so the next emit always transmits.
    pub fn reset_memo(&mut self) {
        self.last_sent = None;
    }

    pub fn last_sent(&self) -> Option<&[u8]> {
        self.last_sent.as_deref()
    }
}

/// Wire framing: comma-separated decimal values, newline-terminated.
pub fn encode_frame(frame: &[u8]) -> String {
    let mut line = frame
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[async_trait]
pub trait HardwareSink: Send {
    async fn send(&mut self, frame: &[u8]) -> Result<(), String>;
    fn describe(&self) -> String;
}

/// Serial device opened as a file. Line settings are applied with `stty`.
pub struct SerialSink {
    path: PathBuf,
    file: tokio::fs::File,
}

impl SerialSink {
    pub async fn open(path: &Path, baud: u32) -> Result<Self, String> {
        configure_port(path, baud).await;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| format!("Failed to open serial port {}: {}", path.display(), e))?;
        log::info!("[SerialOut] opened {} at {} baud", path.display(), baud);
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

/// Best effort: ports that are already configured (or are plain files) still work.
async fn configure_port(path: &Path, baud: u32) {
    let flag = if cfg!(target_os = "macos") { "-f" } else { "-F" };
    let result = tokio::process::Command::new("stty")
        .arg(flag)
        .arg(path)
        .arg(baud.to_string())
        .arg("raw")
        .arg("-echo")
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => log::warn!(
            "[SerialOut] stty exited with {} for {}",
            status,
            path.display()
        ),
        Err(e) => log::warn!("[SerialOut] could not run stty for {}: {}", path.display(), e),
    }
}

#[async_trait]
impl HardwareSink for SerialSink {
    async fn send(&mut self, frame: &[u8]) -> Result<(), String> {
        let line = encode_frame(frame);
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("Failed to write to {}: {}", self.path.display(), e))?;
        self.file
            .flush()
            .await
            .map_err(|e| format!("Failed to flush {}: {}", self.path.display(), e))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps every frame in memory. Used for dry runs and tests.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().expect("recording sink poisoned").clone()
    }

    pub fn last(&self) -> Option<Vec<u8>> {
        self.frames
            .lock()
            .expect("recording sink poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl HardwareSink for RecordingSink {
    async fn send(&mut self, frame: &[u8]) -> Result<(), String> {
        self.frames
            .lock()
            .expect("recording sink poisoned")
            .push(frame.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// Fire-and-forget handle to the writer task.
#[derive(Clone)]
pub struct OutputHandle {
    tx: mpsc::Sender<Vec<u8>>,
    name: String,
}

impl OutputHandle {
    /// A handle plus the receiving end, for callers that drain frames themselves.
    pub fn channel(name: &str) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE);
        (
            Self {
                tx,
                name: name.to_string(),
            },
            rx,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a frame. Never blocks; returns false when the frame was dropped
    /// because the writer is behind or gone.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("[SerialOut] {} busy, frame dropped", self.name);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::error!("[SerialOut] {} writer closed, frame dropped", self.name);
                false
            }
        }
    }
}

/// Spawn the writer task that owns the sink. It drains what is queued and
/// exits once every handle is dropped.
pub fn spawn_output_writer(mut sink: Box<dyn HardwareSink>) -> (OutputHandle, JoinHandle<()>) {
    let (handle, mut rx) = OutputHandle::channel(&sink.describe());
    let task_name = handle.name.clone();

    let task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(&frame).await {
                log::error!("[SerialOut] write failed: {}", e);
            }
        }
        log::info!("[SerialOut] writer for {} stopped", task_name);
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_padded_and_truncated() {
        let gate = OutputGate::new(4);
        assert_eq!(gate.normalize(&[1, 2]), vec![1, 2, 0, 0]);
        assert_eq!(gate.normalize(&[1, 2, 3, 4, 5, 6]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn identical_frames_are_suppressed() {
        let mut gate = OutputGate::new(4);
        assert!(gate.emit(&[1, 2, 3]).is_some());
        assert!(gate.emit(&[1, 2, 3]).is_none());
        // equal after padding
        assert!(gate.emit(&[1, 2, 3, 0]).is_none());
        assert!(gate.emit(&[1, 2, 4]).is_some());
    }

    #[test]
    fn blackout_is_suppressed_too() {
        let mut gate = OutputGate::new(3);
        assert_eq!(gate.blackout(), Some(vec![0, 0, 0]));
        assert_eq!(gate.blackout(), None);
    }

    #[test]
    fn reset_memo_forces_resend() {
        let mut gate = OutputGate::new(2);
        gate.emit(&[5, 5]);
        gate.reset_memo();
        assert!(gate.last_sent().is_none());
        assert_eq!(gate.emit(&[5, 5]), Some(vec![5, 5]));
    }

    #[test]
    fn csv_framing() {
        assert_eq!(encode_frame(&[134, 255, 0, 0]), "134,255,0,0\n");
        assert_eq!(encode_frame(&[]), "\n");
    }

    #[test]
    fn full_queue_drops_frames() {
        let (handle, mut rx) = OutputHandle::channel("test");
        for i in 0..WRITER_QUEUE as u8 {
            assert!(handle.send(vec![i]));
        }
        assert!(!handle.send(vec![99]));
        assert!(!handle.send(vec![100]));
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, WRITER_QUEUE);
    }

    #[tokio::test]
    async fn writer_forwards_frames() {
        let sink = RecordingSink::new();
        let (handle, task) = spawn_output_writer(Box::new(sink.clone()));
        assert!(handle.send(vec![1, 2, 3]));
        assert!(handle.send(vec![4, 5, 6]));
        drop(handle);
        task.await.unwrap();
        assert_eq!(sink.frames(), vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[tokio::test]
    async fn serial_sink_writes_csv_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tty");
        tokio::fs::write(&path, b"").await.unwrap();

        let mut sink = SerialSink::open(&path, DEFAULT_BAUD_RATE).await.unwrap();
        sink.send(&[1, 2, 3]).await.unwrap();
        sink.send(&[0, 0, 0]).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "1,2,3\n0,0,0\n");
    }
}
