//! Scriptable [`ToolInvoker`] for tests that should not spawn ffmpeg.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::error::PipelineError;
use crate::tools::{FrameRequest, ToolInvoker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameBehavior {
    Write,
    Empty,
    Fail,
}

/// Writes a small fake JPEG for each frame request and answers probes from fixed values.
///
/// A probe set to `None` fails with `ToolInvocationFailed`.
#[derive(Debug)]
pub struct FakeToolInvoker {
    frames: FrameBehavior,
    duration: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    frame_requests: Mutex<Vec<FrameRequest>>,
    probes: Mutex<Vec<&'static str>>,
}

impl Default for FakeToolInvoker {
    fn default() -> Self {
        Self {
            frames: FrameBehavior::Write,
            duration: Some(42.4),
            width: Some(1920),
            height: Some(1080),
            frame_requests: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
        }
    }
}

impl FakeToolInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit successfully without writing anything useful.
    pub fn empty_frames(mut self) -> Self {
        self.frames = FrameBehavior::Empty;
        self
    }

    pub fn failing_frames(mut self) -> Self {
        self.frames = FrameBehavior::Fail;
        self
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Every probe fails.
    pub fn unprobeable(self) -> Self {
        self.with_duration(None).with_dimensions(None, None)
    }

    pub fn frame_requests(&self) -> Vec<FrameRequest> {
        self.frame_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of the probes run so far, in order.
    pub fn probes(&self) -> Vec<&'static str> {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_probe(&self, name: &'static str) {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name);
    }
}

fn probe_result<T>(name: &'static str, value: Option<T>) -> Result<T, PipelineError> {
    value.ok_or_else(|| PipelineError::tool("ffprobe", format!("{} unavailable", name)))
}

#[async_trait]
impl ToolInvoker for FakeToolInvoker {
    async fn extract_frame(&self, request: &FrameRequest) -> Result<(), PipelineError> {
        self.frame_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let contents: &[u8] = match self.frames {
            FrameBehavior::Fail => {
                return Err(PipelineError::tool("ffmpeg", "exit status: 1"));
            }
            FrameBehavior::Empty => b"",
            FrameBehavior::Write => b"\xFF\xD8\xFF\xE0fake-jpeg\xFF\xD9",
        };
        tokio::fs::write(&request.destination, contents)
            .await
            .map_err(|e| PipelineError::tool("ffmpeg", e.to_string()))
    }

    async fn probe_duration(&self, _source: &Path) -> Result<f64, PipelineError> {
        self.record_probe("duration");
        probe_result("duration", self.duration)
    }

    async fn probe_width(&self, _source: &Path) -> Result<u32, PipelineError> {
        self.record_probe("width");
        probe_result("width", self.width)
    }

    async fn probe_height(&self, _source: &Path) -> Result<u32, PipelineError> {
        self.record_probe("height");
        probe_result("height", self.height)
    }
}
