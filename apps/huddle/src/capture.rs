//! Local media acquisition.
//!
//! A [`CaptureDevice`] turns [`MediaConstraints`] into a [`LocalStream`]
//! description that every peer session attaches to its negotiator. The
//! stream is acquired once, before joining, and shared by all sessions.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Requested video shape. Values are ideals unless `exact` is set, in
/// which case a device that cannot meet them fails with
/// [`CaptureError::Overconstrained`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub exact: bool,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 240,
            height: 200,
            frame_rate: 30,
            exact: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: false,
        }
    }
}

impl MediaConstraints {
    pub fn requests_media(&self) -> bool {
        self.video.is_some() || self.audio
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|track| track.kind == kind)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission to capture media was denied")]
    PermissionDenied,
    #[error("constraint {constraint} cannot be satisfied by the capture device")]
    Overconstrained { constraint: String },
    #[error("capture device error: {0}")]
    Device(String),
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream, CaptureError>;
}

/// Device with fixed capabilities that produces track descriptors without
/// touching hardware. Used by the CLI, which has no camera of its own.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    pub max_width: u32,
    pub max_height: u32,
    pub max_frame_rate: u32,
    pub has_audio: bool,
    pub permitted: bool,
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            max_frame_rate: 60,
            has_audio: true,
            permitted: true,
        }
    }
}

impl SyntheticCapture {
    fn check_video(&self, video: &VideoConstraints) -> Result<(), CaptureError> {
        if !video.exact {
            return Ok(());
        }
        let over = |name: &str| CaptureError::Overconstrained {
            constraint: name.to_owned(),
        };
        if video.width > self.max_width {
            return Err(over("width"));
        }
        if video.height > self.max_height {
            return Err(over("height"));
        }
        if video.frame_rate > self.max_frame_rate {
            return Err(over("frameRate"));
        }
        Ok(())
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream, CaptureError> {
        if !constraints.requests_media() {
            return Err(CaptureError::Device(
                "at least one of audio or video must be requested".into(),
            ));
        }
        if !self.permitted {
            return Err(CaptureError::PermissionDenied);
        }

        let mut tracks = Vec::new();
        if let Some(video) = &constraints.video {
            self.check_video(video)?;
            tracks.push(LocalTrack {
                id: format!("video-{}", Uuid::new_v4()),
                kind: TrackKind::Video,
            });
        }
        if constraints.audio {
            if !self.has_audio {
                return Err(CaptureError::Overconstrained {
                    constraint: "audio".into(),
                });
            }
            tracks.push(LocalTrack {
                id: format!("audio-{}", Uuid::new_v4()),
                kind: TrackKind::Audio,
            });
        }

        Ok(LocalStream {
            id: format!("huddle-{}", Uuid::new_v4()),
            tracks,
        })
    }
}
