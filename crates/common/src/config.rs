//! Muxer configuration: track descriptors and muxing policy.
//!
//! Every struct derives serde with defaults, so a configuration can be kept
//! in a JSON file next to the recording pipeline and loaded with
//! [`MuxerOptions::load`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::elements::codec_ids;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{TimecodeScale, TrackKind};

/// Default upper bound on a cluster's length (5 s).
pub const DEFAULT_MAX_CLUSTER_DURATION_US: u64 = 5_000_000;
/// Default number of chunks a single track may have waiting for the other.
pub const DEFAULT_MAX_QUEUED_CHUNKS: usize = 4096;
/// Default bytes reserved in each TrackEntry for CodecPrivate.
pub const DEFAULT_CODEC_PRIVATE_RESERVE: usize = 4096;
/// Smallest non-zero reserve. Zero disables the late CodecPrivate slot.
pub const MIN_CODEC_PRIVATE_RESERVE: usize = 8;
/// Default MuxingApp / WritingApp string.
pub const DEFAULT_APP_NAME: &str = concat!("webm-mux ", env!("CARGO_PKG_VERSION"));

/// Video track descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoTrackOptions {
    /// Matroska codec ID, e.g. `V_VP8`, `V_VP9`, `V_AV1`.
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Frames per second. Metadata only (written as DefaultDuration).
    #[serde(default)]
    pub frame_rate: Option<f64>,
    /// Decoder configuration known up front.
    #[serde(default)]
    pub codec_private: Option<Vec<u8>>,
}

impl VideoTrackOptions {
    pub fn new(codec: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            codec: codec.into(),
            width,
            height,
            frame_rate: None,
            codec_private: None,
        }
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }
}

/// Audio track descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackOptions {
    /// Matroska codec ID, e.g. `A_OPUS`, `A_VORBIS`.
    pub codec: String,
    pub channels: u32,
    /// Samples per second per channel.
    pub sample_rate: f64,
    /// Typically only set for PCM.
    #[serde(default)]
    pub bit_depth: Option<u32>,
    #[serde(default)]
    pub codec_private: Option<Vec<u8>>,
}

impl AudioTrackOptions {
    pub fn new(codec: impl Into<String>, channels: u32, sample_rate: f64) -> Self {
        Self {
            codec: codec.into(),
            channels,
            sample_rate,
            bit_depth: None,
            codec_private: None,
        }
    }
}

/// How the first timestamp of each track is treated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirstTimestampBehavior {
    /// The first chunk of every track must be at timestamp 0.
    Strict,
    /// Each track's timestamps are shifted so its first chunk lands at 0.
    Offset,
    /// Timestamps are used as given.
    #[default]
    Permissive,
}

/// Top-level muxer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerOptions {
    pub video: Option<VideoTrackOptions>,
    pub audio: Option<AudioTrackOptions>,
    pub timecode_scale: TimecodeScale,
    /// A cluster whose base is older than this is closed before the next block.
    pub max_cluster_duration_us: u64,
    /// Start a new cluster at every video key frame.
    pub keyframe_clusters: bool,
    pub first_timestamp: FirstTimestampBehavior,
    /// Per-track bound on chunks waiting for the other track.
    pub max_queued_chunks: usize,
    /// Bytes reserved per TrackEntry for CodecPrivate (element header included).
    pub codec_private_reserve: usize,
    pub muxing_app: String,
    pub writing_app: String,
}

impl Default for MuxerOptions {
    fn default() -> Self {
        Self {
            video: None,
            audio: None,
            timecode_scale: TimecodeScale::MILLISECOND,
            max_cluster_duration_us: DEFAULT_MAX_CLUSTER_DURATION_US,
            keyframe_clusters: true,
            first_timestamp: FirstTimestampBehavior::Permissive,
            max_queued_chunks: DEFAULT_MAX_QUEUED_CHUNKS,
            codec_private_reserve: DEFAULT_CODEC_PRIVATE_RESERVE,
            muxing_app: DEFAULT_APP_NAME.to_string(),
            writing_app: DEFAULT_APP_NAME.to_string(),
        }
    }
}

impl MuxerOptions {
    pub fn video_only(video: VideoTrackOptions) -> Self {
        Self {
            video: Some(video),
            ..Self::default()
        }
    }

    pub fn audio_only(audio: AudioTrackOptions) -> Self {
        Self {
            audio: Some(audio),
            ..Self::default()
        }
    }

    pub fn with_video(mut self, video: VideoTrackOptions) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_audio(mut self, audio: AudioTrackOptions) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Configured track kinds, in track-number order.
    pub fn track_kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.video.is_some() {
            kinds.push(TrackKind::Video);
        }
        if self.audio.is_some() {
            kinds.push(TrackKind::Audio);
        }
        kinds
    }

    pub fn is_audio_only(&self) -> bool {
        self.video.is_none() && self.audio.is_some()
    }

    /// Parse options from a JSON string and validate them.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let options: MuxerOptions = serde_json::from_str(json)?;
        options.validate()?;
        debug!(tracks = ?options.track_kinds(), "Parsed muxer options from JSON");
        Ok(options)
    }

    /// Load options from a JSON file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read muxer options");
            ConfigError::Io(e)
        })?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for errors the muxer cannot recover from.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.video.is_none() && self.audio.is_none() {
            return Err(ConfigError::NoTracks);
        }

        if let Some(video) = &self.video {
            validate_codec_id(TrackKind::Video, &video.codec)?;
            if video.width == 0 || video.height == 0 {
                return Err(ConfigError::InvalidTrack {
                    track: TrackKind::Video,
                    reason: format!("invalid dimensions {}x{}", video.width, video.height),
                });
            }
            if let Some(fps) = video.frame_rate {
                if !fps.is_finite() || fps <= 0.0 {
                    return Err(ConfigError::InvalidTrack {
                        track: TrackKind::Video,
                        reason: format!("invalid frame rate {fps}"),
                    });
                }
            }
            self.validate_codec_private(TrackKind::Video, video.codec_private.as_deref())?;
        }

        if let Some(audio) = &self.audio {
            validate_codec_id(TrackKind::Audio, &audio.codec)?;
            if audio.channels == 0 {
                return Err(ConfigError::InvalidTrack {
                    track: TrackKind::Audio,
                    reason: "channel count must be at least 1".into(),
                });
            }
            if !audio.sample_rate.is_finite() || audio.sample_rate <= 0.0 {
                return Err(ConfigError::InvalidTrack {
                    track: TrackKind::Audio,
                    reason: format!("invalid sample rate {}", audio.sample_rate),
                });
            }
            if audio.bit_depth == Some(0) {
                return Err(ConfigError::InvalidTrack {
                    track: TrackKind::Audio,
                    reason: "bit depth must be at least 1".into(),
                });
            }
            self.validate_codec_private(TrackKind::Audio, audio.codec_private.as_deref())?;
        }

        if self.timecode_scale.nanos_per_tick() == 0 {
            return Err(ConfigError::InvalidSetting(
                "timecode scale must be non-zero".into(),
            ));
        }
        if self.max_cluster_duration_us == 0 {
            return Err(ConfigError::InvalidSetting(
                "maximum cluster duration must be non-zero".into(),
            ));
        }
        if self.max_queued_chunks == 0 {
            return Err(ConfigError::InvalidSetting(
                "queue bound must be at least 1".into(),
            ));
        }
        if (1..MIN_CODEC_PRIVATE_RESERVE).contains(&self.codec_private_reserve) {
            return Err(ConfigError::InvalidSetting(format!(
                "codec private reserve must be 0 or at least {MIN_CODEC_PRIVATE_RESERVE} bytes"
            )));
        }
        if self.muxing_app.is_empty() || self.writing_app.is_empty() {
            return Err(ConfigError::InvalidSetting(
                "muxing/writing application names must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Largest CodecPrivate payload that fits the configured reserve.
    ///
    /// The reserve also holds the element ID (2 bytes) and a size field of
    /// up to 4 bytes.
    pub fn codec_private_capacity(&self) -> usize {
        self.codec_private_reserve.saturating_sub(6)
    }

    /// Track-option codec private data is checked against the reserved slot.
    /// Without a slot it is written inline in the TrackEntry, at any size.
    fn validate_codec_private(&self, track: TrackKind, data: Option<&[u8]>) -> ConfigResult<()> {
        if self.codec_private_reserve == 0 {
            return Ok(());
        }
        match data {
            Some(bytes) if bytes.len() > self.codec_private_capacity() => {
                Err(ConfigError::CodecPrivateTooLarge {
                    track,
                    size: bytes.len(),
                    capacity: self.codec_private_capacity(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn validate_codec_id(track: TrackKind, codec_id: &str) -> ConfigResult<()> {
    let invalid = |reason: String| ConfigError::InvalidCodec {
        track,
        codec_id: codec_id.to_string(),
        reason,
    };

    if codec_id.is_empty() {
        return Err(invalid("codec ID is empty".into()));
    }
    if !codec_id.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(invalid("codec ID must be printable ASCII".into()));
    }
    if !codec_id.starts_with(track.codec_prefix()) {
        return Err(invalid(format!(
            "codec ID must start with {}",
            track.codec_prefix()
        )));
    }
    if !codec_ids::is_webm(codec_id) {
        warn!(track = %track, codec_id, "Codec ID is outside the WebM codec set");
    }
    Ok(())
}
