//! The video source state machine.
//!
//! Wraps one elementary stream plus a decoder and exposes "current frame",
//! blocking and non-blocking seek, and the export mode. Every wait point
//! (metadata, configure, sought frame) carries a timeout and degrades to
//! the best available frame rather than hanging: the render loop must
//! never block on this machine.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use fl_common::config::SourceTimeouts;
use fl_common::error::{DecodeError, StreamError};
use fl_common::sample::{DecodedFrame, Sample, VideoStreamInfo};
use fl_common::types::TimeCode;

use crate::decoder::VideoDecoder;
use crate::export::{ExportConfig, ExportSession};
use crate::sample_table::SampleTable;

/// Lifecycle states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceState {
    Unloaded,
    ParsingMetadata,
    Configuring,
    Ready,
    Playing,
    Paused,
    Seeking,
    ExportPreparing,
    Exporting,
    Destroyed,
}

/// External demuxer adapter. Parsing is event-driven on the collaborator's
/// side; the source polls until metadata and the sample list are available.
pub trait StreamProvider {
    /// Non-blocking. Returns the stream once the demuxer has parsed it.
    fn poll_stream(&mut self) -> Option<(VideoStreamInfo, Vec<Sample>)>;
}

/// How long to sleep between polls of an external completion signal.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A frame-accurate wrapper around one elementary video stream.
pub struct VideoSource {
    state: SourceState,
    info: Option<VideoStreamInfo>,
    table: Option<SampleTable>,
    decoder: Box<dyn VideoDecoder>,
    timeouts: SourceTimeouts,
    current: Option<DecodedFrame>,
    /// Monotonic seek generation; a newer request supersedes an older one.
    seek_generation: u64,
    pending_seek: Option<TimeCode>,
    export: Option<ExportSession>,
}

impl VideoSource {
    pub fn new(decoder: Box<dyn VideoDecoder>, timeouts: SourceTimeouts) -> Self {
        Self {
            state: SourceState::Unloaded,
            info: None,
            table: None,
            decoder,
            timeouts,
            current: None,
            seek_generation: 0,
            pending_seek: None,
            export: None,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn stream_info(&self) -> Option<&VideoStreamInfo> {
        self.info.as_ref()
    }

    /// The most recently decoded frame at the playhead.
    pub fn current_frame(&self) -> Option<&DecodedFrame> {
        self.current.as_ref()
    }

    /// Parse metadata (with timeout), configure the decoder (fail fast on
    /// unsupported codecs), and decode the first frame.
    pub fn open(&mut self, provider: &mut dyn StreamProvider) -> Result<(), DecodeError> {
        self.guard_not_destroyed()?;
        self.state = SourceState::ParsingMetadata;

        let deadline = Instant::now() + self.timeouts.metadata;
        let (stream_info, samples) = loop {
            if let Some(parsed) = provider.poll_stream() {
                break parsed;
            }
            if Instant::now() >= deadline {
                warn!("Timed out waiting for stream metadata");
                self.state = SourceState::Unloaded;
                return Err(DecodeError::ConfigureFailed {
                    codec: "unknown".to_string(),
                    reason: StreamError::MetadataTimeout.to_string(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let table = SampleTable::build(samples).map_err(|e| DecodeError::ConfigureFailed {
            codec: stream_info.codec.clone(),
            reason: e.to_string(),
        })?;

        self.state = SourceState::Configuring;
        // Unsupported codec: fail fast with the decoder's typed error.
        self.decoder.configure(&stream_info)?;

        info!(
            codec = %stream_info.codec,
            resolution = %stream_info.resolution,
            samples = table.len(),
            "Video source opened"
        );

        self.info = Some(stream_info);
        self.table = Some(table);
        self.state = SourceState::Ready;

        // Land on the first frame so current_frame() is immediately useful.
        self.seek(TimeCode::ZERO)?;
        self.state = SourceState::Ready;
        Ok(())
    }

    pub fn play(&mut self) {
        if matches!(self.state, SourceState::Ready | SourceState::Paused) {
            self.state = SourceState::Playing;
        }
    }

    pub fn pause(&mut self) {
        if self.state == SourceState::Playing {
            self.state = SourceState::Paused;
        }
    }

    /// Blocking frame-accurate seek.
    ///
    /// Finds the sample nearest the target presentation time, walks back to
    /// the preceding sync sample, resets and reconfigures the decoder, and
    /// feeds every sample from the sync point through the target in decode
    /// order — forward-referencing frames mean the decoder may need samples
    /// past the sync point before the target frame itself comes out.
    pub fn seek(&mut self, target: TimeCode) -> Result<(), DecodeError> {
        self.guard_not_destroyed()?;
        let info = self.info.as_ref().ok_or(DecodeError::NotConfigured)?;
        let table = self.table.as_ref().ok_or(DecodeError::NotConfigured)?;

        self.seek_generation += 1;
        let prior_state = self.state;
        self.state = SourceState::Seeking;

        let target_ticks = info.secs_to_ticks(target.as_secs().max(0.0));
        let target_idx = table.nearest_by_pts(target_ticks);
        let target_pts_us = info.ticks_to_micros(table.sample(target_idx).pts);
        let sync_idx = table.sync_at_or_before(target_idx);

        debug!(
            target_secs = target.as_secs(),
            target_idx,
            sync_idx,
            generation = self.seek_generation,
            "Seeking"
        );

        self.decoder.reset();
        self.decoder.configure(info)?;

        for idx in sync_idx..=target_idx {
            if let Err(e) = self.decoder.submit(table.sample(idx)) {
                // Transient per-sample failures are logged and skipped; they
                // do not abort the seek.
                warn!(sample = idx, error = %e, "Skipping sample during seek");
            }
        }
        self.decoder.flush()?;

        let frame = self.await_frame_at(target_pts_us);
        match frame {
            Some(f) => self.current = Some(f),
            None => {
                warn!(
                    target_us = target_pts_us,
                    "Seek produced no frame; keeping previous frame"
                );
            }
        }

        self.state = match prior_state {
            SourceState::Playing => SourceState::Playing,
            _ => SourceState::Paused,
        };
        Ok(())
    }

    /// Poll the decoder for the frame at `target_pts_us`, bounded by the
    /// seek timeout. Falls back to the nearest decoded frame (logged) when
    /// the exact frame never materializes.
    fn await_frame_at(&mut self, target_pts_us: i64) -> Option<DecodedFrame> {
        let deadline = Instant::now() + self.timeouts.seek_frame;
        let mut best: Option<DecodedFrame> = None;
        loop {
            while let Some(frame) = self.decoder.poll_frame() {
                let is_better = match &best {
                    Some(b) => {
                        (frame.pts_us - target_pts_us).abs() < (b.pts_us - target_pts_us).abs()
                    }
                    None => true,
                };
                if is_better {
                    best = Some(frame);
                }
                if matches!(&best, Some(b) if b.pts_us == target_pts_us) {
                    return best;
                }
            }
            if self.decoder.queue_depth() == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    target_us = target_pts_us,
                    "Timed out waiting for sought frame; using nearest available"
                );
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        if let Some(b) = &best {
            if b.pts_us != target_pts_us {
                warn!(
                    target_us = target_pts_us,
                    got_us = b.pts_us,
                    "Seek fallback: nearest decoded frame"
                );
            }
        }
        best
    }

    /// Queue an asynchronous seek. A newer request replaces any pending
    /// one — the superseded target's work is discarded, never displayed.
    pub fn request_seek(&mut self, target: TimeCode) {
        self.seek_generation += 1;
        if let Some(old) = self.pending_seek.replace(target) {
            debug!(
                superseded_secs = old.as_secs(),
                new_secs = target.as_secs(),
                "Pending seek superseded"
            );
        }
    }

    /// Run the latest pending seek, if any. Returns whether a seek ran.
    pub fn poll_seek(&mut self) -> Result<bool, DecodeError> {
        match self.pending_seek.take() {
            Some(target) => {
                self.seek(target)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Export mode ─────────────────────────────────────────────────

    /// Enter sequential-export mode. Decoding switches from
    /// keep-only-current to buffer-everything-by-presentation-time.
    pub fn begin_export(&mut self, config: ExportConfig) -> Result<(), DecodeError> {
        self.guard_not_destroyed()?;
        if self.table.is_none() {
            return Err(DecodeError::NotConfigured);
        }
        self.state = SourceState::ExportPreparing;
        self.export = Some(ExportSession::new(config));
        self.decoder.reset();
        self.decoder
            .configure(self.info.as_ref().expect("table implies info"))?;
        self.state = SourceState::Exporting;
        debug!("Export mode entered");
        Ok(())
    }

    /// Fetch the decoded frame nearest a presentation time, batching
    /// decodes and buffering output as needed.
    pub fn export_frame_nearest(&mut self, target: TimeCode) -> Result<DecodedFrame, DecodeError> {
        if self.state != SourceState::Exporting {
            return Err(DecodeError::NotConfigured);
        }
        let table = self.table.as_ref().expect("exporting implies table");
        let info = self.info.as_ref().expect("exporting implies info");
        let session = self.export.as_mut().expect("exporting implies session");
        session.frame_nearest(target, table, info, self.decoder.as_mut(), &self.timeouts)
    }

    /// Cancellation flag shared with whoever drives the export.
    pub fn export_cancel_flag(&self) -> Option<std::sync::Arc<std::sync::atomic::AtomicBool>> {
        self.export.as_ref().map(|s| s.cancel_flag())
    }

    /// Leave export mode and return to normal playback decoding.
    pub fn end_export(&mut self) -> Result<(), DecodeError> {
        self.guard_not_destroyed()?;
        if let Some(session) = self.export.take() {
            debug!(buffered = session.buffered_len(), "Export mode left");
        }
        self.decoder.reset();
        if let Some(info) = &self.info {
            self.decoder.configure(info)?;
            self.state = SourceState::Ready;
        } else {
            self.state = SourceState::Unloaded;
        }
        Ok(())
    }

    /// Tear down. Every later operation fails with a typed error.
    pub fn destroy(&mut self) {
        self.decoder.reset();
        self.export = None;
        self.current = None;
        self.state = SourceState::Destroyed;
    }

    fn guard_not_destroyed(&self) -> Result<(), DecodeError> {
        if self.state == SourceState::Destroyed {
            Err(DecodeError::Destroyed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RawFrameDecoder;
    use fl_common::color::PixelFormat;
    use fl_common::types::{Rational, Resolution};

    /// Provider that yields a 10-sample RGBA stream with sync points at
    /// samples 0 and 5 and a B-frame-style reorder, after `delay_polls`
    /// polls.
    pub(crate) struct TestProvider {
        delay_polls: usize,
        polls: usize,
    }

    impl TestProvider {
        pub(crate) fn new(delay_polls: usize) -> Self {
            Self {
                delay_polls,
                polls: 0,
            }
        }
    }

    pub(crate) fn test_stream() -> (VideoStreamInfo, Vec<Sample>) {
        let info = VideoStreamInfo {
            codec: "rgba".to_string(),
            resolution: Resolution::new(2, 2),
            fps: Rational::FPS_30,
            duration: TimeCode::from_secs(0.01),
            timescale: 1_000_000,
            pixel_format: PixelFormat::Rgba8,
            extra_data: Vec::new(),
        };
        // Decode order with pts permuted inside each GOP; display times are
        // 0..=9 ms. Payload fill byte = pts / 1000 identifies the frame.
        let spec: [(i64, bool); 10] = [
            (0, true),
            (3000, false),
            (1000, false),
            (2000, false),
            (4000, false),
            (5000, true),
            (8000, false),
            (6000, false),
            (7000, false),
            (9000, false),
        ];
        let samples = spec
            .iter()
            .enumerate()
            .map(|(i, &(pts, is_sync))| Sample {
                decode_index: i,
                pts,
                duration: 1000,
                is_sync,
                data: vec![(pts / 1000) as u8; 2 * 2 * 4],
            })
            .collect();
        (info, samples)
    }

    impl StreamProvider for TestProvider {
        fn poll_stream(&mut self) -> Option<(VideoStreamInfo, Vec<Sample>)> {
            self.polls += 1;
            if self.polls > self.delay_polls {
                Some(test_stream())
            } else {
                None
            }
        }
    }

    fn open_source() -> VideoSource {
        let mut source = VideoSource::new(
            Box::new(RawFrameDecoder::new()),
            SourceTimeouts::default(),
        );
        source.open(&mut TestProvider::new(2)).unwrap();
        source
    }

    #[test]
    fn open_reaches_ready_with_first_frame() {
        let source = open_source();
        assert_eq!(source.state(), SourceState::Ready);
        let frame = source.current_frame().unwrap();
        assert_eq!(frame.pts_us, 0);
        assert_eq!(frame.data[0], 0);
    }

    #[test]
    fn metadata_timeout_degrades() {
        let timeouts = SourceTimeouts {
            metadata: Duration::from_millis(20),
            ..Default::default()
        };
        let mut source = VideoSource::new(Box::new(RawFrameDecoder::new()), timeouts);
        // Provider that never delivers.
        struct Never;
        impl StreamProvider for Never {
            fn poll_stream(&mut self) -> Option<(VideoStreamInfo, Vec<Sample>)> {
                None
            }
        }
        let err = source.open(&mut Never).unwrap_err();
        assert!(matches!(err, DecodeError::ConfigureFailed { .. }));
        assert_eq!(source.state(), SourceState::Unloaded);
    }

    #[test]
    fn unsupported_codec_fails_configure() {
        let mut source = VideoSource::new(
            Box::new(RawFrameDecoder::new()),
            SourceTimeouts::default(),
        );
        struct BadCodec;
        impl StreamProvider for BadCodec {
            fn poll_stream(&mut self) -> Option<(VideoStreamInfo, Vec<Sample>)> {
                let (mut info, samples) = test_stream();
                info.codec = "av99".to_string();
                Some((info, samples))
            }
        }
        let err = source.open(&mut BadCodec).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCodec { .. }));
    }

    #[test]
    fn seek_lands_on_exact_frame_despite_reorder() {
        let mut source = open_source();
        // 3.5ms sits between pts 3000 and 4000; nearest-down wins ties.
        source.seek(TimeCode::from_secs(0.0035)).unwrap();
        let frame = source.current_frame().unwrap();
        assert_eq!(frame.pts_us, 3000);
        assert_eq!(frame.data[0], 3);
    }

    #[test]
    fn seek_monotonicity_roundtrip() {
        let mut source = open_source();
        source.seek(TimeCode::from_secs(0.0035)).unwrap();
        let first = source.current_frame().unwrap().clone();
        source.seek(TimeCode::from_secs(0.0012)).unwrap();
        assert_eq!(source.current_frame().unwrap().pts_us, 1000);
        source.seek(TimeCode::from_secs(0.0035)).unwrap();
        let second = source.current_frame().unwrap();
        assert_eq!(first.pts_us, second.pts_us);
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn seek_into_second_gop_starts_at_its_sync() {
        let mut source = open_source();
        source.seek(TimeCode::from_secs(0.007)).unwrap();
        let frame = source.current_frame().unwrap();
        assert_eq!(frame.pts_us, 7000);
        assert_eq!(frame.data[0], 7);
    }

    #[test]
    fn seek_boundaries_clamp() {
        let mut source = open_source();
        source.seek(TimeCode::from_secs(-1.0)).unwrap();
        assert_eq!(source.current_frame().unwrap().pts_us, 0);
        source.seek(TimeCode::from_secs(100.0)).unwrap();
        assert_eq!(source.current_frame().unwrap().pts_us, 9000);
    }

    #[test]
    fn play_pause_transitions() {
        let mut source = open_source();
        source.play();
        assert_eq!(source.state(), SourceState::Playing);
        source.pause();
        assert_eq!(source.state(), SourceState::Paused);
        // Seeking from Playing returns to Playing.
        source.play();
        source.seek(TimeCode::from_secs(0.002)).unwrap();
        assert_eq!(source.state(), SourceState::Playing);
    }

    #[test]
    fn pending_seek_supersession() {
        let mut source = open_source();
        source.request_seek(TimeCode::from_secs(0.001));
        source.request_seek(TimeCode::from_secs(0.004));
        assert!(source.poll_seek().unwrap());
        // Only the newest target ran.
        assert_eq!(source.current_frame().unwrap().pts_us, 4000);
        assert!(!source.poll_seek().unwrap());
    }

    #[test]
    fn destroyed_source_rejects_operations() {
        let mut source = open_source();
        source.destroy();
        assert_eq!(source.state(), SourceState::Destroyed);
        assert!(matches!(
            source.seek(TimeCode::ZERO).unwrap_err(),
            DecodeError::Destroyed
        ));
        assert!(source.current_frame().is_none());
    }
}
