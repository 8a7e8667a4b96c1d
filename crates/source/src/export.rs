//! Sequential-export decoding.
//!
//! Reset-per-frame seeking is prohibitively slow for export, so export mode
//! decodes forward in batches and buffers *every* decoded frame keyed by
//! presentation time. A batch runs from a sync sample through the next sync
//! sample plus a reorder margin, because forward-referencing frames need
//! future reference frames before they resolve. Lookups binary-search the
//! buffered presentation timeline for the nearest frame; frames safely
//! behind the read cursor are evicted to bound memory.
//!
//! Decode-and-flush tolerates decoders that do not emit synchronously:
//! after a flush the output queue is polled with a timeout proportional to
//! the batch size, and on timeout the nearest available frame is served
//! with a logged fallback — never a silent wrong frame, never an
//! indefinite block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use tracing::{debug, warn};

use fl_common::config::SourceTimeouts;
use fl_common::error::DecodeError;
use fl_common::sample::{DecodedFrame, VideoStreamInfo};
use fl_common::types::TimeCode;

use crate::decoder::VideoDecoder;
use crate::sample_table::SampleTable;

/// Export tuning knobs.
#[derive(Clone, Debug)]
pub struct ExportConfig {
    /// Samples decoded past the next sync point, covering the decoder's
    /// maximum reorder depth.
    pub reorder_margin: usize,
    /// How much presentation time to keep buffered behind the read cursor.
    pub evict_behind_us: i64,
    /// When the buffered tail is within this lead of the cursor, the next
    /// batch is decoded proactively.
    pub proactive_lead_us: i64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            reorder_margin: 8,
            evict_behind_us: 1_000_000,
            proactive_lead_us: 100_000,
        }
    }
}

/// Progress events emitted over the export channel.
#[derive(Clone, Debug)]
pub enum ExportProgress {
    Started { total_samples: usize },
    BatchDecoded { first_sample: usize, last_sample: usize },
    FrameReady { pts_us: i64 },
    Cancelled,
}

/// Buffered sequential-export state for one source.
pub struct ExportSession {
    config: ExportConfig,
    /// Decoded frames keyed by presentation microseconds.
    buffer: HashMap<i64, DecodedFrame>,
    /// Sorted key index; rebuilt to match the map after every
    /// decode-and-flush and every eviction.
    index: Vec<i64>,
    /// Highest decode index fed to the decoder, if any.
    fed_through: Option<usize>,
    /// Read cursor (presentation microseconds of the last served frame).
    cursor_us: i64,
    cancel: Arc<AtomicBool>,
    progress: Option<Sender<ExportProgress>>,
    started_emitted: bool,
}

impl ExportSession {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            buffer: HashMap::new(),
            index: Vec::new(),
            fed_through: None,
            cursor_us: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
            started_emitted: false,
        }
    }

    pub fn with_progress(mut self, sender: Sender<ExportProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Shared cancellation flag; checked at batch boundaries and inside the
    /// per-sample feed loop.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Presentation time of the last served frame.
    pub fn cursor_us(&self) -> i64 {
        self.cursor_us
    }

    /// Buffered presentation range, if anything is buffered.
    pub fn buffered_range_us(&self) -> Option<(i64, i64)> {
        match (self.index.first(), self.index.last()) {
            (Some(&a), Some(&b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Sorted key index (exposed for invariant checks in tests).
    pub fn index_keys(&self) -> &[i64] {
        &self.index
    }

    fn emit(&self, event: ExportProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    /// Serve the decoded frame nearest `target`, decoding batches as
    /// needed.
    pub fn frame_nearest(
        &mut self,
        target: TimeCode,
        table: &SampleTable,
        info: &VideoStreamInfo,
        decoder: &mut dyn VideoDecoder,
        timeouts: &SourceTimeouts,
    ) -> Result<DecodedFrame, DecodeError> {
        if self.cancel.load(Ordering::SeqCst) {
            self.emit(ExportProgress::Cancelled);
            return Err(DecodeError::Cancelled);
        }
        if !self.started_emitted {
            self.started_emitted = true;
            self.emit(ExportProgress::Started {
                total_samples: table.len(),
            });
        }

        let target_ticks = info.secs_to_ticks(target.as_secs().max(0.0));
        let target_idx = table.nearest_by_pts(target_ticks);
        let target_pts_us = info.ticks_to_micros(table.sample(target_idx).pts);

        if !self.buffer.contains_key(&target_pts_us) {
            self.ensure_batch_for(target_idx, table, info, decoder, timeouts)?;
        }

        // Proactive decode: keep the buffered tail comfortably ahead of the
        // read cursor so the next sequential request doesn't stall.
        if let (Some(fed), Some((_, tail_us))) = (self.fed_through, self.buffered_range_us()) {
            if fed + 1 < table.len() && tail_us - target_pts_us < self.config.proactive_lead_us {
                let start = fed + 1;
                let end = batch_end(table, start, self.config.reorder_margin);
                self.decode_batch(start, end, table, decoder, timeouts)?;
            }
        }

        // Evict frames safely behind the cursor.
        let keep_from = target_pts_us - self.config.evict_behind_us;
        let before = self.buffer.len();
        self.buffer.retain(|&pts, _| pts >= keep_from);
        if self.buffer.len() != before {
            self.rebuild_index();
        }

        self.cursor_us = target_pts_us;

        // Nearest-by-presentation binary search over the sorted index.
        let found_pts = match nearest_key(&self.index, target_pts_us) {
            Some(pts) => pts,
            None => {
                return Err(DecodeError::SampleFailed {
                    sample: target_idx,
                    reason: "no frames buffered after decode".to_string(),
                });
            }
        };
        if found_pts != target_pts_us {
            warn!(
                target_us = target_pts_us,
                got_us = found_pts,
                "Export fallback: serving nearest buffered frame"
            );
        }
        self.emit(ExportProgress::FrameReady { pts_us: found_pts });
        Ok(self
            .buffer
            .get(&found_pts)
            .expect("index key present in buffer")
            .clone())
    }

    /// Make sure the batch containing `target_idx` has been decoded.
    fn ensure_batch_for(
        &mut self,
        target_idx: usize,
        table: &SampleTable,
        info: &VideoStreamInfo,
        decoder: &mut dyn VideoDecoder,
        timeouts: &SourceTimeouts,
    ) -> Result<(), DecodeError> {
        let sync_idx = table.sync_at_or_before(target_idx);
        let end = batch_end(table, target_idx, self.config.reorder_margin);

        let sequential_start = self.fed_through.map(|f| f + 1);
        match sequential_start {
            // Forward continuation: feed from where we left off, no reset.
            Some(start) if start <= end && sync_idx < start => {
                self.decode_batch(start, end, table, decoder, timeouts)
            }
            // Backward jump or a gap: restart cleanly from the sync sample.
            _ => {
                if self
                    .fed_through
                    .map(|f| sync_idx > f + 1 || end <= f)
                    .unwrap_or(false)
                {
                    debug!(sync_idx, "Export restarting decoder at sync point");
                }
                decoder.reset();
                decoder.configure(info)?;
                self.decode_batch(sync_idx, end, table, decoder, timeouts)
            }
        }
    }

    /// Feed samples `start..=end` in decode order, flush, and buffer every
    /// emitted frame. The sorted index is rebuilt to match the buffer's key
    /// set exactly before returning.
    fn decode_batch(
        &mut self,
        start: usize,
        end: usize,
        table: &SampleTable,
        decoder: &mut dyn VideoDecoder,
        timeouts: &SourceTimeouts,
    ) -> Result<(), DecodeError> {
        let end = end.min(table.len() - 1);
        debug!(start, end, "Export decoding batch");

        for idx in start..=end {
            if self.cancel.load(Ordering::SeqCst) {
                self.emit(ExportProgress::Cancelled);
                return Err(DecodeError::Cancelled);
            }
            if let Err(e) = decoder.submit(table.sample(idx)) {
                // Transient per-sample failures do not abort the batch.
                warn!(sample = idx, error = %e, "Skipping sample during export batch");
            }
        }
        decoder.flush()?;

        let batch_len = (end - start + 1) as u32;
        let deadline = Instant::now() + flush_budget(timeouts, batch_len);
        loop {
            while let Some(frame) = decoder.poll_frame() {
                self.buffer.insert(frame.pts_us, frame);
            }
            if decoder.queue_depth() == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    start,
                    end,
                    pending = decoder.queue_depth(),
                    "Decoder flush timed out; continuing with buffered frames"
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        self.fed_through = Some(self.fed_through.map_or(end, |f| f.max(end)));
        self.rebuild_index();
        self.emit(ExportProgress::BatchDecoded {
            first_sample: start,
            last_sample: end,
        });
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index = self.buffer.keys().copied().collect();
        self.index.sort_unstable();
    }
}

/// End of the batch containing `idx`: the next sync point plus the reorder
/// margin, clamped to the stream tail.
fn batch_end(table: &SampleTable, idx: usize, margin: usize) -> usize {
    match table.next_sync_after(idx) {
        Some(sync) => (sync + margin).min(table.len() - 1),
        None => table.len() - 1,
    }
}

/// Flush-wait budget proportional to the batch size.
fn flush_budget(timeouts: &SourceTimeouts, batch_len: u32) -> Duration {
    timeouts.flush_per_sample * batch_len.max(1)
}

/// Nearest value in a sorted slice.
fn nearest_key(sorted: &[i64], target: i64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = sorted.partition_point(|&k| k < target);
    if pos == 0 {
        return Some(sorted[0]);
    }
    if pos >= sorted.len() {
        return Some(sorted[sorted.len() - 1]);
    }
    let before = sorted[pos - 1];
    let after = sorted[pos];
    if target - before <= after - target {
        Some(before)
    } else {
        Some(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RawFrameDecoder;
    use crate::state::SourceState;
    use crate::VideoSource;
    use crossbeam::channel::unbounded;
    use fl_common::color::PixelFormat;
    use fl_common::sample::Sample;
    use fl_common::types::{Rational, Resolution};

    fn test_stream() -> (VideoStreamInfo, Vec<Sample>) {
        let info = VideoStreamInfo {
            codec: "rgba".to_string(),
            resolution: Resolution::new(2, 2),
            fps: Rational::FPS_30,
            duration: TimeCode::from_secs(0.01),
            timescale: 1_000_000,
            pixel_format: PixelFormat::Rgba8,
            extra_data: Vec::new(),
        };
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

    struct Provider;
    impl crate::state::StreamProvider for Provider {
        fn poll_stream(&mut self) -> Option<(VideoStreamInfo, Vec<Sample>)> {
            Some(test_stream())
        }
    }

    fn exporting_source(config: ExportConfig) -> VideoSource {
        let mut source = VideoSource::new(
            Box::new(RawFrameDecoder::new()),
            SourceTimeouts::default(),
        );
        source.open(&mut Provider).unwrap();
        source.begin_export(config).unwrap();
        source
    }

    #[test]
    fn batch_covers_sync_to_next_sync_plus_margin() {
        // Sync points at samples 0 and 5; requesting sample 7's time must
        // decode from sample 5 through at least sample 9.
        let mut source = exporting_source(ExportConfig::default());
        let frame = source
            .export_frame_nearest(TimeCode::from_secs(0.007))
            .unwrap();
        assert_eq!(frame.pts_us, 7000);
        assert_eq!(frame.data[0], 7);
        assert_eq!(source.state(), SourceState::Exporting);
    }

    #[test]
    fn session_buffers_whole_batch() {
        let (info, samples) = test_stream();
        let table = SampleTable::build(samples).unwrap();
        let mut decoder = RawFrameDecoder::new();
        decoder.configure(&info).unwrap();
        let mut session = ExportSession::new(ExportConfig {
            evict_behind_us: i64::MAX,
            ..Default::default()
        });

        let frame = session
            .frame_nearest(
                TimeCode::from_secs(0.007),
                &table,
                &info,
                &mut decoder,
                &SourceTimeouts::default(),
            )
            .unwrap();
        assert_eq!(frame.pts_us, 7000);
        // The whole second GOP (samples 5..=9, pts 5000..=9000) is buffered.
        for pts in [5000i64, 6000, 7000, 8000, 9000] {
            assert!(session.index_keys().contains(&pts), "missing {pts}");
        }
        // Index mirrors the buffer exactly and is sorted.
        assert_eq!(session.index_keys().len(), session.buffered_len());
        let mut sorted = session.index_keys().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, session.index_keys());
    }

    #[test]
    fn sequential_requests_extend_without_reset() {
        let (info, samples) = test_stream();
        let table = SampleTable::build(samples).unwrap();
        let mut decoder = RawFrameDecoder::new();
        decoder.configure(&info).unwrap();
        let mut session = ExportSession::new(ExportConfig {
            reorder_margin: 2,
            evict_behind_us: i64::MAX,
            proactive_lead_us: 0,
        });
        let timeouts = SourceTimeouts::default();

        for (secs, want_pts) in [(0.0, 0i64), (0.001, 1000), (0.006, 6000), (0.009, 9000)] {
            let frame = session
                .frame_nearest(TimeCode::from_secs(secs), &table, &info, &mut decoder, &timeouts)
                .unwrap();
            assert_eq!(frame.pts_us, want_pts, "at {secs}s");
        }
        // Everything decoded exactly once, covering the whole stream.
        assert_eq!(session.buffered_len(), 10);
    }

    #[test]
    fn eviction_behind_cursor_bounds_memory() {
        let (info, samples) = test_stream();
        let table = SampleTable::build(samples).unwrap();
        let mut decoder = RawFrameDecoder::new();
        decoder.configure(&info).unwrap();
        let mut session = ExportSession::new(ExportConfig {
            evict_behind_us: 2000,
            proactive_lead_us: 0,
            ..Default::default()
        });
        let timeouts = SourceTimeouts::default();

        session
            .frame_nearest(TimeCode::from_secs(0.0), &table, &info, &mut decoder, &timeouts)
            .unwrap();
        session
            .frame_nearest(TimeCode::from_secs(0.009), &table, &info, &mut decoder, &timeouts)
            .unwrap();
        // Frames more than 2000us behind the 9000us cursor are gone.
        let (min_pts, max_pts) = session.buffered_range_us().unwrap();
        assert!(min_pts >= 7000, "min buffered {min_pts}");
        assert_eq!(max_pts, 9000);
        assert_eq!(session.index_keys().len(), session.buffered_len());
    }

    #[test]
    fn backward_jump_restarts_from_sync() {
        let (info, samples) = test_stream();
        let table = SampleTable::build(samples).unwrap();
        let mut decoder = RawFrameDecoder::new();
        decoder.configure(&info).unwrap();
        let mut session = ExportSession::new(ExportConfig {
            evict_behind_us: 500,
            proactive_lead_us: 0,
            ..Default::default()
        });
        let timeouts = SourceTimeouts::default();

        session
            .frame_nearest(TimeCode::from_secs(0.009), &table, &info, &mut decoder, &timeouts)
            .unwrap();
        // Jump back to the first GOP; its frames were never buffered (or
        // were evicted), so the decoder restarts at sync sample 0.
        let frame = session
            .frame_nearest(TimeCode::from_secs(0.002), &table, &info, &mut decoder, &timeouts)
            .unwrap();
        assert_eq!(frame.pts_us, 2000);
        assert_eq!(frame.data[0], 2);
    }

    #[test]
    fn between_frames_serves_nearest() {
        let mut source = exporting_source(ExportConfig::default());
        let frame = source
            .export_frame_nearest(TimeCode::from_secs(0.00149))
            .unwrap();
        assert_eq!(frame.pts_us, 1000);
        let frame = source
            .export_frame_nearest(TimeCode::from_secs(0.00151))
            .unwrap();
        assert_eq!(frame.pts_us, 2000);
    }

    #[test]
    fn cancellation_stops_the_batch() {
        let mut source = exporting_source(ExportConfig::default());
        let cancel = source.export_cancel_flag().unwrap();
        cancel.store(true, Ordering::SeqCst);
        let err = source
            .export_frame_nearest(TimeCode::from_secs(0.007))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Cancelled));
    }

    #[test]
    fn progress_events_flow_through_channel() {
        let (info, samples) = test_stream();
        let table = SampleTable::build(samples).unwrap();
        let mut decoder = RawFrameDecoder::new();
        decoder.configure(&info).unwrap();
        let (tx, rx) = unbounded();
        let mut session = ExportSession::new(ExportConfig::default()).with_progress(tx);

        session
            .frame_nearest(
                TimeCode::from_secs(0.0),
                &table,
                &info,
                &mut decoder,
                &SourceTimeouts::default(),
            )
            .unwrap();
        let events: Vec<ExportProgress> = rx.try_iter().collect();
        assert!(matches!(events[0], ExportProgress::Started { total_samples: 10 }));
        assert!(events
            .iter()
            .any(|e| matches!(e, ExportProgress::BatchDecoded { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ExportProgress::FrameReady { pts_us: 0 })));
    }

    #[test]
    fn end_export_returns_to_ready() {
        let mut source = exporting_source(ExportConfig::default());
        source
            .export_frame_nearest(TimeCode::from_secs(0.003))
            .unwrap();
        source.end_export().unwrap();
        assert_eq!(source.state(), SourceState::Ready);
        // Normal seeking works again.
        source.seek(TimeCode::from_secs(0.004)).unwrap();
        assert_eq!(source.current_frame().unwrap().pts_us, 4000);
    }
}
