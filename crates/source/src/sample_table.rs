//! Sample table: decode-order storage with a presentation-order index.
//!
//! Samples are stored exactly as the stream carries them (decode order);
//! a separately sorted index maps presentation timestamps back to decode
//! positions. Seeking resolves a target time to the nearest presentation
//! timestamp, then walks back to the preceding sync sample, because only
//! sync samples are decodable without reference frames.

use fl_common::error::StreamError;
use fl_common::sample::Sample;

/// Pre-computed lookup structure over one stream's samples.
pub struct SampleTable {
    /// Samples in decode order.
    samples: Vec<Sample>,
    /// Decode indices sorted by presentation timestamp.
    presentation: Vec<usize>,
}

impl SampleTable {
    /// Build the table. The first sample must be a sync sample; decode
    /// indices must match storage order.
    pub fn build(samples: Vec<Sample>) -> Result<Self, StreamError> {
        if samples.is_empty() {
            return Err(StreamError::EmptyStream);
        }
        for (i, s) in samples.iter().enumerate() {
            if s.decode_index != i {
                return Err(StreamError::InvalidSampleTable(format!(
                    "sample {i} carries decode_index {}",
                    s.decode_index
                )));
            }
        }
        if !samples[0].is_sync {
            return Err(StreamError::InvalidSampleTable(
                "first sample is not a sync sample".to_string(),
            ));
        }
        let mut presentation: Vec<usize> = (0..samples.len()).collect();
        presentation.sort_by_key(|&i| samples[i].pts);
        Ok(Self {
            samples,
            presentation,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample(&self, decode_index: usize) -> &Sample {
        &self.samples[decode_index]
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Presentation timestamps of the first and last displayed samples.
    pub fn pts_range(&self) -> (i64, i64) {
        let first = self.samples[*self.presentation.first().expect("non-empty")].pts;
        let last = self.samples[*self.presentation.last().expect("non-empty")].pts;
        (first, last)
    }

    /// Decode index of the sample whose presentation timestamp is nearest
    /// the target. Targets before the first or past the last sample clamp
    /// to the nearest valid sample.
    pub fn nearest_by_pts(&self, target: i64) -> usize {
        let pos = self
            .presentation
            .partition_point(|&i| self.samples[i].pts < target);
        if pos == 0 {
            return self.presentation[0];
        }
        if pos >= self.presentation.len() {
            return *self.presentation.last().expect("non-empty");
        }
        let before = self.presentation[pos - 1];
        let after = self.presentation[pos];
        if target - self.samples[before].pts <= self.samples[after].pts - target {
            before
        } else {
            after
        }
    }

    /// Nearest sync sample at or before a decode position. The table
    /// guarantees sample 0 is sync, so this always resolves.
    pub fn sync_at_or_before(&self, decode_index: usize) -> usize {
        let idx = decode_index.min(self.samples.len() - 1);
        (0..=idx)
            .rev()
            .find(|&i| self.samples[i].is_sync)
            .expect("sample 0 is sync")
    }

    /// Next sync sample strictly after a decode position, if any.
    pub fn next_sync_after(&self, decode_index: usize) -> Option<usize> {
        self.samples
            .iter()
            .skip(decode_index + 1)
            .position(|s| s.is_sync)
            .map(|off| decode_index + 1 + off)
    }

    /// Largest presentation timestamp among samples up to and including a
    /// decode position. Used to know how far a decoded batch can display.
    pub fn max_pts_through(&self, decode_index: usize) -> i64 {
        let idx = decode_index.min(self.samples.len() - 1);
        self.samples[..=idx]
            .iter()
            .map(|s| s.pts)
            .max()
            .expect("non-empty")
    }
}
