use crate::pcm::i16_to_f32;

const MIN_CAPACITY: usize = 1024;

/// Growable float buffer that collects interleaved input until WSOLA can
/// consume a full window.
///
/// Capacity doubles when a push does not fit, so the O(n) copy of a
/// reallocation happens only a logarithmic number of times per stream. In
/// steady state the buffer is compacted in place and never reallocates.
#[derive(Debug, Clone)]
pub(crate) struct SampleAccumulator {
    data: Vec<f32>,
    len: usize,
}

impl SampleAccumulator {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(MIN_CAPACITY)],
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn as_slice(&self) -> &[f32] {
        &self.data[..self.len]
    }

    /// Appends 16-bit samples, normalising them to `[-1, 1)`.
    pub(crate) fn extend_from_pcm(&mut self, samples: &[i16]) {
        self.reserve(samples.len());
        for (slot, &sample) in self.data[self.len..].iter_mut().zip(samples) {
            *slot = i16_to_f32(sample);
        }
        self.len += samples.len();
    }

    /// Drops the first `count` samples, shifting the rest to the front.
    pub(crate) fn discard_front(&mut self, count: usize) {
        let count = count.min(self.len);
        if count == 0 {
            return;
        }
        self.data.copy_within(count..self.len, 0);
        self.len -= count;
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        let capacity = self.capacity();
        if required <= capacity {
            return;
        }
        let grown = (capacity * 2).max(required);
        tracing::debug!(from = capacity, to = grown, "growing stretch accumulator");
        self.data.resize(grown, 0.0);
    }
}
