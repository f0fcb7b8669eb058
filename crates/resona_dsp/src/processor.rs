//! Processing Stages
//!
//! [`AudioProcessor`] is one stage of a stereo signal path; [`StageChain`]
//! runs a fixed sequence of them over a buffer in blocks of
//! [`ProcessContext::block_frames`]. The offline renderer builds its path
//! from these:
//!
//! ```text
//! Low Shelf -> Pitch Shift -> Convolution Reverb -> Gain
//! ```

/// Format of the buffers handed to a stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub channels: usize,
    /// Largest block a stage sees in one call
    pub block_frames: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: f32, channels: usize, block_frames: usize) -> Self {
        Self {
            sample_rate,
            channels,
            block_frames,
        }
    }

    /// Interleaved samples per full block
    pub fn block_len(&self) -> usize {
        self.block_frames.max(1) * self.channels.max(1)
    }

    pub fn frames_in(&self, buffer: &[f32]) -> usize {
        buffer.len() / self.channels.max(1)
    }
}

/// One stage of a stereo signal path
///
/// # Real-time Safety Contract
///
/// Stages used on the live path MUST NOT allocate, lock or block in
/// `process()`. Offline-only stages (the convolution reverb) are exempt and
/// say so.
pub trait AudioProcessor: Send {
    /// Process an interleaved stereo block in place: `[L0, R0, L1, R1, ...]`
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext);

    /// Clear delay lines and filter memories
    fn reset(&mut self);

    fn name(&self) -> &'static str;

    /// False when the stage would pass audio through untouched
    fn is_active(&self) -> bool {
        true
    }
}

/// Fixed sequence of stages
pub struct StageChain {
    stages: Vec<Box<dyn AudioProcessor>>,
    context: ProcessContext,
}

impl StageChain {
    pub fn new(context: ProcessContext) -> Self {
        Self {
            stages: Vec::new(),
            context,
        }
    }

    /// Append a stage (allocates; build the chain before processing)
    pub fn add<P: AudioProcessor + 'static>(&mut self, stage: P) {
        self.stages.push(Box::new(stage));
    }

    /// Run every active stage over `buffer`, one block at a time
    ///
    /// Each block passes through the whole chain before the next starts, so
    /// stateful stages see a continuous stream.
    pub fn process(&mut self, buffer: &mut [f32]) {
        let block_len = self.context.block_len();
        for block in buffer.chunks_mut(block_len) {
            for stage in &mut self.stages {
                if stage.is_active() {
                    stage.process(block, &self.context);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Stage names in order
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Names of the stages that will touch the signal
    pub fn active_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.name())
            .collect()
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Gain;
    use std::sync::{Arc, Mutex};

    /// Records the length of every block it is given
    struct BlockProbe(Arc<Mutex<Vec<usize>>>);

    impl AudioProcessor for BlockProbe {
        fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
            self.0.lock().unwrap().push(buffer.len());
        }

        fn reset(&mut self) {}

        fn name(&self) -> &'static str {
            "Probe"
        }
    }

    /// Silences everything, but reports itself inactive
    struct Muted;

    impl AudioProcessor for Muted {
        fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
            buffer.fill(0.0);
        }

        fn reset(&mut self) {}

        fn name(&self) -> &'static str {
            "Muted"
        }

        fn is_active(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let mut chain = StageChain::new(ProcessContext::new(44100.0, 2, 64));
        assert!(chain.is_empty());

        let mut buffer = vec![0.5, -0.5];
        chain.process(&mut buffer);
        assert_eq!(buffer, vec![0.5, -0.5]);
    }

    #[test]
    fn test_stages_apply_in_order() {
        let mut chain = StageChain::new(ProcessContext::new(44100.0, 2, 64));
        chain.add(Gain::new(0.5));
        chain.add(Gain::new(0.5));

        let mut buffer = vec![1.0, -1.0];
        chain.process(&mut buffer);
        assert_eq!(buffer, vec![0.25, -0.25]);
        assert_eq!(chain.names(), vec!["Gain", "Gain"]);
    }

    #[test]
    fn test_inactive_stage_is_skipped() {
        let mut chain = StageChain::new(ProcessContext::new(44100.0, 2, 64));
        chain.add(Muted);
        chain.add(Gain::new(0.5));

        let mut buffer = vec![1.0, -1.0];
        chain.process(&mut buffer);
        assert_eq!(buffer, vec![0.5, -0.5]);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.active_names(), vec!["Gain"]);
    }

    #[test]
    fn test_buffer_split_into_blocks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = StageChain::new(ProcessContext::new(48000.0, 2, 4));
        chain.add(BlockProbe(seen.clone()));

        // 10 frames in blocks of 4: 4 + 4 + 2
        let mut buffer = vec![0.0; 20];
        chain.process(&mut buffer);
        assert_eq!(*seen.lock().unwrap(), vec![8, 8, 4]);
    }

    #[test]
    fn test_context_sizes() {
        let ctx = ProcessContext::new(48000.0, 2, 512);
        assert_eq!(ctx.block_len(), 1024);
        assert_eq!(ctx.frames_in(&[0.0; 6]), 3);
    }
}
