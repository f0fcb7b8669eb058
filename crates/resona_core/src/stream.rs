//! Audio Output
//!
//! Owns the thread that drives a [`GraphProcessor`]. In `Device` mode the
//! thread builds a cpal output stream on the default device and parks until
//! shutdown (cpal streams are not `Send` on every host, so the stream never
//! leaves its thread). In `Null` mode the thread calls the processor itself,
//! paced by the block length, and discards the audio.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::config::{OutputMode, StreamConfig};
use crate::error::{EngineError, EngineResult};
use crate::graph::GraphProcessor;

/// Running output; dropping it stops the audio thread
pub struct OutputStream {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    mode: OutputMode,
    config: StreamConfig,
}

impl OutputStream {
    /// Start driving `processor`; returns once audio is flowing
    pub fn open(
        config: &StreamConfig,
        mode: OutputMode,
        processor: GraphProcessor,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::ConfigError)?;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<EngineResult<()>>(1);
        let thread_config = config.clone();

        let thread = match mode {
            OutputMode::Device => thread::Builder::new()
                .name("resona-output".into())
                .spawn(move || device_thread(thread_config, processor, ready_tx, shutdown_rx)),
            OutputMode::Null => thread::Builder::new()
                .name("resona-null-output".into())
                .spawn(move || null_thread(thread_config, processor, ready_tx, shutdown_rx)),
        }
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))?;

        let started = ready_rx
            .recv()
            .map_err(|_| EngineError::StreamBuildError("output thread exited".to_string()))
            .and_then(|r| r);

        if let Err(e) = started {
            let _ = thread.join();
            return Err(e);
        }

        info!(
            "Output started ({:?}, {}Hz, {} ch, ~{:.1}ms blocks)",
            mode,
            config.sample_rate,
            config.channels,
            config.latency_ms()
        );

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            mode,
            config: config.clone(),
        })
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Output thread panicked");
            }
        }
        debug!("Output stopped");
    }
}

fn device_thread(
    config: StreamConfig,
    processor: GraphProcessor,
    ready: Sender<EngineResult<()>>,
    shutdown: Receiver<()>,
) {
    let stream = match build_device_stream(&config, processor) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(EngineError::StreamPlayError(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    // Park until the owner drops us; the stream dies with this frame
    let _ = shutdown.recv();
    drop(stream);
}

fn build_device_stream(
    config: &StreamConfig,
    mut processor: GraphProcessor,
) -> EngineResult<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(EngineError::NoDevicesFound)?;

    if let Ok(name) = device.name() {
        debug!("Using output device: {}", name);
    }

    let cpal_config = CpalStreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_output_stream(
            &cpal_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Real-time audio callback - NO allocations allowed here
                processor.process(data);
            },
            move |err| {
                error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}

fn null_thread(
    config: StreamConfig,
    mut processor: GraphProcessor,
    ready: Sender<EngineResult<()>>,
    shutdown: Receiver<()>,
) {
    let mut block = vec![0.0f32; config.buffer_size as usize * config.channels as usize];
    let period = Duration::from_secs_f64(config.buffer_size as f64 / config.sample_rate as f64);
    let _ = ready.send(Ok(()));

    loop {
        match shutdown.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => processor.process(&mut block),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EffectGraph;
    use crate::source::SourceBuffer;
    use std::sync::Arc;

    #[test]
    fn test_null_output_drives_graph() {
        let config = StreamConfig::default();
        let (mut graph, processor) = EffectGraph::new(config.sample_rate, 2, 64, 30).unwrap();
        let output = OutputStream::open(&config, OutputMode::Null, processor).unwrap();
        assert_eq!(output.mode(), OutputMode::Null);

        let source = SourceBuffer::from_interleaved(vec![0.1; 480 * 2], 2, 48000).unwrap();
        graph.connect(Arc::new(source), 0.0, 0);

        // The 10ms source is exhausted after a couple of blocks
        let mut collected = 0;
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(10));
            collected += graph.collect_garbage();
            if collected > 0 {
                break;
            }
        }
        assert_eq!(collected, 1);

        drop(output);
        assert!(graph.is_detached());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StreamConfig {
            buffer_size: 1,
            ..Default::default()
        };
        let (_graph, processor) = EffectGraph::new(48000, 2, 64, 30).unwrap();
        assert!(matches!(
            OutputStream::open(&config, OutputMode::Null, processor),
            Err(EngineError::ConfigError(_))
        ));
    }

    // Hardware-dependent tests
    #[test]
    #[ignore = "requires audio hardware"]
    fn test_device_output() {
        let config = StreamConfig::default();
        let (_graph, processor) = EffectGraph::new(config.sample_rate, 2, 64, 30).unwrap();
        if let Ok(output) = OutputStream::open(&config, OutputMode::Device, processor) {
            assert_eq!(output.config().sample_rate, 48000);
        }
    }
}
