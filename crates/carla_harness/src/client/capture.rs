use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atomic_refcell::{AtomicRef, AtomicRefCell};

use super::*;
use crate::config::HarnessConfig;
use crate::ports::{PortPattern, MAX_AUDIO_PORTS};

/// Where one block sits in a [CaptureBuffer].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Engine cycle the block was recorded in.
    pub cycle: u64,
    pub channels: usize,
    pub frames: usize,

    /// Index of the block's first sample.  Samples are stored channel by channel within a block.
    pub offset: usize,
}

/// Blocks as the callback recorded them, appended in order.
///
/// The buffer never grows past the capacity it was made with, since it is filled from the audio thread.  Whatever
/// does not fit is dropped and the buffer is marked as overflowed.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    samples: Vec<f32>,
    blocks: Vec<BlockHeader>,
    frames: u64,
    overflowed: bool,
}

impl CaptureBuffer {
    /// Room for `frames` frames of `channels` channels.
    pub fn with_capacity(channels: usize, frames: usize) -> Self {
        Self {
            samples: Vec::with_capacity(channels * frames),
            // Engines rarely run blocks smaller than 32 frames.
            blocks: Vec::with_capacity(frames / 32 + 8),
            frames: 0,
            overflowed: false,
        }
    }

    /// Append a block, cut short to whatever room is left.  Returns false if any of it was dropped.
    pub fn push_block(&mut self, cycle: u64, inputs: &[&[f32]]) -> bool {
        let frames = inputs.first().map(|x| x.len()).unwrap_or(0);
        let room = self.samples.capacity() - self.samples.len();
        let fits = if self.blocks.len() == self.blocks.capacity() {
            0
        } else if inputs.is_empty() {
            frames
        } else {
            frames.min(room / inputs.len())
        };

        if fits < frames {
            self.overflowed = true;
        }
        if fits == 0 {
            return frames == 0;
        }

        let offset = self.samples.len();
        for channel in inputs {
            self.samples.extend_from_slice(&channel[..fits]);
        }
        self.blocks.push(BlockHeader {
            cycle,
            channels: inputs.len(),
            frames: fits,
            offset,
        });
        self.frames += fits as u64;
        fits == frames
    }

    /// Whether some audio was dropped for lack of room.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }

    /// The samples of channel `channel` of block `block`.
    pub fn block_channel(&self, block: &BlockHeader, channel: usize) -> &[f32] {
        let start = block.offset + channel * block.frames;
        &self.samples[start..start + block.frames]
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.blocks.clear();
        self.frames = 0;
        self.overflowed = false;
    }

    /// Join every block into one interleaved buffer.
    ///
    /// If the channel count changed along the way this is logged, and the result has as many channels as the widest
    /// block, with missing channels silent.  The blocks themselves stay available either way.
    pub fn concatenate(&self, sample_rate: u32) -> Result<CapturedAudio> {
        let Some(first) = self.blocks.first() else {
            return Err(Error::no_capture());
        };

        let channels = self.blocks.iter().map(|b| b.channels).max().unwrap_or(0);
        if let Some(odd) = self.blocks.iter().find(|b| b.channels != first.channels) {
            log::warn!(
                "Channel count changed from {} to {} in cycle {} of a capture",
                first.channels,
                odd.channels,
                odd.cycle
            );
        }

        let mut samples = vec![0.0f32; self.frames as usize * channels];
        let mut frame_base = 0;
        for block in self.blocks.iter() {
            for ch in 0..block.channels {
                for (i, s) in self.block_channel(block, ch).iter().enumerate() {
                    samples[(frame_base + i) * channels + ch] = *s;
                }
            }
            frame_base += block.frames;
        }

        Ok(CapturedAudio {
            samples,
            channels,
            sample_rate,
            first_cycle: first.cycle,
        })
    }
}

/// A finished capture.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedAudio {
    /// Interleaved.
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,

    /// Engine cycle of the first block.
    pub first_cycle: u64,
}

impl CapturedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        self.samples
            .iter()
            .copied()
            .skip(channel)
            .step_by(self.channels.max(1))
    }

    /// First frame in which any channel exceeds `threshold` in magnitude.
    pub fn first_frame_above(&self, threshold: f32) -> Option<usize> {
        self.samples
            .iter()
            .position(|s| s.abs() > threshold)
            .map(|i| i / self.channels.max(1))
    }

    /// Write a 32-bit float WAV file.  The format comes from the extension, and only `.wav` is supported.
    pub fn export(&self, path: &Path) -> Result<()> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return Err(Error::unsupported_export_format(path));
        }

        let spec = hound::WavSpec {
            channels: u16::try_from(self.channels)
                .map_err(|_| Error::backend(format!("{} channels will not fit in a WAV file", self.channels)))?,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for s in self.samples.iter() {
            writer.write_sample(*s)?;
        }
        writer.finalize()?;
        log::info!("Wrote {} frames to {}", self.frames(), path.display());
        Ok(())
    }
}

struct CaptureCallback {
    buffer: Arc<AtomicRefCell<CaptureBuffer>>,
    frames: Arc<AtomicU64>,
    overflowed: Arc<AtomicBool>,
    target_frames: Option<u64>,
}

impl ClientCallback for CaptureCallback {
    fn run(&mut self, cycle: &mut Cycle<'_>, shared: &ClientShared) {
        // Only the control thread could be holding it, and then only after deactivation.
        let Ok(mut buffer) = self.buffer.try_borrow_mut() else {
            return;
        };

        if !buffer.push_block(cycle.index(), cycle.audio_inputs()) {
            self.overflowed.store(true, Ordering::Relaxed);
        }
        let frames = buffer.frames();
        self.frames.store(frames, Ordering::Relaxed);

        if self.target_frames.is_some_and(|t| frames >= t) {
            shared.complete();
        }
    }
}

/// Records the plugin host's audio outputs.
pub struct AudioCaptureClient {
    client: RealtimeClient,
    pattern: PortPattern,
    reserve: Duration,
    buffer: Arc<AtomicRefCell<CaptureBuffer>>,
    frames: Arc<AtomicU64>,
    overflowed: Arc<AtomicBool>,
}

impl AudioCaptureClient {
    pub fn new(backend: &dyn GraphBackend, name: &str, config: &HarnessConfig) -> Result<Self> {
        Ok(Self {
            client: RealtimeClient::new(backend, name)?,
            pattern: PortPattern::new(&config.ports.host_audio)?,
            reserve: config.capture.reserve,
            buffer: Default::default(),
            frames: Default::default(),
            overflowed: Default::default(),
        })
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    pub fn ready_handle(&self) -> ReadyHandle {
        self.client.ready_handle()
    }

    /// Begin recording one input per host output.
    ///
    /// With a duration, the capture completes once at least that much has been recorded, and room for that plus one
    /// block is set aside up front.  Without one it only ends by timing out, and records at most the configured
    /// reserve.
    pub fn start(&mut self, duration: Option<Duration>, condition: ReadyCondition) -> Result<()> {
        let sources: Vec<String> = self
            .client
            .graph_client()
            .port_names()?
            .into_iter()
            .filter(|p| self.pattern.matches(p))
            .take(MAX_AUDIO_PORTS)
            .collect();
        if sources.is_empty() {
            return Err(Error::backend(format!("No ports match {}", self.pattern)));
        }

        let sample_rate = self.client.sample_rate() as f64;
        let target_frames = duration.map(|d| (d.as_secs_f64() * sample_rate).ceil() as u64);
        // The block which reaches the target overshoots it by up to a block.
        let reserve = match target_frames {
            Some(t) => t as usize + self.client.graph_client().buffer_size(),
            None => (self.reserve.as_secs_f64() * sample_rate) as usize,
        };

        self.buffer = Arc::new(AtomicRefCell::new(CaptureBuffer::with_capacity(
            sources.len(),
            reserve,
        )));
        self.frames.store(0, Ordering::Relaxed);
        self.overflowed = Arc::new(AtomicBool::new(false));

        let callback = CaptureCallback {
            buffer: self.buffer.clone(),
            frames: self.frames.clone(),
            overflowed: self.overflowed.clone(),
            target_frames,
        };

        self.client.activate(
            &PortLayout::audio_inputs(sources.len()),
            &sources,
            callback,
            condition,
            target_frames.is_some(),
            |client, ports| {
                for (source, destination) in sources.iter().zip(ports) {
                    client.connect(source, destination)?;
                }
                Ok(())
            },
        )
    }

    /// Start, then wait.  Refuses a capture with neither a duration nor a timeout, which would never return.
    pub fn start_sync(
        &mut self,
        duration: Option<Duration>,
        condition: ReadyCondition,
        wait: WaitOptions,
    ) -> Result<bool> {
        if duration.is_none() && wait.timeout.is_none() {
            return Err(Error::unbounded_wait());
        }
        self.start(duration, condition)?;
        self.wait(wait)
    }

    pub fn wait(&mut self, options: WaitOptions) -> Result<bool> {
        let completed = self.client.wait(options)?;
        if self.overflowed() {
            log::warn!(
                "{}: the capture outgrew its reserve and was cut off at {} frames",
                self.client.name(),
                self.frames()
            );
        }
        Ok(completed)
    }

    pub fn kill(&mut self) -> Result<()> {
        self.client.kill()
    }

    pub fn has_error(&self) -> bool {
        self.client.has_error()
    }

    /// Whether audio was dropped because the capture ran out of room.  Safe to call while recording.
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Frames recorded so far.  Safe to call while recording.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn buffer(&self) -> Result<AtomicRef<'_, CaptureBuffer>> {
        self.buffer
            .try_borrow()
            .map_err(|_| Error::backend("The capture buffer is in use by the audio thread"))
    }

    /// The raw blocks.  Only meaningful once the capture is over.
    pub fn blocks(&self) -> Result<Vec<BlockHeader>> {
        Ok(self.buffer()?.blocks().to_vec())
    }

    /// Everything recorded, joined into one buffer.
    pub fn recorded(&self) -> Result<CapturedAudio> {
        self.buffer()?.concatenate(self.client.sample_rate())
    }

    /// Like [AudioCaptureClient::recorded], but also empties the buffer.
    pub fn take_recorded(&mut self) -> Result<CapturedAudio> {
        let recorded = self.recorded()?;
        self.buffer
            .try_borrow_mut()
            .map_err(|_| Error::backend("The capture buffer is in use by the audio thread"))?
            .clear();
        self.frames.store(0, Ordering::Relaxed);
        self.overflowed.store(false, Ordering::Relaxed);
        Ok(recorded)
    }

    /// Write the recording to `path` at the graph's sample rate.
    pub fn export(&self, path: &Path) -> Result<()> {
        self.recorded()?.export(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::graph::simulated::SimulatedGraph;

    #[test]
    fn blocks_interleave_on_concatenation() {
        let mut buffer = CaptureBuffer::with_capacity(2, 8);
        buffer.push_block(7, &[&[1.0, 2.0], &[-1.0, -2.0]]);
        buffer.push_block(8, &[&[3.0], &[-3.0]]);

        let audio = buffer.concatenate(48000).unwrap();
        assert_eq!(audio.samples, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(audio.frames(), 3);
        assert_eq!(audio.first_cycle, 7);
        assert_eq!(audio.channel(1).collect::<Vec<_>>(), vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn channel_changes_are_tolerated() {
        let mut buffer = CaptureBuffer::with_capacity(2, 8);
        buffer.push_block(1, &[&[1.0, 1.0]]);
        buffer.push_block(2, &[&[2.0], &[5.0]]);

        let audio = buffer.concatenate(48000).unwrap();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.samples, vec![1.0, 0.0, 1.0, 0.0, 2.0, 5.0]);
        assert_eq!(buffer.blocks().len(), 2);
        assert_eq!(buffer.block_channel(&buffer.blocks()[1], 1), &[5.0]);
    }

    #[test]
    fn blocks_are_cut_to_the_room_left() {
        let mut buffer = CaptureBuffer::with_capacity(2, 3);
        let capacity = buffer.samples.capacity();

        assert!(buffer.push_block(1, &[&[1.0, 2.0], &[-1.0, -2.0]]));
        assert!(!buffer.push_block(2, &[&[3.0, 4.0], &[-3.0, -4.0]]));
        assert!(!buffer.push_block(3, &[&[5.0], &[-5.0]]));

        assert!(buffer.overflowed());
        assert_eq!(buffer.frames(), 3);
        assert_eq!(buffer.blocks().len(), 2);
        assert_eq!(buffer.samples.capacity(), capacity);
        assert_eq!(
            buffer.concatenate(48000).unwrap().samples,
            vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]
        );

        buffer.clear();
        assert!(!buffer.overflowed());
    }

    fn capture_capacity(recorder: &AudioCaptureClient) -> usize {
        recorder.buffer().unwrap().samples.capacity()
    }

    #[test]
    fn a_full_capture_never_reallocates() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let mut recorder = AudioCaptureClient::new(&graph, "recorder", &HarnessConfig::default()).unwrap();

        recorder
            .start(Some(Duration::from_secs(2)), ReadyCondition::always())
            .unwrap();
        let before = capture_capacity(&recorder);
        assert!(graph.run_until(200, || recorder.client().is_complete()));
        assert!(recorder.wait(WaitOptions::timeout(Duration::ZERO)).unwrap());

        assert_eq!(capture_capacity(&recorder), before);
        assert!(!recorder.overflowed());
        assert!(recorder.frames() >= 96000);
    }

    #[test]
    fn open_ended_captures_stop_at_the_reserve() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let mut config = HarnessConfig::default();
        config.capture.reserve = Duration::from_millis(100);
        let mut recorder = AudioCaptureClient::new(&graph, "recorder", &config).unwrap();

        recorder.start(None, ReadyCondition::always()).unwrap();
        let before = capture_capacity(&recorder);
        graph.run_cycles(20);

        assert!(recorder.overflowed());
        assert!(!recorder.wait(WaitOptions::timeout(Duration::ZERO)).unwrap());
        assert_eq!(capture_capacity(&recorder), before);
        assert_eq!(recorder.frames() as usize * 2, before);
        assert!(!recorder.client().is_active());
    }

    #[test]
    fn empty_buffers_cannot_be_concatenated() {
        assert!(CaptureBuffer::default().concatenate(48000).unwrap_err().is_no_capture());
    }

    #[test]
    fn export_requires_wav() {
        let dir = tempfile::tempdir().unwrap();
        let audio = CapturedAudio {
            samples: vec![0.0, 0.5, -0.5, 0.25],
            channels: 2,
            sample_rate: 44100,
            first_cycle: 0,
        };

        let err = audio.export(&dir.path().join("out.flac")).unwrap_err();
        assert!(err.is_unsupported_export_format());

        let path = dir.path().join("out.WAV");
        audio.export(&path).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44100);
        let back: Vec<f32> = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(back, audio.samples);
    }
}
