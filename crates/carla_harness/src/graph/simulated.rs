//! An in-memory audio graph.
//!
//! This is the test double for everything above [super::GraphBackend].  It follows the engine model closely enough for
//! the synchronization properties to mean something:
//!
//! - There is one cycle counter for the whole graph, incremented exactly once per cycle before any callback runs.
//! - Within a cycle, clients with an event output run first, then the phantom host, then everything else.  Within each
//!   of those phases the order is configurable, since the real engine makes no promises there.
//! - Callbacks run with the audio thread marker set, on whatever thread steps the graph.
//!
//! The phantom host stands in for the plugin host: a client with an `events-in` port and two audio outputs, driven by a
//! small sine synthesizer.  Only the phantom host produces audio; consumer inputs are the sum of every host output
//! connected to them.
//!
//! Cycles are driven either by hand with [SimulatedGraph::step] or by a background thread from
//! [SimulatedGraph::spawn_driver], which sleeps one block period per cycle unless freewheeling.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arrayvec::ArrayVec;

use super::*;
use crate::error::Error;
use crate::is_audio_thread::enter_audio_thread;
use crate::ports::{full_port_name, MAX_AUDIO_PORTS};

/// Most events one client may write in one block.  Further writes are dropped, as a full engine port buffer would.
const EVENT_CAPACITY: usize = 256;

/// Most simultaneous voices in the phantom host.
const MAX_VOICES: usize = 16;

/// Order of callbacks within one phase of a cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallbackOrder {
    #[default]
    Registration,
    Reversed,
}

#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct SimulatedGraphConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub callback_order: CallbackOrder,

    /// Name of the phantom host client.
    #[builder(setter(into))]
    pub host_name: String,

    /// Time for a released phantom host voice to fall by 60 dB.
    pub release: Duration,
}

impl Default for SimulatedGraphConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 1024,
            callback_order: CallbackOrder::Registration,
            host_name: "Carla".to_string(),
            release: Duration::from_millis(500),
        }
    }
}

/// Handle to a simulated graph.  Clones share the graph.
#[derive(Clone)]
pub struct SimulatedGraph {
    inner: Arc<Inner>,
}

struct Inner {
    config: SimulatedGraphConfig,
    cycle: AtomicU64,
    freewheel: AtomicBool,
    state: Mutex<GraphState>,
}

#[derive(Default)]
struct GraphState {
    order: CallbackOrder,
    next_id: u64,
    clients: Vec<SimClient>,
    connections: Vec<(String, String)>,
    host: Option<PhantomHost>,
}

struct SimClient {
    id: u64,
    name: String,
    audio_inputs: Vec<String>,
    event_output: Option<String>,
    processor: Option<Box<dyn Processor>>,
    watcher: Option<Box<dyn GraphWatcher>>,

    input_buffers: Vec<Vec<f32>>,
    events: EventBuffer,
}

/// The contents of one client's event output for the current block.
#[derive(Default)]
struct EventBuffer {
    events: Vec<(u32, ArrayVec<u8, 3>)>,
}

impl EventSink for EventBuffer {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> bool {
        if self.events.len() == EVENT_CAPACITY {
            return false;
        }
        let Ok(message) = ArrayVec::try_from(bytes) else {
            return false;
        };
        self.events.push((offset, message));
        true
    }
}

#[derive(Clone, Copy)]
struct Voice {
    pitch: u8,
    phase: f64,
    increment: f64,
    gain: f32,
    releasing: bool,

    /// Note-off arrived while the sustain pedal was down.
    held: bool,
}

struct PhantomHost {
    name: String,
    sample_rate: u32,
    release_coefficient: f32,
    voices: ArrayVec<Voice, MAX_VOICES>,
    sustain: bool,
    outputs: [Vec<f32>; 2],
    pending: Vec<(u32, ArrayVec<u8, 3>)>,
}

impl PhantomHost {
    const EVENTS_IN: &'static str = "events-in";
    const AUDIO_OUT: [&'static str; 2] = ["audio-out1", "audio-out2"];

    fn new(config: &SimulatedGraphConfig) -> Self {
        let release_samples = (config.release.as_secs_f64() * config.sample_rate as f64).max(1.0);
        // -60 dB over the release time.
        let release_coefficient = (0.001f64.ln() / release_samples).exp() as f32;

        Self {
            name: config.host_name.clone(),
            sample_rate: config.sample_rate,
            release_coefficient,
            voices: ArrayVec::new(),
            sustain: false,
            outputs: [vec![0.0; config.block_size], vec![0.0; config.block_size]],
            pending: Vec::with_capacity(EVENT_CAPACITY),
        }
    }

    fn port_names(&self) -> Vec<String> {
        std::iter::once(Self::EVENTS_IN)
            .chain(Self::AUDIO_OUT)
            .map(|p| full_port_name(&self.name, p))
            .collect()
    }

    fn handle(&mut self, message: &[u8]) {
        let [status, data @ ..] = message else {
            return;
        };

        match (status & 0xf0, data) {
            (0x90, [pitch, velocity]) if *velocity > 0 => {
                self.release(*pitch);
                let voice = Voice {
                    pitch: *pitch,
                    phase: 0.0,
                    increment: std::f64::consts::TAU * pitch_to_hz(*pitch) / self.sample_rate as f64,
                    gain: 0.25 * *velocity as f32 / 127.0,
                    releasing: false,
                    held: false,
                };
                if self.voices.try_push(voice).is_err() {
                    self.voices.remove(0);
                    self.voices.push(voice);
                }
            }
            (0x80, [pitch, _]) | (0x90, [pitch, _]) => {
                let sustain = self.sustain;
                for v in self.voices.iter_mut().filter(|v| v.pitch == *pitch && !v.releasing) {
                    if sustain {
                        v.held = true;
                    } else {
                        v.releasing = true;
                    }
                }
            }
            (0xb0, [64, value]) => {
                self.sustain = *value >= 64;
                if !self.sustain {
                    for v in self.voices.iter_mut().filter(|v| v.held) {
                        v.held = false;
                        v.releasing = true;
                    }
                }
            }
            _ => {}
        }
    }

    fn release(&mut self, pitch: u8) {
        for v in self.voices.iter_mut().filter(|v| v.pitch == pitch) {
            v.releasing = true;
        }
    }

    fn render(&mut self, frames: usize) {
        self.pending.sort_by_key(|x| x.0);
        let mut pending = std::mem::take(&mut self.pending);
        let mut next_event = 0;

        for frame in 0..frames {
            while let Some((offset, message)) = pending.get(next_event) {
                if *offset as usize > frame {
                    break;
                }
                self.handle(message);
                next_event += 1;
            }

            let mut sample = 0.0f32;
            for v in self.voices.iter_mut() {
                sample += (v.phase.sin() as f32) * v.gain;
                v.phase = (v.phase + v.increment) % std::f64::consts::TAU;
                if v.releasing {
                    v.gain *= self.release_coefficient;
                }
            }
            self.voices.retain(|v| v.gain > 1e-5);

            self.outputs[0][frame] = sample;
            self.outputs[1][frame] = sample;
        }

        // Events past the end of the block are late; apply them now rather than lose a note-off.
        for (_, message) in pending.drain(next_event..) {
            self.handle(&message);
        }
        pending.clear();
        self.pending = pending;
    }
}

fn pitch_to_hz(pitch: u8) -> f64 {
    440.0 * 2.0f64.powf((pitch as f64 - 69.0) / 12.0)
}

impl GraphState {
    fn all_ports(&self) -> Vec<String> {
        let mut ret = vec![];
        for c in self.clients.iter() {
            ret.extend(c.audio_inputs.iter().cloned());
            ret.extend(c.event_output.iter().cloned());
        }
        if let Some(h) = self.host.as_ref() {
            ret.extend(h.port_names());
        }
        ret
    }

    fn client_mut(&mut self, id: u64) -> Option<&mut SimClient> {
        self.clients.iter_mut().find(|c| c.id == id)
    }

    /// Tell every active watcher except `except` about a registration change.
    fn notify(&mut self, name: &str, registered: bool, except: Option<u64>) {
        for c in self.clients.iter_mut().filter(|c| Some(c.id) != except) {
            if let Some(w) = c.watcher.as_mut() {
                w.client_registration(name, registered);
            }
        }
    }

    fn disconnect_ports(&mut self, ports: &[String]) {
        self.connections
            .retain(|(s, d)| !ports.contains(s) && !ports.contains(d));
    }

    /// Indices of the clients in the given phase, in execution order.
    fn phase(&self, producers: bool) -> Vec<usize> {
        let mut ret: Vec<usize> = self
            .clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.processor.is_some() && c.event_output.is_some() == producers)
            .map(|(i, _)| i)
            .collect();
        if self.order == CallbackOrder::Reversed {
            ret.reverse();
        }
        ret
    }

    fn run_cycle(&mut self, index: u64, frames: usize) {
        let _audio = enter_audio_thread();

        for i in self.phase(true) {
            let client = &mut self.clients[i];
            client.events.events.clear();
            run_client(client, index, frames);
        }

        if let Some(host) = self.host.as_mut() {
            let events_in = full_port_name(&host.name, PhantomHost::EVENTS_IN);
            for client in self.clients.iter() {
                let Some(out) = client.event_output.as_ref() else {
                    continue;
                };
                if self.connections.iter().any(|(s, d)| s == out && *d == events_in) {
                    host.pending.extend(client.events.events.iter().cloned());
                }
            }
            host.render(frames);
        }

        for i in self.phase(false) {
            let GraphState {
                clients,
                connections,
                host,
                ..
            } = self;
            let client = &mut clients[i];

            for (port, buffer) in client.audio_inputs.iter().zip(client.input_buffers.iter_mut()) {
                buffer.iter_mut().for_each(|x| *x = 0.0);
                let Some(host) = host.as_ref() else {
                    continue;
                };
                for (channel, out) in PhantomHost::AUDIO_OUT.iter().enumerate() {
                    let source = full_port_name(&host.name, out);
                    if connections.iter().any(|(s, d)| *s == source && d == port) {
                        for (dst, src) in buffer.iter_mut().zip(host.outputs[channel].iter()) {
                            *dst += *src;
                        }
                    }
                }
            }

            run_client(client, index, frames);
        }
    }
}

fn run_client(client: &mut SimClient, index: u64, frames: usize) {
    let SimClient {
        processor,
        input_buffers,
        events,
        event_output,
        ..
    } = client;
    let Some(processor) = processor.as_mut() else {
        return;
    };

    let inputs: ArrayVec<&[f32], MAX_AUDIO_PORTS> =
        input_buffers.iter().map(|b| &b[..frames]).collect();
    if event_output.is_some() {
        processor.process(&mut Cycle::new(index, frames, &inputs, events));
    } else {
        processor.process(&mut Cycle::new(index, frames, &inputs, &mut NullEventSink));
    }
}

impl SimulatedGraph {
    pub fn new(config: SimulatedGraphConfig) -> Self {
        let state = GraphState {
            order: config.callback_order,
            ..Default::default()
        };

        Self {
            inner: Arc::new(Inner {
                config,
                cycle: AtomicU64::new(0),
                freewheel: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
        }
    }

    /// A graph with the phantom host already present.
    pub fn with_phantom_host(config: SimulatedGraphConfig) -> Self {
        let ret = Self::new(config);
        ret.add_phantom_host();
        ret
    }

    fn state(&self) -> MutexGuard<'_, GraphState> {
        self.inner.state.lock().unwrap()
    }

    pub fn config(&self) -> &SimulatedGraphConfig {
        &self.inner.config
    }

    /// Index of the most recent cycle.  Zero before the first.
    pub fn cycle(&self) -> u64 {
        self.inner.cycle.load(Ordering::Acquire)
    }

    pub fn is_freewheeling(&self) -> bool {
        self.inner.freewheel.load(Ordering::Relaxed)
    }

    pub fn set_callback_order(&self, order: CallbackOrder) {
        self.state().order = order;
    }

    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.inner.config.block_size as f64 / self.inner.config.sample_rate as f64)
    }

    /// Run one cycle of every active client.
    pub fn step(&self) {
        let mut state = self.state();
        let index = self.inner.cycle.fetch_add(1, Ordering::AcqRel) + 1;
        state.run_cycle(index, self.inner.config.block_size);
    }

    pub fn run_cycles(&self, cycles: u64) {
        for _ in 0..cycles {
            self.step();
        }
    }

    /// Step until `done` returns true, at most `max_cycles` times.  Returns whether `done` was satisfied.
    pub fn run_until(&self, max_cycles: u64, mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..max_cycles {
            if done() {
                return true;
            }
            self.step();
        }
        done()
    }

    pub fn add_phantom_host(&self) {
        let mut state = self.state();
        if state.host.is_some() {
            return;
        }
        let host = PhantomHost::new(&self.inner.config);
        let name = host.name.clone();
        state.host = Some(host);
        state.notify(&name, true, None);
    }

    /// Remove the phantom host, as if the plugin host process died.  Every watcher hears about it.
    pub fn remove_phantom_host(&self) {
        let mut state = self.state();
        let Some(host) = state.host.take() else {
            return;
        };
        state.disconnect_ports(&host.port_names());
        state.notify(&host.name, false, None);
    }

    pub fn has_phantom_host(&self) -> bool {
        self.state().host.is_some()
    }

    pub fn connections(&self) -> Vec<(String, String)> {
        self.state().connections.clone()
    }

    /// Names of every open client, excluding the phantom host.
    pub fn client_names(&self) -> Vec<String> {
        self.state().clients.iter().map(|c| c.name.clone()).collect()
    }

    /// Drive cycles from a background thread until the returned handle drops.
    pub fn spawn_driver(&self) -> Driver {
        let stop = Arc::new(AtomicBool::new(false));
        let graph = self.clone();
        let thread_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name("simulated graph".to_string())
            .spawn(move || {
                let period = graph.block_period();
                while !thread_stop.load(Ordering::Relaxed) {
                    graph.step();
                    if graph.is_freewheeling() {
                        std::thread::yield_now();
                    } else {
                        std::thread::sleep(period);
                    }
                }
            })
            .ok();

        if thread.is_none() {
            log::error!("Could not spawn the simulated graph driver thread");
        }

        Driver { stop, thread }
    }
}

impl Default for SimulatedGraph {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// Stops the driver thread when dropped.
pub struct Driver {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                log::error!("Simulated graph driver panicked");
            }
        }
    }
}

impl GraphBackend for SimulatedGraph {
    fn open(&self, client_name: &str) -> Result<Box<dyn GraphClient>> {
        let mut state = self.state();

        let mut name = client_name.to_string();
        let mut suffix = 1;
        while state.clients.iter().any(|c| c.name == name)
            || state.host.as_ref().is_some_and(|h| h.name == name)
        {
            suffix += 1;
            name = format!("{client_name}-{suffix:02}");
        }

        let id = state.next_id;
        state.next_id += 1;
        state.clients.push(SimClient {
            id,
            name: name.clone(),
            audio_inputs: vec![],
            event_output: None,
            processor: None,
            watcher: None,
            input_buffers: vec![],
            events: EventBuffer::default(),
        });
        state.notify(&name, true, Some(id));

        Ok(Box::new(SimulatedClient {
            graph: self.clone(),
            id,
            name,
        }))
    }
}

struct SimulatedClient {
    graph: SimulatedGraph,
    id: u64,
    name: String,
}

impl SimulatedClient {
    fn with_client<T>(&self, f: impl FnOnce(&mut SimClient) -> T) -> Result<T> {
        let mut state = self.graph.state();
        let client = state
            .client_mut(self.id)
            .ok_or_else(|| Error::backend(format!("Client {} is closed", self.name)))?;
        Ok(f(client))
    }
}

impl GraphClient for SimulatedClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.graph.inner.config.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.graph.inner.config.block_size
    }

    fn port_names(&self) -> Result<Vec<String>> {
        Ok(self.graph.state().all_ports())
    }

    fn set_freewheel(&self, enabled: bool) -> Result<()> {
        self.graph.inner.freewheel.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn register_ports(&mut self, layout: &PortLayout) -> Result<Vec<String>> {
        if layout.audio_inputs.len() > MAX_AUDIO_PORTS {
            return Err(Error::backend(format!(
                "{} audio inputs requested, at most {MAX_AUDIO_PORTS} are supported",
                layout.audio_inputs.len()
            )));
        }

        let block_size = self.graph.inner.config.block_size;
        let name = self.name.clone();
        self.with_client(|c| {
            if c.processor.is_some() {
                return Err(Error::backend("Ports must be registered before activation"));
            }

            let mut ret = vec![];
            for short in layout.audio_inputs.iter() {
                let full = full_port_name(&name, short);
                c.audio_inputs.push(full.clone());
                c.input_buffers.push(vec![0.0; block_size]);
                ret.push(full);
            }
            if let Some(short) = layout.event_output.as_deref() {
                let full = full_port_name(&name, short);
                c.event_output = Some(full.clone());
                c.events.events.reserve(EVENT_CAPACITY);
                ret.push(full);
            }
            Ok(ret)
        })?
    }

    fn registered_ports(&self) -> Vec<String> {
        self.with_client(|c| {
            c.audio_inputs
                .iter()
                .chain(c.event_output.iter())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    fn connect(&self, source: &str, destination: &str) -> Result<()> {
        let mut state = self.graph.state();
        let ports = state.all_ports();
        for p in [source, destination] {
            if !ports.iter().any(|x| x == p) {
                return Err(Error::backend(format!("No such port {p}")));
            }
        }

        let pair = (source.to_string(), destination.to_string());
        if !state.connections.contains(&pair) {
            state.connections.push(pair);
        }
        Ok(())
    }

    fn activate(&mut self, processor: Box<dyn Processor>, watcher: Box<dyn GraphWatcher>) -> Result<()> {
        self.with_client(|c| {
            if c.processor.is_some() {
                return Err(Error::backend("Client is already active"));
            }
            c.processor = Some(processor);
            c.watcher = Some(watcher);
            Ok(())
        })?
    }

    fn is_active(&self) -> bool {
        self.with_client(|c| c.processor.is_some()).unwrap_or(false)
    }

    fn deactivate(&mut self) -> Result<()> {
        let mut state = self.graph.state();
        let Some(client) = state.client_mut(self.id) else {
            return Ok(());
        };

        client.processor = None;
        client.watcher = None;
        client.input_buffers.clear();
        let mut ports = std::mem::take(&mut client.audio_inputs);
        ports.extend(client.event_output.take());
        state.disconnect_ports(&ports);
        Ok(())
    }
}

impl Drop for SimulatedClient {
    fn drop(&mut self) {
        let mut state = self.graph.state();
        let Some(index) = state.clients.iter().position(|c| c.id == self.id) else {
            return;
        };
        let client = state.clients.remove(index);
        let ports: Vec<String> = client
            .audio_inputs
            .iter()
            .chain(client.event_output.iter())
            .cloned()
            .collect();
        state.disconnect_ports(&ports);
        state.notify(&self.name, false, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    struct Recorder(Arc<Mutex<Vec<u64>>>);

    fn ignore() -> Box<dyn GraphWatcher> {
        Box::new(|_: &str, _: bool| {})
    }

    impl Processor for Recorder {
        fn process(&mut self, cycle: &mut Cycle<'_>) {
            self.0.lock().unwrap().push(cycle.index());
        }
    }

    #[test]
    fn every_client_sees_the_same_cycle() {
        let graph = SimulatedGraph::default();
        let seen_a = Arc::new(Mutex::new(vec![]));
        let seen_b = Arc::new(Mutex::new(vec![]));

        let mut a = graph.open("a").unwrap();
        let mut b = graph.open("b").unwrap();
        a.activate(Box::new(Recorder(seen_a.clone())), ignore())
            .unwrap();
        graph.step();
        b.activate(Box::new(Recorder(seen_b.clone())), ignore())
            .unwrap();
        graph.run_cycles(2);

        assert_eq!(*seen_a.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*seen_b.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn names_are_made_unique() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let a = graph.open("rec").unwrap();
        let b = graph.open("rec").unwrap();
        let c = graph.open("Carla").unwrap();
        assert_eq!(a.name(), "rec");
        assert_eq!(b.name(), "rec-02");
        assert_eq!(c.name(), "Carla-02");
    }

    #[test]
    fn deactivation_unregisters_and_disconnects() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let mut client = graph.open("rec").unwrap();
        let names = client.register_ports(&PortLayout::audio_inputs(2)).unwrap();
        assert_eq!(names, vec!["rec:in_1", "rec:in_2"]);

        client.connect("Carla:audio-out1", "rec:in_1").unwrap();
        assert_eq!(graph.connections().len(), 1);
        assert!(client.connect("Carla:audio-out9", "rec:in_2").is_err());

        client
            .activate(Box::new(Recorder(Default::default())), ignore())
            .unwrap();
        assert!(client.is_active());

        client.deactivate().unwrap();
        client.deactivate().unwrap();
        assert!(!client.is_active());
        assert!(client.registered_ports().is_empty());
        assert!(graph.connections().is_empty());
        assert!(!client.port_names().unwrap().iter().any(|p| p.starts_with("rec:")));
    }

    #[test]
    fn host_removal_is_announced() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let heard = Arc::new(Mutex::new(vec![]));

        let mut client = graph.open("watcher").unwrap();
        let h = heard.clone();
        client
            .activate(
                Box::new(Recorder(Default::default())),
                Box::new(move |name: &str, registered: bool| {
                    h.lock().unwrap().push((name.to_string(), registered));
                }),
            )
            .unwrap();

        graph.remove_phantom_host();
        assert_eq!(*heard.lock().unwrap(), vec![("Carla".to_string(), false)]);
        assert!(!graph.has_phantom_host());
    }

    #[test]
    fn phantom_host_renders_notes() {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let mut state = graph.state();
        let host = state.host.as_mut().unwrap();

        host.pending.push((10, ArrayVec::try_from(&[0x90u8, 69, 127][..]).unwrap()));
        host.render(1024);
        assert!(host.outputs[0][..10].iter().all(|x| *x == 0.0));
        assert!(host.outputs[0][11..].iter().any(|x| x.abs() > 0.01));

        host.pending.push((0, ArrayVec::try_from(&[0x80u8, 69, 0][..]).unwrap()));
        for _ in 0..100 {
            host.render(1024);
        }
        assert!(host.voices.is_empty());
        assert!(host.outputs[0].iter().all(|x| x.abs() < 1e-4));
    }
}
