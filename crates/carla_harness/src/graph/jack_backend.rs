//! [GraphBackend] over a running JACK server.
use std::sync::atomic::{AtomicU64, Ordering};

use arrayvec::ArrayVec;

use super::*;
use crate::error::Error;
use crate::is_audio_thread::enter_audio_thread;
use crate::ports::MAX_AUDIO_PORTS;

/// Connects to whichever JACK server is running.  Never starts one implicitly.
#[derive(Debug, Default)]
pub struct JackBackend;

impl JackBackend {
    pub fn new() -> Self {
        Self
    }
}

impl GraphBackend for JackBackend {
    fn open(&self, client_name: &str) -> Result<Box<dyn GraphClient>> {
        let (client, status) = jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)?;
        log::debug!("Opened JACK client {} ({status:?})", client.name());

        Ok(Box::new(JackGraphClient {
            name: client.name().to_string(),
            state: State::Inactive(client),
            pending: Ports::default(),
            port_names: vec![],
        }))
    }
}

/// Cycle indices for every JACK client in the process.
static FRAME_CLOCK: FrameClock = FrameClock::new();

/// Extends JACK's 32-bit frame time, which wraps after about a day at 48 kHz, to a 64-bit cycle index which does not.
///
/// Every client computes the same index within a cycle, because they all see the same frame time and the high bits
/// only move when the frame time wraps.
#[derive(Debug)]
struct FrameClock {
    last: AtomicU64,
}

impl FrameClock {
    const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn extend(&self, frame_time: u32) -> u64 {
        let index = extend_frame_time(self.last.load(Ordering::Relaxed), frame_time);
        self.last.fetch_max(index, Ordering::Relaxed);
        index
    }
}

/// The first index at or after `last` whose low 32 bits are `frame_time`.
fn extend_frame_time(last: u64, frame_time: u32) -> u64 {
    let candidate = (last & !u64::from(u32::MAX)) | u64::from(frame_time);
    if candidate < last {
        candidate + (1 << 32)
    } else {
        candidate
    }
}

#[derive(Default)]
struct Ports {
    audio_inputs: Vec<jack::Port<jack::AudioIn>>,
    event_output: Option<jack::Port<jack::MidiOut>>,
}

impl Ports {
    fn unregister(self, client: &jack::Client) -> Result<()> {
        for port in self.audio_inputs {
            client.unregister_port(port)?;
        }
        if let Some(port) = self.event_output {
            client.unregister_port(port)?;
        }
        Ok(())
    }
}

struct Callback {
    ports: Ports,
    processor: Box<dyn Processor>,
}

struct Notifications {
    watcher: Box<dyn GraphWatcher>,
}

enum State {
    Inactive(jack::Client),
    Active(jack::AsyncClient<Notifications, Callback>),
    /// A transition consumed the client and failed.
    Closed,
}

struct JackGraphClient {
    name: String,
    state: State,

    /// Registered but not yet handed to a callback.
    pending: Ports,

    port_names: Vec<String>,
}

struct MidiSink<'w, 'ps>(&'w mut jack::MidiWriter<'ps>);

impl EventSink for MidiSink<'_, '_> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> bool {
        self.0.write(&jack::RawMidi { time: offset, bytes }).is_ok()
    }
}

impl jack::ProcessHandler for Callback {
    fn process(&mut self, _: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let _audio = enter_audio_thread();

        // Registration caps the port count, so this never overflows.
        let inputs: ArrayVec<&[f32], MAX_AUDIO_PORTS> = self
            .ports
            .audio_inputs
            .iter()
            .map(|p| p.as_slice(ps))
            .collect();
        let index = FRAME_CLOCK.extend(ps.last_frame_time());
        let frames = ps.n_frames() as usize;

        match self.ports.event_output.as_mut() {
            Some(port) => {
                let mut writer = port.writer(ps);
                let mut sink = MidiSink(&mut writer);
                self.processor
                    .process(&mut Cycle::new(index, frames, &inputs, &mut sink));
            }
            None => {
                self.processor
                    .process(&mut Cycle::new(index, frames, &inputs, &mut NullEventSink));
            }
        }

        jack::Control::Continue
    }
}

impl jack::NotificationHandler for Notifications {
    fn client_registration(&mut self, _: &jack::Client, name: &str, is_registered: bool) {
        self.watcher.client_registration(name, is_registered);
    }
}

impl JackGraphClient {
    fn client(&self) -> Result<&jack::Client> {
        match &self.state {
            State::Inactive(c) => Ok(c),
            State::Active(a) => Ok(a.as_client()),
            State::Closed => Err(Error::backend(format!("JACK client {} is closed", self.name))),
        }
    }
}

impl GraphClient for JackGraphClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.client().map(|c| c.sample_rate() as u32).unwrap_or(0)
    }

    fn buffer_size(&self) -> usize {
        self.client().map(|c| c.buffer_size() as usize).unwrap_or(0)
    }

    fn port_names(&self) -> Result<Vec<String>> {
        Ok(self.client()?.ports(None, None, jack::PortFlags::empty()))
    }

    fn set_freewheel(&self, enabled: bool) -> Result<()> {
        let client = self.client()?;
        // SAFETY: the raw handle is valid for as long as `client` is borrowed.
        let ret = unsafe { jack_sys::jack_set_freewheel(client.raw(), enabled as i32) };
        if ret != 0 {
            return Err(Error::backend(format!(
                "jack_set_freewheel({enabled}) failed with {ret}"
            )));
        }
        Ok(())
    }

    fn register_ports(&mut self, layout: &PortLayout) -> Result<Vec<String>> {
        if layout.audio_inputs.len() > MAX_AUDIO_PORTS {
            return Err(Error::backend(format!(
                "{} audio inputs requested, at most {MAX_AUDIO_PORTS} are supported",
                layout.audio_inputs.len()
            )));
        }

        let State::Inactive(client) = &self.state else {
            return Err(Error::backend("Ports must be registered before activation"));
        };

        let mut names = vec![];
        for short in layout.audio_inputs.iter() {
            let port = client.register_port(short, jack::AudioIn::default())?;
            names.push(port.name()?);
            self.pending.audio_inputs.push(port);
        }
        if let Some(short) = layout.event_output.as_deref() {
            let port = client.register_port(short, jack::MidiOut::default())?;
            names.push(port.name()?);
            self.pending.event_output = Some(port);
        }

        self.port_names.extend(names.iter().cloned());
        Ok(names)
    }

    fn registered_ports(&self) -> Vec<String> {
        self.port_names.clone()
    }

    fn connect(&self, source: &str, destination: &str) -> Result<()> {
        self.client()?.connect_ports_by_name(source, destination)?;
        Ok(())
    }

    fn activate(&mut self, processor: Box<dyn Processor>, watcher: Box<dyn GraphWatcher>) -> Result<()> {
        let State::Inactive(client) = std::mem::replace(&mut self.state, State::Closed) else {
            return Err(Error::backend(format!("JACK client {} is not inactive", self.name)));
        };

        let callback = Callback {
            ports: std::mem::take(&mut self.pending),
            processor,
        };
        let active = client.activate_async(Notifications { watcher }, callback)?;
        self.state = State::Active(active);
        Ok(())
    }

    fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    fn deactivate(&mut self) -> Result<()> {
        let client = match std::mem::replace(&mut self.state, State::Closed) {
            State::Active(active) => {
                let (client, _, callback) = active.deactivate()?;
                callback.ports.unregister(&client)?;
                client
            }
            State::Inactive(client) => client,
            State::Closed => return Ok(()),
        };

        std::mem::take(&mut self.pending).unregister(&client)?;
        self.port_names.clear();
        self.state = State::Inactive(client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use audio_synchronization::CycleLatch;

    const WRAP: u64 = 1 << 32;

    #[test]
    fn frame_time_wraps_forward() {
        let before = u64::from(u32::MAX) - 1023;
        assert_eq!(extend_frame_time(0, u32::MAX - 1023), before);
        assert_eq!(extend_frame_time(before, u32::MAX - 1023), before);
        assert_eq!(extend_frame_time(before, 0), WRAP);
        assert_eq!(extend_frame_time(WRAP, 0), WRAP);
        assert_eq!(extend_frame_time(WRAP, 1024), WRAP + 1024);
        assert_eq!(extend_frame_time(3 * WRAP + 5, 2), 4 * WRAP + 2);
    }

    #[test]
    fn clients_agree_across_the_wrap() {
        let clock = FrameClock::new();
        let latch = CycleLatch::default();

        // Two clients per cycle, as JACK would run them.
        let first = clock.extend(u32::MAX - 1023);
        assert_eq!(clock.extend(u32::MAX - 1023), first);
        latch.latch(first);

        let second = clock.extend(0);
        assert_eq!(clock.extend(0), second);
        assert!(second > first);
        assert!(latch.is_ready_at(second));
        assert!(!latch.is_ready_at(first));
    }
}
