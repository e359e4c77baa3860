//! Host audio/MIDI adapter (C5): a JACK `ProcessHandler` implementing the
//! per-cycle order `compute_ratios → o2h → h2o → o2h_midi → h2o_midi`, plus
//! the xrun/port-connect/sample-rate/buffer-size/shutdown notifications the
//! resampler core depends on.

use crate::device::{DeviceHandle, DeviceStatus};
use crate::error::BridgeError;
use crate::midi::{self, UsbMidiEvent};
use crate::mutex::UnsafeMutex;
use crate::resampler::{Resampler, ResamplerStatus};
use jack::{
    AsyncClient, AudioIn, AudioOut, Client, ClientOptions, ClientStatus, Control, MidiIn, MidiOut,
    NotificationHandler, Port, ProcessHandler, ProcessScope,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{info, warn};

struct Notifications {
    device: Arc<dyn DeviceHandle>,
    pending_bufsize: Arc<AtomicU32>,
    pending_samplerate: Arc<AtomicU32>,
    xrun_count: Arc<AtomicU64>,
    input_port_names: Vec<String>,
}

impl NotificationHandler for Notifications {
    fn shutdown(&mut self, _status: ClientStatus, reason: &str) {
        warn!("host server shut down ({reason}); stopping device");
        self.device.set_status(DeviceStatus::Stop);
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        // Lock-free: the notification thread and the RT process thread both
        // touch this counter, and only this counter — never the
        // `UnsafeMutex<Resampler>`, which hands out an unsynchronized
        // `&mut Resampler` that must never be aliased across threads.
        self.xrun_count.fetch_add(1, Ordering::AcqRel);
        Control::Continue
    }

    fn buffer_size(&mut self, _client: &Client, size: jack::Frames) -> Control {
        self.pending_bufsize.store(size, Ordering::Release);
        Control::Continue
    }

    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        self.pending_samplerate.store(srate, Ordering::Release);
        Control::Continue
    }

    fn ports_connected(
        &mut self,
        client: &Client,
        _port_id_a: jack::PortId,
        _port_id_b: jack::PortId,
        _are_connected: bool,
    ) {
        // The callback only tells us *that* some connection in the graph
        // changed, not which of our own ports it concerns, so re-scan our
        // own registered input ports and set (not OR) the fresh result.
        let any_input_connected = self.input_port_names.iter().any(|name| {
            client
                .port_by_name(name)
                .map(|p| p.connected_count().unwrap_or(0) > 0)
                .unwrap_or(false)
        });
        self.device.set_h2o_audio_enable(any_input_connected);
    }
}

struct Process {
    resampler: Arc<UnsafeMutex<Resampler>>,
    device: Arc<dyn DeviceHandle>,
    audio_in_ports: Vec<Port<AudioIn>>,
    audio_out_ports: Vec<Port<AudioOut>>,
    midi_in_port: Port<MidiIn>,
    midi_out_port: Port<MidiOut>,
    pending_bufsize: Arc<AtomicU32>,
    pending_samplerate: Arc<AtomicU32>,
    host_input_scratch: Vec<f32>,
    o2h_midi_pending: Vec<UsbMidiEvent>,
    f_host: f64,
}

impl Process {
    fn apply_pending_reconfig(&mut self, resampler: &mut Resampler) {
        let new_bufsize = self.pending_bufsize.swap(0, Ordering::AcqRel);
        let new_samplerate = self.pending_samplerate.swap(0, Ordering::AcqRel);
        if new_bufsize != 0 {
            let in_ch = self.audio_in_ports.len();
            let out_ch = self.audio_out_ports.len();
            resampler.reset_buffers(new_bufsize, in_ch, out_ch);
            self.host_input_scratch = vec![0.0; new_bufsize as usize * in_ch.max(1)];
        }
        if new_samplerate != 0 {
            self.f_host = new_samplerate as f64;
            resampler.reset_dll(self.f_host, self.device.as_ref());
        }
    }

    fn forward_o2h_midi(&mut self, ps: &ProcessScope, current_frame_time_us: u64) {
        let ring = self.device.o2h_midi();
        let mut raw = [0_u8; UsbMidiEvent::WIRE_LEN];
        while ring.read_space() >= UsbMidiEvent::WIRE_LEN {
            if ring.read(&mut raw) != UsbMidiEvent::WIRE_LEN {
                break;
            }
            self.o2h_midi_pending.push(UsbMidiEvent::from_bytes(&raw));
        }
        if self.o2h_midi_pending.is_empty() {
            return;
        }

        let us_per_frame = 1_000_000.0 / self.f_host.max(1.0);
        let offsets: Vec<u32> = self
            .o2h_midi_pending
            .iter()
            .map(|e| midi::o2h_frame_offset(current_frame_time_us, e.device_time_us, us_per_frame))
            .collect();
        let forward_count = midi::monotonic_prefix_len(&offsets);

        let mut writer = self.midi_out_port.writer(ps);
        for (event, &offset) in self.o2h_midi_pending[..forward_count].iter().zip(&offsets[..forward_count]) {
            let payload = midi::unpack_o2h(event);
            let raw_midi = jack::RawMidi {
                time: offset,
                bytes: &payload,
            };
            let _ = writer.write(&raw_midi);
        }
        self.o2h_midi_pending.drain(..forward_count);
    }

    fn forward_h2o_midi(&mut self, ps: &ProcessScope, status: ResamplerStatus, current_frame_time_us: u64) {
        if status != ResamplerStatus::Run {
            return;
        }
        let ring = self.device.h2o_midi();
        for raw in self.midi_in_port.iter(ps) {
            if raw.bytes.is_empty() {
                continue;
            }
            let device_time_us = current_frame_time_us
                + (raw.time as f64 * 1_000_000.0 / self.f_host.max(1.0)) as u64;
            let Some(event) = midi::pack_h2o(raw.bytes[0], &raw.bytes[1..], device_time_us) else {
                continue;
            };
            let bytes = event.to_bytes();
            if ring.write_space() < bytes.len() {
                warn!("h2o midi ring overflow, dropping event");
                continue;
            }
            ring.write(&bytes);
        }
    }
}

impl ProcessHandler for Process {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> Control {
        let resampler = self.resampler.lock();
        self.apply_pending_reconfig(resampler);

        let t = client.time() as f64 * 1e-6;
        if resampler.compute_ratios(t, self.device.as_ref()) {
            return Control::Continue;
        }

        let out_channels = self.audio_out_ports.len();
        let o2h_out = resampler.o2h(self.device.as_ref());
        for (ch, port) in self.audio_out_ports.iter_mut().enumerate() {
            let dst = port.as_mut_slice(ps);
            for (frame, sample) in dst.iter_mut().enumerate() {
                *sample = o2h_out.get(frame * out_channels + ch).copied().unwrap_or(0.0);
            }
        }

        if self.device.is_h2o_audio_enable() {
            let in_channels = self.audio_in_ports.len();
            let frames = ps.n_frames() as usize;
            if self.host_input_scratch.len() < frames * in_channels {
                self.host_input_scratch.resize(frames * in_channels, 0.0);
            }
            for (ch, port) in self.audio_in_ports.iter().enumerate() {
                let src = port.as_slice(ps);
                for (frame, &sample) in src.iter().enumerate() {
                    self.host_input_scratch[frame * in_channels + ch] = sample;
                }
            }
            resampler.h2o(self.device.as_ref(), &self.host_input_scratch);
        }

        let current_frame_time_us = client.frames_to_time(ps.last_frame_time());
        let status = resampler.status();
        self.forward_o2h_midi(ps, current_frame_time_us);
        self.forward_h2o_midi(ps, status, current_frame_time_us);

        Control::Continue
    }
}

/// Owns the JACK client and the resampler/device pair it drives.
pub struct JackBridge {
    client: Option<AsyncClient<Notifications, Process>>,
    pub resampler: Arc<UnsafeMutex<Resampler>>,
    pub device: Arc<dyn DeviceHandle>,
}

impl JackBridge {
    pub fn open(
        client_name: &str,
        device: Arc<dyn DeviceHandle>,
        resampler: Arc<UnsafeMutex<Resampler>>,
        priority: i32,
    ) -> Result<Self, BridgeError> {
        let (client, _status) = Client::new(client_name, ClientOptions::NO_START_SERVER).map_err(|source| {
            BridgeError::HostOpenFailed {
                name: client_name.to_string(),
                source,
            }
        })?;

        let descriptor = device.descriptor();
        let mut audio_in_ports = Vec::with_capacity(descriptor.in_channels);
        let mut input_port_names = Vec::with_capacity(descriptor.in_channels);
        for name in &descriptor.in_port_names {
            let port = client
                .register_port(name, AudioIn::default())
                .map_err(|source| BridgeError::PortRegisterFailed {
                    name: name.clone(),
                    source,
                })?;
            input_port_names.push(port.name().unwrap_or_else(|_| name.clone()));
            audio_in_ports.push(port);
        }

        let mut audio_out_ports = Vec::with_capacity(descriptor.out_channels);
        for name in &descriptor.out_port_names {
            let port = client
                .register_port(name, AudioOut::default())
                .map_err(|source| BridgeError::PortRegisterFailed {
                    name: name.clone(),
                    source,
                })?;
            audio_out_ports.push(port);
        }

        let midi_in_port = client
            .register_port("MIDI in", MidiIn::default())
            .map_err(|source| BridgeError::PortRegisterFailed {
                name: "MIDI in".to_string(),
                source,
            })?;
        let midi_out_port = client
            .register_port("MIDI out", MidiOut::default())
            .map_err(|source| BridgeError::PortRegisterFailed {
                name: "MIDI out".to_string(),
                source,
            })?;

        let f_host = client.sample_rate() as f64;
        let bufsize = client.buffer_size();
        let xrun_count = {
            let r = resampler.lock();
            r.reset_buffers(bufsize, descriptor.in_channels, descriptor.out_channels);
            r.reset_dll(f_host, device.as_ref());
            r.xrun_handle()
        };

        if priority >= 0 {
            crate::rt::configure_best_effort("owbridge-jack-rt", priority);
        }

        let process = Process {
            resampler: resampler.clone(),
            device: device.clone(),
            audio_in_ports,
            audio_out_ports,
            midi_in_port,
            midi_out_port,
            pending_bufsize: Arc::new(AtomicU32::new(0)),
            pending_samplerate: Arc::new(AtomicU32::new(0)),
            host_input_scratch: vec![0.0; bufsize as usize * descriptor.in_channels.max(1)],
            o2h_midi_pending: Vec::new(),
            f_host,
        };
        let notifications = Notifications {
            device: device.clone(),
            pending_bufsize: process.pending_bufsize.clone(),
            pending_samplerate: process.pending_samplerate.clone(),
            xrun_count,
            input_port_names,
        };

        let client = client
            .activate_async(notifications, process)
            .map_err(|source| BridgeError::ProcessCallbackInstallFailed { source })?;

        info!("jack bridge activated: f_host={f_host} bufsize={bufsize}");

        Ok(Self {
            client: Some(client),
            resampler,
            device,
        })
    }
}

impl Drop for JackBridge {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.deactivate();
        }
        self.device.set_status(DeviceStatus::Stop);
    }
}
