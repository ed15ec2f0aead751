//! EXI bus emulation.
//!
//! The external interface of the GameCube and Wii: three channels of a
//! shared serial bus, each with its own register file, chip-select
//! lines, and slots for up to three devices (memory cards, the AD16
//! diagnostic unit, serial-port peripherals).
//!
//! The embedder maps the register block into its MMIO space via
//! `MemInterface32`, drives time through the shared `Timing` handle,
//! and drains due events with `run_events`. The aggregated interrupt
//! line is exposed as an atomic flag for the processor interface.

mod channel;
mod device;
mod mem;
mod state;
mod timing;
mod utils;

use log::warn;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc
};

use channel::Channel;
use device::create_device;

pub use channel::{
    EXI_STATUS, EXI_DMAADDR, EXI_DMALENGTH, EXI_DMACONTROL, EXI_IMMDATA, NUM_DEVICES
};
pub use device::{DeviceType, ExiDevice};
pub use mem::MainRam;
pub use state::{Mode, State};
pub use timing::{EventId, FiredEvent, Timing};
pub use utils::meminterface::MemInterface32;

pub const NUM_CHANNELS: usize = 3;

/// GameCube CPU clock, in ticks per second. Transfer durations scale
/// with whatever rate the embedder's `Timing` runs at; this is the
/// stock one.
pub const GAMECUBE_CLOCK_RATE: u64 = 486_000_000;

/// Each channel's registers occupy 0x14 bytes of the MMIO block.
const CHANNEL_STRIDE: u32 = 0x14;

/// Devices attached at power-on.
///
/// Channel 2 always carries the AD16 and is not configurable.
pub struct ExiConfig {
    /// Memory card slot A (channel 0, device 0).
    pub slot_a: DeviceType,
    /// Memory card slot B (channel 1, device 0).
    pub slot_b: DeviceType,
    /// Serial port 1 (channel 0, device 2).
    pub serial_port_1: DeviceType,
}

impl Default for ExiConfig {
    fn default() -> Self {
        Self {
            slot_a:         DeviceType::MemoryCard,
            slot_b:         DeviceType::MemoryCard,
            serial_port_1:  DeviceType::None,
        }
    }
}

pub struct ExpansionInterface {
    channels:   [Channel; NUM_CHANNELS],
    timing:     Timing,
    irq:        Arc<AtomicBool>,
}

impl ExpansionInterface {
    pub fn new(config: &ExiConfig, ram: MainRam, timing: Timing) -> Self {
        let mut channels = [
            Channel::new(0, ram.clone(), timing.clone()),
            Channel::new(1, ram.clone(), timing.clone()),
            Channel::new(2, ram, timing.clone()),
        ];

        channels[0].add_device(0, create_device(config.slot_a, 0), false);
        channels[0].add_device(2, create_device(config.serial_port_1, 0), false);
        channels[1].add_device(0, create_device(config.slot_b, 1), false);
        channels[2].add_device(0, create_device(DeviceType::AD16, 2), false);

        Self {
            channels,
            timing,
            irq: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The aggregated interrupt line, for wiring into the embedder's
    /// processor interface. High while any channel has an unmasked
    /// pending interrupt.
    pub fn interrupt_line(&self) -> Arc<AtomicBool> {
        self.irq.clone()
    }

    pub fn interrupt_requested(&self) -> bool {
        self.irq.load(Ordering::Acquire)
    }

    /// Dispatch one fired event. Returns false if the event belongs to
    /// another component.
    pub fn handle_event(&mut self, fired: FiredEvent) -> bool {
        for channel in self.channels.iter_mut() {
            if fired.event == channel.xfer_event() {
                if channel.on_transfer_complete() {
                    self.update_interrupts();
                }
                return true;
            }
            if fired.event == channel.update_irq_event() {
                self.update_interrupts();
                return true;
            }
        }
        false
    }

    /// Drain and dispatch everything currently due. For embedders that
    /// share the timing queue with other components, route through
    /// `handle_event` instead.
    pub fn run_events(&mut self) {
        while let Some(fired) = self.timing.next_due() {
            if !self.handle_event(fired) {
                warn!("EXI: dropped foreign event {}", self.timing.event_name(fired.event));
            }
        }
    }

    /// Re-evaluate every channel and drive the interrupt line.
    pub fn update_interrupts(&mut self) {
        let cause = self.channels.iter_mut()
            .any(|channel| channel.is_causing_interrupt());
        self.irq.store(cause, Ordering::Release);
    }

    /// Hot-swap the device in a slot. The affected channel raises a
    /// presence-change interrupt so the guest rescans it.
    pub fn change_device(&mut self, channel: usize, slot: usize, device_type: DeviceType) {
        let device = create_device(device_type, channel as u32);
        self.channels[channel].add_device(slot, device, true);
    }

    /// First attached device of the given type, across all channels.
    pub fn find_device(&mut self, device_type: DeviceType, custom_index: Option<u32>) -> Option<&mut dyn ExiDevice> {
        for channel in self.channels.iter_mut() {
            if let Some(device) = channel.find_device(device_type, custom_index) {
                return Some(device);
            }
        }
        None
    }

    pub fn pause_and_lock(&mut self, lock: bool, unpause_on_unlock: bool) {
        for channel in self.channels.iter_mut() {
            channel.pause_and_lock(lock, unpause_on_unlock);
        }
    }

    pub fn do_state(&mut self, state: &mut State) {
        for channel in self.channels.iter_mut() {
            channel.do_state(state);
        }
        self.update_interrupts();
    }
}

impl MemInterface32 for ExpansionInterface {
    fn read_word(&mut self, addr: u32) -> u32 {
        let channel = (addr / CHANNEL_STRIDE) as usize;
        if channel < NUM_CHANNELS {
            self.channels[channel].read_register(addr % CHANNEL_STRIDE)
        } else {
            warn!("EXI: read from unmapped address {:X}", addr);
            0
        }
    }

    fn write_word(&mut self, addr: u32, data: u32) {
        let channel = (addr / CHANNEL_STRIDE) as usize;
        if channel < NUM_CHANNELS {
            self.channels[channel].write_register(addr % CHANNEL_STRIDE, data);
        } else {
            warn!("EXI: write to unmapped address {:X}", addr);
        }
    }
}
