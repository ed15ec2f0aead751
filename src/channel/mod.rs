/// A single EXI channel.
///
/// Owns the five-register MMIO file, the immediate/DMA transfer
/// engine, three chip-selectable device slots, and the interrupt
/// aggregation feeding the parent ExpansionInterface.

use bitflags::bitflags;
use log::{debug, warn};

use crate::device::{create_device, DeviceType, ExiDevice};
use crate::mem::MainRam;
use crate::state::{Mode, State};
use crate::timing::{EventId, Timing};
use crate::utils::bits::u32;

/// Register offsets from the channel base.
pub const EXI_STATUS:       u32 = 0x00;
pub const EXI_DMAADDR:      u32 = 0x04;
pub const EXI_DMALENGTH:    u32 = 0x08;
pub const EXI_DMACONTROL:   u32 = 0x0C;
pub const EXI_IMMDATA:      u32 = 0x10;

/// Device slots per channel.
pub const NUM_DEVICES: usize = 3;

/// Transfer directions in the RW control field.
const EXI_READ:         u32 = 0;
const EXI_WRITE:        u32 = 1;
const EXI_READWRITE:    u32 = 2;

/// Progress registers of an active DMA snap to 32-byte boundaries.
const DMA_ALIGN: u32 = 0xFFFF_FFE0;

bitflags!{
    #[derive(Default)]
    pub struct Status: u32 {
        const ROMDIS        = u32::bit(13);
        const EXT           = u32::bit(12);
        const EXTINT        = u32::bit(11);
        const EXTINTMASK    = u32::bit(10);
        const CHIP_SELECT   = u32::bits(7, 9);
        const CLK           = u32::bits(4, 6);
        const TCINT         = u32::bit(3);
        const TCINTMASK     = u32::bit(2);
        const EXIINT        = u32::bit(1);
        const EXIINTMASK    = u32::bit(0);
    }
}

bitflags!{
    #[derive(Default)]
    pub struct Control: u32 {
        const TLEN      = u32::bits(4, 5);
        const RW        = u32::bits(2, 3);
        const DMA       = u32::bit(1);
        const TSTART    = u32::bit(0);
    }
}

pub struct Channel {
    channel_id: u32,

    status:     Status,
    control:    Control,
    dma_addr:   u32,
    dma_length: u32,
    imm_data:   u32,

    // Snapshot captured at transfer kick-off, used to interpolate the
    // progress registers while the completion event is pending.
    dma_time_start:     u64,
    dma_time_length:    u64,
    dma_data_start:     u32,
    dma_data_length:    u32,

    devices:    [Box<dyn ExiDevice>; NUM_DEVICES],

    ram:        MainRam,
    timing:     Timing,

    xfer_event:         EventId,
    update_irq_event:   EventId,
}

impl Channel {
    pub fn new(channel_id: u32, ram: MainRam, timing: Timing) -> Self {
        let xfer_event = timing.register_event(&format!("EXI channel {} transfer", channel_id));
        let update_irq_event = timing.register_event(&format!("EXI channel {} update interrupts", channel_id));

        let mut status = Status::default();
        // Channels with a card slot boot with a pending presence
        // interrupt so software rescans the slot.
        if channel_id < 2 {
            status.insert(Status::EXTINT);
        }
        if channel_id == 1 {
            status |= Status::from_bits_truncate(1 << 7);
        }

        Self {
            channel_id,
            status,
            control:    Control::default(),
            dma_addr:   0,
            dma_length: 0,
            imm_data:   0,

            dma_time_start:     0,
            dma_time_length:    0,
            dma_data_start:     0,
            dma_data_length:    0,

            devices: [
                create_device(DeviceType::None, channel_id),
                create_device(DeviceType::None, channel_id),
                create_device(DeviceType::None, channel_id),
            ],

            ram,
            timing,
            xfer_event,
            update_irq_event,
        }
    }

    pub(crate) fn xfer_event(&self) -> EventId {
        self.xfer_event
    }

    pub(crate) fn update_irq_event(&self) -> EventId {
        self.update_irq_event
    }

    pub fn read_register(&mut self, offset: u32) -> u32 {
        match offset {
            EXI_STATUS => {
                // EXT is live: recomputed from the card slot on every
                // read, never latched from writes.
                if self.channel_id == 2 {
                    self.status.remove(Status::EXT);
                } else {
                    let present = self.get_device(1).map_or(false, |d| d.is_present());
                    self.status.set(Status::EXT, present);
                }
                self.status.bits()
            },
            EXI_DMAADDR => {
                if self.dma_in_flight() {
                    self.dma_addr = self.polled_dma_addr() & DMA_ALIGN;
                }
                self.dma_addr
            },
            EXI_DMALENGTH => {
                if self.dma_in_flight() {
                    self.dma_length = self.polled_dma_length() & DMA_ALIGN;
                }
                self.dma_length
            },
            EXI_DMACONTROL => self.control.bits(),
            EXI_IMMDATA => self.imm_data,
            _ => {
                warn!("EXI channel {}: read from unmapped offset {:X}", self.channel_id, offset);
                0
            }
        }
    }

    pub fn write_register(&mut self, offset: u32, data: u32) {
        match offset {
            EXI_STATUS => self.write_status(data),
            EXI_DMAADDR => self.dma_addr = data,
            EXI_DMALENGTH => self.dma_length = data,
            EXI_DMACONTROL => self.write_control(data),
            EXI_IMMDATA => self.imm_data = data,
            _ => warn!("EXI channel {}: write to unmapped offset {:X}", self.channel_id, offset),
        }
    }

    /// The channel's transfer event came due.
    ///
    /// Returns true if the caller must re-evaluate interrupts.
    pub fn on_transfer_complete(&mut self) -> bool {
        debug!("EXI channel {}: transfer complete", self.channel_id);
        let raise_tc = self.control.contains(Control::DMA);
        if raise_tc {
            self.dma_length = 0;
            self.dma_addr = self.dma_data_start.wrapping_add(self.dma_data_length);
            self.dma_time_start = 0;
            self.dma_time_length = 0;
            self.dma_data_start = 0;
            self.dma_data_length = 0;
            self.status.insert(Status::TCINT);
        }
        self.control.remove(Control::TSTART);
        raise_tc
    }

    /// Aggregated, masked interrupt state of this channel.
    ///
    /// The card slot is always polled for a device interrupt, whatever
    /// chip-select says; other slots only when selected.
    pub fn is_causing_interrupt(&mut self) -> bool {
        if self.channel_id != 2 && self.devices[0].is_interrupt_set() {
            self.status.insert(Status::EXIINT);
        } else {
            let cs = self.chip_select();
            if self.get_device(cs).map_or(false, |d| d.is_interrupt_set()) {
                self.status.insert(Status::EXIINT);
            }
        }

        let s = self.status;
        (s.contains(Status::EXIINT) && s.contains(Status::EXIINTMASK))
            || (s.contains(Status::TCINT) && s.contains(Status::TCINTMASK))
            || (s.contains(Status::EXTINT) && s.contains(Status::EXTINTMASK))
    }

    /// Install a device, replacing whatever occupies the slot.
    ///
    /// With `notify` set the guest sees a presence-change interrupt
    /// (channels 0 and 1 only) and should rescan EXT.
    pub fn add_device(&mut self, slot: usize, device: Box<dyn ExiDevice>, notify: bool) {
        debug_assert!(slot < NUM_DEVICES);
        self.devices[slot] = device;

        if notify && self.channel_id != 2 {
            self.status.insert(Status::EXTINT);
            self.timing.schedule_threadsafe_immediate(self.update_irq_event, self.channel_id);
        }
    }

    /// First device on this channel answering for the given type.
    pub fn find_device(&mut self, device_type: DeviceType, custom_index: Option<u32>) -> Option<&mut dyn ExiDevice> {
        for device in self.devices.iter_mut() {
            if device.matches(device_type, custom_index) {
                return Some(device.as_mut());
            }
        }
        None
    }

    pub fn pause_and_lock(&mut self, lock: bool, unpause_on_unlock: bool) {
        for device in self.devices.iter_mut() {
            device.pause_and_lock(lock, unpause_on_unlock);
        }
    }

    pub fn do_state(&mut self, state: &mut State) {
        let mut status_bits = self.status.bits();
        state.do_u32(&mut status_bits);
        self.status = Status::from_bits_truncate(status_bits);

        state.do_u32(&mut self.dma_addr);
        state.do_u32(&mut self.dma_length);

        let mut control_bits = self.control.bits();
        state.do_u32(&mut control_bits);
        self.control = Control::from_bits_truncate(control_bits);

        state.do_u32(&mut self.imm_data);

        for slot in 0..NUM_DEVICES {
            let mut tag = self.devices[slot].device_type().tag();
            state.do_u32(&mut tag);
            let stored_type = DeviceType::from_tag(tag);

            if stored_type == self.devices[slot].device_type() {
                self.devices[slot].do_state(state);
            } else {
                // The stored slot held a different device. Run its
                // state through a fresh instance and, on load, swap it
                // in without signalling a presence change.
                let mut device = create_device(stored_type, self.channel_id);
                device.do_state(state);
                if state.mode() == Mode::Load {
                    self.add_device(slot, device, false);
                }
            }
        }
    }
}

// Internal
impl Channel {
    fn chip_select(&self) -> u32 {
        (self.status & Status::CHIP_SELECT).bits() >> 7
    }

    /// Bus frequency selected by CLK, in Hz.
    fn clock_rate(&self) -> u64 {
        let clk = (self.status & Status::CLK).bits() >> 4;
        (1 << clk) * 1_000_000
    }

    /// Decode the one-hot chip-select code to a device slot.
    fn get_device(&mut self, chip_select: u32) -> Option<&mut Box<dyn ExiDevice>> {
        match chip_select {
            1 => Some(&mut self.devices[0]),
            2 => Some(&mut self.devices[1]),
            4 => Some(&mut self.devices[2]),
            _ => None
        }
    }

    fn dma_in_flight(&self) -> bool {
        self.control.contains(Control::TSTART) && self.control.contains(Control::DMA)
    }

    fn polled_dma_addr(&self) -> u32 {
        let elapsed = self.timing.ticks() - self.dma_time_start;
        if elapsed >= self.dma_time_length {
            self.dma_data_start.wrapping_add(self.dma_data_length)
        } else {
            self.dma_data_start.wrapping_add(self.dma_progress(elapsed))
        }
    }

    fn polled_dma_length(&self) -> u32 {
        let elapsed = self.timing.ticks() - self.dma_time_start;
        if elapsed >= self.dma_time_length {
            0
        } else {
            self.dma_data_length - self.dma_progress(elapsed)
        }
    }

    /// Bytes transferred after `elapsed` ticks of an active DMA.
    ///
    /// Widened to 128 bits: length times elapsed can exceed u64 for
    /// maximum-length transfers on a slow clock.
    fn dma_progress(&self, elapsed: u64) -> u32 {
        ((self.dma_data_length as u128) * (elapsed as u128) / (self.dma_time_length as u128)) as u32
    }

    fn write_status(&mut self, data: u32) {
        let new = Status::from_bits_truncate(data);

        self.status.set(Status::EXIINTMASK, new.contains(Status::EXIINTMASK));
        if new.contains(Status::EXIINT) {
            debug!("EXI channel {}: cleared EXIINT", self.channel_id);
            self.status.remove(Status::EXIINT);
        }

        self.status.set(Status::TCINTMASK, new.contains(Status::TCINTMASK));
        if new.contains(Status::TCINT) {
            debug!("EXI channel {}: cleared TCINT", self.channel_id);
            self.status.remove(Status::TCINT);
        }

        if (self.status & Status::CLK) != (new & Status::CLK) {
            self.status = (self.status - Status::CLK) | (new & Status::CLK);
            debug!("EXI channel {}: clock rate {} Hz", self.channel_id, self.clock_rate());
        }

        self.status.set(Status::EXTINTMASK, new.contains(Status::EXTINTMASK));
        if new.contains(Status::EXTINT) {
            debug!("EXI channel {}: cleared EXTINT", self.channel_id);
            self.status.remove(Status::EXTINT);
        }

        // ROMDIS latches: once the boot ROM is disabled it stays so.
        if !self.status.contains(Status::ROMDIS) && new.contains(Status::ROMDIS) {
            debug!("EXI channel {}: setting ROMDIS", self.channel_id);
            self.status.insert(Status::ROMDIS);
        }

        if (self.status & Status::CHIP_SELECT) != (new & Status::CHIP_SELECT) {
            let old_cs = self.chip_select();
            if let Some(device) = self.get_device(old_cs) {
                device.set_cs(0);
            }
            self.status = (self.status - Status::CHIP_SELECT) | (new & Status::CHIP_SELECT);
            debug!("EXI channel {}: chip select {}", self.channel_id, self.chip_select());
            let new_cs = self.chip_select();
            if let Some(device) = self.get_device(new_cs) {
                device.set_cs(1);
            }
        }

        self.timing.schedule_threadsafe_immediate(self.update_irq_event, self.channel_id);
    }

    fn write_control(&mut self, data: u32) {
        if self.control.contains(Control::TSTART) {
            debug!("EXI channel {}: control write while transfer in progress, ignored", self.channel_id);
            return;
        }

        self.control = Control::from_bits_truncate(data);

        if self.control.contains(Control::TSTART) {
            self.start_transfer();
        }
    }

    fn start_transfer(&mut self) {
        let slot = match self.chip_select() {
            1 => 0,
            2 => 1,
            4 => 2,
            cs => {
                // No addressable device. The transfer is left hanging
                // with TSTART latched, matching observed hardware-side
                // behaviour.
                debug!("EXI channel {}: transfer with no device selected (CS {})", self.channel_id, cs);
                return;
            }
        };

        let rw = (self.control & Control::RW).bits() >> 2;

        let xfer_size = if !self.control.contains(Control::DMA) {
            let size = ((self.control & Control::TLEN).bits() >> 4) + 1;
            debug!("EXI channel {}: imm transfer rw {} x{}", self.channel_id, rw, size);
            match rw {
                EXI_READ => self.imm_data = self.devices[slot].imm_read(size),
                EXI_WRITE => self.devices[slot].imm_write(self.imm_data, size),
                EXI_READWRITE => {
                    let mut data = self.imm_data;
                    self.devices[slot].imm_readwrite(&mut data, size);
                    self.imm_data = data;
                },
                _ => {
                    debug_assert!(false, "EXI imm: unknown transfer type {}", rw);
                    self.control.remove(Control::TSTART);
                    return;
                }
            }
            size
        } else {
            debug!("EXI channel {}: dma transfer rw {} @{:08X} x{:X}",
                self.channel_id, rw, self.dma_addr, self.dma_length);
            let devices = &mut self.devices;
            let copied = match rw {
                EXI_READ => self.ram.with_region(self.dma_addr, self.dma_length,
                    |region| devices[slot].dma_read(region)),
                EXI_WRITE => self.ram.with_region(self.dma_addr, self.dma_length,
                    |region| devices[slot].dma_write(region)),
                _ => {
                    debug_assert!(false, "EXI dma: unknown transfer type {}", rw);
                    self.control.remove(Control::TSTART);
                    return;
                }
            };
            if copied.is_none() {
                warn!("EXI channel {}: dma outside main memory @{:08X} x{:X}",
                    self.channel_id, self.dma_addr, self.dma_length);
            }
            self.dma_length
        };

        // Model the wall-clock duration of the transfer: the device
        // side already happened, the completion event makes the guest
        // observe the bus time.
        let xfer_time = 8 * (xfer_size as u64) * self.timing.ticks_per_second() / self.clock_rate();

        self.dma_time_start = self.timing.ticks();
        self.dma_time_length = xfer_time;
        self.dma_data_start = self.dma_addr;
        self.dma_data_length = self.dma_length;

        self.timing.schedule(xfer_time, self.xfer_event, self.channel_id);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.timing.remove_event(self.xfer_event);
        self.timing.remove_event(self.update_irq_event);
    }
}
