//! DMA controller shim.
//!
//! Only DDT (on-demand) transfers are modelled: a peripheral calls
//! straight into `ddt` and the copy happens synchronously on the bus.
//! DMAC-arbitrated transfers are rejected at configuration time.

use bitfield::bitfield;

use crate::sh4intc::Interrupt;
use crate::sh4regs::{
    CHCR0_OFFSET, CHCR1_OFFSET, CHCR2_OFFSET, CHCR3_OFFSET, DAR0_OFFSET, DAR1_OFFSET, DAR2_OFFSET,
    DAR3_OFFSET, DMAOR_OFFSET, DMATCR0_OFFSET, DMATCR1_OFFSET, DMATCR2_OFFSET, DMATCR3_OFFSET,
    SAR0_OFFSET, SAR1_OFFSET, SAR2_OFFSET, SAR3_OFFSET,
};
use crate::Sh4;

bitfield! {
    #[derive(Copy, Clone, Default)]
    pub struct Chcr(u32);
    impl Debug;

    pub de, set_de: 0;
    pub te, set_te: 1;
    pub ie, set_ie: 2;
    pub ts, set_ts: 6, 4;
    pub tm, set_tm: 7;
    pub rs, set_rs: 11, 8;
    pub sm, set_sm: 13, 12;
    pub dm, set_dm: 15, 14;
}

bitfield! {
    #[derive(Copy, Clone, Default)]
    pub struct Dmaor(u32);
    impl Debug;

    pub dme, set_dme: 0;
    pub nmif, set_nmif: 1;
    pub ae, set_ae: 2;
    pub ddt, set_ddt: 15;
}

/// A DDT transfer request as issued by a peripheral.
pub struct Dtr {
    pub channel: usize,
    /// Direction: `true` transfers from `addr` towards the channel
    /// destination, `false` from the channel source towards `addr`.
    pub rw: bool,
    pub addr: u32,
    /// Host buffer for a single-address transfer; `None` selects
    /// dual-address mode driven by the channel registers.
    pub data: Option<*mut u8>,
    /// Byte count, used by single-address transfers only.
    pub size: u32,
}

const SAR_OFFSETS: [usize; 4] = [SAR0_OFFSET, SAR1_OFFSET, SAR2_OFFSET, SAR3_OFFSET];
const DAR_OFFSETS: [usize; 4] = [DAR0_OFFSET, DAR1_OFFSET, DAR2_OFFSET, DAR3_OFFSET];
const DMATCR_OFFSETS: [usize; 4] = [
    DMATCR0_OFFSET,
    DMATCR1_OFFSET,
    DMATCR2_OFFSET,
    DMATCR3_OFFSET,
];
const CHCR_OFFSETS: [usize; 4] = [CHCR0_OFFSET, CHCR1_OFFSET, CHCR2_OFFSET, CHCR3_OFFSET];

const DMTE: [Interrupt; 4] = [
    Interrupt::Dmte0,
    Interrupt::Dmte1,
    Interrupt::Dmte2,
    Interrupt::Dmte3,
];

impl Sh4 {
    pub fn ddt(&mut self, dtr: &Dtr) {
        if let Some(data) = dtr.data {
            // single address mode, straight copy between the host buffer
            // and guest memory
            if dtr.rw {
                self.bus.memcpy_from_host(dtr.addr, data, dtr.size);
            } else {
                self.bus.memcpy_to_host(data, dtr.addr, dtr.size);
            }
            return;
        }

        // dual address mode, driven by the channel registers
        let ch = dtr.channel;
        if ch >= 4 {
            panic!("unexpected DMA channel {}", ch);
        }

        let src = if dtr.rw {
            dtr.addr
        } else {
            self.regs[SAR_OFFSETS[ch]].value
        };
        let dst = if dtr.rw {
            self.regs[DAR_OFFSETS[ch]].value
        } else {
            dtr.addr
        };
        let size = self.regs[DMATCR_OFFSETS[ch]].value * 32;

        self.bus.memcpy(dst, src, size);

        // advance the transfer addresses and zero the remaining count
        self.regs[SAR_OFFSETS[ch]].value = src.wrapping_add(size);
        self.regs[DAR_OFFSETS[ch]].value = dst.wrapping_add(size);
        self.regs[DMATCR_OFFSETS[ch]].value = 0;

        // flag completion to the guest
        let mut chcr = Chcr(self.regs[CHCR_OFFSETS[ch]].value);
        chcr.set_te(true);
        self.regs[CHCR_OFFSETS[ch]].value = chcr.0;

        if chcr.ie() {
            self.request_interrupt(DMTE[ch]);
        }
    }

    pub(crate) fn check_dma(&mut self, channel: usize) {
        if channel >= 4 {
            panic!("unexpected DMA channel {}", channel);
        }

        let chcr = Chcr(self.regs[CHCR_OFFSETS[channel]].value);
        let dmaor = Dmaor(self.regs[DMAOR_OFFSET].value);

        if !(dmaor.ddt() || !dmaor.dme() || !chcr.de()) {
            panic!("non-DDT DMA not supported on channel {}", channel);
        }
    }
}

pub(crate) fn write_chcr<const N: usize>(cpu: &mut Sh4, _old_value: u32) {
    cpu.check_dma(N);
}

pub(crate) fn write_dmaor(cpu: &mut Sh4, _old_value: u32) {
    for channel in 0..4 {
        cpu.check_dma(channel);
    }
}
