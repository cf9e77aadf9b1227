//! Interrupt controller.
//!
//! Requested interrupts are tracked as a bitmask whose bit order is the
//! current priority order. Whenever a priority register changes, the sort
//! is rebuilt and every in-flight request is carried over to its new bit.

use crate::sh4regs::{reg_offset, INTEVT_OFFSET, IPRA_OFFSET, IPRB_OFFSET, IPRC_OFFSET};
use crate::{Sh4, SR_BL, SR_I, SR_MD, SR_RB};

pub const NUM_INTERRUPTS: usize = 28;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Irl9,
    Irl11,
    Irl13,
    Hudi,
    Gpio,
    Dmte0,
    Dmte1,
    Dmte2,
    Dmte3,
    Dmae,
    Tuni0,
    Tuni1,
    Tuni2,
    Ticpi2,
    RtcAti,
    RtcPri,
    RtcCui,
    SciEri,
    SciRxi,
    SciTxi,
    SciTei,
    ScifEri,
    ScifRxi,
    ScifBri,
    ScifTxi,
    WdtIti,
    RefRcmi,
    RefRovi,
}

pub(crate) const INTERRUPT_IDS: [Interrupt; NUM_INTERRUPTS] = [
    Interrupt::Irl9,
    Interrupt::Irl11,
    Interrupt::Irl13,
    Interrupt::Hudi,
    Interrupt::Gpio,
    Interrupt::Dmte0,
    Interrupt::Dmte1,
    Interrupt::Dmte2,
    Interrupt::Dmte3,
    Interrupt::Dmae,
    Interrupt::Tuni0,
    Interrupt::Tuni1,
    Interrupt::Tuni2,
    Interrupt::Ticpi2,
    Interrupt::RtcAti,
    Interrupt::RtcPri,
    Interrupt::RtcCui,
    Interrupt::SciEri,
    Interrupt::SciRxi,
    Interrupt::SciTxi,
    Interrupt::SciTei,
    Interrupt::ScifEri,
    Interrupt::ScifRxi,
    Interrupt::ScifBri,
    Interrupt::ScifTxi,
    Interrupt::WdtIti,
    Interrupt::RefRcmi,
    Interrupt::RefRovi,
];

pub(crate) struct InterruptInfo {
    pub intevt: u32,
    pub default_priority: u32,
    /// Register-table offset of the IPR register carrying the dynamic
    /// priority, if any.
    pub ipr: Option<usize>,
    pub ipr_shift: u32,
}

const fn fixed(intevt: u32, priority: u32) -> InterruptInfo {
    InterruptInfo {
        intevt,
        default_priority: priority,
        ipr: None,
        ipr_shift: 0,
    }
}

const fn ipr(intevt: u32, ipr_addr: u32, ipr_shift: u32) -> InterruptInfo {
    InterruptInfo {
        intevt,
        default_priority: 0,
        ipr: Some(reg_offset(ipr_addr)),
        ipr_shift,
    }
}

const IPRA: u32 = 0x1fd00004;
const IPRB: u32 = 0x1fd00008;
const IPRC: u32 = 0x1fd0000c;

pub(crate) static INTERRUPTS: [InterruptInfo; NUM_INTERRUPTS] = [
    fixed(0x320, 6),     // IRL9
    fixed(0x360, 4),     // IRL11
    fixed(0x3a0, 2),     // IRL13
    ipr(0x600, IPRC, 0), // HUDI
    ipr(0x620, IPRC, 12), // GPIO
    ipr(0x640, IPRC, 8), // DMTE0
    ipr(0x660, IPRC, 8), // DMTE1
    ipr(0x680, IPRC, 8), // DMTE2
    ipr(0x6a0, IPRC, 8), // DMTE3
    ipr(0x6c0, IPRC, 8), // DMAE
    ipr(0x400, IPRA, 12), // TUNI0
    ipr(0x420, IPRA, 8), // TUNI1
    ipr(0x440, IPRA, 4), // TUNI2
    ipr(0x460, IPRA, 4), // TICPI2
    ipr(0x480, IPRA, 0), // RTC ATI
    ipr(0x4a0, IPRA, 0), // RTC PRI
    ipr(0x4c0, IPRA, 0), // RTC CUI
    ipr(0x4e0, IPRB, 4), // SCI ERI
    ipr(0x500, IPRB, 4), // SCI RXI
    ipr(0x520, IPRB, 4), // SCI TXI
    ipr(0x540, IPRB, 4), // SCI TEI
    ipr(0x700, IPRC, 4), // SCIF ERI
    ipr(0x720, IPRC, 4), // SCIF RXI
    ipr(0x740, IPRC, 4), // SCIF BRI
    ipr(0x760, IPRC, 4), // SCIF TXI
    ipr(0x560, IPRB, 12), // WDT ITI
    ipr(0x580, IPRB, 8), // REF RCMI
    ipr(0x5a0, IPRB, 8), // REF ROVI
];

// addresses above must stay in sync with the declaration table
const _: () = assert!(reg_offset(IPRA) == IPRA_OFFSET);
const _: () = assert!(reg_offset(IPRB) == IPRB_OFFSET);
const _: () = assert!(reg_offset(IPRC) == IPRC_OFFSET);

impl Sh4 {
    pub fn request_interrupt(&mut self, intr: Interrupt) {
        self.requested_interrupts |= self.sort_id[intr as usize];
        self.update_pending_interrupts();
    }

    pub fn unrequest_interrupt(&mut self, intr: Interrupt) {
        self.requested_interrupts &= !self.sort_id[intr as usize];
        self.update_pending_interrupts();
    }

    pub fn requested_interrupts(&self) -> u64 {
        self.requested_interrupts
    }

    pub fn pending_interrupts(&self) -> u64 {
        self.pending_interrupts
    }

    pub fn sorted_interrupts(&self) -> &[Interrupt; NUM_INTERRUPTS] {
        &self.sorted_interrupts
    }

    pub fn sort_ids(&self) -> &[u64; NUM_INTERRUPTS] {
        &self.sort_id
    }

    pub fn priority_masks(&self) -> &[u64; 16] {
        &self.priority_mask
    }

    /// Current priority of an interrupt kind: the IPR nibble when one is
    /// assigned, the fixed default otherwise.
    pub(crate) fn interrupt_priority(&self, id: usize) -> u32 {
        let info = &INTERRUPTS[id];
        match info.ipr {
            Some(offset) => ((self.regs[offset].value & 0xffff) >> info.ipr_shift) & 0xf,
            None => info.default_priority,
        }
    }

    /// Rebuild the bit order of the pending mask from the current IPR
    /// values and re-home every latched request onto its new bit.
    pub(crate) fn reprioritize_interrupts(&mut self) {
        let old = self.requested_interrupts;
        self.requested_interrupts = 0;

        let mut n = 0;
        for i in 0..16u32 {
            // ties within one level: the higher id lands on a lower bit
            for j in (0..NUM_INTERRUPTS).rev() {
                if self.interrupt_priority(j) != i {
                    continue;
                }

                let was_requested = old & self.sort_id[j] != 0;

                self.sorted_interrupts[n] = INTERRUPT_IDS[j];
                self.sort_id[j] = 1u64 << n;
                n += 1;

                if was_requested {
                    self.requested_interrupts |= self.sort_id[j];
                }
            }

            // mask covering every interrupt up to the current priority
            self.priority_mask[i as usize] = (1u64 << n) - 1;
        }

        self.update_pending_interrupts();
    }

    pub(crate) fn update_pending_interrupts(&mut self) {
        let min_priority = (self.ctx.sr.0 & SR_I) >> 4;
        let priority_mask = if self.ctx.sr.0 & SR_BL != 0 {
            0
        } else {
            !self.priority_mask[min_priority as usize]
        };
        self.pending_interrupts = self.requested_interrupts & priority_mask;
    }

    pub(crate) fn check_pending_interrupts(&mut self) {
        if self.pending_interrupts == 0 {
            return;
        }

        // service the highest priority bit in the pending vector
        let n = 63 - self.pending_interrupts.leading_zeros() as usize;
        let intr = self.sorted_interrupts[n];
        let info = &INTERRUPTS[intr as usize];

        self.regs[INTEVT_OFFSET].value = info.intevt;

        let old_sr = self.ctx.sr.0;
        self.ctx.ssr = old_sr;
        self.ctx.spc = self.ctx.pc;
        self.ctx.sgr = self.ctx.r[15];
        self.ctx.sr.0 |= SR_BL | SR_MD | SR_RB;
        self.ctx.pc = self.ctx.vbr.wrapping_add(0x600);

        self.sr_updated(old_sr);
    }
}

pub(crate) fn write_ipr(cpu: &mut Sh4, _old_value: u32) {
    cpu.reprioritize_interrupts();
}
