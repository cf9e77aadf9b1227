//! Timer unit.
//!
//! The three channels are not ticked in emulated time. Each running
//! channel is represented by a deadline on the external scheduler; TCNT
//! is materialized from the remaining wall-clock time when the guest
//! reads it, and rebuilt into a fresh deadline whenever TSTR, TCR or
//! TCNT change underneath a running channel.

use crate::sh4intc::Interrupt;
use crate::sh4regs::{
    TCNT0_OFFSET, TCNT1_OFFSET, TCNT2_OFFSET, TCOR0_OFFSET, TCOR1_OFFSET, TCOR2_OFFSET,
    TCR0_OFFSET, TCR1_OFFSET, TCR2_OFFSET, TSTR_OFFSET,
};
use crate::{Sh4, SH4_CLOCK_FREQ};

const PERIPHERAL_CLOCK_FREQ: u64 = SH4_CLOCK_FREQ >> 2;

// TCR2-0 select the input clock as peripheral clock / 4 .. 1024; the
// three remaining encodings are reserved
const PERIPHERAL_SCALE: [u32; 8] = [2, 4, 6, 8, 10, 0, 0, 0];

const TCR_UNF: u32 = 0x100;
const TCR_UNIE: u32 = 0x20;

const TCOR_OFFSETS: [usize; 3] = [TCOR0_OFFSET, TCOR1_OFFSET, TCOR2_OFFSET];
const TCNT_OFFSETS: [usize; 3] = [TCNT0_OFFSET, TCNT1_OFFSET, TCNT2_OFFSET];
const TCR_OFFSETS: [usize; 3] = [TCR0_OFFSET, TCR1_OFFSET, TCR2_OFFSET];

const TUNI: [Interrupt; 3] = [Interrupt::Tuni0, Interrupt::Tuni1, Interrupt::Tuni2];

fn timer_freq(tcr: u32) -> u64 {
    PERIPHERAL_CLOCK_FREQ >> PERIPHERAL_SCALE[(tcr & 7) as usize]
}

fn cycles_to_nano(cycles: u64, freq: u64) -> u64 {
    cycles * 1_000_000_000 / freq
}

fn nano_to_cycles(nanos: u64, freq: u64) -> u64 {
    nanos * freq / 1_000_000_000
}

impl Sh4 {
    fn timer_started(&self, n: usize) -> bool {
        self.regs[TSTR_OFFSET].value & (1 << n) != 0
    }

    pub fn timer_handle(&self, n: usize) -> Option<crate::TimerHandle> {
        self.tmu_timers[n]
    }

    pub(crate) fn update_timer_start(&mut self) {
        for n in 0..3 {
            if self.timer_started(n) {
                // schedule the channel if not already running
                if self.tmu_timers[n].is_none() {
                    let tcnt = self.regs[TCNT_OFFSETS[n]].value;
                    let tcr = self.regs[TCR_OFFSETS[n]].value;
                    self.reschedule_timer(n, tcnt, tcr);
                }
            } else if let Some(handle) = self.tmu_timers[n].take() {
                self.scheduler.cancel_timer(handle);
            }
        }
    }

    pub(crate) fn update_timer_control(&mut self, n: usize) {
        if self.timer_started(n) {
            // carry the projected count over to the new clock select
            let count = self.timer_count(n);
            let tcr = self.regs[TCR_OFFSETS[n]].value;
            self.reschedule_timer(n, count, tcr);
        }

        let tcr = self.regs[TCR_OFFSETS[n]].value;
        if tcr & TCR_UNIE == 0 || tcr & TCR_UNF == 0 {
            self.unrequest_interrupt(TUNI[n]);
        }
    }

    pub(crate) fn update_timer_count(&mut self, n: usize) {
        if self.timer_started(n) {
            let tcnt = self.regs[TCNT_OFFSETS[n]].value;
            let tcr = self.regs[TCR_OFFSETS[n]].value;
            self.reschedule_timer(n, tcnt, tcr);
        }
    }

    /// TCNT values aren't kept up to date while a channel runs; project
    /// the count from the time remaining on the scheduled deadline.
    pub(crate) fn timer_count(&mut self, n: usize) -> u32 {
        if !self.timer_started(n) {
            return self.regs[TCNT_OFFSETS[n]].value;
        }

        let Some(handle) = self.tmu_timers[n] else {
            return self.regs[TCNT_OFFSETS[n]].value;
        };

        let tcr = self.regs[TCR_OFFSETS[n]].value;
        let freq = timer_freq(tcr);
        let remaining = self.scheduler.remaining_time(handle);

        nano_to_cycles(remaining, freq) as u32
    }

    fn reschedule_timer(&mut self, n: usize, tcnt: u32, tcr: u32) {
        let freq = timer_freq(tcr);
        let remaining = cycles_to_nano(tcnt as u64, freq);

        if let Some(handle) = self.tmu_timers[n].take() {
            self.scheduler.cancel_timer(handle);
        }

        self.tmu_timers[n] = Some(self.scheduler.schedule_timer(n, remaining));
    }

    /// Scheduler callback for an expired channel. The underflow latches
    /// until the guest clears TCR.UNF; the channel immediately rearms
    /// with the reload value.
    pub fn expire_timer(&mut self, n: usize) {
        // the fired handle is dead, forget it before rescheduling
        self.tmu_timers[n] = None;

        let tcr = self.regs[TCR_OFFSETS[n]].value | TCR_UNF;
        self.regs[TCR_OFFSETS[n]].value = tcr;

        if tcr & TCR_UNIE != 0 {
            self.request_interrupt(TUNI[n]);
        }

        let tcor = self.regs[TCOR_OFFSETS[n]].value;
        self.regs[TCNT_OFFSETS[n]].value = tcor;

        self.reschedule_timer(n, tcor, tcr);
    }
}

pub(crate) fn write_tstr(cpu: &mut Sh4, _old_value: u32) {
    cpu.update_timer_start();
}

pub(crate) fn write_tcr<const N: usize>(cpu: &mut Sh4, _old_value: u32) {
    cpu.update_timer_control(N);
}

pub(crate) fn write_tcnt<const N: usize>(cpu: &mut Sh4, _old_value: u32) {
    cpu.update_timer_count(N);
}

pub(crate) fn read_tcnt<const N: usize>(cpu: &mut Sh4) -> u32 {
    cpu.timer_count(N)
}
