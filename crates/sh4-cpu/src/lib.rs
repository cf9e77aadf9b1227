//! SH-4 CPU core.
//!
//! The core bundles the execution driver, the memory-mapped control
//! register fabric, the interrupt controller and the timer unit. Guest
//! code itself is produced and run by an external code cache; memory,
//! wall-clock timers and the debugger are likewise collaborators injected
//! at construction (see [`traits`]).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bitfield::bitfield;

pub mod sh4dmac;
pub mod sh4intc;
pub mod sh4mem;
pub mod sh4regs;
pub mod sh4tmu;
pub mod traits;

pub use sh4dmac::Dtr;
pub use sh4intc::{Interrupt, NUM_INTERRUPTS};
pub use sh4mem::MemoryData;
pub use sh4regs::{RegEffect, Register, NUM_REG_SLOTS};
pub use traits::{
    Block, BlockEntry, CodeCache, CoreRegion, Debugger, MemoryBus, RegionAccess, RegionHandle,
    Scheduler, TimerHandle,
};

pub const SH4_CLOCK_FREQ: u64 = 200_000_000;

// SR flag masks used by the hooks and exception entry
pub const SR_T: u32 = 1 << 0;
pub const SR_S: u32 = 1 << 1;
pub const SR_I: u32 = 0xf0;
pub const SR_FD: u32 = 1 << 15;
pub const SR_BL: u32 = 1 << 28;
pub const SR_RB: u32 = 1 << 29;
pub const SR_MD: u32 = 1 << 30;

pub const FPSCR_PR: u32 = 1 << 19;
pub const FPSCR_SZ: u32 = 1 << 20;
pub const FPSCR_FR: u32 = 1 << 21;

// flags handed to the block compiler
pub const SH4_DOUBLE_PR: u32 = 1 << 0;
pub const SH4_DOUBLE_SZ: u32 = 1 << 1;
pub const SH4_SINGLE_INSTR: u32 = 1 << 2;

bitfield! {
    #[derive(Copy, Clone, Default)]
    pub struct SrStatus(u32);
    impl Debug;

    pub t, set_t: 0;
    pub s, set_s: 1;
    // bits 2-3 reserved
    pub u32, imask, set_imask: 7, 4;
    pub q, set_q: 8;
    pub m, set_m: 9;
    // bits 10-14 reserved
    pub fd, set_fd: 15;
    // bits 16-27 reserved
    pub bl, set_bl: 28;
    pub rb, set_rb: 29;
    pub md, set_md: 30;
    // bit 31 reserved
}

bitfield! {
    #[derive(Copy, Clone, Default)]
    pub struct FpscrReg(u32);
    impl Debug;

    pub u32, rm, set_rm: 1, 0;
    pub u32, flag, set_flag: 6, 2;
    pub u32, enable, set_enable: 11, 7;
    pub u32, cause, set_cause: 17, 12;
    pub dn, set_dn: 18;
    pub pr, set_pr: 19;
    pub sz, set_sz: 20;
    pub fr, set_fr: 21;
    // bits 22-31 reserved
}

/// Architectural state shared with translated code. Blocks read and write
/// this record directly and decrement `num_cycles` in their epilogs.
#[derive(Default)]
pub struct Sh4Ctx {
    /// Active general register bank plus r8-r15.
    pub r: [u32; 16],
    /// Shadow of r0-r7 for the bank selected away by SR.RB.
    pub ralt: [u32; 8],

    /// Active FP bank.
    pub fr: [u32; 16],
    /// Shadow FP bank selected away by FPSCR.FR.
    pub xf: [u32; 16],

    pub pc: u32,
    pub pr: u32,
    pub sr: SrStatus,
    pub ssr: u32,
    pub spc: u32,
    pub sgr: u32,
    pub gbr: u32,
    pub vbr: u32,
    pub mach: u32,
    pub macl: u32,
    pub fpul: u32,
    pub fpscr: FpscrReg,

    /// Two 32-byte store queue lines.
    pub sq: [[u32; 8]; 2],

    /// Remaining cycle budget for the current slice; the run loop exits
    /// once it drops to zero or below.
    pub num_cycles: i64,
    /// Instructions retired, sampled once a second for the MIPS window.
    pub num_instrs: u64,
}

const MAX_MIPS_SAMPLES: usize = 60;

pub struct Sh4 {
    pub ctx: Sh4Ctx,

    pub(crate) regs: [Register; NUM_REG_SLOTS],
    pub(crate) cache: Box<[u8; sh4mem::SH4_CACHE_RAM_SIZE]>,

    pub(crate) requested_interrupts: u64,
    pub(crate) pending_interrupts: u64,
    pub(crate) sorted_interrupts: [Interrupt; NUM_INTERRUPTS],
    pub(crate) sort_id: [u64; NUM_INTERRUPTS],
    pub(crate) priority_mask: [u64; 16],

    pub(crate) tmu_timers: [Option<TimerHandle>; 3],

    breakpoints: BTreeMap<u32, u16>,

    pub(crate) bus: Box<dyn MemoryBus>,
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) code_cache: Box<dyn CodeCache>,
    pub(crate) debugger: Box<dyn Debugger>,

    mips: [f32; MAX_MIPS_SAMPLES],
    num_mips: usize,
    last_mips_time: Instant,
}

impl Sh4 {
    pub fn new(
        bus: Box<dyn MemoryBus>,
        scheduler: Box<dyn Scheduler>,
        code_cache: Box<dyn CodeCache>,
        debugger: Box<dyn Debugger>,
    ) -> Self {
        Self {
            ctx: Sh4Ctx::default(),
            regs: [sh4regs::REGISTER_NONE; NUM_REG_SLOTS],
            cache: Box::new([0; sh4mem::SH4_CACHE_RAM_SIZE]),
            requested_interrupts: 0,
            pending_interrupts: 0,
            sorted_interrupts: [Interrupt::Irl9; NUM_INTERRUPTS],
            sort_id: [0; NUM_INTERRUPTS],
            priority_mask: [0; 16],
            tmu_timers: [None; 3],
            breakpoints: BTreeMap::new(),
            bus,
            scheduler,
            code_cache,
            debugger,
            mips: [0.0; MAX_MIPS_SAMPLES],
            num_mips: 0,
            last_mips_time: Instant::now(),
        }
    }

    /// Reset the context and install register defaults and side effects.
    pub fn init(&mut self) {
        self.ctx = Sh4Ctx::default();
        self.ctx.pc = 0xa000_0000;
        self.ctx.pr = 0x0;
        self.ctx.sr = SrStatus(0x7000_00f0);
        self.ctx.fpscr = FpscrReg(0x0004_0001);

        self.cache.fill(0);

        sh4regs::init_register_defaults(&mut self.regs);
        self.install_register_effects();

        self.reprioritize_interrupts();
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.ctx.pc = pc;
    }

    /// Run a slice of guest time. The duration converts to a cycle budget
    /// with a floor of one cycle so callers can step block by block.
    pub fn run(&mut self, delta_ns: u64) {
        let cycles = (delta_ns * SH4_CLOCK_FREQ / 1_000_000_000).max(1);

        self.ctx.num_cycles = cycles as i64;

        while self.ctx.num_cycles > 0 {
            let block = self.fetch_block(self.ctx.pc);
            self.ctx.pc = block.run(self);

            self.check_pending_interrupts();
        }

        self.update_mips();
    }

    /// Execute exactly one instruction, then hand control to the
    /// debugger. Blocks normally span many instructions, so the block at
    /// PC is recompiled in single-instruction mode.
    pub fn step(&mut self) {
        self.code_cache.remove_blocks(self.ctx.pc);

        let guest_addr = self.ctx.pc;
        let host_addr = self.bus.translate_virtual(guest_addr);
        let flags = self.compile_flags() | SH4_SINGLE_INSTR;

        let block = self.code_cache.compile_block(guest_addr, host_addr, flags);
        self.ctx.pc = block.run(self);

        self.debugger.trap();
    }

    fn fetch_block(&mut self, pc: u32) -> BlockEntry {
        if let Some(block) = self.code_cache.get_block(pc) {
            return block;
        }

        let host_addr = self.bus.translate_virtual(pc);
        let flags = self.compile_flags();
        self.code_cache.compile_block(pc, host_addr, flags)
    }

    pub fn compile_flags(&self) -> u32 {
        let mut flags = 0;
        if self.ctx.fpscr.0 & FPSCR_PR != 0 {
            flags |= SH4_DOUBLE_PR;
        }
        if self.ctx.fpscr.0 & FPSCR_SZ != 0 {
            flags |= SH4_DOUBLE_SZ;
        }
        flags
    }

    /// Translated code reports every SR store through here with the value
    /// it replaced.
    pub fn sr_updated(&mut self, old_sr: u32) {
        let sr = self.ctx.sr.0;

        if (sr & SR_RB) != (old_sr & SR_RB) {
            self.swap_register_bank();
        }

        if (sr & SR_I) != (old_sr & SR_I) || (sr & SR_BL) != (old_sr & SR_BL) {
            self.update_pending_interrupts();
        }
    }

    /// FPSCR counterpart of [`Sh4::sr_updated`].
    pub fn fpscr_updated(&mut self, old_fpscr: u32) {
        if (self.ctx.fpscr.0 & FPSCR_FR) != (old_fpscr & FPSCR_FR) {
            self.swap_fp_register_bank();
        }
    }

    fn swap_register_bank(&mut self) {
        for s in 0..8 {
            std::mem::swap(&mut self.ctx.r[s], &mut self.ctx.ralt[s]);
        }
    }

    fn swap_fp_register_bank(&mut self) {
        for s in 0..16 {
            std::mem::swap(&mut self.ctx.fr[s], &mut self.ctx.xf[s]);
        }
    }

    /// Translated code invokes this for the instruction that flushes a
    /// store queue to external memory.
    pub fn prefetch(&mut self, addr: u32) {
        // only store-queue area prefetches are of interest
        if !(0xe000_0000..=0xe3ff_ffff).contains(&addr) {
            return;
        }

        let sqi = ((addr >> 5) & 1) as usize;
        let qacr = if sqi == 1 {
            self.regs[sh4regs::QACR1_OFFSET].value
        } else {
            self.regs[sh4regs::QACR0_OFFSET].value
        };

        let mut dest = (addr & 0x03ff_ffe0) | ((qacr & 0x1c) << 24);

        // burst the 32-byte line out as eight word writes
        for i in 0..8 {
            self.bus.write32(dest, self.ctx.sq[sqi][i]);
            dest = dest.wrapping_add(4);
        }
    }

    /// Translated code lands here on an invalid instruction word. The
    /// only source of those is a planted breakpoint.
    pub fn invalid_instruction(&mut self, addr: u32) {
        assert!(
            self.breakpoints.contains_key(&addr),
            "invalid instruction with no breakpoint at 0x{:08x}",
            addr
        );

        // zeroing the budget ends the slice at this block boundary
        self.ctx.num_cycles = 0;

        self.debugger.trap();
    }

    pub(crate) fn reset_instruction_cache(&mut self) {
        // the architecture wants the invalidation deferred by a few
        // instructions; dropping the links immediately is close enough
        log::info!("reset instruction cache");

        self.code_cache.unlink_blocks();
    }

    pub fn add_breakpoint(&mut self, addr: u32) {
        let instr = self.bus.read16(addr);
        self.breakpoints.insert(addr, instr);

        // an instruction word of 0 decodes as invalid
        self.bus.write16(addr, 0);

        self.code_cache.remove_blocks(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u32) {
        let instr = self
            .breakpoints
            .remove(&addr)
            .expect("no breakpoint registered at address");

        self.bus.write16(addr, instr);

        self.code_cache.remove_blocks(addr);
    }

    /// Debugger bulk memory read.
    pub fn read_memory(&mut self, addr: u32, buffer: &mut [u8]) {
        self.bus
            .memcpy_to_host(buffer.as_mut_ptr(), addr, buffer.len() as u32);
    }

    pub fn num_registers(&self) -> usize {
        59
    }

    /// Debugger register file: 0-15 general, 16 PC, 17 PR, 18 GBR,
    /// 19 VBR, 20 MACH, 21 MACL, 22 SR, 23 FPUL, 24 FPSCR, 25-40 FP,
    /// 41 SSR, 42 SPC, 43-50 bank 0, 51-58 bank 1. Every register is
    /// reported four bytes wide.
    pub fn read_register(&self, n: usize) -> (u64, usize) {
        let ctx = &self.ctx;
        let value = match n {
            0..=15 => ctx.r[n] as u64,
            16 => ctx.pc as u64,
            17 => ctx.pr as u64,
            18 => ctx.gbr as u64,
            19 => ctx.vbr as u64,
            20 => ctx.mach as u64,
            21 => ctx.macl as u64,
            22 => ctx.sr.0 as u64,
            23 => ctx.fpul as u64,
            24 => ctx.fpscr.0 as u64,
            25..=40 => ctx.fr[n - 25] as u64,
            41 => ctx.ssr as u64,
            42 => ctx.spc as u64,
            43..=50 => {
                let b0 = if ctx.sr.0 & SR_RB != 0 {
                    &ctx.ralt[..]
                } else {
                    &ctx.r[..8]
                };
                b0[n - 43] as u64
            }
            51..=58 => {
                let b1 = if ctx.sr.0 & SR_RB != 0 {
                    &ctx.r[..8]
                } else {
                    &ctx.ralt[..]
                };
                b1[n - 51] as u64
            }
            _ => 0,
        };

        (value, 4)
    }

    /// Average over the sampled MIPS window.
    pub fn average_mips(&self) -> f32 {
        let samples = self.num_mips.min(MAX_MIPS_SAMPLES);
        if samples == 0 {
            return 0.0;
        }

        let mut avg = 0.0;
        for i in (self.num_mips - samples)..self.num_mips {
            avg += self.mips[i % MAX_MIPS_SAMPLES];
        }
        avg / samples as f32
    }

    fn update_mips(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_mips_time);

        if delta >= Duration::from_secs(1) {
            let delta_scaled = delta.as_secs_f32() * 1_000_000.0;
            self.mips[self.num_mips % MAX_MIPS_SAMPLES] = self.ctx.num_instrs as f32 / delta_scaled;
            self.num_mips += 1;

            self.ctx.num_instrs = 0;
            self.last_mips_time = now;
        }
    }
}
