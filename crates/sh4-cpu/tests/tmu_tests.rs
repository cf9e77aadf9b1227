// Timer unit: deadline scheduling, projection reads, expiration


use harness::fixture;
use sh4_cpu::sh4regs::{
    TCNT0_ADDR, TCNT1_ADDR, TCOR0_ADDR, TCR0_ADDR, TCR1_ADDR, TSTR_ADDR,
};
use sh4_cpu::Interrupt;

// TCR=0 selects peripheral clock / 4 = 12.5MHz, one tick every 80ns

#[test]
fn tstr_write_schedules_and_cancels() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 12_500_000);
    f.cpu.reg_write::<u16>(TCR0_ADDR, 0);

    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);
    assert!(f.cpu.timer_handle(0).is_some());
    assert_eq!(f.scheduler.deadline(0), Some(1_000_000_000));

    // a redundant start leaves the running timer alone
    let handle = f.cpu.timer_handle(0);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);
    assert_eq!(f.cpu.timer_handle(0), handle);

    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x00);
    assert!(f.cpu.timer_handle(0).is_none());
    assert_eq!(f.scheduler.deadline(0), None);
    assert_eq!(f.scheduler.0.borrow().cancelled.len(), 1);
}

#[test]
fn stopped_counter_reads_raw_value() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCNT1_ADDR, 0x1234);
    assert_eq!(f.cpu.reg_read::<u32>(TCNT1_ADDR), 0x1234);
}

#[test]
fn running_counter_projects_from_the_scheduler() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 12_500_000);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);

    assert_eq!(f.cpu.reg_read::<u32>(TCNT0_ADDR), 12_500_000);

    f.scheduler.advance(400_000_000);
    assert_eq!(f.cpu.reg_read::<u32>(TCNT0_ADDR), 7_500_000);
}

#[test]
fn counter_write_reschedules_a_running_timer() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 12_500_000);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 1_000);
    assert_eq!(f.scheduler.deadline(0), Some(80_000));
}

#[test]
fn counter_write_roundtrips_within_a_tick() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 100);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 12_345);
    let read_back = f.cpu.reg_read::<u32>(TCNT0_ADDR);
    assert!((12_344..=12_345).contains(&read_back));
}

#[test]
fn control_write_carries_the_projected_count() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 1_000);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);
    assert_eq!(f.scheduler.deadline(0), Some(80_000));

    f.scheduler.advance(40_000);

    // switching to /16 re-derives the count from the remaining time
    f.cpu.reg_write::<u16>(TCR0_ADDR, 1);
    assert_eq!(f.scheduler.deadline(0), Some(80_000));
    assert_eq!(f.scheduler.0.borrow().cancelled.len(), 1);
    assert_eq!(f.cpu.reg_read::<u32>(TCNT0_ADDR), 125);
}

#[test]
fn clearing_unf_or_unie_unrequests_the_interrupt() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCOR0_ADDR, 100);
    f.cpu.reg_write::<u32>(TCNT0_ADDR, 5);
    f.cpu.reg_write::<u16>(TCR0_ADDR, 0x20);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);

    f.cpu.expire_timer(0);
    let tuni0 = f.cpu.sort_ids()[Interrupt::Tuni0 as usize];
    assert_ne!(f.cpu.requested_interrupts() & tuni0, 0);

    // UNF and UNIE both still set keeps the request latched
    f.cpu.reg_write::<u16>(TCR0_ADDR, 0x120);
    assert_ne!(f.cpu.requested_interrupts() & tuni0, 0);

    // dropping UNF acknowledges it
    f.cpu.reg_write::<u16>(TCR0_ADDR, 0x20);
    assert_eq!(f.cpu.requested_interrupts() & tuni0, 0);
}

#[test]
fn expiration_reloads_and_rearms() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCOR0_ADDR, 100);
    f.cpu.reg_write::<u32>(TCNT0_ADDR, 5);
    f.cpu.reg_write::<u16>(TCR0_ADDR, 0x20);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);

    f.scheduler.advance(400);
    f.cpu.expire_timer(0);

    // underflow latched, counter reloaded, deadline rearmed from TCOR
    assert_eq!(f.cpu.reg_read::<u16>(TCR0_ADDR), 0x120);
    assert_eq!(f.cpu.reg_read::<u32>(TCNT0_ADDR), 100);
    assert_eq!(f.scheduler.deadline(0), Some(400 + 100 * 80));
    assert!(f.cpu.timer_handle(0).is_some());
}

#[test]
fn expiration_without_unie_stays_silent() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCOR0_ADDR, 100);
    f.cpu.reg_write::<u32>(TCNT0_ADDR, 5);
    f.cpu.reg_write::<u16>(TCR0_ADDR, 0);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x01);

    f.cpu.expire_timer(0);

    assert_eq!(f.cpu.requested_interrupts(), 0);
    assert_eq!(f.cpu.reg_read::<u16>(TCR0_ADDR), 0x100);
}

#[test]
fn reserved_clock_selects_do_not_crash() {
    let mut f = fixture();

    for mode in [5u16, 6, 7] {
        f.cpu.reg_write::<u16>(TCR1_ADDR, mode);
        f.cpu.reg_write::<u32>(TCNT1_ADDR, 1_000);
        f.cpu.reg_write::<u8>(TSTR_ADDR, 0x02);
        let _ = f.cpu.reg_read::<u32>(TCNT1_ADDR);
        f.cpu.reg_write::<u8>(TSTR_ADDR, 0x00);
    }
}

#[test]
fn three_channels_schedule_independently() {
    let mut f = fixture();

    f.cpu.reg_write::<u32>(TCNT0_ADDR, 100);
    f.cpu.reg_write::<u32>(TCNT1_ADDR, 200);
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x03);

    assert_eq!(f.scheduler.deadline(0), Some(100 * 80));
    assert_eq!(f.scheduler.deadline(1), Some(200 * 80));
    assert!(f.cpu.timer_handle(2).is_none());

    // stopping one channel leaves the other running
    f.cpu.reg_write::<u8>(TSTR_ADDR, 0x02);
    assert_eq!(f.scheduler.deadline(0), None);
    assert_eq!(f.scheduler.deadline(1), Some(200 * 80));
}
