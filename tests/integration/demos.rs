use std::time::Duration;

use conduit::demo::{self, Adder, TickerEvent};
use conduit::{Scheduler, SchedulerConfig};

fn scheduler(num_workers: usize) -> Scheduler {
    Scheduler::with_config(SchedulerConfig {
        num_workers,
        max_threads: 16,
        ..SchedulerConfig::default()
    })
    .expect("scheduler should start")
}

#[test]
fn test_sum_halves() {
    let scheduler = scheduler(2);
    let (x, y) = demo::sum(&scheduler, &[7, 2, 8, -9, 4, 0]).unwrap();

    let mut halves = [x, y];
    halves.sort();
    assert_eq!(halves, [-5, 17]);
    assert_eq!(x + y, 12);
}

#[test]
fn test_sum_on_single_worker() {
    let scheduler = scheduler(1);
    let (x, y) = demo::sum(&scheduler, &[1, 2, 3, 4]).unwrap();
    assert_eq!(x + y, 10);
}

#[test]
fn test_fibonacci() {
    let scheduler = scheduler(2);
    assert_eq!(
        demo::fibonacci(&scheduler, 10).unwrap(),
        vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]
    );
    assert!(demo::fibonacci(&scheduler, 0).unwrap().is_empty());
}

#[test]
fn test_select_fibonacci() {
    let scheduler = scheduler(1);
    assert_eq!(
        demo::select_fibonacci(&scheduler, 10).unwrap(),
        vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]
    );
}

#[test]
fn test_ticker_ends_with_boom() {
    let scheduler = scheduler(2);
    let events = demo::ticker(
        &scheduler,
        Duration::from_millis(20),
        Duration::from_millis(110),
    )
    .unwrap();

    assert_eq!(events.last(), Some(&TickerEvent::Boom));
    assert_eq!(
        events.iter().filter(|e| **e == TickerEvent::Boom).count(),
        1
    );
    assert!(events.contains(&TickerEvent::Tick));
    assert!(events.contains(&TickerEvent::Idle));
}

#[test]
fn test_buffered_overflow() {
    let scheduler = scheduler(1);
    assert_eq!(demo::buffered(&scheduler).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_running_sums() {
    let scheduler = scheduler(2);
    let (sums, total) = demo::running_sums(&scheduler, &[1, 2, 3, 4, 5]).unwrap();
    assert_eq!(sums, vec![1, 3, 6, 10, 15]);
    assert_eq!(total, 15);

    let (sums, total) = demo::running_sums(&scheduler, &[]).unwrap();
    assert!(sums.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn test_adder() {
    let mut adder = Adder::new();
    assert_eq!(adder.add(5), 5);
    assert_eq!(adder.add(-2), 3);
    assert_eq!(adder.total(), 3);
}
