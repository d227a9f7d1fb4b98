use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit::{channel, Channel, JoinError, Scheduler, SchedulerConfig, Select};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

fn scheduler(
    num_workers: usize,
    max_threads: usize,
) -> Scheduler {
    Scheduler::with_config(SchedulerConfig {
        num_workers,
        max_threads,
        ..SchedulerConfig::default()
    })
    .expect("scheduler should start")
}

#[test]
fn test_unbuffered_between_tasks() {
    let scheduler = scheduler(2, 8);
    let (tx, rx) = channel(0);
    let sender = scheduler.spawn(move || tx.send(42));
    let receiver = scheduler.spawn(move || rx.receive());

    assert_eq!(receiver.join_timeout(JOIN_TIMEOUT), Some(Ok(Some(42))));
    assert!(matches!(sender.join_timeout(JOIN_TIMEOUT), Some(Ok(Ok(())))));
}

#[test]
fn test_buffered_third_send_waits() {
    let scheduler = scheduler(1, 4);
    let ch = Channel::new(2);
    ch.send(1).unwrap();
    ch.send(2).unwrap();

    let tx = ch.sender();
    let third = scheduler.spawn(move || tx.send(3).is_ok());
    assert_eq!(third.join_timeout(Duration::from_millis(50)), None);
    assert_eq!(ch.len(), 2);

    assert_eq!(ch.receive(), Some(1));
    assert_eq!(third.join_timeout(JOIN_TIMEOUT), Some(Ok(true)));
    assert_eq!(ch.try_iter().collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn test_producer_consumer_close() {
    let scheduler = scheduler(2, 8);
    let (tx, rx) = channel(0);

    scheduler.spawn(move || {
        for i in 0..3 {
            tx.send(i).unwrap();
        }
        tx.close().unwrap();
    });
    let consumer = scheduler.spawn(move || rx.iter().collect::<Vec<i32>>());

    assert_eq!(consumer.join_timeout(JOIN_TIMEOUT), Some(Ok(vec![0, 1, 2])));
}

#[test]
fn test_pipeline_of_tasks() {
    let scheduler = scheduler(2, 16);
    let (numbers_tx, numbers_rx) = channel::<u64>(0);
    let (squares_tx, squares_rx) = channel::<u64>(0);

    scheduler.spawn(move || {
        for i in 1..=100 {
            numbers_tx.send(i).unwrap();
        }
        numbers_tx.close().unwrap();
    });
    scheduler.spawn(move || {
        for n in numbers_rx.iter() {
            squares_tx.send(n * n).unwrap();
        }
        squares_tx.close().unwrap();
    });

    let total: u64 = squares_rx.iter().sum();
    assert_eq!(total, (1..=100u64).map(|n| n * n).sum::<u64>());
}

#[test]
fn test_many_blocked_tasks_make_progress() {
    // Every receiver parks before any sender runs; helpers keep the pool moving.
    let scheduler = scheduler(2, 64);
    let received = Arc::new(AtomicUsize::new(0));
    let channels: Vec<_> = (0..16).map(|_| Channel::<usize>::unbuffered()).collect();

    let receivers: Vec<_> = channels
        .iter()
        .map(|ch| {
            let rx = ch.receiver();
            let received = received.clone();
            scheduler.spawn(move || {
                if rx.receive().is_some() {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    let senders: Vec<_> = channels
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            let tx = ch.sender();
            scheduler.spawn(move || tx.send(i).is_ok())
        })
        .collect();

    for handle in receivers {
        assert_eq!(handle.join_timeout(JOIN_TIMEOUT), Some(Ok(())));
    }
    for handle in senders {
        assert_eq!(handle.join_timeout(JOIN_TIMEOUT), Some(Ok(true)));
    }
    assert_eq!(received.load(Ordering::SeqCst), 16);
    assert!(scheduler.live_threads() <= 64);
}

#[test]
fn test_select_across_tasks() {
    let scheduler = scheduler(2, 8);
    let (data_tx, data_rx) = channel::<i32>(0);
    let (quit_tx, quit_rx) = channel::<()>(0);

    scheduler.spawn(move || {
        for i in 0..5 {
            data_tx.send(i).unwrap();
        }
        quit_tx.send(()).unwrap();
    });

    let mut seen = Vec::new();
    loop {
        let next = Select::new()
            .recv(&data_rx, |v| v)
            .recv(&quit_rx, |_| None)
            .wait();
        match next {
            Some(v) => seen.push(v),
            None => break,
        }
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_task_panic_reported_to_joiner() {
    let scheduler = scheduler(1, 4);
    let (tx, rx) = channel::<i32>(1);

    let failing = scheduler.spawn(move || {
        tx.send(1).unwrap();
        tx.close().unwrap();
        tx.close().expect("second close fails");
    });

    match failing.join() {
        Err(JoinError::Panicked(message)) => assert!(message.contains("second close fails")),
        other => panic!("expected a panic, got {:?}", other),
    }
    assert_eq!(rx.receive(), Some(1));
    assert_eq!(rx.receive(), None);
}

#[test]
fn test_global_spawn() {
    let handle = conduit::spawn(|| conduit::current_task().is_some());
    assert_eq!(handle.join_timeout(JOIN_TIMEOUT), Some(Ok(true)));
}
