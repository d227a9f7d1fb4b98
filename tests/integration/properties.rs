use conduit::{channel, Channel, TrySendError};
use proptest::prelude::*;
use std::thread;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Values come out of a buffered channel in the order they went in.
    #[test]
    fn prop_buffered_fifo(
        capacity in 1usize..16,
        values in prop::collection::vec(any::<i32>(), 0..16),
    ) {
        let ch = Channel::new(capacity);
        let mut received = Vec::new();
        for &value in &values {
            if ch.len() == capacity {
                received.push(ch.receive().unwrap());
            }
            ch.send(value).unwrap();
        }
        ch.close().unwrap();
        received.extend(ch.iter());
        prop_assert_eq!(received, values);
    }

    /// A buffer of capacity C accepts exactly C non-blocking sends.
    #[test]
    fn prop_capacity_bound(capacity in 0usize..32) {
        let ch = Channel::new(capacity);
        for i in 0..capacity {
            prop_assert!(ch.try_send(i).is_ok());
        }
        prop_assert!(matches!(ch.try_send(capacity), Err(TrySendError::Full(_))));
        prop_assert_eq!(ch.len(), capacity);
    }

    /// Order is preserved across threads, buffered or not.
    #[test]
    fn prop_cross_thread_order(
        capacity in 0usize..4,
        values in prop::collection::vec(any::<u16>(), 0..32),
    ) {
        let (tx, rx) = channel(capacity);
        let expected = values.clone();
        let producer = thread::spawn(move || {
            for value in values {
                tx.send(value).unwrap();
            }
            tx.close().unwrap();
        });
        let received: Vec<u16> = rx.iter().collect();
        producer.join().unwrap();
        prop_assert_eq!(received, expected);
    }
}
