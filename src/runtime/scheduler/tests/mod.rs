//! Scheduler 单元测试
//!
//! 测试任务调度器的配置、任务状态和调度行为


use crate::runtime::channel::channel;
use crate::runtime::scheduler::handle::JoinHandle;
use crate::runtime::scheduler::{
    current_task, JoinError, Scheduler, SchedulerConfig, SchedulerError, StealStrategy, Task,
    TaskBuilder, TaskId, TaskIdGenerator, TaskState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

fn small_config(num_workers: usize, max_threads: usize) -> SchedulerConfig {
    SchedulerConfig {
        num_workers,
        max_threads,
        idle_timeout: Duration::from_millis(5),
        ..SchedulerConfig::default()
    }
}

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_new() {
        let id = TaskId(1);
        assert_eq!(id.0, 1);
        assert_eq!(id.inner(), 1);
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(5).to_string(), "Task(5)");
    }

    #[test]
    fn test_task_id_partial_eq() {
        assert_eq!(TaskId(1), TaskId(1));
        assert_ne!(TaskId(1), TaskId(2));
    }

    #[test]
    fn test_task_id_generator_is_monotonic() {
        let generator = TaskIdGenerator::new();
        let first = generator.next();
        let second = generator.next();
        assert!(second > first);
    }

    #[test]
    fn test_task_id_generator_unique_across_threads() {
        let generator = Arc::new(TaskIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || (0..250).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<TaskId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }
}

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_task_state_values() {
        assert_eq!(TaskState::Runnable as u8, 0);
        assert_eq!(TaskState::Running as u8, 1);
        assert_eq!(TaskState::Blocked as u8, 2);
        assert_eq!(TaskState::Completed as u8, 3);
        assert_eq!(TaskState::Failed as u8, 4);
    }

    #[test]
    fn test_task_state_round_trip() {
        for state in [
            TaskState::Runnable,
            TaskState::Running,
            TaskState::Blocked,
            TaskState::Completed,
            TaskState::Failed,
        ] {
            assert_eq!(TaskState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Blocked.is_terminal());
    }
}

#[cfg(test)]
mod task_tests {
    use super::*;

    #[test]
    fn test_task_builder_name() {
        let task = TaskBuilder::new().name("worker").build(TaskId(1), || {});
        assert_eq!(task.id(), TaskId(1));
        assert_eq!(task.name(), "worker");
        assert!(task.is_runnable());
    }

    #[test]
    fn test_task_default_name() {
        let task = TaskBuilder::new().build(TaskId(3), || {});
        assert_eq!(task.name(), "Task(3)");
    }

    #[test]
    fn test_task_run_completes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = {
            let counter = counter.clone();
            TaskBuilder::new().build(TaskId(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(task.run().is_ok());
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.is_finished());

        // The closure is gone after the first run.
        assert!(task.run().is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_task_run_catches_panic() {
        let task = TaskBuilder::new().build(TaskId(1), || panic!("boom"));
        let message = task.run().unwrap_err();
        assert!(message.contains("boom"));
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn test_task_debug() {
        let task = TaskBuilder::new().build(TaskId(1), || {});
        let debug = format!("{:?}", task);
        assert!(debug.contains("Task"));
        assert!(debug.contains("Runnable"));
    }

    #[test]
    fn test_task_shared_between_threads() {
        let task: Arc<Task> = Arc::new(TaskBuilder::new().build(TaskId(9), || {}));
        let remote = task.clone();
        thread::spawn(move || remote.run()).join().unwrap().unwrap();
        assert_eq!(task.state(), TaskState::Completed);
    }
}

#[cfg(test)]
mod scheduler_config_tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        // num_workers should be at least 1
        assert!(config.num_workers >= 1);
        assert_eq!(config.max_threads, 256);
        assert_eq!(config.idle_timeout, Duration::from_millis(10));
        assert_eq!(config.steal_batch, 4);
        assert_eq!(config.steal_strategy, StealStrategy::Back);
        assert_eq!(config.thread_name_prefix, "conduit-worker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_rejects_zero_workers() {
        let config = SchedulerConfig {
            num_workers: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
        assert!(Scheduler::with_config(config).is_err());
    }

    #[test]
    fn test_scheduler_config_rejects_small_cap() {
        let config = small_config(4, 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_config_serde() {
        let config = small_config(2, 8);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"idle_timeout_ms\":5"));
        let back: SchedulerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

#[cfg(test)]
mod scheduler_tests {
    use super::*;

    #[test]
    fn test_scheduler_new() {
        let scheduler = Scheduler::new().unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.num_workers() > 0);
        let _ = format!("{:?}", scheduler);
    }

    #[test]
    fn test_spawn_and_join() {
        let scheduler = Scheduler::with_config(small_config(2, 8)).unwrap();
        let handle = scheduler.spawn(|| 6 * 7);
        assert_eq!(handle.join(), Ok(42));
    }

    #[test]
    fn test_spawn_moves_captures() {
        let scheduler = Scheduler::with_config(small_config(2, 8)).unwrap();
        let words = vec!["a".to_string(), "b".to_string()];
        let handle = scheduler.spawn(move || words.concat());
        assert_eq!(handle.join().unwrap(), "ab");
    }

    #[test]
    fn test_many_tasks_and_wait_idle() {
        let scheduler = Scheduler::with_config(small_config(4, 8)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..200 {
            let counter = counter.clone();
            scheduler.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        scheduler.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
        assert_eq!(scheduler.pending_tasks(), 0);
        assert_eq!(
            scheduler.stats().tasks_completed.load(Ordering::SeqCst),
            200
        );
    }

    #[test]
    fn test_panic_stays_in_task() {
        let scheduler = Scheduler::with_config(small_config(1, 4)).unwrap();

        let failing = scheduler.spawn(|| -> i32 { panic!("boom") });
        let healthy = scheduler.spawn(|| 1);

        match failing.join() {
            Err(JoinError::Panicked(message)) => assert!(message.contains("boom")),
            other => panic!("expected Panicked, got {:?}", other),
        }
        assert_eq!(healthy.join(), Ok(1));

        // The single worker survived the panic.
        assert_eq!(scheduler.spawn(|| 2).join(), Ok(2));
        scheduler.wait_idle();
        assert_eq!(scheduler.stats().tasks_failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_after_shutdown_is_rejected() {
        let scheduler = Scheduler::with_config(small_config(1, 2)).unwrap();
        scheduler.shutdown();
        assert!(!scheduler.is_running());

        let handle = scheduler.spawn(|| 1);
        assert!(handle.is_finished());
        assert_eq!(handle.join(), Err(JoinError::Rejected));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = Scheduler::with_config(small_config(2, 4)).unwrap();
        scheduler.shutdown();
        scheduler.shutdown();
        assert_eq!(scheduler.live_threads(), 0);
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let scheduler = Scheduler::with_config(small_config(1, 1)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            scheduler.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_spawn_racing_shutdown_always_resolves() {
        for _ in 0..50 {
            let scheduler = Arc::new(Scheduler::with_config(small_config(2, 4)).unwrap());
            let spawners: Vec<_> = (0..2)
                .map(|_| {
                    let scheduler = scheduler.clone();
                    thread::spawn(move || {
                        (0..50)
                            .map(|i| scheduler.spawn(move || i))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            scheduler.shutdown();

            for spawner in spawners {
                for handle in spawner.join().unwrap() {
                    match handle.join_timeout(JOIN_TIMEOUT) {
                        Some(Ok(_))
                        | Some(Err(JoinError::Rejected))
                        | Some(Err(JoinError::Cancelled)) => {}
                        other => panic!("handle did not resolve: {:?}", other),
                    }
                }
            }
            assert_eq!(scheduler.pending_tasks(), 0);
        }
    }

    #[test]
    fn test_current_task() {
        let scheduler = Scheduler::with_config(small_config(2, 4)).unwrap();
        assert_eq!(current_task(), None);

        let handle = scheduler.spawn(current_task);
        let id = handle.id();
        assert_eq!(handle.join(), Ok(Some(id)));
    }

    #[test]
    fn test_blocked_task_gets_helper() {
        // One worker: the receiver blocks it, so the sender must run on a helper.
        let scheduler = Scheduler::with_config(small_config(1, 4)).unwrap();
        let (tx, rx) = channel::<i32>(0);

        let receiver = scheduler.spawn(move || rx.receive());
        let sender = scheduler.spawn(move || tx.send(42).is_ok());

        assert_eq!(receiver.join_timeout(JOIN_TIMEOUT), Some(Ok(Some(42))));
        assert_eq!(sender.join_timeout(JOIN_TIMEOUT), Some(Ok(true)));
        assert!(scheduler.stats().helpers_started.load(Ordering::SeqCst) >= 1);
        assert!(scheduler.stats().blocking_events.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_thread_cap_limits_helpers() {
        let scheduler = Scheduler::with_config(small_config(1, 1)).unwrap();
        let (tx, rx) = channel::<i32>(0);

        let receiver = scheduler.spawn(move || rx.receive());
        thread::sleep(Duration::from_millis(20));
        tx.send(7).unwrap();

        assert_eq!(receiver.join_timeout(JOIN_TIMEOUT), Some(Ok(Some(7))));
        assert_eq!(scheduler.stats().helpers_started.load(Ordering::SeqCst), 0);
        assert!(scheduler.live_threads() <= 1);
    }

    #[test]
    fn test_nested_spawn_and_join() {
        let scheduler = Arc::new(Scheduler::with_config(small_config(1, 8)).unwrap());
        let inner_scheduler = scheduler.clone();

        let outer = scheduler.spawn(move || {
            let inner = inner_scheduler.spawn(|| 20);
            inner.join().map(|value| value + 1)
        });

        assert_eq!(outer.join_timeout(JOIN_TIMEOUT), Some(Ok(Ok(21))));
    }

    #[test]
    fn test_named_task() {
        let scheduler = Scheduler::with_config(small_config(1, 2)).unwrap();
        let handle = scheduler.spawn_with(TaskBuilder::new().name("named"), || {
            thread::current().name().map(str::to_string)
        });
        let thread_name = handle.join().unwrap().unwrap();
        assert!(thread_name.starts_with("conduit-worker"));
    }

    #[test]
    fn test_wait_idle_timeout() {
        let scheduler = Scheduler::with_config(small_config(1, 2)).unwrap();
        let (tx, rx) = channel::<()>(0);
        let blocked = scheduler.spawn(move || rx.receive());

        assert!(!scheduler.wait_idle_timeout(Duration::from_millis(20)));
        tx.send(()).unwrap();
        assert!(scheduler.wait_idle_timeout(JOIN_TIMEOUT));
        assert_eq!(blocked.join(), Ok(Some(())));
    }
}

#[cfg(test)]
mod join_handle_tests {
    use super::*;

    #[test]
    fn test_dropped_completion_cancels() {
        let (handle, completion) = JoinHandle::<i32>::new(TaskId(1));
        assert!(!handle.is_finished());
        assert_eq!(handle.try_join(), None);

        drop(completion);
        assert!(handle.is_finished());
        assert_eq!(handle.join(), Err(JoinError::Cancelled));
    }

    #[test]
    fn test_completion_delivers_value() {
        let (handle, completion) = JoinHandle::new(TaskId(2));
        completion.complete(Ok("done"));
        assert_eq!(handle.try_join(), Some(Ok("done")));
    }

    #[test]
    fn test_join_timeout_on_running_task() {
        let (handle, completion) = JoinHandle::<()>::new(TaskId(3));
        assert_eq!(handle.join_timeout(Duration::from_millis(10)), None);
        completion.complete(Ok(()));
        assert_eq!(handle.join_timeout(Duration::from_millis(10)), Some(Ok(())));
    }

    #[test]
    fn test_join_error_display() {
        assert_eq!(
            JoinError::Panicked("boom".into()).to_string(),
            "task panicked: boom"
        );
        assert!(JoinError::Panicked(String::new()).is_panic());
        assert!(!JoinError::Cancelled.is_panic());
    }
}
