#[cfg(test)]
mod tests {
    use crate::pool::{ExecutionMode, FallbackPolicy, WorkerPool};
    use crate::tests::support::FailingSpawner;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn collect(mut rx: mpsc::UnboundedReceiver<u64>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out.sort_unstable();
        out
    }

    #[test]
    fn parallel_run_processes_every_task_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let report = WorkerPool::new(4).run((0..100u64).collect(), |n| n * 2, tx, &CancellationToken::new());

        assert_eq!(report.mode, ExecutionMode::Parallel);
        assert_eq!(report.workers_started, 4);
        assert_eq!(report.completed, 100);
        assert_eq!(report.not_started, 0);
        assert_eq!(collect(rx), (0..100u64).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn single_worker_runs_inline() {
        let (tx, rx) = mpsc::unbounded_channel();
        let caller = std::thread::current().id();
        let seen_elsewhere = Arc::new(AtomicUsize::new(0));
        let seen = seen_elsewhere.clone();
        let report = WorkerPool::sequential().run(
            (0..10u64).collect(),
            move |n| {
                if std::thread::current().id() != caller {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                n
            },
            tx,
            &CancellationToken::new(),
        );

        assert_eq!(report.mode, ExecutionMode::Sequential);
        assert_eq!(report.workers_started, 0);
        assert_eq!(WorkerPool::sequential().workers(), 1);
        assert_eq!(WorkerPool::new(0).workers(), 1);
        assert_eq!(seen_elsewhere.load(Ordering::SeqCst), 0);
        assert_eq!(collect(rx).len(), 10);
    }

    #[test]
    fn spawn_failure_degrades_to_sequential_with_identical_results() {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(8).with_spawner(Arc::new(FailingSpawner::after(0)));
        let report = pool.run((0..50u64).collect(), |n| n + 1, tx, &CancellationToken::new());

        assert_eq!(report.mode, ExecutionMode::Degraded);
        assert_eq!(report.workers_started, 0);
        assert_eq!(report.completed, 50);
        assert!(report.spawn_error.as_deref().unwrap_or_default().contains("thread creation disallowed"));
        assert_eq!(collect(rx), (1..=50u64).collect::<Vec<_>>());
    }

    #[test]
    fn partial_spawn_failure_finishes_remaining_tasks_exactly_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawner = Arc::new(FailingSpawner::after(2));
        let pool = WorkerPool::new(6).with_spawner(spawner.clone());
        let report = pool.run(
            (0..200u64).collect(),
            |n| {
                std::thread::sleep(Duration::from_micros(50));
                n
            },
            tx,
            &CancellationToken::new(),
        );

        assert_eq!(report.mode, ExecutionMode::Degraded);
        assert_eq!(report.workers_started, 2);
        assert_eq!(spawner.attempts.load(Ordering::SeqCst), 3);
        let results = collect(rx);
        assert_eq!(results.len(), 200);
        assert_eq!(results.iter().collect::<HashSet<_>>().len(), 200);
    }

    #[test]
    fn abort_policy_leaves_tasks_unprocessed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(4)
            .with_spawner(Arc::new(FailingSpawner::after(0)))
            .with_policy(FallbackPolicy::Abort);
        let report = pool.run((0..10u64).collect(), |n| n, tx, &CancellationToken::new());

        assert_eq!(report.completed, 0);
        assert_eq!(report.not_started, 10);
        assert!(report.spawn_error.is_some());
        assert!(collect(rx).is_empty());
    }

    #[test]
    fn panicking_task_does_not_kill_the_pool() {
        let (tx, rx) = mpsc::unbounded_channel();
        let report = WorkerPool::new(3).run(
            (0..20u64).collect(),
            |n| {
                if n == 7 {
                    panic!("boom");
                }
                n
            },
            tx,
            &CancellationToken::new(),
        );

        assert_eq!(report.panicked, 1);
        assert_eq!(report.completed, 19);
        assert!(!collect(rx).contains(&7));
    }

    #[test]
    fn cancelled_run_dispatches_nothing() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = WorkerPool::new(4).run((0..10u64).collect(), |n| n, tx, &cancel);

        assert!(report.cancelled);
        assert_eq!(report.completed, 0);
        assert_eq!(report.not_started, 10);
        assert!(collect(rx).is_empty());
    }

    #[test]
    fn cancellation_mid_run_lets_current_task_finish() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let report = WorkerPool::sequential().run(
            (0..10u64).collect(),
            move |n| {
                if n == 3 {
                    trigger.cancel();
                }
                n
            },
            tx,
            &cancel,
        );

        assert!(report.cancelled);
        // Task 3 was in flight when cancelled, so its result is kept.
        assert_eq!(collect(rx), vec![0, 1, 2, 3]);
        assert_eq!(report.not_started, 6);
    }
}
