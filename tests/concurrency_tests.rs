//! # Concurrency Tests using Loom
//!
//! This module uses loom to model the abort handshake between the host and an
//! isolated context: the `CancellationToken` behind `AbortHandle` is checked by
//! the proxy between cases and by the worker after each invocation.

#[cfg(test)]
mod tests {
    use loom::sync::Arc;
    use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use loom::thread;
    use tokio_util::sync::CancellationToken;

    const STACK_SIZE: usize = 8 * 1024 * 1024; // 8 MB

    /// Runs a loom model on a thread with a larger stack, loom's deep
    /// exploration overflows the default one.
    fn run_model<F>(name: &str, model: F)
    where
        F: Fn() + Sync + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.into())
            .stack_size(STACK_SIZE)
            .spawn(move || loom::model(model))
            .unwrap();
        handle.join().unwrap();
    }

    /// The proxy checks the token before each case. Whatever the interleaving
    /// with the aborting thread, no case starts after it saw the token
    /// cancelled and an unobserved abort lets every case run.
    #[test]
    fn test_abort_between_cases_stops_the_run() {
        run_model("loom-abort-between-cases", || {
            const NUM_CASES: usize = 2;
            let token = Arc::new(CancellationToken::new());
            let started = Arc::new(AtomicUsize::new(0));

            let worker = {
                let token = token.clone();
                let started = started.clone();
                thread::spawn(move || {
                    for _ in 0..NUM_CASES {
                        if token.is_cancelled() {
                            return false;
                        }
                        started.fetch_add(1, Ordering::Relaxed);
                    }
                    true
                })
            };

            let aborter = {
                let token = token.clone();
                thread::spawn(move || token.cancel())
            };

            let finished = worker.join().unwrap();
            aborter.join().unwrap();

            assert!(token.is_cancelled());
            let count = started.load(Ordering::Relaxed);
            if finished {
                assert_eq!(count, NUM_CASES);
            } else {
                assert!(count < NUM_CASES, "Started {} cases after abort", count);
            }
        });
    }

    /// The worker checks the token after each invocation and drops its reply
    /// when cancelled. The host either gets the reply or sees the context
    /// terminated; it never gets both.
    #[test]
    fn test_aborted_worker_never_replies() {
        run_model("loom-aborted-worker", || {
            let token = Arc::new(CancellationToken::new());
            let replied = Arc::new(AtomicBool::new(false));
            let terminated = Arc::new(AtomicBool::new(false));

            let worker = {
                let token = token.clone();
                let replied = replied.clone();
                let terminated = terminated.clone();
                thread::spawn(move || {
                    // invocation finished, reply or break
                    if token.is_cancelled() {
                        terminated.store(true, Ordering::Release);
                    } else {
                        replied.store(true, Ordering::Release);
                    }
                })
            };

            let aborter = {
                let token = token.clone();
                thread::spawn(move || token.cancel())
            };

            worker.join().unwrap();
            aborter.join().unwrap();

            let replied = replied.load(Ordering::Acquire);
            let terminated = terminated.load(Ordering::Acquire);
            assert!(replied ^ terminated);
            assert!(token.is_cancelled());
        });
    }
}
