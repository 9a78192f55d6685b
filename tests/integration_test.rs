use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use veda_context::prelude::*;

static REQUEST_ID: ContextKey<String> = ContextKey::new("request_id");
static LOCALE: ContextKey<&'static str> = ContextKey::new("locale");

fn clear_caller() {
    REQUEST_ID.remove();
    LOCALE.remove();
}

fn single_worker() -> ContextExecutor {
    let config = Config::builder()
        .num_threads(1)
        .panic_strategy(PanicStrategy::Isolate)
        .build()
        .unwrap();
    ContextExecutor::new(config).unwrap()
}

#[test]
fn test_concrete_a_b_none() {
    clear_caller();
    let executor = ContextExecutor::fixed(1).unwrap();

    REQUEST_ID.set("A".to_string());
    let first = executor.submit(|| REQUEST_ID.get()).unwrap();
    assert_eq!(first.join().unwrap().as_deref(), Some("A"));

    REQUEST_ID.set("B".to_string());
    let second = executor.submit(|| REQUEST_ID.get()).unwrap();
    assert_eq!(second.join().unwrap().as_deref(), Some("B"));

    clear_caller();
    let third = executor.submit(|| REQUEST_ID.get()).unwrap();
    assert_eq!(third.join().unwrap(), None);
}

#[test]
fn test_no_leak_between_tasks_on_same_worker() {
    clear_caller();
    let executor = single_worker();

    // C1 has both keys, C2 only one: a merge would show up as a stray locale
    REQUEST_ID.set("c1".to_string());
    LOCALE.set("fr_FR");
    let t1 = executor
        .submit(|| (REQUEST_ID.get(), LOCALE.get(), thread::current().id()))
        .unwrap();

    clear_caller();
    REQUEST_ID.set("c2".to_string());
    let t2 = executor
        .submit(|| (REQUEST_ID.get(), LOCALE.get(), thread::current().id()))
        .unwrap();

    let (r1, l1, w1) = t1.join().unwrap();
    let (r2, l2, w2) = t2.join().unwrap();
    assert_eq!(w1, w2);
    assert_eq!((r1.as_deref(), l1), (Some("c1"), Some("fr_FR")));
    assert_eq!((r2.as_deref(), l2), (Some("c2"), None));

    // and the other order
    clear_caller();
    REQUEST_ID.set("c2".to_string());
    let t2 = executor.submit(|| (REQUEST_ID.get(), LOCALE.get())).unwrap();
    REQUEST_ID.set("c1".to_string());
    LOCALE.set("fr_FR");
    let t1 = executor.submit(|| (REQUEST_ID.get(), LOCALE.get())).unwrap();

    assert_eq!(t2.join().unwrap(), (Some("c2".to_string()), None));
    assert_eq!(t1.join().unwrap(), (Some("c1".to_string()), Some("fr_FR")));
    clear_caller();
}

#[test]
fn test_faithful_propagation_sees_exact_snapshot() {
    clear_caller();
    let executor = single_worker();

    REQUEST_ID.set("req-42".to_string());
    LOCALE.set("de_DE");
    let expected = Context::current().unwrap();

    let observed = executor.submit(|| Context::current().unwrap()).unwrap();
    let observed = observed.join().unwrap();

    assert!(observed.ptr_eq(&expected));
    assert_eq!(observed.get(&REQUEST_ID).map(String::as_str), Some("req-42"));
    assert_eq!(observed.get(&LOCALE), Some(&"de_DE"));
    assert_eq!(observed.len(), 2);
    clear_caller();
}

#[test]
fn test_worker_slot_empty_after_every_task() {
    clear_caller();
    let executor = single_worker();

    REQUEST_ID.set("ok".to_string());
    executor.submit(|| ()).unwrap().join().unwrap();

    REQUEST_ID.set("panics".to_string());
    let failed = executor.submit(|| -> () { panic!("task body failed") }).unwrap();
    assert!(failed.join().unwrap_err().is_panic());

    clear_caller();
    let after = executor.submit(|| Context::current().unwrap()).unwrap();
    assert!(after.join().unwrap().is_empty());
}

#[test]
fn test_sequential_submissions_observe_only_their_own_value() {
    clear_caller();
    let executor = single_worker();

    let handles: Vec<_> = (0..200)
        .map(|i| {
            REQUEST_ID.set(format!("ctx-{}", i));
            executor.submit(|| REQUEST_ID.get()).unwrap()
        })
        .collect();

    let observed: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let expected: Vec<_> = (0..200).map(|i| Some(format!("ctx-{}", i))).collect();
    assert_eq!(observed, expected);
    clear_caller();
}

#[test]
fn test_error_isolation() {
    clear_caller();
    let executor = single_worker();

    REQUEST_ID.set("failing".to_string());
    let failing = executor
        .submit(|| -> String { panic!("request {:?} failed", REQUEST_ID.get()) })
        .unwrap();

    REQUEST_ID.set("healthy".to_string());
    let healthy = executor.submit(|| REQUEST_ID.get()).unwrap();

    match failing.join() {
        Err(TaskError::Panicked(info)) => {
            assert_eq!(info.message, "request Some(\"failing\") failed")
        }
        other => panic!("expected a panic, got {:?}", other),
    }
    assert_eq!(healthy.join().unwrap().as_deref(), Some("healthy"));

    let stats = executor.stats();
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.context_faults, 0);
    clear_caller();
}

#[test]
fn test_nested_submission_captures_task_context() {
    clear_caller();
    let executor = Arc::new(ContextExecutor::fixed(2).unwrap());

    REQUEST_ID.set("outer".to_string());
    let inner_executor = executor.clone();
    let outer = executor
        .submit(move || {
            // the caller's thread has moved on; the worker's own context counts
            REQUEST_ID.set("outer-adjusted".to_string());
            let inner = inner_executor.submit(|| REQUEST_ID.get()).unwrap();
            inner.join().unwrap()
        })
        .unwrap();

    REQUEST_ID.set("caller-moved-on".to_string());
    assert_eq!(outer.join().unwrap().as_deref(), Some("outer-adjusted"));
    clear_caller();
}

#[test]
fn test_many_callers_many_workers() {
    clear_caller();
    let config = Config::builder().num_threads(3).build().unwrap();
    let executor = Arc::new(ContextExecutor::new(config).unwrap());
    let mismatches = Arc::new(Mutex::new(Vec::new()));

    let callers: Vec<_> = (0..4)
        .map(|caller| {
            let executor = executor.clone();
            let mismatches = mismatches.clone();
            thread::spawn(move || {
                let handles: Vec<_> = (0..50)
                    .map(|n| {
                        let expected = format!("{}-{}", caller, n);
                        REQUEST_ID.set(expected.clone());
                        let handle = executor.submit(|| REQUEST_ID.get()).unwrap();
                        (expected, handle)
                    })
                    .collect();
                for (expected, handle) in handles {
                    let observed = handle.join().unwrap();
                    if observed.as_deref() != Some(expected.as_str()) {
                        mismatches.lock().push((expected, observed));
                    }
                }
            })
        })
        .collect();

    for caller in callers {
        caller.join().unwrap();
    }
    assert!(mismatches.lock().is_empty(), "{:?}", mismatches.lock());
    assert_eq!(executor.stats().submitted, 200);
}

#[test]
fn test_cancel_before_start_skips_install() {
    clear_caller();
    let executor = single_worker();

    let (release_tx, release_rx) = mpsc::channel::<()>();
    executor
        .execute(move || {
            let _ = release_rx.recv();
        })
        .unwrap();

    REQUEST_ID.set("cancelled".to_string());
    let cancelled = executor.submit(|| REQUEST_ID.get()).unwrap();
    clear_caller();
    let next = executor.submit(|| REQUEST_ID.get()).unwrap();

    assert!(cancelled.cancel());
    release_tx.send(()).unwrap();

    assert!(cancelled.join().unwrap_err().is_cancelled());
    assert_eq!(next.join().unwrap(), None);
    assert_eq!(executor.stats().cancelled, 1);
}

#[test]
fn test_spawned_thread_inherits_context() {
    clear_caller();
    LOCALE.set("ja_JP");

    let handle = veda_context::context::spawn(|| LOCALE.get()).unwrap();
    assert_eq!(handle.join().unwrap(), Some("ja_JP"));
    clear_caller();
}

#[test]
fn test_rejected_submission_returns_error() {
    clear_caller();
    let config = Config::builder()
        .num_threads(1)
        .max_threads(1)
        .bounded_queue(1)
        .build()
        .unwrap();
    let executor = ContextExecutor::new(config).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    executor
        .execute(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
    started_rx.recv().unwrap();

    let queued = executor.submit(|| 1).unwrap();
    assert!(matches!(executor.submit(|| 2), Err(Error::Rejected)));

    release_tx.send(()).unwrap();
    assert_eq!(queued.join().unwrap(), 1);
    assert_eq!(executor.stats().rejected, 1);
}

struct SubmitOnThreadExit {
    executor: Arc<ContextExecutor>,
    outcome: Arc<Mutex<Option<bool>>>,
}

impl Drop for SubmitOnThreadExit {
    fn drop(&mut self) {
        let result = self.executor.submit(|| ());
        *self.outcome.lock() = Some(matches!(
            result,
            Err(Error::CaptureFailed(ContextError::SlotUnavailable))
        ));
    }
}

thread_local! {
    static ON_EXIT: RefCell<Option<SubmitOnThreadExit>> = const { RefCell::new(None) };
}

// thread-local destructors run in reverse registration order on Linux
#[cfg(target_os = "linux")]
#[test]
fn test_capture_failure_enqueues_nothing() {
    let executor = Arc::new(ContextExecutor::fixed(1).unwrap());
    let outcome = Arc::new(Mutex::new(None));

    let on_exit = SubmitOnThreadExit {
        executor: executor.clone(),
        outcome: outcome.clone(),
    };
    thread::spawn(move || {
        // registered before the context slot, so it is torn down after it
        ON_EXIT.with(|cell| *cell.borrow_mut() = Some(on_exit));
        REQUEST_ID.set("exiting".to_string());
    })
    .join()
    .unwrap();

    assert_eq!(*outcome.lock(), Some(true));
    assert_eq!(executor.stats().submitted, 0);
    assert_eq!(executor.queued_tasks(), 0);
}
