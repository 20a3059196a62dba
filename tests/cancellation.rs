// tests/cancellation.rs

use std::error::Error;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use subgroup_queue::{Operation, OperationState, Outcome, SubGroupQueue};
use subgroup_queue_test_utils::builders::{appending, appending_each, Recorder};
use subgroup_queue_test_utils::{init_tracing, settle, settle_all, TEST_TIMEOUT};

type TestResult = Result<(), Box<dyn Error>>;

fn queue() -> SubGroupQueue<String> {
    init_tracing();
    SubGroupQueue::with_max_concurrent(4).expect("queue")
}

#[test]
fn cancelled_operation_is_skipped_and_pruned() -> TestResult {
    let queue = queue();
    queue.set_suspended(true);
    let recorder = Recorder::new();
    let ops = appending_each(&recorder, &["a", "b", "c"]);
    queue.add_operations(&ops, "k", false)?;

    ops[1].cancel();
    queue.set_suspended(false);

    let outcomes = settle_all(&ops);
    assert_eq!(
        outcomes,
        vec![Outcome::Succeeded, Outcome::Cancelled, Outcome::Succeeded]
    );
    assert_eq!(ops[1].state(), OperationState::Cancelled);
    assert_eq!(recorder.contents(), "ac");
    assert!(queue.subgroup_operations("k").is_empty());
    Ok(())
}

#[test]
fn cancelled_before_submission_still_settles() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();
    let op = appending(&recorder, "x");
    op.cancel();

    queue.add_operation(&op, "k")?;

    assert_eq!(settle(&op), Outcome::Cancelled);
    assert!(op.is_cancelled());
    assert!(queue.subgroup_keys().is_empty());
    assert_eq!(recorder.contents(), "");
    Ok(())
}

#[test]
fn cancelling_a_middle_operation_does_not_let_its_successor_overtake() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();
    let (release, wait_for_release) = mpsc::channel::<()>();

    let r = recorder.clone();
    let head = Operation::new(move || {
        wait_for_release.recv_timeout(TEST_TIMEOUT).expect("release signal");
        r.append("a");
    });
    let middle = appending(&recorder, "b");
    let tail = appending(&recorder, "c");
    queue.add_operations(&[head.clone(), middle.clone(), tail.clone()], "k", false)?;

    middle.cancel();
    thread::sleep(Duration::from_millis(100));
    assert!(!middle.is_finished());
    assert!(!tail.is_finished());

    release.send(())?;
    settle_all(&[head, middle, tail]);
    assert_eq!(recorder.contents(), "ac");
    Ok(())
}

#[test]
fn cancel_all_operations_skips_everything_unstarted() -> TestResult {
    let queue = queue();
    queue.set_suspended(true);
    let recorder = Recorder::new();
    let a = appending_each(&recorder, &["a1", "a2"]);
    let b = appending_each(&recorder, &["b1"]);
    queue.add_operations(&a, "a", false)?;
    queue.add_operations(&b, "b", false)?;

    queue.cancel_all_operations();
    queue.set_suspended(false);
    queue.wait_until_all_operations_are_finished();

    for op in a.iter().chain(&b) {
        assert_eq!(op.outcome(), Some(Outcome::Cancelled));
    }
    assert_eq!(recorder.contents(), "");
    assert_eq!(queue.pending_operation_count(), 0);
    Ok(())
}

#[test]
fn cancelling_a_running_operation_lets_it_finish() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();
    let (started, wait_for_start) = mpsc::channel::<()>();
    let (release, wait_for_release) = mpsc::channel::<()>();

    let r = recorder.clone();
    let op = Operation::new(move || {
        started.send(()).expect("start signal");
        wait_for_release.recv_timeout(TEST_TIMEOUT).expect("release signal");
        r.append("done");
    });
    queue.add_operation(&op, "k")?;

    wait_for_start.recv_timeout(TEST_TIMEOUT)?;
    op.cancel();
    release.send(())?;

    assert_eq!(settle(&op), Outcome::Succeeded);
    assert!(op.is_cancelled());
    assert_eq!(recorder.contents(), "done");
    Ok(())
}
