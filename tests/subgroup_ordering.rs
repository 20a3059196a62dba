// tests/subgroup_ordering.rs

use std::collections::HashMap;
use std::error::Error;
use std::thread;
use std::time::Duration;

use subgroup_queue::{Operation, Outcome, SubGroupQueue};
use subgroup_queue_test_utils::builders::{appending_each, Recorder};
use subgroup_queue_test_utils::timeline::Timeline;
use subgroup_queue_test_utils::{init_tracing, settle, settle_all};

type TestResult = Result<(), Box<dyn Error>>;

fn queue() -> SubGroupQueue<String> {
    init_tracing();
    SubGroupQueue::with_max_concurrent(8).expect("queue")
}

fn chars(s: &str) -> Vec<String> {
    s.chars().map(String::from).collect()
}

fn appending_ops(recorder: &Recorder, s: &str) -> Vec<Operation> {
    let parts = chars(s);
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    appending_each(recorder, &parts)
}

#[test]
fn add_operation_with_single_group_runs_serially() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();
    let ops = appending_ops(&recorder, "123456");

    queue.set_suspended(true);
    for op in &ops {
        queue.add_operation(op, "key")?;
    }
    queue.set_suspended(false);
    settle_all(&ops);
    queue.wait_until_all_operations_are_finished();

    assert!(queue.subgroup_operations("key").is_empty());
    assert_eq!(recorder.contents(), "123456");
    Ok(())
}

#[test]
fn add_operation_with_multiple_groups_runs_each_group_serially() -> TestResult {
    let queue = queue();
    let (a, b, c) = (Recorder::new(), Recorder::new(), Recorder::new());
    let ops_a = appending_ops(&a, "123456");
    let ops_b = appending_ops(&b, "abcdef");
    let ops_c = appending_ops(&c, "ABCDEF");

    queue.set_suspended(true);
    // In order inside each group, shuffled between groups.
    let schedule = [
        ("keyA", 0), ("keyB", 0), ("keyC", 0), ("keyA", 1), ("keyB", 1), ("keyB", 2),
        ("keyA", 2), ("keyC", 1), ("keyC", 2), ("keyA", 3), ("keyB", 3), ("keyA", 4),
        ("keyC", 3), ("keyB", 4), ("keyC", 4), ("keyA", 5), ("keyB", 5), ("keyC", 5),
    ];
    for (key, i) in schedule {
        let op = match key {
            "keyA" => &ops_a[i],
            "keyB" => &ops_b[i],
            _ => &ops_c[i],
        };
        queue.add_operation(op, key)?;
    }
    queue.set_suspended(false);
    queue.wait_until_all_operations_are_finished();

    for key in ["keyA", "keyB", "keyC"] {
        assert!(queue.subgroup_operations(key).is_empty());
    }
    assert_eq!(a.contents(), "123456");
    assert_eq!(b.contents(), "abcdef");
    assert_eq!(c.contents(), "ABCDEF");
    Ok(())
}

#[test]
fn add_operations_with_wait_returns_after_all_finished() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();
    let ops = appending_ops(&recorder, "123456");

    queue.add_operations(&ops, "key", true)?;

    assert!(ops.iter().all(Operation::is_finished));
    assert!(queue.subgroup_operations("key").is_empty());
    assert_eq!(recorder.contents(), "123456");
    Ok(())
}

#[test]
fn add_operations_with_wait_starts_each_after_the_previous_ends() -> TestResult {
    let queue = queue();
    let timeline = Timeline::new();
    let ops: Vec<Operation> = ["op1", "op2", "op3"]
        .into_iter()
        .map(|label| timeline.operation(label, Duration::from_millis(30)))
        .collect();

    queue.add_operations(&ops, "key", true)?;

    let spans = timeline.spans();
    assert_eq!(timeline.labels(), ["op1", "op2", "op3"]);
    assert!(spans[1].start >= spans[0].end);
    assert!(spans[2].start >= spans[1].end);
    Ok(())
}

#[test]
fn add_operations_with_multiple_groups_runs_each_group_serially() -> TestResult {
    let queue = queue();
    let (a, b, c) = (Recorder::new(), Recorder::new(), Recorder::new());

    queue.set_suspended(true);
    queue.add_operations(&appending_ops(&a, "123456"), "keyA", false)?;
    queue.add_operations(&appending_ops(&b, "abcdef"), "keyB", false)?;
    queue.add_operations(&appending_ops(&c, "ABCDEF"), "keyC", false)?;
    assert_eq!(queue.pending_operation_count(), 18);
    queue.set_suspended(false);
    queue.wait_until_all_operations_are_finished();

    assert_eq!(queue.pending_operation_count(), 0);
    assert_eq!(a.contents(), "123456");
    assert_eq!(b.contents(), "abcdef");
    assert_eq!(c.contents(), "ABCDEF");
    Ok(())
}

#[test]
fn add_operation_with_block_runs_serially() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();

    queue.set_suspended(true);
    let ops = chars("123456")
        .into_iter()
        .map(|s| {
            let recorder = recorder.clone();
            queue.add_operation_with_block(move || recorder.append(&s), "key")
        })
        .collect::<Result<Vec<_>, _>>()?;
    queue.set_suspended(false);

    settle_all(&ops);
    assert_eq!(recorder.contents(), "123456");
    assert!(queue.subgroup_operations("key").is_empty());
    Ok(())
}

#[test]
fn mixed_submission_styles_share_one_order() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();
    let ops = appending_ops(&recorder, "123456");

    queue.set_suspended(true);
    queue.add_operation(&ops[0], "key")?;
    queue.add_operation(&ops[1], "key")?;
    let r = recorder.clone();
    queue.add_operation_with_block(move || r.append("3"), "key")?;
    let r = recorder.clone();
    queue.add_operation_with_block(move || r.append("4"), "key")?;
    queue.add_operations(&ops[4..], "key", false)?;
    queue.set_suspended(false);
    queue.wait_until_all_operations_are_finished();

    assert_eq!(recorder.contents(), "123456");
    Ok(())
}

#[test]
fn hundred_operations_from_ten_threads_never_overlap() -> TestResult {
    let queue = queue();
    let timeline = Timeline::new();

    let submitted: Vec<Vec<Operation>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..10)
            .map(|t| {
                let queue = &queue;
                let timeline = &timeline;
                scope.spawn(move || {
                    (0..10)
                        .map(|i| {
                            let op = timeline.operation(format!("{t}:{i}"), Duration::from_millis(1));
                            queue.add_operation(&op, "Z").expect("add");
                            op
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("submitter")).collect()
    });

    for ops in &submitted {
        settle_all(ops);
    }

    assert_eq!(timeline.spans().len(), 100);
    assert!(!timeline.has_overlap_within(|_, _| true));

    // Each submitting thread's operations ran in the order it added them.
    let mut last_seen: HashMap<String, usize> = HashMap::new();
    for label in timeline.labels() {
        let (thread_id, index) = label.split_once(':').expect("label");
        let index: usize = index.parse()?;
        if let Some(prev) = last_seen.insert(thread_id.to_string(), index) {
            assert!(index > prev, "thread {thread_id} ran {index} after {prev}");
        }
    }
    assert!(queue.subgroup_operations("Z").is_empty());
    Ok(())
}

#[test]
fn failing_operation_still_releases_its_successor() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();

    let failing = Operation::fallible(|| anyhow::bail!("W went wrong"));
    let panicking = Operation::new(|| panic!("W panicked"));
    let r = recorder.clone();
    let successor = Operation::new(move || r.append("after"));

    queue.add_operations(&[failing.clone(), panicking.clone(), successor.clone()], "W", true)?;

    assert!(matches!(settle(&failing), Outcome::Failed(msg) if msg.contains("W went wrong")));
    assert!(matches!(settle(&panicking), Outcome::Failed(msg) if msg.contains("W panicked")));
    assert_eq!(settle(&successor), Outcome::Succeeded);
    assert_eq!(recorder.contents(), "after");
    assert!(queue.subgroup_operations("W").is_empty());
    Ok(())
}

#[test]
fn dependency_added_after_submission_is_honoured() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();
    queue.set_suspended(true);

    let r = recorder.clone();
    let second = Operation::new(move || r.append("b"));
    queue.add_operation(&second, "two")?;

    let r = recorder.clone();
    let first = Operation::new(move || {
        thread::sleep(Duration::from_millis(50));
        r.append("a");
    });
    second.add_dependency(&first)?;
    queue.add_operation(&first, "one")?;

    queue.set_suspended(false);
    settle_all(&[first, second]);

    assert_eq!(recorder.contents(), "ab");
    Ok(())
}

#[test]
fn explicit_dependencies_across_groups_are_honoured() -> TestResult {
    let queue = queue();
    let recorder = Recorder::new();

    let r = recorder.clone();
    let first = Operation::new(move || {
        thread::sleep(Duration::from_millis(50));
        r.append("a");
    });
    let r = recorder.clone();
    let second = Operation::new(move || r.append("b"));
    second.add_dependency(&first)?;

    queue.add_operation(&second, "two")?;
    queue.add_operation(&first, "one")?;
    settle_all(&[first, second]);

    assert_eq!(recorder.contents(), "ab");
    Ok(())
}
