use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use subgroup_queue::Operation;

/// A shared string that operations append to, so tests can assert on the
/// order in which bodies ran.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<String>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, s: &str) {
        self.0.lock().unwrap().push_str(s);
    }

    pub fn contents(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

/// An operation that appends `text` to `recorder`.
pub fn appending(recorder: &Recorder, text: &str) -> Operation {
    appending_after(recorder, text, Duration::ZERO)
}

/// An operation that sleeps for `delay`, then appends `text`.
pub fn appending_after(recorder: &Recorder, text: &str, delay: Duration) -> Operation {
    let recorder = recorder.clone();
    let text = text.to_string();
    Operation::builder().name(text.clone()).build(move || {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        recorder.append(&text);
    })
}

/// One appending operation per entry of `texts`.
pub fn appending_each(recorder: &Recorder, texts: &[&str]) -> Vec<Operation> {
    texts.iter().map(|t| appending(recorder, t)).collect()
}
