use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use subgroup_queue::Operation;

/// Start and end instants of one operation body.
#[derive(Debug, Clone)]
pub struct Span {
    pub label: String,
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Collects execution spans from operation bodies.
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<Span>>>);

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// An operation that sleeps for `work` and records its span as `label`.
    pub fn operation(&self, label: impl Into<String>, work: Duration) -> Operation {
        let timeline = self.clone();
        let label = label.into();
        Operation::builder().name(label.clone()).build(move || {
            let start = Instant::now();
            thread::sleep(work);
            timeline.push(Span {
                label,
                start,
                end: Instant::now(),
            });
        })
    }

    pub fn push(&self, span: Span) {
        self.0.lock().unwrap().push(span);
    }

    /// Spans ordered by start time.
    pub fn spans(&self) -> Vec<Span> {
        let mut spans = self.0.lock().unwrap().clone();
        spans.sort_by_key(|s| s.start);
        spans
    }

    /// Labels ordered by start time.
    pub fn labels(&self) -> Vec<String> {
        self.spans().into_iter().map(|s| s.label).collect()
    }

    pub fn span(&self, label: &str) -> Option<Span> {
        self.spans().into_iter().find(|s| s.label == label)
    }

    /// Whether any two spans whose labels satisfy `same_group` overlap.
    pub fn has_overlap_within<F>(&self, same_group: F) -> bool
    where
        F: Fn(&str, &str) -> bool,
    {
        let spans = self.spans();
        spans.iter().enumerate().any(|(i, a)| {
            spans[i + 1..]
                .iter()
                .any(|b| same_group(&a.label, &b.label) && a.overlaps(b))
        })
    }

    /// Peak number of spans running at the same instant.
    pub fn max_parallelism(&self) -> usize {
        let mut edges: Vec<(Instant, i32)> = self
            .spans()
            .iter()
            .flat_map(|s| [(s.start, 1), (s.end, -1)])
            .collect();
        // Ends sort before starts at the same instant.
        edges.sort();

        let mut running = 0i32;
        let mut peak = 0i32;
        for (_, delta) in edges {
            running += delta;
            peak = peak.max(running);
        }
        peak as usize
    }
}
