pub mod builders;
pub mod fake_executor;
pub mod timeline;

use std::sync::Once;
use std::time::Duration;

use subgroup_queue::{Operation, Outcome};
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Upper bound for any single wait in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=subgroup_queue=trace cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Wait for `op` to settle, failing the test instead of hanging.
pub fn settle(op: &Operation) -> Outcome {
    op.wait_timeout(TEST_TIMEOUT)
        .unwrap_or_else(|| panic!("{op:?} did not settle within {TEST_TIMEOUT:?}"))
}

/// Wait for every operation in `ops` to settle.
pub fn settle_all(ops: &[Operation]) -> Vec<Outcome> {
    ops.iter().map(settle).collect()
}
