pub mod mock_server;

/// Installs a test-writer subscriber once per test binary.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
