//! Log output for applications built on the client.
//!
//! The library crates only emit `tracing` events. Nothing is printed
//! until the application installs a subscriber, either its own or the
//! one here. The filter comes from `RUST_LOG` and defaults to `warn`.

use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Installs a global fmt subscriber.
///
/// # Panics
///
/// If a global subscriber is already installed. Use [`try_init`] when
/// that can happen.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(filter()).init();
}

/// Installs a global fmt subscriber unless one is already set.
pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt().with_env_filter(filter()).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_second_call_fails_without_panicking() {
        let _ = try_init();
        assert!(try_init().is_err());
    }
}
