use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static PANIC_HOOK: Once = Once::new();

/// Install the fmt subscriber. `RUST_LOG` wins when set, otherwise `info`.
///
/// Meant to be called once, at the top of `main`; later calls leave the
/// existing subscriber and panic hook in place.
pub fn init() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .try_init();

    PANIC_HOOK.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            eprintln!("panic: {:?}", info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
        assert!(PANIC_HOOK.is_completed());
    }
}
