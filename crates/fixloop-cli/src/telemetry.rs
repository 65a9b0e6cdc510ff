use tracing_subscriber::EnvFilter;

/// Installs the global subscriber on stderr. `RUST_LOG` wins over the verbosity flag.
/// Later calls are no-ops.
pub(crate) fn init_tracing(json: bool, verbose: bool) {
    let default_directive = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().try_init().ok();
    } else {
        builder.try_init().ok();
    }
}
