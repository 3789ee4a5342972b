//! Global logging system.

use std::{env, panic};
use backtrace::Backtrace;
use tracing_subscriber::{
    fmt::{self, time::uptime},
    prelude::*,
    EnvFilter,
    Registry,
};


/// Default logging environment filter. Our crates are debug, everything else
/// is warn.
const DEFAULT_FILTER: &str = "warn,layergen=debug,grid_data=debug";

/// Initializes a `tracing` backend which outputs to stdout. Accepts
/// ecosystem-standard `RUST_LOG` env filters on top of the crate defaults,
/// and routes panic messages and backtraces through the logging system.
pub fn init_logging() {
    let format = fmt::format()
        .compact()
        .with_timer(uptime())
        .with_line_number(true);
    let stdout_log = fmt::layer()
        .event_format(format);

    let mut filter = DEFAULT_FILTER.to_owned();
    if let Ok(env_filter) = env::var(EnvFilter::DEFAULT_ENV) {
        filter.push(',');
        filter.push_str(&env_filter);
    }

    let subscriber = Registry::default()
        .with(EnvFilter::new(filter))
        .with(stdout_log);
    tracing::subscriber::set_global_default(subscriber)
        .expect("unable to install log subscriber");

    // make panic messages and backtraces go through the logging system
    panic::set_hook(Box::new(|info| {
        error!("{}", info);
        if env::var("RUST_BACKTRACE").map(|val| val == "1").unwrap_or(true) {
            error!("{:?}", Backtrace::new());
        }
    }));
    trace!("installed custom panic hook");
}
