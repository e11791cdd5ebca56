use log::error;
use std::panic;

/// Install the process panic hook.
///
/// Debug builds get `better-panic` backtraces, release builds get the
/// `human-panic` crash report. Either way the panic is also written to the
/// log file, which is often the only trace left by a headless run.
pub fn initialize_panic_handler() {
    if cfg!(debug_assertions) {
        better_panic::install();
    } else {
        human_panic::setup_panic!();
    }

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        error!("Panic: {panic_info}");
        default_hook(panic_info);
    }));
}
