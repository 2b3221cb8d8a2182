use sofpack_runtime::CancelToken;

/// Route Ctrl-C to `token`. A second Ctrl-C exits immediately with status 1.
pub fn install_signal_handler(token: CancelToken) {
    let _ = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(1);
        }
        token.cancel();
        eprintln!("\ninterrupt received, stopping the current step...");
    });
}
