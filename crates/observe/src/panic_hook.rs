//! Routes panics through `tracing::error!` so they land in structured logs
//! alongside everything else instead of only on stderr.

pub fn install() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "process panicked");
        default_hook(info);
    }));
}
