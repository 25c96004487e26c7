use std::io;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

/// Spawn a named worker thread, pinned to `core` when one is given and present
pub fn spawn_pinned<F, T>(name: &str, core: Option<usize>, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        if let Some(core) = core {
            pin_current_thread(&thread_name, core);
        }
        f()
    })
}

/// Pin the calling thread. A missing core is logged and the thread floats.
pub fn pin_current_thread(name: &str, core: usize) -> bool {
    let Some(id) = core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .find(|id| id.id == core)
    else {
        warn!(thread = name, core, "core not available, running unpinned");
        return false;
    };

    let pinned = core_affinity::set_for_current(id);
    if pinned {
        info!(thread = name, core, "thread pinned");
    } else {
        warn!(thread = name, core, "failed to pin thread");
    }
    pinned
}
