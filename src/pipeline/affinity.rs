//! Best-effort CPU pinning for pipeline workers.

use tracing::{debug, warn};

/// Pin the calling thread to `core_id`. Returns `false` when the core does
/// not exist or the OS refuses; the caller keeps running unpinned either
/// way.
pub fn pin_current_thread(core_id: usize) -> bool {
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!(core_id, "core enumeration unavailable, thread not pinned");
        return false;
    };
    let Some(core) = cores.into_iter().find(|c| c.id == core_id) else {
        warn!(core_id, "no such core, thread not pinned");
        return false;
    };
    if core_affinity::set_for_current(core) {
        debug!(core_id, "thread pinned");
        true
    } else {
        warn!(core_id, "failed to pin thread");
        false
    }
}
