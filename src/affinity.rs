//! Worker thread pinning.

use crate::config::ThreadingConfig;

/// Pin the calling thread to one hardware thread.
///
/// Binding is skipped entirely when `max_worker_threads` is in effect and no
/// processor-group bind was requested: the override disables per-thread
/// placement and lets the OS schedule freely.
///
/// A rejected affinity request is logged and ignored; the thread keeps
/// running wherever the OS put it. It is never retried.
pub fn bind_thread(
    config: &ThreadingConfig,
    thread_id: u32,
    proc_group_id: u32,
    bind_proc_group: bool,
) {
    if config.max_worker_threads != 0 && !bind_proc_group {
        return;
    }

    if config.max_worker_threads != 0 {
        // Group-level binding without a specific hardware thread. Platforms
        // with a partitioned thread namespace would set the full group mask
        // here; with a flat namespace there is nothing narrower than the OS
        // default, so leave the thread unbound.
        log::debug!(
            "proc-group bind requested for group {}, leaving thread unbound",
            proc_group_id
        );
        return;
    }

    if thread_id >= usize::BITS {
        // The id does not fit the affinity word of this process bitness.
        // Let the OS choose a placement instead.
        log::warn!(
            "hardware thread {} exceeds bindable width ({} bits), not pinning",
            thread_id,
            usize::BITS
        );
        return;
    }

    let core = core_affinity::CoreId { id: thread_id as usize };
    if !core_affinity::set_for_current(core) {
        log::warn!("failed to pin thread to hardware thread {}", thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_with_override_is_a_noop() {
        let mut cfg = ThreadingConfig::default();
        cfg.max_worker_threads = 8;
        // Must not touch affinity or panic.
        bind_thread(&cfg, 0, 0, false);
    }

    #[test]
    fn bind_out_of_width_falls_back() {
        let cfg = ThreadingConfig::default();
        bind_thread(&cfg, u32::MAX, 0, false);
    }

    #[test]
    fn bind_current_thread() {
        let cfg = ThreadingConfig::default();
        bind_thread(&cfg, 0, 0, false);
    }
}
