//! Realtime scheduling helpers for the device and host worker threads.
//! Both are best-effort: failures are logged and startup continues, matching
//! the original client's behavior of running degraded rather than aborting.

#[cfg(unix)]
use nix::libc;
use tracing::warn;

#[cfg(unix)]
pub fn configure_rt_thread(name: &str, priority: i32) -> Result<(), String> {
    let thread = unsafe { libc::pthread_self() };
    let c_name = std::ffi::CString::new(name).map_err(|e| e.to_string())?;
    #[cfg(target_os = "linux")]
    unsafe {
        let _ = libc::pthread_setname_np(thread, c_name.as_ptr());
    }

    let param = unsafe {
        let mut p = std::mem::zeroed::<libc::sched_param>();
        p.sched_priority = priority;
        p
    };
    let rc = unsafe { libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(format!(
            "pthread_setschedparam({name}, prio {priority}) failed with errno {rc}"
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn configure_rt_thread(_name: &str, _priority: i32) -> Result<(), String> {
    Err("realtime thread priority is not supported on this platform".to_string())
}

#[cfg(unix)]
pub fn lock_memory_pages() -> Result<(), String> {
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc == 0 {
        Ok(())
    } else {
        Err(format!(
            "mlockall(MCL_CURRENT|MCL_FUTURE) failed: {}",
            std::io::Error::last_os_error()
        ))
    }
}

#[cfg(not(unix))]
pub fn lock_memory_pages() -> Result<(), String> {
    Err("mlockall is not supported on this platform".to_string())
}

/// Locks pages and raises the calling thread to `priority`, logging (never
/// panicking) on failure.
pub fn configure_best_effort(name: &str, priority: i32) {
    if let Err(e) = lock_memory_pages() {
        warn!("memory lock not enabled for {name}: {e}");
    }
    if let Err(e) = configure_rt_thread(name, priority) {
        warn!("realtime priority not enabled for {name}: {e}");
    }
}
