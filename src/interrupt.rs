use std::sync::atomic::{AtomicBool, Ordering};

// Signal handling logic.
//
// Assuming no bugs, the interesting interrupt signals are SIGHUP, SIGTERM, SIGINT, and SIGQUIT. Of
// these, only SIGHUP and SIGTERM are really interesting because they are sent by the OS or by job
// control (and will often be followed by SIGKILL if not honored within some reasonable time);
// INT/QUIT are sent by a user in response to keyboard action and more typical during
// development/debugging.
//
// Call handle_interruptions() to establish handlers, then is_interrupted() to check whether a
// signal has been received. The sampling loop polls this only at tick boundaries; the inter-tick
// sleep is performed in short slices so that a pending sleep remains interruptible.

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

pub fn handle_interruptions() {
    unsafe {
        let nomask: libc::sigset_t = std::mem::zeroed();
        let action = libc::sigaction {
            sa_sigaction: signal_handler as usize,
            sa_mask: nomask,
            sa_flags: 0,
            sa_restorer: None,
        };
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGHUP, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    }
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

#[cfg(test)]
pub fn reset_for_test() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}
