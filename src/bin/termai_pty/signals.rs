//! Async-signal-safe flags for SIGINT and SIGWINCH, polled from the main loop.
//!
//! Each handler only stores to an `AtomicBool`; raw mode disables the tty's
//! own ISIG-driven Ctrl-C handling, so an external `kill -INT` is the only
//! remaining way a supervising process's interrupt reaches this binary.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);
static SIGWINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigwinch(_: libc::c_int) {
    SIGWINCH_RECEIVED.store(true, Ordering::SeqCst);
}

fn install(signal: libc::c_int, handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
    // SAFETY: the handler only stores to an AtomicBool, which is
    // async-signal-safe; action and mask are fully initialized before use.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_flags = libc::SA_RESTART;
        action.sa_sigaction = handler as *const () as usize;
        if libc::sigemptyset(&mut action.sa_mask) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn install_handlers() -> io::Result<()> {
    install(libc::SIGINT, handle_sigint)?;
    install(libc::SIGWINCH, handle_sigwinch)?;
    Ok(())
}

pub fn take_sigint() -> bool {
    SIGINT_RECEIVED.swap(false, Ordering::SeqCst)
}

pub fn take_sigwinch() -> bool {
    SIGWINCH_RECEIVED.swap(false, Ordering::SeqCst)
}
