//! PTY lifecycle: openpty, a `setsid`-detached shell, and the reader thread
//! that forwards raw output chunks back to the orchestrating thread.
//!
//! Shutdown escalates from SIGTERM to SIGKILL after a grace period; reads
//! retry on EAGAIN/EINTR rather than blocking the reader thread forever.

use std::ffi::CString;
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};

use crate::error::PtyError;
use crate::process_signal::signal_process_group_or_pid;

const READ_CHUNK_SIZE: usize = 4096;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const GRACEFUL_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// An interactive shell running under a pseudo-terminal.
pub struct PtyHost {
    master_fd: RawFd,
    child_pid: i32,
    pub output_rx: Receiver<Vec<u8>>,
    _reader_thread: thread::JoinHandle<()>,
}

impl PtyHost {
    /// Open a PTY, fork, and exec `shell` in it with the given initial size.
    pub fn spawn(shell: &str, working_dir: &str, rows: u16, cols: u16) -> Result<Self, PtyError> {
        let shell_cstr = CString::new(shell).map_err(|_| {
            PtyError::SpawnFailed {
                shell: shell.to_string(),
                source: io::Error::new(ErrorKind::InvalidInput, "shell path contains NUL byte"),
            }
        })?;
        let cwd_cstr = CString::new(working_dir).unwrap_or_else(|_| CString::new(".").unwrap());

        // SAFETY: shell_cstr/cwd_cstr are valid CStrings; spawn_child forks
        // and execs within a single thread before any other thread observes
        // the post-fork child state.
        let (master_fd, child_pid) = unsafe { spawn_child(&shell_cstr, &cwd_cstr, rows, cols)? };

        // SAFETY: master_fd was just returned by openpty above and is owned
        // by this PtyHost until Drop closes it.
        unsafe { set_nonblocking(master_fd)? };

        let (tx, rx) = bounded(OUTPUT_CHANNEL_CAPACITY);
        let reader_thread = thread::spawn(move || reader_loop(master_fd, tx));

        Ok(Self {
            master_fd,
            child_pid,
            output_rx: rx,
            _reader_thread: reader_thread,
        })
    }

    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        write_all(self.master_fd, data)
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let ws = libc::winsize {
            ws_row: rows.max(1),
            ws_col: cols.max(1),
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: master_fd is open and owned by this PtyHost; ws is a fully
        // initialized stack value.
        let result = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &ws) };
        if result != 0 {
            return Err(PtyError::ResizeFailed(io::Error::last_os_error()));
        }
        let _ = signal_process_group_or_pid(self.child_pid, libc::SIGWINCH, true);
        Ok(())
    }

    pub fn interrupt(&self) -> Result<(), PtyError> {
        self.write(&[0x03])
    }

    pub fn eof(&self) -> Result<(), PtyError> {
        self.write(&[0x04])
    }

    pub fn clear(&self) -> Result<(), PtyError> {
        self.write(&[0x0c])
    }

    pub fn is_alive(&self) -> bool {
        child_is_alive(self.child_pid)
    }

    /// SIGTERM the shell's process group, wait up to the grace period, then
    /// SIGKILL if it is still alive.
    pub fn stop(&self) {
        if self.child_pid < 0 {
            return;
        }
        let _ = signal_process_group_or_pid(self.child_pid, libc::SIGTERM, true);
        if wait_for_exit(self.child_pid, GRACEFUL_SHUTDOWN_GRACE) {
            return;
        }
        let _ = signal_process_group_or_pid(self.child_pid, libc::SIGKILL, true);
        wait_for_exit(self.child_pid, Duration::from_millis(500));
    }
}

impl Drop for PtyHost {
    fn drop(&mut self) {
        self.stop();
        // SAFETY: master_fd is owned exclusively by this PtyHost.
        unsafe {
            if self.master_fd >= 0 {
                libc::close(self.master_fd);
            }
        }
    }
}

fn child_is_alive(child_pid: i32) -> bool {
    if child_pid < 0 {
        return false;
    }
    // SAFETY: child_pid is owned by this PtyHost; WNOHANG only inspects state.
    let ret = unsafe {
        let mut status = 0;
        libc::waitpid(child_pid, &mut status, libc::WNOHANG)
    };
    ret == 0
}

fn wait_for_exit(child_pid: i32, timeout: Duration) -> bool {
    let start = Instant::now();
    let mut status = 0;
    while start.elapsed() < timeout {
        // SAFETY: child_pid is owned by this PtyHost; WNOHANG only inspects state.
        let result = unsafe { libc::waitpid(child_pid, &mut status, libc::WNOHANG) };
        if result != 0 {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

fn reader_loop(master_fd: RawFd, tx: crossbeam_channel::Sender<Vec<u8>>) {
    let mut buffer = [0u8; READ_CHUNK_SIZE];
    loop {
        // SAFETY: master_fd is a valid PTY master owned by the PtyHost for
        // the lifetime of this thread; buffer is writable for its length.
        let n = unsafe {
            libc::read(master_fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len())
        };
        if n > 0 {
            let chunk = buffer[..n as usize].to_vec();
            if tx.send(chunk).is_err() {
                break;
            }
            continue;
        }
        if n == 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
            thread::sleep(Duration::from_millis(100));
            continue;
        }
        break;
    }
}

fn write_all(fd: RawFd, mut data: &[u8]) -> Result<(), PtyError> {
    while !data.is_empty() {
        // SAFETY: fd is the PTY master owned by the caller; data is a live slice.
        let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            return Err(PtyError::WriteFailed(err));
        }
        if written == 0 {
            return Err(PtyError::Closed);
        }
        data = &data[written as usize..];
    }
    Ok(())
}

/// # Safety
/// `fd` must be a valid, open file descriptor.
unsafe fn set_nonblocking(fd: RawFd) -> Result<(), PtyError> {
    let flags = libc::fcntl(fd, libc::F_GETFL, 0);
    if flags < 0 {
        return Err(PtyError::OpenFailed(io::Error::last_os_error()));
    }
    if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
        return Err(PtyError::OpenFailed(io::Error::last_os_error()));
    }
    Ok(())
}

/// Opens a PTY pair, forks, and execs `/bin/sh -c $shell` (login shell) in
/// the child after `setsid`+`TIOCSCTTY` makes the slave its controlling
/// terminal.
///
/// # Safety
/// Must run before any other thread touches process-global state (fd
/// table, signal handlers); the child calls `_exit` on any setup failure.
unsafe fn spawn_child(
    shell: &CString,
    working_dir: &CString,
    rows: u16,
    cols: u16,
) -> Result<(RawFd, i32), PtyError> {
    let mut master_fd: RawFd = -1;
    let mut slave_fd: RawFd = -1;
    let mut winsize = libc::winsize {
        ws_row: if rows > 0 { rows } else { 24 },
        ws_col: if cols > 0 { cols } else { 80 },
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    if libc::openpty(
        &mut master_fd,
        &mut slave_fd,
        ptr::null_mut(),
        ptr::null_mut(),
        &mut winsize,
    ) != 0
    {
        return Err(PtyError::OpenFailed(io::Error::last_os_error()));
    }

    let pid = libc::fork();
    if pid < 0 {
        libc::close(master_fd);
        libc::close(slave_fd);
        return Err(PtyError::SpawnFailed {
            shell: shell.to_string_lossy().into_owned(),
            source: io::Error::last_os_error(),
        });
    }

    if pid == 0 {
        child_exec(master_fd, slave_fd, shell, working_dir);
    }

    libc::close(slave_fd);
    Ok((master_fd, pid))
}

/// # Safety
/// Only valid in the child immediately after `fork()`. Never returns.
unsafe fn child_exec(master_fd: RawFd, slave_fd: RawFd, shell: &CString, working_dir: &CString) -> ! {
    libc::close(master_fd);

    if libc::setsid() == -1 {
        libc::_exit(1);
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
        libc::_exit(1);
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        libc::_exit(1);
    }
    if slave_fd > libc::STDERR_FILENO {
        libc::close(slave_fd);
    }

    let _ = libc::chdir(working_dir.as_ptr());

    let argv = [shell.as_ptr(), ptr::null()];
    libc::execvp(shell.as_ptr(), argv.as_ptr());
    libc::_exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawns_true_shell_and_observes_exit() {
        let host = PtyHost::spawn("/bin/sh", "/tmp", 24, 80).expect("pty spawn should succeed");
        assert!(host.is_alive());
        host.write(b"exit 0\n").expect("write should succeed");
        let deadline = Instant::now() + Duration::from_secs(2);
        while host.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!host.is_alive());
    }

    #[test]
    fn stop_terminates_a_long_running_shell() {
        let host = PtyHost::spawn("/bin/sh", "/tmp", 24, 80).expect("pty spawn should succeed");
        host.write(b"sleep 100\n").expect("write should succeed");
        thread::sleep(Duration::from_millis(100));
        host.stop();
        assert!(!host.is_alive());
    }

    #[test]
    fn resize_does_not_error_on_a_live_session() {
        let host = PtyHost::spawn("/bin/sh", "/tmp", 24, 80).expect("pty spawn should succeed");
        assert!(host.resize(40, 120).is_ok());
        host.stop();
    }
}
