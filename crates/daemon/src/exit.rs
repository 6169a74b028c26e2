//! Exit-signal cleanup.
//!
//! Registered handles run before the process dies to a termination
//! signal, in parallel and bounded by a shared deadline. A process that
//! wants the same cleanup on a normal code path ends itself through
//! [`gracefully`].

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::warn;

type Handle = Arc<dyn Fn() + Send + Sync>;

const HANDLE_TIMEOUT: Duration = Duration::from_secs(10);
const SIGNAL_EXIT_CODE: i32 = 130;

static HANDLES: OnceCell<Mutex<Vec<Handle>>> = OnceCell::new();

/// Registers `handle` to run when the process winds down. The first
/// registration installs the signal listener.
pub fn listen(handle: impl Fn() + Send + Sync + 'static) {
    let handles = HANDLES.get_or_init(|| {
        install_signal_listener();
        Mutex::new(Vec::new())
    });
    if let Ok(mut handles) = handles.lock() {
        handles.push(Arc::new(handle));
    }
}

/// Runs every registered handle, then exits with `code`.
pub fn gracefully(code: i32) -> ! {
    run_handles(HANDLE_TIMEOUT);
    std::process::exit(code);
}

fn install_signal_listener() {
    let result = ctrlc::set_handler(|| {
        run_handles(HANDLE_TIMEOUT);
        std::process::exit(SIGNAL_EXIT_CODE);
    });
    if let Err(e) = result {
        warn!(error = %e, "failed to install the exit signal listener");
    }
}

// Handles run in parallel; a handle that outlives the deadline is
// abandoned rather than holding up the exit.
fn run_handles(timeout: Duration) {
    let Some(handles) = HANDLES.get() else {
        return;
    };
    let handles: Vec<Handle> = match handles.lock() {
        Ok(handles) => handles.clone(),
        Err(_) => return,
    };
    if handles.is_empty() {
        return;
    }
    let (tx, rx) = mpsc::channel();
    for handle in handles {
        let tx = tx.clone();
        thread::spawn(move || {
            handle();
            let _ = tx.send(());
        });
    }
    drop(tx);
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            warn!("exit handles overran their deadline");
            return;
        }
        match rx.recv_timeout(remaining) {
            Ok(()) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("exit handles overran their deadline");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RAN: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn registered_handles_run_within_the_deadline() {
        listen(|| {
            RAN.fetch_add(1, Ordering::SeqCst);
        });
        listen(|| {
            RAN.fetch_add(1, Ordering::SeqCst);
        });
        run_handles(Duration::from_secs(1));
        assert!(RAN.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn a_stuck_handle_does_not_hold_up_the_exit() {
        listen(|| std::thread::sleep(Duration::from_secs(5)));
        let start = std::time::Instant::now();
        run_handles(Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
