use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

/// A condvar-backed single-shot mailbox for a PTY Child's exit status.
#[derive(Debug, Default)]
pub struct ExitNotifier {
    slot: Mutex<Option<i32>>,
    cond: Condvar,
}

impl ExitNotifier {
    pub fn new() -> Self {
        ExitNotifier { slot: Mutex::new(None), cond: Condvar::new() }
    }

    /// Notify all waiters that the process has exited.
    pub fn notify_exit(&self, status: i32) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(status);
        self.cond.notify_all();
    }

    /// Wait for the process to exit, with an optional timeout so the
    /// caller can wake up periodically.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<i32> {
        let slot = self.slot.lock().unwrap();

        if slot.is_some() {
            return *slot;
        }

        match timeout {
            Some(t) => {
                let (status, wait_res) =
                    self.cond.wait_timeout_while(slot, t, |s| s.is_none()).unwrap();
                if wait_res.timed_out() { None } else { *status }
            }
            None => *self.cond.wait_while(slot, |s| s.is_none()).unwrap(),
        }
    }

    /// Non-blocking peek at whatever status has been recorded so far.
    pub fn poll(&self) -> Option<i32> {
        *self.slot.lock().unwrap()
    }
}
