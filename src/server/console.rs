//! Console command listener: typing `q`, `quit`, `stop` or `exit` on stdin
//! shuts the server down.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::{
    io::{self, BufRead},
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Something the console can stop.
pub(crate) trait Stoppable: Send + 'static {
    fn is_running(&self) -> bool;
    fn shutdown(&self);
}

#[inline]
pub(crate) fn is_stop_command(line: &str) -> bool {
    matches!(line, "q" | "quit" | "stop" | "exit")
}

/// Starts the stdin reader and the console thread.
///
/// The reader blocks on stdin and is left detached; the console thread
/// exits once the target stops running.
pub(crate) fn spawn<S: Stoppable>(poll: Duration, target: S) -> io::Result<JoinHandle<()>> {
    let (sender, receiver) = channel::unbounded();

    thread::Builder::new()
        .name("mill-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(line.trim().to_owned()).is_err() {
                    break;
                }
            }
        })?;

    thread::Builder::new()
        .name("mill-console".into())
        .spawn(move || listen(&receiver, poll, &target))
}

/// Waits for commands, re-checking `target` every `poll`.
pub(crate) fn listen<S: Stoppable>(lines: &Receiver<String>, poll: Duration, target: &S) {
    let poll = poll.max(Duration::from_millis(1));

    while target.is_running() {
        match lines.recv_timeout(poll) {
            Ok(line) if is_stop_command(&line) => {
                info!(command = %line, "console requested shutdown");
                target.shutdown();
                return;
            }
            Ok(line) if line.is_empty() => {}
            Ok(line) => warn!(command = %line, "unknown console command"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("console input closed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Clone, Default)]
    struct Target {
        stopped: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl Stoppable for Target {
        fn is_running(&self) -> bool {
            !self.stopped.load(Ordering::SeqCst)
        }

        fn shutdown(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn commands() {
        #[rustfmt::skip]
        let cases = [
            ("q", true), ("quit", true), ("stop", true), ("exit", true),
            ("Q", false), ("quit now", false), ("", false), ("help", false),
        ];

        for (line, result) in cases {
            assert_eq!(is_stop_command(line), result, "{line:?}");
        }
    }

    #[test]
    fn stops_on_command() {
        let (sender, receiver) = channel::unbounded();
        let target = Target::default();

        for line in ["", "status", "quit", "exit"] {
            sender.send(line.to_owned()).unwrap();
        }
        listen(&receiver, Duration::from_millis(10), &target);

        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
        assert_eq!(receiver.len(), 1);
    }

    #[test]
    fn exits_when_stopped_elsewhere() {
        let (_sender, receiver) = channel::unbounded::<String>();
        let target = Target::default();

        let handle = {
            let target = target.clone();
            thread::spawn(move || listen(&receiver, Duration::from_millis(5), &target))
        };
        target.stopped.store(true, Ordering::SeqCst);

        handle.join().unwrap();
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exits_when_input_closes() {
        let (sender, receiver) = channel::unbounded::<String>();
        drop(sender);

        let target = Target::default();
        listen(&receiver, Duration::from_millis(5), &target);

        assert!(target.is_running());
    }
}
