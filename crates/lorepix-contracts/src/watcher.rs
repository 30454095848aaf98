use std::time::{Duration, Instant};

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Initial host UI construction is asynchronous and unsignaled, so a
    /// first sweep is armed this long after `start`.
    pub startup_delay: Duration,
    /// Mutations observed within this window coalesce into one sweep.
    pub debounce_window: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_millis(1000),
            debounce_window: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatcherState {
    Uninitialized,
    Watching,
}

/// Coalesces host-tree mutation bursts into single sweep requests.
///
/// Timer-free and cooperative: the embedding adapter reports mutations via
/// [`note_mutation`](Self::note_mutation) and drives [`poll`](Self::poll)
/// from whatever tick it has; `poll` returns true exactly when one batch
/// has come due. There is no terminal state short of process teardown.
#[derive(Debug, Clone)]
pub struct ChangeWatcher {
    config: WatcherConfig,
    state: WatcherState,
    startup_due: Option<Instant>,
    debounce_due: Option<Instant>,
}

impl ChangeWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            state: WatcherState::Uninitialized,
            startup_due: None,
            debounce_due: None,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.state == WatcherState::Watching
    }

    /// Uninitialized → Watching, arming the one-shot startup sweep.
    /// Calling again is a no-op.
    pub fn start(&mut self, now: Instant) {
        if self.state == WatcherState::Watching {
            return;
        }
        self.state = WatcherState::Watching;
        self.startup_due = Some(now + self.config.startup_delay);
    }

    /// Records one observed mutation batch from the host tree. Each call
    /// extends the debounce window, so a re-render storm settles into a
    /// single pending sweep.
    pub fn note_mutation(&mut self, now: Instant) {
        if self.state != WatcherState::Watching {
            return;
        }
        self.debounce_due = Some(now + self.config.debounce_window);
    }

    /// True when a pending sweep (startup or debounced) has come due; the
    /// caller then runs the injection sweep once for the whole batch.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.state != WatcherState::Watching {
            return false;
        }
        let mut due = false;
        if self.startup_due.is_some_and(|at| at <= now) {
            self.startup_due = None;
            due = true;
        }
        if self.debounce_due.is_some_and(|at| at <= now) {
            self.debounce_due = None;
            due = true;
        }
        due
    }
}

/// Debounces per-entry text input so only the settled value of a rapid
/// keystroke burst reaches the store, one persisted write per burst.
/// Blur needs no special casing: the window simply runs out.
#[derive(Debug, Clone)]
pub struct InputDebouncer {
    window: Duration,
    pending: IndexMap<String, (String, Instant)>,
}

impl InputDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: IndexMap::new(),
        }
    }

    /// Records the latest value for an entry, restarting its window.
    pub fn note_input(&mut self, entry_id: &str, value: &str, now: Instant) {
        self.pending
            .insert(entry_id.to_string(), (value.to_string(), now + self.window));
    }

    /// Drains every entry whose window has run out, in input order.
    pub fn settle(&mut self, now: Instant) -> Vec<(String, String)> {
        let mut settled = Vec::new();
        self.pending.retain(|entry_id, (value, due)| {
            if *due <= now {
                settled.push((entry_id.clone(), value.clone()));
                false
            } else {
                true
            }
        });
        settled
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{ChangeWatcher, InputDebouncer, WatcherConfig};

    fn watcher() -> ChangeWatcher {
        ChangeWatcher::new(WatcherConfig {
            startup_delay: Duration::from_millis(1000),
            debounce_window: Duration::from_millis(100),
        })
    }

    #[test]
    fn poll_before_start_never_fires() {
        let mut watcher = watcher();
        let now = Instant::now();
        assert!(!watcher.poll(now + Duration::from_secs(10)));
        watcher.note_mutation(now);
        assert!(!watcher.poll(now + Duration::from_secs(10)));
    }

    #[test]
    fn startup_sweep_fires_once_after_delay() {
        let mut watcher = watcher();
        let t0 = Instant::now();
        watcher.start(t0);
        assert!(watcher.is_watching());
        assert!(!watcher.poll(t0 + Duration::from_millis(999)));
        assert!(watcher.poll(t0 + Duration::from_millis(1000)));
        assert!(!watcher.poll(t0 + Duration::from_millis(2000)));
    }

    #[test]
    fn mutation_burst_coalesces_into_one_sweep() {
        let mut watcher = watcher();
        let t0 = Instant::now();
        watcher.start(t0);
        watcher.poll(t0 + Duration::from_millis(1000));

        let t1 = t0 + Duration::from_millis(2000);
        watcher.note_mutation(t1);
        watcher.note_mutation(t1 + Duration::from_millis(10));
        watcher.note_mutation(t1 + Duration::from_millis(20));
        assert!(!watcher.poll(t1 + Duration::from_millis(50)));
        assert!(watcher.poll(t1 + Duration::from_millis(120)));
        assert!(!watcher.poll(t1 + Duration::from_millis(500)));
    }

    #[test]
    fn each_mutation_extends_the_debounce_window() {
        let mut watcher = watcher();
        let t0 = Instant::now();
        watcher.start(t0);
        watcher.poll(t0 + Duration::from_millis(1000));

        let t1 = t0 + Duration::from_millis(2000);
        watcher.note_mutation(t1);
        assert!(!watcher.poll(t1 + Duration::from_millis(80)));
        watcher.note_mutation(t1 + Duration::from_millis(80));
        // the first window would have expired here; the second note holds it open
        assert!(!watcher.poll(t1 + Duration::from_millis(150)));
        assert!(watcher.poll(t1 + Duration::from_millis(180)));
    }

    #[test]
    fn startup_and_debounce_due_together_yield_one_batch() {
        let mut watcher = watcher();
        let t0 = Instant::now();
        watcher.start(t0);
        watcher.note_mutation(t0 + Duration::from_millis(950));
        assert!(watcher.poll(t0 + Duration::from_millis(1100)));
        assert!(!watcher.poll(t0 + Duration::from_millis(1200)));
    }

    #[test]
    fn restart_is_a_no_op() {
        let mut watcher = watcher();
        let t0 = Instant::now();
        watcher.start(t0);
        watcher.poll(t0 + Duration::from_millis(1000));
        watcher.start(t0 + Duration::from_millis(1500));
        assert!(!watcher.poll(t0 + Duration::from_millis(5000)));
    }

    #[test]
    fn input_burst_settles_to_the_final_value_only() {
        let mut debouncer = InputDebouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        debouncer.note_input("e1", "h", t0);
        debouncer.note_input("e1", "ht", t0 + Duration::from_millis(20));
        debouncer.note_input("e1", "https://x/a.png", t0 + Duration::from_millis(40));

        assert!(debouncer.settle(t0 + Duration::from_millis(100)).is_empty());
        assert_eq!(
            debouncer.settle(t0 + Duration::from_millis(140)),
            vec![("e1".to_string(), "https://x/a.png".to_string())]
        );
        assert!(debouncer.is_idle());
        assert!(debouncer.settle(t0 + Duration::from_millis(500)).is_empty());
    }

    #[test]
    fn entries_settle_independently() {
        let mut debouncer = InputDebouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        debouncer.note_input("e1", "https://x/a.png", t0);
        debouncer.note_input("e2", "https://x/b.png", t0 + Duration::from_millis(80));

        let settled = debouncer.settle(t0 + Duration::from_millis(110));
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].0, "e1");
        assert!(!debouncer.is_idle());

        let settled = debouncer.settle(t0 + Duration::from_millis(200));
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].0, "e2");
    }
}
