//! Per-report item tracking for the progress display.

use super::progress::Progress;
use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use owo_colors::OwoColorize;
use std::sync::Arc;

/// Visual status of a tracked topic, controlling its display color in the
/// progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TopicStatus {
    /// Normal active state (default color).
    Active = 0,
    /// Blocked / waiting on a rate limit (blinks yellow).
    Blocked = 1,
    /// All items completed (green).
    Done = 2,
}

/// Counter for a specific tracked topic.
#[derive(Debug)]
struct ItemCounter {
    topic: &'static str,
    issued: AtomicU64,
    completed: AtomicU64,
    status: AtomicU8,
}

impl ItemCounter {
    const fn new(topic: &'static str) -> Self {
        Self {
            topic,
            issued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            status: AtomicU8::new(TopicStatus::Active as u8),
        }
    }
}

/// Tracks outstanding work items and updates progress reporting.
///
/// Items are tracked by topic (one per report being produced), with separate
/// counters per topic. Topics are fixed when the tracker is created and are
/// displayed in that order.
#[derive(Clone)]
pub struct RequestTracker {
    counters: Arc<[ItemCounter]>,
    progress: Arc<dyn Progress>,
}

impl core::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("counters", &self.counters)
            .field("progress", &"<dyn Progress>")
            .finish()
    }
}

impl RequestTracker {
    /// Create a new request tracker for the given topics.
    #[must_use]
    pub fn new(progress: &Arc<dyn Progress>, topics: &[&'static str]) -> Self {
        let counters: Arc<[ItemCounter]> = topics.iter().map(|&topic| ItemCounter::new(topic)).collect();

        let counters_clone = Arc::clone(&counters);
        let use_colors = progress.use_colors();
        progress.set_determinate(Box::new(move || Self::progress_reporter_callback(&counters_clone, use_colors)));

        Self {
            counters,
            progress: Arc::clone(progress),
        }
    }

    /// Print a message line without disrupting the progress indicator.
    pub fn println(&self, msg: &str) {
        self.progress.println(msg);
    }

    /// Mark that new items have been queued for the given topic.
    pub fn add_requests(&self, topic: &str, count: u64) {
        if let Some(counter) = self.counter(topic) {
            let _ = counter.issued.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Mark that an item has completed for the given topic.
    ///
    /// Automatically sets the topic status to [`TopicStatus::Done`] when all
    /// issued items have completed.
    pub fn complete_request(&self, topic: &str) {
        if let Some(counter) = self.counter(topic) {
            let completed = counter.completed.fetch_add(1, Ordering::Relaxed) + 1;
            let issued = counter.issued.load(Ordering::Relaxed);
            if completed >= issued && issued > 0 {
                counter.status.store(TopicStatus::Done as u8, Ordering::Relaxed);
            }
        }
    }

    /// Set the visual status of a topic, controlling its color in the progress bar.
    pub fn set_topic_status(&self, topic: &str, status: TopicStatus) {
        if let Some(counter) = self.counter(topic) {
            counter.status.store(status as u8, Ordering::Relaxed);
        }
    }

    /// Mark every unfinished topic as blocked (or active again).
    pub fn set_blocked(&self, blocked: bool) {
        let status = if blocked { TopicStatus::Blocked } else { TopicStatus::Active };
        for counter in self.counters.iter() {
            if counter.status.load(Ordering::Relaxed) != TopicStatus::Done as u8 {
                counter.status.store(status as u8, Ordering::Relaxed);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn topic_status(&self, topic: &str) -> Option<TopicStatus> {
        let status = self.counter(topic)?.status.load(Ordering::Relaxed);
        Some(match status {
            0 => TopicStatus::Active,
            1 => TopicStatus::Blocked,
            _ => TopicStatus::Done,
        })
    }

    fn counter(&self, topic: &str) -> Option<&ItemCounter> {
        self.counters.iter().find(|c| c.topic == topic)
    }

    /// Compute current progress state from counters.
    ///
    /// Returns (`total_length`, `current_position`, `message_string`).
    fn progress_reporter_callback(counters: &[ItemCounter], use_colors: bool) -> (u64, u64, String) {
        // Toggle every 500ms for the blink effect on blocked topics
        let blink_on = use_colors && {
            let ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            (ms / 500).is_multiple_of(2)
        };

        let mut total_issued = 0u64;
        let mut total_completed = 0u64;
        let mut parts = Vec::with_capacity(counters.len());

        for counter in counters {
            let issued = counter.issued.load(Ordering::Relaxed);
            let completed = counter.completed.load(Ordering::Relaxed);

            if issued > 0 {
                total_issued += issued;
                total_completed += completed;

                let text = format!("{completed}/{issued} {}", counter.topic);
                let status = counter.status.load(Ordering::Relaxed);

                let styled = if use_colors && status == TopicStatus::Done as u8 {
                    format!("{}", text.green())
                } else if status == TopicStatus::Blocked as u8 && blink_on {
                    format!("{}", text.yellow())
                } else {
                    text
                };

                parts.push(styled);
            }
        }

        let message = if parts.is_empty() {
            "No items".to_string()
        } else {
            parts.join(", ")
        };

        (total_issued, total_completed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::progress::NoProgress;

    const TOPICS: [&str; 3] = ["organizations", "repositories", "teams"];

    fn test_tracker() -> RequestTracker {
        RequestTracker::new(&(Arc::new(NoProgress) as Arc<dyn Progress>), &TOPICS)
    }

    /// Strip ANSI escape sequences from a string for assertion comparisons.
    fn strip_ansi(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for esc in chars.by_ref() {
                    if esc == 'm' {
                        break;
                    }
                }
            } else {
                result.push(c);
            }
        }
        result
    }

    #[test]
    fn test_add_single_request() {
        let tracker = test_tracker();
        tracker.add_requests("organizations", 1);

        let (total, completed, message) = RequestTracker::progress_reporter_callback(&tracker.counters, false);

        assert_eq!(total, 1);
        assert_eq!(completed, 0);
        assert_eq!(message, "0/1 organizations");
    }

    #[test]
    fn test_complete_request() {
        let tracker = test_tracker();
        tracker.add_requests("repositories", 3);
        tracker.complete_request("repositories");

        let (total, completed, message) = RequestTracker::progress_reporter_callback(&tracker.counters, false);

        assert_eq!(total, 3);
        assert_eq!(completed, 1);
        assert_eq!(message, "1/3 repositories");
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let tracker = test_tracker();
        tracker.add_requests("widgets", 3);
        tracker.complete_request("widgets");

        let (total, _, message) = RequestTracker::progress_reporter_callback(&tracker.counters, false);

        assert_eq!(total, 0);
        assert_eq!(message, "No items");
    }

    #[test]
    fn test_completed_topic_colored_green() {
        let tracker = test_tracker();
        tracker.add_requests("teams", 2);
        tracker.complete_request("teams");
        tracker.complete_request("teams");

        let (_, _, message) = RequestTracker::progress_reporter_callback(&tracker.counters, true);

        assert_eq!(strip_ansi(&message), "2/2 teams");
        assert!(message.contains("\x1b[32m"));
    }

    #[test]
    fn test_blocked_topic_blinks_yellow() {
        let tracker = test_tracker();
        tracker.add_requests("repositories", 5);
        tracker.set_topic_status("repositories", TopicStatus::Blocked);

        // Sample across a full 1-second blink cycle to catch both phases
        let mut saw_yellow = false;
        let mut saw_plain = false;
        for _ in 0..12 {
            let (_, _, msg) = RequestTracker::progress_reporter_callback(&tracker.counters, true);
            assert_eq!(strip_ansi(&msg), "0/5 repositories");
            if msg.contains("\x1b[33m") {
                saw_yellow = true;
            } else {
                saw_plain = true;
            }
            if saw_yellow && saw_plain {
                break;
            }
            std::thread::sleep(core::time::Duration::from_millis(100));
        }
        assert!(saw_yellow, "expected at least one blink phase to be yellow");
        assert!(saw_plain, "expected at least one blink phase to be plain");
    }

    #[test]
    fn test_set_blocked_skips_done_topics() {
        let tracker = test_tracker();
        tracker.add_requests("organizations", 1);
        tracker.complete_request("organizations");
        tracker.add_requests("teams", 4);

        tracker.set_blocked(true);
        assert_eq!(tracker.counters[0].status.load(Ordering::Relaxed), TopicStatus::Done as u8);
        assert_eq!(tracker.counters[2].status.load(Ordering::Relaxed), TopicStatus::Blocked as u8);

        tracker.set_blocked(false);
        assert_eq!(tracker.counters[0].status.load(Ordering::Relaxed), TopicStatus::Done as u8);
        assert_eq!(tracker.counters[2].status.load(Ordering::Relaxed), TopicStatus::Active as u8);
    }

    #[test]
    fn test_message_follows_topic_order() {
        let tracker = test_tracker();
        tracker.add_requests("teams", 1);
        tracker.add_requests("repositories", 1);
        tracker.add_requests("organizations", 1);

        let (_, _, message) = RequestTracker::progress_reporter_callback(&tracker.counters, false);

        assert_eq!(message, "0/1 organizations, 0/1 repositories, 0/1 teams");
    }

    #[test]
    fn test_tracker_clone_shares_counters() {
        let tracker1 = test_tracker();
        tracker1.add_requests("organizations", 5);
        tracker1.complete_request("organizations");

        let tracker2 = tracker1.clone();
        tracker2.add_requests("teams", 3);

        let (total1, completed1, _) = RequestTracker::progress_reporter_callback(&tracker1.counters, false);
        let (total2, completed2, _) = RequestTracker::progress_reporter_callback(&tracker2.counters, false);

        assert_eq!(total1, 8);
        assert_eq!(total2, 8);
        assert_eq!(completed1, 1);
        assert_eq!(completed2, 1);
    }

    #[test]
    fn test_println_delegates_to_progress() {
        use std::sync::Mutex;

        #[derive(Debug)]
        struct RecordingProgress {
            messages: Mutex<Vec<String>>,
        }

        impl Progress for RecordingProgress {
            fn set_phase(&self, _phase: &str) {}
            fn set_determinate(&self, _callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {}
            fn println(&self, msg: &str) {
                self.messages.lock().unwrap().push(msg.to_string());
            }
            fn done(&self) {}
        }

        let progress = Arc::new(RecordingProgress {
            messages: Mutex::new(Vec::new()),
        });
        let tracker = RequestTracker::new(&(Arc::clone(&progress) as Arc<dyn Progress>), &TOPICS);

        tracker.println("hello");
        tracker.println("world");

        let messages = progress.messages.lock().unwrap();
        assert_eq!(*messages, ["hello", "world"]);
        drop(messages);
    }

    #[test]
    fn test_debug_impl() {
        let tracker = test_tracker();
        let debug_str = format!("{tracker:?}");
        assert!(debug_str.contains("RequestTracker"));
        assert!(debug_str.contains("<dyn Progress>"));
    }
}
