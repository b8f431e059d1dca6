//! Cooperative cancellation.
//!
//! An `AbortToken` is checked before every variant dispatch. Callbacks
//! registered with [`AbortToken::on_cancel`] run synchronously inside
//! [`AbortToken::cancel`], so a cancellation is visible before the next variant
//! is handed out.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Callback run once when a token is cancelled
pub type AbortListener = Box<dyn FnOnce(&str) + Send>;

struct AbortInner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    listeners: Mutex<Vec<AbortListener>>,
    children: Mutex<Vec<Weak<AbortInner>>>,
}

/// Shared cancellation flag with synchronous cancel callbacks
#[derive(Clone)]
pub struct AbortToken {
    inner: Arc<AbortInner>,
}

impl AbortToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AbortInner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Reason given to the first `cancel` call
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().ok().and_then(|reason| reason.clone())
    }

    /// Cancel the token and run every registered listener on this thread.
    ///
    /// Only the first call has any effect.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let reason = reason.into();
        log::debug!("Abort requested: {}", reason);
        if let Ok(mut stored) = self.inner.reason.lock() {
            *stored = Some(reason.clone());
        }
        let listeners = match self.inner.listeners.lock() {
            Ok(mut listeners) => std::mem::take(&mut *listeners),
            Err(_) => Vec::new(),
        };
        for listener in listeners {
            listener(&reason);
        }
        let children = match self.inner.children.lock() {
            Ok(mut children) => std::mem::take(&mut *children),
            Err(_) => Vec::new(),
        };
        for inner in children.iter().filter_map(Weak::upgrade) {
            AbortToken { inner }.cancel(reason.as_str());
        }
    }

    /// Register a listener; it runs immediately when the token is already cancelled
    pub fn on_cancel<F>(&self, listener: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            // checked under the lock so a concurrent cancel cannot miss the listener
            if !self.is_cancelled() {
                listeners.push(Box::new(listener));
                return;
            }
        }
        let reason = self.reason().unwrap_or_default();
        listener(&reason);
    }

    /// Token cancelled together with this one, but cancellable on its own.
    ///
    /// The parent holds only a weak reference; dropped children are pruned
    /// whenever a new one is registered.
    pub fn child(&self) -> AbortToken {
        let child = AbortToken::new();
        if let Ok(mut children) = self.inner.children.lock() {
            if !self.is_cancelled() {
                children.retain(|weak| weak.strong_count() > 0);
                children.push(Arc::downgrade(&child.inner));
                return child;
            }
        }
        child.cancel(self.reason().unwrap_or_default());
        child
    }
}

impl Default for AbortToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancel_runs_listeners_synchronously() {
        let token = AbortToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        token.on_cancel(move |reason| {
            assert_eq!(reason, "stop");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!token.is_cancelled());
        token.cancel("stop");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());

        token.cancel("again");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(token.reason().as_deref(), Some("stop"));
    }

    #[test]
    fn late_listener_runs_immediately() {
        let token = AbortToken::new();
        token.cancel("done");
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        token.on_cancel(move |_| flag.store(true, Ordering::SeqCst));
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn child_follows_parent_but_not_the_other_way() {
        let parent = AbortToken::new();
        let child = parent.child();
        child.cancel("child only");
        assert!(!parent.is_cancelled());

        let second = parent.child();
        parent.cancel("all");
        assert!(second.is_cancelled());
        assert_eq!(second.reason().as_deref(), Some("all"));
    }

    #[test]
    fn dropped_children_do_not_accumulate() {
        let parent = AbortToken::new();
        for _ in 0..100 {
            let child = parent.child();
            child.cancel("run finished");
        }
        let kept = parent.child();
        assert_eq!(parent.inner.children.lock().unwrap().len(), 1);

        parent.cancel("shutdown");
        assert!(kept.is_cancelled());
    }

    #[test]
    fn child_of_a_cancelled_token_starts_cancelled() {
        let parent = AbortToken::new();
        parent.cancel("early");
        let child = parent.child();
        assert!(child.is_cancelled());
        assert_eq!(child.reason().as_deref(), Some("early"));
    }
}
