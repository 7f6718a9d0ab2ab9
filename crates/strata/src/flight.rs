// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Coalesces concurrent loads of the same key into one execution.
///
/// The first caller for a key runs its closure. Callers that arrive while it runs wait and
/// receive a clone of the result. If the running caller is dropped, one of the waiters runs
/// its own closure instead. The key is forgotten once a result is produced, so the next
/// caller after that starts a fresh execution.
#[derive(Debug)]
pub(crate) struct FlightGroup<T> {
    calls: Mutex<HashMap<String, Weak<OnceCell<T>>>>,
}

impl<T> Default for FlightGroup<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> FlightGroup<T> {
    pub fn work<'a, F, Fut>(&'a self, key: &'a str, f: F) -> impl Future<Output = T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let membership = Membership {
            calls: &self.calls,
            key,
            cell: Some(self.join(key)),
        };
        async move {
            match &membership.cell {
                Some(cell) => cell.get_or_init(f).await.clone(),
                None => f().await,
            }
        }
    }

    fn join(&self, key: &str) -> Arc<OnceCell<T>> {
        let mut calls = self.calls.lock();
        if let Some(cell) = calls.get(key).and_then(Weak::upgrade) {
            return cell;
        }
        let cell = Arc::new(OnceCell::new());
        calls.insert(key.to_owned(), Arc::downgrade(&cell));
        cell
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.calls.lock().values().filter(|weak| weak.strong_count() > 0).count()
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.calls.lock().len()
    }
}

/// One caller's hold on a key's cell.
///
/// Dropping it, on completion or cancellation, forgets the key once a result exists or no
/// caller is left waiting on it.
struct Membership<'a, T> {
    calls: &'a Mutex<HashMap<String, Weak<OnceCell<T>>>>,
    key: &'a str,
    cell: Option<Arc<OnceCell<T>>>,
}

impl<T> Drop for Membership<'_, T> {
    fn drop(&mut self) {
        // the strong count only changes under this lock
        let mut calls = self.calls.lock();
        let Some(cell) = self.cell.take() else {
            return;
        };
        let done = cell.initialized();
        let ptr = Arc::as_ptr(&cell);
        drop(cell);

        let forget = calls
            .get(self.key)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), ptr) && (done || weak.strong_count() == 0));
        if forget {
            calls.remove(self.key);
        }
    }
}
