//! Write-once, multi-listener store of reference variables

use crate::refs::path::PagePath;
use crate::{CrawlError, FieldError};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// The settled content of a reference variable
pub type RefValue = Result<Value, FieldError>;

enum Slot {
    Waiting(Vec<oneshot::Sender<RefValue>>),
    Settled(RefValue),
}

#[derive(Default)]
struct StoreState {
    slots: HashMap<PagePath, Slot>,
    poisoned: Vec<(PagePath, FieldError)>,
    drained: bool,
}

/// Crawl-scoped store of published field values
///
/// Every path is written at most once. Readers that arrive before the
/// write wait for it; every reader gets its own clone of the value.
#[derive(Default)]
pub struct RefStore {
    state: RefCell<StoreState>,
}

impl RefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the value at `path`
    ///
    /// Resolves immediately if the value is already written, if the path
    /// lies below a failed page, or if the store was drained.
    pub async fn get(&self, path: &PagePath) -> RefValue {
        let receiver = {
            let mut state = self.state.borrow_mut();
            if let Some(Slot::Settled(value)) = state.slots.get(path) {
                return value.clone();
            }
            if let Some((_, err)) = state
                .poisoned
                .iter()
                .find(|(prefix, _)| path.starts_with(prefix))
            {
                return Err(err.clone());
            }
            if state.drained {
                return Err(FieldError::NeverGet(path.to_string()));
            }

            let (sender, receiver) = oneshot::channel();
            match state
                .slots
                .entry(path.clone())
                .or_insert_with(|| Slot::Waiting(Vec::new()))
            {
                Slot::Waiting(listeners) => listeners.push(sender),
                Slot::Settled(value) => return value.clone(),
            }
            receiver
        };

        receiver
            .await
            .unwrap_or_else(|_| Err(FieldError::NeverGet(path.to_string())))
    }

    /// Writes the value at `path` and wakes its listeners in order
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The value was stored
    /// * `Err(CrawlError::DuplicateRefPath)` - The path was already written
    pub fn set(&self, path: PagePath, value: RefValue) -> Result<(), CrawlError> {
        let listeners = {
            let mut state = self.state.borrow_mut();
            if let Some(Slot::Settled(_)) = state.slots.get(&path) {
                return Err(CrawlError::DuplicateRefPath(path.to_string()));
            }
            tracing::trace!("Reference variable set: {}", path);
            match state.slots.insert(path, Slot::Settled(value.clone())) {
                Some(Slot::Waiting(listeners)) => listeners,
                _ => Vec::new(),
            }
        };

        for listener in listeners {
            let _ = listener.send(value.clone());
        }
        Ok(())
    }

    /// Fails every unwritten path below `prefix` with `err`
    ///
    /// Used when a nested page could not be fetched: none of its fields
    /// will ever be written.
    pub fn poison(&self, prefix: &PagePath, err: FieldError) {
        let mut woken = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            for (path, slot) in state.slots.iter_mut() {
                if !path.starts_with(prefix) {
                    continue;
                }
                if let Slot::Waiting(listeners) = slot {
                    woken.append(listeners);
                    *slot = Slot::Settled(Err(err.clone()));
                }
            }
            state.poisoned.push((prefix.clone(), err.clone()));
        }
        for listener in woken {
            let _ = listener.send(Err(err.clone()));
        }
    }

    /// Fails every unwritten path with a "never get" error
    ///
    /// After draining, reads of unknown paths fail immediately.
    pub fn drain(&self) {
        let pending: Vec<(PagePath, Vec<oneshot::Sender<RefValue>>)> = {
            let mut state = self.state.borrow_mut();
            state.drained = true;
            let keys: Vec<PagePath> = state
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Waiting(_)))
                .map(|(path, _)| path.clone())
                .collect();
            keys.into_iter()
                .filter_map(|path| match state.slots.remove(&path) {
                    Some(Slot::Waiting(listeners)) => Some((path, listeners)),
                    _ => None,
                })
                .collect()
        };

        for (path, listeners) in pending {
            tracing::warn!("Reference variable `{}` was never set", path);
            let err = FieldError::NeverGet(path.to_string());
            for listener in listeners {
                let _ = listener.send(Err(err.clone()));
            }
        }
    }

    /// Paths that currently have listeners but no value
    pub fn pending_paths(&self) -> Vec<PagePath> {
        self.state
            .borrow()
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Waiting(listeners) if !listeners.is_empty()))
            .map(|(path, _)| path.clone())
            .collect()
    }
}
