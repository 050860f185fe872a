use tokio::sync::watch;

/// Completion of the first full listing, and how many objects it held
///
/// Only the first `InitDone` completes it; relists after a reconnect leave it untouched.
#[derive(Debug)]
pub struct InitialSync {
    listed: watch::Sender<Option<usize>>,
}

impl Default for InitialSync {
    fn default() -> Self {
        Self {
            listed: watch::Sender::new(None),
        }
    }
}

impl InitialSync {
    /// Record the size of the initial list, returns `false` if it was already recorded
    pub fn complete(&self, objects: usize) -> bool {
        self.listed.send_if_modified(|listed| {
            if listed.is_some() {
                return false;
            }
            *listed = Some(objects);
            true
        })
    }

    /// Objects in the initial list, `None` until it has been merged
    #[must_use]
    pub fn listed(&self) -> Option<usize> {
        *self.listed.borrow()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.listed().is_some()
    }

    /// Resolves with the initial list size once [`complete`](Self::complete) has been called
    pub async fn wait(&self) -> usize {
        let mut rx = self.listed.subscribe();
        // the sender is owned by `self`, so the channel stays open while we wait
        rx.wait_for(Option::is_some)
            .await
            .map_or(0, |listed| listed.unwrap_or_default())
    }
}
