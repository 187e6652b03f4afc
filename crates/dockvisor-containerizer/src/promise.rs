//! Single-assignment values observable by any number of waiters.

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

/// Future resolving to a promise's value, or `None` if the promise was
/// dropped without one.
pub type Observed<T> = Shared<BoxFuture<'static, Option<T>>>;

/// A value that is set at most once and can be awaited before that.
pub struct Promise<T: Clone> {
    sender: Option<oneshot::Sender<T>>,
    future: Observed<T>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a pending promise.
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Some(sender),
            future: receiver.map(Result::ok).boxed().shared(),
        }
    }

    /// Sets the value. Returns `false` if it was already set.
    pub fn set(&mut self, value: T) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // The receiver lives in `future`; sending cannot fail.
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    /// Returns a future resolving to the value.
    pub fn future(&self) -> Observed<T> {
        self.future.clone()
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("pending", &self.sender.is_some())
            .finish()
    }
}
