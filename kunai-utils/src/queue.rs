/// Unbounded multi-producer multi-consumer queue.
///
/// Clones share the same channel.
#[derive(Debug)]
pub struct Queue<T> {
    tx: async_channel::Sender<T>,
    rx: async_channel::Receiver<T>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T: Send> Queue<T> {
    pub fn unbounded() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// Returns the value back if the queue is closed.
    pub async fn push(&self, value: T) -> Result<(), T> {
        self.tx.send(value).await.map_err(|e| e.into_inner())
    }

    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
