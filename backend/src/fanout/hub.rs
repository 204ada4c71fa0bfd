use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Bounded outbound buffer per client.
const CLIENT_BUFFER: usize = 256;

struct Client<T> {
    id: Uuid,
    tx: mpsc::Sender<T>,
}

/// One subscriber hub: a set of live long-lived channels with a bounded
/// outbound buffer. Concurrency discipline: add/remove under the writer
/// lock, broadcast under the reader lock. A slow client that would
/// overflow its buffer is dropped; broadcast never blocks the publishing
/// task.
pub struct Hub<T: Clone + Send + 'static> {
    clients: RwLock<Vec<Client<T>>>,
}

impl<T: Clone + Send + 'static> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Hub<T> {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
        }
    }

    /// Registers a new client and returns its receiving half.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let id = Uuid::new_v4();
        self.clients.write().push(Client { id, tx });
        (id, rx)
    }

    pub fn unregister(&self, id: Uuid) {
        self.clients.write().retain(|c| c.id != id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Never blocks. Clients whose buffer is full are recorded and dropped
    /// once the read lock is released.
    pub fn broadcast(&self, msg: T) {
        let mut dead = Vec::new();
        {
            let clients = self.clients.read();
            for c in clients.iter() {
                if let Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) =
                    c.tx.try_send(msg.clone())
                {
                    dead.push(c.id);
                }
            }
        }
        if !dead.is_empty() {
            self.clients.write().retain(|c| !dead.contains(&c.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_to_all_registered_clients() {
        let hub: Hub<u32> = Hub::new();
        let (_id1, mut rx1) = hub.register();
        let (_id2, mut rx2) = hub.register();

        hub.broadcast(42);

        assert_eq!(rx1.recv().await, Some(42));
        assert_eq!(rx2.recv().await, Some(42));
    }

    #[tokio::test]
    async fn slow_client_is_dropped_without_blocking_broadcast() {
        let hub: Hub<u32> = Hub::new();
        let (_id, mut rx) = hub.register();

        for i in 0..(CLIENT_BUFFER as u32 + 5) {
            hub.broadcast(i);
        }

        assert_eq!(hub.client_count(), 0);
        // The client's queued messages are still readable up to capacity.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received <= CLIENT_BUFFER);
    }

    #[tokio::test]
    async fn unregister_removes_a_client() {
        let hub: Hub<u32> = Hub::new();
        let (id, _rx) = hub.register();
        assert_eq!(hub.client_count(), 1);
        hub.unregister(id);
        assert_eq!(hub.client_count(), 0);
    }
}
