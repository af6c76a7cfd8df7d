use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;

use super::Client;

/// All running camera clients, by camera name.
pub struct ClientPool {
    clients: RwLock<HashMap<String, Arc<Client>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a client, replacing and returning any client with the same name.
    pub fn add_client(&self, client: Client) -> Option<Arc<Client>> {
        let mut clients = self.clients.write();
        clients.insert(client.name().to_string(), Arc::new(client))
    }

    pub fn remove_client(&self, name: &str) -> Option<Arc<Client>> {
        let mut clients = self.clients.write();
        clients.remove(name)
    }

    pub fn get_client(&self, name: &str) -> Option<Arc<Client>> {
        let clients = self.clients.read();
        clients.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let clients = self.clients.read();
        let mut names: Vec<String> = clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Shuts down and removes every client.
    pub async fn shutdown(&self) {
        // never hold the lock across an await
        let clients: Vec<Arc<Client>> = {
            let mut clients = self.clients.write();
            clients.drain().map(|(_, client)| client).collect()
        };

        info!("clientPool: shutting down {} clients", clients.len());
        futures::future::join_all(clients.iter().map(|client| client.shutdown())).await;
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{config, MockFetcher};

    #[tokio::test]
    async fn unknown_camera_is_none() {
        let pool = ClientPool::new();
        assert!(pool.get_client("nope").is_none());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn add_get_remove() {
        let pool = ClientPool::new();
        let (fetcher, _) = MockFetcher::ok();
        pool.add_client(Client::with_fetcher(config("front"), Box::new(fetcher)));
        let (fetcher, _) = MockFetcher::ok();
        pool.add_client(Client::with_fetcher(config("back"), Box::new(fetcher)));

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.names(), vec!["back".to_string(), "front".to_string()]);
        assert_eq!(pool.get_client("front").map(|c| c.name().to_string()), Some("front".to_string()));

        let removed = pool.remove_client("front").unwrap();
        removed.shutdown().await;
        assert!(pool.get_client("front").is_none());

        pool.shutdown().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_clients() {
        let pool = ClientPool::new();
        let (fetcher, _) = MockFetcher::ok();
        pool.add_client(Client::with_fetcher(config("front"), Box::new(fetcher)));
        let client = pool.get_client("front").unwrap();

        pool.shutdown().await;

        let picture = client.get_raw_image().await;
        assert_eq!(picture.error(), Some(&crate::camera::CameraError::Closed));
    }
}
