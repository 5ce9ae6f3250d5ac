//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;
use crate::net::{Method, Network, NetworkError, Request, Response};

/// Scripted network double. Unknown URLs answer 404; offline mode fails
/// every fetch at the transport level.
pub(crate) struct MockNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: Mutex<Vec<(Method, String)>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn respond_json<T: Serialize + ?Sized>(&self, url: &str, value: &T) {
        self.respond(url, Response::json(value).unwrap());
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|(_, u)| u == url).count()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push((request.method.clone(), url.clone()));
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetworkError::Transport("network is offline".to_string()));
        }
        let scripted = self.routes.lock().unwrap().get(&url).cloned();
        Ok(scripted.unwrap_or_else(|| Response::text(404, "no route")))
    }
}

pub(crate) fn test_config(data_dir: &Path) -> Config {
    Config {
        data_dir: Some(data_dir.to_path_buf()),
        ..Config::default()
    }
}
