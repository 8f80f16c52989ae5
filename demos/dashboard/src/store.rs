//! In-memory records behind the dashboard handlers.

use crate::protocol::{Person, Server, Status};
use chrono::{DateTime, Utc};
use tether_core::{Reactive, ReactiveError, Value};
use uuid::Uuid;

pub struct Store {
    persons: Vec<Person>,
    servers: Reactive<Vec<Server>>,
}

impl Store {
    pub fn new(persons: Vec<Person>, servers: Vec<Server>) -> Self {
        Self {
            persons,
            servers: Reactive::new(servers),
        }
    }

    /// One account and one public server.
    pub fn demo() -> Self {
        let owner = Uuid::from_u128(0xb10c1d74_00e8_4372_ac7b_0965d7e56ca6);
        let joined = DateTime::<Utc>::from_timestamp_millis(1_696_361_863_884).unwrap_or_default();
        let person = Person {
            id: owner,
            full_name: "Sam Vervaeck".to_string(),
            email: "samvv@pm.me".to_string(),
            password: Some("blabla".to_string()),
            created_at: joined,
            updated_at: joined,
        };
        let server = Server {
            id: Some(Uuid::from_u128(0xd8ee4ce0_1830_4397_a6fc_da6134d6b77c)),
            name: "prometheus".to_string(),
            friendly_name: Some("Prometheus".to_string()),
            description: None,
            owner_id: owner,
            ipv4: Some("192.168.129.5".to_string()),
            ipv6: None,
            status: Status::Online,
            is_public: true,
        };
        Self::new(vec![person], vec![server])
    }

    /// The person with these credentials, if any.
    pub fn authenticate(&self, email: &str, password: &str) -> Option<&Person> {
        self.persons
            .iter()
            .find(|p| p.email == email)
            .filter(|p| p.password.as_deref() == Some(password))
    }

    pub fn servers(&self) -> &Reactive<Vec<Server>> {
        &self.servers
    }

    /// Store `server` under a fresh id and notify every watcher.
    pub fn add_server(&self, mut server: Server) -> Result<Server, ReactiveError> {
        let id = Uuid::new_v4();
        server.id = Some(id);
        let stored = server.clone();
        self.servers.update(move |servers| {
            let mut next = servers.clone();
            next.push(server);
            next
        })?;
        tracing::info!(%id, name = %stored.name, "Server added");
        Ok(stored)
    }

    /// Live list of the servers `viewer` may see, as a wire value.
    pub fn visible_servers(&self, viewer: Option<Uuid>) -> Reactive<Value> {
        self.servers.map(move |servers| {
            let visible: Vec<&Server> = servers.iter().filter(|s| s.visible_to(viewer)).collect();
            serde_json::to_value(visible).unwrap_or_else(|e| {
                tracing::error!("Failed to encode server list: {}", e);
                Value::Null
            })
        })
    }
}
