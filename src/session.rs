use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::data::EntityService;
use crate::model::User;

/// Tracks who the backend thinks we are. A rejected or failed identity call
/// leaves the session anonymous.
pub struct Manager {
    entities: Arc<dyn EntityService>,
    user: RwLock<Option<User>>,
}

impl Manager {
    pub fn new(entities: Arc<dyn EntityService>) -> Self {
        Self {
            entities,
            user: RwLock::new(None),
        }
    }

    pub fn refresh(&self) -> Option<User> {
        let user = match self.entities.current_user() {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "identity lookup failed");
                None
            }
        };
        debug!(user_id = ?user.as_ref().map(|u| u.id.as_str()), "session refreshed");
        *self.user.write() = user.clone();
        user
    }

    pub fn current(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.user.read().as_ref().map(|user| user.id.clone())
    }
}
