//! Database references.

use crate::changes::{ChangeHandler, ChangesFeed};
use crate::error::Result;
use crate::session::Session;
use crate::transport::{HeaderMap, Method};

/// A named database reached through a session.
#[derive(Debug, Clone)]
pub struct Database {
    session: Session,
    name: String,
}

impl Database {
    pub fn new(session: Session, name: impl Into<String>) -> Self {
        Self {
            session,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `/` followed by the percent-encoded name.
    pub fn path(&self) -> String {
        format!("/{}", urlencoding::encode(&self.name))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// A change feed on this database, running on a fork of the session.
    pub fn changes(&self, handler: impl ChangeHandler + 'static) -> Result<ChangesFeed> {
        ChangesFeed::new(&self.session, self.name.clone(), handler)
    }

    /// Whether the database exists.
    pub fn exists(&mut self) -> Result<bool> {
        let path = self.path();
        match self
            .session
            .request_raw(&path, Method::Head, HeaderMap::new(), "", false)
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Session {
    /// A reference to the database `name`, sharing this session's transport.
    pub fn database(&self, name: impl Into<String>) -> Database {
        Database::new(self.clone(), name)
    }
}
