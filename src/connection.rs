//! Per-statement connections to remote stores.

use std::ops::{Deref, DerefMut};

use log::debug;

use crate::query_ast::QueryResult;

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    type Client: Send + Sync;

    /// Label used in logs.
    fn target(&self) -> &str;

    async fn connect(&self) -> QueryResult<Self::Client>;

    /// Release the client. Must not fail; problems are only logged.
    fn disconnect(&self, client: &mut Self::Client);
}

/// A connected client that is disconnected when the guard goes out of scope,
/// including on early returns with `?`.
pub struct ScopedConnection<'a, C: Connector> {
    connector: &'a C,
    client: C::Client,
}

impl<'a, C: Connector> ScopedConnection<'a, C> {
    pub async fn open(connector: &'a C) -> QueryResult<Self> {
        let client = connector.connect().await?;
        debug!("connected to {}", connector.target());
        Ok(Self { connector, client })
    }
}

impl<C: Connector> Deref for ScopedConnection<'_, C> {
    type Target = C::Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<C: Connector> DerefMut for ScopedConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}

impl<C: Connector> Drop for ScopedConnection<'_, C> {
    fn drop(&mut self) {
        self.connector.disconnect(&mut self.client);
        debug!("disconnected from {}", self.connector.target());
    }
}
