//! Adapter factory: the method table mapping `ConnectorType` to a concrete
//! `ConnectorAdapter` (spec.md §9 Design Note on the tagged-variant
//! connector architecture — "adding a source means adding a variant plus
//! an entry in this table").

use std::path::PathBuf;
use std::sync::Arc;

use kbase_core::connector::ConnectorAdapter;
use kbase_core::model::ConnectorType;

use super::filesystem::FilesystemConnector;
use super::git::GitConnector;
use super::rest_connector::{profile_for, RestConnector};
use super::rss::RssConnector;
use super::s3::S3Connector;
use super::slack::SlackConnector;
use super::webcrawler::WebcrawlerConnector;

pub struct AdapterRegistry {
    git_cache_root: PathBuf,
}

impl AdapterRegistry {
    pub fn new(git_cache_root: PathBuf) -> Self {
        Self { git_cache_root }
    }

    /// Resolves the adapter for a connector type, or `None` for a type with
    /// neither a bespoke adapter nor a registered REST profile.
    pub fn adapter_for(&self, connector_type: ConnectorType) -> Option<Arc<dyn ConnectorAdapter>> {
        match connector_type {
            ConnectorType::Filesystem => Some(Arc::new(FilesystemConnector)),
            ConnectorType::Git => Some(Arc::new(GitConnector::new(self.git_cache_root.clone()))),
            ConnectorType::S3 => Some(Arc::new(S3Connector)),
            ConnectorType::Slack => Some(Arc::new(SlackConnector)),
            ConnectorType::Webcrawler => Some(Arc::new(WebcrawlerConnector)),
            ConnectorType::Rss => Some(Arc::new(RssConnector)),
            other => profile_for(other).map(|profile| Arc::new(RestConnector::new(profile)) as Arc<dyn ConnectorAdapter>),
        }
    }
}
