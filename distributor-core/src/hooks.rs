//! Extension points a host may observe or override.
//!
//! Every method receives the value the pipeline would use and returns the
//! value to actually use. The defaults pass values through untouched.

use serde_json::Value;

use crate::model::{ConnectionId, ConnectionType, Meta, Payload, Post, UserId};
use crate::registry::RegisteredData;

pub trait DistributionHooks: Send + Sync {
    fn auto_distribution_enabled(&self, enabled: bool) -> bool {
        enabled
    }

    /// Status given to auto-distributed copies on the target.
    fn default_status(&self, status: String, _post: &Post) -> String {
        status
    }

    /// Per-item veto for auto-distribution to one connection.
    fn should_auto_distribute(
        &self,
        _post: &Post,
        _user: UserId,
        _connection_type: ConnectionType,
        _connection_id: ConnectionId,
    ) -> bool {
        true
    }

    fn supported_post_types(&self, post_types: Vec<String>) -> Vec<String> {
        post_types
    }

    fn external_connections_per_page(&self, limit: usize) -> usize {
        limit
    }

    /// Capability that lets a user push to any external connection.
    fn push_capability(&self, capability: String) -> String {
        capability
    }

    /// Returning false skips registered-data processing for this payload.
    fn process_extra_data(&self, _payload: &Payload) -> bool {
        true
    }

    fn distribute_term_parent(&self, enabled: bool) -> bool {
        enabled
    }

    fn update_term_hierarchy(&self, enabled: bool) -> bool {
        enabled
    }

    fn after_registered_data_processed(&self, payload: Payload, _unprocessed: &Payload) -> Payload {
        payload
    }

    fn after_block_data_processed(
        &self,
        content: String,
        _entry: &RegisteredData,
        _extra_data: &[Value],
        _unprocessed: &str,
    ) -> String {
        content
    }

    fn after_shortcode_data_processed(
        &self,
        content: String,
        _entry: &RegisteredData,
        _extra_data: &[Value],
        _unprocessed: &str,
    ) -> String {
        content
    }

    fn after_meta_processed(
        &self,
        meta: Meta,
        _entry: &RegisteredData,
        _extra_data: &[Value],
        _unprocessed: &Meta,
    ) -> Meta {
        meta
    }
}

/// Hooks that change nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl DistributionHooks for DefaultHooks {}
