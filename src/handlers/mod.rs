//! Concrete cache handlers.
//!
//! One type per cached concept: the node-tree snapshot, per-user profiles,
//! and the site configuration. Register them with a
//! [`HandlerRegistry`](crate::cache::HandlerRegistry) at startup.

mod node_tree;
mod site_config;
mod user_profile;

pub use node_tree::NodeTreeCache;
pub use site_config::SiteConfigCache;
pub use user_profile::UserProfileCache;
