//! Access to the remote key-value store.
//!
//! The watch loop only sees the [`KeysApi`] trait; [`EtcdClient`] implements
//! it on top of the etcd v2 HTTP API.

mod etcd_client;
mod keys_api;
mod node;

pub use etcd_client::EtcdClient;
pub use keys_api::{KeysApi, StoreError};
pub use node::{ChangeIndex, Node, Snapshot};
