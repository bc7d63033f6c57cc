pub mod accounts;
pub mod folders;
pub mod gateway;
pub mod guard;
#[cfg(test)]
pub mod memory_store;
pub mod metadata_codec;
pub mod registry;
pub mod store_client;
