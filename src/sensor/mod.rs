pub mod api;
pub mod observable;
pub mod reconciler;
pub mod registry;
pub mod series;
pub mod subscription;
pub mod timestamp;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
