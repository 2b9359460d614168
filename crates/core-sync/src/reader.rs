//! Read collaborator: the opaque asynchronous path to the device backend.

use std::future::Future;

pub trait WordReader: Send + Sync + 'static {
    /// Read `count` consecutive words of class `key` starting at word `addr`.
    /// Implementations may return fewer words than requested.
    fn read_words(
        &self,
        key: &str,
        addr: u32,
        count: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<u16>>> + Send;
}
