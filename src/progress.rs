//! Optional progress notifications.

/// Receives progress events while entries are extracted.
///
/// Implementations are shared between concurrent extractions, so every
/// method takes `&self`. All methods except [`on_bytes`](Self::on_bytes)
/// default to no-ops.
pub trait ProgressSink: Send + Sync {
    /// An entry of `total` uncompressed bytes is about to be fetched.
    fn on_entry_start(&self, _archive: &str, _entry: &str, _total: u64) {}

    /// `bytes` more decoded bytes of `entry` were written.
    fn on_bytes(&self, entry: &str, bytes: u64);

    /// A failed attempt is being discarded and the entry fetched again.
    ///
    /// `discarded` is what [`on_bytes`](Self::on_bytes) reported for the
    /// failed attempt. The retry does not call
    /// [`on_entry_start`](Self::on_entry_start) again.
    fn on_entry_retry(&self, _entry: &str, _discarded: u64) {}

    /// The entry is done, successfully or not.
    fn on_entry_finish(&self, _entry: &str, _ok: bool) {}
}
