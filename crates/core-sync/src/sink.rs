//! Presentation contract.
//!
//! The engine never builds rows itself; it tells a sink what changed. Calls
//! arrive only for actual changes (a row whose decoded form is unchanged is not
//! upserted again).

use crate::MonitorTarget;
use core_device::BitConfig;

pub trait RenderSink {
    /// Create or replace the row for `(key, addr)`. `bits` is most significant
    /// bit first.
    fn upsert_row(&mut self, key: &str, addr: u32, bits: &[bool], display: &str, raw: &str);

    fn remove_row(&mut self, key: &str, addr: u32);

    /// Flag an odd row that is the high half of a paired 32-bit value. Sent
    /// before the `upsert_row` that renders the row in its new role.
    fn mark_paired_continuation(&mut self, key: &str, addr: u32, continuation: bool);

    /// Target selected or cleared; sinks with a bit header rebuild it here.
    fn target_changed(&mut self, _target: Option<&MonitorTarget>, _bits: BitConfig) {}
}
