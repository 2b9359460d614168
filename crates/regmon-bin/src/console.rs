//! Line-oriented render sink: every row change becomes one output line.

use ahash::AHashSet;
use core_device::{BitConfig, bit_labels, format_label};
use core_sync::{MonitorTarget, RenderSink};
use std::io::Write;
use tracing::trace;

pub struct ConsoleSink<W: Write> {
    out: W,
    continuations: AHashSet<(String, u32)>,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            continuations: AHashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{line}") {
            trace!(target: "runtime", error = %e, "console_write_failed");
        }
    }
}

fn bit_string(bits: &[bool]) -> String {
    bits.iter().map(|on| if *on { '1' } else { '0' }).collect()
}

impl<W: Write> RenderSink for ConsoleSink<W> {
    fn upsert_row(&mut self, key: &str, addr: u32, bits: &[bool], display: &str, raw: &str) {
        let label = format_label(key, addr);
        let marker = if self.continuations.contains(&(key.to_string(), addr)) {
            "~"
        } else {
            " "
        };
        self.emit(format_args!(
            "{label:>10}{marker} {bits} {display:>14} {raw}",
            bits = bit_string(bits)
        ));
    }

    fn remove_row(&mut self, key: &str, addr: u32) {
        self.continuations.remove(&(key.to_string(), addr));
        trace!(target: "runtime", key, addr, "console_row_removed");
    }

    fn mark_paired_continuation(&mut self, key: &str, addr: u32, continuation: bool) {
        let slot = (key.to_string(), addr);
        if continuation {
            self.continuations.insert(slot);
        } else {
            self.continuations.remove(&slot);
        }
    }

    fn target_changed(&mut self, target: Option<&MonitorTarget>, bits: BitConfig) {
        match target {
            Some(target) => {
                let header: String = bit_labels(bits).into_iter().collect();
                self.emit(format_args!("== monitoring {target} =="));
                self.emit(format_args!("{:>10}  {header} {:>14} raw", "label", "value"));
            }
            None => self.emit(format_args!("== monitor cleared ==")),
        }
    }
}
