//! The event vocabulary and the per-record event counters

use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{Context, Result};
use indexmap::map::Iter;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::EnumIter;

/// All event kinds the cachegrind and callgrind text formats produce
///
/// Depending on the simulation options the profiler was run with, these are
/// the counters that can appear in the `events:` header line. See the
/// [Callgrind documentation](https://valgrind.org/docs/manual/cl-manual.html#cl-manual.options)
/// for details. Identifiers not known to the crate are preserved in
/// [`EventKind::Other`] so an arbitrary vocabulary survives the parse.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, EnumIter)]
pub enum EventKind {
    /// The default event. I cache reads (which equals the number of instructions executed)
    Ir,
    /// D Cache reads (which equals the number of memory reads) (--cache-sim=yes)
    Dr,
    /// D Cache writes (which equals the number of memory writes) (--cache-sim=yes)
    Dw,
    /// I1 cache read misses (--cache-sim=yes)
    I1mr,
    /// D1 cache read misses (--cache-sim=yes)
    D1mr,
    /// D1 cache write misses (--cache-sim=yes)
    D1mw,
    /// LL cache instruction read misses (--cache-sim=yes)
    ILmr,
    /// LL cache data read misses (--cache-sim=yes)
    DLmr,
    /// LL cache data write misses (--cache-sim=yes)
    DLmw,
    /// Conditional branches executed (--branch-sim=yes)
    Bc,
    /// Conditional branches mispredicted (--branch-sim=yes)
    Bcm,
    /// Indirect branches executed (--branch-sim=yes)
    Bi,
    /// Indirect branches mispredicted (--branch-sim=yes)
    Bim,
    /// CPU cycles, as emitted by simulators which estimate them directly
    Cy,
    /// The number of global bus events (--collect-bus=yes)
    Ge,
    /// The number of system calls done (--collect-systime=yes)
    SysCount,
    /// The elapsed time spent in system calls (--collect-systime=yes)
    SysTime,
    /// The cpu time spent during system calls (--collect-systime=nsec)
    SysCpuTime,
    /// An event identifier not known to the crate, kept verbatim
    Other(String),
}

/// The event counters of a single record, keyed by [`EventKind`]
///
/// The insertion order is preserved and equals the column order declared by
/// the `events:` header line. A zero-filled prototype is built once from the
/// header and cloned per record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics(IndexMap<EventKind, u64>);

/// The derived summary of a full cache simulation
///
/// Requires the complete cache-sim event set `Ir Dr Dw I1mr D1mr D1mw ILmr
/// DLmr DLmw` and is a display aid only. The estimated cycles use Itamar
/// Turner-Trauring's formula from
/// <https://pythonspeed.com/articles/consistent-benchmarking-in-ci/>.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSummary {
    /// L1 cache hits
    pub l1_hits: u64,
    /// LL cache hits
    pub ll_hits: u64,
    /// RAM hits
    pub ram_hits: u64,
    /// The total amount of cache reads and writes
    pub total_memory_rw: u64,
    /// Estimated CPU cycles
    pub cycles: u64,
}

impl EventKind {
    /// Return true if this is a derived or directly emitted cycle counter
    pub fn is_cycles(&self) -> bool {
        *self == Self::Cy
    }
}

impl Default for EventKind {
    fn default() -> Self {
        Self::Ir
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ir => f.write_str("Ir"),
            Self::Dr => f.write_str("Dr"),
            Self::Dw => f.write_str("Dw"),
            Self::I1mr => f.write_str("I1mr"),
            Self::D1mr => f.write_str("D1mr"),
            Self::D1mw => f.write_str("D1mw"),
            Self::ILmr => f.write_str("ILmr"),
            Self::DLmr => f.write_str("DLmr"),
            Self::DLmw => f.write_str("DLmw"),
            Self::Bc => f.write_str("Bc"),
            Self::Bcm => f.write_str("Bcm"),
            Self::Bi => f.write_str("Bi"),
            Self::Bim => f.write_str("Bim"),
            Self::Cy => f.write_str("Cy"),
            Self::Ge => f.write_str("Ge"),
            Self::SysCount => f.write_str("SysCount"),
            Self::SysTime => f.write_str("SysTime"),
            Self::SysCpuTime => f.write_str("SysCpuTime"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(string: &str) -> std::result::Result<Self, Self::Err> {
        let lower = string.to_lowercase();
        let event_kind = match lower.as_str() {
            "instructions" | "ir" => Self::Ir,
            "dr" => Self::Dr,
            "dw" => Self::Dw,
            "i1mr" => Self::I1mr,
            "d1mr" => Self::D1mr,
            "d1mw" => Self::D1mw,
            "ilmr" => Self::ILmr,
            "dlmr" => Self::DLmr,
            "dlmw" => Self::DLmw,
            "bc" => Self::Bc,
            "bcm" => Self::Bcm,
            "bi" => Self::Bi,
            "bim" => Self::Bim,
            "cy" | "cycles" => Self::Cy,
            "ge" => Self::Ge,
            "syscount" => Self::SysCount,
            "systime" => Self::SysTime,
            "syscputime" => Self::SysCpuTime,
            _ => Self::Other(string.to_owned()),
        };

        Ok(event_kind)
    }
}

impl Metrics {
    /// Return empty `Metrics`
    pub fn empty() -> Self {
        Self(IndexMap::new())
    }

    /// Add metrics from an iterator over strings
    ///
    /// Adding metrics stops as soon as there are no more keys in this
    /// `Metrics` or no more values in the iterator. This property is
    /// important for the data rows of the output files. From the
    /// documentation of the callgrind format:
    ///
    /// > If a cost line specifies less event counts than given in the
    /// > "events" line, the rest is assumed to be zero.
    ///
    /// # Errors
    ///
    /// If one of the strings in the iterator is not parsable as u64
    pub fn add_iter_str<I, T>(&mut self, iter: T) -> Result<()>
    where
        I: AsRef<str>,
        T: IntoIterator<Item = I>,
    {
        for (this, other) in self.0.values_mut().zip(iter.into_iter()) {
            let value = other
                .as_ref()
                .parse::<u64>()
                .context("An event count must be a non-negative integer")?;
            *this = this.saturating_add(value);
        }

        Ok(())
    }

    /// Sum these `Metrics` with another `Metrics`
    ///
    /// Do not use this method if both `Metrics` can differ in their keys
    /// order.
    pub fn add(&mut self, other: &Self) {
        for (this, other) in self.0.values_mut().zip(other.0.values()) {
            *this = this.saturating_add(*other);
        }
    }

    /// Return the count of the `kind` if present
    ///
    /// This operation is O(1)
    pub fn metric_by_kind(&self, kind: &EventKind) -> Option<u64> {
        self.0.get_key_value(kind).map(|(_, c)| *c)
    }

    /// Return the count of the `kind` or an error
    ///
    /// # Errors
    ///
    /// If the event kind is not present
    pub fn try_metric_by_kind(&self, kind: &EventKind) -> Result<u64> {
        self.metric_by_kind(kind)
            .with_context(|| format!("Missing event type '{kind}'"))
    }

    /// The event kinds in column order
    pub fn event_kinds(&self) -> Vec<EventKind> {
        self.0.keys().cloned().collect()
    }

    /// The primary event kind used to weight call-graph nodes
    ///
    /// [`EventKind::Cy`] when the vocabulary carries it, [`EventKind::Ir`]
    /// otherwise.
    pub fn primary_kind(&self) -> EventKind {
        if self.0.contains_key(&EventKind::Cy) {
            EventKind::Cy
        } else {
            EventKind::Ir
        }
    }

    /// Return true if the vocabulary contains the `kind`
    pub fn contains_kind(&self, kind: &EventKind) -> bool {
        self.0.contains_key(kind)
    }

    /// Return true if every counter is zero
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|value| *value == 0)
    }

    /// Return an iterator over the counters in column order
    pub fn iter(&self) -> Iter<'_, EventKind, u64> {
        self.0.iter()
    }

    /// Return true if there are no counters present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of counters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The counter values in column order
    pub fn values(&self) -> Vec<u64> {
        self.0.values().copied().collect()
    }
}

impl<'a> IntoIterator for &'a Metrics {
    type Item = (&'a EventKind, &'a u64);

    type IntoIter = Iter<'a, EventKind, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<EventKind> for Metrics {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = EventKind>,
    {
        Self(
            iter.into_iter()
                .map(|kind| (kind, 0))
                .collect::<IndexMap<_, _>>(),
        )
    }
}

impl TryFrom<&Metrics> for CacheSummary {
    type Error = anyhow::Error;

    fn try_from(value: &Metrics) -> std::result::Result<Self, Self::Error> {
        use EventKind::*;

        let instructions = value.try_metric_by_kind(&Ir)?;
        let data_reads = value.try_metric_by_kind(&Dr)?;
        let data_writes = value.try_metric_by_kind(&Dw)?;
        let l1_instr_misses = value.try_metric_by_kind(&I1mr)?;
        let l1_data_read_misses = value.try_metric_by_kind(&D1mr)?;
        let l1_data_write_misses = value.try_metric_by_kind(&D1mw)?;
        let ll_instr_misses = value.try_metric_by_kind(&ILmr)?;
        let ll_data_read_misses = value.try_metric_by_kind(&DLmr)?;
        let ll_data_write_misses = value.try_metric_by_kind(&DLmw)?;

        let ram_hits = ll_instr_misses
            .saturating_add(ll_data_read_misses)
            .saturating_add(ll_data_write_misses);
        let l1_misses = l1_instr_misses
            .saturating_add(l1_data_read_misses)
            .saturating_add(l1_data_write_misses);
        let ll_hits = l1_misses.saturating_sub(ram_hits);

        let total_memory_rw = instructions
            .saturating_add(data_reads)
            .saturating_add(data_writes);
        let l1_hits = total_memory_rw
            .saturating_sub(ram_hits)
            .saturating_sub(ll_hits);

        let cycles = l1_hits
            .saturating_add(ll_hits.saturating_mul(5))
            .saturating_add(ram_hits.saturating_mul(35));

        Ok(Self {
            l1_hits,
            ll_hits,
            ram_hits,
            total_memory_rw,
            cycles,
        })
    }
}
