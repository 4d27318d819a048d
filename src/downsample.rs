//! Block index downsampling.
//!
//! Indexers record one entry per physical block (for BAM, roughly one per
//! 64KiB BGZF block), which permits fine slicing but produces large index
//! databases. The [`Downsampler`] consolidates adjacent entries of each
//! `(file, seq)` group until every entry spans at least the target
//! [`Resolution`], then verifies that the coarse index covers exactly the same
//! per-group byte and coordinate extents as the original.
//!
//! `block_prefix` and `block_suffix` are not consolidated; coarse entries carry
//! `NULL` for both.

use crate::{
    Error, Result,
    storage::{BlockIndex, BlockIndexMut},
    types::{BlockEntry, DownsampleReport, GroupExtent, GroupSummary},
};
use tracing::{debug, info, warn};

/// Target minimum byte span of a coarse index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution(i64);

impl Resolution {
    /// 256KiB of compressed data per entry.
    pub const DEFAULT_BYTES: i64 = 262_144;

    pub fn new(bytes: i64) -> Result<Self> {
        if bytes <= 0 {
            return Err(Error::InvalidResolution(bytes));
        }
        Ok(Self(bytes))
    }

    pub fn bytes(self) -> i64 {
        self.0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self(Self::DEFAULT_BYTES)
    }
}

impl TryFrom<i64> for Resolution {
    type Error = Error;

    fn try_from(bytes: i64) -> Result<Self> {
        Self::new(bytes)
    }
}

/// Running union of the byte and coordinate ranges folded since the last
/// flush. Both are unset until the first entry is folded.
#[derive(Debug, Default)]
struct Accumulator {
    bytes: Option<(i64, i64)>,
    coords: Option<(i64, i64)>,
}

fn union(acc: Option<(i64, i64)>, lo: i64, hi: i64) -> (i64, i64) {
    match acc {
        Some((acc_lo, acc_hi)) => (acc_lo.min(lo), acc_hi.max(hi)),
        None => (lo, hi),
    }
}

impl Accumulator {
    fn fold(&mut self, entry: &BlockEntry) {
        self.bytes = Some(union(self.bytes, entry.byte_lo, entry.byte_hi));
        if let (Some(lo), Some(hi)) = (entry.seq_lo, entry.seq_hi) {
            self.coords = Some(union(self.coords, lo, hi));
        }
    }

    fn byte_span(&self) -> i64 {
        self.bytes.map_or(0, |(lo, hi)| hi - lo)
    }

    /// Validate the folded ranges; mapped groups must also carry coordinates.
    fn check(&self, mapped: bool) -> std::result::Result<(), String> {
        match self.bytes {
            Some((lo, hi)) if lo >= 0 && hi > lo => {}
            Some((lo, hi)) => return Err(format!("byte range [{lo}, {hi}) is empty or negative")),
            None => return Err("no byte range".to_string()),
        }
        if mapped {
            match self.coords {
                Some((lo, hi)) if lo >= 0 && hi > lo => {}
                Some((lo, hi)) => {
                    return Err(format!("sequence range [{lo}, {hi}) is empty or negative"));
                }
                None => return Err("mapped block without sequence coordinates".to_string()),
            }
        }
        Ok(())
    }

    /// Emit the accumulated span as a coarse entry and reset.
    fn flush(&mut self, file_id: &str, seq: &str) -> Option<BlockEntry> {
        let (byte_lo, byte_hi) = self.bytes.take()?;
        let coords = self.coords.take();
        Some(BlockEntry {
            file_id: file_id.to_string(),
            byte_lo,
            byte_hi,
            seq: Some(seq.to_string()),
            seq_lo: coords.map(|c| c.0),
            seq_hi: coords.map(|c| c.1),
            block_prefix: None,
            block_suffix: None,
        })
    }
}

fn describe(file_id: &str, seq: Option<&str>) -> String {
    format!("({}, {})", file_id, seq.unwrap_or("*"))
}

/// Consolidates a fine-grained block index into a coarser one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Downsampler {
    resolution: Resolution,
}

impl Downsampler {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    /// Replace every block of `dest` with the coarsened blocks of `source`,
    /// then check the two for coverage equivalence.
    ///
    /// `dest` is expected to be a copy of `source`; its non-block content is
    /// left alone. On error `dest` holds a partial result and must be
    /// discarded by the caller.
    pub fn run<S, D>(&self, source: &S, dest: &mut D) -> Result<DownsampleReport>
    where
        S: BlockIndex + ?Sized,
        D: BlockIndexMut + ?Sized,
    {
        let files = source.file_ids()?;
        let seqs = source.sequences()?;
        info!(
            files = files.len(),
            sequences = seqs.len(),
            resolution = self.resolution.bytes(),
            "Downsampling block index"
        );

        dest.clear_blocks()?;

        let mut report = DownsampleReport {
            resolution: self.resolution.bytes(),
            files: files.len(),
            sequences: seqs.len(),
            ..Default::default()
        };

        for file_id in &files {
            for seq in &seqs {
                let summary = self.merge_group(source, dest, file_id, seq)?;
                if summary.entries_in > 0 {
                    debug!(
                        file_id = %file_id,
                        seq = %seq,
                        entries_in = summary.entries_in,
                        entries_out = summary.entries_out,
                        "Consolidated group"
                    );
                    report.record(summary);
                }
            }
            if let Some(summary) = consolidate_unmapped(source, dest, file_id)? {
                debug!(file_id = %file_id, entries_in = summary.entries_in, "Consolidated unmapped blocks");
                report.record(summary);
            }
        }

        verify_equivalence(source, dest)?;

        info!(
            entries_in = report.entries_in,
            entries_out = report.entries_out,
            "Downsampled block index"
        );
        Ok(report)
    }

    /// Streaming merge of one mapped group. A flush happens as soon as the
    /// accumulated span reaches the resolution; the final entry may be
    /// shorter.
    fn merge_group<S, D>(
        &self,
        source: &S,
        dest: &mut D,
        file_id: &str,
        seq: &str,
    ) -> Result<GroupSummary>
    where
        S: BlockIndex + ?Sized,
        D: BlockIndexMut + ?Sized,
    {
        let resolution = self.resolution.bytes();
        let mut acc = Accumulator::default();
        let mut summary = GroupSummary {
            file_id: file_id.to_string(),
            seq: Some(seq.to_string()),
            entries_in: 0,
            entries_out: 0,
        };

        source.scan_group(file_id, seq, &mut |entry| {
            summary.entries_in += 1;
            acc.fold(&entry);
            acc.check(true).map_err(|detail| Error::MalformedEntry {
                file_id: file_id.to_string(),
                seq: seq.to_string(),
                detail,
            })?;

            if acc.byte_span() >= resolution {
                if let Some(coarse) = acc.flush(file_id, seq) {
                    dest.insert_block(&coarse)?;
                    summary.entries_out += 1;
                }
            }
            Ok(())
        })?;

        if let Some(coarse) = acc.flush(file_id, seq) {
            dest.insert_block(&coarse)?;
            summary.entries_out += 1;
        }
        Ok(summary)
    }
}

/// Collapse a file's unmapped blocks into a single entry, regardless of
/// resolution.
fn consolidate_unmapped<S, D>(source: &S, dest: &mut D, file_id: &str) -> Result<Option<GroupSummary>>
where
    S: BlockIndex + ?Sized,
    D: BlockIndexMut + ?Sized,
{
    let Some(span) = source.unmapped_span(file_id)? else {
        return Ok(None);
    };
    if span.byte_lo < 0 || span.byte_hi <= span.byte_lo {
        return Err(Error::MalformedEntry {
            file_id: file_id.to_string(),
            seq: "*".to_string(),
            detail: format!(
                "unmapped byte range [{}, {}) is empty or negative",
                span.byte_lo, span.byte_hi
            ),
        });
    }

    dest.insert_block(&BlockEntry::unmapped(file_id, (span.byte_lo, span.byte_hi)))?;
    Ok(Some(GroupSummary {
        file_id: file_id.to_string(),
        seq: None,
        entries_in: span.entries,
        entries_out: 1,
    }))
}

/// Check that `dest` reports the same per-group aggregate extents as
/// `source`, group for group and in the same order.
pub fn verify_equivalence<S, D>(source: &S, dest: &D) -> Result<()>
where
    S: BlockIndex + ?Sized,
    D: BlockIndex + ?Sized,
{
    let expected = source.group_extents()?;
    let actual = dest.group_extents()?;
    if expected == actual {
        debug!(groups = expected.len(), "Index extents match");
        return Ok(());
    }

    let detail = match first_difference(&expected, &actual) {
        Some((Some(src), Some(dst))) => format!(
            "group {} differs: source {}, destination {}",
            describe(&src.file_id, src.seq.as_deref()),
            extent_ranges(src),
            extent_ranges(dst)
        ),
        Some((Some(src), None)) => format!(
            "group {} missing from destination",
            describe(&src.file_id, src.seq.as_deref())
        ),
        Some((None, Some(dst))) => format!(
            "group {} not present in source",
            describe(&dst.file_id, dst.seq.as_deref())
        ),
        _ => format!(
            "source has {} groups, destination has {}",
            expected.len(),
            actual.len()
        ),
    };
    let err = Error::EquivalenceMismatch(detail);
    warn!(kind = err.kind(), "{}", err);
    Err(err)
}

fn first_difference<'a>(
    expected: &'a [GroupExtent],
    actual: &'a [GroupExtent],
) -> Option<(Option<&'a GroupExtent>, Option<&'a GroupExtent>)> {
    let len = expected.len().max(actual.len());
    (0..len)
        .map(|i| (expected.get(i), actual.get(i)))
        .find(|(a, b)| a != b)
}

fn extent_ranges(extent: &GroupExtent) -> String {
    match (extent.seq_lo, extent.seq_hi) {
        (Some(lo), Some(hi)) => format!(
            "bytes [{}, {}) seq [{lo}, {hi})",
            extent.byte_lo, extent.byte_hi
        ),
        _ => format!("bytes [{}, {})", extent.byte_lo, extent.byte_hi),
    }
}
