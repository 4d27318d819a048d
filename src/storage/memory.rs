use super::{BlockIndex, BlockIndexMut, UnmappedSpan};
use crate::{
    Result,
    types::{BlockEntry, GroupExtent},
};
use std::collections::{BTreeMap, BTreeSet};

/// Block index held in memory.
///
/// Entries are kept in insertion order; scans sort on demand.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blocks: Vec<BlockEntry>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.blocks
    }

    /// Entries of one group ordered by `(byte_lo, byte_hi)`.
    pub fn group(&self, file_id: &str, seq: Option<&str>) -> Vec<&BlockEntry> {
        let mut entries: Vec<_> = self
            .blocks
            .iter()
            .filter(|e| e.file_id == file_id && e.seq.as_deref() == seq)
            .collect();
        entries.sort_by_key(|e| (e.byte_lo, e.byte_hi));
        entries
    }
}

impl FromIterator<BlockEntry> for MemoryStorage {
    fn from_iter<I: IntoIterator<Item = BlockEntry>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}

fn widen(bound: Option<i64>, value: Option<i64>, pick: fn(i64, i64) -> i64) -> Option<i64> {
    match (bound, value) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

impl BlockIndex for MemoryStorage {
    fn file_ids(&self) -> Result<Vec<String>> {
        let ids: BTreeSet<_> = self.blocks.iter().map(|e| e.file_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    fn sequences(&self) -> Result<Vec<String>> {
        let seqs: BTreeSet<_> = self.blocks.iter().filter_map(|e| e.seq.clone()).collect();
        Ok(seqs.into_iter().collect())
    }

    fn scan_group(
        &self,
        file_id: &str,
        seq: &str,
        visit: &mut dyn FnMut(BlockEntry) -> Result<()>,
    ) -> Result<()> {
        for entry in self.group(file_id, Some(seq)) {
            visit(entry.clone())?;
        }
        Ok(())
    }

    fn unmapped_span(&self, file_id: &str) -> Result<Option<UnmappedSpan>> {
        Ok(self
            .group(file_id, None)
            .into_iter()
            .fold(None, |span: Option<UnmappedSpan>, e| {
                Some(match span {
                    None => UnmappedSpan {
                        byte_lo: e.byte_lo,
                        byte_hi: e.byte_hi,
                        entries: 1,
                    },
                    Some(s) => UnmappedSpan {
                        byte_lo: s.byte_lo.min(e.byte_lo),
                        byte_hi: s.byte_hi.max(e.byte_hi),
                        entries: s.entries + 1,
                    },
                })
            }))
    }

    fn group_extents(&self) -> Result<Vec<GroupExtent>> {
        let mut groups: BTreeMap<(&str, Option<&str>), GroupExtent> = BTreeMap::new();
        for e in &self.blocks {
            groups
                .entry((e.file_id.as_str(), e.seq.as_deref()))
                .and_modify(|g| {
                    g.seq_lo = widen(g.seq_lo, e.seq_lo, i64::min);
                    g.seq_hi = widen(g.seq_hi, e.seq_hi, i64::max);
                    g.byte_lo = g.byte_lo.min(e.byte_lo);
                    g.byte_hi = g.byte_hi.max(e.byte_hi);
                })
                .or_insert_with(|| GroupExtent {
                    file_id: e.file_id.clone(),
                    seq: e.seq.clone(),
                    seq_lo: e.seq_lo,
                    seq_hi: e.seq_hi,
                    byte_lo: e.byte_lo,
                    byte_hi: e.byte_hi,
                });
        }
        Ok(groups.into_values().collect())
    }
}

impl BlockIndexMut for MemoryStorage {
    fn clear_blocks(&mut self) -> Result<()> {
        self.blocks.clear();
        Ok(())
    }

    fn insert_block(&mut self, entry: &BlockEntry) -> Result<()> {
        self.blocks.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_extents_match_sql_ordering() {
        let storage: MemoryStorage = [
            BlockEntry::mapped("b", (10, 20), "chr1", (3, 4)),
            BlockEntry::unmapped("b", (50, 60)),
            BlockEntry::mapped("a", (0, 10), "chr2", (7, 9)),
            BlockEntry::mapped("b", (0, 10), "chr1", (1, 2)),
        ]
        .into_iter()
        .collect();

        let extents = storage.group_extents().unwrap();
        assert_eq!(extents.len(), 3);
        assert_eq!(extents[0].file_id, "a");
        assert_eq!(extents[1].seq, None);
        assert_eq!(
            extents[2],
            GroupExtent {
                file_id: "b".to_string(),
                seq: Some("chr1".to_string()),
                seq_lo: Some(1),
                seq_hi: Some(4),
                byte_lo: 0,
                byte_hi: 20,
            }
        );
    }

    #[test]
    fn test_unmapped_span_absent() {
        let storage: MemoryStorage = [BlockEntry::mapped("a", (0, 10), "chr1", (0, 1))]
            .into_iter()
            .collect();
        assert_eq!(storage.unmapped_span("a").unwrap(), None);
        assert_eq!(storage.unmapped_span("zzz").unwrap(), None);
    }
}
