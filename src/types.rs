use serde::Serialize;

/// One row of the block-level byte-range index (`htsfiles_blocks`).
///
/// Byte and coordinate ranges are half-open. `seq == None` marks unmapped
/// content, in which case `seq_lo`/`seq_hi` are also `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub file_id: String,
    pub byte_lo: i64,
    pub byte_hi: i64,
    pub seq: Option<String>,
    pub seq_lo: Option<i64>,
    pub seq_hi: Option<i64>,
    pub block_prefix: Option<Vec<u8>>,
    pub block_suffix: Option<Vec<u8>>,
}

impl BlockEntry {
    /// Entry for a block of reads aligned to `seq`.
    pub fn mapped(
        file_id: impl Into<String>,
        bytes: (i64, i64),
        seq: impl Into<String>,
        coords: (i64, i64),
    ) -> Self {
        Self {
            file_id: file_id.into(),
            byte_lo: bytes.0,
            byte_hi: bytes.1,
            seq: Some(seq.into()),
            seq_lo: Some(coords.0),
            seq_hi: Some(coords.1),
            block_prefix: None,
            block_suffix: None,
        }
    }

    /// Entry for a block of unmapped reads.
    pub fn unmapped(file_id: impl Into<String>, bytes: (i64, i64)) -> Self {
        Self {
            file_id: file_id.into(),
            byte_lo: bytes.0,
            byte_hi: bytes.1,
            seq: None,
            seq_lo: None,
            seq_hi: None,
            block_prefix: None,
            block_suffix: None,
        }
    }
}

/// Aggregate extent of one `(file_id, seq)` group, as compared by the
/// equivalence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupExtent {
    pub file_id: String,
    pub seq: Option<String>,
    pub seq_lo: Option<i64>,
    pub seq_hi: Option<i64>,
    pub byte_lo: i64,
    pub byte_hi: i64,
}

/// Per-group outcome of a downsampling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub file_id: String,
    pub seq: Option<String>,
    pub entries_in: u64,
    pub entries_out: u64,
}

/// Summary of a completed downsampling run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownsampleReport {
    pub resolution: i64,
    pub files: usize,
    pub sequences: usize,
    pub entries_in: u64,
    pub entries_out: u64,
    pub groups: Vec<GroupSummary>,
}

impl DownsampleReport {
    pub(crate) fn record(&mut self, group: GroupSummary) {
        self.entries_in += group.entries_in;
        self.entries_out += group.entries_out;
        self.groups.push(group);
    }

    /// Fraction of entries removed, in `[0, 1]`.
    pub fn reduction(&self) -> f64 {
        if self.entries_in == 0 {
            return 0.0;
        }
        1.0 - self.entries_out as f64 / self.entries_in as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_groups() {
        let mut report = DownsampleReport {
            resolution: 1000,
            ..Default::default()
        };
        report.record(GroupSummary {
            file_id: "ns:acc:BAM".to_string(),
            seq: Some("chr1".to_string()),
            entries_in: 10,
            entries_out: 2,
        });
        report.record(GroupSummary {
            file_id: "ns:acc:BAM".to_string(),
            seq: None,
            entries_in: 3,
            entries_out: 1,
        });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries_in"], 13);
        assert_eq!(json["entries_out"], 3);
        assert_eq!(json["groups"][0]["seq"], "chr1");
        assert!(json["groups"][1]["seq"].is_null());
    }

    #[test]
    fn test_reduction_of_empty_report() {
        assert_eq!(DownsampleReport::default().reduction(), 0.0);
    }
}
