//! Storage reports.

/// Summary of free space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StorageReport {
    /// Sum of all free bytes.
    pub total_free_space: u32,
    /// Floor size of the largest non-empty size class. A request of this
    /// many bytes is guaranteed to succeed while a node slot is available.
    pub largest_free_region: u32,
}

/// Free-list length of a single size class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FreeRegion {
    /// Smallest block size filed in this class.
    pub size: u32,
    /// Number of free blocks currently in this class.
    pub count: u32,
}

/// Per-class histogram of free blocks, one entry per size class in class
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StorageReportFull {
    pub free_regions: Vec<FreeRegion>,
}

impl StorageReportFull {
    /// Total number of free blocks across all classes.
    #[must_use]
    pub fn free_block_count(&self) -> u64 {
        self.free_regions.iter().map(|r| u64::from(r.count)).sum()
    }

    /// Classes that hold at least one free block.
    pub fn non_empty(&self) -> impl Iterator<Item = &FreeRegion> + '_ {
        self.free_regions.iter().filter(|r| r.count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StorageReportFull {
        StorageReportFull {
            free_regions: vec![
                FreeRegion { size: 8, count: 0 },
                FreeRegion { size: 9, count: 2 },
                FreeRegion { size: 10, count: 1 },
            ],
        }
    }

    #[test]
    fn full_report_counts_blocks() {
        let report = sample();
        assert_eq!(report.free_block_count(), 3);
        let sizes: Vec<u32> = report.non_empty().map(|r| r.size).collect();
        assert_eq!(sizes, vec![9, 10]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn reports_serialize_to_json() {
        let json = serde_json::to_value(StorageReport {
            total_free_space: 100,
            largest_free_region: 96,
        })
        .unwrap();
        assert_eq!(json["total_free_space"], 100);
        assert_eq!(json["largest_free_region"], 96);

        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["free_regions"][1]["count"], 2);
    }
}
