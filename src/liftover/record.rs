//! Record types the lift-over engine consumes and produces: block lists
//! for BED12/PSL-style entries, and the interval boundary the engine walks
//! block-by-block.

/// Strand of a source or target interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Default for Strand {
    fn default() -> Self {
        Strand::Forward
    }
}

impl Strand {
    pub fn flipped(self) -> Self {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
        }
    }
}

/// One block of a blocked record (BED12 `blockStarts`/`blockSizes`, or a
/// PSL exon), relative to the record's `chrom_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub rel_start: u64,
    pub size: u64,
}

/// A single interval or blocked-record request to lift.
#[derive(Debug, Clone)]
pub struct IntervalRecord {
    pub chrom: String,
    pub chrom_start: u64,
    pub chrom_end: u64,
    pub strand: Strand,
    /// Empty for a plain interval (BED3/BED6); non-empty for a blocked
    /// record (BED12/PSL), each block relative to `chrom_start`.
    pub blocks: Vec<Block>,
    /// Carried through to `LiftedRecord::name` when the caller asks for
    /// `outStructuredWithName`; otherwise ignored.
    pub name: Option<String>,
}

impl IntervalRecord {
    pub fn simple(chrom: impl Into<String>, start: u64, end: u64, strand: Strand) -> Self {
        Self {
            chrom: chrom.into(),
            chrom_start: start,
            chrom_end: end,
            strand,
            blocks: Vec::new(),
            name: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocks.is_empty()
    }
}

/// One block of the lifted output, relative to the record's `chrom_start`
/// once cleanup has run (absolute while assembly is in progress).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedBlock {
    pub start: u64,
    pub end: u64,
}

/// Gap-accounting and query-side fields carried only when the engine runs
/// in structured (PSL-shaped) output mode. `matches`/`mismatches`/
/// `rep_matches`/`n_count` require base-level sequence comparison this
/// engine does not perform during lift-over (a caller with residues loaded
/// via [`crate::genome::Genome::add_sequence_with_bases`] would need to run
/// its own comparison) and are always zero here.
#[derive(Debug, Clone, Default)]
pub struct StructuredInfo {
    pub q_strand: Strand,
    pub q_start: u64,
    pub q_end: u64,
    pub q_block_starts: Vec<u64>,
    pub matches: u32,
    pub mismatches: u32,
    pub rep_matches: u32,
    pub n_count: u32,
    pub q_num_insert: u32,
    pub q_base_insert: u64,
    pub t_num_insert: u32,
    pub t_base_insert: u64,
}

/// Successfully lifted record.
#[derive(Debug, Clone)]
pub struct LiftedRecord {
    /// Start of the source span this record was projected from, in the
    /// same genome-wide coordinate space `IntervalRecord::chrom_start` is
    /// given in. Used by `convert` to sort output the way a caller walking
    /// the input in source order would expect.
    pub src_start: u64,
    pub chrom: String,
    pub chrom_start: u64,
    pub chrom_end: u64,
    pub strand: Strand,
    pub blocks: Vec<MappedBlock>,
    pub structured: Option<StructuredInfo>,
    /// Propagated from `IntervalRecord::name` only when the caller asked
    /// for `outStructuredWithName`; `None` otherwise.
    pub name: Option<String>,
}
