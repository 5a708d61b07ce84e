//! Lift-over engine: turns navigator projections into output records.
//! Owns the parts of the pipeline that are record-format-aware — block
//! reassembly, strand bookkeeping, gap counting — so the navigator itself
//! stays free of any notion of BED or PSL.

pub mod record;

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{LiftError, LiftSkip, Result as StoreResult};
use crate::genome::GenomeId;
use crate::navigator::{AlignmentStore, MappedPiece};

pub use record::{Block, IntervalRecord, LiftedRecord, MappedBlock, Strand, StructuredInfo};

/// Options mirroring the engine's recognized configuration surface.
/// `bed_type` is tracked for callers that need it (e.g. to decide whether
/// to promote a scalar record to blocked form before calling `convert`);
/// this crate does not parse wire records itself, so it is not consulted
/// internally.
#[derive(Debug, Clone)]
pub struct LiftOverConfig {
    pub traverse_dupes: bool,
    pub out_structured: bool,
    pub out_structured_with_name: bool,
    pub coalescence_limit: Option<GenomeId>,
    pub bed_type: u8,
}

impl Default for LiftOverConfig {
    fn default() -> Self {
        Self {
            traverse_dupes: false,
            out_structured: false,
            out_structured_with_name: false,
            coalescence_limit: None,
            bed_type: 3,
        }
    }
}

/// A block's target-side projection plus the source range it came from.
/// Intermediate value between `liftInterval` and `assignBlocksToIntervals`.
#[derive(Debug, Clone)]
struct MappedBlockPiece {
    src_start: u64,
    src_end: u64,
    tgt_chrom: String,
    tgt_start: u64,
    tgt_end: u64,
    reversed: bool,
}

impl From<MappedPiece> for MappedBlockPiece {
    fn from(p: MappedPiece) -> Self {
        Self {
            src_start: p.src_start,
            src_end: p.src_end,
            tgt_chrom: p.tgt_chrom,
            tgt_start: p.tgt_start,
            tgt_end: p.tgt_end,
            reversed: p.reversed,
        }
    }
}

/// Record under assembly: absolute target-side coordinates and blocks
/// until the walk finishes, at which point blocks are relativized.
struct Assembling {
    src_start: u64,
    src_end: u64,
    chrom: String,
    reversed: bool,
    start: u64,
    end: u64,
    blocks: Vec<MappedBlock>,
    q_block_starts: Vec<u64>,
    name: Option<String>,
}

/// Lift one non-blocked interval. Per spec, scalar records never go
/// through `assignBlocksToIntervals` — each projected piece becomes its
/// own output record directly, so a duplicated scalar interval always
/// produces one record per target copy regardless of `out_structured`.
pub fn lift_simple_interval(
    store: &AlignmentStore,
    src: GenomeId,
    tgt: GenomeId,
    record: &IntervalRecord,
    config: &LiftOverConfig,
) -> Result<Vec<LiftedRecord>, LiftError> {
    validate_bounds(store, src, record)?;

    let pieces = store.lift_interval(
        src,
        &record.chrom,
        record.chrom_start,
        record.chrom_end,
        tgt,
        config.traverse_dupes,
        config.coalescence_limit,
    )?;

    Ok(pieces
        .into_iter()
        .map(|p| LiftedRecord {
            src_start: p.src_start,
            chrom: p.tgt_chrom,
            chrom_start: p.tgt_start,
            chrom_end: p.tgt_end,
            strand: if p.reversed { record.strand.flipped() } else { record.strand },
            blocks: Vec::new(),
            structured: None,
            name: if config.out_structured_with_name { record.name.clone() } else { None },
        })
        .collect())
}

/// Lift a blocked record (BED12/PSL exon list). Each block is projected
/// independently through `liftInterval`, then `assignBlocksToIntervals`
/// reassembles the per-block projections into output records, merging
/// compatible runs and splitting at duplicates and incompatibilities.
pub fn lift_blocked_record(
    store: &AlignmentStore,
    src: GenomeId,
    tgt: GenomeId,
    record: &IntervalRecord,
    config: &LiftOverConfig,
) -> Result<Vec<LiftedRecord>, LiftError> {
    if record.blocks.is_empty() {
        return Err(LiftSkip::EmptyBlocks { bed_type: 12 }.into());
    }
    validate_bounds(store, src, record)?;

    let seq_len = store.genome(src).get_sequence(&record.chrom).unwrap().length;
    let mut mapped = Vec::new();
    for b in &record.blocks {
        let abs_start = record.chrom_start + b.rel_start;
        let abs_end = abs_start + b.size;
        if abs_end > seq_len {
            return Err(LiftSkip::OutOfRange {
                chrom: record.chrom.clone(),
                end: abs_end,
                seq_len,
            }
            .into());
        }
        let pieces = store.lift_interval(
            src,
            &record.chrom,
            abs_start,
            abs_end,
            tgt,
            config.traverse_dupes,
            config.coalescence_limit,
        )?;
        mapped.extend(pieces.into_iter().map(MappedBlockPiece::from));
    }

    let name = if config.out_structured_with_name { record.name.clone() } else { None };
    Ok(assign_blocks_to_intervals(mapped, &record.strand, name, config))
}

fn validate_bounds(store: &AlignmentStore, src: GenomeId, record: &IntervalRecord) -> Result<(), LiftSkip> {
    let seq_len = store
        .genome(src)
        .get_sequence(&record.chrom)
        .ok_or_else(|| LiftSkip::MissingSequence(record.chrom.clone()))?
        .length;
    if record.chrom_end > seq_len {
        return Err(LiftSkip::OutOfRange {
            chrom: record.chrom.clone(),
            end: record.chrom_end,
            seq_len,
        });
    }
    Ok(())
}

/// The merging core: sorts mapped blocks by source start, walks them in
/// order, and decides per block whether it extends the last output record
/// or starts a new one.
fn assign_blocks_to_intervals(
    mut mapped: Vec<MappedBlockPiece>,
    src_strand: &Strand,
    name: Option<String>,
    config: &LiftOverConfig,
) -> Vec<LiftedRecord> {
    mapped.sort_by_key(|p| p.src_start);

    let mut records: Vec<Assembling> = Vec::new();

    for (i, piece) in mapped.iter().enumerate() {
        let is_duplicate = (i > 0 && ranges_overlap(&mapped[i - 1], piece))
            || (i + 1 < mapped.len() && ranges_overlap(&mapped[i + 1], piece));

        let start_new = records.is_empty()
            || (config.out_structured && is_duplicate)
            || !compatible(records.last().unwrap(), piece);

        if start_new {
            records.push(Assembling {
                src_start: piece.src_start,
                src_end: piece.src_end,
                chrom: piece.tgt_chrom.clone(),
                reversed: piece.reversed,
                start: piece.tgt_start,
                end: piece.tgt_end,
                blocks: vec![MappedBlock { start: piece.tgt_start, end: piece.tgt_end }],
                q_block_starts: vec![piece.src_start],
                name: name.clone(),
            });
        } else {
            let rec = records.last_mut().unwrap();
            rec.src_start = rec.src_start.min(piece.src_start);
            rec.src_end = rec.src_end.max(piece.src_end);
            rec.start = rec.start.min(piece.tgt_start);
            rec.end = rec.end.max(piece.tgt_end);
            rec.blocks.push(MappedBlock { start: piece.tgt_start, end: piece.tgt_end });
            rec.q_block_starts.push(piece.src_start);
        }
    }

    records.into_iter().map(|r| finish_record(r, src_strand, config)).collect()
}

fn ranges_overlap(a: &MappedBlockPiece, b: &MappedBlockPiece) -> bool {
    a.src_start < b.src_end && b.src_start < a.src_end
}

/// See spec §4.4 `compatible`: same target strand, strictly advancing
/// source start, monotonic target-side gap (direction depends on whether
/// the target strand differs from the source record's strand), same
/// target chromosome.
fn compatible(last: &Assembling, block: &MappedBlockPiece) -> bool {
    if last.reversed != block.reversed {
        return false;
    }
    // Paralogy duplicates that share the exact same source span (the
    // common case from a single-bottom-segment ring) must still be able
    // to merge onto one non-structured line; only a strictly *earlier*
    // source start breaks ordering.
    if block.src_start < last.src_start {
        return false;
    }
    if last.chrom != block.tgt_chrom {
        return false;
    }
    let last_block = last.blocks.last().unwrap();
    let delta = if block.reversed {
        last_block.start as i128 - block.tgt_end as i128
    } else {
        block.tgt_start as i128 - last_block.end as i128
    };
    delta >= 0
}

fn finish_record(mut rec: Assembling, src_strand: &Strand, config: &LiftOverConfig) -> LiftedRecord {
    let strand = if rec.reversed { src_strand.flipped() } else { *src_strand };

    for b in rec.blocks.iter_mut() {
        b.start -= rec.start;
        b.end -= rec.start;
    }
    // q_block_starts stay in the same absolute source-coordinate space as
    // IntervalRecord::chrom_start/LiftedRecord::src_start, matching PSL's
    // qStarts (absolute), unlike the record-relative target blockStarts.

    flip_blocks(&mut rec.blocks, &mut rec.q_block_starts, strand, config.out_structured);

    let q_strand = *src_strand;
    let structured = if config.out_structured {
        let mut info = StructuredInfo {
            q_strand,
            q_start: rec.src_start,
            q_end: rec.src_end,
            q_block_starts: rec.q_block_starts.clone(),
            ..Default::default()
        };
        compute_psl_inserts(&rec.blocks, &rec.q_block_starts, q_strand, &mut info);
        Some(info)
    } else {
        None
    };

    LiftedRecord {
        src_start: rec.src_start,
        chrom: rec.chrom,
        chrom_start: rec.start,
        chrom_end: rec.end,
        strand,
        blocks: rec.blocks,
        structured,
        name: rec.name,
    }
}

/// Enforce ascending block order under the chosen strand convention.
/// Interval-only output always wants ascending order; structured output
/// wants descending order on the `-` strand, mirroring the PSL
/// convention that `qBlockStarts`/`tStarts` run in genomic order.
fn flip_blocks(blocks: &mut Vec<MappedBlock>, q_block_starts: &mut Vec<u64>, strand: Strand, structured: bool) {
    if blocks.len() < 2 {
        return;
    }
    let delta = blocks[1].start as i128 - blocks[0].end as i128;
    let should_flip = if structured {
        (strand == Strand::Reverse && delta >= 0) || (strand != Strand::Reverse && delta < 0)
    } else {
        delta < 0
    };
    if should_flip {
        blocks.reverse();
        q_block_starts.reverse();
    }
}

/// For each adjacent block pair, count positive target- and query-side
/// gaps as PSL-style inserts. Query-side gaps are clamped to zero:
/// duplicated blocks can overlap in source coordinates. `q_strand` is the
/// source record's own strand (never flipped by tree-edge reversal),
/// distinct from the target-side `strand` `finish_record` computes.
fn compute_psl_inserts(blocks: &[MappedBlock], q_block_starts: &[u64], q_strand: Strand, info: &mut StructuredInfo) {
    for w in blocks.windows(2) {
        let gap = w[1].start as i128 - w[0].end as i128;
        if gap > 0 {
            info.t_num_insert += 1;
            info.t_base_insert += gap as u64;
        }
    }
    let q_sizes: Vec<u64> = blocks.iter().zip(q_block_starts).map(|(b, _)| b.end - b.start).collect();
    let pairs: Vec<(usize, usize)> = if q_strand == Strand::Reverse {
        (1..q_block_starts.len()).map(|i| (i, i - 1)).rev().collect()
    } else {
        (1..q_block_starts.len()).map(|i| (i - 1, i)).collect()
    };
    for (a, b) in pairs {
        let gap = q_block_starts[b] as i128 - (q_block_starts[a] as i128 + q_sizes[a] as i128);
        if gap > 0 {
            info.q_num_insert += 1;
            info.q_base_insert += gap as u64;
        }
    }
}

/// Lift every record in `records`, warning once per unknown chromosome and
/// skipping any record that fails with a soft [`LiftSkip`]; a hard
/// navigator error aborts the whole batch.
pub fn convert(
    store: &AlignmentStore,
    src: GenomeId,
    tgt: GenomeId,
    records: &[IntervalRecord],
    config: &LiftOverConfig,
) -> StoreResult<Vec<LiftedRecord>> {
    let mut out = Vec::new();
    let mut warned_chroms: HashSet<String> = HashSet::new();
    let mut skipped = 0usize;

    for record in records {
        let result = if record.is_blocked() || config.out_structured {
            lift_blocked_record(store, src, tgt, &promote_to_blocked(record), config)
        } else {
            lift_simple_interval(store, src, tgt, record, config)
        };
        match result {
            Ok(lifted) => out.extend(lifted),
            Err(LiftError::Skip(skip)) => {
                skipped += 1;
                if let LiftSkip::MissingSequence(chrom) = &skip {
                    if !warned_chroms.insert(chrom.clone()) {
                        continue;
                    }
                }
                warn!(chrom = %record.chrom, start = record.chrom_start, end = record.chrom_end, "skipping record: {skip}");
            }
            Err(LiftError::Navigator(e)) => return Err(e),
        }
    }

    out.sort_by_key(|r| r.src_start);
    debug!(lifted = out.len(), skipped, "lift-over batch complete");
    Ok(out)
}

/// Per spec §4.4 step 1: in structured output mode a scalar record is
/// promoted to a single whole-record block before assembly, so the block
/// path is the only path the assembler needs to know about.
fn promote_to_blocked(record: &IntervalRecord) -> IntervalRecord {
    if record.is_blocked() {
        return record.clone();
    }
    let mut promoted = record.clone();
    promoted.blocks = vec![Block { rel_start: 0, size: record.chrom_end - record.chrom_start }];
    promoted
}

// ── Tests ──────────────────────────────────────────────────────────
