//! Genome: a named node in the phylogenetic tree, owning a sequence table
//! and top/bottom segment tables.

use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::segment::{BottomSegment, TopSegment};

/// Index of a genome within an [`crate::navigator::AlignmentStore`]'s arena.
/// Cyclic structures (paralogy rings) and tree edges are index rings over
/// this arena, mirroring how the mapped store resolves offsets: the arena
/// stands in for the persistent store's byte-offset graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenomeId(pub usize);

/// A named sequence within a genome's coordinate space.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub name: String,
    pub length: u64,
    /// Offset of this sequence's first base within the genome's
    /// concatenated coordinate space. Top/bottom segments are addressed in
    /// this space, not per-chromosome.
    pub base_offset: u64,
    /// Residues, one byte per base. `None` for a length-only sequence (the
    /// common case for coordinate-only lift-over); `SegmentCursor::get_sequence`
    /// errors if it needs bases that were never loaded.
    pub bases: Option<Vec<u8>>,
}

/// A node in the alignment tree.
#[derive(Debug, Clone)]
pub struct Genome {
    pub name: String,
    pub parent: Option<GenomeId>,
    pub children: Vec<GenomeId>,
    sequences: Vec<Sequence>,
    sequence_index: HashMap<String, usize>,
    pub top_segments: Vec<TopSegment>,
    pub bottom_segments: Vec<BottomSegment>,
}

impl Genome {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            sequences: Vec::new(),
            sequence_index: HashMap::new(),
            top_segments: Vec::new(),
            bottom_segments: Vec::new(),
        }
    }

    pub fn add_sequence(&mut self, name: impl Into<String>, length: u64) {
        self.add_sequence_inner(name.into(), length, None);
    }

    /// Like [`Self::add_sequence`], additionally loading residues so
    /// `SegmentCursor::get_sequence` can materialize this sequence's bases.
    /// `bases.len()` becomes the sequence's length.
    pub fn add_sequence_with_bases(&mut self, name: impl Into<String>, bases: Vec<u8>) {
        let length = bases.len() as u64;
        self.add_sequence_inner(name.into(), length, Some(bases));
    }

    fn add_sequence_inner(&mut self, name: String, length: u64, bases: Option<Vec<u8>>) {
        let base_offset = self.sequences.last().map(|s| s.base_offset + s.length).unwrap_or(0);
        let idx = self.sequences.len();
        self.sequence_index.insert(name.clone(), idx);
        self.sequences.push(Sequence { name, length, base_offset, bases });
    }

    pub fn get_sequence(&self, name: &str) -> Option<&Sequence> {
        self.sequence_index.get(name).map(|&i| &self.sequences[i])
    }

    /// Fetch the residues spanning `[genome_start, genome_end)` in this
    /// genome's concatenated coordinate space. Errors if the position falls
    /// outside any sequence or the containing sequence has no bases loaded.
    pub fn bases_in_range(&self, genome_start: u64, genome_end: u64) -> Result<&[u8]> {
        let (chrom, local_start) = self.locate(genome_start).ok_or_else(|| {
            StoreError::Navigator(format!("position {genome_start} is out of range in genome {}", self.name))
        })?;
        let seq = self.get_sequence(chrom).expect("locate() only returns known sequence names");
        let bases = seq
            .bases
            .as_deref()
            .ok_or_else(|| StoreError::Navigator(format!("no residues loaded for sequence {chrom}")))?;
        let local_end = local_start + (genome_end - genome_start);
        bases
            .get(local_start as usize..local_end as usize)
            .ok_or_else(|| StoreError::Navigator(format!("range out of bounds for sequence {chrom}")))
    }

    /// Convert a `(chrom, local_offset)` pair into this genome's
    /// concatenated coordinate space. `local_offset == length` (one past
    /// the last base) is valid, for representing a half-open interval end.
    pub fn to_genome_coord(&self, chrom: &str, local_offset: u64) -> Option<u64> {
        let seq = self.get_sequence(chrom)?;
        if local_offset > seq.length {
            return None;
        }
        Some(seq.base_offset + local_offset)
    }

    /// Reverse of [`Self::to_genome_coord`]: find which sequence a
    /// genome-wide position falls in and its offset within that sequence.
    pub fn locate(&self, genome_pos: u64) -> Option<(&str, u64)> {
        let idx = segment_containing(&self.sequences, genome_pos, |s| (s.base_offset, s.base_offset + s.length))?;
        let seq = &self.sequences[idx];
        Some((seq.name.as_str(), genome_pos - seq.base_offset))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Which slot in `self.children` a given child genome occupies. Bottom
    /// segments index their per-child correspondence by this position.
    pub fn child_slot(&self, child: GenomeId) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }

    /// Index of the top segment whose `[start, start+length)` contains
    /// `pos`, assuming segments are stored in ascending coordinate order.
    pub fn top_segment_at(&self, pos: u64) -> Option<usize> {
        segment_containing(&self.top_segments, pos, |s| (s.start, s.end()))
    }

    /// Index of the bottom segment whose `[start, start+length)` contains
    /// `pos`, assuming segments are stored in ascending coordinate order.
    pub fn bottom_segment_at(&self, pos: u64) -> Option<usize> {
        segment_containing(&self.bottom_segments, pos, |s| (s.start, s.end()))
    }
}

fn segment_containing<T>(segments: &[T], pos: u64, bounds: impl Fn(&T) -> (u64, u64)) -> Option<usize> {
    let mut lo = 0usize;
    let mut hi = segments.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let (start, end) = bounds(&segments[mid]);
        if pos < start {
            hi = mid;
        } else if pos >= end {
            lo = mid + 1;
        } else {
            return Some(mid);
        }
    }
    None
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::ChildSlot;

    fn seg(start: u64, length: u64) -> TopSegment {
        TopSegment {
            start,
            length,
            parent_bottom: None,
            reversed: false,
            next_paralogy: None,
            bottom_parse_index: None,
        }
    }

    #[test]
    fn test_sequence_lookup() {
        let mut g = Genome::new("human");
        g.add_sequence("chr1", 1000);
        assert_eq!(g.get_sequence("chr1").unwrap().length, 1000);
        assert!(g.get_sequence("chrX").is_none());
    }

    #[test]
    fn test_top_segment_at_finds_containing_segment() {
        let mut g = Genome::new("human");
        g.top_segments.push(seg(0, 50));
        g.top_segments.push(seg(50, 30));
        g.top_segments.push(seg(100, 20));

        assert_eq!(g.top_segment_at(0), Some(0));
        assert_eq!(g.top_segment_at(49), Some(0));
        assert_eq!(g.top_segment_at(50), Some(1));
        assert_eq!(g.top_segment_at(79), Some(1));
        assert_eq!(g.top_segment_at(80), None);
        assert_eq!(g.top_segment_at(119), Some(2));
        assert_eq!(g.top_segment_at(120), None);
    }

    #[test]
    fn test_child_slot() {
        let mut g = Genome::new("ancestor");
        g.children = vec![GenomeId(1), GenomeId(2)];
        assert_eq!(g.child_slot(GenomeId(2)), Some(1));
        assert_eq!(g.child_slot(GenomeId(9)), None);
    }

    #[test]
    fn test_bottom_segment_children_slots() {
        let mut g = Genome::new("ancestor");
        g.bottom_segments.push(BottomSegment {
            start: 0,
            length: 100,
            children: vec![
                ChildSlot { top_index: Some(0), reversed: false },
                ChildSlot { top_index: None, reversed: false },
            ],
            top_parse_index: None,
        });
        assert_eq!(g.bottom_segment_at(50), Some(0));
        assert!(g.bottom_segments[0].children[1].top_index.is_none());
    }
}
