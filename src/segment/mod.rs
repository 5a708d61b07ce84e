//! Segment model: top segments (aligned upward to a parent) and bottom
//! segments (aligned downward to each child), plus the cursor abstraction
//! that walks them across coordinate, parse and tree edges.

use crate::genome::GenomeId;

/// Sentinel meaning "to the end of the segment" for an iterator's
/// `end_offset`.
pub const END_OF_SEGMENT: u64 = u64::MAX;

/// An aligned interval in a genome whose homolog lies in its parent.
#[derive(Debug, Clone)]
pub struct TopSegment {
    pub start: u64,
    pub length: u64,
    /// Index of the homologous segment in the parent genome's bottom table.
    pub parent_bottom: Option<usize>,
    /// Orientation relative to the parent.
    pub reversed: bool,
    /// Next segment in this genome's paralogy ring (cyclic, finite).
    pub next_paralogy: Option<usize>,
    /// Bottom segment in the *same* genome overlapping this position.
    pub bottom_parse_index: Option<usize>,
}

impl TopSegment {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Per-child correspondence stored in a bottom segment: which top segment
/// in the child genome this position maps to, and its orientation.
#[derive(Debug, Clone, Copy)]
pub struct ChildSlot {
    pub top_index: Option<usize>,
    pub reversed: bool,
}

/// An aligned interval in a genome whose homologs lie in each child genome.
#[derive(Debug, Clone)]
pub struct BottomSegment {
    pub start: u64,
    pub length: u64,
    /// One slot per child, in the same order as the genome's child list.
    pub children: Vec<ChildSlot>,
    /// Top segment in the *same* genome overlapping this position.
    pub top_parse_index: Option<usize>,
}

impl BottomSegment {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Which table a cursor is positioned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Top,
    Bottom,
}

/// A cursor pinning one segment plus a sub-interval within it. Iterators
/// are values: cloning produces an independent cursor, there is no shared
/// mutable iterator state.
#[derive(Debug, Clone)]
pub struct SegmentCursor {
    pub genome: GenomeId,
    pub table: Table,
    pub index: usize,
    pub start_offset: u64,
    pub end_offset: u64,
    pub reversed: bool,
}

impl SegmentCursor {
    /// A cursor over the whole of `index` in `table`, not reversed.
    pub fn whole(genome: GenomeId, table: Table, index: usize) -> Self {
        Self {
            genome,
            table,
            index,
            start_offset: 0,
            end_offset: END_OF_SEGMENT,
            reversed: false,
        }
    }

    pub fn get_reversed(&self) -> bool {
        self.reversed
    }

    pub fn get_start_position(&self) -> u64 {
        self.start_offset
    }

    pub fn get_end_position(&self, native_length: u64) -> u64 {
        if self.end_offset == END_OF_SEGMENT {
            native_length
        } else {
            self.end_offset
        }
    }

    /// Effective sub-interval length given a segment's native length.
    pub fn get_length(&self, native_length: u64) -> u64 {
        let end = if self.end_offset == END_OF_SEGMENT {
            native_length
        } else {
            self.end_offset
        };
        end - self.start_offset
    }

    /// Step to the previous segment in the same table in coordinate order.
    /// A reversed cursor steps in the opposite direction, matching the
    /// spec's "reversed iterators flip the direction" rule.
    pub fn to_left(&self, store: &crate::navigator::AlignmentStore) -> Option<Self> {
        if self.reversed {
            self.step(store, 1)
        } else {
            self.step(store, -1)
        }
    }

    /// Step to the next segment in the same table in coordinate order.
    pub fn to_right(&self, store: &crate::navigator::AlignmentStore) -> Option<Self> {
        if self.reversed {
            self.step(store, -1)
        } else {
            self.step(store, 1)
        }
    }

    fn step(&self, store: &crate::navigator::AlignmentStore, delta: isize) -> Option<Self> {
        let new_index = if delta < 0 {
            self.index.checked_sub(delta.unsigned_abs())?
        } else {
            self.index + delta as usize
        };
        let genome = store.genome(self.genome);
        let table_len = match self.table {
            Table::Top => genome.top_segments.len(),
            Table::Bottom => genome.bottom_segments.len(),
        };
        if new_index >= table_len {
            return None;
        }
        Some(Self::whole(self.genome, self.table, new_index))
    }

    /// Cross the tree edge from a top segment to the homologous bottom
    /// segment in its parent. `None` if this cursor is not over the top
    /// table, the segment has no recorded parent homolog, or the genome
    /// has no parent.
    ///
    /// Carries `start_offset`/`end_offset` through unchanged, which is
    /// exact for whole-segment cursors (the common case). A cursor over a
    /// narrowed sub-interval must be re-clipped against the destination
    /// segment's own length after crossing, since the two segments are
    /// not required to have the same native length.
    pub fn to_parent(&self, store: &crate::navigator::AlignmentStore) -> Option<Self> {
        if self.table != Table::Top {
            return None;
        }
        let genome = store.genome(self.genome);
        let parent_id = genome.parent?;
        let seg = genome.top_segments.get(self.index)?;
        let parent_bottom = seg.parent_bottom?;
        Some(Self {
            genome: parent_id,
            table: Table::Bottom,
            index: parent_bottom,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            reversed: self.reversed ^ seg.reversed,
        })
    }

    /// Cross the tree edge from a bottom segment down to `child_idx`'s top
    /// segment. `None` if this cursor is not over the bottom table, the
    /// child slot is empty (no homolog in that child), or `child_idx` is
    /// out of range.
    pub fn to_child(&self, store: &crate::navigator::AlignmentStore, child_idx: usize) -> Option<Self> {
        if self.table != Table::Bottom {
            return None;
        }
        let genome = store.genome(self.genome);
        let child_id = *genome.children.get(child_idx)?;
        let seg = genome.bottom_segments.get(self.index)?;
        let slot = seg.children.get(child_idx)?;
        let top_index = slot.top_index?;
        Some(Self {
            genome: child_id,
            table: Table::Top,
            index: top_index,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            reversed: self.reversed ^ slot.reversed,
        })
    }

    /// Move from a bottom segment to the overlapping top segment in the
    /// same genome, at the same position. `None` off the bottom table or
    /// when no top segment overlaps here.
    pub fn to_parse_up(&self, store: &crate::navigator::AlignmentStore) -> Option<Self> {
        if self.table != Table::Bottom {
            return None;
        }
        let genome = store.genome(self.genome);
        let seg = genome.bottom_segments.get(self.index)?;
        let top_index = seg.top_parse_index?;
        Some(Self {
            genome: self.genome,
            table: Table::Top,
            index: top_index,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            reversed: self.reversed,
        })
    }

    /// Move from a top segment to the overlapping bottom segment in the
    /// same genome, at the same position. `None` off the top table or
    /// when no bottom segment overlaps here.
    pub fn to_parse_down(&self, store: &crate::navigator::AlignmentStore) -> Option<Self> {
        if self.table != Table::Top {
            return None;
        }
        let genome = store.genome(self.genome);
        let seg = genome.top_segments.get(self.index)?;
        let bottom_index = seg.bottom_parse_index?;
        Some(Self {
            genome: self.genome,
            table: Table::Bottom,
            index: bottom_index,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            reversed: self.reversed,
        })
    }

    /// Materialize the residues this cursor's sub-interval covers into
    /// `out`, reverse-complemented if `self.reversed`. Errors if the
    /// underlying genome has no residues loaded for the covered sequence.
    pub fn get_sequence(&self, store: &crate::navigator::AlignmentStore, out: &mut Vec<u8>) -> crate::error::Result<()> {
        let genome = store.genome(self.genome);
        let native_start = match self.table {
            Table::Top => genome.top_segments[self.index].start,
            Table::Bottom => genome.bottom_segments[self.index].start,
        };
        let native_length = match self.table {
            Table::Top => genome.top_segments[self.index].length,
            Table::Bottom => genome.bottom_segments[self.index].length,
        };
        let abs_start = native_start + self.get_start_position();
        let abs_end = native_start + self.get_end_position(native_length);
        let bases = genome.bases_in_range(abs_start, abs_end)?;
        out.clear();
        out.extend_from_slice(bases);
        if self.reversed {
            reverse_complement_in_place(out);
        }
        Ok(())
    }

    /// Step to the next member of this top segment's paralogy ring.
    /// `None` off the top table or when the segment has no ring (no
    /// duplications at this position).
    pub fn to_next_paralogy(&self, store: &crate::navigator::AlignmentStore) -> Option<Self> {
        if self.table != Table::Top {
            return None;
        }
        let genome = store.genome(self.genome);
        let seg = genome.top_segments.get(self.index)?;
        let next = seg.next_paralogy?;
        Some(Self {
            genome: self.genome,
            table: Table::Top,
            index: next,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            reversed: self.reversed,
        })
    }
}

/// Reverse-complement DNA bytes in place. Bytes outside ACGTN (either case)
/// pass through unchanged, reversed in position.
fn reverse_complement_in_place(bases: &mut [u8]) {
    bases.reverse();
    for b in bases.iter_mut() {
        *b = match *b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            b'a' => b't',
            b'c' => b'g',
            b'g' => b'c',
            b't' => b'a',
            other => other,
        };
    }
}

// ── Tests ──────────────────────────────────────────────────────────
