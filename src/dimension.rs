//! Loop dimensions and tensor roles of the convolution nest
//!
//! The convolution is modeled as a perfect five-deep loop nest. Each loop
//! iterates one [`Dimension`]; each of the three tensors (input, output,
//! weight) is addressed by a fixed subset of those dimensions, its
//! *dependency set*.
//!
//! ```text
//! Input  [B, I, H, W]   changes when batch, in-channel, height or width advance
//! Output [B, O, H, W]   changes when batch, out-channel, height or width advance
//! Weight [O, I]         changes when out-channel or in-channel advance
//! ```
//!
//! The dependency set drives both memory-operation placement
//! ([`crate::dataflow`]) and the access-count recurrence
//! ([`crate::objective`]).

use std::fmt;

// ============================================================================
// Dimension
// ============================================================================

/// One loop dimension of the convolution nest
///
/// The discriminant is only used as an array index / bit position. It does not
/// imply any nesting priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    InChan = 0,
    OutChan = 1,
    Height = 2,
    Width = 3,
    Batch = 4,
}

impl Dimension {
    /// All dimensions in declaration order
    pub const ALL: [Dimension; 5] = [
        Dimension::InChan,
        Dimension::OutChan,
        Dimension::Height,
        Dimension::Width,
        Dimension::Batch,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Dimension::InChan => "InChan",
            Dimension::OutChan => "OutChan",
            Dimension::Height => "Height",
            Dimension::Width => "Width",
            Dimension::Batch => "Batch",
        }
    }

    /// Single-letter label used in loop-order strings (`"BHWIO"`)
    pub fn label(self) -> char {
        match self {
            Dimension::InChan => 'I',
            Dimension::OutChan => 'O',
            Dimension::Height => 'H',
            Dimension::Width => 'W',
            Dimension::Batch => 'B',
        }
    }

}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// DimSet
// ============================================================================

/// Small bitset of dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DimSet(u8);

impl DimSet {
    pub const EMPTY: DimSet = DimSet(0);

    pub fn full() -> Self {
        Dimension::ALL.iter().copied().collect()
    }

    pub fn of(dims: &[Dimension]) -> Self {
        dims.iter().copied().collect()
    }

    pub fn insert(&mut self, dim: Dimension) {
        self.0 |= 1 << dim.index();
    }

    pub fn contains(self, dim: Dimension) -> bool {
        self.0 & (1 << dim.index()) != 0
    }

    /// True when every dimension of `self` is also in `other`
    pub fn is_subset(self, other: DimSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Dimension> {
        Dimension::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Dimension> for DimSet {
    fn from_iter<T: IntoIterator<Item = Dimension>>(iter: T) -> Self {
        let mut set = DimSet::EMPTY;
        for dim in iter {
            set.insert(dim);
        }
        set
    }
}

// ============================================================================
// Tensor roles
// ============================================================================

/// The three tensors of a convolution layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TensorRole {
    Input,
    Output,
    Weight,
}

impl TensorRole {
    pub const ALL: [TensorRole; 3] = [TensorRole::Input, TensorRole::Output, TensorRole::Weight];

    pub fn index(self) -> usize {
        match self {
            TensorRole::Input => 0,
            TensorRole::Output => 1,
            TensorRole::Weight => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TensorRole::Input => "Input",
            TensorRole::Output => "Output",
            TensorRole::Weight => "Weight",
        }
    }

    /// Dimensions whose iteration re-addresses this tensor
    pub fn dependencies(self) -> DimSet {
        use Dimension::*;
        match self {
            TensorRole::Input => DimSet::of(&[Batch, InChan, Height, Width]),
            TensorRole::Output => DimSet::of(&[Batch, OutChan, Height, Width]),
            TensorRole::Weight => DimSet::of(&[OutChan, InChan]),
        }
    }

    /// Whether the tensor is accumulated in place (partial sums), so every
    /// repeated visit costs a read and a write-back
    pub fn is_accumulated(self) -> bool {
        matches!(self, TensorRole::Output)
    }
}

impl fmt::Display for TensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything the access-count recurrence can be run for
///
/// Implemented by [`TensorRole`]; tests use it to probe the recurrence with
/// synthetic dependency sets.
pub trait AccessPattern {
    fn dependencies(&self) -> DimSet;
    fn is_accumulated(&self) -> bool;
}

impl AccessPattern for TensorRole {
    fn dependencies(&self) -> DimSet {
        TensorRole::dependencies(*self)
    }

    fn is_accumulated(&self) -> bool {
        TensorRole::is_accumulated(*self)
    }
}
