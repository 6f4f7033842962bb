pub mod calibration;
pub mod enumerator;
pub mod fixtures;
pub mod offsets;
pub mod retarget;

pub use calibration::{Calibrator, OffsetMismatch};
pub use enumerator::{visitor, Enumerator, FnVisitor, MemberVisitor, MetadataArray, ScratchPool, Visit};
pub use offsets::ArtOffsets;
pub use retarget::Retargeter;
