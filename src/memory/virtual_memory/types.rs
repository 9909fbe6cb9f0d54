/*!
 * Virtual Memory Types
 * Error type for region bookkeeping violations
 */

use super::super::tag::MemTag;
use crate::core::types::{Address, Size};
use miette::Diagnostic;
use thiserror::Error;

/// Virtual memory operation result
pub type VirtualMemoryResult<T> = Result<T, VirtualMemoryError>;

/// Region bookkeeping violations
///
/// Every variant means the caller's view of the address space disagrees
/// with the tracker's. `MemTracker` treats them as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum VirtualMemoryError {
    #[error(
        "Reservation [0x{base:x}, +{size}) overlaps existing region at 0x{existing_base:x} (+{existing_size}, {existing_tag})"
    )]
    #[diagnostic(
        code(vm::overlapping_region),
        help("Only thread stacks may be re-reserved over, and only the Java heap or shared class space may nest reservations.")
    )]
    OverlappingRegion {
        base: Address,
        size: Size,
        existing_base: Address,
        existing_size: Size,
        existing_tag: MemTag,
    },

    #[error("No reserved region covers [0x{addr:x}, +{size})")]
    #[diagnostic(
        code(vm::region_not_found),
        help("The range must lie inside a single reserved region.")
    )]
    RegionNotFound { addr: Address, size: Size },

    #[error("Commit [0x{addr:x}, +{size}) extends past reserved region at 0x{region_base:x} (+{region_size})")]
    #[diagnostic(code(vm::commit_outside_reservation))]
    CommitOutsideReservation {
        addr: Address,
        size: Size,
        region_base: Address,
        region_size: Size,
    },

    #[error("Cannot split region at 0x{base:x}: {committed} bytes still committed")]
    #[diagnostic(
        code(vm::split_with_committed),
        help("Uncommit the region before splitting it.")
    )]
    SplitWithCommittedMemory { base: Address, committed: Size },

    #[error("Split offset {offset} is outside region at 0x{base:x} (+{size})")]
    #[diagnostic(code(vm::invalid_split_offset))]
    InvalidSplitOffset {
        base: Address,
        size: Size,
        offset: Size,
    },

    #[error("Region at 0x{base:x} is already tagged {existing}, cannot retag as {requested}")]
    #[diagnostic(
        code(vm::tag_conflict),
        help("A region's tag can only be set once, from None.")
    )]
    TagConflict {
        base: Address,
        existing: MemTag,
        requested: MemTag,
    },

    #[error("Range [0x{addr:x}, +{size}) runs past the end of the address space")]
    #[diagnostic(code(vm::address_overflow))]
    AddressOverflow { addr: Address, size: Size },
}
