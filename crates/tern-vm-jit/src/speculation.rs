//! Per-site speculation decisions.
//!
//! Each function here looks at one [`ProfiledSite`] and picks the fast path
//! the translator should emit. A pessimized site (one whose guard failed too
//! often) always gets the generic lowering.

use smallvec::SmallVec;
use tern_vm_bytecode::feedback::{ElementKind, IcAction, ProfiledSite, ValueKinds};

/// Speculation for arithmetic and bitwise sites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithSpeculation {
    /// Both inputs int32, result stays int32
    Int32,
    /// Both inputs numbers
    Number,
    /// No speculation
    Generic,
}

/// Which fast paths an operation supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithSupport {
    /// Has an int32 lowering
    pub int32: bool,
    /// Has a number lowering
    pub number: bool,
}

/// Pick the arithmetic speculation for a site
pub fn arithmetic(site: &ProfiledSite, pessimized: bool, support: ArithSupport) -> ArithSpeculation {
    if pessimized || site.execution_count == 0 {
        return ArithSpeculation::Generic;
    }
    if support.int32 && site.observed.only(ValueKinds::INT32) && !site.overflowed {
        return ArithSpeculation::Int32;
    }
    if support.number && site.observed.only(ValueKinds::NUMBER) {
        return ArithSpeculation::Number;
    }
    ArithSpeculation::Generic
}

/// Pick the comparison speculation for a site
pub fn comparison(site: &ProfiledSite, pessimized: bool) -> ArithSpeculation {
    arithmetic(
        site,
        pessimized,
        ArithSupport {
            int32: true,
            number: true,
        },
    )
}

/// Observed direction of a conditional jump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSpeculation {
    /// Only the jump was seen
    AlwaysTaken,
    /// Only the fall-through was seen
    NeverTaken,
    /// Both directions, nothing, or pessimized
    Unbiased,
}

/// Pick the branch speculation for a conditional jump
pub fn branch(site: &ProfiledSite, pessimized: bool) -> BranchSpeculation {
    if pessimized {
        return BranchSpeculation::Unbiased;
    }
    match (site.branch_taken, site.branch_not_taken) {
        (0, 0) => BranchSpeculation::Unbiased,
        (_, 0) => BranchSpeculation::AlwaysTaken,
        (0, _) => BranchSpeculation::NeverTaken,
        _ => BranchSpeculation::Unbiased,
    }
}

/// Speculation for a named property load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSpeculation {
    /// One own-data shape
    Monomorphic {
        /// Shape id
        shape: u32,
        /// Data slot
        slot: u32,
    },
    /// Several own-data shapes
    Polymorphic(SmallVec<[(u32, u32); 4]>),
    /// No speculation
    Generic,
}

/// Pick the load speculation from a site's inline cache
///
/// Only own data entries qualify: they depend on the receiver shape alone,
/// which compiled code can guard without consulting the prototype epoch.
pub fn property_load(site: &ProfiledSite, pessimized: bool) -> LoadSpeculation {
    if pessimized || site.execution_count == 0 || site.ic.is_megamorphic() {
        return LoadSpeculation::Generic;
    }
    let mut cases: SmallVec<[(u32, u32); 4]> = SmallVec::new();
    for entry in site.ic.entries() {
        match entry.action {
            IcAction::OwnData { slot } if entry.global.is_none() && entry.proto_epoch.is_none() => {
                cases.push((entry.shape, slot))
            }
            _ => return LoadSpeculation::Generic,
        }
    }
    match cases.len() {
        0 => LoadSpeculation::Generic,
        1 => LoadSpeculation::Monomorphic {
            shape: cases[0].0,
            slot: cases[0].1,
        },
        _ => LoadSpeculation::Polymorphic(cases),
    }
}

/// Speculation for a named property store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSpeculation {
    /// Overwrite an own writable data slot of one shape
    Replace {
        /// Shape id
        shape: u32,
        /// Data slot
        slot: u32,
    },
    /// No speculation
    Generic,
}

/// Pick the store speculation from a site's inline cache
pub fn property_store(site: &ProfiledSite, pessimized: bool) -> StoreSpeculation {
    if pessimized || site.execution_count == 0 {
        return StoreSpeculation::Generic;
    }
    match site.ic.entries() {
        [entry] if entry.global.is_none() => match entry.action {
            IcAction::ReplaceData { slot } => StoreSpeculation::Replace {
                shape: entry.shape,
                slot,
            },
            _ => StoreSpeculation::Generic,
        },
        _ => StoreSpeculation::Generic,
    }
}

/// Speculation for a keyed element load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSpeculation {
    /// In-bounds loads from fixed-length typed arrays
    TypedArray,
    /// No speculation
    Generic,
}

/// Pick the element load speculation for a site
pub fn element_load(site: &ProfiledSite, pessimized: bool) -> ElementSpeculation {
    if pessimized || site.execution_count == 0 || site.out_of_bounds || site.element_mixed {
        return ElementSpeculation::Generic;
    }
    match site.element_kind {
        Some(ElementKind::TypedArray) if site.secondary.only(ValueKinds::INT32) => {
            ElementSpeculation::TypedArray
        }
        _ => ElementSpeculation::Generic,
    }
}
