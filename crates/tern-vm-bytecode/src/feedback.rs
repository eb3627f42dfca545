//! Per-instruction profiling storage
//!
//! Every [`Function`](crate::Function) owns a [`FeedbackVector`] with one
//! [`ProfiledSite`] per instruction. The baseline tier is the only writer;
//! the optimizing compiler works on a [`FeedbackSnapshot`] taken under the
//! read lock, so a background compile never observes a half-updated site.

use bitflags::bitflags;
use smallvec::SmallVec;

/// Maximum number of distinct shapes remembered per site
pub const MAX_OBSERVED_SHAPES: usize = 8;

bitflags! {
    /// Set of value kinds observed at a site
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValueKinds: u16 {
        /// `undefined`
        const UNDEFINED = 1 << 0;
        /// `null`
        const NULL = 1 << 1;
        /// Boolean
        const BOOLEAN = 1 << 2;
        /// Number representable as int32
        const INT32 = 1 << 3;
        /// Any other number
        const DOUBLE = 1 << 4;
        /// String
        const STRING = 1 << 5;
        /// Symbol or private name
        const SYMBOL = 1 << 6;
        /// BigInt
        const BIGINT = 1 << 7;
        /// Object reference
        const OBJECT = 1 << 8;
        /// Uninitialized binding sentinel
        const EMPTY = 1 << 9;

        /// Int32 or double
        const NUMBER = Self::INT32.bits() | Self::DOUBLE.bits();
    }
}

impl ValueKinds {
    /// True when something was observed and all of it is within `kinds`
    #[inline]
    pub fn only(self, kinds: ValueKinds) -> bool {
        !self.is_empty() && kinds.contains(self)
    }

    /// True when exactly one kind was observed
    #[inline]
    pub fn is_monomorphic(self) -> bool {
        self.bits().count_ones() == 1
    }
}

/// Receiver category observed at a keyed element access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Typed array over a fixed-length buffer with a fixed-length view
    TypedArray,
    /// Typed array over a resizable buffer, or a length-tracking view
    ResizableTypedArray,
    /// Arguments object
    Arguments,
    /// Dense array
    Array,
    /// Anything else
    Other,
}

/// Fast-path action cached for one shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcAction {
    /// Load or store data slot of the receiver itself
    OwnData {
        /// Slot index
        slot: u32,
    },
    /// Load data slot of an object on the prototype chain
    ProtoData {
        /// Holder object id
        holder: u32,
        /// Slot index
        slot: u32,
    },
    /// Call the getter stored in an accessor slot
    Getter {
        /// Holder object id, `None` for the receiver itself
        holder: Option<u32>,
        /// Slot index
        slot: u32,
    },
    /// Call the setter stored in an accessor slot
    Setter {
        /// Holder object id, `None` for the receiver itself
        holder: Option<u32>,
        /// Slot index
        slot: u32,
    },
    /// Property absent from the whole chain
    Absent,
    /// Overwrite an existing writable own data slot
    ReplaceData {
        /// Slot index
        slot: u32,
    },
    /// Add a new data property through a known transition
    AddData {
        /// Shape after the transition
        new_shape: u32,
        /// Slot index of the added property
        slot: u32,
    },
    /// `length` of a dense array
    ArrayLength,
}

/// One cached (shape, action) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcEntry {
    /// Receiver shape id the entry is guarded on
    pub shape: u32,
    /// Global object id the entry is valid for (global accesses only)
    pub global: Option<u32>,
    /// Prototype epoch the entry depends on, if it depends on the chain
    pub proto_epoch: Option<u64>,
    /// Fast path
    pub action: IcAction,
}

impl IcEntry {
    /// Whether this entry applies to a receiver with `shape`
    #[inline]
    pub fn matches(&self, shape: u32, global: Option<u32>, proto_epoch: u64) -> bool {
        self.shape == shape
            && (self.global.is_none() || self.global == global)
            && self.proto_epoch.is_none_or(|epoch| epoch == proto_epoch)
    }
}

/// State of an inline cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InlineCacheState {
    /// Never executed
    #[default]
    Uninitialized,
    /// One shape seen
    Monomorphic(IcEntry),
    /// Several shapes seen, bounded by the polymorphic cap
    Polymorphic(SmallVec<[IcEntry; 4]>),
    /// Too many shapes; the site no longer grows
    Megamorphic,
}

/// Result of recording a new entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcRecordOutcome {
    /// Entry appended
    Added,
    /// Stale entry for the same shape replaced
    Replaced,
    /// The cap was reached and the site went megamorphic
    BecameMegamorphic,
    /// Site was already megamorphic; nothing recorded
    Megamorphic,
}

impl InlineCacheState {
    /// Find a matching entry
    pub fn lookup(&self, shape: u32, global: Option<u32>, proto_epoch: u64) -> Option<IcEntry> {
        match self {
            Self::Monomorphic(entry) => entry.matches(shape, global, proto_epoch).then_some(*entry),
            Self::Polymorphic(entries) => entries
                .iter()
                .find(|e| e.matches(shape, global, proto_epoch))
                .copied(),
            Self::Uninitialized | Self::Megamorphic => None,
        }
    }

    /// Record an entry, growing the cache up to `cap` entries
    pub fn record(&mut self, entry: IcEntry, cap: usize) -> IcRecordOutcome {
        match self {
            Self::Uninitialized => {
                *self = Self::Monomorphic(entry);
                IcRecordOutcome::Added
            }
            Self::Monomorphic(existing) => {
                if existing.shape == entry.shape && existing.global == entry.global {
                    *existing = entry;
                    return IcRecordOutcome::Replaced;
                }
                if cap < 2 {
                    *self = Self::Megamorphic;
                    return IcRecordOutcome::BecameMegamorphic;
                }
                let mut entries = SmallVec::new();
                entries.push(*existing);
                entries.push(entry);
                *self = Self::Polymorphic(entries);
                IcRecordOutcome::Added
            }
            Self::Polymorphic(entries) => {
                if let Some(existing) = entries
                    .iter_mut()
                    .find(|e| e.shape == entry.shape && e.global == entry.global)
                {
                    *existing = entry;
                    return IcRecordOutcome::Replaced;
                }
                if entries.len() >= cap {
                    *self = Self::Megamorphic;
                    return IcRecordOutcome::BecameMegamorphic;
                }
                entries.push(entry);
                IcRecordOutcome::Added
            }
            Self::Megamorphic => IcRecordOutcome::Megamorphic,
        }
    }

    /// Cached entries, in site order
    pub fn entries(&self) -> &[IcEntry] {
        match self {
            Self::Monomorphic(entry) => std::slice::from_ref(entry),
            Self::Polymorphic(entries) => entries,
            Self::Uninitialized | Self::Megamorphic => &[],
        }
    }

    /// Whether the site gave up caching
    #[inline]
    pub fn is_megamorphic(&self) -> bool {
        matches!(self, Self::Megamorphic)
    }
}

/// Profiling data for one instruction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfiledSite {
    /// Times the baseline tier executed the instruction
    pub execution_count: u32,
    /// Kinds of the primary operands (or the receiver)
    pub observed: ValueKinds,
    /// Kinds of the key operand for keyed accesses
    pub secondary: ValueKinds,
    /// Kinds of produced values
    pub result: ValueKinds,
    /// Receiver shapes seen, in first-seen order
    pub observed_shapes: SmallVec<[u32; 4]>,
    /// More shapes than [`MAX_OBSERVED_SHAPES`] were seen
    pub shapes_overflowed: bool,
    /// Conditional jump taken
    pub branch_taken: u32,
    /// Conditional jump fell through
    pub branch_not_taken: u32,
    /// Int32 operands produced a non-int32 result
    pub overflowed: bool,
    /// Element receiver kind, when only one was seen
    pub element_kind: Option<ElementKind>,
    /// More than one element receiver kind was seen
    pub element_mixed: bool,
    /// An element access was out of bounds
    pub out_of_bounds: bool,
    /// Private name a keyed access caches for
    pub private_name: Option<u64>,
    /// A keyed access saw more than one private name
    pub private_mixed: bool,
    /// Inline cache for named accesses
    pub ic: InlineCacheState,
}

impl ProfiledSite {
    /// Remember a receiver shape
    pub fn observe_shape(&mut self, shape: u32) {
        if self.observed_shapes.contains(&shape) {
            return;
        }
        if self.observed_shapes.len() >= MAX_OBSERVED_SHAPES {
            self.shapes_overflowed = true;
            return;
        }
        self.observed_shapes.push(shape);
    }

    /// Remember a conditional jump outcome
    #[inline]
    pub fn record_branch(&mut self, taken: bool) {
        if taken {
            self.branch_taken = self.branch_taken.saturating_add(1);
        } else {
            self.branch_not_taken = self.branch_not_taken.saturating_add(1);
        }
    }

    /// Tie the inline cache of a keyed access to private name `name`
    ///
    /// Cache entries do not record their key, so a site that sees a second
    /// private name drops its entries and stays uncached.
    pub fn bind_private_name(&mut self, name: u64) -> bool {
        if self.private_mixed {
            return false;
        }
        match self.private_name {
            None => {
                self.private_name = Some(name);
                true
            }
            Some(seen) if seen == name => true,
            Some(_) => {
                self.private_name = None;
                self.private_mixed = true;
                self.ic = InlineCacheState::Uninitialized;
                false
            }
        }
    }

    /// Remember the receiver kind of a keyed access
    pub fn record_element(&mut self, kind: ElementKind, in_bounds: bool) {
        match self.element_kind {
            None if !self.element_mixed => self.element_kind = Some(kind),
            Some(seen) if seen != kind => {
                self.element_kind = None;
                self.element_mixed = true;
            }
            _ => {}
        }
        if !in_bounds {
            self.out_of_bounds = true;
        }
    }
}

/// All sites of one function
#[derive(Debug, Clone, Default)]
pub struct FeedbackVector {
    sites: Vec<ProfiledSite>,
}

impl FeedbackVector {
    /// Create a vector with `len` empty sites
    pub fn new(len: usize) -> Self {
        Self {
            sites: vec![ProfiledSite::default(); len],
        }
    }

    /// Site at `pc`, if it exists
    #[inline]
    pub fn site(&self, pc: usize) -> Option<&ProfiledSite> {
        self.sites.get(pc)
    }

    /// Mutable site at `pc`, growing the vector if needed
    pub fn site_mut(&mut self, pc: usize) -> &mut ProfiledSite {
        if pc >= self.sites.len() {
            self.sites.resize_with(pc + 1, ProfiledSite::default);
        }
        &mut self.sites[pc]
    }

    /// Number of sites
    #[inline]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the vector has no sites
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Consistent copy for the compiler
    pub fn snapshot(&self) -> FeedbackSnapshot {
        FeedbackSnapshot {
            sites: self.sites.clone(),
        }
    }
}

/// Read-only copy of a feedback vector
#[derive(Debug, Clone, Default)]
pub struct FeedbackSnapshot {
    sites: Vec<ProfiledSite>,
}

impl FeedbackSnapshot {
    /// Site at `pc`; missing sites read as never executed
    pub fn site(&self, pc: usize) -> &ProfiledSite {
        static EMPTY: std::sync::OnceLock<ProfiledSite> = std::sync::OnceLock::new();
        self.sites
            .get(pc)
            .unwrap_or_else(|| EMPTY.get_or_init(ProfiledSite::default))
    }

    /// Whether the instruction at `pc` ever executed
    #[inline]
    pub fn executed(&self, pc: usize) -> bool {
        self.site(pc).execution_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(shape: u32) -> IcEntry {
        IcEntry {
            shape,
            global: None,
            proto_epoch: None,
            action: IcAction::OwnData { slot: 0 },
        }
    }

    #[test]
    fn test_ic_grows_to_cap_then_megamorphic() {
        let mut ic = InlineCacheState::default();
        assert_eq!(ic.record(entry(1), 4), IcRecordOutcome::Added);
        assert!(matches!(ic, InlineCacheState::Monomorphic(_)));
        for shape in 2..=4 {
            assert_eq!(ic.record(entry(shape), 4), IcRecordOutcome::Added);
        }
        assert_eq!(ic.entries().len(), 4);
        assert_eq!(ic.record(entry(5), 4), IcRecordOutcome::BecameMegamorphic);
        assert!(ic.is_megamorphic());
        assert_eq!(ic.record(entry(6), 4), IcRecordOutcome::Megamorphic);
        assert!(ic.lookup(1, None, 0).is_none());
    }

    #[test]
    fn test_second_private_name_drops_the_cache() {
        let mut site = ProfiledSite::default();
        assert!(site.bind_private_name(7));
        site.ic.record(entry(1), 4);
        assert!(site.bind_private_name(7));
        assert!(!site.bind_private_name(8));
        assert!(site.ic.entries().is_empty());
        assert!(!site.bind_private_name(7));
    }

    #[test]
    fn test_ic_epoch_invalidates_chain_entries() {
        let mut ic = InlineCacheState::default();
        ic.record(
            IcEntry {
                shape: 7,
                global: None,
                proto_epoch: Some(3),
                action: IcAction::Absent,
            },
            4,
        );
        assert!(ic.lookup(7, None, 3).is_some());
        assert!(ic.lookup(7, None, 4).is_none());
    }

    #[test]
    fn test_ic_global_identity() {
        let mut ic = InlineCacheState::default();
        ic.record(
            IcEntry {
                shape: 1,
                global: Some(10),
                proto_epoch: None,
                action: IcAction::OwnData { slot: 2 },
            },
            4,
        );
        assert!(ic.lookup(1, Some(10), 0).is_some());
        assert!(ic.lookup(1, Some(11), 0).is_none());
    }

    #[test]
    fn test_replacing_same_shape_keeps_size() {
        let mut ic = InlineCacheState::default();
        ic.record(entry(1), 4);
        ic.record(entry(2), 4);
        assert_eq!(ic.record(entry(1), 4), IcRecordOutcome::Replaced);
        assert_eq!(ic.entries().len(), 2);
    }

    #[test]
    fn test_value_kinds_only() {
        let kinds = ValueKinds::INT32;
        assert!(kinds.only(ValueKinds::NUMBER));
        assert!(!(kinds | ValueKinds::STRING).only(ValueKinds::NUMBER));
        assert!(!ValueKinds::empty().only(ValueKinds::NUMBER));
    }

    #[test]
    fn test_element_kind_mixing() {
        let mut site = ProfiledSite::default();
        site.record_element(ElementKind::TypedArray, true);
        assert_eq!(site.element_kind, Some(ElementKind::TypedArray));
        site.record_element(ElementKind::Array, true);
        assert_eq!(site.element_kind, None);
        assert!(site.element_mixed);
        site.record_element(ElementKind::TypedArray, false);
        assert_eq!(site.element_kind, None);
        assert!(site.out_of_bounds);
    }

    #[test]
    fn test_snapshot_missing_site_is_unexecuted() {
        let vector = FeedbackVector::new(2);
        let snapshot = vector.snapshot();
        assert!(!snapshot.executed(10));
    }
}
