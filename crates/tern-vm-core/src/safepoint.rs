//! Safepoints
//!
//! Execution stops at well-defined points (function entry, loop back-edges,
//! tier transitions) where the heap and every frame are consistent. An
//! embedder-provided [`SafepointHook`] runs there; a collector would do its
//! work at these points.

use crate::heap::Heap;
use crate::shape::ShapeTable;

/// Where execution stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafepointKind {
    /// Before the first instruction of an activation
    FunctionEntry,
    /// At a `LoopHint` in the baseline tier or a loop header in compiled code
    BackEdge,
    /// After optimized code exited to the baseline tier
    TierTransition,
}

/// View of the engine at a safepoint
#[derive(Debug)]
pub struct Safepoint<'a> {
    /// Where execution stopped
    pub kind: SafepointKind,
    /// Object heap
    pub heap: &'a Heap,
    /// Shape table
    pub shapes: &'a ShapeTable,
    /// Name of the running function
    pub function: &'a str,
    /// Bytecode offset
    pub pc: usize,
}

/// Callback run at every safepoint
pub trait SafepointHook: Send {
    /// Called with the engine stopped at `safepoint`
    fn at_safepoint(&mut self, safepoint: &Safepoint<'_>);
}

impl<F> SafepointHook for F
where
    F: FnMut(&Safepoint<'_>) + Send,
{
    fn at_safepoint(&mut self, safepoint: &Safepoint<'_>) {
        self(safepoint)
    }
}
