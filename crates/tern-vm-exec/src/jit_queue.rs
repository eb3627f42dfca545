use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tern_vm_bytecode::{FeedbackSnapshot, Function, Module};

use crate::controller::FunctionKey;

/// Everything the compiler needs, captured on the executing thread
#[derive(Debug, Clone)]
pub(crate) struct CompileRequest {
    pub(crate) key: FunctionKey,
    pub(crate) module: Arc<Module>,
    pub(crate) function: Arc<Function>,
    pub(crate) feedback: FeedbackSnapshot,
    pub(crate) pessimized: FxHashSet<u32>,
    /// Profile epoch of the record when the request was made
    pub(crate) epoch: u64,
}

/// FIFO of compile requests, at most one per function
#[derive(Debug, Default)]
pub(crate) struct CompileQueue {
    pending: VecDeque<CompileRequest>,
    enqueued: FxHashSet<FunctionKey>,
}

impl CompileQueue {
    /// Enqueue unless a request for the same function is queued or running
    pub(crate) fn push(&mut self, request: CompileRequest) -> bool {
        if !self.enqueued.insert(request.key) {
            return false;
        }
        self.pending.push_back(request);
        true
    }

    pub(crate) fn pop(&mut self) -> Option<CompileRequest> {
        self.pending.pop_front()
    }

    /// Release the dedup reservation once the result is handled
    pub(crate) fn finish(&mut self, key: FunctionKey) {
        self.enqueued.remove(&key);
    }

    pub(crate) fn is_reserved(&self, key: FunctionKey) -> bool {
        self.enqueued.contains(&key)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
