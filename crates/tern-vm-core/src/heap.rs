//! Object arena
//!
//! Objects are addressed by [`ObjectId`] and never move while the engine
//! runs. A relocating collector would remap ids at a safepoint.

use crate::object::JsObject;
use crate::value::ObjectId;

/// Arena of all objects, plus the prototype epoch
///
/// The epoch counts layout changes of objects that serve as prototypes.
/// Inline cache entries that depend on the prototype chain record the epoch
/// they were created in and stop matching once it moves.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<JsObject>,
    proto_epoch: u64,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object
    pub fn alloc(&mut self, object: JsObject) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        if let Some(proto) = object.proto {
            self.mark_prototype(proto);
        }
        self.objects.push(object);
        id
    }

    /// Object by id
    ///
    /// Ids are only produced by [`Heap::alloc`] and objects are never
    /// freed, so every id is valid.
    #[inline]
    pub fn get(&self, id: ObjectId) -> &JsObject {
        &self.objects[id.0 as usize]
    }

    /// Mutable object by id
    #[inline]
    pub fn get_mut(&mut self, id: ObjectId) -> &mut JsObject {
        &mut self.objects[id.0 as usize]
    }

    /// Number of live objects
    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the heap is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Current prototype epoch
    #[inline]
    pub fn proto_epoch(&self) -> u64 {
        self.proto_epoch
    }

    /// Remember that `id` is somebody's prototype
    pub fn mark_prototype(&mut self, id: ObjectId) {
        self.get_mut(id).is_prototype = true;
    }

    /// Record a shape or prototype change of `id`
    pub fn note_layout_change(&mut self, id: ObjectId) {
        if self.get(id).is_prototype {
            self.proto_epoch += 1;
        }
    }
}
