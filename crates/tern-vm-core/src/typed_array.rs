//! ArrayBuffer and typed array views
//!
//! A view over a resizable buffer without an explicit length tracks the
//! buffer length. Views whose range no longer fits the buffer behave as
//! out of bounds: length 0, every element missing.

use crate::error::{VmError, VmResult};
use crate::heap::Heap;
use crate::object::{ArrayBufferData, ObjectKind, TypedArrayData, TypedArrayKind};
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Largest buffer the engine allocates
pub const MAX_BYTE_LENGTH: usize = 1 << 30;

/// Allocate an ArrayBuffer; `max_byte_length` makes it resizable
pub fn create_buffer(vm: &mut Vm, byte_length: usize, max_byte_length: Option<usize>) -> VmResult<ObjectId> {
    if byte_length > MAX_BYTE_LENGTH || max_byte_length.is_some_and(|max| max > MAX_BYTE_LENGTH) {
        return Err(VmError::range_error("Out of memory"));
    }
    if max_byte_length.is_some_and(|max| max < byte_length) {
        return Err(VmError::range_error("ArrayBuffer length exceeds maxByteLength"));
    }
    let data = ArrayBufferData {
        bytes: vec![0; byte_length],
        max_byte_length,
        detached: false,
    };
    let proto = vm.current_intrinsics().array_buffer_prototype;
    Ok(vm.alloc(ObjectKind::ArrayBuffer(data), Some(proto)))
}

fn buffer_mut(heap: &mut Heap, id: ObjectId) -> VmResult<&mut ArrayBufferData> {
    match &mut heap.get_mut(id).kind {
        ObjectKind::ArrayBuffer(data) => Ok(data),
        _ => Err(VmError::type_error("Receiver should be an ArrayBuffer")),
    }
}

fn buffer(heap: &Heap, id: ObjectId) -> Option<&ArrayBufferData> {
    match &heap.get(id).kind {
        ObjectKind::ArrayBuffer(data) => Some(data),
        _ => None,
    }
}

/// `ArrayBuffer.prototype.resize`
pub fn resize_buffer(vm: &mut Vm, id: ObjectId, new_length: usize) -> VmResult<()> {
    let data = buffer_mut(&mut vm.heap, id)?;
    let Some(max) = data.max_byte_length else {
        return Err(VmError::type_error("ArrayBuffer is not resizable"));
    };
    if data.detached {
        return Err(VmError::type_error("Receiver is detached"));
    }
    if new_length > max {
        return Err(VmError::range_error("new length is larger than maxByteLength"));
    }
    data.bytes.resize(new_length, 0);
    Ok(())
}

/// Byte length of a buffer
pub fn byte_length(heap: &Heap, id: ObjectId) -> VmResult<usize> {
    buffer(heap, id)
        .map(|data| data.bytes.len())
        .ok_or_else(|| VmError::type_error("Receiver should be an ArrayBuffer"))
}

/// Create a view over `buffer`
///
/// `length: None` on a resizable buffer makes a length-tracking view; on a
/// fixed buffer it covers the rest of the buffer.
pub fn create_view(
    vm: &mut Vm,
    kind: TypedArrayKind,
    buffer_id: ObjectId,
    byte_offset: usize,
    length: Option<usize>,
) -> VmResult<ObjectId> {
    let element_size = kind.element_size();
    let Some(data) = buffer(&vm.heap, buffer_id) else {
        return Err(VmError::type_error("Second argument should be an ArrayBuffer"));
    };
    if byte_offset % element_size != 0 {
        return Err(VmError::range_error(format!(
            "Start offset of {} should be a multiple of {element_size}",
            kind.name()
        )));
    }
    let buffer_len = data.bytes.len();
    if byte_offset > buffer_len {
        return Err(VmError::range_error("Start offset is outside the bounds of the buffer"));
    }
    let length = match length {
        Some(length) => {
            let end = length
                .checked_mul(element_size)
                .and_then(|bytes| bytes.checked_add(byte_offset));
            if end.is_none_or(|end| end > buffer_len) {
                return Err(VmError::range_error("Length out of range of buffer"));
            }
            Some(length)
        }
        None if data.is_resizable() => None,
        None => {
            let rest = buffer_len - byte_offset;
            if rest % element_size != 0 {
                return Err(VmError::range_error(format!(
                    "ArrayBuffer length minus the byteOffset is not a multiple of the element size {element_size}"
                )));
            }
            Some(rest / element_size)
        }
    };
    let view = TypedArrayData {
        kind,
        buffer: buffer_id,
        byte_offset,
        length,
    };
    let proto = vm.current_intrinsics().typed_array_prototypes[kind.table_index()];
    Ok(vm.alloc(ObjectKind::TypedArray(view), Some(proto)))
}

/// Current element count; `None` when the view is out of bounds
pub fn view_length(heap: &Heap, view: &TypedArrayData) -> Option<usize> {
    let data = buffer(heap, view.buffer)?;
    if data.detached {
        return None;
    }
    let available = data.bytes.len().checked_sub(view.byte_offset)?;
    match view.length {
        Some(length) => (length * view.kind.element_size() <= available).then_some(length),
        None => Some(available / view.kind.element_size()),
    }
}

/// Whether the optimizing tier may read this view without a length check
/// against the buffer
pub fn has_fixed_layout(heap: &Heap, view: &TypedArrayData) -> bool {
    view.length.is_some() && buffer(heap, view.buffer).is_some_and(|data| !data.is_resizable() && !data.detached)
}

/// Element `index`, or `None` when out of bounds
pub fn get_element(heap: &Heap, view: &TypedArrayData, index: usize) -> Option<Value> {
    if index >= view_length(heap, view)? {
        return None;
    }
    let data = buffer(heap, view.buffer)?;
    let size = view.kind.element_size();
    let start = view.byte_offset + index * size;
    let bytes = data.bytes.get(start..start + size)?;
    Some(decode(view.kind, bytes))
}

/// Store element `index`; out-of-bounds stores are dropped
pub fn set_element(heap: &mut Heap, view: &TypedArrayData, index: usize, value: f64) -> bool {
    if view_length(heap, view).is_none_or(|len| index >= len) {
        return false;
    }
    let size = view.kind.element_size();
    let start = view.byte_offset + index * size;
    let Ok(data) = buffer_mut(heap, view.buffer) else {
        return false;
    };
    let Some(bytes) = data.bytes.get_mut(start..start + size) else {
        return false;
    };
    encode(view.kind, value, bytes);
    true
}

fn decode(kind: TypedArrayKind, bytes: &[u8]) -> Value {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    match kind {
        TypedArrayKind::Int8 => Value::Int32(raw[0] as i8 as i32),
        TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => Value::Int32(raw[0] as i32),
        TypedArrayKind::Int16 => Value::Int32(i16::from_le_bytes([raw[0], raw[1]]) as i32),
        TypedArrayKind::Uint16 => Value::Int32(u16::from_le_bytes([raw[0], raw[1]]) as i32),
        TypedArrayKind::Int32 => Value::Int32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        TypedArrayKind::Uint32 => Value::number(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64),
        TypedArrayKind::Float32 => Value::number(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64),
        TypedArrayKind::Float64 => Value::number(f64::from_le_bytes(raw)),
    }
}

fn encode(kind: TypedArrayKind, value: f64, out: &mut [u8]) {
    let int = crate::convert::to_int32(value);
    match kind {
        TypedArrayKind::Int8 | TypedArrayKind::Uint8 => out[0] = int as u8,
        TypedArrayKind::Uint8Clamped => {
            out[0] = if value.is_nan() {
                0
            } else {
                value.clamp(0.0, 255.0).round_ties_even() as u8
            }
        }
        TypedArrayKind::Int16 | TypedArrayKind::Uint16 => out.copy_from_slice(&(int as u16).to_le_bytes()),
        TypedArrayKind::Int32 | TypedArrayKind::Uint32 => out.copy_from_slice(&(int as u32).to_le_bytes()),
        TypedArrayKind::Float32 => out.copy_from_slice(&(value as f32).to_le_bytes()),
        TypedArrayKind::Float64 => out.copy_from_slice(&value.to_le_bytes()),
    }
}
