//! On-stack replacement
//!
//! Moves an activation between tiers in the middle of a loop. Entry copies
//! the mapped baseline slots into the compiled frame. Exit copies them back
//! and rebuilds the slots the compiled code never materialized from the
//! exit site's recovery list.

use std::sync::Arc;

use tern_vm_jit::{CompiledCode, ExitSite, Recovery};

use crate::arguments;
use crate::context::{CompiledActivation, Frame, FrameEnv};
use crate::error::VmResult;
use crate::jit_runtime::const_value;
use crate::value::Value;
use crate::vm::Vm;

/// Enter `code` with the state of a baseline frame
pub(crate) fn osr_in(frame: &Frame, code: Arc<CompiledCode>) -> CompiledActivation {
    let mut activation = CompiledActivation::new(code);
    let code = activation.code.clone();
    for (baseline, compiled) in code.slot_map.iter().enumerate() {
        if let (Some(compiled), Some(value)) = (compiled, frame.slots.get(baseline)) {
            activation.put(*compiled, value.clone());
        }
    }
    activation
}

/// Rebuild the baseline frame described by `site`
pub(crate) fn osr_exit(vm: &mut Vm, env: &FrameEnv, act: &CompiledActivation, site: &ExitSite) -> VmResult<Frame> {
    let size = env.function.frame_size().max(act.code.baseline_slots);
    let mut slots: Vec<Value> = (0..size)
        .map(|baseline| match act.code.compiled_slot(baseline) {
            Some(compiled) => act.get(compiled).clone(),
            None => Value::Undefined,
        })
        .collect();

    for (baseline, recovery) in &site.recoveries {
        let value = match recovery {
            Recovery::Constant(constant) => const_value(env, *constant)?,
            Recovery::ArgumentsObject => Value::Object(arguments::create(vm, env)),
        };
        if let Some(slot) = slots.get_mut(*baseline as usize) {
            *slot = value;
        }
    }
    slots.truncate(env.function.frame_size());
    Ok(Frame::from_slots(slots, site.bytecode_pc))
}
