//! Deoptimization
//!
//! A failed guard lands here. The baseline frame is rebuilt at the exit's
//! bytecode offset, the profile at that site is corrected so the next
//! compile does not repeat the speculation, and the tier controller is told
//! so it can discard the code and back off.

use tern_vm_jit::{BailoutReason, ExitId};
use tracing::debug;

use crate::context::{CompiledActivation, Frame, FrameEnv};
use crate::error::{VmError, VmResult};
use crate::osr;
use crate::safepoint::SafepointKind;
use crate::vm::Vm;

/// Leave optimized code through exit `id`
pub(crate) fn handle_exit(
    vm: &mut Vm,
    env: &FrameEnv,
    act: &CompiledActivation,
    id: ExitId,
    reason: BailoutReason,
) -> VmResult<Frame> {
    let site = act
        .code
        .exit(id)
        .ok_or_else(|| VmError::internal(format!("{}: unknown exit {id}", act.code.name)))?;
    let pc = site.bytecode_pc;

    if matches!(reason, BailoutReason::Overflow | BailoutReason::NegativeZero) {
        env.function.record(pc, |profile| profile.overflowed = true);
    }

    let frame = osr::osr_exit(vm, env, act, site)?;
    let outcome = vm.controller.record_deopt(env.key(), pc, reason);
    vm.safepoint(SafepointKind::TierTransition, &env.function, pc);
    debug!(
        function = env.function.display_name(),
        pc,
        reason = reason.name(),
        deopts = outcome.deopts,
        site_pessimized = outcome.site_pessimized,
        pinned = outcome.pinned,
        "deoptimized"
    );
    Ok(frame)
}
