use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use tern_vm_jit::{CompiledCode, JitError, OptimizingCompiler};
use tracing::debug;

use crate::controller::FunctionKey;
use crate::jit_queue::CompileRequest;

pub(crate) struct CompileResult {
    pub(crate) key: FunctionKey,
    pub(crate) epoch: u64,
    pub(crate) outcome: Result<CompiledCode, JitError>,
}

/// Compile thread fed through a channel
pub(crate) struct BackgroundWorker {
    request_tx: Sender<CompileRequest>,
    result_rx: Receiver<CompileResult>,
}

impl BackgroundWorker {
    pub(crate) fn spawn(compiler: OptimizingCompiler) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<CompileRequest>();
        let (result_tx, result_rx) = mpsc::channel::<CompileResult>();

        thread::Builder::new()
            .name("tern-jit-bg".to_string())
            .spawn(move || run_background_worker(request_rx, result_tx, compiler))?;

        Ok(Self {
            request_tx,
            result_rx,
        })
    }

    /// Hand a request to the worker; `false` once the worker is gone
    pub(crate) fn submit(&self, request: CompileRequest) -> bool {
        self.request_tx.send(request).is_ok()
    }

    pub(crate) fn try_result(&self) -> Option<CompileResult> {
        match self.result_rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn wait_result(&self, timeout: Duration) -> Option<CompileResult> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

fn run_background_worker(
    request_rx: Receiver<CompileRequest>,
    result_tx: Sender<CompileResult>,
    compiler: OptimizingCompiler,
) {
    for request in request_rx {
        debug!(
            function = request.function.display_name(),
            epoch = request.epoch,
            "background compile"
        );
        let outcome = compiler.compile(
            &request.function,
            &request.module.constants,
            &request.feedback,
            &request.pessimized,
        );
        let result = CompileResult {
            key: request.key,
            epoch: request.epoch,
            outcome,
        };
        if result_tx.send(result).is_err() {
            break;
        }
    }
}
