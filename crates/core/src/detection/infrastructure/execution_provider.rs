use crate::shared::config::ExecutionDelegate;

/// Execution providers for the requested delegate.
///
/// `Cpu` returns no providers so ONNX Runtime uses its default CPU backend.
/// `Gpu` picks the platform accelerator; ONNX Runtime falls back to CPU
/// if it cannot be registered.
pub fn execution_providers(
    delegate: ExecutionDelegate,
) -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    match delegate {
        ExecutionDelegate::Cpu => vec![],
        ExecutionDelegate::Gpu => platform_accelerators(),
    }
}

fn platform_accelerators() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        log::info!("No GPU execution provider compiled in for this platform, using CPU");
        vec![]
    }
}
