use burn::backend::ndarray::NdArrayDevice;
use tracing::debug;

/// Initializes the CPU device used for training and inference.
///
/// This function only exists to be able to change the device at a single location.
pub fn init_device() -> NdArrayDevice {
    debug!("Initializing NdArray device...");
    NdArrayDevice::default()
}
