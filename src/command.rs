/// Requests from the control context to the thread that owns the device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Resume pulling buffers from the device.
    Play,
    /// Pause the device.
    Stop,
    /// Drop the device stream and exit the thread.
    Close,
}

/// Notifications pushed by the audio callback. The callback cannot block, so
/// these travel over a lock-free ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stimulus reported completion; `frames` is its elapsed frame count.
    Completed { frames: u64 },
}
