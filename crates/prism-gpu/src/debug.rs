//! Driver diagnostic messages routed into `tracing`.

use crate::error::Result;
use ash::vk;
use std::ffi::{c_void, CStr};
use std::sync::atomic::{AtomicU64, Ordering};

/// Context-scoped state the driver callback writes into.
#[derive(Debug, Default)]
pub struct DebugSink {
    label: String,
    errors: AtomicU64,
    warnings: AtomicU64,
}

impl DebugSink {
    fn record(&self, severity: vk::DebugUtilsMessageSeverityFlagsEXT, message: &str) {
        let label = &self.label;
        if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(target: "prism_gpu::validation", "[{label}] {message}");
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            self.warnings.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(target: "prism_gpu::validation", "[{label}] {message}");
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            tracing::debug!(target: "prism_gpu::validation", "[{label}] {message}");
        } else {
            tracing::trace!(target: "prism_gpu::validation", "[{label}] {message}");
        }
    }

    /// Number of error-severity messages received so far.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Number of warning-severity messages received so far.
    pub fn warning_count(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }
}

/// Debug-utils messenger registered for the lifetime of one instance.
///
/// The callback receives a pointer to this messenger's [`DebugSink`] as its
/// user data, so diagnostics are attributed to the owning context rather
/// than to global state. Dropping the messenger unregisters the callback;
/// it must be dropped before the instance is destroyed.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // Boxed so the address handed to the driver stays stable
    sink: Box<DebugSink>,
}

impl DebugMessenger {
    /// Register a messenger on `instance`.
    ///
    /// # Safety
    /// The instance must be valid and created with `VK_EXT_debug_utils` enabled.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        label: impl Into<String>,
    ) -> Result<Self> {
        let sink = Box::new(DebugSink {
            label: label.into(),
            ..Default::default()
        });

        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(std::ptr::from_ref(sink.as_ref()).cast_mut().cast());

        let messenger = loader.create_debug_utils_messenger(&create_info, None)?;

        Ok(Self {
            loader,
            messenger,
            sink,
        })
    }

    /// The sink receiving this messenger's diagnostics.
    pub fn sink(&self) -> &DebugSink {
        &self.sink
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }

    let data = &*callback_data;
    let message = if data.p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };

    let sink = &*user_data.cast::<DebugSink>();
    sink.record(severity, &message);

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_counts_by_severity() {
        let sink = DebugSink {
            label: "test".to_string(),
            ..Default::default()
        };
        sink.record(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR, "bad");
        sink.record(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING, "meh");
        sink.record(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING, "meh");
        sink.record(vk::DebugUtilsMessageSeverityFlagsEXT::INFO, "fyi");
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.warning_count(), 2);
    }

    #[test]
    fn callback_ignores_null_data() {
        let result = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, vk::FALSE);
    }
}
