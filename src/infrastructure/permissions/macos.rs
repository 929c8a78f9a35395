//! TCC-backed oracle using ApplicationServices, CoreGraphics and AVFoundation

use std::time::Duration;

use async_trait::async_trait;
use core_foundation::base::TCFType;
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::CFString;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use objc2::msg_send;
use objc2::runtime::AnyClass;
use tracing::{debug, warn};

use crate::application::ports::PermissionOracle;
use crate::domain::permissions::{Capability, GrantState};

/// Framework calls without a binding in core-graphics or core-foundation.
mod ffi {
    use core_foundation::base::TCFType;
    use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
    use objc2::runtime::AnyObject;

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        fn AXIsProcessTrusted() -> u8;
        fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> u8;
    }

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGPreflightListenEventAccess() -> u8;
        fn CGRequestListenEventAccess() -> u8;
    }

    #[link(name = "AVFoundation", kind = "framework")]
    extern "C" {
        pub static AVMediaTypeAudio: *const AnyObject;
    }

    pub fn process_trusted() -> bool {
        // SAFETY: no arguments, reads TCC state for this process.
        unsafe { AXIsProcessTrusted() != 0 }
    }

    pub fn process_trusted_with_options<K, V>(options: &CFDictionary<K, V>) -> bool {
        // SAFETY: `options` is a live CFDictionary for the duration of the call.
        unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) != 0 }
    }

    pub fn listen_event_access() -> bool {
        // SAFETY: no arguments.
        unsafe { CGPreflightListenEventAccess() != 0 }
    }

    pub fn request_listen_event_access() -> bool {
        // SAFETY: no arguments; may show the consent dialog.
        unsafe { CGRequestListenEventAccess() != 0 }
    }
}

// AVAuthorizationStatus
const AV_NOT_DETERMINED: isize = 0;
const AV_AUTHORIZED: isize = 3;

/// How long the input stream stays open to trigger the consent prompt.
const MIC_PROMPT_HOLD: Duration = Duration::from_millis(300);

/// Reads and requests grants for the running executable
#[derive(Debug, Default)]
pub struct MacPermissionOracle;

impl MacPermissionOracle {
    pub fn new() -> Self {
        Self
    }

    fn microphone_status() -> GrantState {
        let Some(class) = AnyClass::get("AVCaptureDevice") else {
            debug!("AVCaptureDevice class unavailable");
            return GrantState::Unknown;
        };
        // SAFETY: AVCaptureDevice responds to this selector with an NSInteger,
        // and AVMediaTypeAudio is a framework constant.
        let status: isize =
            unsafe { msg_send![class, authorizationStatusForMediaType: ffi::AVMediaTypeAudio] };
        match status {
            AV_AUTHORIZED => GrantState::Granted,
            AV_NOT_DETERMINED => GrantState::Unknown,
            _ => GrantState::Denied,
        }
    }

    fn accessibility_status() -> GrantState {
        if ffi::process_trusted() {
            GrantState::Granted
        } else {
            GrantState::Denied
        }
    }

    fn input_monitoring_status() -> GrantState {
        if ffi::listen_event_access() {
            GrantState::Granted
        } else {
            GrantState::Denied
        }
    }

    fn prompt_accessibility() {
        let key = CFString::new("AXTrustedCheckOptionPrompt");
        let options = CFDictionary::from_CFType_pairs(&[(
            key.as_CFType(),
            CFBoolean::true_value().as_CFType(),
        )]);
        let trusted = ffi::process_trusted_with_options(&options);
        debug!(trusted, "accessibility prompt shown");
    }

    /// Opening an input stream is what makes the OS show the microphone
    /// consent dialog for this executable.
    fn prompt_microphone() -> Result<(), String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| "no default input device".to_string())?;
        let config = device.default_input_config().map_err(|e| e.to_string())?;
        let stream = device
            .build_input_stream_raw(
                &config.config(),
                config.sample_format(),
                |_data: &cpal::Data, _: &cpal::InputCallbackInfo| {},
                |err| warn!(error = %err, "microphone prompt stream error"),
                None,
            )
            .map_err(|e| e.to_string())?;
        stream.play().map_err(|e| e.to_string())?;
        std::thread::sleep(MIC_PROMPT_HOLD);
        Ok(())
    }
}

#[async_trait]
impl PermissionOracle for MacPermissionOracle {
    async fn status(&self, capability: Capability) -> GrantState {
        match capability {
            Capability::Microphone => Self::microphone_status(),
            Capability::Accessibility => Self::accessibility_status(),
            Capability::InputMonitoring => Self::input_monitoring_status(),
        }
    }

    async fn prompt(&self, capability: Capability) {
        match capability {
            Capability::Accessibility => Self::prompt_accessibility(),
            Capability::InputMonitoring => {
                let granted = ffi::request_listen_event_access();
                debug!(granted, "input monitoring prompt shown");
            }
            Capability::Microphone => {
                match tokio::task::spawn_blocking(Self::prompt_microphone).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "could not open microphone for prompt"),
                    Err(e) => warn!(error = %e, "microphone prompt task failed"),
                }
            }
        }
    }
}
