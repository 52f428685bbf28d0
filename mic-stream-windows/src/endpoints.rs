//! Capture endpoint discovery via the MMDevice API.
//!
//! On Windows 10 1803+ microphone access is governed by Settings > Privacy >
//! Microphone. Unpackaged desktop apps get no consent prompt, so a denied
//! toggle only shows up as `E_ACCESSDENIED` when an endpoint is activated.

use windows::core::{BSTR, PCWSTR};
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Foundation::{E_ACCESSDENIED, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use mic_stream_core::DeviceInfo;

use crate::error::WasapiError;

/// Initializes COM (MTA) for the current thread and undoes it on drop.
///
/// A thread already in an STA keeps its apartment; the guard then does
/// nothing on drop.
pub(crate) struct ComApartment {
    owned: bool,
}

impl ComApartment {
    pub(crate) fn enter() -> Result<Self, WasapiError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owned: false });
        }
        hr.ok().map_err(WasapiError::com("CoInitializeEx"))?;
        Ok(Self { owned: true })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}

pub(crate) fn device_enumerator() -> Result<IMMDeviceEnumerator, WasapiError> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
        .map_err(WasapiError::com("CoCreateInstance(MMDeviceEnumerator)"))
}

/// Resolve an endpoint by id, or the default console capture endpoint.
pub(crate) fn capture_endpoint(
    enumerator: &IMMDeviceEnumerator,
    device_id: Option<&str>,
) -> Result<IMMDevice, WasapiError> {
    unsafe {
        match device_id {
            Some(id) => {
                let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                enumerator.GetDevice(PCWSTR(wide.as_ptr()))
            }
            None => enumerator.GetDefaultAudioEndpoint(eCapture, eConsole),
        }
    }
    .map_err(|_| WasapiError::NoEndpoint)
}

/// List active capture endpoints with their friendly names.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, WasapiError> {
    let _com = ComApartment::enter()?;
    let enumerator = device_enumerator()?;

    unsafe {
        let collection = enumerator
            .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
            .map_err(WasapiError::com("EnumAudioEndpoints"))?;
        let count = collection.GetCount().map_err(WasapiError::com("GetCount"))?;

        let default_id = enumerator
            .GetDefaultAudioEndpoint(eCapture, eConsole)
            .ok()
            .and_then(|d| endpoint_id(&d));

        let mut devices = Vec::with_capacity(count as usize);
        for i in 0..count {
            let Ok(device) = collection.Item(i) else {
                continue;
            };
            let Some(id) = endpoint_id(&device) else {
                continue;
            };
            let name = friendly_name(&device).unwrap_or_else(|| format!("Microphone {}", i + 1));
            devices.push(DeviceInfo {
                is_default: default_id.as_deref() == Some(id.as_str()),
                id,
                name,
            });
        }
        Ok(devices)
    }
}

/// Whether `device_id` (or the default endpoint) can be activated for capture.
///
/// Returns `Err(AccessDenied)` when the privacy toggle blocks the app and
/// `Err(NoEndpoint)` when there is nothing to capture from.
pub fn check_input_access(device_id: Option<&str>) -> Result<(), WasapiError> {
    let _com = ComApartment::enter()?;
    let enumerator = device_enumerator()?;
    let device = capture_endpoint(&enumerator, device_id)?;

    match unsafe { device.Activate::<IAudioClient>(CLSCTX_ALL, None) } {
        Ok(_) => Ok(()),
        Err(e) if e.code() == E_ACCESSDENIED => Err(WasapiError::AccessDenied),
        // Held exclusively by another app; shared-mode open may still succeed later.
        Err(e) if e.code() == AUDCLNT_E_DEVICE_IN_USE => {
            log::warn!("capture endpoint in use: {}", e);
            Ok(())
        }
        Err(e) => Err(WasapiError::Com {
            call: "IMMDevice::Activate",
            source: e,
        }),
    }
}

pub(crate) fn endpoint_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let id = device.GetId().ok()?;
        let text = id.to_string().ok();
        CoTaskMemFree(Some(id.0 as *const _));
        text
    }
}

/// Read `PKEY_Device_FriendlyName` from the endpoint's property store.
pub(crate) fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = BSTR::try_from(&value).ok()?.to_string();
        (!name.is_empty()).then_some(name)
    }
}
