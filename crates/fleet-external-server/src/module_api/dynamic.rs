//! Dynamic-library provider of [`ModuleApi`].
//!
//! Loads a handler shared library at the configured path, resolves its
//! C-linkage symbols once into a table of function pointers, and keeps the
//! library mapped for the lifetime of the session.

use std::collections::BTreeMap;
use std::os::raw::{c_int, c_uint, c_void};
use std::path::Path;

use fleet_protocol::Device;
use libloading::Library;
use tracing::{debug, warn};

use super::abi;
use super::{codes, DisconnectReason, DrainedCommand, ModuleApi, ModuleCommand};
use crate::config::ModuleConfig;
use crate::devices::device_repr;
use crate::error::ModuleError;

type InitFn = unsafe extern "C" fn(abi::Config) -> *mut c_void;
type DeviceConnectedFn = unsafe extern "C" fn(abi::DeviceIdentification, *mut c_void) -> c_int;
type DeviceDisconnectedFn =
    unsafe extern "C" fn(c_int, abi::DeviceIdentification, *mut c_void) -> c_int;
type ForwardFn = unsafe extern "C" fn(abi::Buffer, abi::DeviceIdentification, *mut c_void) -> c_int;
type WaitForCommandFn = unsafe extern "C" fn(c_int, *mut c_void) -> c_int;
type PopCommandFn =
    unsafe extern "C" fn(*mut abi::Buffer, *mut abi::DeviceIdentification, *mut c_void) -> c_int;
type DestroyFn = unsafe extern "C" fn(*mut *mut c_void) -> c_int;
type DeallocateFn = unsafe extern "C" fn(*mut abi::Buffer);
type GetModuleNumberFn = unsafe extern "C" fn() -> c_int;
type IsDeviceTypeSupportedFn = unsafe extern "C" fn(c_uint) -> c_int;

/// Resolved symbol table of one handler library.
struct SymbolTable {
    init: InitFn,
    device_connected: DeviceConnectedFn,
    device_disconnected: DeviceDisconnectedFn,
    forward_status: ForwardFn,
    forward_error_message: ForwardFn,
    wait_for_command: WaitForCommandFn,
    pop_command: PopCommandFn,
    command_ack: ForwardFn,
    destroy: DestroyFn,
    deallocate: DeallocateFn,
    get_module_number: GetModuleNumberFn,
    is_device_type_supported: IsDeviceTypeSupportedFn,
}

macro_rules! resolve {
    ($library:expr, $path:expr, $name:literal) => {
        *$library
            .get($name)
            .map_err(|error| ModuleError::Load {
                path: $path.to_path_buf(),
                reason: format!(
                    "missing symbol `{}`: {error}",
                    String::from_utf8_lossy(&$name[..$name.len() - 1])
                ),
            })?
    };
}

impl SymbolTable {
    /// Resolves every required symbol.
    ///
    /// # Safety
    ///
    /// The symbols must have the C signatures of the Fleet Protocol module
    /// maintainer ABI.
    unsafe fn resolve(library: &Library, path: &Path) -> Result<Self, ModuleError> {
        Ok(Self {
            init: resolve!(library, path, b"init\0"),
            device_connected: resolve!(library, path, b"device_connected\0"),
            device_disconnected: resolve!(library, path, b"device_disconnected\0"),
            forward_status: resolve!(library, path, b"forward_status\0"),
            forward_error_message: resolve!(library, path, b"forward_error_message\0"),
            wait_for_command: resolve!(library, path, b"wait_for_command\0"),
            pop_command: resolve!(library, path, b"pop_command\0"),
            command_ack: resolve!(library, path, b"command_ack\0"),
            destroy: resolve!(library, path, b"destroy\0"),
            deallocate: resolve!(library, path, b"deallocate\0"),
            get_module_number: resolve!(library, path, b"get_module_number\0"),
            is_device_type_supported: resolve!(library, path, b"is_device_type_supported\0"),
        })
    }
}

/// A loaded handler library plus the context it issued from `init`.
pub struct DynamicModule {
    module_id: u16,
    symbols: SymbolTable,
    context: *mut c_void,
    // Keeps the code mapped while `symbols` points into it.
    _library: Library,
}

// The raw context pointer is what makes this type !Send by default. The
// handler ABI requires the listed operations to be reentrant-safe with
// respect to each other, and the engine never hands the context to anything
// but these wrappers.
unsafe impl Send for DynamicModule {}
unsafe impl Sync for DynamicModule {}

impl DynamicModule {
    /// Loads the library configured for `module_id` and initializes it.
    ///
    /// `company` and `car` are injected into the `init` key-value pairs, as
    /// the libraries expect. Fails when the library is missing, a symbol
    /// cannot be resolved, `init` returns null, or the library's module
    /// number does not match the configured id.
    pub fn load(
        module_id: u16,
        config: &ModuleConfig,
        company: &str,
        car: &str,
    ) -> Result<Self, ModuleError> {
        let path = config.lib_path.as_path();
        if !path.is_file() {
            return Err(ModuleError::LibraryNotFound(path.to_path_buf()));
        }
        let library = unsafe {
            Library::new(path).map_err(|error| ModuleError::Load {
                path: path.to_path_buf(),
                reason: error.to_string(),
            })?
        };
        let symbols = unsafe { SymbolTable::resolve(&library, path)? };

        let pairs = init_pairs(module_id, &config.config, company, car)?;
        let context = unsafe { call_init(symbols.init, &pairs) };
        if context.is_null() {
            return Err(ModuleError::InitFailed(module_id));
        }

        let module = Self {
            module_id,
            symbols,
            context,
            _library: library,
        };
        let actual = module.module_number();
        if actual != i32::from(module_id) {
            return Err(ModuleError::NumberMismatch {
                configured: module_id,
                actual,
            });
        }
        debug!(module_id, path = %path.display(), "module library loaded");
        Ok(module)
    }

    fn identification(device: &Device) -> abi::DeviceIdentification {
        abi::DeviceIdentification {
            module: device.module as c_int,
            device_type: device.device_type,
            device_role: abi::Buffer::from_slice(device.device_role.as_bytes()),
            device_name: abi::Buffer::from_slice(device.device_name.as_bytes()),
            priority: device.priority,
        }
    }

    fn valid_identification(&self, device: &Device, action: &str) -> bool {
        if device.device_role.is_empty() || device.device_name.is_empty() {
            warn!(
                module_id = self.module_id,
                device = %device_repr(device),
                "device has an empty role or name, cannot {action}"
            );
            return false;
        }
        true
    }
}

impl ModuleApi for DynamicModule {
    fn module_number(&self) -> i32 {
        unsafe { (self.symbols.get_module_number)() }
    }

    fn is_device_type_supported(&self, device_type: u32) -> bool {
        unsafe { (self.symbols.is_device_type_supported)(device_type) == codes::OK }
    }

    fn device_connected(&self, device: &Device) -> i32 {
        if !self.valid_identification(device, "connect") {
            return codes::NOT_OK;
        }
        // The external server ignores the gateway-reported priority.
        let mut device = device.clone();
        device.priority = 0;
        unsafe { (self.symbols.device_connected)(Self::identification(&device), self.context) }
    }

    fn device_disconnected(&self, reason: DisconnectReason, device: &Device) -> i32 {
        if !self.valid_identification(device, "disconnect") {
            return codes::NOT_OK;
        }
        unsafe {
            (self.symbols.device_disconnected)(
                reason as c_int,
                Self::identification(device),
                self.context,
            )
        }
    }

    fn forward_status(&self, device: &Device, payload: &[u8]) -> i32 {
        if !self.valid_identification(device, "forward a status") {
            return codes::NOT_OK;
        }
        let buffer = abi::Buffer::from_slice(payload);
        unsafe { (self.symbols.forward_status)(buffer, Self::identification(device), self.context) }
    }

    fn forward_error_message(&self, device: &Device, payload: &[u8]) -> i32 {
        if !self.valid_identification(device, "forward an error message") {
            return codes::NOT_OK;
        }
        let buffer = abi::Buffer::from_slice(payload);
        unsafe {
            (self.symbols.forward_error_message)(buffer, Self::identification(device), self.context)
        }
    }

    fn wait_for_command(&self, timeout_ms: u32) -> i32 {
        let timeout = c_int::try_from(timeout_ms).unwrap_or(c_int::MAX);
        unsafe { (self.symbols.wait_for_command)(timeout, self.context) }
    }

    fn get_command(&self) -> DrainedCommand {
        let mut buffer = abi::Buffer::empty();
        let mut identification = abi::DeviceIdentification::empty();
        let remaining =
            unsafe { (self.symbols.pop_command)(&mut buffer, &mut identification, self.context) };

        let command = if remaining < 0 {
            None
        } else {
            let data = unsafe { buffer.to_vec() };
            let device = unsafe { device_from_identification(&identification) };
            Some(ModuleCommand { device, data })
        };

        // Library-owned memory goes back through the library's allocator.
        unsafe {
            (self.symbols.deallocate)(&mut identification.device_role);
            (self.symbols.deallocate)(&mut identification.device_name);
            (self.symbols.deallocate)(&mut buffer);
        }
        DrainedCommand { command, remaining }
    }

    fn command_ack(&self, data: &[u8], device: &Device) -> i32 {
        if !self.valid_identification(device, "acknowledge a command") {
            return codes::NOT_OK;
        }
        let buffer = abi::Buffer::from_slice(data);
        unsafe { (self.symbols.command_ack)(buffer, Self::identification(device), self.context) }
    }

    fn destroy(&self) -> i32 {
        let mut context = self.context;
        unsafe { (self.symbols.destroy)(&mut context) }
    }
}

/// Owned backing storage for the `init` key-value pairs. Values keep a
/// trailing NUL so libraries reading them as C strings stay in bounds; the
/// reported size excludes it.
fn init_pairs(
    module_id: u16,
    config: &BTreeMap<String, serde_json::Value>,
    company: &str,
    car: &str,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ModuleError> {
    let mut pairs = vec![
        (
            nul_terminated("company_name"),
            nul_terminated(company),
        ),
        (nul_terminated("car_name"), nul_terminated(car)),
    ];
    for (key, value) in config {
        let rendered = match value {
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Number(number) => number.to_string(),
            _ => {
                return Err(ModuleError::InvalidConfigValue {
                    module: module_id,
                    key: key.clone(),
                })
            }
        };
        pairs.push((nul_terminated(key), nul_terminated(&rendered)));
    }
    Ok(pairs)
}

fn nul_terminated(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

unsafe fn call_init(init: InitFn, pairs: &[(Vec<u8>, Vec<u8>)]) -> *mut c_void {
    let parameters: Vec<abi::KeyValue> = pairs
        .iter()
        .map(|(key, value)| abi::KeyValue {
            key: abi::Buffer {
                data: key.as_ptr().cast_mut().cast(),
                size: key.len() - 1,
            },
            value: abi::Buffer {
                data: value.as_ptr().cast_mut().cast(),
                size: value.len() - 1,
            },
        })
        .collect();
    let config = abi::Config {
        parameters: parameters.as_ptr(),
        size: parameters.len(),
    };
    init(config)
}

/// Rebuilds a wire device from a library-filled identification.
///
/// # Safety
///
/// The buffers must be valid per [`abi::Buffer::to_vec`].
unsafe fn device_from_identification(identification: &abi::DeviceIdentification) -> Device {
    let role = identification.device_role.to_vec();
    let name = identification.device_name.to_vec();
    Device {
        module: u32::try_from(identification.module).unwrap_or(0),
        device_type: identification.device_type,
        device_role: String::from_utf8_lossy(&role).into_owned(),
        device_name: String::from_utf8_lossy(&name).into_owned(),
        priority: identification.priority,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn missing_library_is_reported() {
        let config = ModuleConfig {
            lib_path: PathBuf::from("/nonexistent/module.so"),
            config: BTreeMap::new(),
        };
        let result = DynamicModule::load(2, &config, "acme", "v1");
        assert!(matches!(result, Err(ModuleError::LibraryNotFound(_))));
    }

    #[test]
    fn init_pairs_carry_identity_first() {
        let mut config = BTreeMap::new();
        config.insert("retries".to_string(), serde_json::json!(3));
        let pairs = init_pairs(2, &config, "acme", "v1").unwrap();
        assert_eq!(pairs[0].0, b"company_name\0".to_vec());
        assert_eq!(pairs[0].1, b"acme\0".to_vec());
        assert_eq!(pairs[1].1, b"v1\0".to_vec());
        assert_eq!(pairs[2].0, b"retries\0".to_vec());
        assert_eq!(pairs[2].1, b"3\0".to_vec());
    }

    #[test]
    fn structured_config_values_are_rejected() {
        let mut config = BTreeMap::new();
        config.insert("bad".to_string(), serde_json::json!({ "nested": true }));
        let result = init_pairs(2, &config, "acme", "v1");
        assert!(matches!(
            result,
            Err(ModuleError::InvalidConfigValue { module: 2, .. })
        ));
    }
}
