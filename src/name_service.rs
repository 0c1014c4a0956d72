//! Device name service (spec §3, supplemented from the source's
//! `CDeviceNameService`): a global registry mapping a name such as
//! `"sndpwm"` or `"umsd1"` to a device.
//!
//! Per spec §9 ("the service locator stays available via an interior
//! mutability cell only where registration order forces it (device
//! name service)"), this is the one global singleton this crate keeps
//! as a `static` rather than threading through an explicit context,
//! because drivers register themselves from deep inside their own
//! constructors, at a point where plumbing a context reference all the
//! way down would mean every intermediate layer takes a dependency it
//! otherwise has no use for.

use spin::Mutex;

use crate::device::Device;

const MAX_NAME_LEN: usize = 16;
const MAX_DEVICES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameServiceError {
    /// The name table has no more free slots.
    Full,
    /// No device is registered under this name.
    NotFound,
    /// A device is already registered under this name.
    AlreadyRegistered,
}

struct Entry {
    name: heapless::String<MAX_NAME_LEN>,
    device: &'static dyn Device,
}

struct Inner {
    entries: heapless::Vec<Entry, MAX_DEVICES>,
}

/// Global device name service. One instance, constructed `const`,
/// shared by every driver in the crate.
pub struct NameService {
    inner: Mutex<Inner>,
}

pub static DEVICE_NAME_SERVICE: NameService = NameService::new();

impl NameService {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: heapless::Vec::new(),
            }),
        }
    }

    /// Register `device` under `name`. `device` must outlive the
    /// registration (drivers remove themselves from the service before
    /// tearing down, mirroring the source's destructor calling
    /// `RemoveDevice`).
    pub fn add_device(&self, name: &str, device: &'static dyn Device) -> Result<(), NameServiceError> {
        let mut inner = self.inner.lock();
        if inner.entries.iter().any(|e| e.name.as_str() == name) {
            return Err(NameServiceError::AlreadyRegistered);
        }
        let mut owned = heapless::String::new();
        owned.push_str(name).map_err(|_| NameServiceError::Full)?;

        inner
            .entries
            .push(Entry { name: owned, device })
            .map_err(|_| NameServiceError::Full)?;
        Ok(())
    }

    pub fn remove_device(&self, name: &str) -> Result<(), NameServiceError> {
        let mut inner = self.inner.lock();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.name.as_str() == name)
            .ok_or(NameServiceError::NotFound)?;
        inner.entries.swap_remove(idx);
        Ok(())
    }

    /// Look up a device by name. The returned reference's lifetime is
    /// tied to `self`, not to the (necessarily `'static`) device it
    /// points at, matching the borrow discipline the rest of this
    /// crate uses for shared services.
    pub fn get_device(&self, name: &str) -> Result<&'static dyn Device, NameServiceError> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .find(|e| e.name.as_str() == name)
            .map(|e| e.device)
            .ok_or(NameServiceError::NotFound)
    }
}

impl Default for NameService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;

    struct Dummy(u32);
    impl Device for Dummy {
        fn size(&self) -> Option<u64> {
            Some(self.0 as u64)
        }
    }

    static DUMMY: Dummy = Dummy(42);

    #[test]
    fn register_lookup_remove_roundtrip() {
        let ns = NameService::new();
        ns.add_device("sndpwm", &DUMMY).unwrap();

        let found = ns.get_device("sndpwm").unwrap();
        assert_eq!(found.size(), Some(42));

        ns.remove_device("sndpwm").unwrap();
        assert_eq!(ns.get_device("sndpwm").unwrap_err(), NameServiceError::NotFound);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let ns = NameService::new();
        ns.add_device("sndpwm", &DUMMY).unwrap();
        assert_eq!(
            ns.add_device("sndpwm", &DUMMY).unwrap_err(),
            NameServiceError::AlreadyRegistered
        );
    }

    #[test]
    fn missing_device_reports_not_found() {
        let ns = NameService::new();
        assert_eq!(ns.get_device("ttyS1").unwrap_err(), NameServiceError::NotFound);
        let _ = DeviceError::Io;
    }
}
