//! Device backends: the host ⇄ device transfer primitives the accessor
//! delegates to, plus the process-wide provider used by the plain
//! `as_cupy()` / `as_numpy()` forms.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use log::debug;

use crate::config::Config;
use crate::data::buffer::{DeviceAllocation, DeviceArray, HostArray};
use crate::error::{ResidencyError, Result};

/// Transfer primitives of one device.
pub trait DeviceBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Copy a host array into newly allocated device memory.
    fn upload(&self, host: &HostArray) -> Result<DeviceArray>;

    /// Copy a device array back into host memory.
    fn download(&self, device: &DeviceArray) -> Result<HostArray>;
}

// ---------------------------------------------------------------------------
// SimulatedDevice
// ---------------------------------------------------------------------------

/// Transfer counters of a [`SimulatedDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub uploads: usize,
    pub downloads: usize,
    pub bytes_to_device: usize,
    pub bytes_to_host: usize,
    /// Buffers still held by at least one device handle.
    pub live_allocations: usize,
}

type BufferTable = Mutex<HashMap<u64, Vec<f64>>>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Payload of a simulated allocation. Points back into the owning device's
/// buffer table and frees its entry when the last handle drops.
#[derive(Debug)]
struct SimulatedBuffer {
    instance: u64,
    id: u64,
    table: Weak<BufferTable>,
}

impl Drop for SimulatedBuffer {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.id);
        }
    }
}

/// A device whose memory is emulated in process. Useful wherever no GPU is
/// present: every transfer is a real copy into or out of a buffer table owned
/// by this instance, so residency is observable exactly as with hardware.
///
/// Two instances never share memory, even with the same ordinal.
#[derive(Debug)]
pub struct SimulatedDevice {
    name: String,
    instance: u64,
    buffers: Arc<BufferTable>,
    next_id: AtomicU64,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    bytes_to_device: AtomicUsize,
    bytes_to_host: AtomicUsize,
}

impl SimulatedDevice {
    pub fn new(ordinal: u32) -> Self {
        Self {
            name: format!("simulated:{ordinal}"),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            buffers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            bytes_to_device: AtomicUsize::new(0),
            bytes_to_host: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            bytes_to_device: self.bytes_to_device.load(Ordering::Relaxed),
            bytes_to_host: self.bytes_to_host.load(Ordering::Relaxed),
            live_allocations: self.table().len(),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u64, Vec<f64>>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceBackend for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        true
    }

    fn upload(&self, host: &HostArray) -> Result<DeviceArray> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = std::mem::size_of_val(host.values());
        self.table().insert(id, host.values().to_vec());

        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.bytes_to_device.fetch_add(bytes, Ordering::Relaxed);
        debug!("{}: upload buffer {id} ({bytes} bytes, shape {:?})", self.name, host.shape());

        let payload = SimulatedBuffer {
            instance: self.instance,
            id,
            table: Arc::downgrade(&self.buffers),
        };
        let allocation = DeviceAllocation::new(id, self.name.clone(), bytes, Box::new(payload));
        Ok(DeviceArray::new(host.shape().to_vec(), allocation))
    }

    fn download(&self, device: &DeviceArray) -> Result<HostArray> {
        let allocation = device.allocation();
        let foreign = || ResidencyError::ForeignHandle {
            handle: allocation.id(),
            owner: allocation.backend().to_string(),
            backend: self.name.clone(),
        };
        let buffer = allocation
            .payload::<SimulatedBuffer>()
            .filter(|b| b.instance == self.instance)
            .ok_or_else(foreign)?;
        let values = self.table().get(&buffer.id).cloned().ok_or_else(foreign)?;

        self.downloads.fetch_add(1, Ordering::Relaxed);
        self.bytes_to_host.fetch_add(allocation.bytes(), Ordering::Relaxed);
        debug!(
            "{}: download buffer {} ({} bytes)",
            self.name,
            allocation.id(),
            allocation.bytes()
        );

        HostArray::new(device.shape().to_vec(), values)
    }
}

// ---------------------------------------------------------------------------
// UnavailableDevice
// ---------------------------------------------------------------------------

/// Stand-in for a machine without a usable device: every transfer fails.
#[derive(Debug, Clone, Default)]
pub struct UnavailableDevice;

impl DeviceBackend for UnavailableDevice {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn upload(&self, _host: &HostArray) -> Result<DeviceArray> {
        Err(ResidencyError::DeviceUnavailable {
            backend: self.name().to_string(),
        })
    }

    fn download(&self, _device: &DeviceArray) -> Result<HostArray> {
        Err(ResidencyError::DeviceUnavailable {
            backend: self.name().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Provider registry
// ---------------------------------------------------------------------------

static PROVIDER: RwLock<Option<Arc<dyn DeviceBackend>>> = RwLock::new(None);

/// Install the backend used by the plain accessor methods. Returns the
/// previously registered backend, if any.
pub fn register_provider(backend: Arc<dyn DeviceBackend>) -> Option<Arc<dyn DeviceBackend>> {
    debug!("registering device provider '{}'", backend.name());
    let mut slot = PROVIDER.write().unwrap_or_else(|e| e.into_inner());
    slot.replace(backend)
}

/// The registered backend; on first use without registration one is built
/// from the environment (see [`Config::from_env`]).
pub fn provider() -> Result<Arc<dyn DeviceBackend>> {
    if let Some(backend) = PROVIDER.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
        return Ok(Arc::clone(backend));
    }

    let mut slot = PROVIDER.write().unwrap_or_else(|e| e.into_inner());
    if let Some(backend) = slot.as_ref() {
        return Ok(Arc::clone(backend));
    }
    let backend = Config::from_env()?.build_backend();
    debug!("using device provider '{}' from environment", backend.name());
    *slot = Some(Arc::clone(&backend));
    Ok(backend)
}
