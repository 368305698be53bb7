/*
 * Device table
 *
 * A process-wide, fixed-size table of device records, each name-unique
 * and guarded by its own mutex wait queue — the same
 * acquire-is-wait/release-is-signal pairing the original device layer
 * uses. Kept as a fixed array rather than a real linked list for the
 * same reason the thread table is: no heap-backed collection needed for
 * a handful of board peripherals, and a stable index makes for a cheap,
 * `Copy` handle.
 */

use crate::error::{BermudaError, BermudaResult};
use crate::sync::Mutex as ResourceMutex;
use alloc::boxed::Box;
use spin::Mutex as SpinMutex;

pub const MAX_DEVICES: usize = 8;

/// Per-device I/O surface, the same split the original `_device` struct's
/// `io`/`data`/control-callback fields describe: write, read, flush and
/// close with a default no-op, and an ioctl-style control hook. Stored as
/// a trait object per device node, generalized from the teacher's
/// `Arc<dyn Device>`-backed TTY entries to arbitrary named peripherals.
pub trait DeviceOps: Send + Sync {
    fn write(&self, buf: &[u8]) -> BermudaResult<usize>;
    fn read(&self, buf: &mut [u8]) -> BermudaResult<usize>;

    fn flush(&self) -> BermudaResult<()> {
        Ok(())
    }

    fn close(&self) -> BermudaResult<()> {
        Ok(())
    }

    fn control(&self, request: u32, arg: usize) -> BermudaResult<i32> {
        let _ = (request, arg);
        Err(BermudaError::BadState)
    }
}

struct Entry {
    name: &'static str,
    ops: Box<dyn DeviceOps>,
    mutex: ResourceMutex,
}

/// An opaque, `Copy` reference to a registered device, the table-index
/// handle convention the thread and timer tables also use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(usize);

static TABLE: SpinMutex<[Option<Entry>; MAX_DEVICES]> = SpinMutex::new([None, None, None, None, None, None, None, None]);

/// Clear the table. Called once during `bermuda_os::init`, before board
/// code registers any bus adapters.
pub fn init() {
    let mut table = TABLE.lock();
    for slot in table.iter_mut() {
        *slot = None;
    }
}

/// Register a device under `name`. Fails if the name is already taken or
/// the table is full.
pub fn register(name: &'static str, ops: Box<dyn DeviceOps>) -> BermudaResult<DeviceHandle> {
    let mut table = TABLE.lock();
    if table.iter().flatten().any(|e| e.name == name) {
        return Err(BermudaError::Unavailable);
    }
    let slot = table
        .iter()
        .position(|e| e.is_none())
        .ok_or(BermudaError::NoMemory)?;
    table[slot] = Some(Entry {
        name,
        ops,
        mutex: ResourceMutex::new(),
    });
    Ok(DeviceHandle(slot))
}

/// Linear lookup by name.
pub fn lookup(name: &str) -> Option<DeviceHandle> {
    let table = TABLE.lock();
    table
        .iter()
        .position(|e| matches!(e, Some(entry) if entry.name == name))
        .map(DeviceHandle)
}

/// Borrow a registered entry by raw pointer after releasing the table
/// lock. Sound because the table never removes or relocates an entry
/// once registered — a handle's slot is valid for the remainder of the
/// program, the same "no unregister" invariant the original list-based
/// device table relies on.
fn entry_ptr(handle: DeviceHandle) -> Option<*const Entry> {
    let table = TABLE.lock();
    table
        .get(handle.0)
        .and_then(|e| e.as_ref())
        .map(|e| e as *const Entry)
}

/// `acquire(dev, tmo)` == `wait(dev.mutex, tmo)`.
pub fn acquire(handle: DeviceHandle, timeout_ticks: u32) -> BermudaResult<()> {
    let ptr = entry_ptr(handle).ok_or(BermudaError::Unavailable)?;
    unsafe { &*ptr }.mutex.acquire(timeout_ticks)
}

/// `release(dev)` == `signal(dev.mutex)`.
pub fn release(handle: DeviceHandle) {
    if let Some(ptr) = entry_ptr(handle) {
        unsafe { &*ptr }.mutex.release();
    }
}

fn ops(handle: DeviceHandle) -> BermudaResult<&'static dyn DeviceOps> {
    let ptr = entry_ptr(handle).ok_or(BermudaError::Unavailable)?;
    let entry: &'static Entry = unsafe { &*ptr };
    Ok(entry.ops.as_ref())
}

pub fn write(handle: DeviceHandle, buf: &[u8]) -> BermudaResult<usize> {
    ops(handle)?.write(buf)
}

pub fn read(handle: DeviceHandle, buf: &mut [u8]) -> BermudaResult<usize> {
    ops(handle)?.read(buf)
}

pub fn flush(handle: DeviceHandle) -> BermudaResult<()> {
    ops(handle)?.flush()
}

pub fn close(handle: DeviceHandle) -> BermudaResult<()> {
    ops(handle)?.close()
}

pub fn control(handle: DeviceHandle, request: u32, arg: usize) -> BermudaResult<i32> {
    ops(handle)?.control(request, arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDevice {
        writes: Arc<AtomicUsize>,
    }

    impl DeviceOps for CountingDevice {
        fn write(&self, buf: &[u8]) -> BermudaResult<usize> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(buf.len())
        }

        fn read(&self, _buf: &mut [u8]) -> BermudaResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn register_then_lookup_finds_device_by_name() {
        let counter = Arc::new(AtomicUsize::new(0));
        let h = register(
            "device-table-test-a",
            Box::new(CountingDevice { writes: counter }),
        )
        .expect("register");
        assert_eq!(lookup("device-table-test-a"), Some(h));
        assert_eq!(lookup("device-table-test-nonexistent"), None);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let _ = register(
            "device-table-test-b",
            Box::new(CountingDevice {
                writes: counter.clone(),
            }),
        );
        let result = register(
            "device-table-test-b",
            Box::new(CountingDevice { writes: counter }),
        );
        assert_eq!(result, Err(BermudaError::Unavailable));
    }

    #[test]
    fn write_reaches_the_registered_device() {
        let counter = Arc::new(AtomicUsize::new(0));
        let h = register(
            "device-table-test-c",
            Box::new(CountingDevice {
                writes: counter.clone(),
            }),
        )
        .unwrap_or_else(|_| lookup("device-table-test-c").unwrap());
        let before = counter.load(Ordering::Relaxed);
        write(h, &[1, 2, 3]).expect("write");
        assert_eq!(counter.load(Ordering::Relaxed), before + 1);
    }

    #[test]
    fn acquire_then_release_round_trips_without_a_scheduler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let h = register(
            "device-table-test-d",
            Box::new(CountingDevice { writes: counter }),
        )
        .unwrap_or_else(|_| lookup("device-table-test-d").unwrap());
        acquire(h, 0).expect("acquire");
        release(h);
    }
}
