//! Explicit registry of live device sessions.
//!
//! Replaces process-global maps keyed by serial or bus id: the host owns one
//! [`SessionRegistry`] and passes it where sessions are looked up. At most one
//! session is registered per device id.

use crate::error::{DeviceError, Result};
use crate::session::{DeviceSession, SessionId};
use bridge_traits::device::RawDeviceId;
use core_async::sync::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, Arc<DeviceSession>>,
    /// Devices with an open in flight; no native handle is registered yet.
    pending: HashSet<RawDeviceId>,
}

impl Inner {
    fn claims(&self, device: &RawDeviceId) -> bool {
        self.pending.contains(device)
            || self
                .sessions
                .values()
                .any(|s| s.descriptor().id() == device)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `device` for an open that has not yet produced a session.
    ///
    /// The claim is consumed by [`register`](Self::register) or dropped by
    /// [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// `SessionExists` when the device is registered or already claimed.
    pub async fn reserve(&self, device: &RawDeviceId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.claims(device) {
            return Err(DeviceError::SessionExists(device.to_string()));
        }
        inner.pending.insert(device.clone());
        debug!(device = %device, "Device reserved");
        Ok(())
    }

    /// Drops a claim taken with [`reserve`](Self::reserve). Registered
    /// sessions are unaffected.
    pub async fn release(&self, device: &RawDeviceId) {
        if self.inner.write().await.pending.remove(device) {
            debug!(device = %device, "Device reservation released");
        }
    }

    /// Adds `session`, consuming any reservation its device holds.
    ///
    /// # Errors
    ///
    /// `SessionExists` when a session for the same device is already
    /// registered.
    pub async fn register(&self, session: Arc<DeviceSession>) -> Result<SessionId> {
        let mut inner = self.inner.write().await;
        let device = session.descriptor().id();
        if inner.sessions.values().any(|s| s.descriptor().id() == device) {
            return Err(DeviceError::SessionExists(device.to_string()));
        }
        inner.pending.remove(device);
        let id = session.id();
        inner.sessions.insert(id, session);
        debug!(session_id = %id, "Session registered");
        Ok(id)
    }

    pub async fn unregister(&self, id: SessionId) -> Option<Arc<DeviceSession>> {
        let removed = self.inner.write().await.sessions.remove(&id);
        if removed.is_some() {
            debug!(session_id = %id, "Session unregistered");
        }
        removed
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<DeviceSession>> {
        self.inner.read().await.sessions.get(&id).cloned()
    }

    pub async fn find_by_device(&self, device: &RawDeviceId) -> Option<Arc<DeviceSession>> {
        self.inner
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.descriptor().id() == device)
            .cloned()
    }

    pub async fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.inner.read().await.sessions.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::VirtualDevice;
    use bridge_traits::device::{DeviceDescriptor, DeviceFamily};

    fn session(device: &VirtualDevice) -> Arc<DeviceSession> {
        let descriptor = DeviceDescriptor::new(device.id().clone(), DeviceFamily::Mtp, "Player");
        Arc::new(DeviceSession::new(descriptor, Box::new(device.driver())))
    }

    #[core_async::test]
    async fn test_register_lookup_unregister() {
        let registry = SessionRegistry::new();
        let device = VirtualDevice::new("usb-1");
        let id = registry.register(session(&device)).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get(id).await.unwrap().id(), id);
        assert!(registry.find_by_device(device.id()).await.is_some());

        assert!(registry.unregister(id).await.is_some());
        assert!(registry.unregister(id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[core_async::test]
    async fn test_one_session_per_device() {
        let registry = SessionRegistry::new();
        let device = VirtualDevice::new("usb-1");
        registry.register(session(&device)).await.unwrap();

        let err = registry.register(session(&device)).await.unwrap_err();
        assert!(matches!(err, DeviceError::SessionExists(ref d) if d == "usb-1"));

        let other = VirtualDevice::new("usb-2");
        registry.register(session(&other)).await.unwrap();
        assert_eq!(registry.sessions().await.len(), 2);
    }

    #[core_async::test]
    async fn test_reservation_blocks_second_claim_until_released() {
        let registry = SessionRegistry::new();
        let device = VirtualDevice::new("usb-1");

        registry.reserve(device.id()).await.unwrap();
        let err = registry.reserve(device.id()).await.unwrap_err();
        assert!(matches!(err, DeviceError::SessionExists(ref d) if d == "usb-1"));
        assert!(registry.is_empty().await);

        registry.release(device.id()).await;
        registry.reserve(device.id()).await.unwrap();
    }

    #[core_async::test]
    async fn test_register_consumes_reservation() {
        let registry = SessionRegistry::new();
        let device = VirtualDevice::new("usb-1");

        registry.reserve(device.id()).await.unwrap();
        let id = registry.register(session(&device)).await.unwrap();
        assert!(registry.reserve(device.id()).await.is_err());

        // Releasing after register leaves the session in place.
        registry.release(device.id()).await;
        assert!(registry.get(id).await.is_some());

        registry.unregister(id).await;
        registry.reserve(device.id()).await.unwrap();
    }
}
