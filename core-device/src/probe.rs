//! Device probing and driver selection.
//!
//! [`AssistantChain`] asks each registered [`ConnectionAssistant`] in turn
//! whether it owns a freshly attached device; the first to say yes describes
//! it. [`DriverRegistry`] then picks the driver factory for the descriptor's
//! family when the session is opened.

use crate::error::{DeviceError, Result};
use bridge_traits::device::{
    ConnectionAssistant, DeviceDescriptor, DeviceDriver, DeviceFamily, DriverFactory, RawDevice,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default, Clone)]
pub struct AssistantChain {
    assistants: Vec<Arc<dyn ConnectionAssistant>>,
}

impl AssistantChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn ConnectionAssistant>) -> Self {
        self.register(assistant);
        self
    }

    /// Appends an assistant. Earlier registrations win ties.
    pub fn register(&mut self, assistant: Arc<dyn ConnectionAssistant>) {
        self.assistants.push(assistant);
    }

    pub fn len(&self) -> usize {
        self.assistants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assistants.is_empty()
    }

    /// Descriptor from the first assistant that identifies `raw`, if any.
    pub fn probe(&self, raw: &RawDevice) -> Option<DeviceDescriptor> {
        for assistant in &self.assistants {
            if !assistant.identify(raw) {
                continue;
            }
            debug!(family = %assistant.family(), "Assistant claimed device");
            return assistant.describe(raw);
        }
        debug!("No assistant claimed device");
        None
    }
}

impl std::fmt::Debug for AssistantChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let families: Vec<_> = self.assistants.iter().map(|a| a.family()).collect();
        f.debug_struct("AssistantChain")
            .field("families", &families)
            .finish()
    }
}

/// Driver factories keyed by family.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    factories: HashMap<DeviceFamily, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Installs `factory`, replacing any previous one for the same family.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
        self.factories.insert(factory.family(), factory);
    }

    pub fn supports(&self, family: DeviceFamily) -> bool {
        self.factories.contains_key(&family)
    }

    pub fn create(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn DeviceDriver>> {
        let factory = self.factories.get(&descriptor.family()).ok_or_else(|| {
            DeviceError::UnsupportedOperation(format!(
                "no driver available for {} devices",
                descriptor.family()
            ))
        })?;
        Ok(factory.create(descriptor)?)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let families: Vec<_> = self.factories.keys().collect();
        f.debug_struct("DriverRegistry")
            .field("families", &families)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::device::RawDeviceId;
    use mockall::mock;
    use mockall::predicate::*;

    mock! {
        Assistant {}

        impl ConnectionAssistant for Assistant {
            fn family(&self) -> DeviceFamily;
            fn identify(&self, raw: &RawDevice) -> bool;
            fn describe(&self, raw: &RawDevice) -> Option<DeviceDescriptor>;
        }
    }

    fn assistant(family: DeviceFamily, claims: bool) -> MockAssistant {
        let mut mock = MockAssistant::new();
        mock.expect_family().return_const(family);
        mock.expect_identify().return_const(claims);
        mock.expect_describe().returning(move |raw| {
            let id = raw.id.clone()?;
            Some(DeviceDescriptor::from_raw(raw, id, family))
        });
        mock
    }

    #[test]
    fn test_first_identifying_assistant_wins() {
        let chain = AssistantChain::new()
            .with_assistant(Arc::new(assistant(DeviceFamily::AudioCd, false)))
            .with_assistant(Arc::new(assistant(DeviceFamily::Mtp, true)))
            .with_assistant(Arc::new(assistant(DeviceFamily::MassStorage, true)));

        let raw = RawDevice::new("usb-1").with_protocol("mtp");
        let descriptor = chain.probe(&raw).unwrap();
        assert_eq!(descriptor.family(), DeviceFamily::Mtp);
    }

    #[test]
    fn test_unclaimed_device_is_not_described() {
        let mut never = MockAssistant::new();
        never.expect_family().return_const(DeviceFamily::Mtp);
        never.expect_identify().with(always()).return_const(false);
        never.expect_describe().never();

        let chain = AssistantChain::new().with_assistant(Arc::new(never));
        assert!(chain.probe(&RawDevice::new("usb-2")).is_none());
    }

    #[test]
    fn test_missing_factory_is_unsupported() {
        let registry = DriverRegistry::new();
        let descriptor = DeviceDescriptor::new(
            RawDeviceId::new("/dev/sr0"),
            DeviceFamily::AudioCd,
            "CD",
        );
        assert!(!registry.supports(DeviceFamily::AudioCd));
        let err = registry.create(&descriptor).err().unwrap();
        assert!(matches!(err, DeviceError::UnsupportedOperation(_)));
    }
}
