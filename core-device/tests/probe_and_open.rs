//! Probing raw devices and opening sessions through the family registries.

use bridge_desktop::{
    MassStorageAssistant, MassStorageDriverFactory, VirtualDevice, VirtualDeviceAssistant,
    VirtualDeviceFactory,
};
use bridge_traits::device::{DeviceDescriptor, DeviceFamily, RawDevice, RawDeviceId, ROOT_FOLDER};
use core_device::{
    AssistantChain, Capability, DeviceError, DeviceSession, DriverRegistry, SessionOptions,
    SessionRegistry,
};
use std::sync::Arc;

fn chain() -> AssistantChain {
    AssistantChain::new()
        .with_assistant(Arc::new(VirtualDeviceAssistant))
        .with_assistant(Arc::new(MassStorageAssistant))
}

#[core_async::test]
async fn mass_storage_folder_opens_as_readable_writable_session() {
    let mount = tempfile::tempdir().unwrap();
    let raw = RawDevice::new("block-sdb1")
        .with_product("Pocket Player")
        .with_protocol("ums")
        .with_mount_path(mount.path());

    let descriptor = chain().probe(&raw).expect("mass storage claims mounted device");
    assert_eq!(descriptor.family(), DeviceFamily::MassStorage);
    assert_eq!(descriptor.display_name(), "Pocket Player");

    let drivers = DriverRegistry::new().with_factory(Arc::new(MassStorageDriverFactory));
    let session = DeviceSession::new(descriptor.clone(), drivers.create(&descriptor).unwrap());
    session.open(&SessionOptions::default()).await.unwrap();

    assert!(session.capabilities().contains(Capability::Writable));
    assert_eq!(session.enumerate_tracks().await.unwrap().len(), 0);

    let id = session.create_folder("Music", ROOT_FOLDER).await.unwrap();
    assert!(mount.path().join("Music").is_dir());
    assert_eq!(session.default_parent().await.unwrap(), id);

    let err = session.save_playlist("Mix", &[]).await.unwrap_err();
    assert!(matches!(err, DeviceError::UnsupportedOperation(_)));

    session.close().await.unwrap();
}

#[core_async::test]
async fn virtual_device_is_claimed_before_mass_storage() {
    let device = VirtualDevice::new("usb-3-1");
    let raw = device.raw().await.with_protocol("ums").with_mount_path("/mnt/x");

    let descriptor = chain().probe(&raw).unwrap();
    assert_eq!(descriptor.family(), DeviceFamily::Mtp);

    let drivers = DriverRegistry::new()
        .with_factory(Arc::new(VirtualDeviceFactory::new().with_device(device.clone())));
    let session = Arc::new(DeviceSession::new(
        descriptor.clone(),
        drivers.create(&descriptor).unwrap(),
    ));
    session.open(&SessionOptions::default()).await.unwrap();

    let registry = SessionRegistry::new();
    let id = registry.register(session.clone()).await.unwrap();
    assert!(registry.get(id).await.unwrap().is_ready().await);
}

#[core_async::test]
async fn audio_cd_has_no_driver() {
    let descriptor = DeviceDescriptor::new(RawDeviceId::new("/dev/sr0"), DeviceFamily::AudioCd, "CD");
    let drivers = DriverRegistry::new().with_factory(Arc::new(MassStorageDriverFactory));
    assert!(matches!(
        drivers.create(&descriptor),
        Err(DeviceError::UnsupportedOperation(_))
    ));
}

#[core_async::test]
async fn missing_mount_is_no_device_attached() {
    let raw = RawDevice::new("block-sdc1")
        .with_protocol("mass-storage")
        .with_mount_path("/definitely/not/mounted/here");
    let descriptor = chain().probe(&raw).unwrap();

    let session = DeviceSession::new(descriptor, Box::new(bridge_desktop::MassStorageDriver::new()));
    let err = session.open(&SessionOptions::default()).await.unwrap_err();
    assert!(matches!(err, DeviceError::NoDeviceAttached));
    assert!(err.is_connection_error());
}
