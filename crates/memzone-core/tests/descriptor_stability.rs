//! Snapshot tests for the descriptor wire form
//!
//! Descriptors are persisted in compiled plans and exchanged between processes. A failing
//! snapshot here means the wire form changed; review downstream readers before accepting it with
//! `cargo insta review`.

use memzone_core::codec;
use memzone_core::{DeviceKind, GlobalLocationId, HostPin, LocationId, MemoryCase, MemoryDescriptor, ZoneId};

#[test]
fn test_host_descriptor_snapshots() {
    insta::assert_snapshot!(MemoryDescriptor::host().to_json().unwrap(), @r#"{"host_mem":{}}"#);

    let pinned = MemoryDescriptor::host_with(Some(HostPin::CudaPinned { device_id: 1 }), true);
    insta::assert_snapshot!(
        pinned.to_json().unwrap(),
        @r#"{"host_mem":{"pin":{"cuda_pinned":{"device_id":1}},"used_by_network":true}}"#
    );

    let fake = MemoryDescriptor::host_with(Some(HostPin::FakeDevPinned {}), false);
    insta::assert_snapshot!(fake.to_json().unwrap(), @r#"{"host_mem":{"pin":{"fake_dev_pinned":{}}}}"#);
}

#[test]
fn test_device_descriptor_snapshots() {
    let cuda = MemoryDescriptor::from(MemoryCase::DeviceCudaMem { device_id: 3 });
    insta::assert_snapshot!(cuda.to_json().unwrap(), @r#"{"device_cuda_mem":{"device_id":3}}"#);

    let enflame = MemoryDescriptor::from(MemoryCase::DeviceEnflameMem { device_id: 0 });
    insta::assert_snapshot!(enflame.to_json().unwrap(), @r#"{"device_enflame_mem":{"device_id":0}}"#);

    let abc = MemoryDescriptor::from(MemoryCase::DeviceAbcMem {});
    insta::assert_snapshot!(abc.to_json().unwrap(), @r#"{"device_abc_mem":{}}"#);

    insta::assert_snapshot!(MemoryDescriptor::unset().to_json().unwrap(), @"null");
}

#[test]
fn test_staging_descriptor_snapshot() {
    let device = MemoryDescriptor::from(MemoryCase::DeviceCudaMem { device_id: 2 });
    let staging = codec::corresponding_pinned_host_descriptor(&device);
    insta::assert_snapshot!(
        staging.to_json().unwrap(),
        @r#"{"host_mem":{"pin":{"cuda_pinned":{"device_id":2}}}}"#
    );
}

#[test]
fn test_packed_key_values_are_stable() {
    // Keys cross machine boundaries, so their numeric values are part of the contract
    assert_eq!(codec::serialize_to_i64(&LocationId::host()), 0x2000);
    assert_eq!(
        codec::serialize_to_i64(&LocationId::device(ZoneId::new(DeviceKind::Gpu, 1))),
        0x4040
    );
    assert_eq!(
        codec::serialize_to_i64(&LocationId::pinned_host(DeviceKind::Gpu, 1).registered_by_network()),
        0x2045
    );
    assert_eq!(
        codec::serialize_global_to_i64(&GlobalLocationId::new(1, LocationId::host())),
        0x42000
    );
}
