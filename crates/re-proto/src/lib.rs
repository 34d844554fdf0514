//! Generated message and service types for the Bazel Remote Execution v2
//! surface. Everything in this crate is produced by `tonic-build` from
//! `proto/remote_execution.proto`; nothing here is hand-written.

tonic::include_proto!("build.bazel.remote.execution.v2");

/// The encoded `FileDescriptorSet` for this package, used to serve
/// `tonic-reflection`'s `ServerReflection` service.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/remote_execution_descriptor.bin"));
