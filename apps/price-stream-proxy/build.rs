//! Build Script for Price Stream Proxy
//!
//! Generates the price service client from `proto/price_service.proto`.
//!
//! # Panics Policy
//!
//! Build scripts panic on failure: there is no caller to return an error to,
//! and the message names what needs fixing.
#![allow(clippy::expect_used)]

use prost::Message;
use std::{env, fs, path::PathBuf, process::Command};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let proto_root = manifest_dir.join("proto");
    let proto_file = proto_root.join("price_service.proto");
    println!("cargo:rerun-if-changed={}", proto_file.display());

    // Vendored protoc produces the descriptor set, so no system protoc is needed.
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("vendored protoc unavailable");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let descriptor_path = out_dir.join("price_service_descriptor.pb");
    let status = Command::new(protoc)
        .arg("--include_imports")
        .arg(format!("--descriptor_set_out={}", descriptor_path.display()))
        .arg(format!("--proto_path={}", proto_root.display()))
        .arg(&proto_file)
        .status()
        .expect("Failed to run protoc");

    assert!(status.success(), "protoc failed to compile {}", proto_file.display());

    let descriptor_bytes =
        fs::read(&descriptor_path).expect("Failed to read protoc descriptor set output");
    let fds = prost_types::FileDescriptorSet::decode(&*descriptor_bytes)
        .expect("Failed to decode descriptor set");

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(false)
        .compile_fds(fds)
        .expect("Failed to compile protobuf definitions");
}
