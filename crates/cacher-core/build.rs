/// Builds the gRPC client and server code for `proto/cacher.proto` using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// `CacheData.content` is generated as `bytes::Bytes` instead of `Vec<u8>`, so
/// a body read from the cache or the origin is handed to the transport without
/// another copy.
///
/// # Output
///
/// - Rust bindings for the `cacher` package, included via
///   `tonic::include_proto!("cacher")`.
/// - `cacher_descriptor.bin`, the encoded file descriptor set served by gRPC
///   reflection.
use std::{env, error::Error, path::PathBuf};

fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("cacher_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".cacher.CacheData.content"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/cacher.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/cacher.proto");
    Ok(())
}
