//! Build script for ffi-bridge
//!
//! Compiles the reference native backend (C, pthreads) into a static library
//! and links it into the crate so the bridge can be exercised end to end.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=native/backend.c");
    println!("cargo:rerun-if-changed=native/backend.h");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let native_dir = manifest_dir.join("native");

    let target_family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    if target_family != "unix" {
        println!(
            "cargo:warning=The native backend needs pthreads; target family '{}' is not supported",
            target_family
        );
    }

    cc::Build::new()
        .file(native_dir.join("backend.c"))
        .include(&native_dir)
        .flag_if_supported("-std=c11")
        .flag_if_supported("-pthread")
        .warnings(true)
        .compile("ffi_backend");

    // Worker threads are created with pthread_create
    if target_family == "unix" {
        println!("cargo:rustc-link-lib=dylib=pthread");
    }

    println!("cargo:include={}", native_dir.display());
}
