//! Embeds the interceptor shared object into the recorder binary.
//!
//! Release packaging points `REPROBUILD_INTERCEPTOR_SO` at the built
//! cdylib so a single binary can be shipped. Plain `cargo build` has no
//! payload yet; an empty stub is embedded and the preprocessor falls back
//! to the cdylib sitting next to the executable in the target directory.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=REPROBUILD_INTERCEPTOR_SO");

    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"))
        .join("interceptor_payload.so");

    match env::var("REPROBUILD_INTERCEPTOR_SO") {
        Ok(src) if !src.is_empty() => {
            println!("cargo:rerun-if-changed={src}");
            fs::copy(&src, &out).expect("copy interceptor payload into OUT_DIR");
        }
        _ => {
            fs::write(&out, []).expect("write empty interceptor payload stub");
        }
    }
}
