// build.rs
//
// Stamps the build date into the binary for the startup banner.

use chrono::Utc;
use std::{env, fs, path::Path};

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    fs::write(
        Path::new(&out_dir).join("build_info.rs"),
        format!("pub const BUILD_DATE: &str = \"{stamp}\";"),
    )
    .expect("failed to write build_info.rs");

    println!("cargo:rerun-if-changed=build.rs");
}
