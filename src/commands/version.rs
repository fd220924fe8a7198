//! Command: print version information.

/// Build version: `MESHNODE_VERSION` at build time, else the crate version.
pub const VERSION: &str = match option_env!("MESHNODE_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Print the meshnode version to stdout.
pub fn run() {
    println!("meshnode {VERSION}");
}
