use std::env;

#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub package: &'static str,
    pub version: &'static str,
}

pub const VERSION: Version = Version {
    package: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
};
