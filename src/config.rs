//! Build-time configuration: sizes, bus parameters and firmware identity.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Capacity of a command frame payload, in bytes
pub const FRAME_SIZE: usize = 64;

/// Shared memory size, as a power of two
pub const MEM_SIZE_LOG2: u32 = 12;

/// Shared memory size in bytes (4KB)
pub const MEM_SIZE: usize = 1 << MEM_SIZE_LOG2;

/// Largest write payload accepted in a single I2C transaction, as a power of
/// two
pub const INBOX_PAYLOAD_LOG2: u32 = 8;

/// I2C receive buffer size: payload plus the register address, plus slack for
/// the peripheral to detect an overlong transfer
pub const INBOX_SIZE: usize = (1 << INBOX_PAYLOAD_LOG2) + 2 + 2;

/// Number of event words the I2C mailbox can hold
pub const MAILBOX_SLOTS: usize = 4;

/// 7-bit I2C target address
pub const I2C_ADDRESS: u8 = 0x13;

/// Time allowed for a complete I2C message before the peripheral gives up
pub const SLAVE_TIMEOUT_MS: u32 = 100;

/// Period of the async polling delay: the I2C worker's wait when its mailbox
/// is empty, and the step in which host link settling is counted
pub const WORKER_POLL_MS: u32 = 10;

/// Delay between host link disconnect and reconnect at startup, so the host
/// re-enumerates without unplugging the cable
///
/// Rounded up to a whole number of [`WORKER_POLL_MS`] periods.
pub const LINK_SETTLE_MS: u32 = 1500;

/// I2C target peripheral configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cConfig {
    /// 7-bit address to match
    pub address: u8,
    /// Maximum duration of a transaction
    pub slave_timeout_ms: u32,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            address: I2C_ADDRESS,
            slave_timeout_ms: SLAVE_TIMEOUT_MS,
        }
    }
}

/// Firmware identity, reported by the identify command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    /// Debug build
    pub debug: bool,
    /// Semantic version
    pub version: &'static str,
    /// Source control reference
    pub git_ref: &'static str,
    /// Numeric build date reference
    pub build_date: &'static str,
}

impl BuildInfo {
    /// Identity of this build.
    ///
    /// `BUSMEM_GITVER` and `BUSMEM_BUILD_DATE` are picked up from the build
    /// environment when set.
    pub const fn current() -> Self {
        Self {
            debug: cfg!(debug_assertions),
            version: env!("CARGO_PKG_VERSION"),
            git_ref: match option_env!("BUSMEM_GITVER") {
                Some(git_ref) => git_ref,
                None => "nogit",
            },
            build_date: match option_env!("BUSMEM_BUILD_DATE") {
                Some(date) => date,
                None => "0",
            },
        }
    }

    /// Build mode flag: `d` for debug, `r` for release
    pub const fn mode(&self) -> char {
        if self.debug { 'd' } else { 'r' }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_4k() {
        assert_eq!(MEM_SIZE, 4096);
        assert!(MEM_SIZE.is_power_of_two());
        assert_eq!(INBOX_SIZE, 260);
    }

    #[test]
    fn default_i2c_config() {
        let config = I2cConfig::default();
        assert_eq!(config.address, 0x13);
        assert_eq!(config.slave_timeout_ms, 100);
    }

    #[test]
    fn build_info_mode() {
        let mut info = BuildInfo::current();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        info.debug = true;
        assert_eq!(info.mode(), 'd');
        info.debug = false;
        assert_eq!(info.mode(), 'r');
    }
}
