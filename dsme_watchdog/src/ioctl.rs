//! Raw Linux watchdog ioctl requests and option flags.
//!
//! Values match `<linux/watchdog.h>`; `nix::ioctl_*!` macros are avoided
//! here in favor of raw `libc::ioctl` calls since the request numbers
//! mix read and write direction per field and are simplest to state
//! literally.

/// `WDIOC_GETSUPPORT` — read watchdog identity/support bitmask.
pub const WDIOC_GETSUPPORT: libc::c_ulong = 0x8028_5700;
/// `WDIOC_GETSTATUS` — read the current status bitmask.
pub const WDIOC_GETSTATUS: libc::c_ulong = 0x8004_5701;
/// `WDIOC_GETBOOTSTATUS` — read the status bitmask at last boot.
pub const WDIOC_GETBOOTSTATUS: libc::c_ulong = 0x8004_5702;
/// `WDIOC_GETTIMEOUT` — read the currently configured timeout, in seconds.
pub const WDIOC_GETTIMEOUT: libc::c_ulong = 0x8004_5707;
/// `WDIOC_SETTIMEOUT` — set the timeout, in seconds.
pub const WDIOC_SETTIMEOUT: libc::c_ulong = 0xC004_5706;
/// `WDIOC_KEEPALIVE` — kick the watchdog (equivalent to a data write).
pub const WDIOC_KEEPALIVE: libc::c_ulong = 0x8004_5705;
/// `WDIOC_SETOPTIONS` — apply one of the `WDIOS_*` option flags.
pub const WDIOC_SETOPTIONS: libc::c_ulong = 0x8004_5704;

/// Disarm the card (only honored if the driver was not opened `nowayout`).
pub const WDIOS_DISABLECARD: libc::c_int = 0x0001;
/// Re-arm the card.
pub const WDIOS_ENABLECARD: libc::c_int = 0x0002;

/// The magic "keep alive" byte written on every kick (§4.1, §6).
pub const KICK_BYTE: u8 = b'*';
/// The magic "clear nowayout" byte written once before close (§4.1, §6).
pub const QUIT_BYTE: u8 = b'V';
