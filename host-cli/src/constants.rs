pub const SERIAL_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const FINGERPASS_USB_VID: u16 = 0x303A;
pub const FINGERPASS_USB_PID: u16 = 0x4002;
pub const FINGERPASS_IDENTITY_KEYWORDS: &[&str] = &["fingerpass"];
/// Highest user index requested by `list`.
pub const MAX_LIST_INDEX: u8 = 16;
