use uuid::Uuid;

/**
 * How long (milliseconds) the manager waits between connection attempts, and after selecting a device.
 */
pub const CONNECT_DELAY: u64 = 5000;

/**
 * How often (milliseconds) to check if the peripheral is still connected.
 */
pub const POLL_DELAY: u64 = 3000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) to let the bluetooth adapter warm up before discovering devices.
 */
pub const WARM_UP_DELAY: u64 = 2000;

/**
 * How long (milliseconds) a discovery scan runs before the visible devices are listed.
 */
pub const SCAN_DURATION: u64 = 5000;

/**
 * How often (milliseconds) the console write loop checks for a connection.
 */
pub const CONSOLE_IDLE_DELAY: u64 = 2000;

/**
 * Number of samples collected before a batch is written to the output file.
 */
pub const BATCH_SIZE: usize = 100;

/**
 * Capacity of the channel between the transport and the connection manager.
 */
pub const EVENT_CHANNEL_SIZE: usize = 64;

/**
 * The UUID of the characteristic that notifies samples (one boolean byte each).
 */
pub const READ_CHARACTERISTIC: &str = "00001524-1212-efde-1523-785feabcd123";

/**
 * The UUID of the characteristic that operator values are written to.
 */
pub const WRITE_CHARACTERISTIC: &str = "00001525-1212-efde-1523-785feabcd123";

pub fn make_read_characteristic_uuid() -> Uuid {
    Uuid::parse_str(READ_CHARACTERISTIC).unwrap()
}

pub fn make_write_characteristic_uuid() -> Uuid {
    Uuid::parse_str(WRITE_CHARACTERISTIC).unwrap()
}
