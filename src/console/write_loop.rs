use log::{info, warn};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::console::input::Console;
use crate::device::connection::DeviceLink;
use crate::error::ConsoleError;

#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub write_characteristic: Uuid,
    pub idle_delay: Duration,
}

/// Encode operator input as the single little-endian byte sent to the peripheral.
pub fn encode_write_value(input: &str) -> Result<[u8; 1], ConsoleError> {
    let invalid = || ConsoleError::InvalidValue { input: input.trim().to_string() };

    let value: i64 = input.trim().parse().map_err(|_| invalid())?;
    let byte = u8::try_from(value).map_err(|_| invalid())?;

    Ok(byte.to_le_bytes())
}

/// Forward operator values to the write characteristic while connected. Returns on cancellation,
/// or with an error once the console is closed or a value can not be encoded.
pub async fn run_console_loop(
    cancel: CancellationToken,
    console: Console,
    link: DeviceLink,
    settings: ConsoleSettings,
) -> Result<(), ConsoleError> {
    'mainloop: loop {
        if !link.is_connected() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = sleep(settings.idle_delay) => {},
            }
            continue;
        }

        let input = tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            input = console.prompt("Enter value: ") => input?,
        };

        let value = encode_write_value(&input)?;
        match link.write(settings.write_characteristic, &value).await {
            Ok(()) => println!("Sent: {}", input.trim()),
            Err(err) => warn!("Failed to write to characteristic: {}", err),
        }
    }

    info!("Console write loop stopped");
    Ok(())
}
