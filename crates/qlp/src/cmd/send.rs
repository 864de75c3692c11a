use qlp_engine::{Device, DeviceHandle, Dispatch, Engine};
use qlp_frame::{command, command_name, ChipId};
use tokio::time::Instant;
use tracing::info;

use crate::cmd::{start_engine, stop_engine, Action, NetworkArgs, SendArgs};
use crate::exit::{disposition_code, engine_error, CliError, CliResult, FAILURE};
use crate::output::{print_send, OutputFormat, SendOutput};

pub async fn run(args: SendArgs, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let engine = start_engine(network)?;
    let result = send(&engine, args, format).await;
    stop_engine(&engine).await;
    result
}

async fn send(engine: &Engine, args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let devices = engine
        .discover()
        .await
        .map_err(|err| engine_error("discovery failed", err))?;
    let device = select_device(&devices, &args.device).ok_or_else(|| {
        CliError::new(
            FAILURE,
            format!(
                "device {:?} did not answer discovery ({} device(s) found)",
                args.device,
                devices.len()
            ),
        )
    })?;

    if let Some(length) = args.length {
        engine.register(Device {
            strip_length: length,
            ..device.clone()
        });
    }

    let handle = engine
        .handle(&device.device_id)
        .map_err(|err| engine_error("send failed", err))?;
    let (id, dispatch) = dispatch(&handle, args.action).await;
    let dispatch = dispatch.map_err(|err| engine_error("send failed", err))?;

    let started = Instant::now();
    let outcome = handle
        .settle()
        .await
        .map_err(|err| engine_error("send failed", err))?;
    let waited_ms = started.elapsed().as_millis();
    info!(
        device_id = %device.device_id,
        sequence = dispatch.sequence,
        outcome = outcome.name(),
        "command settled"
    );

    let out = SendOutput::new(
        &device,
        command_name(id),
        dispatch.sequence,
        outcome,
        waited_ms,
    );
    print_send(&out, format);
    Ok(disposition_code(outcome))
}

async fn dispatch(handle: &DeviceHandle, action: Action) -> (u8, qlp_engine::Result<Dispatch>) {
    match action {
        Action::Length { length } => (command::LENGTH, handle.set_length(length).await),
        Action::Pixel { index, color } => {
            (command::SET_PIXEL, handle.set_pixel_color(index, color).await)
        }
        Action::Line { start, end, color } => (
            command::SET_LINE,
            handle.set_line_color(start, end, color).await,
        ),
        Action::Fill { color } => (command::FILL, handle.fill(color).await),
        Action::Reboot => (command::REBOOT, handle.reboot().await),
    }
}

/// Find `selector` among `devices` by device id, then chip id, then name.
fn select_device(devices: &[Device], selector: &str) -> Option<Device> {
    let by_id = devices.iter().find(|d| d.device_id == selector);
    let by_chip = || {
        let chip_id: ChipId = selector.parse().ok()?;
        devices.iter().find(|d| d.chip_id == chip_id)
    };
    let by_name = || devices.iter().find(|d| d.name == selector);

    by_id.or_else(by_chip).or_else(by_name).cloned()
}
