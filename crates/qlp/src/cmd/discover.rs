use tokio::time::Instant;

use crate::cmd::{start_engine, stop_engine, NetworkArgs};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{print_devices, OutputFormat};

pub async fn run(network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let engine = start_engine(network)?;

    let started = Instant::now();
    let result = engine.discover().await;
    stop_engine(&engine).await;

    let devices = result.map_err(|err| engine_error("discovery failed", err))?;
    print_devices(&devices, started.elapsed().as_millis(), format);
    Ok(SUCCESS)
}
