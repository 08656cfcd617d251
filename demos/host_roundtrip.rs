use anyhow::{bail, Context, Result};
use device_executor::{
    executor::DeviceOptions,
    setup_logging, ExecutorBuilder, HostMemory, LogConfig, PluginConfig, Stream, StreamExecutor,
    Timer,
};

fn main() -> Result<()> {
    // Optional config file as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => PluginConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => PluginConfig::default(),
    };
    setup_logging(LogConfig::from(&config.monitoring))?;

    let executor = ExecutorBuilder::new().with_config(config).build()?;
    executor.init(0, DeviceOptions::default())?;

    let description = executor.populate_device_description();
    println!(
        "Device: {} ({}), {} cores, {} bytes",
        description.name, description.vendor, description.core_count, description.device_memory_size
    );

    let stream = Stream::new();
    if !executor.allocate_stream(&stream) {
        bail!("Failed to allocate stream {}", stream.id());
    }

    let size = 1024u64;
    let mem = executor
        .allocate(size)
        .context("Device allocation failed")?;
    let input = HostMemory::from_vec((0..size).map(|i| i as u8).collect());
    let output = HostMemory::new(size as usize);

    let timer = Timer::new();
    if !executor.allocate_timer(&timer) {
        bail!("Failed to allocate timer");
    }
    let accepted = executor.start_timer(&stream, &timer)
        && executor.memcpy_host_to_device(&stream, &mem, &input, size)
        && executor.memcpy_device_to_host(&stream, &output, &mem, size)
        && executor.stop_timer(&stream, &timer)
        && executor.host_callback(
            &stream,
            Box::new(|| {
                tracing::info!("Round trip finished on the stream worker");
                Ok(())
            }),
        );
    if !accepted {
        bail!("Stream {} rejected queued work", stream.id());
    }
    executor.block_host_until_done(&stream)?;

    if input.to_vec() != output.to_vec() {
        bail!("Round trip mismatch");
    }
    println!(
        "Round trip of {} bytes took {} us",
        size,
        timer.microseconds().unwrap_or_default()
    );

    if let Some(usage) = executor.device_memory_usage() {
        println!("Device memory: {} free of {}", usage.free_bytes, usage.total_bytes);
    }

    executor.deallocate_stream(&stream);
    executor.deallocate(&mem)?;
    Ok(())
}
